mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{FlakyStore, Fixture, view_on, wait_until};
use parley_sync::store::NewMessage;
use parley_sync::{Delivery, ErrorKind, RecordStore, StoreError, SyncConfig, SyncError};
use parley_types::models::TOMBSTONE_PLACEHOLDER;

#[tokio::test]
async fn send_replaces_temp_entry_in_place() {
    let fx = Fixture::new().await;
    let (view, sink) = fx.view(&fx.ada);
    view.open("general").await.unwrap();

    let first = view.send("  first  ").await.unwrap();
    let second = view.send("second").await.unwrap();
    assert_eq!(first.body, "first");

    let snapshot = view.snapshot();
    let ids: Vec<_> = snapshot.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert!(snapshot.iter().all(|m| m.delivery == Delivery::Confirmed));
    assert_eq!(snapshot[0].author_name, "Ada Lovelace");
    assert!(sink.is_empty());
}

#[tokio::test]
async fn failed_send_is_kept_and_can_be_retried() {
    let fx = Fixture::new().await;
    let flaky = Arc::new(FlakyStore::new(fx.store.clone()));
    let (view, sink) = view_on(flaky.clone(), &fx.ada, SyncConfig::default());
    let channel = view.open("general").await.unwrap().channel;

    flaky.fail_writes.store(true, Ordering::SeqCst);
    assert!(matches!(view.send("are you there?").await, Err(SyncError::Persistence(_))));
    assert_eq!(sink.kinds(), vec![ErrorKind::Persistence]);

    let failed = view.snapshot().pop().unwrap();
    assert!(matches!(failed.delivery, Delivery::Failed { .. }));
    assert_eq!(failed.body, "are you there?");

    flaky.fail_writes.store(false, Ordering::SeqCst);
    let stored = view.retry_send(failed.id).await.unwrap();
    let snapshot = view.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, stored.id);
    assert_eq!(snapshot[0].delivery, Delivery::Confirmed);

    let page = fx.store.messages_page(channel.id, None, 50).await.unwrap();
    assert_eq!(page.len(), 1);
}

#[tokio::test]
async fn retrying_a_send_that_reached_the_store_does_not_duplicate() {
    let fx = Fixture::new().await;
    let (view, _sink) = fx.view(&fx.ada);
    let channel = view.open("general").await.unwrap().channel;

    let stored = view.send("exactly once").await.unwrap();
    let again = fx
        .store
        .insert_message(NewMessage {
            channel_id: channel.id,
            author_id: fx.ada.id,
            body: "exactly once".into(),
            nonce: stored.nonce.unwrap(),
        })
        .await
        .unwrap();
    assert_eq!(again.id, stored.id);
    assert_eq!(fx.store.messages_page(channel.id, None, 50).await.unwrap().len(), 1);
}

#[tokio::test]
async fn nonce_owned_by_another_channel_or_author_is_a_conflict() {
    let fx = Fixture::new().await;
    let secret = fx.channel("secret", true, &fx.ada).await;
    let lobby = fx.channel("lobby", false, &fx.bob).await;
    let private = fx.post(secret.id, &fx.ada, "private plan").await;
    let nonce = private.nonce.unwrap();

    let other_channel = fx
        .store
        .insert_message(NewMessage {
            channel_id: lobby.id,
            author_id: fx.bob.id,
            body: "hello".into(),
            nonce,
        })
        .await;
    assert!(matches!(other_channel, Err(StoreError::Conflict(_))));

    let other_author = fx
        .store
        .insert_message(NewMessage {
            channel_id: secret.id,
            author_id: fx.bob.id,
            body: "let me in".into(),
            nonce,
        })
        .await;
    assert!(matches!(other_author, Err(StoreError::Conflict(_))));

    assert!(fx.store.messages_page(lobby.id, None, 50).await.unwrap().is_empty());
    let secret_page = fx.store.messages_page(secret.id, None, 50).await.unwrap();
    assert_eq!(secret_page.len(), 1);
    assert_eq!(secret_page[0].id, private.id);
}

#[tokio::test]
async fn failed_send_can_be_discarded() {
    let fx = Fixture::new().await;
    let flaky = Arc::new(FlakyStore::new(fx.store.clone()));
    let (view, _sink) = view_on(flaky.clone(), &fx.ada, SyncConfig::default());
    view.open("general").await.unwrap();

    let confirmed = view.send("kept").await.unwrap();
    flaky.fail_writes.store(true, Ordering::SeqCst);
    let _ = view.send("lost").await;
    let failed = view.snapshot().pop().unwrap();

    assert!(matches!(view.discard_failed(confirmed.id), Err(SyncError::Validation(_))));
    view.discard_failed(failed.id).unwrap();
    let ids: Vec<_> = view.snapshot().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![confirmed.id]);
}

#[tokio::test]
async fn blank_body_never_reaches_the_store() {
    let fx = Fixture::new().await;
    let (view, sink) = fx.view(&fx.ada);
    let channel = view.open("general").await.unwrap().channel;

    assert!(matches!(view.send("   ").await, Err(SyncError::Validation(_))));
    assert!(matches!(view.send(&"x".repeat(4001)).await, Err(SyncError::Validation(_))));
    assert!(view.is_empty());
    assert!(fx.store.messages_page(channel.id, None, 50).await.unwrap().is_empty());
    assert_eq!(sink.kinds(), vec![ErrorKind::Validation, ErrorKind::Validation]);
}

#[tokio::test]
async fn edit_marks_message_edited() {
    let fx = Fixture::new().await;
    let (view, _sink) = fx.view(&fx.ada);
    view.open("general").await.unwrap();
    let sent = view.send("teh plan").await.unwrap();

    let edited = view.edit(sent.id, "the plan").await.unwrap();
    assert_eq!(edited.body, "the plan");
    assert!(edited.metadata.edited);
    assert!(edited.metadata.edited_at.is_some());

    let projection = view.message(sent.id).unwrap();
    assert_eq!(projection.body, "the plan");
    assert!(projection.edited);
}

#[tokio::test]
async fn only_the_author_edits_or_deletes() {
    let fx = Fixture::new().await;
    let (ada_view, _) = fx.view(&fx.ada);
    let (bob_view, bob_sink) = fx.view(&fx.bob);
    ada_view.open("general").await.unwrap();
    bob_view.open("general").await.unwrap();
    let sent = ada_view.send("mine").await.unwrap();
    assert!(wait_until(|| bob_view.message(sent.id).is_some()).await);

    assert!(matches!(bob_view.edit(sent.id, "yours").await, Err(SyncError::Forbidden(_))));
    assert!(matches!(bob_view.soft_delete(sent.id).await, Err(SyncError::Forbidden(_))));
    assert_eq!(bob_sink.kinds(), vec![ErrorKind::Auth, ErrorKind::Auth]);
    assert_eq!(bob_view.message(sent.id).unwrap().body, "mine");
}

#[tokio::test]
async fn tombstone_round_trip() {
    let fx = Fixture::new().await;
    let (view, _sink) = fx.view(&fx.ada);
    let channel = view.open("general").await.unwrap().channel;
    let sent = view.send("regrettable").await.unwrap();

    let deleted = view.soft_delete(sent.id).await.unwrap();
    assert!(deleted.is_deleted());
    assert!(deleted.metadata.deleted);
    assert_eq!(deleted.metadata.deleted_by, Some(fx.ada.id));

    // The record keeps its body; nothing user-facing shows it.
    let stored = fx.store.message(sent.id).await.unwrap().unwrap();
    assert_eq!(stored.body, "regrettable");
    assert_eq!(view.message(sent.id).unwrap().body, TOMBSTONE_PLACEHOLDER);
    assert!(view.search("regrettable").is_empty());

    // A fresh view sees the same tombstone from history.
    let (fresh, _) = fx.view(&fx.ada);
    fresh.open(&channel.id.to_string()).await.unwrap();
    let projection = fresh.message(sent.id).unwrap();
    assert!(projection.deleted);
    assert_eq!(projection.body, TOMBSTONE_PLACEHOLDER);

    // Tombstones cannot be edited, pinned or reacted to.
    assert!(matches!(view.edit(sent.id, "again").await, Err(SyncError::Validation(_))));
    assert!(matches!(view.toggle_pin(sent.id).await, Err(SyncError::Validation(_))));
    assert!(matches!(view.toggle_reaction(sent.id, "👍").await, Err(SyncError::Validation(_))));
}

#[tokio::test]
async fn any_member_toggles_pin() {
    let fx = Fixture::new().await;
    let (ada_view, _) = fx.view(&fx.ada);
    let (bob_view, _) = fx.view(&fx.bob);
    ada_view.open("general").await.unwrap();
    bob_view.open("general").await.unwrap();
    let sent = ada_view.send("pin me").await.unwrap();
    assert!(wait_until(|| bob_view.message(sent.id).is_some()).await);

    let pinned = bob_view.toggle_pin(sent.id).await.unwrap();
    assert!(pinned.metadata.pinned);
    assert_eq!(pinned.metadata.pinned_by, Some(fx.bob.id));
    assert!(wait_until(|| ada_view.message(sent.id).is_some_and(|m| m.pinned)).await);

    let unpinned = ada_view.toggle_pin(sent.id).await.unwrap();
    assert!(!unpinned.metadata.pinned);
    assert!(unpinned.metadata.pinned_at.is_none());
    assert!(wait_until(|| bob_view.message(sent.id).is_some_and(|m| !m.pinned)).await);
}

#[tokio::test]
async fn failed_edit_rolls_back() {
    let fx = Fixture::new().await;
    let flaky = Arc::new(FlakyStore::new(fx.store.clone()));
    let (view, sink) = view_on(flaky.clone(), &fx.ada, SyncConfig::default());
    view.open("general").await.unwrap();
    let sent = view.send("original").await.unwrap();

    flaky.fail_writes.store(true, Ordering::SeqCst);
    assert!(view.edit(sent.id, "changed").await.is_err());
    let projection = view.message(sent.id).unwrap();
    assert_eq!(projection.body, "original");
    assert!(!projection.edited);
    assert_eq!(sink.kinds(), vec![ErrorKind::Persistence]);
}

#[tokio::test]
async fn signed_out_user_cannot_mutate() {
    let fx = Fixture::new().await;
    let session = Arc::new(parley_sync::SessionHandle::signed_in(fx.ada.clone()));
    let sink = Arc::new(common::RecordingSink::default());
    let view = parley_sync::ChannelView::new(fx.store.clone(), session.clone(), sink.clone(), SyncConfig::default());
    view.open("general").await.unwrap();

    session.sign_out();
    assert!(matches!(view.send("hello").await, Err(SyncError::Auth)));
    assert!(matches!(view.open("general").await, Err(SyncError::Auth)));
    assert_eq!(sink.kinds(), vec![ErrorKind::Auth, ErrorKind::Auth]);
}

#[tokio::test]
async fn send_settling_after_switch_leaves_new_channel_untouched() {
    let fx = Fixture::new().await;
    fx.channel("first", false, &fx.ada).await;
    let second = fx.channel("second", false, &fx.ada).await;
    let already = fx.post(second.id, &fx.ada, "already here").await;

    let flaky = Arc::new(FlakyStore::new(fx.store.clone()));
    let (view, sink) = view_on(flaky.clone(), &fx.ada, SyncConfig::default());
    view.open("first").await.unwrap();
    flaky.set_write_delay(Duration::from_millis(200));

    let (sent, opened) = tokio::join!(view.send("left behind"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        view.open("second").await
    });
    let sent = sent.unwrap();
    opened.unwrap();

    assert_eq!(sent.body, "left behind");
    assert_eq!(view.active_channel().unwrap().channel.id, second.id);
    let ids: Vec<_> = view.snapshot().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![already.id]);
    assert!(view.local_entry(sent.id).is_none());
    assert!(sink.is_empty());
}

#[tokio::test]
async fn edit_settling_after_close_is_not_applied() {
    let fx = Fixture::new().await;
    let channel = fx.channel("notes", false, &fx.ada).await;
    let original = fx.post(channel.id, &fx.ada, "draft").await;

    let flaky = Arc::new(FlakyStore::new(fx.store.clone()));
    let (view, _sink) = view_on(flaky.clone(), &fx.ada, SyncConfig::default());
    view.open("notes").await.unwrap();
    flaky.set_write_delay(Duration::from_millis(200));

    let (edited, ()) = tokio::join!(view.edit(original.id, "rewritten"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        view.close();
    });

    assert_eq!(edited.unwrap().body, "rewritten");
    assert!(view.active_channel().is_none());
    assert!(view.is_empty());
}

#[tokio::test]
async fn pin_and_reaction_settling_after_switch_are_not_applied() {
    let fx = Fixture::new().await;
    let first = fx.channel("first", false, &fx.ada).await;
    fx.channel("second", false, &fx.ada).await;
    let target = fx.post(first.id, &fx.ada, "pin me").await;

    let flaky = Arc::new(FlakyStore::new(fx.store.clone()));
    let (view, _sink) = view_on(flaky.clone(), &fx.ada, SyncConfig::default());
    view.open("first").await.unwrap();
    flaky.set_write_delay(Duration::from_millis(200));

    let (pinned, reacted, opened) = tokio::join!(
        view.toggle_pin(target.id),
        view.toggle_reaction(target.id, "👍"),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            view.open("second").await
        }
    );
    opened.unwrap();

    assert!(pinned.unwrap().metadata.pinned);
    assert_eq!(reacted.unwrap().metadata.reactions[0].count, 1);
    assert!(view.message(target.id).is_none());
    assert!(view.is_empty());
}
