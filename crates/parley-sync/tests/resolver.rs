mod common;

use std::sync::Arc;

use common::{Fixture, register};
use parley_sync::{ChannelResolver, RecordStore, SyncConfig, SyncError};
use parley_types::models::MemberRole;

#[tokio::test]
async fn id_and_slug_resolve_to_the_same_channel() {
    let fx = Fixture::new().await;
    let channel = fx.channel("design", false, &fx.ada).await;
    let resolver = ChannelResolver::new(fx.store.clone(), &SyncConfig::default());

    let by_slug = resolver.resolve("design", fx.ada.id).await.unwrap();
    let by_id = resolver.resolve(&channel.id.to_string(), fx.ada.id).await.unwrap();
    assert_eq!(by_slug, by_id);
    assert_eq!(by_id.channel.id, channel.id);
    assert_eq!(by_id.member_count, 1);
}

#[tokio::test]
async fn default_channel_is_bootstrapped_with_owner() {
    let fx = Fixture::new().await;
    let resolver = ChannelResolver::new(fx.store.clone(), &SyncConfig::default());

    let resolved = resolver.resolve("general", fx.ada.id).await.unwrap();
    assert_eq!(resolved.channel.slug, "general");
    assert!(!resolved.channel.is_private);
    assert_eq!(resolved.member_count, 1);

    let membership = fx.store.membership(resolved.channel.id, fx.ada.id).await.unwrap().unwrap();
    assert_eq!(membership.role, MemberRole::Owner);
}

#[tokio::test]
async fn concurrent_bootstrap_creates_one_channel() {
    let fx = Fixture::new().await;
    let carol = register(&fx.store, "carol", None).await;
    let resolver = Arc::new(ChannelResolver::new(fx.store.clone(), &SyncConfig::default()));

    let mut tasks = Vec::new();
    for user in [fx.ada.id, fx.bob.id, carol.id] {
        let resolver = resolver.clone();
        tasks.push(tokio::spawn(async move { resolver.resolve("general", user).await }));
    }
    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().channel.id);
    }

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(fx.store.member_count(ids[0]).await.unwrap(), 3);

    let mut owners = 0;
    for user in [fx.ada.id, fx.bob.id, carol.id] {
        if fx.store.membership(ids[0], user).await.unwrap().unwrap().role == MemberRole::Owner {
            owners += 1;
        }
    }
    assert_eq!(owners, 1);
}

#[tokio::test]
async fn unknown_identifier_is_not_found() {
    let fx = Fixture::new().await;
    let resolver = ChannelResolver::new(fx.store.clone(), &SyncConfig::default());

    let err = resolver.resolve("nowhere", fx.ada.id).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
    assert!(fx.store.channel_by_slug("nowhere").await.unwrap().is_none());
}

#[tokio::test]
async fn public_channel_is_joined_automatically() {
    let fx = Fixture::new().await;
    let channel = fx.channel("lobby", false, &fx.ada).await;
    let resolver = ChannelResolver::new(fx.store.clone(), &SyncConfig::default());

    let resolved = resolver.resolve("lobby", fx.bob.id).await.unwrap();
    assert_eq!(resolved.member_count, 2);
    let membership = fx.store.membership(channel.id, fx.bob.id).await.unwrap().unwrap();
    assert_eq!(membership.role, MemberRole::Member);

    // Resolving again does not add a second row.
    let again = resolver.resolve("lobby", fx.bob.id).await.unwrap();
    assert_eq!(again.member_count, 2);
}

#[tokio::test]
async fn private_channel_is_hidden_from_non_members() {
    let fx = Fixture::new().await;
    let channel = fx.channel("staff", true, &fx.ada).await;
    let resolver = ChannelResolver::new(fx.store.clone(), &SyncConfig::default());

    for ident in ["staff".to_string(), channel.id.to_string()] {
        let err = resolver.resolve(&ident, fx.bob.id).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }
    assert!(fx.store.membership(channel.id, fx.bob.id).await.unwrap().is_none());
    assert!(resolver.resolve("staff", fx.ada.id).await.is_ok());
}

#[tokio::test]
async fn configured_default_slug_is_bootstrapped() {
    let fx = Fixture::new().await;
    let config = SyncConfig {
        default_channel_slug: "town-square".into(),
        ..SyncConfig::default()
    };
    let resolver = ChannelResolver::new(fx.store.clone(), &config);

    assert!(resolver.resolve("town-square", fx.ada.id).await.is_ok());
    assert!(matches!(
        resolver.resolve("general", fx.ada.id).await,
        Err(SyncError::NotFound(_))
    ));
}
