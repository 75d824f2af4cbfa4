//! The in-memory ordered set of messages for the active channel.
//!
//! Confirmed history sits at the front in chronological order. Live inserts
//! and provisional sends are appended at the tail in arrival order and are
//! never re-sorted afterwards.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_types::events::GatewayEvent;
use parley_types::models::{Message, PageCursor, ReactionEntry};

/// Local delivery state of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Sent from this client, not yet acknowledged by the store.
    Pending,
    /// Known to the store.
    Confirmed,
    /// The send failed; kept so the user can retry or discard it.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalMessage {
    pub message: Message,
    pub delivery: Delivery,
}

impl LocalMessage {
    fn confirmed(message: Message) -> Self {
        Self {
            message,
            delivery: Delivery::Confirmed,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.delivery == Delivery::Confirmed
    }

    /// What a user may see of this message.
    pub fn project(&self) -> MessageProjection {
        let m = &self.message;
        MessageProjection {
            id: m.id,
            author_id: m.author_id,
            author_name: m.author_display_name.clone().unwrap_or_else(|| m.author_username.clone()),
            body: m.rendered_body().to_string(),
            created_at: m.created_at,
            edited: m.metadata.edited,
            pinned: m.metadata.pinned,
            deleted: m.is_deleted(),
            reactions: m.metadata.reactions.clone(),
            delivery: self.delivery.clone(),
        }
    }
}

/// Render-ready view of one message. Tombstones carry the placeholder body.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageProjection {
    pub id: Uuid,
    pub author_id: Uuid,
    pub author_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
    pub pinned: bool,
    pub deleted: bool,
    pub reactions: Vec<ReactionEntry>,
    pub delivery: Delivery,
}

/// How a change-feed event landed in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    /// Matched a pending send by nonce; the temp id was replaced in place.
    Reconciled,
    Replaced,
    /// The id is already present; nothing changed.
    Duplicate,
    /// Older than the local copy.
    Stale,
    /// Outside the loaded window or not a message event.
    Ignored,
}

#[derive(Debug, Default)]
pub struct MessageWindow {
    entries: Vec<LocalMessage>,
    ids: HashSet<Uuid>,
}

impl MessageWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LocalMessage] {
        &self.entries
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    pub fn get(&self, id: Uuid) -> Option<&LocalMessage> {
        self.position(id).map(|i| &self.entries[i])
    }

    pub(crate) fn get_mut(&mut self, id: Uuid) -> Option<&mut LocalMessage> {
        self.position(id).map(|i| &mut self.entries[i])
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }

    /// Cursor of the oldest confirmed message, where the next page ends.
    pub fn oldest_cursor(&self) -> Option<PageCursor> {
        self.entries
            .iter()
            .find(|e| e.is_confirmed())
            .map(|e| e.message.cursor())
    }

    /// Installs the first page. Anything that reached the window while the
    /// page was in flight is merged with it in `(created_at, id)` order;
    /// local sends stay at the tail.
    pub fn seed(&mut self, page: Vec<Message>) -> usize {
        let mut confirmed: Vec<LocalMessage> = Vec::with_capacity(page.len() + self.entries.len());
        let mut unconfirmed = Vec::new();
        for entry in self.entries.drain(..) {
            if entry.is_confirmed() {
                confirmed.push(entry);
            } else {
                unconfirmed.push(entry);
            }
        }

        let mut added = 0;
        for message in page {
            match confirmed.iter_mut().find(|e| e.message.id == message.id) {
                Some(existing) => {
                    if message.updated_at > existing.message.updated_at {
                        existing.message = message;
                    }
                }
                None => {
                    confirmed.push(LocalMessage::confirmed(message));
                    added += 1;
                }
            }
        }
        confirmed.sort_by_key(|e| e.message.cursor());

        self.entries = confirmed;
        self.entries.extend(unconfirmed);
        self.reindex();
        added
    }

    /// Prepends an older page (chronological order). Ids already present
    /// are skipped.
    pub fn prepend(&mut self, page: Vec<Message>) -> usize {
        let mut older: Vec<LocalMessage> = Vec::with_capacity(page.len());
        for message in page {
            if self.ids.insert(message.id) {
                older.push(LocalMessage::confirmed(message));
            }
        }
        let added = older.len();
        older.append(&mut self.entries);
        self.entries = older;
        added
    }

    pub(crate) fn push_pending(&mut self, message: Message) {
        self.ids.insert(message.id);
        self.entries.push(LocalMessage {
            message,
            delivery: Delivery::Pending,
        });
    }

    /// Swaps a provisional entry for its authoritative record without
    /// moving it. If the feed already delivered the record, the provisional
    /// entry is dropped instead.
    pub(crate) fn confirm_send(&mut self, temp_id: Uuid, message: Message) -> bool {
        let Some(pos) = self.position(temp_id) else {
            return false;
        };

        if message.id != temp_id && self.contains(message.id) {
            self.remove(temp_id);
            return true;
        }

        self.ids.remove(&temp_id);
        self.ids.insert(message.id);
        self.entries[pos] = LocalMessage::confirmed(message);
        true
    }

    pub(crate) fn set_delivery(&mut self, id: Uuid, delivery: Delivery) -> bool {
        match self.get_mut(id) {
            Some(entry) => {
                entry.delivery = delivery;
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, id: Uuid) -> Option<LocalMessage> {
        let pos = self.position(id)?;
        self.ids.remove(&id);
        Some(self.entries.remove(pos))
    }

    /// Overwrites the local copy with `message`, keeping its position.
    pub(crate) fn replace(&mut self, message: Message) -> bool {
        match self.get_mut(message.id) {
            Some(entry) => {
                *entry = LocalMessage::confirmed(message);
                true
            }
            None => false,
        }
    }

    /// Applies one change-feed event.
    ///
    /// Creates are inserted if absent and appended at the tail. Updates and
    /// deletes replace the local copy when present; an absent one is only
    /// inserted when it falls inside the loaded range.
    pub fn merge_event(&mut self, event: GatewayEvent) -> MergeOutcome {
        match event {
            GatewayEvent::MessageCreate { message } => {
                if self.contains(message.id) {
                    return MergeOutcome::Duplicate;
                }
                if self.reconcile_nonce(&message) {
                    return MergeOutcome::Reconciled;
                }
                self.ids.insert(message.id);
                self.entries.push(LocalMessage::confirmed(message));
                MergeOutcome::Inserted
            }
            GatewayEvent::MessageUpdate { message } | GatewayEvent::MessageDelete { message } => {
                if let Some(entry) = self.get_mut(message.id) {
                    if message.updated_at < entry.message.updated_at {
                        return MergeOutcome::Stale;
                    }
                    *entry = LocalMessage::confirmed(message);
                    return MergeOutcome::Replaced;
                }
                if self.reconcile_nonce(&message) {
                    return MergeOutcome::Reconciled;
                }
                self.insert_in_range(message)
            }
            GatewayEvent::Ready { .. } => MergeOutcome::Ignored,
        }
    }

    fn reconcile_nonce(&mut self, message: &Message) -> bool {
        let Some(nonce) = message.nonce else {
            return false;
        };
        let found = self
            .entries
            .iter()
            .position(|e| !e.is_confirmed() && e.message.nonce == Some(nonce));
        match found {
            Some(pos) => {
                let temp_id = self.entries[pos].message.id;
                self.ids.remove(&temp_id);
                self.ids.insert(message.id);
                self.entries[pos] = LocalMessage::confirmed(message.clone());
                true
            }
            None => false,
        }
    }

    fn insert_in_range(&mut self, message: Message) -> MergeOutcome {
        let Some(oldest) = self.oldest_cursor() else {
            return MergeOutcome::Ignored;
        };
        let key = message.cursor();
        if key < oldest {
            return MergeOutcome::Ignored;
        }
        let pos = self
            .entries
            .iter()
            .position(|e| e.is_confirmed() && e.message.cursor() > key)
            .unwrap_or_else(|| self.confirmed_tail());
        self.ids.insert(message.id);
        self.entries.insert(pos, LocalMessage::confirmed(message));
        MergeOutcome::Inserted
    }

    /// Index just past the last confirmed entry.
    fn confirmed_tail(&self) -> usize {
        self.entries
            .iter()
            .rposition(|e| e.is_confirmed())
            .map_or(0, |i| i + 1)
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        if !self.ids.contains(&id) {
            return None;
        }
        self.entries.iter().position(|e| e.message.id == id)
    }

    fn reindex(&mut self) {
        self.ids = self.entries.iter().map(|e| e.message.id).collect();
    }
}
