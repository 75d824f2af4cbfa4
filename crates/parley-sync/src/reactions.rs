//! Reaction toggling.
//!
//! Reactions are stored as independent `(message, emoji, user)` facts. A
//! toggle decides locally whether this user is adding or removing their
//! fact, applies that to the aggregated list right away, and then persists
//! only the one fact. Two users toggling at the same time touch different
//! facts, so neither write can overwrite the other.

use std::collections::BTreeSet;

use uuid::Uuid;

use parley_types::models::{Message, ReactionEntry};

use crate::error::SyncError;
use crate::store::RecordStore;
use crate::view::ChannelView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionOp {
    Add,
    Remove,
}

/// What toggling `emoji` for `user_id` does to `reactions`.
pub fn toggle(reactions: &[ReactionEntry], emoji: &str, user_id: Uuid) -> (Vec<ReactionEntry>, ReactionOp) {
    let present = reactions
        .iter()
        .any(|r| r.emoji == emoji && r.user_ids.contains(&user_id));
    let op = if present { ReactionOp::Remove } else { ReactionOp::Add };
    (apply(reactions, op, emoji, user_id), op)
}

/// Adds or removes one fact. Idempotent in both directions.
pub fn apply(reactions: &[ReactionEntry], op: ReactionOp, emoji: &str, user_id: Uuid) -> Vec<ReactionEntry> {
    let mut next: Vec<ReactionEntry> = reactions.to_vec();
    match op {
        ReactionOp::Add => match next.iter_mut().find(|r| r.emoji == emoji) {
            Some(entry) => {
                entry.user_ids.insert(user_id);
                entry.count = entry.user_ids.len();
            }
            None => next.push(ReactionEntry::new(emoji, BTreeSet::from([user_id]))),
        },
        ReactionOp::Remove => {
            if let Some(entry) = next.iter_mut().find(|r| r.emoji == emoji) {
                entry.user_ids.remove(&user_id);
                entry.count = entry.user_ids.len();
            }
            next.retain(|r| !r.user_ids.is_empty());
        }
    }
    next
}

/// Folds reaction facts into entries, keeping the order in which each
/// emoji first appears.
pub fn aggregate<'a>(facts: impl IntoIterator<Item = (&'a str, Uuid)>) -> Vec<ReactionEntry> {
    let mut entries: Vec<ReactionEntry> = Vec::new();
    for (emoji, user_id) in facts {
        match entries.iter_mut().find(|r| r.emoji == emoji) {
            Some(entry) => {
                entry.user_ids.insert(user_id);
                entry.count = entry.user_ids.len();
            }
            None => entries.push(ReactionEntry::new(emoji, BTreeSet::from([user_id]))),
        }
    }
    entries
}

/// `count == |user_ids|`, no empty entries, no repeated emoji.
pub fn is_consistent(reactions: &[ReactionEntry]) -> bool {
    let mut seen = BTreeSet::new();
    reactions
        .iter()
        .all(|r| r.count == r.user_ids.len() && !r.user_ids.is_empty() && seen.insert(r.emoji.as_str()))
}

impl<S: RecordStore> ChannelView<S> {
    /// Toggles the current user's `emoji` reaction on a message.
    pub async fn toggle_reaction(&self, message_id: Uuid, emoji: &str) -> Result<Message, SyncError> {
        let result = self.toggle_reaction_inner(message_id, emoji).await;
        self.surface(result)
    }

    async fn toggle_reaction_inner(&self, message_id: Uuid, emoji: &str) -> Result<Message, SyncError> {
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(SyncError::Validation("reaction emoji is empty".into()));
        }
        if emoji.len() > self.config.max_emoji_bytes {
            return Err(SyncError::Validation("reaction emoji is too long".into()));
        }
        let user = self.current_user()?;

        let (token, snapshot, op) = {
            let mut state = self.lock();
            let token = state.require_token()?;
            let entry = state.editable(message_id, "react to")?;
            let snapshot = entry.message.clone();
            let (next, op) = toggle(&entry.message.metadata.reactions, emoji, user.id);
            entry.message.metadata.reactions = next;
            (token, snapshot, op)
        };

        let result = self.store.react(message_id, op, emoji, user.id).await;
        self.settle_update(token, snapshot, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> (Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn toggle_twice_restores_state() {
        let (a, b) = users();
        let start = vec![ReactionEntry::new("🎉", BTreeSet::from([b]))];

        let (once, op) = toggle(&start, "👍", a);
        assert_eq!(op, ReactionOp::Add);
        assert_eq!(once.len(), 2);

        let (twice, op) = toggle(&once, "👍", a);
        assert_eq!(op, ReactionOp::Remove);
        assert_eq!(twice, start);
    }

    #[test]
    fn last_user_leaving_drops_entry() {
        let (a, b) = users();
        let start = vec![ReactionEntry::new("👍", BTreeSet::from([a, b]))];

        let (after_a, _) = toggle(&start, "👍", a);
        assert_eq!(after_a[0].count, 1);
        let (after_b, _) = toggle(&after_a, "👍", b);
        assert!(after_b.is_empty());
        assert!(is_consistent(&after_b));
    }

    #[test]
    fn facts_commute() {
        let (a, b) = users();
        let ab = apply(&apply(&[], ReactionOp::Add, "👍", a), ReactionOp::Add, "👍", b);
        let ba = apply(&apply(&[], ReactionOp::Add, "👍", b), ReactionOp::Add, "👍", a);
        assert_eq!(ab, ba);
        assert_eq!(ab[0].count, 2);
        assert_eq!(ab[0].user_ids, BTreeSet::from([a, b]));
    }

    #[test]
    fn apply_is_idempotent() {
        let (a, _) = users();
        let once = apply(&[], ReactionOp::Add, "👍", a);
        assert_eq!(apply(&once, ReactionOp::Add, "👍", a), once);
        let gone = apply(&once, ReactionOp::Remove, "👍", a);
        assert_eq!(apply(&gone, ReactionOp::Remove, "👍", a), gone);
    }

    #[test]
    fn aggregate_keeps_first_seen_order() {
        let (a, b) = users();
        let entries = aggregate([("🔥", a), ("👍", b), ("🔥", b), ("🔥", b)]);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].emoji, "🔥");
        assert_eq!(entries[0].count, 2);
        assert!(is_consistent(&entries));
    }

    #[test]
    fn inconsistent_lists_are_detected() {
        let (a, _) = users();
        let mut bad = ReactionEntry::new("👍", BTreeSet::from([a]));
        bad.count = 3;
        assert!(!is_consistent(&[bad]));
        let dup = ReactionEntry::new("👍", BTreeSet::from([a]));
        assert!(!is_consistent(&[dup.clone(), dup]));
    }
}
