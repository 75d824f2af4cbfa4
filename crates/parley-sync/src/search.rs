//! Client-side filtering of the loaded window.

use crate::window::LocalMessage;

/// Entries of `entries` matching `query`, in window order.
///
/// Matching is a case-insensitive substring test against the body and the
/// author's display name and username. A tombstone's body never matches,
/// and a blank query matches everything.
pub fn filter<'a>(entries: &'a [LocalMessage], query: &str) -> Vec<&'a LocalMessage> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return entries.iter().collect();
    }
    entries.iter().filter(|e| matches(e, &needle)).collect()
}

fn matches(entry: &LocalMessage, needle: &str) -> bool {
    let m = &entry.message;
    if !m.is_deleted() && m.body.to_lowercase().contains(needle) {
        return true;
    }
    m.author_username.to_lowercase().contains(needle)
        || m
            .author_display_name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains(needle))
}
