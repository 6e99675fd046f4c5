//! Reconciles an incoming authoritative session list against the one on screen.
//!
//! The incoming list dictates order and presence. The previous list only
//! contributes reference stability: a row whose displayed fields did not
//! change is emitted as the previous `Arc`, so a renderer comparing pointers
//! can skip it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::Session;

/// Merge `incoming` into `previous`, returning the list to display.
pub fn merge(previous: &[Arc<Session>], incoming: Vec<Arc<Session>>) -> Vec<Arc<Session>> {
    if previous.is_empty() {
        return incoming;
    }

    let by_id: HashMap<&str, &Arc<Session>> =
        previous.iter().map(|s| (s.id.as_str(), s)).collect();

    incoming
        .into_iter()
        .map(|next| match by_id.get(next.id.as_str()) {
            Some(prev) if !prev.display_differs(&next) => Arc::clone(prev),
            _ => next,
        })
        .collect()
}

/// Convenience wrapper for owned sessions straight from a fetch
pub fn merge_owned(previous: &[Arc<Session>], incoming: Vec<Session>) -> Vec<Arc<Session>> {
    merge(previous, incoming.into_iter().map(Arc::new).collect())
}

/// Number of rows in `merged` that are not pointer-identical to a row of `previous`.
pub fn changed_count(previous: &[Arc<Session>], merged: &[Arc<Session>]) -> usize {
    let prev_ptrs: std::collections::HashSet<*const Session> =
        previous.iter().map(Arc::as_ptr).collect();
    merged
        .iter()
        .filter(|s| !prev_ptrs.contains(&Arc::as_ptr(*s)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str, summary: &str, unread: u32, ts: i64) -> Arc<Session> {
        Arc::new(Session {
            id: id.to_string(),
            display_name: id.to_uppercase(),
            summary: summary.to_string(),
            last_timestamp: ts,
            sort_timestamp: ts,
            unread_count: unread,
            avatar_ref: None,
        })
    }

    #[test]
    fn test_empty_previous_returns_incoming_unchanged() {
        let incoming = vec![session("a", "hi", 0, 1), session("b", "yo", 2, 2)];
        let ptrs: Vec<_> = incoming.iter().map(Arc::as_ptr).collect();

        let merged = merge(&[], incoming);
        let merged_ptrs: Vec<_> = merged.iter().map(Arc::as_ptr).collect();
        assert_eq!(ptrs, merged_ptrs);
    }

    #[test]
    fn test_unchanged_rows_keep_previous_identity() {
        let previous = vec![session("a", "hi", 1, 10), session("b", "yo", 0, 5)];
        let incoming = vec![session("a", "hi", 1, 10), session("b", "new", 0, 6)];

        let merged = merge(&previous, incoming.clone());

        assert!(Arc::ptr_eq(&merged[0], &previous[0]));
        assert!(Arc::ptr_eq(&merged[1], &incoming[1]));
        assert_eq!(changed_count(&previous, &merged), 1);
    }

    #[test]
    fn test_last_timestamp_change_alone_replaces_row() {
        let previous = vec![session("a", "hi", 1, 0)];
        let incoming = vec![session("a", "hi", 1, 100)];

        let merged = merge(&previous, incoming.clone());

        assert!(Arc::ptr_eq(&merged[0], &incoming[0]));
        assert_eq!(merged[0].last_timestamp, 100);
    }

    #[test]
    fn test_order_and_presence_follow_incoming() {
        let previous = vec![
            session("a", "1", 0, 1),
            session("b", "2", 0, 2),
            session("c", "3", 0, 3),
        ];
        let incoming = vec![
            session("c", "3", 0, 3),
            session("d", "4", 0, 4),
            session("a", "1", 0, 1),
        ];

        let merged = merge(&previous, incoming);
        let ids: Vec<&str> = merged.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d", "a"]);

        // b was dropped; c and a kept their identity
        assert!(Arc::ptr_eq(&merged[0], &previous[2]));
        assert!(Arc::ptr_eq(&merged[2], &previous[0]));
    }

    #[test]
    fn test_never_emits_ids_absent_from_incoming() {
        let previous = vec![session("x", "", 0, 0), session("y", "", 0, 0)];
        let merged = merge(&previous, vec![session("y", "", 0, 0)]);
        assert!(merged.iter().all(|s| s.id == "y"));
        assert!(merge(&previous, Vec::new()).is_empty());
    }

    #[test]
    fn test_avatar_and_name_are_tracked() {
        let previous = vec![session("a", "hi", 0, 1)];

        let mut renamed = (*previous[0]).clone();
        renamed.display_name = "Alice".into();
        let merged = merge(&previous, vec![Arc::new(renamed)]);
        assert!(!Arc::ptr_eq(&merged[0], &previous[0]));

        let mut avatar = (*previous[0]).clone();
        avatar.avatar_ref = Some("http://img/1".into());
        let merged = merge_owned(&previous, vec![avatar]);
        assert_eq!(merged[0].avatar_ref.as_deref(), Some("http://img/1"));
        assert!(!Arc::ptr_eq(&merged[0], &previous[0]));
    }
}
