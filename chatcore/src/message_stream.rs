//! Ordered message list of the active conversation.
//!
//! The list is always sorted ascending by `(create_time, local_id)` and never
//! holds two messages with the same [`MessageKey`]. The current list is exposed
//! as an `Arc` snapshot; an operation that accepts nothing keeps the same
//! snapshot so callers can skip a re-render with `Arc::ptr_eq`.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};

use crate::types::{Message, MessageKey};

/// Result of [`MessageStream::append_newer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamUpdate {
    Unchanged,
    Changed { added: usize },
}

impl StreamUpdate {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Result of [`MessageStream::append_older`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrependOutcome {
    /// Number of messages actually inserted
    pub inserted: usize,
    /// Index of the anchor message after the prepend, if it is still present.
    /// The host keeps the anchor's visual offset by scrolling to this row.
    pub anchor_index: Option<usize>,
}

#[derive(Debug, Default)]
pub struct MessageStream {
    messages: Arc<Vec<Message>>,
    keys: HashSet<MessageKey>,
    has_more: bool,
}

impl MessageStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot of the list
    pub fn snapshot(&self) -> Arc<Vec<Message>> {
        Arc::clone(&self.messages)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, key: &MessageKey) -> bool {
        self.keys.contains(key)
    }

    pub fn oldest(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn newest(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether the store reported more history beyond the oldest loaded page
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn set_has_more(&mut self, has_more: bool) {
        self.has_more = has_more;
    }

    /// Discard everything and start over with `messages`.
    pub fn replace(&mut self, mut messages: Vec<Message>) {
        messages.sort_by_key(Message::order);
        let mut keys = HashSet::with_capacity(messages.len());
        messages.retain(|m| keys.insert(m.key()));
        self.messages = Arc::new(messages);
        self.keys = keys;
    }

    pub fn clear(&mut self) {
        self.messages = Arc::new(Vec::new());
        self.keys.clear();
        self.has_more = false;
    }

    /// Insert a page of older history.
    ///
    /// Messages already present are dropped. The page normally sorts entirely
    /// before the current head, but overlapping pages are merged in order.
    pub fn append_older(
        &mut self,
        page: Vec<Message>,
        anchor: Option<&MessageKey>,
    ) -> PrependOutcome {
        let accepted = self.accept(page);
        if accepted.is_empty() {
            return PrependOutcome {
                inserted: 0,
                anchor_index: anchor.and_then(|k| self.position_of(k)),
            };
        }

        let inserted = accepted.len();
        let head = self.messages.first().map(Message::order);
        let list = Arc::make_mut(&mut self.messages);
        match head {
            Some(head) if accepted.last().is_some_and(|m| m.order() <= head) => {
                let newer = std::mem::replace(list, accepted);
                list.extend(newer);
            }
            _ => merge_sorted(list, accepted),
        }

        debug!("Prepended {} older messages ({} total)", inserted, list.len());

        PrependOutcome {
            inserted,
            anchor_index: anchor.and_then(|k| self.position_of(k)),
        }
    }

    /// Append new or incremental messages.
    ///
    /// Candidates are always checked against the key index, a hash lookup
    /// that never scans the list. `dedupe` marks an overlapping source
    /// (polls); without it the caller expects unique input (live push), so
    /// any duplicate that still shows up is reported.
    pub fn append_newer(&mut self, candidates: Vec<Message>, dedupe: bool) -> StreamUpdate {
        let offered = candidates.len();
        let accepted = self.accept(candidates);
        let dropped = offered - accepted.len();
        if dropped > 0 && !dedupe {
            warn!("Dropped {} already displayed messages from a unique batch", dropped);
        }

        if accepted.is_empty() {
            return StreamUpdate::Unchanged;
        }

        let added = accepted.len();
        let tail = self.messages.last().map(Message::order);
        let list = Arc::make_mut(&mut self.messages);
        match tail {
            Some(tail) if accepted[0].order() < tail => merge_sorted(list, accepted),
            _ => list.extend(accepted),
        }
        StreamUpdate::Changed { added }
    }

    /// Sort candidates and keep only those whose key is new, registering them.
    fn accept(&mut self, mut candidates: Vec<Message>) -> Vec<Message> {
        candidates.sort_by_key(Message::order);
        candidates.retain(|m| self.keys.insert(m.key()));
        candidates
    }

    fn position_of(&self, key: &MessageKey) -> Option<usize> {
        if !self.keys.contains(key) {
            return None;
        }
        self.messages.iter().position(|m| m.key() == *key)
    }
}

/// Merge sorted `incoming` into sorted `list`.
fn merge_sorted(list: &mut Vec<Message>, incoming: Vec<Message>) {
    let existing = std::mem::take(list);
    list.reserve(existing.len() + incoming.len());

    let mut a = existing.into_iter().peekable();
    let mut b = incoming.into_iter().peekable();
    loop {
        let take_a = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => x.order() <= y.order(),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_a { a.next() } else { b.next() };
        list.extend(next);
    }
}
