//! Per-room ordered message list.
//!
//! The backing store does not guarantee delivery order, so every snapshot is
//! re-sorted by creation timestamp on arrival; ties keep arrival order. The
//! mesh variant has no order of record at all and appends in receipt order.

use crate::models::message::ChatMessage;

/// Bounded, timestamp-ordered view of a room's messages.
#[derive(Debug, Clone)]
pub struct Timeline {
    messages: Vec<ChatMessage>,
    cap: usize,
}

impl Timeline {
    pub fn new(cap: usize) -> Self {
        Self {
            messages: Vec::new(),
            cap,
        }
    }

    /// Replace the content with a full snapshot, re-sorted by `sent_at`
    /// ascending. The sort is stable: equal timestamps keep the snapshot's
    /// arrival order.
    pub fn apply_snapshot(&mut self, mut snapshot: Vec<ChatMessage>) {
        snapshot.sort_by_key(|m| m.sent_at);
        self.messages = snapshot;
        self.enforce_cap();
    }

    /// Append one message in receipt order (mesh variant).
    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.enforce_cap();
    }

    /// Drop the room's history entirely (room switch).
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn enforce_cap(&mut self) {
        if self.messages.len() > self.cap {
            let excess = self.messages.len() - self.cap;
            self.messages.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::MessageDraft;
    use crate::models::room::ClientId;
    use chrono::{Duration, Utc};

    fn msg(body: &str, offset_ms: i64) -> ChatMessage {
        let mut m = MessageDraft::new("t", ClientId::from("c"), body).stamp();
        m.sent_at = Utc::now() + Duration::milliseconds(offset_ms);
        m
    }

    #[test]
    fn snapshot_is_sorted_by_timestamp() {
        let mut tl = Timeline::new(100);
        tl.apply_snapshot(vec![msg("c", 30), msg("a", 10), msg("b", 20)]);
        let bodies: Vec<&str> = tl.messages().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["a", "b", "c"]);
        assert!(tl
            .messages()
            .windows(2)
            .all(|w| w[0].sent_at <= w[1].sent_at));
    }

    #[test]
    fn snapshot_ties_keep_arrival_order() {
        let mut tl = Timeline::new(100);
        let mut first = msg("first", 0);
        let mut second = msg("second", 0);
        let ts = Utc::now();
        first.sent_at = ts;
        second.sent_at = ts;
        tl.apply_snapshot(vec![first, second]);
        let bodies: Vec<&str> = tl.messages().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "second"]);
    }

    #[test]
    fn append_keeps_receipt_order() {
        let mut tl = Timeline::new(100);
        tl.append(msg("late-stamp", 50));
        tl.append(msg("early-stamp", 0));
        let bodies: Vec<&str> = tl.messages().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["late-stamp", "early-stamp"]);
    }

    #[test]
    fn cap_drops_oldest_first() {
        let mut tl = Timeline::new(3);
        for i in 0..5 {
            tl.append(msg(&format!("m{}", i), i));
        }
        let bodies: Vec<&str> = tl.messages().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn clear_empties_the_room() {
        let mut tl = Timeline::new(10);
        tl.append(msg("x", 0));
        assert!(!tl.is_empty());
        tl.clear();
        assert!(tl.is_empty());
    }
}
