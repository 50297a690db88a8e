//! An append-only, thread-safe collector for messages whose retry budget
//! was exhausted.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::message::Envelope;

#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub node_id: String,
    pub envelope: Envelope,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct DeadLetterSink {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl DeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, node_id: impl Into<String>, envelope: Envelope, reason: impl Into<String>) {
        self.entries.lock().push(DeadLetterEntry {
            node_id: node_id.into(),
            envelope,
            reason: reason.into(),
            recorded_at: Utc::now(),
        });
    }

    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageKind;

    #[test]
    fn records_accumulate_in_order() {
        let sink = DeadLetterSink::new();
        sink.record("a", Envelope::new(MessageKind::Complete, "a", None, None), "budget exhausted");
        sink.record("b", Envelope::new(MessageKind::Fail, "b", None, None), "excluded error");
        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].node_id, "a");
        assert_eq!(entries[1].reason, "excluded error");
    }
}
