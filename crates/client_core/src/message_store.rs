use std::collections::HashMap;

use shared::domain::{Message, MessageId};

/// Result of an upsert: whether anything observable changed, and what was there before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub changed: bool,
    pub previous: Option<Message>,
}

impl UpsertOutcome {
    pub fn inserted(&self) -> bool {
        self.previous.is_none()
    }
}

/// Deduplicated table of every message known to the session.
#[derive(Debug, Default)]
pub struct CanonicalMessageStore {
    entries: Vec<Message>,
    index: HashMap<MessageId, usize>,
}

impl CanonicalMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, message: Message) -> UpsertOutcome {
        match self.index.get(&message.id) {
            Some(&slot) => {
                let existing = &mut self.entries[slot];
                if !existing.differs_materially(&message) {
                    return UpsertOutcome {
                        changed: false,
                        previous: Some(existing.clone()),
                    };
                }
                let previous = std::mem::replace(existing, message);
                UpsertOutcome {
                    changed: true,
                    previous: Some(previous),
                }
            }
            None => {
                self.index.insert(message.id.clone(), self.entries.len());
                self.entries.push(message);
                UpsertOutcome {
                    changed: true,
                    previous: None,
                }
            }
        }
    }

    pub fn find(&self, id: &MessageId) -> Option<&Message> {
        self.index.get(id).map(|&slot| &self.entries[slot])
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    /// Insertion order. Diagnostics only; display order comes from the bucket index.
    pub fn all(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/message_store_tests.rs"]
mod tests;
