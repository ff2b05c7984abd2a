use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageId};

/// The full ledger state: every confirmed message in ledger order.
///
/// Append-only. A message id appears at most once; re-appending an id that is
/// already recorded is ignored, which is what makes client retries safe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuestbookState {
    pub messages: Vec<Message>,
}

impl GuestbookState {
    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.id == id)
    }

    /// Append a message unless its id is already recorded.
    /// Returns `true` if the message was added.
    pub fn append(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Merge another state into this one.
    /// Unknown messages are appended in the other state's order; known ids are kept as-is.
    pub fn merge(&mut self, other: GuestbookState) -> usize {
        let mut seen = self.ids();
        let mut added = 0;
        for message in other.messages {
            if seen.insert(message.id.clone()) {
                self.messages.push(message);
                added += 1;
            }
        }
        added
    }

    /// Ids are unique and every body is acceptable.
    pub fn validate(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.messages
            .iter()
            .all(|m| m.has_valid_text() && seen.insert(&m.id))
    }

    pub fn ids(&self) -> BTreeSet<MessageId> {
        self.messages.iter().map(|m| m.id.clone()).collect()
    }
}

/// Summary of guestbook state: the set of recorded message ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuestbookSummary {
    pub ids: BTreeSet<MessageId>,
}

impl GuestbookState {
    pub fn summarize(&self) -> GuestbookSummary {
        GuestbookSummary { ids: self.ids() }
    }

    /// Compute a delta: messages in self that the summary does not know about.
    pub fn delta(&self, summary: &GuestbookSummary) -> GuestbookState {
        let messages = self
            .messages
            .iter()
            .filter(|m| !summary.ids.contains(&m.id))
            .cloned()
            .collect();
        GuestbookState { messages }
    }
}
