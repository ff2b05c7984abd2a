use std::collections::HashSet;

use guestbook_common::message::{Message, MessageId};

use crate::pending::PendingMessage;

/// How an entry in the merged view should be shown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryStatus {
    /// Recorded on the ledger.
    Confirmed,
    /// Submitted; waiting for the ledger to show it.
    Syncing,
    /// Last write failed with this reason; can be retried.
    Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ViewEntry<'a> {
    pub message: &'a Message,
    pub status: EntryStatus,
}

/// Read-only snapshot handed to the UI: confirmed messages in ledger order,
/// then still-pending ones in submission order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GuestbookView {
    pub confirmed: Vec<Message>,
    pub pending: Vec<PendingMessage>,
}

impl GuestbookView {
    /// Combine the two sides. A pending message whose id already shows up as
    /// confirmed is left out, so nothing is ever listed twice.
    pub fn merge(confirmed: Vec<Message>, pending: Vec<PendingMessage>) -> Self {
        let confirmed_ids: HashSet<&MessageId> = confirmed.iter().map(|m| &m.id).collect();
        let pending = pending
            .into_iter()
            .filter(|p| !confirmed_ids.contains(&p.message.id))
            .collect();
        Self { confirmed, pending }
    }

    pub fn entries(&self) -> impl Iterator<Item = ViewEntry<'_>> {
        let confirmed = self.confirmed.iter().map(|message| ViewEntry {
            message,
            status: EntryStatus::Confirmed,
        });
        let pending = self.pending.iter().map(|p| ViewEntry {
            message: &p.message,
            status: match &p.error {
                Some(reason) => EntryStatus::Failed(reason.clone()),
                None => EntryStatus::Syncing,
            },
        });
        confirmed.chain(pending)
    }

    pub fn len(&self) -> usize {
        self.confirmed.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.pending.is_empty()
    }

    /// Pending entries whose last write failed.
    pub fn failed(&self) -> impl Iterator<Item = &PendingMessage> {
        self.pending.iter().filter(|p| p.error.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::WriteArgs;

    fn msg(id: &str) -> Message {
        Message::with_id(id, "hi", "alice", 0)
    }

    fn pending(id: &str, error: Option<&str>) -> PendingMessage {
        let message = msg(id);
        PendingMessage {
            args: WriteArgs::for_message(&message, 1),
            message,
            error: error.map(String::from),
            attempt: 1,
        }
    }

    #[test]
    fn confirmed_first_then_pending() {
        let view = GuestbookView::merge(
            vec![msg("c1"), msg("c2")],
            vec![pending("p1", None), pending("p2", Some("boom"))],
        );
        let rows: Vec<_> = view
            .entries()
            .map(|e| (e.message.id.as_str().to_string(), e.status))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("c1".to_string(), EntryStatus::Confirmed),
                ("c2".to_string(), EntryStatus::Confirmed),
                ("p1".to_string(), EntryStatus::Syncing),
                ("p2".to_string(), EntryStatus::Failed("boom".into())),
            ]
        );
        assert_eq!(view.failed().count(), 1);
    }

    #[test]
    fn pending_already_confirmed_is_hidden() {
        let view = GuestbookView::merge(vec![msg("m1")], vec![pending("m1", None), pending("m2", None)]);
        assert_eq!(view.len(), 2);
        assert_eq!(view.pending[0].message.id.as_str(), "m2");
    }
}
