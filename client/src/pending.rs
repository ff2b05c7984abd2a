//! Optimistic cache of messages written but not yet seen on the ledger.
//!
//! Messages enter on `submit`, carry a per-item error while their last write
//! failed, and leave only through `reconcile`, once a confirmed read shows
//! their id. A successful write does not remove anything by itself.

use std::collections::{HashMap, HashSet};
use std::future;

use futures::channel::mpsc;
use futures::StreamExt;
use guestbook_common::message::{Message, MessageId};
use tracing::{debug, error, warn};

use crate::ledger::{Ledger, LedgerError, WriteArgs};

/// A submitted message as the cache currently sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingMessage {
    pub message: Message,
    /// Reason the last write attempt failed; `None` while a write is in flight.
    pub error: Option<String>,
    /// Write attempts dispatched so far, starting at 1.
    pub attempt: u32,
    pub args: WriteArgs,
}

/// Completion of one write attempt, posted back to the cache owner.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteOutcome {
    pub id: MessageId,
    pub attempt: u32,
    pub result: Result<(), LedgerError>,
}

/// What applying a [`WriteOutcome`] did to the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The write went through; the entry waits for reconciliation.
    Succeeded,
    /// The entry now carries this error.
    Failed(String),
    /// The entry was reconciled away or has moved on to a newer attempt.
    Stale,
}

/// Owns the pending set and dispatches its writes.
///
/// Each write runs as its own task on the current [`tokio::task::LocalSet`]
/// and keeps running even if the cache is dropped. Completions are posted back
/// over a channel; the owner receives them with
/// [`next_outcome`](Self::next_outcome) and applies them with
/// [`apply`](Self::apply), so no completion ever mutates the set on its own.
pub struct PendingWriteCache<L> {
    ledger: L,
    entries: HashMap<MessageId, PendingMessage>,
    order: Vec<MessageId>,
    outcome_tx: mpsc::UnboundedSender<WriteOutcome>,
    outcomes: mpsc::UnboundedReceiver<WriteOutcome>,
    in_flight: usize,
}

impl<L> PendingWriteCache<L>
where
    L: Ledger + Clone + 'static,
{
    pub fn new(ledger: L) -> Self {
        let (outcome_tx, outcomes) = mpsc::unbounded();
        Self {
            ledger,
            entries: HashMap::new(),
            order: Vec::new(),
            outcome_tx,
            outcomes,
            in_flight: 0,
        }
    }

    /// Add `message` to the pending set and dispatch its first write.
    ///
    /// The message is visible in [`snapshot`](Self::snapshot) as soon as this
    /// returns. An id that is already pending means the id generator is broken:
    /// the submission is dropped and `false` is returned.
    pub fn submit(&mut self, message: Message, args: WriteArgs) -> bool {
        if self.entries.contains_key(&message.id) {
            error!(id = %message.id, "duplicate message id submitted; ignoring");
            return false;
        }

        let id = message.id.clone();
        debug!(%id, "submitting message");
        self.dispatch(message.clone(), args, 1);
        self.order.push(id.clone());
        self.entries.insert(
            id,
            PendingMessage {
                message,
                error: None,
                attempt: 1,
                args,
            },
        );
        true
    }

    /// Clear the error on a failed entry and write it again under the same id.
    ///
    /// No-op (returns `false`) if the id is not pending or its last write has
    /// not failed, so repeated retries never stack up writes.
    pub fn retry(&mut self, id: &MessageId) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            debug!(%id, "retry for unknown message ignored");
            return false;
        };
        if entry.error.take().is_none() {
            debug!(%id, "retry while write in flight ignored");
            return false;
        }
        entry.attempt = entry.attempt.wrapping_add(1);
        let (message, args, attempt) = (entry.message.clone(), entry.args, entry.attempt);
        debug!(%id, attempt, "retrying message");
        self.dispatch(message, args, attempt);
        true
    }

    /// Drop every entry whose id the ledger has confirmed.
    ///
    /// Remaining entries keep their order. Returns how many were removed.
    pub fn reconcile(&mut self, confirmed: &HashSet<MessageId>) -> usize {
        let before = self.order.len();
        self.order.retain(|id| !confirmed.contains(id));
        self.entries.retain(|id, _| !confirmed.contains(id));
        let removed = before - self.order.len();
        if removed > 0 {
            debug!(removed, remaining = self.order.len(), "reconciled pending messages");
        }
        removed
    }

    /// Wait for the next write to complete.
    ///
    /// Never resolves while nothing is in flight, so it can sit in a
    /// `select!` next to other event sources.
    pub async fn next_outcome(&mut self) -> WriteOutcome {
        match self.outcomes.next().await {
            Some(outcome) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                outcome
            }
            // Unreachable while `outcome_tx` lives in self.
            None => future::pending().await,
        }
    }

    /// Record the result of a write against the current pending set.
    pub fn apply(&mut self, outcome: WriteOutcome) -> Applied {
        let Some(entry) = self.entries.get_mut(&outcome.id) else {
            debug!(id = %outcome.id, "write completed for reconciled message");
            return Applied::Stale;
        };
        if entry.attempt != outcome.attempt {
            debug!(
                id = %outcome.id,
                attempt = outcome.attempt,
                current = entry.attempt,
                "superseded write completed"
            );
            return Applied::Stale;
        }
        match outcome.result {
            Ok(()) => {
                debug!(id = %outcome.id, "write accepted; awaiting confirmation");
                Applied::Succeeded
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(id = %outcome.id, attempt = outcome.attempt, "write failed: {reason}");
                entry.error = Some(reason.clone());
                Applied::Failed(reason)
            }
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<&PendingMessage> {
        self.entries.get(id)
    }

    /// Pending entries in submission order.
    pub fn snapshot(&self) -> Vec<PendingMessage> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Writes dispatched whose outcome has not been received yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Start the write now. It is not cancellable from here on.
    fn dispatch(&mut self, message: Message, args: WriteArgs, attempt: u32) {
        let ledger = self.ledger.clone();
        let outcomes = self.outcome_tx.clone();
        self.in_flight += 1;
        tokio::task::spawn_local(async move {
            let result = ledger.add_message(&message, &args).await;
            // The cache may already be gone; the write itself has still happened.
            let _ = outcomes.unbounded_send(WriteOutcome {
                id: message.id,
                attempt,
                result,
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::time::Duration;

    use tokio::task::LocalSet;

    use super::*;
    use crate::memory::MemoryLedger;

    async fn local<F: Future<Output = ()>>(f: F) {
        LocalSet::new().run_until(f).await;
    }

    fn msg(id: &str) -> Message {
        Message::with_id(id, format!("text {id}"), "alice", 0)
    }

    fn args(message: &Message) -> WriteArgs {
        WriteArgs::for_message(message, 100)
    }

    fn submit(cache: &mut PendingWriteCache<MemoryLedger>, id: &str) {
        let m = msg(id);
        let a = args(&m);
        assert!(cache.submit(m, a));
    }

    fn ids(cache: &PendingWriteCache<MemoryLedger>) -> Vec<String> {
        cache
            .snapshot()
            .into_iter()
            .map(|p| p.message.id.0)
            .collect()
    }

    fn confirmed(ids: &[&str]) -> HashSet<MessageId> {
        ids.iter().map(|id| MessageId::from(*id)).collect()
    }

    async fn settle(cache: &mut PendingWriteCache<MemoryLedger>) {
        while cache.in_flight() > 0 {
            let outcome = cache.next_outcome().await;
            cache.apply(outcome);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn submit_is_visible_before_write_completes() {
        local(async {
            let ledger = MemoryLedger::new();
            ledger.set_write_latency(Duration::from_secs(60));
            let mut cache = PendingWriteCache::new(ledger.clone());

            submit(&mut cache, "m1");

            assert_eq!(ids(&cache), vec!["m1"]);
            assert_eq!(cache.get(&"m1".into()).unwrap().error, None);
            assert_eq!(cache.in_flight(), 1);
            assert!(ledger.messages().is_empty());
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn write_goes_out_without_waiting_on_outcomes() {
        local(async {
            let ledger = MemoryLedger::new();
            ledger.set_write_latency(Duration::from_millis(10));
            let mut cache = PendingWriteCache::new(ledger.clone());
            submit(&mut cache, "m1");

            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(ledger.write_count(), 1);
            assert_eq!(ledger.messages().len(), 1);
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_cache_does_not_cancel_dispatched_writes() {
        local(async {
            let ledger = MemoryLedger::new();
            ledger.set_write_latency(Duration::from_millis(10));
            let mut cache = PendingWriteCache::new(ledger.clone());
            submit(&mut cache, "m1");
            drop(cache);

            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(ledger.write_count(), 1);
            assert_eq!(ledger.messages()[0].id.as_str(), "m1");
        })
        .await;
    }

    #[tokio::test]
    async fn successful_write_keeps_entry_until_reconciled() {
        local(async {
            let ledger = MemoryLedger::new();
            let mut cache = PendingWriteCache::new(ledger.clone());
            submit(&mut cache, "m1");

            let outcome = cache.next_outcome().await;
            assert_eq!(cache.apply(outcome), Applied::Succeeded);
            assert_eq!(ids(&cache), vec!["m1"]);
            assert_eq!(ledger.messages().len(), 1);

            assert_eq!(cache.reconcile(&confirmed(&["m1"])), 1);
            assert!(cache.is_empty());
        })
        .await;
    }

    #[tokio::test]
    async fn failed_write_sets_error_on_that_entry_only() {
        local(async {
            let ledger = MemoryLedger::new();
            let mut cache = PendingWriteCache::new(ledger.clone());
            ledger.fail_next_write("insufficient gas");
            submit(&mut cache, "m1");
            settle(&mut cache).await;
            submit(&mut cache, "m2");
            settle(&mut cache).await;

            assert_eq!(
                cache.get(&"m1".into()).unwrap().error.as_deref(),
                Some("insufficient gas")
            );
            assert_eq!(cache.get(&"m2".into()).unwrap().error, None);
            assert_eq!(ids(&cache), vec!["m1", "m2"]);
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_submit_is_rejected() {
        local(async {
            let ledger = MemoryLedger::new();
            ledger.set_write_latency(Duration::from_secs(60));
            let mut cache = PendingWriteCache::new(ledger.clone());
            submit(&mut cache, "m1");
            let again = msg("m1");
            let a = args(&again);

            assert!(!cache.submit(again, a));
            assert_eq!(cache.len(), 1);
            assert_eq!(cache.in_flight(), 1);
        })
        .await;
    }

    #[tokio::test]
    async fn retry_clears_error_and_reuses_id() {
        local(async {
            let ledger = MemoryLedger::new();
            let mut cache = PendingWriteCache::new(ledger.clone());
            ledger.fail_next_write("transient node failure");
            submit(&mut cache, "m1");
            settle(&mut cache).await;

            assert!(cache.retry(&"m1".into()));
            let entry = cache.get(&"m1".into()).unwrap();
            assert_eq!(entry.error, None);
            assert_eq!(entry.attempt, 2);
            assert_eq!(cache.len(), 1);

            settle(&mut cache).await;
            assert_eq!(ledger.write_count(), 2);
            assert_eq!(ledger.messages()[0].id, MessageId::from("m1"));
            assert_eq!(cache.get(&"m1".into()).unwrap().error, None);
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn double_retry_dispatches_one_write() {
        local(async {
            let ledger = MemoryLedger::new();
            let mut cache = PendingWriteCache::new(ledger.clone());
            ledger.fail_next_write("boom");
            submit(&mut cache, "m1");
            settle(&mut cache).await;

            assert!(cache.retry(&"m1".into()));
            assert!(!cache.retry(&"m1".into()));
            assert_eq!(cache.len(), 1);
            assert_eq!(cache.in_flight(), 1);

            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(ledger.write_count(), 2);
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn retry_of_unknown_or_healthy_entry_is_noop() {
        local(async {
            let ledger = MemoryLedger::new();
            ledger.set_write_latency(Duration::from_secs(60));
            let mut cache = PendingWriteCache::new(ledger);
            submit(&mut cache, "m1");

            assert!(!cache.retry(&"nope".into()));
            assert!(!cache.retry(&"m1".into()));
            assert_eq!(cache.in_flight(), 1);
        })
        .await;
    }

    #[tokio::test]
    async fn attempt_counter_wraps_instead_of_overflowing() {
        local(async {
            let ledger = MemoryLedger::new();
            let mut cache = PendingWriteCache::new(ledger.clone());
            ledger.fail_next_write("boom");
            submit(&mut cache, "m1");
            settle(&mut cache).await;
            cache.entries.get_mut(&MessageId::from("m1")).unwrap().attempt = u32::MAX;

            assert!(cache.retry(&"m1".into()));
            assert_eq!(cache.get(&"m1".into()).unwrap().attempt, 0);

            let outcome = cache.next_outcome().await;
            assert_eq!(outcome.attempt, 0);
            assert_eq!(cache.apply(outcome), Applied::Succeeded);
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_removes_exactly_confirmed_ids_in_order() {
        local(async {
            let ledger = MemoryLedger::new();
            ledger.set_write_latency(Duration::from_secs(60));
            let mut cache = PendingWriteCache::new(ledger);
            for id in ["a", "b", "c", "d", "e"] {
                submit(&mut cache, id);
            }

            assert_eq!(cache.reconcile(&confirmed(&["b", "d", "zz"])), 2);
            assert_eq!(ids(&cache), vec!["a", "c", "e"]);

            assert_eq!(cache.reconcile(&confirmed(&[])), 0);
            assert_eq!(ids(&cache), vec!["a", "c", "e"]);
        })
        .await;
    }

    #[tokio::test]
    async fn late_failure_does_not_resurrect_reconciled_entry() {
        local(async {
            let ledger = MemoryLedger::new();
            let mut cache = PendingWriteCache::new(ledger);
            submit(&mut cache, "m1");
            cache.reconcile(&confirmed(&["m1"]));

            let applied = cache.apply(WriteOutcome {
                id: "m1".into(),
                attempt: 1,
                result: Err(LedgerError::Timeout),
            });
            assert_eq!(applied, Applied::Stale);
            assert!(cache.is_empty());

            // The real completion is ignored too.
            let outcome = cache.next_outcome().await;
            assert_eq!(cache.apply(outcome), Applied::Stale);
            assert!(cache.get(&"m1".into()).is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn superseded_attempt_is_ignored() {
        local(async {
            let ledger = MemoryLedger::new();
            let mut cache = PendingWriteCache::new(ledger.clone());
            ledger.fail_next_write("boom");
            submit(&mut cache, "m1");
            settle(&mut cache).await;
            cache.retry(&"m1".into());

            let applied = cache.apply(WriteOutcome {
                id: "m1".into(),
                attempt: 1,
                result: Err(LedgerError::Rejected("old news".into())),
            });
            assert_eq!(applied, Applied::Stale);
            assert_eq!(cache.get(&"m1".into()).unwrap().error, None);
        })
        .await;
    }

    #[tokio::test]
    async fn failure_marking_preserves_order() {
        local(async {
            let ledger = MemoryLedger::new();
            let mut cache = PendingWriteCache::new(ledger.clone());
            submit(&mut cache, "a");
            settle(&mut cache).await;
            ledger.fail_next_write("boom");
            submit(&mut cache, "b");
            submit(&mut cache, "c");
            settle(&mut cache).await;

            assert_eq!(ids(&cache), vec!["a", "b", "c"]);
            let failed: Vec<_> = cache
                .snapshot()
                .into_iter()
                .filter(|p| p.error.is_some())
                .collect();
            assert_eq!(failed.len(), 1);
        })
        .await;
    }
}
