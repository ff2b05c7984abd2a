use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use futures::channel::mpsc;
use guestbook_common::guestbook::GuestbookState;
use guestbook_common::message::Message;

use crate::ledger::{Ledger, LedgerError, WriteArgs};

/// In-process ledger for offline use and tests.
///
/// Cheap to clone; clones share the same state. Failures can be scripted per
/// call, and both calls can be given a latency so that completions interleave
/// with other work the way a real node's would.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    inner: Rc<RefCell<Inner>>,
}

#[derive(Default)]
struct Inner {
    state: GuestbookState,
    write_failures: VecDeque<String>,
    read_failures: VecDeque<String>,
    write_latency: Duration,
    read_latency: Duration,
    min_gas_budget: u64,
    writes: u64,
    reads: u64,
    watchers: Vec<mpsc::UnboundedSender<()>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes whose gas budget is below `min` with "insufficient gas".
    pub fn with_min_gas_budget(self, min: u64) -> Self {
        self.inner.borrow_mut().min_gas_budget = min;
        self
    }

    pub fn set_write_latency(&self, latency: Duration) {
        self.inner.borrow_mut().write_latency = latency;
    }

    pub fn set_read_latency(&self, latency: Duration) {
        self.inner.borrow_mut().read_latency = latency;
    }

    /// The next write to complete fails with `reason`.
    pub fn fail_next_write(&self, reason: impl Into<String>) {
        self.inner.borrow_mut().write_failures.push_back(reason.into());
    }

    /// The next read to complete fails with `reason`.
    pub fn fail_next_read(&self, reason: impl Into<String>) {
        self.inner.borrow_mut().read_failures.push_back(reason.into());
    }

    /// Record a message directly, as if another client had written it.
    pub fn insert(&self, message: Message) -> bool {
        let added = self.inner.borrow_mut().state.append(message);
        if added {
            self.notify();
        }
        added
    }

    /// Snapshot of the confirmed messages.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.borrow().state.messages.clone()
    }

    /// Number of write calls started so far.
    pub fn write_count(&self) -> u64 {
        self.inner.borrow().writes
    }

    /// Number of read calls started so far.
    pub fn read_count(&self) -> u64 {
        self.inner.borrow().reads
    }

    /// A signal that fires every time a new message is recorded.
    pub fn watch(&self) -> mpsc::UnboundedReceiver<()> {
        let (tx, rx) = mpsc::unbounded();
        self.inner.borrow_mut().watchers.push(tx);
        rx
    }

    fn notify(&self) {
        self.inner
            .borrow_mut()
            .watchers
            .retain(|tx| tx.unbounded_send(()).is_ok());
    }
}

impl Ledger for MemoryLedger {
    async fn add_message(&self, message: &Message, args: &WriteArgs) -> Result<(), LedgerError> {
        let latency = {
            let mut inner = self.inner.borrow_mut();
            inner.writes += 1;
            inner.write_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let added = {
            let mut inner = self.inner.borrow_mut();
            if let Some(reason) = inner.write_failures.pop_front() {
                return Err(LedgerError::Rejected(reason));
            }
            if args.gas_budget < inner.min_gas_budget {
                return Err(LedgerError::Rejected("insufficient gas".into()));
            }
            inner.state.append(message.clone())
        };
        if added {
            tracing::debug!(id = %message.id, "memory ledger recorded message");
            self.notify();
        } else {
            tracing::debug!(id = %message.id, "memory ledger ignored duplicate write");
        }
        Ok(())
    }

    async fn get_messages(&self) -> Result<Vec<Message>, LedgerError> {
        let latency = {
            let mut inner = self.inner.borrow_mut();
            inner.reads += 1;
            inner.read_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.inner.borrow_mut();
        if let Some(reason) = inner.read_failures.pop_front() {
            return Err(LedgerError::Unavailable(reason));
        }
        Ok(inner.state.messages.clone())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
