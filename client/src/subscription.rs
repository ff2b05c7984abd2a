//! Periodically refreshed view of ledger-confirmed messages.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::StreamExt;
use guestbook_common::message::Message;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::ledger::Ledger;

/// Every confirmed message, in ledger order, as of one read.
pub type ConfirmedSet = Vec<Message>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionConfig {
    pub poll_interval: Duration,
}

/// State shared between the handle and its refresh task.
#[derive(Default)]
struct Shared {
    confirmed: RefCell<ConfirmedSet>,
    stopped: Cell<bool>,
    refreshes: Cell<u64>,
}

/// Handle to a running confirmed-state subscription.
///
/// The refresh task runs on the current [`tokio::task::LocalSet`]; `start`
/// must be called from inside one. Dropping the handle stops the subscription.
pub struct ConfirmedStateSubscription {
    shared: Rc<Shared>,
    task: JoinHandle<()>,
}

impl ConfirmedStateSubscription {
    /// Read the ledger now and then every `poll_interval`, plus whenever
    /// `push` fires. Each successful read replaces the confirmed set and is
    /// handed to `on_update` in full.
    ///
    /// Fails if `poll_interval` is zero.
    pub fn start<L, F>(
        ledger: L,
        config: SubscriptionConfig,
        push: Option<mpsc::UnboundedReceiver<()>>,
        on_update: F,
    ) -> Result<Self, ClientError>
    where
        L: Ledger + 'static,
        F: FnMut(&[Message]) + 'static,
    {
        if config.poll_interval.is_zero() {
            return Err(ClientError::Config("poll interval must be non-zero".into()));
        }
        info!(
            backend = ledger.backend_name(),
            poll_ms = config.poll_interval.as_millis() as u64,
            push = push.is_some(),
            "starting confirmed-state subscription"
        );
        let shared = Rc::new(Shared::default());
        let task = tokio::task::spawn_local(refresh_loop(
            ledger,
            config,
            push,
            Rc::clone(&shared),
            on_update,
        ));
        Ok(Self { shared, task })
    }

    /// Stop refreshing. Once this returns, `on_update` is never called again
    /// and the confirmed set no longer changes, even if a read was in flight.
    pub fn stop(&self) {
        if self.shared.stopped.replace(true) {
            return;
        }
        self.task.abort();
        info!("confirmed-state subscription stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.get()
    }

    /// Snapshot of the last confirmed set read.
    pub fn confirmed(&self) -> ConfirmedSet {
        self.shared.confirmed.borrow().clone()
    }

    /// Successful refreshes so far.
    pub fn refreshes(&self) -> u64 {
        self.shared.refreshes.get()
    }
}

impl Drop for ConfirmedStateSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn refresh_loop<L, F>(
    ledger: L,
    config: SubscriptionConfig,
    mut push: Option<mpsc::UnboundedReceiver<()>>,
    shared: Rc<Shared>,
    mut on_update: F,
) where
    L: Ledger,
    F: FnMut(&[Message]),
{
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // First tick completes immediately, giving the initial read.
        let push_closed = match push.as_mut() {
            Some(rx) => tokio::select! {
                _ = ticker.tick() => false,
                signal = rx.next() => signal.is_none(),
            },
            None => {
                ticker.tick().await;
                false
            }
        };
        if push_closed {
            debug!("push source closed; polling only");
            push = None;
            continue;
        }
        if shared.stopped.get() {
            break;
        }

        let read = ledger.get_messages().await;
        if shared.stopped.get() {
            debug!("discarding read that completed after stop");
            break;
        }

        match read {
            Ok(messages) => {
                debug!(count = messages.len(), "confirmed set refreshed");
                *shared.confirmed.borrow_mut() = messages;
                shared.refreshes.set(shared.refreshes.get() + 1);
                let snapshot = shared.confirmed.borrow().clone();
                on_update(&snapshot);
            }
            // Transient; the next tick tries again.
            Err(e) => warn!("confirmed-state read failed: {e}"),
        }
    }
}
