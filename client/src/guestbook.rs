//! The guestbook as the UI sees it: pending writes and the confirmed ledger
//! view wired together, with a merged snapshot published after every change.

use std::collections::HashSet;

use futures::channel::mpsc;
use futures::StreamExt;
use guestbook_common::message::{Message, MessageId, MAX_MESSAGE_LEN};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::ledger::{Ledger, WriteArgs};
use crate::pending::{Applied, PendingWriteCache, WriteOutcome};
use crate::subscription::{ConfirmedSet, ConfirmedStateSubscription, SubscriptionConfig};
use crate::view::GuestbookView;

/// Actions the UI can send to a running guestbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestbookAction {
    /// Sign the guestbook with a new message.
    Sign { text: String, donation: u64 },
    /// Re-send a message whose last write failed.
    Retry { id: MessageId },
}

/// What a single [`Guestbook::step`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestbookEvent {
    /// A confirmed read arrived and pending messages were reconciled against it.
    Refreshed { confirmed: usize, reconciled: usize },
    /// The ledger accepted a write; the message stays pending until a read shows it.
    WriteAccepted(MessageId),
    /// A write failed; the message now carries `reason`.
    WriteFailed { id: MessageId, reason: String },
    /// A write completed for a message that is no longer pending.
    WriteIgnored(MessageId),
}

/// Owned guestbook state for one signed-in user.
///
/// Create it inside a [`tokio::task::LocalSet`] when the UI mounts and stop it
/// (or drop it) when the UI unmounts.
pub struct Guestbook<L> {
    sender: String,
    gas_budget: u64,
    cache: PendingWriteCache<L>,
    subscription: ConfirmedStateSubscription,
    refreshes: mpsc::UnboundedReceiver<ConfirmedSet>,
    refreshes_closed: bool,
    /// Last confirmed set reconciled against the cache.
    confirmed: ConfirmedSet,
    view: watch::Sender<GuestbookView>,
}

impl<L> Guestbook<L>
where
    L: Ledger + Clone + 'static,
{
    /// Start reading the ledger and accept submissions from `sender`.
    pub fn start(
        ledger: L,
        config: &ClientConfig,
        sender: impl Into<String>,
        push: Option<mpsc::UnboundedReceiver<()>>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let sender = sender.into();
        info!(%sender, backend = ledger.backend_name(), "starting guestbook");

        let (refresh_tx, refreshes) = mpsc::unbounded();
        let subscription = ConfirmedStateSubscription::start(
            ledger.clone(),
            SubscriptionConfig {
                poll_interval: config.poll_interval,
            },
            push,
            move |set: &[Message]| {
                // Reconciled by the owner in `step`, never here.
                let _ = refresh_tx.unbounded_send(set.to_vec());
            },
        )?;
        let (view, _) = watch::channel(GuestbookView::default());

        Ok(Self {
            sender,
            gas_budget: config.gas_budget,
            cache: PendingWriteCache::new(ledger),
            subscription,
            refreshes,
            refreshes_closed: false,
            confirmed: Vec::new(),
            view,
        })
    }

    /// Receive a fresh [`GuestbookView`] every time something changes.
    pub fn subscribe(&self) -> watch::Receiver<GuestbookView> {
        self.view.subscribe()
    }

    /// The current merged view.
    pub fn view(&self) -> GuestbookView {
        self.view.borrow().clone()
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Sign the guestbook. The message shows up as pending straight away.
    pub fn sign(&mut self, text: &str, donation: u64) -> Result<MessageId, ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Err(ClientError::MessageTooLong);
        }
        self.submit(Message::new(text, self.sender.clone(), donation))
    }

    /// Submit a fully built message.
    pub fn submit(&mut self, message: Message) -> Result<MessageId, ClientError> {
        let id = message.id.clone();
        let args = WriteArgs::for_message(&message, self.gas_budget);
        if !self.cache.submit(message, args) {
            return Err(ClientError::DuplicateId(id));
        }
        self.publish();
        Ok(id)
    }

    /// Retry a failed message. Returns `false` if there was nothing to retry.
    pub fn retry(&mut self, id: &MessageId) -> bool {
        let retried = self.cache.retry(id);
        if retried {
            self.publish();
        }
        retried
    }

    /// Wait for and process the next refresh or write completion.
    ///
    /// Refreshes win ties. Once the subscription has stopped, only write
    /// completions are left; returns `None` when there are none outstanding.
    pub async fn step(&mut self) -> Option<GuestbookEvent> {
        loop {
            if self.refreshes_closed && self.cache.in_flight() == 0 {
                return None;
            }
            let event = tokio::select! {
                biased;
                set = self.refreshes.next(), if !self.refreshes_closed => match set {
                    Some(set) => Some(self.reconcile(set)),
                    None => {
                        self.refreshes_closed = true;
                        None
                    }
                },
                outcome = self.cache.next_outcome() => Some(self.apply(outcome)),
            };
            if let Some(event) = event {
                self.publish();
                return Some(event);
            }
        }
    }

    /// Apply the outcome of every write still in flight.
    pub async fn settle(&mut self) {
        while self.cache.in_flight() > 0 {
            let outcome = self.cache.next_outcome().await;
            self.apply(outcome);
            self.publish();
        }
    }

    /// Serve UI actions until the action channel closes, then stop reading
    /// the ledger and wait for outstanding writes to finish.
    pub async fn run(mut self, mut actions: mpsc::UnboundedReceiver<GuestbookAction>) {
        loop {
            tokio::select! {
                action = actions.next() => match action {
                    Some(action) => self.handle(action),
                    None => break,
                },
                event = self.step() => {
                    if event.is_none() {
                        break;
                    }
                }
            }
        }
        self.stop();
        self.settle().await;
    }

    /// Stop reading the ledger. Writes already dispatched still run to
    /// completion; [`step`](Self::step) or [`settle`](Self::settle) applies them.
    pub fn stop(&self) {
        self.subscription.stop();
    }

    fn handle(&mut self, action: GuestbookAction) {
        match action {
            GuestbookAction::Sign { text, donation } => {
                if let Err(e) = self.sign(&text, donation) {
                    warn!("sign rejected: {e}");
                }
            }
            GuestbookAction::Retry { id } => {
                self.retry(&id);
            }
        }
    }

    fn reconcile(&mut self, set: ConfirmedSet) -> GuestbookEvent {
        let ids: HashSet<MessageId> = set.iter().map(|m| m.id.clone()).collect();
        let reconciled = self.cache.reconcile(&ids);
        self.confirmed = set;
        GuestbookEvent::Refreshed {
            confirmed: self.confirmed.len(),
            reconciled,
        }
    }

    fn apply(&mut self, outcome: WriteOutcome) -> GuestbookEvent {
        let id = outcome.id.clone();
        match self.cache.apply(outcome) {
            Applied::Succeeded => GuestbookEvent::WriteAccepted(id),
            Applied::Failed(reason) => GuestbookEvent::WriteFailed { id, reason },
            Applied::Stale => GuestbookEvent::WriteIgnored(id),
        }
    }

    fn publish(&self) {
        self.view.send_replace(GuestbookView::merge(
            self.confirmed.clone(),
            self.cache.snapshot(),
        ));
    }
}
