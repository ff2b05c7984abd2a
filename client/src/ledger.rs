use guestbook_common::message::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gas attached to every write unless configured otherwise (10^16).
pub const DEFAULT_GAS_BUDGET: u64 = 10_000_000_000_000_000;

/// Extra arguments carried by a ledger write alongside the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteArgs {
    pub gas_budget: u64,
    /// Amount attached to the call. Opaque here; passed through unchanged.
    pub attached_amount: u64,
}

impl WriteArgs {
    /// Arguments for writing `message`: its donation rides along as the attached amount.
    pub fn for_message(message: &Message, gas_budget: u64) -> Self {
        Self {
            gas_budget,
            attached_amount: message.donation,
        }
    }
}

/// Errors from ledger calls.
///
/// The display text of a failed write is what the user sees next to the
/// message, so `Rejected` shows the ledger's reason verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("{0}")]
    Rejected(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("timed out waiting for the ledger")]
    Timeout,

    #[error("malformed ledger state: {0}")]
    Malformed(String),
}

/// The append-only ledger the guestbook writes to and reads from.
///
/// Writes must be safe to repeat with the same message id; duplicate
/// detection is the ledger's job. Reads return every confirmed message in
/// ledger order.
#[allow(async_fn_in_trait)]
pub trait Ledger {
    /// Record a message.
    async fn add_message(&self, message: &Message, args: &WriteArgs) -> Result<(), LedgerError>;

    /// Every confirmed message, in ledger order.
    async fn get_messages(&self) -> Result<Vec<Message>, LedgerError>;

    /// Human-readable backend name (e.g. "memory", "freenet").
    fn backend_name(&self) -> &str;
}
