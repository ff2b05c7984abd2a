//! Guestbook client: optimistic writes to an append-only ledger, reconciled
//! against periodic reads of what the ledger has confirmed.

pub mod config;
pub mod error;
pub mod guestbook;
pub mod ledger;
pub mod memory;
#[cfg(feature = "use-node")]
pub mod node;
pub mod pending;
pub mod subscription;
pub mod view;

pub use config::ClientConfig;
pub use error::ClientError;
pub use guestbook::{Guestbook, GuestbookAction, GuestbookEvent};
pub use ledger::{Ledger, LedgerError, WriteArgs};
pub use memory::MemoryLedger;
#[cfg(feature = "use-node")]
pub use node::NodeLedger;
pub use pending::{PendingMessage, PendingWriteCache, WriteOutcome};
pub use subscription::{ConfirmedSet, ConfirmedStateSubscription, SubscriptionConfig};
pub use view::{EntryStatus, GuestbookView};
