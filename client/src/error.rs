use guestbook_common::message::{MessageId, MAX_MESSAGE_LEN};
use thiserror::Error;

use crate::ledger::LedgerError;

/// Errors surfaced to the caller of the client API.
///
/// Write failures never show up here: they are recorded on the pending
/// message they belong to.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("message text must not be empty")]
    EmptyMessage,

    #[error("message text exceeds {} characters", MAX_MESSAGE_LEN)]
    MessageTooLong,

    #[error("message {0} is already pending")]
    DuplicateId(MessageId),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
