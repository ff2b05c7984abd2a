use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Donations at or above this amount mark a message as premium.
pub const PREMIUM_DONATION: u64 = 1;

/// Longest message body the ledger accepts, in characters.
pub const MAX_MESSAGE_LEN: usize = 280;

/// Client-assigned identifier for a guestbook message.
///
/// Generated once at submission time and reused for every write attempt, so it
/// is the join key between the pending and confirmed views of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Fresh random (v4 UUID) identifier.
    #[cfg(feature = "std")]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A signed guestbook entry.
///
/// Everything except the id is authored by the submitter and never changes
/// after submission. The donation is an opaque amount carried through to the
/// ledger as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub sender: String,
    pub donation: u64,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a new message with a freshly generated id, stamped now.
    #[cfg(feature = "std")]
    pub fn new(text: impl Into<String>, sender: impl Into<String>, donation: u64) -> Self {
        Self::with_id(MessageId::generate(), text, sender, donation)
    }

    /// Build a message with a caller-chosen id, stamped now.
    #[cfg(feature = "std")]
    pub fn with_id(
        id: impl Into<MessageId>,
        text: impl Into<String>,
        sender: impl Into<String>,
        donation: u64,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            sender: sender.into(),
            donation,
            created_at: Utc::now(),
        }
    }

    pub fn is_premium(&self) -> bool {
        self.donation >= PREMIUM_DONATION
    }

    /// Whether the body is something the ledger will accept.
    pub fn has_valid_text(&self) -> bool {
        !self.text.trim().is_empty() && self.text.chars().count() <= MAX_MESSAGE_LEN
    }
}
