//! Mailbox actors: addressed fire-and-forget send, blocking receive.
//!
//! [`Stage`] hosts in-process actors, each with its own bounded [`Inbox`]. An actor only
//! sees the [`Mailbox`] trait, so the same behaviour runs against a stage-local mailbox or a
//! [`RemoteMailbox`] connected to a bridge endpoint.

use std::time::Duration;

use thiserror::Error;

use crate::core::{BridgeError, EnvelopeError};

pub mod actor;
pub mod inbox;
pub mod remote;
pub mod stage;

pub use actor::{ActorContext, Mailbox, ProbeConfig, echo_actor, probe_actor};
pub use inbox::{DEFAULT_INBOX_CAPACITY, Inbox};
pub use remote::RemoteMailbox;
pub use stage::{ActorHandle, Stage};

/// Sends addressed here are dropped without error.
pub const DISCARD: &str = "discard";

pub type MailboxResult<T> = Result<T, MailboxError>;

#[derive(Debug, Clone, Error)]
pub enum MailboxError {
    #[error("inbox closed")]
    InboxClosed,

    #[error("inbox not found: {0}")]
    InboxNotFound(String),

    #[error("address already in use: {0}")]
    AddressInUse(String),

    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("mailbox disconnected")]
    Disconnected,

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl From<EnvelopeError> for MailboxError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::Parse(msg) => MailboxError::Decode(msg),
            EnvelopeError::Encode(msg) => MailboxError::Encode(msg),
        }
    }
}
