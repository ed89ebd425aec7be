//! Mailbox actors plus a self-healing websocket bridge client, built on kameo.

pub mod client;
pub mod core;
pub mod mailbox;
pub mod server;
pub mod testing;
pub mod transport;
pub mod ws;

pub use client::{BridgeClient, SubscriptionHandle, build_target};
pub use core::{
    BackoffConfig, BridgeClientConfig, BridgeError, BridgeResult, Envelope, MailboxMessage,
    SessionSnapshot, SessionState, WireMessage,
};
pub use mailbox::{Mailbox, MailboxError, MailboxResult, RemoteMailbox, Stage};
pub use server::BridgeServer;
