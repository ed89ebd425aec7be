pub mod circular_buffer;
pub mod envelope;
pub mod frame;
pub mod health;
pub mod reconnect;
pub mod types;

pub use circular_buffer::*;
pub use envelope::{Envelope, EnvelopeError, MailboxMessage, WireMessage};
pub use frame::*;
pub use health::*;
pub use reconnect::*;
pub use types::*;
