use std::time::Duration;

use thiserror::Error;

/// Convenience result alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Canonical error surface of the bridge client and its transports.
///
/// None of these ever reach a subscriber callback; the session logs them and decides
/// whether to retry.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Parse failed: {0}")]
    ParseFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Actor error: {0}")]
    ActorError(String),

    #[error("Timeout: {context}")]
    Timeout { context: String },
}

/// Transport-independent buffer sizing parameters used for websocket configuration.
#[derive(Clone, Copy, Debug)]
pub struct WebSocketBufferConfig {
    pub write_buffer_bytes: usize,
    pub max_write_buffer_bytes: usize,
    pub max_message_bytes: usize,
    pub max_frame_bytes: usize,
}

impl Default for WebSocketBufferConfig {
    fn default() -> Self {
        Self {
            // Bridge frames carry one actor message each; a few MiB is plenty.
            write_buffer_bytes: 64 << 10,
            max_write_buffer_bytes: 256 << 10,
            max_message_bytes: 4 * 1024 * 1024,
            max_frame_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Tuning knobs of the exponential reconnect policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Delay used for the first retry after a successful open.
    pub base: Duration,
    /// Ceiling for any computed delay.
    pub cap: Duration,
    /// Growth factor applied after every failure.
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            cap: Duration::from_secs(10 * 60),
            factor: 1.5,
        }
    }
}

/// Client-wide configuration shared by every subscription.
#[derive(Clone, Copy, Debug)]
pub struct BridgeClientConfig {
    pub backoff: BackoffConfig,
    /// Scale scheduled retry delays into `[0.5, 1.0] * delay`.
    pub jitter: bool,
    pub buffers: WebSocketBufferConfig,
    /// Upper bound for flushing the close frame on intentional teardown.
    pub close_timeout: Duration,
}

impl Default for BridgeClientConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            jitter: false,
            buffers: WebSocketBufferConfig::default(),
            close_timeout: Duration::from_secs(2),
        }
    }
}

/// Lifecycle phases of a connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    /// A retry timer is armed; the next `Connect` comes from the timer.
    RetryPending,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::RetryPending => "retry_pending",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }

    /// Whether a socket is being dialed or is live.
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Open)
    }
}

/// Why a connection epoch ended.
#[derive(Debug, Clone)]
pub enum DisconnectCause {
    HandshakeFailed { error: String },
    ReadFailure { error: String },
    RemoteClosed { code: Option<u16>, reason: String },
    StreamEnded,
}

/// Connection statistics snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub connects: u64,
    pub opens: u64,
    pub frames: u64,
    pub values: u64,
    pub decode_failures: u64,
    pub transport_errors: u64,
    pub unexpected_closes: u64,
    pub retries_scheduled: u64,
    pub retries_suppressed: u64,
    pub recent_errors: usize,
    pub uptime: Option<Duration>,
}

/// Point-in-time view of a session, returned by `GetSessionStatus`.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub target: String,
    pub state: SessionState,
    pub epoch: u64,
    /// Failures since the last successful open.
    pub attempt: u64,
    pub retry_pending: bool,
    pub intentional: bool,
    /// Latest recorded failure as `context: message`.
    pub last_error: Option<String>,
    pub stats: SessionStats,
}
