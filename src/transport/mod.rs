use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{BridgeError, BridgeResult, WebSocketBufferConfig, WsFrame};

pub mod tungstenite;

/// Boxed future returned by [`BridgeTransport::connect`].
pub type BridgeConnectFuture<R, W> = Pin<Box<dyn Future<Output = BridgeResult<(R, W)>> + Send>>;

/// Transport boundary for websocket IO.
///
/// The session actor owns state and policies; the transport only dials and hands back a
/// reader/writer pair. Tests swap in [`crate::testing::MockTransport`].
pub trait BridgeTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = BridgeResult<WsFrame>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = BridgeError> + Send + Sync + Unpin + 'static;

    fn connect(
        &self,
        url: String,
        buffers: WebSocketBufferConfig,
    ) -> BridgeConnectFuture<Self::Reader, Self::Writer>;
}
