//! Reusable test utilities for driving bridge sessions without a real socket.
//!
//! [`MockTransport::channel_pair`] returns the transport plus a [`MockServer`] handle. Every
//! accepted connect yields a [`MockConnection`] that tests use to push inbound frames,
//! inject read errors, observe outbound frames or drop the socket.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Sink;
use tokio::sync::mpsc;

use crate::core::{BridgeError, BridgeResult, WebSocketBufferConfig, WsFrame};
use crate::transport::{BridgeConnectFuture, BridgeTransport};

/// Scripted outcome for one `connect` call. Unscripted calls are accepted.
#[derive(Debug, Clone)]
pub enum MockConnect {
    Accept,
    Fail(String),
    /// Never resolve, as a handshake stuck on an unresponsive host would.
    Hang,
}

struct MockShared {
    connects: AtomicUsize,
    plan: Mutex<VecDeque<MockConnect>>,
    urls: Mutex<Vec<String>>,
    connections_tx: mpsc::UnboundedSender<MockConnection>,
}

/// A transport that uses in-memory channels so tests can emulate the bridge endpoint.
#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<MockShared>,
}

impl MockTransport {
    /// Build a transport + server control pair.
    pub fn channel_pair() -> (Self, MockServer) {
        let (connections_tx, connections_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(MockShared {
            connects: AtomicUsize::new(0),
            plan: Mutex::new(VecDeque::new()),
            urls: Mutex::new(Vec::new()),
            connections_tx,
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MockServer {
                connections_rx,
                shared,
            },
        )
    }
}

impl BridgeTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(
        &self,
        url: String,
        _buffers: WebSocketBufferConfig,
    ) -> BridgeConnectFuture<Self::Reader, Self::Writer> {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            shared.connects.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut urls) = shared.urls.lock() {
                urls.push(url.clone());
            }
            let outcome = shared
                .plan
                .lock()
                .ok()
                .and_then(|mut plan| plan.pop_front())
                .unwrap_or(MockConnect::Accept);

            match outcome {
                MockConnect::Accept => {}
                MockConnect::Fail(error) => return Err(BridgeError::ConnectionFailed(error)),
                MockConnect::Hang => futures_util::future::pending::<()>().await,
            }

            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let (sent_tx, sent_rx) = mpsc::unbounded_channel();
            let connection = MockConnection {
                url,
                inbound_tx: Some(inbound_tx),
                outbound_rx: sent_rx,
            };
            shared.connections_tx.send(connection).map_err(|_| {
                BridgeError::InvalidState("mock server handle dropped".to_string())
            })?;
            Ok((
                MockReader { rx: inbound_rx },
                MockWriter {
                    sent_tx,
                    close_sent: false,
                },
            ))
        })
    }
}

/// Error surface for operations on [`MockConnection`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockServerError {
    /// The inbound socket side was intentionally dropped.
    SocketDropped,
    /// The session side is no longer reading.
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::SocketDropped => f.write_str("mock socket already dropped"),
            MockServerError::ChannelClosed => f.write_str("mock session channel is closed"),
        }
    }
}

impl std::error::Error for MockServerError {}

/// Server-side test handle paired with [`MockTransport`].
pub struct MockServer {
    connections_rx: mpsc::UnboundedReceiver<MockConnection>,
    shared: Arc<MockShared>,
}

impl MockServer {
    /// Queue the outcome of a future `connect` call.
    pub fn plan(&self, outcome: MockConnect) {
        if let Ok(mut plan) = self.shared.plan.lock() {
            plan.push_back(outcome);
        }
    }

    /// Number of `connect` calls observed so far (including failed and hung ones).
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Every URL passed to `connect`, in call order.
    pub fn urls(&self) -> Vec<String> {
        self.shared
            .urls
            .lock()
            .map(|urls| urls.clone())
            .unwrap_or_default()
    }

    /// Wait for the next accepted connection.
    pub async fn next_connection(&mut self, timeout: Duration) -> Option<MockConnection> {
        tokio::time::timeout(timeout, self.connections_rx.recv())
            .await
            .unwrap_or_default()
    }
}

/// One accepted mock connection.
pub struct MockConnection {
    pub url: String,
    inbound_tx: Option<mpsc::UnboundedSender<BridgeResult<WsFrame>>>,
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl MockConnection {
    /// Push an inbound frame to the session.
    pub fn send_frame(&self, frame: WsFrame) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(Ok(frame)).map_err(|_| MockServerError::ChannelClosed)
    }

    /// Push a UTF-8 payload as websocket text.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), MockServerError> {
        self.send_frame(WsFrame::text(text))
    }

    /// Surface a read error on the session side.
    pub fn fail(&self, error: impl Into<String>) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(Err(BridgeError::TransportError {
            context: "mock_read",
            error: error.into(),
        }))
        .map_err(|_| MockServerError::ChannelClosed)
    }

    /// Simulate a server-side socket drop (the reader sees end of stream).
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }

    /// Receive a frame written by the session, with a timeout.
    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }
}

/// Reader side for [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<BridgeResult<WsFrame>>,
}

impl futures_util::Stream for MockReader {
    type Item = BridgeResult<WsFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_recv(cx)
    }
}

/// Writer side for [`MockTransport`]. Closing it emits a close frame once.
pub struct MockWriter {
    sent_tx: mpsc::UnboundedSender<WsFrame>,
    close_sent: bool,
}

impl Sink<WsFrame> for MockWriter {
    type Error = BridgeError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .sent_tx
            .send(item)
            .map_err(|_| BridgeError::TransportError {
                context: "mock_write",
                error: "mock outbound channel closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        if !this.close_sent {
            this.close_sent = true;
            let _ = this.sent_tx.send(WsFrame::Close(None));
        }
        Poll::Ready(Ok(()))
    }
}
