use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{
    Sink, Stream, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config,
    tungstenite::{
        Message as TungsteniteMessage, Utf8Bytes,
        protocol::{CloseFrame as TungCloseFrame, WebSocketConfig},
    },
};

use crate::core::{BridgeError, WebSocketBufferConfig, WsCloseFrame, WsFrame};
use crate::transport::{BridgeConnectFuture, BridgeTransport};

/// Select ring as the process-wide rustls provider before the first `wss://` dial.
fn install_rustls_crypto_provider() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub(crate) fn map_ws_error(context: &'static str, err: impl ToString) -> BridgeError {
    BridgeError::TransportError {
        context,
        error: err.to_string(),
    }
}

fn close_to_core(frame: Option<TungCloseFrame>) -> Option<WsCloseFrame> {
    frame.map(|f| WsCloseFrame {
        code: u16::from(f.code),
        reason: Bytes::from(f.reason.as_str().to_owned()),
    })
}

fn core_to_close(frame: WsCloseFrame) -> TungCloseFrame {
    TungCloseFrame {
        code: frame.code.into(),
        reason: Utf8Bytes::try_from(frame.reason).unwrap_or_else(|_| Utf8Bytes::from_static("")),
    }
}

pub(crate) fn msg_to_frame(msg: TungsteniteMessage) -> WsFrame {
    match msg {
        TungsteniteMessage::Text(text) => WsFrame::Text(Bytes::from(text)),
        TungsteniteMessage::Binary(bytes) => WsFrame::Binary(bytes),
        TungsteniteMessage::Ping(bytes) => WsFrame::Ping(bytes),
        TungsteniteMessage::Pong(bytes) => WsFrame::Pong(bytes),
        TungsteniteMessage::Close(frame) => WsFrame::Close(close_to_core(frame)),
        TungsteniteMessage::Frame(_) => WsFrame::Binary(Bytes::new()),
    }
}

pub(crate) fn frame_to_msg(frame: WsFrame) -> TungsteniteMessage {
    match frame {
        // Not valid UTF-8: goes out as binary.
        WsFrame::Text(bytes) => match Utf8Bytes::try_from(bytes.clone()) {
            Ok(text) => TungsteniteMessage::Text(text),
            Err(_) => TungsteniteMessage::Binary(bytes),
        },
        WsFrame::Binary(bytes) => TungsteniteMessage::Binary(bytes),
        WsFrame::Ping(bytes) => TungsteniteMessage::Ping(bytes),
        WsFrame::Pong(bytes) => TungsteniteMessage::Pong(bytes),
        WsFrame::Close(frame) => TungsteniteMessage::Close(frame.map(core_to_close)),
    }
}

pub(crate) fn ws_config(buffers: WebSocketBufferConfig) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(buffers.max_message_bytes))
        .max_frame_size(Some(buffers.max_frame_bytes))
        .write_buffer_size(buffers.write_buffer_bytes)
        .max_write_buffer_size(buffers.max_write_buffer_bytes)
}

/// Default websocket transport (`ws://` and `wss://`).
#[derive(Clone, Default)]
pub struct TungsteniteTransport {
    connector: Option<Connector>,
}

impl TungsteniteTransport {
    pub fn with_connector(connector: Connector) -> Self {
        Self {
            connector: Some(connector),
        }
    }

    pub fn rustls(config: Arc<rustls::ClientConfig>) -> Self {
        Self::with_connector(Connector::Rustls(config))
    }
}

/// Read half of a websocket, yielding [`WsFrame`]s. `S` is the raw stream (client side
/// `MaybeTlsStream<TcpStream>`, server side plain `TcpStream`).
pub struct TungsteniteReader<S = MaybeTlsStream<TcpStream>> {
    inner: SplitStream<WebSocketStream<S>>,
}

/// Write half of a websocket, accepting [`WsFrame`]s.
pub struct TungsteniteWriter<S = MaybeTlsStream<TcpStream>> {
    inner: SplitSink<WebSocketStream<S>, TungsteniteMessage>,
}

/// Split an upgraded websocket into the frame-level halves used across the crate.
pub fn split_socket<S>(ws: WebSocketStream<S>) -> (TungsteniteReader<S>, TungsteniteWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (write, read) = ws.split();
    (
        TungsteniteReader { inner: read },
        TungsteniteWriter { inner: write },
    )
}

impl<S> Stream for TungsteniteReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<WsFrame, BridgeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|next| {
            next.map(|res| res.map(msg_to_frame).map_err(|e| map_ws_error("read", e)))
        })
    }
}

impl<S> Sink<WsFrame> for TungsteniteWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = BridgeError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_ready(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn start_send(mut self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner)
            .start_send(frame_to_msg(item))
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_flush(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_close(cx)
            .map_err(|e| map_ws_error("close", e))
    }
}

impl BridgeTransport for TungsteniteTransport {
    type Reader = TungsteniteReader;
    type Writer = TungsteniteWriter;

    fn connect(
        &self,
        url: String,
        buffers: WebSocketBufferConfig,
    ) -> BridgeConnectFuture<Self::Reader, Self::Writer> {
        let connector = self.connector.clone();
        Box::pin(async move {
            if url.starts_with("wss://") {
                install_rustls_crypto_provider();
            }

            let (stream, _response) =
                connect_async_tls_with_config(url.as_str(), Some(ws_config(buffers)), false, connector)
                    .await
                    .map_err(|err| BridgeError::ConnectionFailed(err.to_string()))?;

            Ok(split_socket(stream))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_survive_conversion() {
        let frames = [
            WsFrame::text(r#"{"a":1}"#),
            WsFrame::Binary(Bytes::from_static(&[1, 2, 3])),
            WsFrame::Ping(Bytes::from_static(b"p")),
            WsFrame::Pong(Bytes::from_static(b"p")),
            WsFrame::close(1000, "bye"),
            WsFrame::Close(None),
        ];
        for frame in frames {
            assert_eq!(msg_to_frame(frame_to_msg(frame.clone())), frame);
        }
    }

    #[test]
    fn invalid_utf8_text_is_sent_as_binary() {
        let msg = frame_to_msg(WsFrame::Text(Bytes::from_static(&[0xff, 0x00])));
        assert!(matches!(msg, TungsteniteMessage::Binary(_)));
    }
}
