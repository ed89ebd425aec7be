//! Websocket bridge endpoint.
//!
//! A client connects as `?actorid=<id>`; the connection then owns the stage mailbox `<id>`
//! until it closes. Everything delivered to that mailbox is written to the socket as a
//! [`WireMessage`], and every wire message read from the socket is delivered to its `actor`
//! on behalf of `<id>`.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use percent_encoding::percent_decode_str;
use sonic_rs::Value;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
    },
};
use tracing::{debug, error, info, warn};

use crate::core::{BridgeError, BridgeResult, WebSocketBufferConfig, WireMessage, WsFrame, frame_bytes};
use crate::mailbox::Stage;
use crate::transport::tungstenite::{map_ws_error, split_socket, ws_config};

/// Grace period for open connections to flush their close frames on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// `actorid` from a request query string, form-decoded. Empty values count as missing.
pub fn actor_id_from_query(query: Option<&str>) -> Option<String> {
    let raw = query?
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == "actorid").then_some(value)
        })
        .next()?;
    let spaced = raw.replace('+', " ");
    let id = percent_decode_str(&spaced).decode_utf8_lossy().into_owned();
    (!id.is_empty()).then_some(id)
}

pub struct BridgeServer {
    stage: Stage,
    listener: TcpListener,
    buffers: WebSocketBufferConfig,
}

impl BridgeServer {
    pub async fn bind(stage: Stage, addr: impl ToSocketAddrs) -> BridgeResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| map_ws_error("bind", err))?;
        Ok(Self {
            stage,
            listener,
            buffers: WebSocketBufferConfig::default(),
        })
    }

    pub fn with_buffers(mut self, buffers: WebSocketBufferConfig) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn local_addr(&self) -> BridgeResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|err| map_ws_error("local_addr", err))
    }

    /// Accept connections until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> BridgeResult<()> {
        let addr = self.local_addr()?;
        info!(%addr, "bridge server listening");

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow_and_update() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let stage = self.stage.clone();
                        let buffers = self.buffers;
                        let shutdown = shutdown.clone();
                        connections.spawn(async move {
                            if let Err(err) = serve_connection(stage, stream, peer, buffers, shutdown).await {
                                warn!(%peer, error = %err, "bridge connection ended with error");
                            }
                        });
                    }
                    Err(err) => {
                        error!(%addr, error = %err, "accept failed");
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            debug!(%addr, remaining = connections.len(), "aborting connections after grace period");
        }
        connections.shutdown().await;
        info!(%addr, "bridge server stopped");
        Ok(())
    }
}

async fn serve_connection(
    stage: Stage,
    stream: TcpStream,
    peer: SocketAddr,
    buffers: WebSocketBufferConfig,
    mut shutdown: watch::Receiver<bool>,
) -> BridgeResult<()> {
    let mut actor_id = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        match actor_id_from_query(req.uri().query()) {
            Some(id) => {
                actor_id = Some(id);
                Ok(resp)
            }
            None => {
                let mut err = ErrorResponse::new(Some("missing actorid parameter".to_string()));
                *err.status_mut() = StatusCode::BAD_REQUEST;
                Err(err)
            }
        }
    };

    let ws = match accept_hdr_async_with_config(stream, callback, Some(ws_config(buffers))).await {
        Ok(ws) => ws,
        Err(err) => {
            error!(%peer, error = %err, "unable to upgrade client to a websocket connection");
            return Err(map_ws_error("accept", err));
        }
    };
    let actor_id = actor_id.ok_or_else(|| {
        BridgeError::InvalidState("handshake completed without an actor id".to_string())
    })?;
    let (mut read, mut write) = split_socket(ws);

    let ctx = match stage.open(actor_id.clone()) {
        Ok(ctx) => ctx,
        Err(err) => {
            error!(%peer, actor_id = %actor_id, error = %err, "unable to register actor on this stage");
            let _ = write.close().await;
            return Err(BridgeError::ActorError(err.to_string()));
        }
    };
    info!(%peer, actor_id = %actor_id, "bridge client connected");

    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow_and_update() {
                    break;
                }
            }
            next = ctx.next() => {
                let Ok(record) = next else { break; };
                let payload = match sonic_rs::from_str::<Value>(&record.payload) {
                    Ok(payload) => payload,
                    Err(err) => {
                        error!(actor_id = %actor_id, sender = %record.sender, error = %err, "invalid JSON");
                        continue;
                    }
                };
                let wire = WireMessage {
                    sender: record.sender,
                    actor: actor_id.clone(),
                    payload,
                };
                let text = match wire.encode() {
                    Ok(text) => text,
                    Err(err) => {
                        error!(actor_id = %actor_id, error = %err, "unable to encode wire message");
                        continue;
                    }
                };
                if let Err(err) = write.send(WsFrame::text(text)).await {
                    error!(actor_id = %actor_id, error = %err, "closing after failed attempt to send");
                    break;
                }
            }
            incoming = read.next() => {
                let frame = match incoming {
                    Some(Ok(frame)) => frame,
                    Some(Err(err)) => {
                        error!(actor_id = %actor_id, error = %err, "unable to read data from client");
                        break;
                    }
                    None => break,
                };
                if let WsFrame::Close(_) = frame {
                    break;
                }
                if !frame.is_data() {
                    continue;
                }
                let Some(bytes) = frame_bytes(&frame) else { continue; };
                deliver_from_socket(&stage, &actor_id, bytes);
            }
        }
    }

    drop(ctx);
    let _ = write.close().await;
    info!(%peer, actor_id = %actor_id, "bridge client disconnected");
    Ok(())
}

fn deliver_from_socket(stage: &Stage, actor_id: &str, bytes: &[u8]) {
    let wire = match WireMessage::decode(bytes) {
        Ok(wire) => wire,
        Err(err) => {
            error!(actor_id = %actor_id, error = %err, "unable to parse message from client");
            return;
        }
    };
    let payload = match sonic_rs::to_string(&wire.payload) {
        Ok(payload) => payload,
        Err(err) => {
            error!(actor_id = %actor_id, error = %err, "unable to encode payload");
            return;
        }
    };
    if let Err(err) = stage.send(actor_id, &wire.actor, payload) {
        warn!(actor_id = %actor_id, target_actor = %wire.actor, error = %err, "delivery failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_actor_id() {
        assert_eq!(actor_id_from_query(Some("actorid=ui")), Some("ui".to_string()));
        assert_eq!(
            actor_id_from_query(Some("token=x&actorid=a%20b%2Fc")),
            Some("a b/c".to_string())
        );
        assert_eq!(actor_id_from_query(Some("actorid=a+b")), Some("a b".to_string()));
        assert_eq!(actor_id_from_query(Some("actorid=")), None);
        assert_eq!(actor_id_from_query(Some("other=1")), None);
        assert_eq!(actor_id_from_query(None), None);
    }
}
