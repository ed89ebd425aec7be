use futures_util::{SinkExt, StreamExt};
use sonic_rs::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::actor::Mailbox;
use super::{MailboxError, MailboxResult};
use crate::client::build_target;
use crate::core::{MailboxMessage, WebSocketBufferConfig, WireMessage, WsFrame, frame_bytes};
use crate::transport::{BridgeTransport, tungstenite::TungsteniteTransport};

/// Mailbox of an actor hosted outside the stage, reached through a bridge endpoint.
///
/// The connection is registered as `?actorid=<address>`; everything the stage sends to that
/// address arrives here, and `send` asks the endpoint to deliver to any stage address.
/// There is no reconnect: a dropped socket surfaces as [`MailboxError::Disconnected`].
pub struct RemoteMailbox<T: BridgeTransport = TungsteniteTransport> {
    address: String,
    reader: Mutex<T::Reader>,
    writer: Mutex<T::Writer>,
}

impl<T: BridgeTransport> RemoteMailbox<T> {
    pub async fn connect(
        transport: &T,
        bridge: &str,
        address: impl Into<String>,
        buffers: WebSocketBufferConfig,
    ) -> MailboxResult<Self> {
        let address = address.into();
        if address.is_empty() {
            return Err(MailboxError::InvalidAddress(address));
        }

        let url = build_target(bridge, &address);
        let (reader, writer) = transport.connect(url.clone(), buffers).await?;
        info!(pid = %address, url = %url, "remote mailbox connected");

        Ok(Self {
            address,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        })
    }

    /// Send a close frame. Later `send`s fail; a parked `receive` sees `Disconnected`.
    pub async fn close(&self) -> MailboxResult<()> {
        self.writer.lock().await.close().await?;
        debug!(pid = %self.address, "remote mailbox closed");
        Ok(())
    }
}

impl<T: BridgeTransport> Mailbox for RemoteMailbox<T> {
    fn address(&self) -> &str {
        &self.address
    }

    async fn send(&self, target: &str, payload: String) -> MailboxResult<()> {
        let payload: Value =
            sonic_rs::from_str(&payload).map_err(|err| MailboxError::Decode(err.to_string()))?;
        let msg = WireMessage {
            sender: self.address.clone(),
            actor: target.to_string(),
            payload,
        };
        let text = msg.encode()?;
        self.writer.lock().await.send(WsFrame::text(text)).await?;
        Ok(())
    }

    async fn receive(&self) -> MailboxResult<MailboxMessage> {
        let mut reader = self.reader.lock().await;
        loop {
            let frame = match reader.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => return Err(err.into()),
                None => return Err(MailboxError::Disconnected),
            };
            if let WsFrame::Close(_) = frame {
                return Err(MailboxError::Disconnected);
            }
            if !frame.is_data() {
                continue;
            }
            let Some(bytes) = frame_bytes(&frame) else {
                continue;
            };
            match WireMessage::decode(bytes) {
                Ok(msg) => return Ok(msg.into_record()?),
                Err(err) => {
                    error!(pid = %self.address, error = %err, "invalid message from bridge");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use sonic_rs::json;
    use std::time::Duration;

    #[tokio::test]
    async fn speaks_wire_messages() {
        let (transport, mut server) = MockTransport::channel_pair();
        let mailbox = RemoteMailbox::connect(
            &transport,
            "ws://bridge/ws",
            "ping",
            WebSocketBufferConfig::default(),
        )
        .await
        .unwrap();
        let mut conn = server
            .next_connection(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(conn.url, "ws://bridge/ws?actorid=ping");

        mailbox
            .send("pong", r#"{"hello":"world"}"#.to_string())
            .await
            .unwrap();
        let WsFrame::Text(out) = conn
            .recv_outbound_timeout(Duration::from_secs(1))
            .await
            .unwrap()
        else {
            panic!("expected text frame");
        };
        let wire = WireMessage::decode(&out).unwrap();
        assert_eq!(wire.actor, "pong");
        assert_eq!(wire.sender, "ping");
        assert_eq!(wire.payload, json!({"hello": "world"}));

        conn.send_text("garbage").unwrap();
        conn.send_text(r#"{"sender":"pong","actor":"ping","payload":[1]}"#)
            .unwrap();
        let got = mailbox.receive().await.unwrap();
        assert_eq!(
            got,
            MailboxMessage {
                sender: "pong".into(),
                payload: "[1]".into()
            }
        );

        conn.drop_socket();
        assert!(matches!(
            mailbox.receive().await,
            Err(MailboxError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn rejects_invalid_payload_before_writing() {
        let (transport, mut server) = MockTransport::channel_pair();
        let mailbox =
            RemoteMailbox::connect(&transport, "ws://b", "x", WebSocketBufferConfig::default())
                .await
                .unwrap();
        let mut conn = server
            .next_connection(Duration::from_secs(1))
            .await
            .unwrap();

        let err = mailbox.send("y", "{oops".to_string()).await.unwrap_err();
        assert!(matches!(err, MailboxError::Decode(_)));
        assert!(
            conn.recv_outbound_timeout(Duration::from_millis(50))
                .await
                .is_none()
        );
    }
}
