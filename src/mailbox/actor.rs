use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sonic_rs::Value;
use tracing::{error, info, warn};

use super::inbox::Inbox;
use super::stage::Stage;
use super::{MailboxError, MailboxResult};
use crate::core::{Envelope, MailboxMessage};

/// What an actor behaviour can do: fire-and-forget `send`, blocking `receive`.
pub trait Mailbox: Send + Sync {
    /// Address other actors use to reach this mailbox.
    fn address(&self) -> &str;

    /// Enqueue JSON `payload` text for `target`. There is no delivery acknowledgement.
    fn send(
        &self,
        target: &str,
        payload: String,
    ) -> impl Future<Output = MailboxResult<()>> + Send;

    /// Wait for the next message addressed to this mailbox.
    fn receive(&self) -> impl Future<Output = MailboxResult<MailboxMessage>> + Send;
}

/// Stage-hosted mailbox. Dropping it closes the inbox and frees the address.
pub struct ActorContext {
    address: String,
    inbox: Arc<Inbox<MailboxMessage>>,
    stage: Stage,
}

impl ActorContext {
    pub(crate) fn new(address: String, inbox: Arc<Inbox<MailboxMessage>>, stage: Stage) -> Self {
        Self {
            address,
            inbox,
            stage,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub async fn next(&self) -> MailboxResult<MailboxMessage> {
        self.inbox.next().await
    }

    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    /// Close the inbox: a parked `receive` returns `InboxClosed`.
    pub fn close(&self) {
        self.inbox.close();
    }
}

impl Drop for ActorContext {
    fn drop(&mut self) {
        self.stage.release(&self.address, &self.inbox);
    }
}

impl std::fmt::Debug for ActorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorContext")
            .field("address", &self.address)
            .field("pending", &self.inbox.len())
            .finish()
    }
}

impl Mailbox for ActorContext {
    fn address(&self) -> &str {
        &self.address
    }

    async fn send(&self, target: &str, payload: String) -> MailboxResult<()> {
        self.stage.send(&self.address, target, payload)
    }

    async fn receive(&self) -> MailboxResult<MailboxMessage> {
        self.inbox.next().await
    }
}

/// Reply to every message with the exact payload it carried, addressed to its sender.
///
/// Undecodable messages are logged and skipped. Returns `Ok` once the mailbox closes.
pub async fn echo_actor<M: Mailbox>(mailbox: M) -> MailboxResult<()> {
    loop {
        let record = match mailbox.receive().await {
            Ok(record) => record,
            Err(MailboxError::InboxClosed | MailboxError::Disconnected) => return Ok(()),
            Err(err) => return Err(err),
        };

        if let Err(err) = Envelope::from_record(&record) {
            error!(
                pid = %mailbox.address(),
                sender = %record.sender,
                error = %err,
                "unable to process message"
            );
            continue;
        }

        info!(pid = %mailbox.address(), sender = %record.sender, payload = %record.payload, "got message");
        if let Err(err) = mailbox.send(&record.sender, record.payload).await {
            warn!(pid = %mailbox.address(), sender = %record.sender, error = %err, "echo reply not delivered");
        }
    }
}

/// Probe loop settings.
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    /// Well-known address probed every round.
    pub target: String,
    pub payload: Value,
    /// Wait between a reply and the next probe.
    pub pace: Duration,
    /// Stop after this many replies; `None` probes until the mailbox closes.
    pub rounds: Option<usize>,
}

impl ProbeConfig {
    pub fn new(target: impl Into<String>, payload: Value) -> Self {
        Self {
            target: target.into(),
            payload,
            pace: Duration::from_secs(1),
            rounds: None,
        }
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = Some(rounds);
        self
    }
}

/// Send `config.payload` to `config.target`, wait for any reply, pause, repeat.
///
/// Returns the number of completed rounds.
pub async fn probe_actor<M: Mailbox>(mailbox: M, config: ProbeConfig) -> MailboxResult<usize> {
    let payload = sonic_rs::to_string(&config.payload)
        .map_err(|err| MailboxError::Encode(err.to_string()))?;
    let mut completed = 0usize;

    while config.rounds.is_none_or(|rounds| completed < rounds) {
        mailbox.send(&config.target, payload.clone()).await?;

        let record = match mailbox.receive().await {
            Ok(record) => record,
            Err(MailboxError::InboxClosed | MailboxError::Disconnected) => break,
            Err(err) => return Err(err),
        };
        completed += 1;

        match Envelope::from_record(&record) {
            Ok(reply) => info!(
                pid = %mailbox.address(),
                round = completed,
                sender = %reply.sender,
                payload = %record.payload,
                "probe reply"
            ),
            Err(err) => error!(
                pid = %mailbox.address(),
                round = completed,
                sender = %record.sender,
                error = %err,
                "undecodable probe reply"
            ),
        }

        let more = config.rounds.is_none_or(|rounds| completed < rounds);
        if more && !config.pace.is_zero() {
            tokio::time::sleep(config.pace).await;
        }
    }

    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::envelope;
    use sonic_rs::json;

    #[tokio::test]
    async fn echo_returns_payload_to_sender() {
        let stage = Stage::new();
        let echo = stage.spawn_named("pong", echo_actor).unwrap();
        let a = stage.open("A").unwrap();

        a.send("pong", r#"{"hello":"world"}"#.to_string()).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(1), a.receive())
            .await
            .unwrap()
            .unwrap();
        let reply = Envelope::from_record(&reply).unwrap();
        assert_eq!(reply, Envelope::new("pong", json!({"hello": "world"})));

        let text = envelope::encode(&reply.sender, &reply.payload).unwrap();
        assert_eq!(envelope::decode(&text).unwrap(), reply);
        echo.abort();
    }

    #[tokio::test]
    async fn echo_skips_undecodable_messages() {
        let stage = Stage::new();
        let echo = stage.spawn_named("pong", echo_actor).unwrap();
        let a = stage.open("A").unwrap();

        a.send("pong", "{not json".to_string()).await.unwrap();
        a.send("pong", "42".to_string()).await.unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(1), a.receive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload, "42");
        assert_eq!(a.pending(), 0);
        echo.abort();
    }

    #[tokio::test]
    async fn bounded_probe_stops_after_rounds() {
        let stage = Stage::new();
        let echo = stage.spawn_named("pong", echo_actor).unwrap();
        let probe = stage
            .spawn(|ctx| async move {
                let config = ProbeConfig::new("pong", json!({"hello": "world"}))
                    .with_pace(Duration::from_millis(5))
                    .with_rounds(3);
                let rounds = probe_actor(ctx, config).await?;
                assert_eq!(rounds, 3);
                Ok(())
            })
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), probe.join())
            .await
            .unwrap()
            .unwrap();
        echo.abort();
    }
}
