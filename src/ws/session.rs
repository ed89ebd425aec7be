//! Connection session actor.
//!
//! One session owns at most one live websocket connection to `<bridge>?actorid=<id>`.
//! Socket callbacks (opened, frame, error, closed) arrive as actor messages tagged with the
//! connection epoch and are processed one at a time, so the state machine and the
//! single-flight retry guard need no locking. The read loop runs outside kameo and only
//! talks back through messages.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::observers::ValueObservers;
use crate::core::{
    BridgeClientConfig, BridgeError, BridgeResult, DisconnectCause, ExponentialBackoffReconnect,
    ReconnectStrategy, SessionHealth, SessionSnapshot, SessionState, WebSocketBufferConfig,
    WsCloseFrame, WsFrame, decode_frame_value, jitter_delay,
};
use crate::transport::BridgeTransport;

/// Arguments passed when spawning a [`ConnectionSession`].
pub struct ConnectionSessionArgs<T: BridgeTransport> {
    /// Full connection target, query string included.
    pub url: String,
    pub transport: T,
    pub reconnect: Box<dyn ReconnectStrategy>,
    pub observers: Arc<ValueObservers>,
    pub buffers: WebSocketBufferConfig,
    pub jitter: bool,
    pub close_timeout: Duration,
}

impl<T: BridgeTransport> ConnectionSessionArgs<T> {
    pub fn new(url: impl Into<String>, transport: T, observers: Arc<ValueObservers>) -> Self {
        Self::with_config(url, transport, observers, &BridgeClientConfig::default())
    }

    pub fn with_config(
        url: impl Into<String>,
        transport: T,
        observers: Arc<ValueObservers>,
        config: &BridgeClientConfig,
    ) -> Self {
        Self {
            url: url.into(),
            transport,
            reconnect: Box::new(ExponentialBackoffReconnect::from_config(config.backoff)),
            observers,
            buffers: config.buffers,
            jitter: config.jitter,
            close_timeout: config.close_timeout,
        }
    }
}

/// Session lifecycle events.
#[derive(Debug)]
pub enum SessionEvent {
    /// Dial the bridge. Ignored unless the session is idle.
    Connect,
    ConnectFailed {
        epoch: u64,
        error: String,
    },
    Inbound {
        epoch: u64,
        frame: WsFrame,
    },
    TransportError {
        epoch: u64,
        error: String,
    },
    Closed {
        epoch: u64,
        cause: DisconnectCause,
    },
    /// The armed retry timer fired.
    RetryElapsed,
    /// Caller-initiated teardown. Terminal.
    Disconnect,
}

/// Sent by the connect task once the transport handshake completes.
#[doc(hidden)]
pub struct ConnectionEstablished<T: BridgeTransport> {
    pub(crate) epoch: u64,
    pub(crate) reader: T::Reader,
    pub(crate) writer: T::Writer,
}

/// Ask the session for a [`SessionSnapshot`].
#[derive(Debug, Clone, Copy)]
pub struct GetSessionStatus;

pub struct ConnectionSession<T: BridgeTransport> {
    url: String,
    transport: T,
    reconnect: Box<dyn ReconnectStrategy>,
    observers: Arc<ValueObservers>,
    buffers: WebSocketBufferConfig,
    jitter: bool,
    close_timeout: Duration,
    actor_ref: ActorRef<Self>,
    state: SessionState,
    intentional: bool,
    epoch: u64,
    /// Single-flight guard: `Some` while a retry is armed.
    retry_timer: Option<JoinHandle<()>>,
    connect_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    writer: Option<T::Writer>,
    shutdown_tx: watch::Sender<bool>,
    health: SessionHealth,
}

impl<T: BridgeTransport> Actor for ConnectionSession<T> {
    type Args = ConnectionSessionArgs<T>;
    type Error = BridgeError;

    fn name() -> &'static str {
        "ConnectionSession"
    }

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> BridgeResult<Self> {
        let ConnectionSessionArgs {
            url,
            transport,
            reconnect,
            observers,
            buffers,
            jitter,
            close_timeout,
        } = args;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            url,
            transport,
            reconnect,
            observers,
            buffers,
            jitter,
            close_timeout,
            actor_ref,
            state: SessionState::Idle,
            intentional: false,
            epoch: 0,
            retry_timer: None,
            connect_task: None,
            reader_task: None,
            writer: None,
            shutdown_tx,
            health: SessionHealth::new(),
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> BridgeResult<()> {
        self.close_intentionally().await;
        Ok(())
    }

    fn on_panic(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        let url = self.url.clone();
        async move {
            error!(url = %url, error = ?err, "ConnectionSession panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

impl<T: BridgeTransport> KameoMessage<SessionEvent> for ConnectionSession<T> {
    type Reply = BridgeResult<()>;

    async fn handle(
        &mut self,
        event: SessionEvent,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match event {
            SessionEvent::Connect => self.handle_connect(),
            SessionEvent::ConnectFailed { epoch, error } => {
                self.handle_failure(epoch, DisconnectCause::HandshakeFailed { error })
                    .await
            }
            SessionEvent::Inbound { epoch, frame } => self.process_inbound(epoch, frame),
            SessionEvent::TransportError { epoch, error } => {
                self.handle_failure(epoch, DisconnectCause::ReadFailure { error })
                    .await
            }
            SessionEvent::Closed { epoch, cause } => self.handle_failure(epoch, cause).await,
            SessionEvent::RetryElapsed => self.handle_retry_elapsed(),
            SessionEvent::Disconnect => self.close_intentionally().await,
        }
        Ok(())
    }
}

impl<T: BridgeTransport> KameoMessage<ConnectionEstablished<T>> for ConnectionSession<T> {
    type Reply = BridgeResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionEstablished<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.on_connection_established(msg).await;
        Ok(())
    }
}

impl<T: BridgeTransport> KameoMessage<GetSessionStatus> for ConnectionSession<T> {
    type Reply = BridgeResult<SessionSnapshot>;

    async fn handle(
        &mut self,
        _msg: GetSessionStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.snapshot())
    }
}

impl<T: BridgeTransport> ConnectionSession<T> {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            target: self.url.clone(),
            state: self.state,
            epoch: self.epoch,
            attempt: self.reconnect.attempt(),
            retry_pending: self.retry_timer.is_some(),
            intentional: self.intentional,
            last_error: self
                .health
                .last_error()
                .map(|(context, error)| format!("{context}: {error}")),
            stats: self.health.stats(),
        }
    }

    fn handle_connect(&mut self) {
        if self.state != SessionState::Idle {
            debug!(
                url = %self.url,
                state = self.state.as_str(),
                "connect ignored: session is not idle"
            );
            return;
        }
        self.start_connect();
    }

    fn handle_retry_elapsed(&mut self) {
        self.retry_timer = None;
        if self.intentional || self.state != SessionState::RetryPending {
            debug!(
                url = %self.url,
                state = self.state.as_str(),
                "retry timer fired after teardown; ignoring"
            );
            return;
        }
        self.start_connect();
    }

    fn start_connect(&mut self) {
        self.epoch = self.epoch.saturating_add(1);
        self.state = SessionState::Connecting;
        self.health.record_connect();

        let epoch = self.epoch;
        info!(
            url = %self.url,
            epoch,
            attempt = self.reconnect.attempt(),
            "connecting to bridge"
        );

        let actor_ref = self.actor_ref.clone();
        let url = self.url.clone();
        let buffers = self.buffers;
        let transport = self.transport.clone();
        self.connect_task = Some(tokio::spawn(async move {
            match transport.connect(url, buffers).await {
                Ok((reader, writer)) => {
                    let _ = actor_ref
                        .tell(ConnectionEstablished::<T> {
                            epoch,
                            reader,
                            writer,
                        })
                        .send()
                        .await;
                }
                Err(err) => {
                    let _ = actor_ref
                        .tell(SessionEvent::ConnectFailed {
                            epoch,
                            error: err.to_string(),
                        })
                        .send()
                        .await;
                }
            }
        }));
    }

    async fn on_connection_established(&mut self, msg: ConnectionEstablished<T>) {
        let ConnectionEstablished {
            epoch,
            reader,
            mut writer,
        } = msg;

        if epoch != self.epoch || self.state != SessionState::Connecting || self.intentional {
            debug!(
                url = %self.url,
                epoch,
                current_epoch = self.epoch,
                state = self.state.as_str(),
                "discarding connection that is no longer wanted"
            );
            let _ = tokio::time::timeout(self.close_timeout, writer.close()).await;
            return;
        }

        self.connect_task = None;
        self.state = SessionState::Open;
        self.reconnect.reset();
        self.health.record_open();
        self.writer = Some(writer);
        info!(url = %self.url, epoch, "bridge connection opened");

        self.start_reader(epoch, reader);
    }

    fn start_reader(&mut self, epoch: u64, mut reader: T::Reader) {
        // Replacing the sender ends any reader still attached to the previous channel.
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.shutdown_tx = shutdown_tx;

        let actor_ref = self.actor_ref.clone();
        let url = self.url.clone();
        self.reader_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow_and_update() { break; }
                    }
                    next = reader.next() => {
                        match next {
                            Some(Ok(WsFrame::Close(frame))) => {
                                let (code, reason) = WsCloseFrame::describe(frame.as_ref());
                                info!(url = %url, epoch, code = ?code, reason = %reason, "received close frame");
                                let _ = actor_ref
                                    .tell(SessionEvent::Closed {
                                        epoch,
                                        cause: DisconnectCause::RemoteClosed { code, reason },
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                            Some(Ok(frame)) => {
                                if actor_ref
                                    .tell(SessionEvent::Inbound { epoch, frame })
                                    .send()
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Some(Err(err)) => {
                                let _ = actor_ref
                                    .tell(SessionEvent::TransportError {
                                        epoch,
                                        error: err.to_string(),
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                            None => {
                                let _ = actor_ref
                                    .tell(SessionEvent::Closed {
                                        epoch,
                                        cause: DisconnectCause::StreamEnded,
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
        }));
    }

    fn process_inbound(&mut self, epoch: u64, frame: WsFrame) {
        if epoch != self.epoch || self.state != SessionState::Open {
            return;
        }
        self.health.record_frame();

        match decode_frame_value(&frame) {
            Ok(Some(value)) => {
                self.health.record_value();
                self.observers.publish(value);
            }
            Ok(None) => {}
            Err(err) => {
                let msg = err.to_string();
                error!(url = %self.url, epoch, error = %msg, "invalid data from bridge");
                self.health.record_decode_failure(&msg);
            }
        }
    }

    async fn handle_failure(&mut self, epoch: u64, cause: DisconnectCause) {
        if epoch != self.epoch {
            debug!(
                url = %self.url,
                epoch,
                current_epoch = self.epoch,
                cause = ?cause,
                "ignoring event from a previous connection"
            );
            return;
        }

        if self.intentional || matches!(self.state, SessionState::Closing | SessionState::Closed) {
            info!(url = %self.url, epoch, cause = ?cause, "connection closed");
            return;
        }

        let event = match &cause {
            DisconnectCause::HandshakeFailed { error: err } => {
                error!(url = %self.url, epoch, error = %err, "bridge connection failed");
                self.health.record_transport_error("connect", err);
                "connect_failed"
            }
            DisconnectCause::ReadFailure { error: err } => {
                error!(url = %self.url, epoch, error = %err, "error on bridge connection");
                self.health.record_transport_error("read", err);
                "transport_error"
            }
            DisconnectCause::RemoteClosed { code, reason } => {
                info!(url = %self.url, epoch, code = ?code, reason = %reason, "bridge connection closed");
                self.health.record_unexpected_close(reason);
                "closed"
            }
            DisconnectCause::StreamEnded => {
                info!(url = %self.url, epoch, "bridge connection closed");
                self.health.record_unexpected_close("stream ended");
                "closed"
            }
        };

        if self.state.is_live() {
            self.teardown_connection();
        }
        self.schedule_retry(event, &cause);
    }

    fn schedule_retry(&mut self, event: &str, cause: &DisconnectCause) {
        if self.retry_timer.is_some() {
            self.health.record_retry_suppressed();
            debug!(
                url = %self.url,
                event = %event,
                cause = ?cause,
                "retry already pending; not arming another"
            );
            return;
        }

        let planned = self.reconnect.next_delay();
        let delay = if self.jitter {
            jitter_delay(planned)
        } else {
            planned
        };
        self.state = SessionState::RetryPending;
        self.health.record_retry_scheduled();

        let stats = self.health.stats();
        warn!(
            url = %self.url,
            event = %event,
            cause = ?cause,
            epoch = self.epoch,
            attempt = self.reconnect.attempt(),
            delay_ms = delay.as_millis().min(u64::MAX as u128) as u64,
            connects = stats.connects,
            frames = stats.frames,
            "bridge reconnect plan"
        );

        let actor_ref = self.actor_ref.clone();
        self.retry_timer = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = actor_ref.tell(SessionEvent::RetryElapsed).send().await;
        }));
    }

    /// Drop the current connection without a close handshake (it already failed).
    fn teardown_connection(&mut self) {
        self.teardown_reader_and_connect();
        self.writer = None;
        self.health.record_down();
    }

    async fn close_intentionally(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.intentional = true;
        self.state = SessionState::Closing;

        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        self.teardown_reader_and_connect();

        if let Some(mut writer) = self.writer.take() {
            match tokio::time::timeout(self.close_timeout, writer.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    debug!(url = %self.url, error = %err, "close handshake failed");
                }
                Err(_) => {
                    debug!(url = %self.url, timeout = ?self.close_timeout, "close handshake timed out");
                }
            }
        }

        self.health.record_down();
        self.state = SessionState::Closed;
        info!(url = %self.url, epoch = self.epoch, "bridge connection closed intentionally");
    }

    fn teardown_reader_and_connect(&mut self) {
        let _ = self.shutdown_tx.send(true);
        // Aborted, never awaited: the reader may be parked on a send into our own mailbox.
        if let Some(handle) = self.reader_task.take() {
            handle.abort();
        }
        if let Some(handle) = self.connect_task.take() {
            handle.abort();
        }
    }
}
