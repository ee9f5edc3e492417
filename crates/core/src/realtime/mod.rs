//! Real-time channel: a request/response multiplexer plus event decoder
//! over one persistent pub/sub connection.
//!
//! All durable state (request counter, correlation table, sequence cursor)
//! lives in the [`SessionContext`]; the channel owns nothing but the live
//! transport, so a reconnect resumes from the context's cursor with the
//! same strictly-increasing request ids.
//!
//! Outbound actions are published as task envelopes on the request topic
//! after registering a pending entry keyed by request id; acknowledgments
//! arrive asynchronously on the response topic and may complete in any
//! order. Frames that match no pending entry fall through to the event
//! decoder. Unknown frames are logged and dropped, never raised.

pub mod actions;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use msgr_protocol::{
    AckFrame, DELTA_TOPIC, DeltaBatch, Event, FOREGROUND_TOPIC, Frame, PRESENCE_TOPIC,
    REQUEST_TOPIC, RESPONSE_TOPIC, SYNC_QUEUE_TOPIC, TYPING_TOPIC, Task, TaskEnvelope, events,
};
use msgr_runtime::{CookieJar, Transport, WsTransport};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::SessionContext;
use crate::error::{Error, Result};
use crate::refresh::TokenRefresher;

/// Cooldown recorded when the provider signals throttling for a queue.
const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// How often the correlation table is swept for expired entries.
const HOUSEKEEPING_PERIOD: Duration = Duration::from_secs(1);

/// Control topic announcing which inbound topics this session consumes.
const SUBSCRIBE_TOPIC: &str = "/subscribe";

/// Connection lifecycle. `Disconnected` is both the initial and the
/// after-close state; the supervisor moves back to `Connecting`
/// automatically unless the caller stopped listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Reconnect bounds: exponential backoff from `base`, capped at `cap`,
/// giving up after `max_attempts` consecutive failures.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

/// Dials one pub/sub connection. The channel never constructs transports
/// directly so tests can hand it an in-memory implementation.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(Arc<dyn Transport>, mpsc::UnboundedReceiver<Frame>)>;
}

/// Production connector dialing the context's real-time endpoint.
pub struct WsConnector {
    endpoint: String,
    jar: Arc<CookieJar>,
    user_agent: String,
}

impl WsConnector {
    pub fn new(endpoint: impl Into<String>, jar: Arc<CookieJar>, user_agent: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            jar,
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<(Arc<dyn Transport>, mpsc::UnboundedReceiver<Frame>)> {
        let (transport, rx) = WsTransport::connect(&self.endpoint, &self.jar, &self.user_agent)
            .await
            .map_err(Error::from)?;
        Ok((Arc::new(transport) as Arc<dyn Transport>, rx))
    }
}

pub struct RealtimeChannel {
    ctx: Arc<SessionContext>,
    state: Mutex<ChannelState>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    stopped: AtomicBool,
    reconnect: ReconnectPolicy,
    call_timeout: Duration,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    refresher: Mutex<Option<Arc<TokenRefresher>>>,
}

impl RealtimeChannel {
    pub fn new(ctx: Arc<SessionContext>) -> Arc<Self> {
        Self::with_policies(ctx, ReconnectPolicy::default(), Duration::from_secs(30))
    }

    pub fn with_policies(
        ctx: Arc<SessionContext>,
        reconnect: ReconnectPolicy,
        call_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            state: Mutex::new(ChannelState::Disconnected),
            transport: Mutex::new(None),
            stopped: AtomicBool::new(false),
            reconnect,
            call_timeout,
            supervisor: Mutex::new(None),
            refresher: Mutex::new(None),
        })
    }

    /// Installs the refresher consulted when the remote rejects the
    /// anti-forgery token mid-call.
    pub fn set_refresher(&self, refresher: Arc<TokenRefresher>) {
        *self.refresher.lock() = Some(refresher);
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Starts the connection supervisor and returns the inbound event
    /// stream. Events are delivered in transport order; the stream yields
    /// `Err` exactly once, when automatic reconnection gives up.
    pub fn start(
        self: &Arc<Self>,
        connector: Arc<dyn Connector>,
    ) -> Result<mpsc::UnboundedReceiver<Result<Event>>> {
        let mut supervisor = self.supervisor.lock();
        if supervisor.is_some() {
            return Err(Error::Protocol("realtime channel already started".into()));
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let channel = Arc::clone(self);
        *supervisor = Some(tokio::spawn(async move {
            channel.run(connector, events_tx).await;
        }));
        Ok(events_rx)
    }

    /// Stops listening for good: closes the transport, rejects every
    /// pending call, and disables reconnection. No caller is left awaiting
    /// forever.
    pub async fn stop_listening(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            transport.close().await;
        }
        let failed = self.ctx.fail_all_pending("listener stopped");
        if failed > 0 {
            debug!(failed, "rejected pending calls on stop");
        }
        *self.state.lock() = ChannelState::Disconnected;
    }

    /// Synchronous teardown for drop paths: kills the supervisor without
    /// a close handshake and rejects whatever was pending.
    pub(crate) fn abort(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
        self.transport.lock().take();
        self.ctx.fail_all_pending("session dropped");
        *self.state.lock() = ChannelState::Disconnected;
    }

    /// Publishes `tasks` as one envelope and awaits the correlated
    /// acknowledgment. The only true blocking point for callers: resolves
    /// on the matching ack, the deadline, or a disconnect, whichever is
    /// first.
    ///
    /// A token-rejection ack triggers one on-demand refresh through the
    /// installed refresher and a single retry under a fresh request id;
    /// if no refresher is installed or the refresh fails, the original
    /// rejection surfaces.
    pub async fn call(&self, tasks: Vec<Task>) -> Result<Value> {
        match self.call_once(&tasks).await {
            Err(Error::Authentication(reason)) => {
                let refresher = self.refresher.lock().clone();
                if let Some(refresher) = refresher {
                    if refresher.refresh_after_rejection(&self.ctx).await {
                        return self.call_once(&tasks).await;
                    }
                }
                Err(Error::Authentication(reason))
            }
            other => other,
        }
    }

    async fn call_once(&self, tasks: &[Task]) -> Result<Value> {
        let queue = tasks
            .first()
            .map(|t| t.queue_name.clone())
            .unwrap_or_else(|| "tasks".to_string());
        if self.ctx.cooldown_active(&queue) {
            return Err(Error::RateLimited { queue });
        }

        let transport = self.current_transport()?;
        let id = self.ctx.next_request_id();
        let rx = self.ctx.register_pending(id, self.call_timeout);

        let envelope =
            TaskEnvelope::build(self.ctx.app_id(), self.ctx.version_id(), id, tasks.to_vec())?;
        if let Err(e) = transport
            .publish(Frame::new(REQUEST_TOPIC, serde_json::to_value(&envelope)?))
            .await
        {
            // publish failure rejects only this call
            self.ctx.evict_pending(id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => match result {
                Err(Error::RateLimited { .. }) => {
                    self.ctx.note_cooldown(&queue, RATE_LIMIT_COOLDOWN);
                    Err(Error::RateLimited { queue })
                }
                other => other,
            },
            Ok(Err(_)) => Err(Error::ConnectionClosed(
                "channel dropped while the call was pending".into(),
            )),
            Err(_) => {
                self.ctx.evict_pending(id);
                Err(Error::Timeout(format!("realtime request {id}")))
            }
        }
    }

    /// Publishes tasks without expecting an acknowledgment.
    pub async fn publish_tasks(&self, tasks: Vec<Task>) -> Result<()> {
        let transport = self.current_transport()?;
        let id = self.ctx.next_request_id();
        let envelope =
            TaskEnvelope::build(self.ctx.app_id(), self.ctx.version_id(), id, tasks)?;
        transport
            .publish(Frame::new(REQUEST_TOPIC, serde_json::to_value(&envelope)?))
            .await
            .map_err(Error::from)
    }

    fn current_transport(&self) -> Result<Arc<dyn Transport>> {
        self.transport
            .lock()
            .clone()
            .ok_or_else(|| Error::ConnectionClosed("realtime channel is not connected".into()))
    }

    async fn run(
        self: Arc<Self>,
        connector: Arc<dyn Connector>,
        events_tx: mpsc::UnboundedSender<Result<Event>>,
    ) {
        let mut attempts: u32 = 0;
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            *self.state.lock() = ChannelState::Connecting;

            match connector.connect().await {
                Ok((transport, rx)) => {
                    *self.transport.lock() = Some(Arc::clone(&transport));
                    *self.state.lock() = ChannelState::Connected;
                    if attempts > 0 {
                        info!(attempts, "realtime channel reconnected");
                    }
                    attempts = 0;

                    if let Err(e) = self.on_connected(&transport).await {
                        warn!(error = %e, "post-connect subscription failed");
                    }

                    self.dispatch_loop(rx, &events_tx).await;

                    *self.state.lock() = ChannelState::Disconnected;
                    self.transport.lock().take();
                    let failed = self.ctx.fail_all_pending("realtime connection dropped");
                    if failed > 0 {
                        warn!(failed, "rejected pending calls after disconnect");
                    }
                }
                Err(e) => {
                    *self.state.lock() = ChannelState::Disconnected;
                    warn!(error = %e, "realtime connect failed");
                }
            }

            if self.stopped.load(Ordering::SeqCst) || !self.ctx.options().auto_reconnect {
                break;
            }
            attempts += 1;
            if attempts > self.reconnect.max_attempts {
                warn!(
                    attempts = self.reconnect.max_attempts,
                    "giving up on reconnection"
                );
                let _ = events_tx.send(Err(Error::ReconnectExhausted {
                    attempts: self.reconnect.max_attempts,
                }));
                break;
            }
            let delay = backoff_delay(&self.reconnect, attempts);
            debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, "reconnect backoff");
            tokio::time::sleep(delay).await;
        }
        debug!("realtime supervisor finished");
    }

    /// Resumes the server-side delivery queue from the stored cursor and
    /// announces presence per the session options.
    async fn on_connected(&self, transport: &Arc<dyn Transport>) -> Result<()> {
        transport
            .publish(Frame::new(
                SUBSCRIBE_TOPIC,
                json!({
                    "topics": [
                        RESPONSE_TOPIC,
                        DELTA_TOPIC,
                        TYPING_TOPIC,
                        PRESENCE_TOPIC,
                        FOREGROUND_TOPIC,
                    ]
                }),
            ))
            .await?;

        let cursor = self.ctx.cursor();
        transport
            .publish(Frame::new(
                SYNC_QUEUE_TOPIC,
                json!({
                    "sync_api_version": 10,
                    "max_deltas_able_to_process": 100,
                    "delta_batch_size": 500,
                    "encoding": "JSON",
                    "entity_fbid": self.ctx.user_id(),
                    "device_id": self.ctx.device_id(),
                    "initial_titan_sequence_id": cursor.seq_id,
                    "sync_token": cursor.sync_token,
                }),
            ))
            .await?;

        if self.ctx.options().online {
            transport
                .publish(Frame::new(FOREGROUND_TOPIC, json!({"foreground": true})))
                .await?;
        }
        Ok(())
    }

    async fn dispatch_loop(
        &self,
        mut rx: mpsc::UnboundedReceiver<Frame>,
        events_tx: &mpsc::UnboundedSender<Result<Event>>,
    ) {
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_PERIOD);
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => self.handle_frame(frame, events_tx).await,
                    None => break,
                },
                _ = housekeeping.tick() => {
                    let expired = self.ctx.expire_pending(Instant::now());
                    if expired > 0 {
                        debug!(expired, "evicted timed-out pending requests");
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, frame: Frame, events_tx: &mpsc::UnboundedSender<Result<Event>>) {
        match frame.topic.as_str() {
            RESPONSE_TOPIC => self.handle_ack(frame.payload, events_tx).await,
            DELTA_TOPIC => self.handle_deltas(frame.payload, events_tx).await,
            TYPING_TOPIC => {
                if self.ctx.options().listen_typing {
                    if let Some(event) = events::decode_typing(&frame.payload) {
                        let _ = events_tx.send(Ok(event));
                    }
                }
            }
            PRESENCE_TOPIC => {
                if self.ctx.options().update_presence {
                    for event in events::decode_presence(&frame.payload) {
                        let _ = events_tx.send(Ok(event));
                    }
                }
            }
            other => debug!(topic = other, "dropping frame on unknown topic"),
        }
    }

    async fn handle_ack(&self, payload: Value, events_tx: &mpsc::UnboundedSender<Result<Event>>) {
        let ack: AckFrame = match serde_json::from_value(payload) {
            Ok(ack) => ack,
            Err(e) => {
                debug!(error = %e, "dropping unparseable ack frame");
                return;
            }
        };
        let Some(id) = ack.request_id else {
            debug!("ack frame without request id, dropping");
            return;
        };

        let orphan_payload = ack.payload.clone();
        let result = match ack.error_code {
            Some(code) if Error::is_token_rejection_code(code) => Err(Error::Authentication(
                format!("anti-forgery token rejected by remote (code {code})"),
            )),
            Some(code) if Error::is_rate_limit_code(code) => Err(Error::RateLimited {
                queue: String::new(),
            }),
            Some(code) => Err(Error::Protocol(format!(
                "task failed with provider code {code}: {}",
                ack.error_message.unwrap_or_default()
            ))),
            None => Ok(ack.payload.unwrap_or(Value::Null)),
        };

        if !self.ctx.complete_pending(id, result) {
            // already timed out, or an unsolicited push; any deltas it
            // carries still reach the consumer
            debug!(id, "ack matched no pending request, decoding as events");
            if let Some(payload) = orphan_payload {
                self.handle_deltas(payload, events_tx).await;
            }
        }
    }

    async fn handle_deltas(
        &self,
        payload: Value,
        events_tx: &mpsc::UnboundedSender<Result<Event>>,
    ) {
        let batch: DeltaBatch = match serde_json::from_value(payload) {
            Ok(batch) => batch,
            Err(e) => {
                debug!(error = %e, "dropping unparseable delta batch");
                return;
            }
        };

        self.ctx.advance_cursor(
            batch.last_issued_seq_id.as_ref().and_then(value_to_string),
            batch.sync_token.clone(),
        );

        for event in events::decode_deltas(&batch) {
            match &event {
                Event::Message(message) => {
                    let own = message.sender_id == self.ctx.user_id();
                    if own && !self.ctx.options().self_listen {
                        continue;
                    }
                    if !own {
                        self.auto_acknowledge(message).await;
                    }
                }
                Event::ThreadName { .. }
                | Event::ParticipantsAdded { .. }
                | Event::ParticipantLeft { .. } => {
                    if !self.ctx.options().listen_events {
                        continue;
                    }
                }
                _ => {}
            }
            let _ = events_tx.send(Ok(event));
        }
    }

    /// Delivery/read receipts for inbound messages, per session options.
    /// Failures are logged and dropped; receipts are best-effort.
    async fn auto_acknowledge(&self, message: &msgr_protocol::MessageEvent) {
        if self.ctx.options().auto_mark_delivery {
            let tasks = actions::delivery_receipt_tasks(message);
            if let Err(e) = self.publish_tasks(tasks).await {
                debug!(error = %e, "auto delivery receipt failed");
            }
        }
        if self.ctx.options().auto_mark_read {
            let tasks = actions::read_receipt_tasks(&message.thread_id, message.timestamp);
            if let Err(e) = self.publish_tasks(tasks).await {
                debug!(error = %e, "auto read receipt failed");
            }
        }
    }
}

fn backoff_delay(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    policy
        .base
        .saturating_mul(2u32.saturating_pow(exp))
        .min(policy.cap)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
