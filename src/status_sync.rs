// src/status_sync.rs - Mirrors device state from the control plane to the status topic
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SyncConfig;
use crate::control_plane::{ControlPlaneConnector, ControlPlaneLink, status_query};
use crate::error::BridgeError;
use crate::messages::{Envelope, OutboundMethod};
use crate::pubsub::BridgeContext;
use crate::topics::{Qos, Topic};

/// One observation of device state, compared field-wise for change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterStatusSnapshot {
    pub state: String,
    pub message: String,
    pub print_stats: BTreeMap<String, Value>,
}

impl PrinterStatusSnapshot {
    /// Builds a snapshot from a `result.status` object. Returns `None` when
    /// neither `webhooks` nor `print_stats` is present.
    pub fn from_status(status: &Value) -> Option<Self> {
        let webhooks = status.get("webhooks");
        let print_stats = status.get("print_stats");
        if webhooks.is_none() && print_stats.is_none() {
            return None;
        }
        let field = |key: &str| webhooks.and_then(|w| w.get(key)).and_then(Value::as_str);
        Some(Self {
            state: field("state").unwrap_or("unknown").to_string(),
            message: field("state_message").unwrap_or("").to_string(),
            print_stats: print_stats
                .and_then(Value::as_object)
                .map(|stats| stats.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishDecision {
    /// Differs from the last published snapshot.
    Changed,
    /// Identical, but the repeat threshold was reached.
    Heartbeat,
    Suppressed,
}

/// Mutated only by the synchronizer and its staleness checker.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub connected: bool,
    pub last_update: Instant,
    pub repeat_count: u32,
    pub reconnect_pending: bool,
    previous: Option<PrinterStatusSnapshot>,
}

impl ConnectionState {
    pub fn new(now: Instant) -> Self {
        Self {
            connected: false,
            last_update: now,
            repeat_count: 0,
            reconnect_pending: false,
            previous: None,
        }
    }

    pub fn observe(&mut self, snapshot: PrinterStatusSnapshot, threshold: u32) -> PublishDecision {
        if self.previous.as_ref() != Some(&snapshot) {
            self.previous = Some(snapshot);
            self.repeat_count = 0;
            return PublishDecision::Changed;
        }
        self.repeat_count += 1;
        if self.repeat_count >= threshold {
            self.repeat_count = 0;
            PublishDecision::Heartbeat
        } else {
            PublishDecision::Suppressed
        }
    }

    pub fn previous(&self) -> Option<&PrinterStatusSnapshot> {
        self.previous.as_ref()
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_update = now;
    }

    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_update) > timeout
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

/// Delay before reconnect attempt `attempt` (1-based).
pub trait BackoffPolicy: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackoffPolicy for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

enum LinkOutcome {
    Closed,
    Shutdown,
}

pub struct StatusSynchronizer {
    ctx: BridgeContext,
    connector: Arc<dyn ControlPlaneConnector>,
    backoff: Arc<dyn BackoffPolicy>,
    settings: SyncConfig,
    state: Arc<Mutex<ConnectionState>>,
    next_request_id: Arc<AtomicU64>,
}

impl StatusSynchronizer {
    pub fn new(
        ctx: BridgeContext,
        connector: Arc<dyn ControlPlaneConnector>,
        backoff: Arc<dyn BackoffPolicy>,
    ) -> Self {
        let settings = ctx.config().sync.clone();
        Self {
            ctx,
            connector,
            backoff,
            settings,
            state: Arc::new(Mutex::new(ConnectionState::default())),
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn state_handle(&self) -> Arc<Mutex<ConnectionState>> {
        self.state.clone()
    }

    /// Connects, serves, and reconnects until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut attempt: u32 = 0;
        loop {
            let connected = tokio::select! {
                _ = shutdown.recv() => break,
                result = self.connector.connect() => result,
            };
            match connected {
                Ok(link) => {
                    attempt = 0;
                    tracing::info!("Control plane connected");
                    match self.serve(link, &mut shutdown).await {
                        LinkOutcome::Shutdown => break,
                        LinkOutcome::Closed => tracing::warn!("Control plane connection closed"),
                    }
                }
                Err(e) => tracing::error!("Control plane connection failed: {}", e),
            }

            attempt = attempt.saturating_add(1);
            self.state.lock().await.reconnect_pending = true;
            let delay = self.backoff.delay(attempt);
            tracing::info!(attempt, "Reconnecting to control plane in {:?}", delay);
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let mut state = self.state.lock().await;
        state.connected = false;
        state.reconnect_pending = false;
        tracing::info!("Status synchronizer stopped");
    }

    async fn serve(&self, link: ControlPlaneLink, shutdown: &mut broadcast::Receiver<()>) -> LinkOutcome {
        let (outbound, mut inbound, _guard) = link.into_parts();
        {
            let mut state = self.state.lock().await;
            state.connected = true;
            state.reconnect_pending = false;
            state.touch(Instant::now());
        }

        if let Err(e) = send_status_query(&outbound, &self.next_request_id).await {
            tracing::error!("Initial status query failed: {}", e);
            self.state.lock().await.connected = false;
            return LinkOutcome::Closed;
        }

        let (stop_tx, stop_rx) = broadcast::channel::<()>(1);
        let checker = tokio::spawn(check_staleness(
            self.state.clone(),
            outbound.clone(),
            self.next_request_id.clone(),
            self.settings.status_timeout(),
            self.settings.check_interval(),
            stop_rx,
        ));

        let outcome = loop {
            tokio::select! {
                _ = shutdown.recv() => break LinkOutcome::Shutdown,
                frame = inbound.recv() => match frame {
                    Some(text) => self.handle_frame(&text).await,
                    None => break LinkOutcome::Closed,
                },
            }
        };

        let _ = stop_tx.send(());
        if let Err(e) = checker.await {
            tracing::warn!("Staleness checker ended abnormally: {}", e);
        }
        self.state.lock().await.connected = false;
        outcome
    }

    async fn handle_frame(&self, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Control plane JSON parse error: {}", e);
                return;
            }
        };
        let Some(result) = frame.get("result") else {
            return;
        };
        let status = result.get("status").cloned().unwrap_or(Value::Null);
        let Some(snapshot) = PrinterStatusSnapshot::from_status(&status) else {
            tracing::warn!("Status frame lacks 'webhooks' and 'print_stats', ignoring");
            return;
        };

        let decision = {
            let mut state = self.state.lock().await;
            state.touch(Instant::now());
            state.observe(snapshot.clone(), self.settings.heartbeat_threshold)
        };
        match decision {
            PublishDecision::Changed => {
                tracing::info!("Printer status changed, publishing");
                self.publish_snapshot(&snapshot).await;
            }
            PublishDecision::Heartbeat => {
                tracing::debug!("Printer status unchanged for {} frames, republishing", self.settings.heartbeat_threshold);
                self.publish_snapshot(&snapshot).await;
            }
            PublishDecision::Suppressed => {}
        }
    }

    async fn publish_snapshot(&self, snapshot: &PrinterStatusSnapshot) {
        let envelope = Envelope::for_printer(OutboundMethod::PrinterStatus, snapshot, self.ctx.instance());
        self.ctx.publish(Topic::PrinterStatus, &envelope, Qos::AtLeastOnce, true).await;
    }
}

async fn send_status_query(outbound: &mpsc::Sender<String>, ids: &AtomicU64) -> Result<(), BridgeError> {
    let id = ids.fetch_add(1, Ordering::Relaxed);
    outbound
        .send(status_query(id).to_string())
        .await
        .map_err(|_| BridgeError::ControlPlane("connection closed".to_string()))
}

async fn check_staleness(
    state: Arc<Mutex<ConnectionState>>,
    outbound: mpsc::Sender<String>,
    ids: Arc<AtomicU64>,
    timeout: Duration,
    interval: Duration,
    mut stop: broadcast::Receiver<()>,
) {
    tracing::info!("Status staleness checker started");
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut checks: u64 = 0;
    loop {
        tokio::select! {
            _ = stop.recv() => {
                tracing::info!("Status staleness checker shutting down");
                break;
            }
            _ = ticker.tick() => {
                checks += 1;
                let stale = state.lock().await.is_stale(Instant::now(), timeout);
                if stale {
                    tracing::debug!(check = checks, "No status update within {:?}, re-querying", timeout);
                    if let Err(e) = send_status_query(&outbound, &ids).await {
                        tracing::error!("Status query failed: {}", e);
                    }
                }
            }
        }
    }
}
