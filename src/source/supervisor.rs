//! Connection supervisor for the push channel
//!
//! Owns the full connection lifecycle as a state machine:
//!
//! ```text
//! Idle -> Connecting -> Open -> Closed -> Reconnecting -> Failed(polling fallback)
//!                         ^                    |
//!                         +--------------------+
//! ```
//!
//! Reconnect delay is `min(base * 2^attempt, max)`; after the attempt
//! counter exceeds the maximum the supervisor enters `Failed` but delivery
//! does NOT stop: a polling fallback reuses the REST fetch at a coarser
//! interval while a long-interval timer (and a manual retry action) keep
//! re-attempting the push channel. A heartbeat is sent on quiet
//! connections; silence for twice the heartbeat interval forces a close so
//! dead connections are detected.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use super::poll::BackendClient;
use super::push::{PushConnection, PushConnector, PushMessage};
use crate::alert::record::SourceKind;
use crate::alert::reconciler::Reconciler;
use crate::alert::signal::ChangeSignal;
use crate::config::ConnectionConfig;
use crate::error::EngineError;

/// Internal connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
    Reconnecting,
    /// Push channel given up for now; polling fallback is active.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User-facing connectivity status derived from the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    /// Push channel is down but alerts still arrive via fallback polling.
    DegradedPolling,
}

impl ConnectionStatus {
    pub fn from_state(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Open => ConnectionStatus::Connected,
            ConnectionState::Failed => ConnectionStatus::DegradedPolling,
            _ => ConnectionStatus::Disconnected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::DegradedPolling => "degraded-polling",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Upper bound on a single connection handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Exponential backoff: `min(base * 2^attempt, max)`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    base.saturating_mul(factor).min(max)
}

/// Supervisor tuning knobs.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures tolerated before degrading to polling.
    pub max_attempts: u32,
    pub heartbeat_interval: Duration,
    /// Long-interval push retry while in Failed.
    pub failed_retry_interval: Duration,
    /// Fallback polling cadence while in Failed.
    pub fallback_poll_interval: Duration,
    pub page_size: usize,
    /// Identification sent in the subscribe message after handshake.
    pub client_id: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            heartbeat_interval: Duration::from_secs(30),
            failed_retry_interval: Duration::from_secs(300),
            fallback_poll_interval: Duration::from_secs(30),
            page_size: 50,
            client_id: format!("aam-{}", std::process::id()),
        }
    }
}

impl SupervisorConfig {
    pub fn from_connection_config(config: &ConnectionConfig, page_size: usize) -> Self {
        Self {
            base_delay: Duration::from_secs(config.reconnect_base_secs),
            max_delay: Duration::from_secs(config.reconnect_max_secs),
            max_attempts: config.max_reconnect_attempts,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            failed_retry_interval: Duration::from_secs(config.failed_retry_interval_secs),
            fallback_poll_interval: Duration::from_secs(config.fallback_poll_interval_secs),
            page_size,
            client_id: format!("aam-{}", std::process::id()),
        }
    }
}

/// Outcome of one select round inside an open connection.
enum ServeStep {
    Stop,
    Quiet,
    Noop,
    Inbound(Result<Option<PushMessage>, EngineError>),
}

/// Outcome of one select round inside the polling fallback.
enum FallbackStep {
    Stop,
    Retry,
    Poll,
    Noop,
}

/// Push connection supervisor.
pub struct ConnectionSupervisor {
    connector: Arc<dyn PushConnector>,
    reconciler: Arc<Reconciler>,
    fallback_client: Arc<BackendClient>,
    config: SupervisorConfig,
    state_tx: watch::Sender<ConnectionState>,
    stop_rx: watch::Receiver<bool>,
    retry: Arc<Notify>,
    /// File-based manual retry signal (`aam retry-push` from another process).
    retry_signal: Option<ChangeSignal>,
}

impl ConnectionSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector: Arc<dyn PushConnector>,
        reconciler: Arc<Reconciler>,
        fallback_client: Arc<BackendClient>,
        config: SupervisorConfig,
        state_tx: watch::Sender<ConnectionState>,
        stop_rx: watch::Receiver<bool>,
        retry_signal: Option<ChangeSignal>,
    ) -> Self {
        Self {
            connector,
            reconciler,
            fallback_client,
            config,
            state_tx,
            stop_rx,
            retry: Arc::new(Notify::new()),
            retry_signal,
        }
    }

    /// Handle for requesting an immediate push retry while degraded.
    pub fn retry_handle(&self) -> Arc<Notify> {
        self.retry.clone()
    }

    fn stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        if *self.state_tx.borrow() != state {
            info!(state = %state, "Push connection state changed");
            let _ = self.state_tx.send(state);
        }
    }

    /// Main supervision loop. Runs until the stop signal fires.
    pub async fn run(mut self) {
        let mut attempts: u32 = 0;
        loop {
            if self.stopped() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            // A stop request cancels an in-flight connection attempt; a
            // bounded handshake keeps unresponsive hosts from wedging the
            // state machine.
            let connect_result = {
                let mut stop = self.stop_rx.clone();
                tokio::select! {
                    res = stop.changed() => {
                        if res.is_err() || *stop.borrow() {
                            break;
                        }
                        continue;
                    }
                    res = tokio::time::timeout(CONNECT_TIMEOUT, self.connector.connect()) => res,
                }
            };

            match connect_result {
                Err(_) => {
                    warn!(
                        timeout_secs = CONNECT_TIMEOUT.as_secs(),
                        "Push connection handshake timed out"
                    );
                    self.set_state(ConnectionState::Closed);
                }
                Ok(Ok(mut conn)) => {
                    let subscribe = PushMessage::Subscribe {
                        client: self.config.client_id.clone(),
                    };
                    match conn.send(&subscribe).await {
                        Ok(()) => {
                            // Successful handshake resets the attempt counter.
                            attempts = 0;
                            self.set_state(ConnectionState::Open);
                            self.serve_connection(conn.as_mut()).await;
                        }
                        Err(e) => warn!(error = %e, "Failed to send subscribe message"),
                    }
                    self.set_state(ConnectionState::Closed);
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Push connection attempt failed");
                    self.set_state(ConnectionState::Closed);
                }
            }

            if self.stopped() {
                break;
            }

            attempts += 1;
            if attempts > self.config.max_attempts {
                self.set_state(ConnectionState::Failed);
                self.run_fallback().await;
                if self.stopped() {
                    break;
                }
                // One retry round per trigger; a failed retry drops straight
                // back into the polling fallback.
                attempts = self.config.max_attempts;
                continue;
            }

            self.set_state(ConnectionState::Reconnecting);
            let delay = backoff_delay(attempts - 1, self.config.base_delay, self.config.max_delay);
            info!(
                attempt = attempts,
                delay_secs = delay.as_secs(),
                "Scheduling push reconnect"
            );
            if self.sleep_or_stop(delay).await {
                break;
            }
        }
        debug!("Connection supervisor stopped");
    }

    /// Serve an open connection until it dies, the heartbeat times out, or
    /// the stop signal fires.
    async fn serve_connection(&mut self, conn: &mut dyn PushConnection) {
        let heartbeat = self.config.heartbeat_interval;
        let mut last_seen = tokio::time::Instant::now();

        loop {
            let step = tokio::select! {
                res = self.stop_rx.changed() => {
                    if res.is_err() || *self.stop_rx.borrow() {
                        ServeStep::Stop
                    } else {
                        ServeStep::Noop
                    }
                }
                res = tokio::time::timeout(heartbeat, conn.next_message()) => match res {
                    Ok(inbound) => ServeStep::Inbound(inbound),
                    Err(_) => ServeStep::Quiet,
                },
            };

            match step {
                ServeStep::Stop => return,
                ServeStep::Noop => continue,
                ServeStep::Quiet => {
                    // No traffic for one heartbeat interval: check liveness,
                    // then ping.
                    if last_seen.elapsed() >= heartbeat * 2 {
                        warn!("Heartbeat timed out, forcing close to trigger reconnect");
                        return;
                    }
                    if conn.send(&PushMessage::Heartbeat).await.is_err() {
                        return;
                    }
                }
                ServeStep::Inbound(Ok(Some(message))) => {
                    last_seen = tokio::time::Instant::now();
                    match message {
                        PushMessage::NewAlert { payload } => {
                            let record = payload.into_record(SourceKind::Push);
                            self.reconciler.reconcile(vec![record], SourceKind::Push);
                        }
                        PushMessage::UpdateAlert { payload } => {
                            self.reconciler.apply_patch(&payload);
                        }
                        PushMessage::Heartbeat => {
                            let _ = conn.send(&PushMessage::Pong).await;
                        }
                        PushMessage::ConnectionAck | PushMessage::Pong => {}
                        PushMessage::Subscribe { .. } | PushMessage::Unknown => {
                            debug!("Ignoring non-alert push message");
                        }
                    }
                }
                ServeStep::Inbound(Ok(None)) => {
                    info!("Push connection closed by remote");
                    return;
                }
                ServeStep::Inbound(Err(e)) => {
                    warn!(error = %e, "Push connection read failed");
                    return;
                }
            }
        }
    }

    /// Degraded mode: poll the REST endpoint until a retry is requested
    /// (manual action, retry signal file, or the long-interval timer).
    async fn run_fallback(&mut self) {
        warn!(
            retry_secs = self.config.failed_retry_interval.as_secs(),
            "Push channel exhausted reconnect attempts, degrading to polling"
        );
        let mut ticker = tokio::time::interval(self.config.fallback_poll_interval);
        let retry_timer =
            tokio::time::sleep_until(tokio::time::Instant::now() + self.config.failed_retry_interval);
        tokio::pin!(retry_timer);

        loop {
            let step = tokio::select! {
                res = self.stop_rx.changed() => {
                    if res.is_err() || *self.stop_rx.borrow() {
                        FallbackStep::Stop
                    } else {
                        FallbackStep::Noop
                    }
                }
                _ = self.retry.notified() => FallbackStep::Retry,
                _ = &mut retry_timer => FallbackStep::Retry,
                _ = ticker.tick() => FallbackStep::Poll,
            };

            match step {
                FallbackStep::Stop => return,
                FallbackStep::Noop => continue,
                FallbackStep::Retry => {
                    info!("Attempting to restore push channel");
                    return;
                }
                FallbackStep::Poll => {
                    // A cross-process retry request arrives via the signal file.
                    if let Some(signal) = self.retry_signal.as_mut() {
                        if signal.changed() {
                            info!("Manual retry signal observed");
                            return;
                        }
                    }
                    match self.fallback_client.fetch_alerts(self.config.page_size).await {
                        Ok(wire_alerts) => {
                            let records = wire_alerts
                                .into_iter()
                                .map(|w| w.into_record(SourceKind::Poll))
                                .collect();
                            self.reconciler.reconcile(records, SourceKind::Poll);
                        }
                        Err(e) => warn!(error = %e, "Fallback poll failed"),
                    }
                }
            }
        }
    }

    async fn sleep_or_stop(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            res = self.stop_rx.changed() => res.is_err() || *self.stop_rx.borrow(),
        }
    }
}
