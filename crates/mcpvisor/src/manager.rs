//! Lifecycle controller for MCP servers.
//!
//! Every server id gets a [`Slot`]. The slot's async mutex serializes
//! lifecycle operations on that id and owns the live transport; operations
//! on different ids run in parallel. The in-flight connect token lives
//! outside that mutex so `stop` can interrupt a `start` that is still
//! waiting on its adapter.

use crate::config::ManagerConfig;
use crate::error::{McpError, McpResult};
use crate::quarantine::QuarantinePolicy;
use crate::registry::ServerRegistry;
use crate::server::{ServerConfig, ServerId, ServerState};
use crate::status::{ConnectivityReport, ServerSnapshot, ServerStatus};
use crate::tracker::{EventLevel, HealthTracker, TrackerEvent, DEFAULT_EVENT_LIMIT};
use crate::transport::{DefaultTransportFactory, Transport, TransportError, TransportFactory};
use futures::future::join_all;
use mcpvisor_util::{Clock, SystemClock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-id synchronization point.
struct Slot {
    /// Held for the whole of start/stop/edit; owns the live transport.
    op: tokio::sync::Mutex<Option<Box<dyn Transport>>>,
    /// Token of the connect currently in flight.
    connecting: Mutex<Option<CancellationToken>>,
    /// Token of the running health monitor.
    monitor: Mutex<Option<CancellationToken>>,
    /// Bumped by every `stop`, so a `start` queued before it backs off.
    stop_epoch: AtomicU64,
    snapshot: watch::Sender<ServerSnapshot>,
}

impl Slot {
    fn new() -> Self {
        let (snapshot, _) = watch::channel(ServerSnapshot::default());
        Self {
            op: tokio::sync::Mutex::new(None),
            connecting: Mutex::new(None),
            monitor: Mutex::new(None),
            stop_epoch: AtomicU64::new(0),
            snapshot,
        }
    }

    fn state(&self) -> ServerState {
        self.snapshot.borrow().state
    }

    fn set_connecting(&self, token: Option<CancellationToken>) {
        *self
            .connecting
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    fn cancel_connect(&self) {
        let token = self
            .connecting
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    fn set_monitor(&self, token: CancellationToken) {
        let previous = self
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(token);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    /// Make any queued start back off and wake anything in flight.
    fn interrupt(&self) {
        self.stop_epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel_connect();
        self.cancel_monitor();
    }

    fn cancel_monitor(&self) {
        let token = self
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }
}

/// Tracker, quarantine and clock, shared with the monitor tasks.
#[derive(Clone)]
struct Supervisor {
    tracker: Arc<HealthTracker>,
    quarantine: Arc<QuarantinePolicy>,
    clock: Arc<dyn Clock>,
}

impl Supervisor {
    fn event(&self, id: &ServerId, level: EventLevel, message: impl Into<String>) {
        self.tracker
            .record_event(id, level, message, self.clock.now());
    }

    fn publish(&self, id: &ServerId, slot: &Slot) {
        slot.snapshot.send_replace(ServerSnapshot {
            state: self.tracker.state(id),
            quarantined: self.quarantine.state(id).quarantined,
            error_message: self.tracker.error_message(id),
        });
    }

    fn transition(
        &self,
        id: &ServerId,
        slot: &Slot,
        state: ServerState,
        level: EventLevel,
        message: impl Into<String>,
    ) {
        let now = self.clock.now();
        self.tracker.set_state(id, state, now);
        self.tracker.record_event(id, level, message, now);
        self.publish(id, slot);
    }

    /// Record a failed start or healthcheck and feed the circuit breaker.
    fn fail(&self, id: &ServerId, slot: &Slot, name: &str, message: String) {
        let now = self.clock.now();
        warn!(server = %name, id = %id, error = %message, "MCP server failed");
        self.tracker.set_state(id, ServerState::Error, now);
        self.tracker.set_error(id, Some(message.clone()));
        self.tracker
            .record_event(id, EventLevel::Error, message, now);

        if self.quarantine.on_failure(id, now) {
            let failures = self.quarantine.state(id).consecutive_failure_count;
            warn!(server = %name, id = %id, failures, "MCP server quarantined");
            self.tracker.record_event(
                id,
                EventLevel::Warn,
                format!("Quarantined after {failures} consecutive failures"),
                now,
            );
        }
        self.publish(id, slot);
    }
}

/// Disconnect within `timeout`, force-terminating if that fails.
async fn teardown(transport: &mut dyn Transport, timeout: Duration) -> Result<(), String> {
    let reason = match tokio::time::timeout(timeout, transport.disconnect()).await {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => e.message,
        Err(_) => TransportError::timeout("disconnect", timeout).message,
    };
    transport.force_terminate().await;
    Err(reason)
}

/// Run a lifecycle transition on its own task so it completes even if the
/// caller stops polling. Panics in the task resurface in the caller.
async fn detached<T, F>(transition: F) -> T
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    match tokio::spawn(transition).await {
        Ok(value) => value,
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}

/// Timing used by the background health monitor.
#[derive(Debug, Clone, Copy)]
struct MonitorTiming {
    grace: Duration,
    interval: Duration,
    health_timeout: Duration,
    teardown: Duration,
}

/// Health monitor for one running server.
///
/// After the grace period the first passing healthcheck resets the
/// server's failure count; any failing check moves it to `Error` and
/// releases the transport. Exits when `token` is cancelled.
async fn monitor(
    supervisor: Supervisor,
    slot: Arc<Slot>,
    id: ServerId,
    name: String,
    token: CancellationToken,
    timing: MonitorTiming,
) {
    let mut delay = timing.grace;
    let mut confirmed = false;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = timing.interval;

        let mut live = slot.op.lock().await;
        if token.is_cancelled() {
            return;
        }
        let Some(transport) = live.as_mut() else {
            return;
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            result = tokio::time::timeout(timing.health_timeout, transport.healthcheck()) => {
                match result {
                    Ok(result) => result.map_err(|e| e.message),
                    Err(_) => Err(TransportError::timeout("healthcheck", timing.health_timeout).message),
                }
            }
        };

        match outcome {
            Ok(()) if confirmed => {
                debug!(server = %name, "Healthcheck passed");
            }
            Ok(()) => {
                confirmed = true;
                supervisor.quarantine.on_success(&id);
                supervisor.event(&id, EventLevel::Info, "Healthy after grace period");
                supervisor.publish(&id, &slot);
                debug!(server = %name, id = %id, "MCP server passed grace period");
            }
            Err(message) => {
                if let Some(mut transport) = live.take() {
                    if let Err(e) = teardown(transport.as_mut(), timing.teardown).await {
                        debug!(server = %name, error = %e, "Teardown after failed healthcheck was forced");
                    }
                }
                supervisor.fail(&id, &slot, &name, format!("Healthcheck failed: {message}"));
                return;
            }
        }
    }
}

/// Starts, stops and watches the MCP servers of one registry.
///
/// The manager owns the registry plus all runtime state (tracker,
/// quarantine, live transports). Independent managers don't share
/// anything, so several can run in one process.
#[derive(Clone)]
pub struct McpManager {
    config: ManagerConfig,
    registry: Arc<RwLock<ServerRegistry>>,
    supervisor: Supervisor,
    factory: Arc<dyn TransportFactory>,
    slots: Arc<Mutex<HashMap<ServerId, Arc<Slot>>>>,
}

impl McpManager {
    /// Create a manager with the system clock and the real adapters.
    pub fn new(registry: ServerRegistry, config: ManagerConfig) -> Self {
        let quarantine = QuarantinePolicy::new(
            config.quarantine_threshold,
            config.quarantine_cooldown(),
        );
        Self {
            config,
            registry: Arc::new(RwLock::new(registry)),
            supervisor: Supervisor {
                tracker: Arc::new(HealthTracker::new()),
                quarantine: Arc::new(quarantine),
                clock: Arc::new(SystemClock::new()),
            },
            factory: Arc::new(DefaultTransportFactory::new()),
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replace the clock used for events, uptime and quarantine cooldown.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.supervisor.clock = clock;
        self
    }

    /// Replace the factory that builds transport adapters.
    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn tracker(&self) -> &HealthTracker {
        &self.supervisor.tracker
    }

    pub fn quarantine(&self) -> &QuarantinePolicy {
        &self.supervisor.quarantine
    }

    fn slot(&self, id: &ServerId) -> Arc<Slot> {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(slots.entry(id.clone()).or_insert_with(|| {
            let slot = Arc::new(Slot::new());
            self.supervisor.publish(id, &slot);
            slot
        }))
    }

    fn existing_slot(&self, id: &ServerId) -> Option<Arc<Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }

    async fn config_for(&self, id: &ServerId) -> McpResult<ServerConfig> {
        self.registry
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| McpError::not_found(id.as_str()))
    }

    fn monitor_timing(&self) -> MonitorTiming {
        MonitorTiming {
            grace: self.config.grace_period(),
            interval: self.config.health_interval(),
            health_timeout: self.config.health_timeout(),
            teardown: self.config.teardown_timeout(),
        }
    }

    /// Start a server and return the state it ended up in.
    ///
    /// Adapter failures are not errors: they leave the server in
    /// [`ServerState::Error`] with the message in its status. Errors are
    /// reserved for unknown, disabled and quarantined servers.
    ///
    /// The transition runs on its own task. Dropping the returned future
    /// does not abandon it; the server still settles in `Running`,
    /// `Error` or `Stopping`.
    pub async fn start(&self, id: &ServerId) -> McpResult<ServerState> {
        let config = self.config_for(id).await?;
        if !config.enabled {
            return Err(McpError::Disabled(config.name));
        }

        let slot = self.slot(id);
        let current = slot.state();
        if matches!(current, ServerState::Running | ServerState::Starting) {
            return Ok(current);
        }
        let epoch = slot.stop_epoch.load(Ordering::SeqCst);

        let manager = self.clone();
        let id = id.clone();
        detached(async move { manager.run_start(slot, id, epoch).await }).await
    }

    async fn run_start(&self, slot: Arc<Slot>, id: ServerId, epoch: u64) -> McpResult<ServerState> {
        let id = &id;
        let mut live = slot.op.lock().await;

        // Re-read under the lock: an edit or uninstall may have landed
        // while this start was queued.
        let config = self.config_for(id).await?;
        if !config.enabled {
            return Err(McpError::Disabled(config.name));
        }
        let current = slot.state();
        if matches!(current, ServerState::Running | ServerState::Starting) {
            return Ok(current);
        }

        let supervisor = &self.supervisor;
        if supervisor
            .quarantine
            .is_quarantined(id, supervisor.clock.now())
        {
            info!(server = %config.name, id = %id, "Refusing to start quarantined MCP server");
            supervisor.publish(id, &slot);
            return Err(McpError::Quarantined(config.name));
        }

        let token = CancellationToken::new();
        slot.set_connecting(Some(token.clone()));
        if slot.stop_epoch.load(Ordering::SeqCst) != epoch {
            // A stop arrived while we were queued.
            slot.set_connecting(None);
            return Ok(current);
        }

        // Leftovers from an earlier run that was never stopped cleanly.
        if let Some(mut stale) = live.take() {
            stale.force_terminate().await;
        }

        let timeout = config.timeout(self.config.default_timeout_secs);
        info!(server = %config.name, id = %id, kind = %config.kind(), "Starting MCP server");
        supervisor.transition(
            id,
            &slot,
            ServerState::Starting,
            EventLevel::Info,
            format!("Starting {} server", config.kind()),
        );

        let mut transport = match self.factory.create(&config, timeout) {
            Ok(transport) => transport,
            Err(e) => {
                slot.set_connecting(None);
                supervisor.fail(id, &slot, &config.name, format!("Start failed: {e}"));
                return Ok(ServerState::Error);
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = tokio::time::timeout(timeout, transport.connect()) => Some(match result {
                Ok(result) => result,
                Err(_) => Err(TransportError::timeout("connect", timeout)),
            }),
        };
        slot.set_connecting(None);

        match outcome {
            None => {
                // The stop waiting on this lock tears the transport down.
                debug!(server = %config.name, id = %id, "Start cancelled by stop");
                *live = Some(transport);
                supervisor.transition(
                    id,
                    &slot,
                    ServerState::Stopping,
                    EventLevel::Info,
                    "Start cancelled",
                );
                Ok(ServerState::Stopping)
            }
            Some(Err(e)) => {
                transport.force_terminate().await;
                supervisor.fail(id, &slot, &config.name, format!("Start failed: {e}"));
                Ok(ServerState::Error)
            }
            Some(Ok(())) => {
                let mut metadata = vec![("transport".to_string(), config.kind().to_string())];
                metadata.extend(transport.metadata());
                supervisor.tracker.set_metadata(id, metadata);
                *live = Some(transport);

                info!(server = %config.name, id = %id, "MCP server running");
                supervisor.transition(
                    id,
                    &slot,
                    ServerState::Running,
                    EventLevel::Info,
                    "Server running",
                );

                let monitor_token = CancellationToken::new();
                slot.set_monitor(monitor_token.clone());
                tokio::spawn(monitor(
                    supervisor.clone(),
                    Arc::clone(&slot),
                    id.clone(),
                    config.name.clone(),
                    monitor_token,
                    self.monitor_timing(),
                ));
                Ok(ServerState::Running)
            }
        }
    }

    /// Stop a server. Always ends in [`ServerState::Stopped`]; a disconnect
    /// that fails or overruns the teardown timeout is force-terminated.
    pub async fn stop(&self, id: &ServerId) -> McpResult<ServerState> {
        let config = self.config_for(id).await?;
        let manager = self.clone();
        let id = id.clone();
        detached(async move {
            let slot = manager.slot(&id);
            slot.interrupt();
            let mut live = slot.op.lock().await;
            Ok(manager.stop_locked(&id, &config.name, &slot, &mut live).await)
        })
        .await
    }

    /// Tear down whatever the slot holds. The caller owns the op lock.
    async fn stop_locked(
        &self,
        id: &ServerId,
        name: &str,
        slot: &Slot,
        live: &mut Option<Box<dyn Transport>>,
    ) -> ServerState {
        let supervisor = &self.supervisor;

        match slot.state() {
            ServerState::Stopped => {
                if let Some(mut stale) = live.take() {
                    stale.force_terminate().await;
                }
                return ServerState::Stopped;
            }
            ServerState::Error => {
                if let Some(mut stale) = live.take() {
                    stale.force_terminate().await;
                }
                supervisor.tracker.set_error(id, None);
                supervisor.transition(
                    id,
                    slot,
                    ServerState::Stopped,
                    EventLevel::Info,
                    "Server stopped",
                );
                return ServerState::Stopped;
            }
            ServerState::Starting | ServerState::Running | ServerState::Stopping => {}
        }

        info!(server = %name, id = %id, "Stopping MCP server");
        if slot.state() != ServerState::Stopping {
            supervisor.transition(
                id,
                slot,
                ServerState::Stopping,
                EventLevel::Info,
                "Stopping server",
            );
        }

        if let Some(mut transport) = live.take() {
            let timeout = self.config.teardown_timeout();
            if let Err(reason) = teardown(transport.as_mut(), timeout).await {
                warn!(server = %name, id = %id, reason = %reason, "Forced stop of MCP server");
                supervisor.event(id, EventLevel::Warn, format!("Forced stop: {reason}"));
            }
        }

        supervisor.tracker.set_error(id, None);
        supervisor.transition(
            id,
            slot,
            ServerState::Stopped,
            EventLevel::Info,
            "Server stopped",
        );
        info!(server = %name, id = %id, "MCP server stopped");
        ServerState::Stopped
    }

    /// Stop, then start.
    pub async fn restart(&self, id: &ServerId) -> McpResult<ServerState> {
        self.stop(id).await?;
        self.start(id).await
    }

    /// Connect and immediately disconnect a throwaway adapter for a
    /// registered server. Runtime state is left untouched.
    pub async fn test_connectivity(&self, id: &ServerId) -> McpResult<ConnectivityReport> {
        let config = self.config_for(id).await?;
        self.test_config(&config).await
    }

    /// Connectivity test for a config that isn't registered (yet).
    pub async fn test_config(&self, config: &ServerConfig) -> McpResult<ConnectivityReport> {
        config.validate()?;
        let timeout = config.timeout(self.config.default_timeout_secs);
        let started = tokio::time::Instant::now();

        let mut transport = match self.factory.create(config, timeout) {
            Ok(transport) => transport,
            Err(e) => return Ok(ConnectivityReport::failed(started.elapsed(), e.message)),
        };

        let result = match tokio::time::timeout(timeout, transport.connect()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout("connect", timeout)),
        };
        let latency = started.elapsed();

        match result {
            Ok(()) => {
                if let Err(e) = teardown(transport.as_mut(), self.config.teardown_timeout()).await {
                    debug!(server = %config.name, error = %e, "Connectivity test teardown was forced");
                }
                debug!(server = %config.name, latency_ms = latency.as_millis() as u64, "Connectivity test passed");
                Ok(ConnectivityReport::passed(latency))
            }
            Err(e) => {
                transport.force_terminate().await;
                debug!(server = %config.name, error = %e, "Connectivity test failed");
                Ok(ConnectivityReport::failed(latency, e.message))
            }
        }
    }

    /// State, quarantine flag and error as one consistent snapshot.
    fn snapshot_for(&self, id: &ServerId) -> ServerSnapshot {
        let supervisor = &self.supervisor;
        let now = supervisor.clock.now();
        match self.existing_slot(id) {
            Some(slot) => {
                let published = slot.snapshot.borrow().clone();
                if published.quarantined && !supervisor.quarantine.is_quarantined(id, now) {
                    // Cooldown ran out since the last transition.
                    supervisor.publish(id, &slot);
                    return slot.snapshot.borrow().clone();
                }
                published
            }
            // Never started, so nothing has been published yet.
            None => ServerSnapshot {
                state: supervisor.tracker.state(id),
                quarantined: supervisor.quarantine.is_quarantined(id, now),
                error_message: supervisor.tracker.error_message(id),
            },
        }
    }

    fn status_for(&self, config: &ServerConfig) -> ServerStatus {
        let tracker = &self.supervisor.tracker;
        let id = &config.id;
        let snapshot = self.snapshot_for(id);
        let record = tracker.record(id).unwrap_or_default();

        ServerStatus {
            exists: true,
            name: Some(config.name.clone()),
            kind: Some(config.kind()),
            state: snapshot.state,
            enabled: config.enabled,
            quarantined: snapshot.quarantined,
            error_message: snapshot.error_message,
            uptime: tracker.uptime(id, self.supervisor.clock.now()),
            recent_events_count: record.recent_events.len(),
            recent_events: record
                .recent_events
                .into_iter()
                .take(DEFAULT_EVENT_LIMIT)
                .collect(),
            metadata: record.metadata,
        }
    }

    /// Status of a server. Unknown ids report `exists: false`.
    pub async fn get_status(&self, id: &ServerId) -> ServerStatus {
        let registry = self.registry.read().await;
        match registry.get(id) {
            Some(config) => self.status_for(config),
            None => ServerStatus::missing(),
        }
    }

    /// Status of every registered server, sorted by name.
    pub async fn list_status(&self, include_disabled: bool) -> Vec<ServerStatus> {
        let registry = self.registry.read().await;
        registry
            .list(include_disabled)
            .iter()
            .map(|config| self.status_for(config))
            .collect()
    }

    /// Up to `limit` most recent events of a server.
    pub async fn logs(&self, id: &ServerId, limit: usize) -> McpResult<Vec<TrackerEvent>> {
        self.config_for(id).await?;
        Ok(self.supervisor.tracker.recent_events(id, limit))
    }

    /// Lift a quarantine by hand.
    pub async fn clear_quarantine(&self, id: &ServerId) -> McpResult<()> {
        let config = self.config_for(id).await?;
        self.supervisor.quarantine.clear(id);
        self.supervisor
            .event(id, EventLevel::Info, "Quarantine cleared");
        if let Some(slot) = self.existing_slot(id) {
            self.supervisor.publish(id, &slot);
        }
        info!(server = %config.name, id = %id, "Quarantine cleared");
        Ok(())
    }

    /// Forget a server's event history.
    pub async fn reset_history(&self, id: &ServerId) -> McpResult<()> {
        self.config_for(id).await?;
        self.supervisor.tracker.reset(id);
        if let Some(slot) = self.existing_slot(id) {
            self.supervisor.publish(id, &slot);
        }
        Ok(())
    }

    /// Register a new server.
    pub async fn install(&self, config: ServerConfig) -> McpResult<ServerId> {
        let name = config.name.clone();
        let id = self.registry.write().await.register(config).await?;
        info!(server = %name, id = %id, "Installed MCP server");
        Ok(id)
    }

    /// Replace a server's config. A running server keeps its current
    /// connection until restarted.
    pub async fn edit(&self, id: &ServerId, config: ServerConfig) -> McpResult<bool> {
        let slot = self.slot(id);
        let _guard = slot.op.lock().await;
        self.registry.write().await.update(id, config).await
    }

    /// Stop (if needed) and remove a server along with all its runtime
    /// state. Returns `false` for an unknown id.
    ///
    /// The stop and the removal happen under one hold of the server's
    /// lock, so a start queued behind them finds the server gone.
    pub async fn uninstall(&self, id: &ServerId) -> McpResult<bool> {
        let Some(config) = self.registry.read().await.get(id).cloned() else {
            return Ok(false);
        };
        let manager = self.clone();
        let id = id.clone();
        detached(async move { manager.run_uninstall(id, config.name).await }).await
    }

    async fn run_uninstall(&self, id: ServerId, name: String) -> McpResult<bool> {
        let slot = self.slot(&id);
        slot.interrupt();
        let mut live = slot.op.lock().await;
        self.stop_locked(&id, &name, &slot, &mut live).await;

        if !self.registry.write().await.remove(&id).await? {
            return Ok(false);
        }
        self.supervisor.tracker.forget(&id);
        self.supervisor.quarantine.forget(&id);
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);
        info!(server = %name, id = %id, "Uninstalled MCP server");
        Ok(true)
    }

    /// Resolve a display name to its id.
    pub async fn find_id(&self, name: &str) -> Option<ServerId> {
        self.registry
            .read()
            .await
            .get_by_name(name)
            .map(|c| c.id.clone())
    }

    /// Registered configs, sorted by name.
    pub async fn servers(&self, include_disabled: bool) -> Vec<ServerConfig> {
        self.registry.read().await.list(include_disabled)
    }

    /// Watch a server's state transitions.
    pub async fn subscribe(&self, id: &ServerId) -> McpResult<watch::Receiver<ServerSnapshot>> {
        self.config_for(id).await?;
        Ok(self.slot(id).snapshot.subscribe())
    }

    /// Stop every live server concurrently.
    pub async fn shutdown(&self) {
        let live: Vec<ServerId> = {
            let slots = self
                .slots
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slots
                .iter()
                .filter(|(_, slot)| slot.state() != ServerState::Stopped)
                .map(|(id, _)| id.clone())
                .collect()
        };
        if live.is_empty() {
            return;
        }

        info!(count = live.len(), "Shutting down MCP servers");
        let results = join_all(live.iter().map(|id| self.stop(id))).await;
        for (id, result) in live.iter().zip(results) {
            if let Err(e) = result {
                warn!(id = %id, error = %e, "Failed to stop MCP server during shutdown");
            }
        }
    }
}
