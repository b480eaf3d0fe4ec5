use async_trait::async_trait;
use log::{debug, info, warn};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval, sleep};

const MAX_RETRY_DELAY_MS: u64 = 25_000;

#[async_trait]
pub trait HealthCallback: Send + Sync {
    /// Send a liveness probe. Only meaningful while connected; the
    /// implementation is expected to no-op otherwise.
    async fn check(&self);

    /// Drive recovery after prolonged silence.
    async fn reconnect(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthMonitorConfig {
    /// How often to send a health-check probe.
    pub check_interval: Duration,
    /// How often to test for silence.
    pub monitor_interval: Duration,
    /// Silence beyond this means the event stream is gone.
    pub no_event_threshold: Duration,
}

impl HealthMonitorConfig {
    pub const COORDINATOR: Self = Self {
        check_interval: Duration::from_secs(10),
        monitor_interval: Duration::from_secs(1),
        no_event_threshold: Duration::from_secs(30),
    };

    pub const MEDIA: Self = Self {
        check_interval: Duration::from_secs(5),
        monitor_interval: Duration::from_secs(1),
        no_event_threshold: Duration::from_secs(15),
    };
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self::COORDINATOR
    }
}

struct MonitorState {
    last_ack: std::sync::Mutex<Instant>,
    disconnected: AtomicBool,
    consecutive_failures: AtomicU32,
    reconnect_in_flight: AtomicBool,
    pending_reconnect: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MonitorState {
    fn needs_reconnect(&self, threshold: Duration) -> bool {
        self.disconnected.load(Ordering::SeqCst)
            || self.last_ack.lock().unwrap().elapsed() >= threshold
    }
}

/// Detects silent or broken connections and drives recovery.
///
/// Two loops run while started: the check loop sends a probe every
/// `check_interval`, and the monitor loop tests every `monitor_interval`
/// whether anything was heard within `no_event_threshold`. Silence
/// schedules the reconnect callback after a jittered backoff delay that
/// grows with the consecutive-failure count; a single-flight guard keeps
/// at most one reconnect attempt pending at a time.
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    state: Arc<MonitorState>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig) -> Self {
        Self {
            config,
            state: Arc::new(MonitorState {
                last_ack: std::sync::Mutex::new(Instant::now()),
                disconnected: AtomicBool::new(false),
                consecutive_failures: AtomicU32::new(0),
                reconnect_in_flight: AtomicBool::new(false),
                pending_reconnect: std::sync::Mutex::new(None),
            }),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Start (or restart) both loops. Resets the silence clock.
    pub fn start(&self, callback: Arc<dyn HealthCallback>) {
        self.stop();
        self.ack();
        debug!(target: "callsig::health", "starting health monitor: {:?}", self.config);

        let check_state = self.state.clone();
        let check_callback = callback.clone();
        let check_interval = self.config.check_interval;
        let check_task = tokio::spawn(async move {
            let mut ticker = interval(check_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !check_state.disconnected.load(Ordering::SeqCst) {
                    check_callback.check().await;
                }
            }
        });

        let monitor_state = self.state.clone();
        let monitor_interval = self.config.monitor_interval;
        let threshold = self.config.no_event_threshold;
        let monitor_task = tokio::spawn(async move {
            let mut ticker = interval(monitor_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if monitor_state.needs_reconnect(threshold) {
                    schedule_reconnect(&monitor_state, &callback);
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(check_task);
        tasks.push(monitor_task);
    }

    /// Record that an inbound event/frame arrived: resets the silence
    /// clock and the failure counter.
    pub fn ack(&self) {
        *self.state.last_ack.lock().unwrap() = Instant::now();
        self.state.disconnected.store(false, Ordering::SeqCst);
        self.state.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// Arm the monitor so the next tick immediately considers a reconnect.
    pub fn on_disconnected(&self) {
        self.state.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.lock().unwrap().is_empty()
    }

    /// Cancel both loops and any pending reconnect. Idempotent.
    pub fn stop(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
        if let Some(pending) = self.state.pending_reconnect.lock().unwrap().take() {
            pending.abort();
        }
        self.state.reconnect_in_flight.store(false, Ordering::SeqCst);
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn schedule_reconnect(state: &Arc<MonitorState>, callback: &Arc<dyn HealthCallback>) {
    if state.reconnect_in_flight.swap(true, Ordering::SeqCst) {
        return;
    }

    let failures = state.consecutive_failures.load(Ordering::SeqCst);
    let delay = retry_delay(failures);
    info!(
        target: "callsig::health",
        "no events received within threshold, reconnecting in {delay:?} (failures: {failures})"
    );

    let task_state = state.clone();
    let task_callback = callback.clone();
    let task = tokio::spawn(async move {
        let release = scopeguard::guard(task_state.clone(), |s| {
            s.reconnect_in_flight.store(false, Ordering::SeqCst);
        });
        sleep(delay).await;
        task_state.consecutive_failures.fetch_add(1, Ordering::SeqCst);
        task_callback.reconnect().await;
        drop(release);
    });
    if let Some(previous) = state.pending_reconnect.lock().unwrap().replace(task) {
        // Single-flight guard makes this unreachable in practice.
        warn!(target: "callsig::health", "replacing a pending reconnect attempt");
        previous.abort();
    }
}

/// Jittered backoff window: both edges grow with the consecutive-failure
/// count, capped at 25s. The randomized floor spreads clients out after a
/// shared outage.
fn retry_delay(consecutive_failures: u32) -> Duration {
    let failures = consecutive_failures as u64;
    let max_ms = (500 + failures * 2000).min(MAX_RETRY_DELAY_MS);
    let min_ms = 250
        .max(failures.saturating_sub(1) * 2000)
        .min(MAX_RETRY_DELAY_MS);
    Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
}
