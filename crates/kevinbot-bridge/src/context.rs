//! Shared state of a running bridge.
//!
//! One [`Context`] is shared (behind an `Arc`) by every read loop and by
//! the closures queued on the command queue.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use kevinbot_hal::Effectors;
use kevinbot_kernel::{BatteryPolicy, CommandQueue, LinkWatchdog, QueuedCommand, StateManager};
use kevinbot_link::{LinkWriter, TelemetrySink};
use kevinbot_types::{ComError, Link};
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::config::BridgeConfig;
use crate::handshake::ReadySignal;

/// Outbound halves of every link.
#[derive(Clone)]
pub struct BridgeLinks {
    pub core: Arc<dyn LinkWriter>,
    pub remote: Arc<dyn LinkWriter>,
    pub eye: Option<Arc<dyn LinkWriter>>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

pub(crate) struct Context {
    pub config: Arc<BridgeConfig>,
    pub state: StateManager,
    pub queue: CommandQueue,
    pub links: BridgeLinks,
    pub effectors: Effectors,
    pub battery: BatteryPolicy,
    pub ready: ReadySignal,
    pub watchdog: Mutex<LinkWatchdog>,
    pub self_tag: String,
    pub shutdown: watch::Sender<bool>,
    /// A forced disable is queued and has not run yet.
    pub disable_pending: AtomicBool,
    pub started: Instant,
}

impl Context {
    pub fn new(config: Arc<BridgeConfig>, links: BridgeLinks, effectors: Effectors) -> Self {
        let mut watchdog = LinkWatchdog::new();
        if let Some(timeout) = config.core_timeout() {
            watchdog.register(Link::Core, timeout);
        }
        Self {
            state: StateManager::new(config.initial_state()),
            queue: CommandQueue::new(config.queue_tick()),
            battery: config.battery_policy(),
            self_tag: config.self_tag(),
            ready: ReadySignal::new(),
            watchdog: Mutex::new(watchdog),
            shutdown: watch::Sender::new(false),
            disable_pending: AtomicBool::new(false),
            started: Instant::now(),
            links,
            effectors,
            config,
        }
    }

    pub fn watchdog(&self) -> MutexGuard<'_, LinkWatchdog> {
        self.watchdog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `f` with a shared handle to this context.
    pub fn submit<F>(self: &Arc<Self>, label: &str, f: F)
    where
        F: FnOnce(&Context) -> Result<(), ComError> + Send + 'static,
    {
        let ctx = Arc::clone(self);
        self.queue.submit(label, move || f(&ctx));
    }

    /// Queue `f` ahead of the next idle tick.
    pub fn submit_urgent<F>(self: &Arc<Self>, label: &str, f: F)
    where
        F: FnOnce(&Context) -> Result<(), ComError> + Send + 'static,
    {
        let ctx = Arc::clone(self);
        self.queue.enqueue_urgent(QueuedCommand::new(label, move || f(&ctx)));
    }

    /// Fire-and-forget telemetry publish.
    pub fn publish(&self, topic: &str, payload: impl ToString) {
        let payload = payload.to_string();
        match self.links.telemetry.publish(topic, &payload) {
            Ok(()) => trace!(topic, payload = %payload, "published"),
            Err(e) => warn!(topic, error = %e, "telemetry publish failed"),
        }
    }
}
