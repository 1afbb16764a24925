//! [`BridgeService`] – the root of the bridge.
//!
//! Owns the [`Context`] and runs one task per inbound transport plus the
//! heartbeat, with the command queue executor on its own thread:
//!
//! ```text
//!  core reader ─────┐
//!  remote reader ───┤                       ┌──▶ core link
//!  eye reader ──────┼──▶ StateManager       ├──▶ remote link
//!  telemetry ───────┤    CommandQueue ──────┼──▶ eye link
//!  heartbeat ───────┘    (executor thread)  └──▶ host effectors
//! ```
//!
//! Readers decode and route.  Anything that changes robot state on the
//! wire is queued; read-only forwarding (relayed lines, sensor
//! re-broadcasts) is written directly.  A fault at a reader boundary
//! queues a forced disable and the reader keeps going.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use kevinbot_hal::{Effectors, Notification, Sound, os_uptime};
use kevinbot_kernel::{CommandQueue, QueueStats, StateManager};
use kevinbot_link::{InboundFrames, TelemetryMessage, TelemetrySource, codec};
use kevinbot_types::{ComError, Environment, Link, fault_description};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::config::{BridgeConfig, HeartbeatMode};
use crate::context::{BridgeLinks, Context};
use crate::hardware::{self, CoreMessage};
use crate::remote::{self, RemoteCommand};

/// Watchdog check period when the controller paces the heartbeat.
const WATCHDOG_PERIOD: Duration = Duration::from_millis(250);

/// Inbound halves of every link, consumed by [`BridgeService::run`].
pub struct BridgeInbound {
    pub core: InboundFrames,
    pub remote: InboundFrames,
    pub eye: Option<InboundFrames>,
    pub telemetry: Box<dyn TelemetrySource>,
}

/// Cloneable handle to a running (or ready-to-run) bridge.
#[derive(Clone)]
pub struct BridgeService {
    ctx: Arc<Context>,
}

impl BridgeService {
    pub fn new(config: BridgeConfig, links: BridgeLinks, effectors: Effectors) -> Result<Self, ComError> {
        config.validate()?;
        Ok(Self {
            ctx: Arc::new(Context::new(Arc::new(config), links, effectors)),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.ctx.config
    }

    pub fn state(&self) -> &StateManager {
        &self.ctx.state
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.ctx.queue
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.ctx.queue.stats()
    }

    // ── Requests ─────────────────────────────────────────────────────────────

    pub fn request_enable(&self) {
        self.ctx.submit("enable", |ctx| ctx.enable());
    }

    pub fn request_disable(&self) {
        self.ctx.submit("disable", |ctx| ctx.disable());
    }

    /// Queue an E-Stop ahead of the next idle tick.
    pub fn request_estop(&self, power_off: bool) {
        let label = if power_off { "estop + power off" } else { "estop" };
        self.ctx.submit_urgent(label, move |ctx| ctx.estop(power_off));
    }

    pub fn request_handshake(&self) {
        self.ctx.submit("core handshake", |ctx| ctx.core_handshake());
    }

    /// Queue a disable after a fault.  Faults arriving while one is already
    /// pending share it.
    pub fn force_disable(&self, reason: &'static str) {
        if self.ctx.disable_pending.swap(true, Ordering::SeqCst) {
            debug!(reason, "forced disable already pending");
            return;
        }
        self.ctx.submit_urgent("forced disable", move |ctx| {
            ctx.disable_pending.store(false, Ordering::SeqCst);
            ctx.forced_disable(reason)
        });
    }

    /// Stop [`BridgeService::run`].  Commands already queued still run.
    pub fn shutdown(&self) {
        info!("bridge shutdown requested");
        self.ctx.shutdown.send_replace(true);
        self.ctx.ready.cancel();
    }

    // ── Core link ────────────────────────────────────────────────────────────

    pub fn handle_core_line(&self, raw: &[u8]) {
        trace!(link = %Link::Core, bytes = ?raw, "line received");
        let frame = match codec::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(link = %Link::Core, error = %e, "dropping undecodable line");
                return;
            }
        };
        self.ctx.watchdog().feed(Link::Core);

        let message = match CoreMessage::parse(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(link = %Link::Core, key = %frame.key, error = %e, "dropping malformed frame");
                CoreMessage::Other
            }
        };
        if !message.is_handshake_control() {
            if let Err(e) = self.ctx.links.remote.send(&frame.encode()) {
                self.handle_link_fault(Link::Remote, e);
            }
        }
        debug!(link = %Link::Core, key = %frame.key, value = %frame.value, "routing");

        match message {
            CoreMessage::Ready => self.ctx.ready.signal(),
            CoreMessage::RequestHandshake => {
                info!("hardware controller requested a handshake");
                self.request_handshake();
            }
            CoreMessage::Voltages(raw) => self.ctx.on_voltages(raw),
            CoreMessage::Error(code) => self.on_core_error(code),
            CoreMessage::Uptime(seconds) => {
                let uptime = self.ctx.state.record_core_uptime(seconds);
                self.ctx.publish(&self.ctx.config.topics.core_uptime, uptime);
                if self.ctx.config.com.tick == HeartbeatMode::Core {
                    self.heartbeat();
                }
            }
            CoreMessage::Temperatures(temps) => self.ctx.state.set_temperatures(temps),
            CoreMessage::Environment {
                temperature,
                humidity,
                pressure,
            } => self.ctx.on_core_environment(Environment {
                temperature,
                humidity,
                pressure,
            }),
            CoreMessage::Enabled(false) => {
                if self.ctx.state.enabled() {
                    warn!("hardware reports disabled");
                }
                self.ctx.state.set_enabled(false);
            }
            CoreMessage::Enabled(true) | CoreMessage::Other => {}
        }
    }

    fn on_core_error(&self, code: u32) {
        if code == 0 {
            return;
        }
        let previous = self.ctx.state.set_error(code);
        if previous != code {
            error!(code, fault = fault_description(code), "hardware fault latched");
        }
        if self.ctx.state.enabled() {
            self.force_disable("hardware fault");
        }
    }

    /// A reader or direct write failed.  The reader keeps going.
    pub fn handle_link_fault(&self, link: Link, error: ComError) {
        error!(%link, error = %error, "link fault");
        self.force_disable("link fault");
    }

    // ── Remote link ──────────────────────────────────────────────────────────

    /// Route one remote frame.  Any failure forces a disable.
    pub fn handle_remote_frame(&self, raw: &[u8]) {
        if let Err(e) = self.route_remote(raw) {
            error!(link = %Link::Remote, error = %e, "remote frame failed");
            self.force_disable("remote fault");
        }
    }

    fn route_remote(&self, raw: &[u8]) -> Result<(), ComError> {
        trace!(link = %Link::Remote, bytes = ?raw, "frame received");
        let frame = codec::decode(raw)?;
        let command = RemoteCommand::parse(&frame, raw)?;
        debug!(link = %Link::Remote, ?command, "routing");

        match command {
            RemoteCommand::RemoteListAdd(id) => {
                if self.ctx.state.add_remote(&id) {
                    info!(remote = %id, "remote joined");
                    self.ctx.submit("remote handshake", move |ctx| ctx.remote_handshake(&id));
                } else {
                    debug!(remote = %id, "remote already connected");
                }
            }
            RemoteCommand::RemoteListRemove(id) => {
                if self.ctx.state.remove_remote(&id) {
                    info!(remote = %id, "remote left");
                }
            }
            RemoteCommand::RemoteListFetch => self.ctx.submit("roster", |ctx| ctx.send_roster()),
            RemoteCommand::RemoteStatus(status) => info!(%status, "remote status"),
            RemoteCommand::Ping { target, sender } => {
                if target == self.ctx.config.robot.id {
                    info!(%sender, "ping");
                    self.ctx.submit("ping", move |ctx| {
                        let sound = ctx.effectors.sounds.play(Sound::DeviceNotify);
                        let note = ctx
                            .effectors
                            .notifier
                            .notify(&Notification::new("Ping!", format!("Ping from {sender}")));
                        sound.and(note)
                    });
                }
            }
            RemoteCommand::RequestEnable(true) => self.request_enable(),
            RemoteCommand::RequestEnable(false) => self.request_disable(),
            RemoteCommand::RequestEstop => self.request_estop(false),
            RemoteCommand::RequestShutdown => self.request_estop(true),
            RemoteCommand::SpeechEngine(engine) => {
                self.ctx.state.set_speech_engine(engine);
                info!(%engine, "speech engine selected");
            }
            RemoteCommand::Speak(text) => self.ctx.submit("speak", move |ctx| {
                ctx.effectors.speaker.speak(ctx.state.speech_engine(), &text)
            }),
            RemoteCommand::Lighting { zone, param, value } => {
                match param {
                    remote::LightingParam::Update => {
                        let interval = remote::lighting_number(&frame.key, &value)?;
                        self.ctx.state.set_lighting_update(zone, interval);
                    }
                    remote::LightingParam::Brightness => {
                        let brightness = remote::lighting_number(&frame.key, &value)?;
                        self.ctx.state.set_lighting_brightness(zone, brightness);
                    }
                    _ => {}
                }
                let (key, value) = remote::lighting_core_frame(zone, param, &value);
                self.queue_core_write("lighting", key, value);
            }
            RemoteCommand::CameraBrightness(value) => {
                self.queue_core_write("camera brightness", hardware::CAMERA_BRIGHTNESS.to_string(), value);
            }
            RemoteCommand::Eye { command, value } => {
                if self.ctx.links.eye.is_none() {
                    warn!(%command, "no eye link; dropping eye command");
                    return Ok(());
                }
                self.ctx.submit("eye", move |ctx| match &ctx.links.eye {
                    Some(eye) => ctx.checked_write(eye.send_frame(&command, &value)),
                    None => Ok(()),
                });
            }
            RemoteCommand::Motion { axis, value } => self.ctx.submit("motion", move |ctx| {
                if !ctx.state.motion_permitted() {
                    debug!(?axis, "motion dropped: robot not enabled");
                    return Ok(());
                }
                ctx.checked_write(ctx.links.core.send_frame(axis.core_key(), &value))
            }),
            RemoteCommand::Unrecognized { raw } => {
                if self.ctx.state.motion_permitted() {
                    self.ctx.links.core.send(&as_line(&raw))?;
                } else {
                    debug!(key = %frame.key, "passthrough dropped: robot not enabled");
                }
            }
        }
        Ok(())
    }

    fn queue_core_write(&self, label: &str, key: String, value: String) {
        self.ctx
            .submit(label, move |ctx| ctx.checked_write(ctx.links.core.send_frame(&key, &value)));
    }

    // ── Eye link ─────────────────────────────────────────────────────────────

    /// Relay eye controller reports to the remotes.
    pub fn handle_eye_line(&self, raw: &[u8]) {
        let frame = match codec::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(link = %Link::Eye, error = %e, "dropping undecodable line");
                return;
            }
        };
        if !frame.key.starts_with(remote::EYE_SETTINGS_PREFIX) {
            trace!(link = %Link::Eye, key = %frame.key, "ignoring");
            return;
        }
        if let Err(e) = self.ctx.links.remote.send(&frame.encode()) {
            self.handle_link_fault(Link::Remote, e);
        }
    }

    // ── Telemetry ────────────────────────────────────────────────────────────

    pub fn handle_telemetry(&self, message: &TelemetryMessage) {
        if let Err(e) = self.ctx.on_telemetry(message) {
            self.handle_link_fault(Link::Remote, e);
        }
    }

    // ── Heartbeat ────────────────────────────────────────────────────────────

    /// Tick the controller, report uptime to the remotes and publish status.
    pub fn heartbeat(&self) {
        let uptime = match os_uptime() {
            Ok(seconds) => seconds,
            Err(e) => {
                trace!(error = %e, "host uptime unavailable; using process uptime");
                self.ctx.started.elapsed().as_secs()
            }
        };
        let uptime = self.ctx.state.record_os_uptime(uptime);
        self.ctx.submit("heartbeat", move |ctx| {
            let core = ctx.links.core.send_frame(hardware::TICK, "");
            let remote = ctx.links.remote.send_frame(remote::UPTIME, &uptime.to_string());
            ctx.checked_write(core.and(remote))
        });

        let topics = &self.ctx.config.topics;
        self.ctx.publish(&topics.sys_uptime, uptime);
        self.ctx.publish(&topics.enabled, self.ctx.state.enabled());
        let volts = self.ctx.state.battery_voltages();
        for (topic, value) in topics.batteries().into_iter().zip(volts) {
            self.ctx.publish(topic, value);
        }
    }

    /// Force a disable for every link that went silent.
    pub fn check_watchdog(&self) {
        let silent = self.ctx.watchdog().check_all();
        for link in silent {
            error!(%link, "link silent past its deadline");
            self.force_disable("link watchdog");
        }
    }

    // ── Run loop ─────────────────────────────────────────────────────────────

    /// Run the bridge until [`BridgeService::shutdown`] or until a reader's
    /// channel closes.
    ///
    /// Starts the command queue executor, completes the core handshake,
    /// then starts every reader.  On the way out the queue is drained.
    pub async fn run(&self, inbound: BridgeInbound) -> Result<(), ComError> {
        let executor = self.ctx.queue.spawn_executor()?;
        let result = self.run_loops(inbound).await;
        self.ctx.ready.cancel();
        tokio::task::spawn_blocking(move || executor.stop())
            .await
            .map_err(|e| ComError::Channel(format!("command executor: {e}")))?;
        info!(stats = ?self.ctx.queue.stats(), "bridge stopped");
        result
    }

    async fn run_loops(&self, inbound: BridgeInbound) -> Result<(), ComError> {
        let BridgeInbound {
            core,
            remote,
            eye,
            telemetry,
        } = inbound;
        let shutdown = self.ctx.shutdown.subscribe();
        let mut loops = JoinSet::new();

        // The core reader must already run to see the handshake answer.
        loops.spawn(self.clone().core_loop(core));
        tokio::select! {
            result = self.startup_handshake() => result?,
            () = stopped(shutdown.clone()) => return Ok(()),
        }

        loops.spawn(self.clone().remote_loop(remote));
        if let Some(eye) = eye {
            loops.spawn(self.clone().eye_loop(eye));
        }
        loops.spawn(self.clone().telemetry_loop(telemetry));
        loops.spawn(self.clone().heartbeat_loop());
        info!(tick = %self.ctx.config.com.tick, "bridge running");

        tokio::select! {
            Some(finished) = loops.join_next() => match finished {
                Ok(name) => warn!(reader = name, "reader stopped; shutting down"),
                Err(e) => error!(error = %e, "reader task failed; shutting down"),
            },
            () = stopped(shutdown) => {}
        }
        loops.shutdown().await;
        Ok(())
    }

    async fn startup_handshake(&self) -> Result<(), ComError> {
        let (tx, rx) = oneshot::channel();
        self.ctx.submit_urgent("core handshake", move |ctx| {
            // Nobody waits for the result once the service is shutting down.
            let _ = tx.send(ctx.core_handshake());
            Ok(())
        });
        rx.await
            .map_err(|_| ComError::Channel("core handshake dropped".to_string()))?
    }

    async fn core_loop(self, mut rx: InboundFrames) -> &'static str {
        while let Some(item) = rx.recv().await {
            match item {
                Ok(line) => self.handle_core_line(&line),
                Err(e) => self.handle_link_fault(Link::Core, e),
            }
        }
        "core"
    }

    async fn remote_loop(self, mut rx: InboundFrames) -> &'static str {
        while let Some(item) = rx.recv().await {
            match item {
                Ok(frame) => self.handle_remote_frame(&frame),
                Err(e) => self.handle_link_fault(Link::Remote, e),
            }
        }
        "remote"
    }

    async fn eye_loop(self, mut rx: InboundFrames) -> &'static str {
        while let Some(item) = rx.recv().await {
            match item {
                Ok(line) => self.handle_eye_line(&line),
                Err(e) => self.handle_link_fault(Link::Eye, e),
            }
        }
        "eye"
    }

    async fn telemetry_loop(self, mut source: Box<dyn TelemetrySource>) -> &'static str {
        while let Some(message) = source.next().await {
            self.handle_telemetry(&message);
        }
        "telemetry"
    }

    async fn heartbeat_loop(self) -> &'static str {
        let (period, paced) = match self.ctx.config.com.tick {
            HeartbeatMode::Internal(period) => (period, true),
            HeartbeatMode::Core => (WATCHDOG_PERIOD, false),
        };
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if paced {
                self.heartbeat();
            }
            self.check_watchdog();
        }
    }
}

async fn stopped(mut shutdown: watch::Receiver<bool>) {
    // A dropped sender also ends the wait.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// `raw` with exactly one trailing newline.
fn as_line(raw: &[u8]) -> Cow<'_, [u8]> {
    if raw.ends_with(b"\n") {
        Cow::Borrowed(raw)
    } else {
        let mut line = raw.to_vec();
        line.push(b'\n');
        Cow::Owned(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kevinbot_hal::{HostAction, RecordingHost};
    use kevinbot_link::{MemoryLink, TelemetryBus};
    use kevinbot_types::{LightingZone, SpeechEngine};

    struct Harness {
        service: BridgeService,
        core: Arc<MemoryLink>,
        remote: Arc<MemoryLink>,
        eye: Arc<MemoryLink>,
        bus: Arc<TelemetryBus>,
        host: Arc<RecordingHost>,
        inbound: Option<BridgeInbound>,
    }

    impl Harness {
        /// Run everything queued so far on the calling thread.
        fn drain(&self) {
            self.service.queue().run_pending();
        }

        fn clear(&self) {
            self.core.clear();
            self.remote.clear();
            self.eye.clear();
            self.host.clear();
        }
    }

    fn harness_with(config: BridgeConfig) -> Harness {
        let (core, core_rx) = MemoryLink::new(Link::Core);
        let (remote, remote_rx) = MemoryLink::new(Link::Remote);
        let (eye, eye_rx) = MemoryLink::new(Link::Eye);
        core.set_responder(|line| (line == b"connection.isready\n").then(|| b"ready\n".to_vec()));
        let bus = Arc::new(TelemetryBus::default());
        let host = Arc::new(RecordingHost::default());
        let telemetry = Box::new(bus.subscribe_topics(config.topics.subscribed()));
        let links = BridgeLinks {
            core: core.clone(),
            remote: remote.clone(),
            eye: Some(eye.clone()),
            telemetry: bus.clone(),
        };
        let service = BridgeService::new(config, links, Effectors::from_host(host.clone()))
            .expect("default config is valid");
        Harness {
            service,
            core,
            remote,
            eye,
            bus,
            host,
            inbound: Some(BridgeInbound {
                core: core_rx,
                remote: remote_rx,
                eye: Some(eye_rx),
                telemetry,
            }),
        }
    }

    fn harness() -> Harness {
        harness_with(BridgeConfig::default())
    }

    fn enabled_harness() -> Harness {
        let h = harness();
        h.service.handle_remote_frame(b"kevinbot.request.enable=true\n");
        h.drain();
        assert!(h.service.state().enabled());
        h.clear();
        h
    }

    const CORE_DISABLE: [&str; 7] = [
        "head_effect=color1",
        "head_color1=#000000",
        "body_effect=color1",
        "body_color1=#000000",
        "base_effect=color1",
        "base_color1=#000000",
        "kevinbot.enabled=false",
    ];

    async fn eventually(what: &str, condition: impl Fn() -> bool) -> Result<(), String> {
        for _ in 0..300 {
            if condition() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Err(format!("timed out waiting for {what}"))
    }

    // ── Battery ──────────────────────────────────────────────────────────────

    #[test]
    fn malformed_voltages_change_nothing() {
        let h = harness();
        h.service.handle_core_line(b"bms.voltages=250,abc\n");
        h.service.handle_core_line(b"bms.voltages=250\n");
        h.drain();
        assert_eq!(h.service.state().battery_voltages(), [0.0, 0.0]);
        assert!(h.host.actions().is_empty());
    }

    #[test]
    fn low_battery_warns_once_until_handshake() {
        let mut config = BridgeConfig::default();
        config.battery.warn_voltages = [25.5, 25.5];
        let h = harness_with(config);

        h.service.handle_core_line(b"bms.voltages=250,248\n");
        h.drain();
        assert_eq!(h.host.count(|a| matches!(a, HostAction::Play(Sound::LowBattery))), 1);
        assert_eq!(h.host.count(|a| matches!(a, HostAction::Notify(_))), 1);

        h.service.handle_core_line(b"bms.voltages=250,248\n");
        h.drain();
        assert_eq!(h.host.actions().len(), 2);

        // No core reader runs here, so answer the poll directly.
        let ctx = Arc::clone(&h.service.ctx);
        h.core.set_responder(move |line| {
            if line == b"connection.isready\n" {
                ctx.ready.signal();
            }
            None
        });
        h.service.ctx.core_handshake().expect("handshake");
        h.service.handle_core_line(b"bms.voltages=250,248\n");
        h.drain();
        assert_eq!(h.host.actions().len(), 4);
    }

    #[test]
    fn controller_handshake_request_restarts_the_session() {
        let mut config = BridgeConfig::default();
        config.battery.warn_voltages = [25.5, 25.5];
        let h = harness_with(config);
        h.service.handle_remote_frame(b"kevinbot.request.enable=true\n");
        h.drain();
        assert!(h.service.state().enabled());

        h.service.handle_core_line(b"bms.voltages=250,248\n");
        h.service.handle_core_line(b"core.error=3\n");
        h.drain();
        assert_eq!(h.service.state().error(), 3);
        assert_eq!(h.service.state().read(|s| s.battery_notified), [true, true]);
        h.clear();

        let ctx = Arc::clone(&h.service.ctx);
        h.core.set_responder(move |line| {
            if line == b"connection.isready\n" {
                ctx.ready.signal();
            }
            None
        });
        h.service.handle_core_line(b"connection.requesthandshake\n");
        h.drain();

        assert!(!h.service.state().enabled());
        assert_eq!(h.service.state().error(), 0);
        assert_eq!(h.service.state().read(|s| s.battery_notified), [false, false]);
        let mut expected = vec![
            "connection.isready",
            "connection.start",
            "core.errors.clear",
            "connection.ok",
        ];
        expected.extend(CORE_DISABLE);
        assert_eq!(h.core.sent_lines(), expected);
        assert_eq!(h.remote.sent_lines(), vec!["kevinbot.enabled=false"]);
    }

    // ── Enable / E-Stop ──────────────────────────────────────────────────────

    #[test]
    fn enable_is_rejected_while_faulted() {
        let h = harness();
        h.service.handle_core_line(b"core.error=3\n");
        for _ in 0..3 {
            h.service.handle_remote_frame(b"kevinbot.request.enable=true\n");
        }
        h.drain();
        assert!(!h.service.state().enabled());
        let failures = h
            .remote
            .sent_lines()
            .into_iter()
            .filter(|l| l == "kevinbot.enablefailed=3")
            .count();
        assert_eq!(failures, 3);
        assert!(!h.core.sent_lines().iter().any(|l| l.starts_with("kevinbot.tryenable")));
    }

    #[test]
    fn repeated_enable_writes_once() {
        let h = harness();
        h.service.handle_remote_frame(b"kevinbot.request.enable=true\n");
        h.service.handle_remote_frame(b"kevinbot.request.enable=true\n");
        h.drain();
        assert_eq!(h.core.sent_lines(), vec!["kevinbot.tryenable=true"]);
    }

    #[test]
    fn estop_while_enabled() {
        let h = enabled_harness();
        h.service.handle_remote_frame(b"kevinbot.request.estop\n");
        h.drain();
        let mut expected = vec!["system.estop"];
        expected.extend(CORE_DISABLE);
        assert_eq!(h.core.sent_lines(), expected);
        assert_eq!(h.remote.sent_lines(), vec!["system.estop", "kevinbot.enabled=false"]);
        assert!(!h.service.state().enabled());
    }

    #[test]
    fn shutdown_command_powers_off_after_estop() {
        let h = enabled_harness();
        h.service.handle_remote_frame(b"system.shutdown\n");
        h.drain();
        assert_eq!(h.host.actions(), vec![HostAction::PowerOff]);
        assert_eq!(h.core.sent_lines()[0], "system.estop");
    }

    #[test]
    fn core_fault_while_enabled_forces_disable() {
        let h = enabled_harness();
        h.service.handle_core_line(b"core.error=5\n");
        h.drain();
        assert!(!h.service.state().enabled());
        assert_eq!(h.service.state().error(), 5);
        assert!(h.core.sent_lines().ends_with(&["kevinbot.enabled=false".to_string()]));
    }

    #[test]
    fn hardware_disabled_report_clears_enabled() {
        let h = enabled_harness();
        h.service.handle_core_line(b"kevinbot.enabled=false\n");
        assert!(!h.service.state().enabled());
    }

    // ── Remote faults ────────────────────────────────────────────────────────

    #[test]
    fn invalid_utf8_from_remote_forces_disable_and_next_frame_still_routes() {
        let h = enabled_harness();
        h.service.handle_remote_frame(b"kevinbot.request.enable=\xff\xfe\n");
        h.drain();
        assert!(!h.service.state().enabled());
        assert_eq!(h.core.sent_lines(), CORE_DISABLE);
        assert_eq!(h.remote.sent_lines(), vec!["kevinbot.enabled=false"]);

        h.service.handle_remote_frame(b"system.speechEngine=festival\n");
        assert_eq!(h.service.state().speech_engine(), SpeechEngine::Festival);
    }

    #[test]
    fn concurrent_faults_share_one_forced_disable() {
        let h = enabled_harness();
        h.service.handle_remote_frame(b"kevinbot.request.enable=maybe\n");
        h.service.handle_link_fault(Link::Remote, ComError::io(Link::Remote, "framing"));
        h.drain();
        let announcements = h
            .remote
            .sent_lines()
            .into_iter()
            .filter(|l| l == "kevinbot.enabled=false")
            .count();
        assert_eq!(announcements, 1);
    }

    // ── Motion gating ────────────────────────────────────────────────────────

    #[test]
    fn motion_and_passthrough_need_enabled_robot() {
        let h = harness();
        h.service.handle_remote_frame(b"drivebase.left=0.5\n");
        h.service.handle_remote_frame(b"stepper.home=1\n");
        h.drain();
        assert!(h.core.sent_lines().is_empty());

        let h = enabled_harness();
        h.service.handle_remote_frame(b"drivebase.left=0.5\n");
        h.service.handle_remote_frame(b"stepper.home=1");
        h.drain();
        assert_eq!(h.core.sent_lines(), vec!["stepper.home=1", "left_motor=0.5"]);
    }

    #[test]
    fn motion_is_dropped_when_fault_latches_before_it_runs() {
        let h = enabled_harness();
        h.service.handle_remote_frame(b"head.position.x=30\n");
        h.service.ctx.state.set_error(1);
        h.drain();
        assert!(!h.core.sent_lines().iter().any(|l| l.starts_with("head_x")));
    }

    // ── Lighting, eyes, speech, ping ─────────────────────────────────────────

    #[test]
    fn lighting_updates_cache_and_reaches_core() {
        let h = harness();
        h.service.handle_remote_frame(b"lighting.head.brightness=64\n");
        h.service.handle_remote_frame(b"lighting.base.update=50\n");
        h.service.handle_remote_frame(b"lighting.body.color2=#00ff00\n");
        h.service.handle_remote_frame(b"lighting.camera.brightness=12\n");
        h.drain();
        let lighting = h.service.state().lighting();
        assert_eq!(lighting.get(LightingZone::Head).brightness, 64);
        assert_eq!(lighting.get(LightingZone::Base).update_interval, 50);
        assert_eq!(
            h.core.sent_lines(),
            vec![
                "head_effect_brightness=64",
                "base_update=50",
                "body_color2=#00ff00",
                "cam_brightness=12"
            ]
        );
    }

    #[test]
    fn eye_commands_and_reports() {
        let h = harness();
        h.service.handle_remote_frame(b"eyes.set_skin=2\n");
        h.drain();
        assert_eq!(h.eye.sent_lines(), vec!["set_skin=2"]);

        h.service.handle_eye_line(b"eye_settings.skin=2\n");
        h.service.handle_eye_line(b"debug=booted\n");
        assert_eq!(h.remote.sent_lines(), vec!["eye_settings.skin=2"]);
    }

    #[test]
    fn speech_uses_engine_selected_at_execution_time() {
        let h = harness();
        h.service.handle_remote_frame(b"system.speak=Hello from Kevinbot\n");
        h.service.handle_remote_frame(b"system.speechEngine=festival\n");
        h.drain();
        assert_eq!(
            h.host.actions(),
            vec![HostAction::Speak {
                engine: SpeechEngine::Festival,
                text: "Hello from Kevinbot".to_string()
            }]
        );
    }

    #[test]
    fn ping_for_this_robot_notifies() {
        let h = harness();
        h.service.handle_remote_frame(b"connection.ping=SOMEONEELSE,R1\n");
        h.service.handle_remote_frame(b"connection.ping=KEVINBOTV3,R1\n");
        h.drain();
        let actions = h.host.actions();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0], HostAction::Play(Sound::DeviceNotify));
        assert!(matches!(&actions[1], HostAction::Notify(n) if n.body == "Ping from R1" && n.title == "Ping!"));
    }

    // ── Roster ───────────────────────────────────────────────────────────────

    #[test]
    fn new_remote_gets_a_handshake_once() {
        let h = harness();
        h.service.handle_remote_frame(b"connection.remotes.add=R1|1.0|kevinbot.kevinbot\n");
        h.service.handle_remote_frame(b"connection.remotes.add=R1|1.0|kevinbot.kevinbot\n");
        h.drain();
        let lines = h.remote.sent_lines();
        assert_eq!(lines.iter().filter(|l| l.starts_with("handshake.start=")).count(), 1);

        let keys: Vec<String> = lines
            .iter()
            .map(|l| l.split('=').next().unwrap_or_default().to_string())
            .collect();
        assert_eq!(keys[..9], [
            "handshake.start",
            "kevinbot.enabled",
            "system.speechEngine",
            "lighting.head.update",
            "lighting.head.brightness",
            "lighting.body.update",
            "lighting.body.brightness",
            "lighting.base.update",
            "lighting.base.brightness",
        ]);
        assert!(keys[9..keys.len() - 1].iter().all(|k| k.starts_with("list:")));
        assert_eq!(lines.last().map(String::as_str), Some("handshake.end=R1|1.0|kevinbot.kevinbot"));

        h.service.handle_remote_frame(b"connection.remotes.remove=R1|1.0|kevinbot.kevinbot\n");
        assert!(h.service.state().remotes().is_empty());
    }

    // ── Relay, heartbeat, watchdog ───────────────────────────────────────────

    #[test]
    fn core_lines_are_relayed_except_handshake_control() {
        let h = harness();
        h.service.handle_core_line(b"ready\n");
        h.service.handle_core_line(b"core.uptime=12\r\n");
        h.service.handle_core_line(b"motors.amps=1,2\n");
        assert_eq!(h.remote.sent_lines(), vec!["core.uptime=12", "motors.amps=1,2"]);
        assert_eq!(h.service.state().read(|s| s.core_uptime), 12);
    }

    #[test]
    fn heartbeat_ticks_core_and_reports_uptime() {
        let h = harness();
        h.service.heartbeat();
        h.drain();
        assert_eq!(h.core.sent_lines(), vec!["system.tick"]);
        let remote = h.remote.sent_lines();
        assert_eq!(remote.len(), 1);
        assert!(remote[0].starts_with("system.uptime="));
    }

    #[test]
    fn core_paced_heartbeat_answers_uptime_lines() {
        let mut config = BridgeConfig::default();
        config.com.tick = HeartbeatMode::Core;
        let h = harness_with(config);
        h.service.handle_core_line(b"core.uptime=5\n");
        h.drain();
        assert_eq!(h.core.sent_lines(), vec!["system.tick"]);
    }

    #[test]
    fn silent_core_link_forces_one_disable() {
        let mut config = BridgeConfig::default();
        config.com.core_timeout_ms = Some(20);
        let h = harness_with(config);
        h.service.handle_remote_frame(b"kevinbot.request.enable=true\n");
        h.drain();
        h.clear();

        std::thread::sleep(Duration::from_millis(40));
        h.service.check_watchdog();
        h.service.check_watchdog();
        h.drain();
        assert!(!h.service.state().enabled());
        assert_eq!(h.remote.sent_lines(), vec!["kevinbot.enabled=false"]);
    }

    #[test]
    fn as_line_adds_one_newline() {
        assert_eq!(as_line(b"a=1").as_ref(), b"a=1\n");
        assert_eq!(as_line(b"a=1\n").as_ref(), b"a=1\n");
    }

    // ── Full service ─────────────────────────────────────────────────────────

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn service_runs_handshake_routes_and_shuts_down() -> Result<(), Box<dyn std::error::Error>> {
        let mut h = harness();
        let inbound = h.inbound.take().ok_or("inbound already taken")?;
        let service = h.service.clone();
        let running = tokio::spawn(async move { service.run(inbound).await });

        let core = h.core.clone();
        eventually("core handshake", move || core.sent_lines().iter().any(|l| l == "connection.ok")).await?;
        assert!(h.core.sent_lines().starts_with(&[
            "connection.isready".to_string(),
            "connection.start".to_string(),
            "core.errors.clear".to_string(),
            "connection.ok".to_string(),
        ]));

        h.remote.inject("kevinbot.request.enable=true\n")?;
        let state = h.service.clone();
        eventually("enable", move || state.state().enabled()).await?;

        h.bus.publish_message(TelemetryMessage::new("kevinbot/mpu/imu", "1,2,3"))?;
        let remote = h.remote.clone();
        eventually("imu relay", move || remote.sent_lines().iter().any(|l| l == "sensors.imu=1,2,3")).await?;

        h.service.request_estop(false);
        h.service.shutdown();
        running.await??;

        assert!(!h.service.state().enabled());
        assert!(h.core.sent_lines().iter().any(|l| l == "system.estop"));
        Ok(())
    }

    #[tokio::test]
    async fn bounded_handshake_failure_stops_the_service() -> Result<(), Box<dyn std::error::Error>> {
        let mut config = BridgeConfig::default();
        config.com.handshake_interval_ms = 5;
        config.com.handshake_max_attempts = Some(3);
        let mut h = harness_with(config);
        h.core.set_responder(|_| None);
        let inbound = h.inbound.take().ok_or("inbound already taken")?;

        let err = h.service.run(inbound).await.unwrap_err();
        assert!(matches!(err, ComError::HandshakeTimeout { attempts: 3 }));
        Ok(())
    }
}
