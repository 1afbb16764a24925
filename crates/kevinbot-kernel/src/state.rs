//! [`StateManager`] – the single owner of [`RuntimeState`].
//!
//! Every loop reads and writes the runtime record through this type.  The
//! lock is held only for the duration of a short, I/O-free closure; callers
//! that need a side effect (a serial write, a sound) queue it on the
//! [`CommandQueue`][crate::command_queue::CommandQueue] after the mutation
//! returns.

use std::sync::{Mutex, MutexGuard, PoisonError};

use kevinbot_types::{
    Environment, LightingChannel, LightingState, LightingZone, Orientation, SensorCache,
    SpeechEngine,
};
use tracing::debug;

/// Everything the bridge knows about the robot at runtime.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuntimeState {
    /// Master safety gate.
    pub enabled: bool,
    /// Sticky hardware fault code; only a core handshake clears it.
    pub error: u32,
    pub speech_engine: SpeechEngine,
    /// Seconds reported by the hardware controller in the current session.
    pub core_uptime: u64,
    /// Host uptime in seconds.
    pub os_uptime: u64,
    /// Cell voltages in volts.
    pub battery_voltages: [f32; 2],
    pub battery_notified: [bool; 2],
    pub battery_sound_played: [bool; 2],
    /// Remote identifiers in join order.
    pub connected_remotes: Vec<String>,
    pub lighting: LightingState,
    pub sensors: SensorCache,
}

impl RuntimeState {
    /// Motion commands may reach the hardware only in this condition.
    pub fn motion_permitted(&self) -> bool {
        self.enabled && self.error == 0
    }
}

/// Lock-guarded handle to the [`RuntimeState`].
#[derive(Debug, Default)]
pub struct StateManager {
    inner: Mutex<RuntimeState>,
}

impl StateManager {
    pub fn new(initial: RuntimeState) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    // Closures passed to `read` / `update` never panic halfway through a
    // mutation, so a poisoned lock still guards a consistent record.
    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the whole record.
    pub fn snapshot(&self) -> RuntimeState {
        self.lock().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&RuntimeState) -> R) -> R {
        f(&self.lock())
    }

    /// Apply a multi-field mutation atomically.
    pub fn update<R>(&self, f: impl FnOnce(&mut RuntimeState) -> R) -> R {
        f(&mut self.lock())
    }

    // ── Safety gate ──────────────────────────────────────────────────────────

    pub fn enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    pub fn error(&self) -> u32 {
        self.lock().error
    }

    /// Record a hardware fault code, returning the previous one.
    pub fn set_error(&self, code: u32) -> u32 {
        std::mem::replace(&mut self.lock().error, code)
    }

    pub fn clear_error(&self) {
        self.lock().error = 0;
    }

    pub fn motion_permitted(&self) -> bool {
        self.lock().motion_permitted()
    }

    // ── Speech ───────────────────────────────────────────────────────────────

    pub fn speech_engine(&self) -> SpeechEngine {
        self.lock().speech_engine
    }

    pub fn set_speech_engine(&self, engine: SpeechEngine) {
        self.lock().speech_engine = engine;
    }

    // ── Uptime ───────────────────────────────────────────────────────────────

    /// Record the controller's uptime.  Values lower than the current one
    /// are ignored until [`StateManager::begin_core_session`] is called.
    pub fn record_core_uptime(&self, seconds: u64) -> u64 {
        let mut state = self.lock();
        if seconds < state.core_uptime {
            debug!(reported = seconds, current = state.core_uptime, "ignoring core uptime regression");
        } else {
            state.core_uptime = seconds;
        }
        state.core_uptime
    }

    /// The controller restarted: its uptime counts from zero again.
    pub fn begin_core_session(&self) {
        self.lock().core_uptime = 0;
    }

    pub fn record_os_uptime(&self, seconds: u64) -> u64 {
        let mut state = self.lock();
        state.os_uptime = state.os_uptime.max(seconds);
        state.os_uptime
    }

    // ── Battery ──────────────────────────────────────────────────────────────

    pub fn battery_voltages(&self) -> [f32; 2] {
        self.lock().battery_voltages
    }

    /// Start a new low-battery debounce episode.
    pub fn reset_battery_debounce(&self) {
        let mut state = self.lock();
        state.battery_notified = [false; 2];
        state.battery_sound_played = [false; 2];
    }

    // ── Remote roster ────────────────────────────────────────────────────────

    /// Add a remote; returns `true` when it was not yet connected.
    pub fn add_remote(&self, id: &str) -> bool {
        let mut state = self.lock();
        if state.connected_remotes.iter().any(|r| r == id) {
            return false;
        }
        state.connected_remotes.push(id.to_string());
        true
    }

    /// Remove a remote; returns `true` when it was connected.
    pub fn remove_remote(&self, id: &str) -> bool {
        let mut state = self.lock();
        let before = state.connected_remotes.len();
        state.connected_remotes.retain(|r| r != id);
        state.connected_remotes.len() != before
    }

    pub fn remotes(&self) -> Vec<String> {
        self.lock().connected_remotes.clone()
    }

    // ── Lighting ─────────────────────────────────────────────────────────────

    pub fn lighting(&self) -> LightingState {
        self.lock().lighting
    }

    pub fn set_lighting_update(&self, zone: LightingZone, interval: u32) {
        self.lock().lighting.get_mut(zone).update_interval = interval;
    }

    pub fn set_lighting_brightness(&self, zone: LightingZone, brightness: u32) {
        self.lock().lighting.get_mut(zone).brightness = brightness;
    }

    pub fn lighting_channel(&self, zone: LightingZone) -> LightingChannel {
        *self.lock().lighting.get(zone)
    }

    // ── Sensors ──────────────────────────────────────────────────────────────

    pub fn sensors(&self) -> SensorCache {
        self.lock().sensors.clone()
    }

    pub fn set_orientation(&self, orientation: Orientation) {
        self.lock().sensors.orientation = orientation;
    }

    /// Apply a change to the environment reading and return the result.
    pub fn update_environment(&self, f: impl FnOnce(&mut Environment)) -> Environment {
        let mut state = self.lock();
        f(&mut state.sensors.environment);
        state.sensors.environment
    }

    pub fn set_temperatures(&self, temperatures: Vec<f32>) {
        self.lock().sensors.temperatures = temperatures;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn defaults_are_safe() {
        let state = StateManager::default();
        assert!(!state.enabled());
        assert_eq!(state.error(), 0);
        assert!(!state.motion_permitted());
        assert_eq!(state.speech_engine(), SpeechEngine::Espeak);
        assert_eq!(state.lighting_channel(LightingZone::Base).update_interval, 200);
    }

    #[test]
    fn motion_requires_enabled_and_no_fault() {
        let state = StateManager::default();
        state.set_enabled(true);
        assert!(state.motion_permitted());
        assert_eq!(state.set_error(3), 0);
        assert!(!state.motion_permitted());
        state.clear_error();
        assert!(state.motion_permitted());
    }

    #[test]
    fn roster_preserves_insertion_order_and_rejects_duplicates() {
        let state = StateManager::default();
        assert!(state.add_remote("R2|1.0|kevinbot.remote"));
        assert!(state.add_remote("R1|1.0|kevinbot.remote"));
        assert!(!state.add_remote("R2|1.0|kevinbot.remote"));
        assert_eq!(state.remotes(), vec!["R2|1.0|kevinbot.remote", "R1|1.0|kevinbot.remote"]);

        assert!(state.remove_remote("R2|1.0|kevinbot.remote"));
        assert!(!state.remove_remote("R2|1.0|kevinbot.remote"));
        assert_eq!(state.remotes(), vec!["R1|1.0|kevinbot.remote"]);
    }

    #[test]
    fn core_uptime_never_decreases_within_a_session() {
        let state = StateManager::default();
        assert_eq!(state.record_core_uptime(10), 10);
        assert_eq!(state.record_core_uptime(4), 10);
        state.begin_core_session();
        assert_eq!(state.record_core_uptime(4), 4);

        assert_eq!(state.record_os_uptime(100), 100);
        assert_eq!(state.record_os_uptime(50), 100);
    }

    #[test]
    fn battery_debounce_reset_clears_both_cells() {
        let state = StateManager::default();
        state.update(|s| {
            s.battery_notified = [true, true];
            s.battery_sound_played = [true, false];
        });
        state.reset_battery_debounce();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.battery_notified, [false, false]);
        assert_eq!(snapshot.battery_sound_played, [false, false]);
    }

    #[test]
    fn environment_fields_update_independently() {
        let state = StateManager::default();
        state.update_environment(|env| env.temperature = 21.5);
        let env = state.update_environment(|env| env.humidity = 40.0);
        assert_eq!(env.temperature, 21.5);
        assert_eq!(env.humidity, 40.0);
        assert_eq!(env.pressure, 0.0);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let state = Arc::new(StateManager::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    for j in 0..50 {
                        state.add_remote(&format!("R{i}-{j}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(state.remotes().len(), 400);
    }
}
