//! Core and remote handshakes.
//!
//! The core handshake blocks the command queue executor while it polls the
//! hardware controller, so nothing else reaches the controller until it has
//! answered.  The core read loop keeps running meanwhile and raises the
//! [`ReadySignal`] when the answer arrives.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use kevinbot_kernel::roster::{roster_frames, roster_payload};
use kevinbot_kernel::state::RuntimeState;
use kevinbot_link::LinkWriter;
use kevinbot_types::{ComError, LightingZone};
use tracing::{debug, info, warn};

use crate::hardware;
use crate::remote::{self, LightingParam};

// ─────────────────────────────────────────────────────────────────────────────
// Ready signal
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Pending,
    Cancelled,
}

#[derive(Debug, Default)]
struct ReadyFlags {
    ready: bool,
    cancelled: bool,
}

/// Hand-off between the core read loop and a handshake in progress.
#[derive(Debug, Default)]
pub struct ReadySignal {
    flags: Mutex<ReadyFlags>,
    cond: Condvar,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget a previous answer.
    pub fn reset(&self) {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner).ready = false;
    }

    /// The controller answered.
    pub fn signal(&self) {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner).ready = true;
        self.cond.notify_all();
    }

    /// Abort every current and future wait.
    pub fn cancel(&self) {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner).cancelled = true;
        self.cond.notify_all();
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Readiness {
        let deadline = Instant::now() + timeout;
        let mut flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if flags.cancelled {
                return Readiness::Cancelled;
            }
            if flags.ready {
                return Readiness::Ready;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Readiness::Pending;
            }
            flags = self
                .cond
                .wait_timeout(flags, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Core handshake
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakePolicy {
    /// Pause between `connection.isready` polls.
    pub interval: Duration,
    /// `None` polls until the controller answers.
    pub max_attempts: Option<u32>,
}

impl Default for HandshakePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_attempts: None,
        }
    }
}

/// Poll the controller until it reports ready, then open the session.
///
/// Returns the number of polls it took.  A failed poll write is logged and
/// retried; a failed session write is returned.
pub fn run_core_handshake(
    core: &dyn LinkWriter,
    ready: &ReadySignal,
    policy: &HandshakePolicy,
) -> Result<u32, ComError> {
    ready.reset();
    let mut attempts = 0u32;
    loop {
        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(ComError::HandshakeTimeout { attempts });
        }
        attempts += 1;
        if let Err(e) = core.send_frame(hardware::IS_READY, "") {
            warn!(attempt = attempts, error = %e, "readiness poll failed");
        }
        match ready.wait_timeout(policy.interval) {
            Readiness::Ready => break,
            Readiness::Pending => debug!(attempt = attempts, "core not ready yet"),
            Readiness::Cancelled => {
                return Err(ComError::Channel("core handshake cancelled".to_string()));
            }
        }
    }
    for key in [hardware::CONNECTION_START, hardware::CLEAR_ERRORS, hardware::CONNECTION_OK] {
        core.send_frame(key, "")?;
    }
    info!(attempts, "core handshake complete");
    Ok(attempts)
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote handshake
// ─────────────────────────────────────────────────────────────────────────────

/// Frames that bring a newly joined remote up to date, in send order:
/// start marker, enable state, speech engine, per-zone lighting, the
/// roster, end marker.
pub fn remote_handshake_frames(
    remote_id: &str,
    state: &RuntimeState,
    self_tag: &str,
    data_max: usize,
) -> Vec<(String, String)> {
    let mut frames = vec![
        (remote::HANDSHAKE_START.to_string(), remote_id.to_string()),
        (remote::ENABLED.to_string(), state.enabled.to_string()),
        (remote::SPEECH_ENGINE.to_string(), state.speech_engine.to_string()),
    ];
    for zone in LightingZone::ALL {
        let channel = state.lighting.get(zone);
        frames.push((
            remote::lighting_key(zone, LightingParam::Update),
            channel.update_interval.to_string(),
        ));
        frames.push((
            remote::lighting_key(zone, LightingParam::Brightness),
            channel.brightness.to_string(),
        ));
    }
    let roster = roster_payload(self_tag, &state.connected_remotes);
    frames.extend(roster_frames(&roster, data_max));
    frames.push((remote::HANDSHAKE_END.to_string(), remote_id.to_string()));
    frames
}
