//! Safety transitions.
//!
//! Every function here runs on the command queue executor.  State is
//! updated before any write goes out, and every write made while the robot
//! may be enabled goes through [`Context::checked_write`], so a failed write
//! on either link never leaves the robot marked enabled.  Writes to the two
//! links are independent: a failure on one does not keep the other from
//! hearing about a disable.

use kevinbot_kernel::{EnableDecision, decide_enable};
use kevinbot_types::{ComError, LightingZone, fault_description};
use tracing::{debug, error, info, instrument, warn};

use crate::context::Context;
use crate::handshake::run_core_handshake;
use crate::hardware;
use crate::remote;

impl Context {
    /// Honour a `RequestEnable(true)`.  The decision is taken against the
    /// state at execution time, so back-to-back requests enable once.
    #[instrument(skip(self))]
    pub(crate) fn enable(&self) -> Result<(), ComError> {
        let decision = self.state.update(|state| {
            let decision = decide_enable(state);
            if decision == EnableDecision::Enable {
                state.enabled = true;
            }
            decision
        });
        match decision {
            EnableDecision::Enable => {
                if let Err(e) = self.links.core.send_frame(hardware::TRY_ENABLE, "true") {
                    self.state.set_enabled(false);
                    return Err(e);
                }
                self.checked_write(self.links.remote.send_frame(remote::ENABLED, "true"))?;
                info!("robot enabled");
                Ok(())
            }
            EnableDecision::AlreadyEnabled => {
                debug!("enable requested while already enabled");
                Ok(())
            }
            EnableDecision::Rejected { error } => {
                warn!(error, fault = fault_description(error), "enable rejected: hardware fault latched");
                self.checked_write(self.links.remote.send_frame(remote::ENABLE_FAILED, &error.to_string()))
            }
        }
    }

    /// Lights off, motion off, both links told.
    #[instrument(skip(self))]
    pub(crate) fn disable(&self) -> Result<(), ComError> {
        let was_enabled = self.state.enabled();
        self.state.set_enabled(false);
        let core = self.write_core_disable();
        let remote = self.links.remote.send_frame(remote::ENABLED, "false");
        info!(was_enabled, "robot disabled");
        core.and(remote)
    }

    /// Disable after a fault, logging why.
    pub(crate) fn forced_disable(&self, reason: &str) -> Result<(), ComError> {
        warn!(reason, "forcing disable");
        self.disable()
    }

    /// Pass `result` through; a failed write drops an enabled robot to
    /// disabled.
    pub(crate) fn checked_write(&self, result: Result<(), ComError>) -> Result<(), ComError> {
        if result.is_err() && self.state.enabled() {
            if let Err(e) = self.forced_disable("link write failed") {
                warn!(error = %e, "forced disable incomplete");
            }
        }
        result
    }

    /// Emergency stop; with `power_off` the host shuts down once both links
    /// have flushed.
    #[instrument(skip(self))]
    pub(crate) fn estop(&self, power_off: bool) -> Result<(), ComError> {
        self.state.set_enabled(false);
        let core = self
            .links
            .core
            .send_frame(hardware::ESTOP, "")
            .and_then(|()| self.write_core_disable());
        let remote = self
            .links
            .remote
            .send_frame(remote::ESTOP, "")
            .and_then(|()| self.links.remote.send_frame(remote::ENABLED, "false"));
        error!(power_off, "emergency stop");

        if power_off {
            for link in [&self.links.core, &self.links.remote] {
                if let Err(e) = link.flush() {
                    warn!(link = %link.link(), error = %e, "flush before power-off failed");
                }
            }
            self.effectors.power.power_off()?;
        }
        core.and(remote)
    }

    /// The controller restarted: handshake again, then come up disabled
    /// with a clean fault and battery record.
    #[instrument(skip(self))]
    pub(crate) fn core_handshake(&self) -> Result<(), ComError> {
        run_core_handshake(self.links.core.as_ref(), &self.ready, &self.config.handshake_policy())?;
        self.state.begin_core_session();
        let disabled = self.disable();
        self.state.reset_battery_debounce();
        self.state.clear_error();
        disabled
    }

    /// Reset every lighting zone, then tell the controller it is disabled.
    fn write_core_disable(&self) -> Result<(), ComError> {
        let core = &self.links.core;
        let lighting = &self.config.lighting;
        for zone in LightingZone::ALL {
            core.send_frame(&hardware::zone_key(zone, "effect"), &lighting.default_effect)?;
            core.send_frame(&hardware::zone_key(zone, "color1"), &lighting.default_color)?;
        }
        core.send_frame(hardware::ENABLED, "false")
    }

    /// Send a newly joined remote everything it needs to render the robot.
    pub(crate) fn remote_handshake(&self, remote_id: &str) -> Result<(), ComError> {
        let snapshot = self.state.snapshot();
        let frames = crate::handshake::remote_handshake_frames(
            remote_id,
            &snapshot,
            &self.self_tag,
            self.config.com.data_max,
        );
        for (key, value) in &frames {
            self.checked_write(self.links.remote.send_frame(key, value))?;
        }
        info!(remote = remote_id, frames = frames.len(), "remote handshake sent");
        Ok(())
    }

    /// Answer a roster request.
    pub(crate) fn send_roster(&self) -> Result<(), ComError> {
        let payload = kevinbot_kernel::roster::roster_payload(&self.self_tag, self.state.remotes());
        for (key, value) in kevinbot_kernel::roster::roster_frames(&payload, self.config.com.data_max) {
            self.checked_write(self.links.remote.send_frame(&key, &value))?;
        }
        Ok(())
    }
}
