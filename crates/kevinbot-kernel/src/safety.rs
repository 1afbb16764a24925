//! Enable / E-Stop decisions.
//!
//! ```text
//!            RequestEnable(true), error == 0
//!  Disabled ────────────────────────────────▶ Enabled
//!     ▲  ▲                                       │
//!     │  └──── disable / estop (always) ─────────┘
//!     │
//!  handshake clears error
//!     │
//!  Faulted  (error != 0; enable requests are rejected)
//! ```
//!
//! This module only decides.  The bridge executes the resulting transition
//! inside a queued command, re-evaluating the decision at execution time so
//! that two back-to-back enable requests write to the hardware once.

use std::fmt;

use crate::state::RuntimeState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableState {
    Disabled,
    Enabled,
    /// A hardware fault is latched.
    Faulted,
}

impl EnableState {
    pub fn of(state: &RuntimeState) -> Self {
        if state.error != 0 {
            EnableState::Faulted
        } else if state.enabled {
            EnableState::Enabled
        } else {
            EnableState::Disabled
        }
    }
}

impl fmt::Display for EnableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnableState::Disabled => write!(f, "disabled"),
            EnableState::Enabled => write!(f, "enabled"),
            EnableState::Faulted => write!(f, "faulted"),
        }
    }
}

/// Outcome of a `RequestEnable(true)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableDecision {
    /// Write try-enable to the hardware and announce it.
    Enable,
    /// Nothing to do.
    AlreadyEnabled,
    /// Tell the requester why not.
    Rejected { error: u32 },
}

pub fn decide_enable(state: &RuntimeState) -> EnableDecision {
    match EnableState::of(state) {
        EnableState::Faulted => EnableDecision::Rejected { error: state.error },
        EnableState::Enabled => EnableDecision::AlreadyEnabled,
        EnableState::Disabled => EnableDecision::Enable,
    }
}
