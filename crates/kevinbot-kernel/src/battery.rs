//! Low-battery debounce policy.
//!
//! [`BatteryPolicy::assess`] runs inside a
//! [`StateManager::update`][crate::state::StateManager::update] closure: it
//! stores the new voltages, flips the per-cell debounce flags and reports
//! which warnings the caller should queue.  The flags are only reset by
//! [`StateManager::reset_battery_debounce`][crate::state::StateManager::reset_battery_debounce],
//! which the core handshake calls.

use kevinbot_types::WarnSoundPolicy;

use crate::state::RuntimeState;

/// Raw `bms.voltages` values are tenths of a volt.
pub const RAW_PER_VOLT: f32 = 10.0;

pub fn raw_to_volts(raw: u32) -> f32 {
    raw as f32 / RAW_PER_VOLT
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatteryPolicy {
    /// Per-cell warning threshold in volts.
    pub warn_voltages: [f32; 2],
    pub sound: WarnSoundPolicy,
    /// Whether the second cell is fitted.
    pub enable_two: bool,
}

impl Default for BatteryPolicy {
    fn default() -> Self {
        Self {
            warn_voltages: [10.5, 17.2],
            sound: WarnSoundPolicy::Once,
            enable_two: true,
        }
    }
}

/// A cell that dropped below its threshold for the first time this episode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowCell {
    /// Zero-based cell index.
    pub index: usize,
    pub volts: f32,
}

/// Warnings the caller should queue for one voltage frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatteryAlert {
    pub play_sound: bool,
    /// Cells to mention in a single desktop notification.
    pub notify: Vec<LowCell>,
}

impl BatteryAlert {
    pub fn is_empty(&self) -> bool {
        !self.play_sound && self.notify.is_empty()
    }
}

impl BatteryPolicy {
    fn cells(&self) -> usize {
        if self.enable_two { 2 } else { 1 }
    }

    pub fn assess(&self, state: &mut RuntimeState, volts: [f32; 2]) -> BatteryAlert {
        state.battery_voltages = volts;
        let mut alert = BatteryAlert::default();
        for index in 0..self.cells() {
            if volts[index] >= self.warn_voltages[index] {
                continue;
            }
            match self.sound {
                WarnSoundPolicy::Repeat => alert.play_sound = true,
                WarnSoundPolicy::Once => {
                    if !state.battery_sound_played[index] {
                        state.battery_sound_played[index] = true;
                        alert.play_sound = true;
                    }
                }
                WarnSoundPolicy::Never => {}
            }
            if !state.battery_notified[index] {
                state.battery_notified[index] = true;
                alert.notify.push(LowCell {
                    index,
                    volts: volts[index],
                });
            }
        }
        alert
    }
}
