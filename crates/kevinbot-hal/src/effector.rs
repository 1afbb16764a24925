//! Host effector traits.
//!
//! Everything the bridge does to the host machine itself (as opposed to the
//! robot hardware) goes through one of these traits.  Drivers are bundled
//! into an [`Effectors`][crate::effectors::Effectors] set so the bridge can
//! swap the real host for a recording mock without touching routing logic.
//!
//! All calls are blocking.  They are only ever issued from the command
//! queue executor, which serializes them.

use std::fmt;

use kevinbot_types::{ComError, SpeechEngine};

/// Speech synthesis.
pub trait Speaker: Send + Sync {
    /// Speak `text` with `engine`, returning once playback is finished.
    fn speak(&self, engine: SpeechEngine, text: &str) -> Result<(), ComError>;
}

/// A canned sound effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sound {
    LowBattery,
    DeviceNotify,
}

impl fmt::Display for Sound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sound::LowBattery => write!(f, "low-battery"),
            Sound::DeviceNotify => write!(f, "device-notify"),
        }
    }
}

/// Sound effect playback.
pub trait SoundPlayer: Send + Sync {
    fn play(&self, sound: Sound) -> Result<(), ComError>;
}

/// Desktop notification urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    /// Stays on screen until dismissed.
    Critical,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }
}

/// A desktop notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub urgency: Urgency,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            urgency: Urgency::Normal,
        }
    }

    pub fn critical(mut self) -> Self {
        self.urgency = Urgency::Critical;
        self
    }
}

/// Desktop notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), ComError>;
}

/// Host power management.
pub trait PowerControl: Send + Sync {
    fn power_off(&self) -> Result<(), ComError>;
}
