//! `kevinbot-hal` – host effectors.
//!
//! Speech, sound playback, desktop notifications and power control of the
//! machine the bridge runs on, each behind its own trait.
//!
//! # Modules
//!
//! - [`effector`] – the [`Speaker`], [`SoundPlayer`], [`Notifier`] and
//!   [`PowerControl`] traits.
//! - [`effectors`] – the [`Effectors`] bundle.
//! - [`process`] – [`CommandHost`], which shells out to host programs.
//! - [`recording`] – [`RecordingHost`], which only records.
//! - [`uptime`] – host uptime.

pub mod effector;
pub mod effectors;
pub mod process;
pub mod recording;
pub mod uptime;

pub use effector::{Notification, Notifier, PowerControl, Sound, SoundPlayer, Speaker, Urgency};
pub use effectors::Effectors;
pub use process::{CommandHost, HostCommands};
pub use recording::{HostAction, RecordingHost};
pub use uptime::os_uptime;
