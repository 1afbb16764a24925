//! `kevinbot-bridge` – the communication bridge service
//!
//! Connects the hardware controller (core link), the operator remotes
//! (XBee remote link), the optional eye controller and the telemetry
//! broker, and enforces the enable/disable safety rules between them.
//!
//! # Modules
//!
//! - [`config`] – [`BridgeConfig`], loaded from TOML.
//! - [`hardware`] – core link vocabulary.
//! - [`remote`] – remote link vocabulary.
//! - [`handshake`] – core readiness polling and the remote handshake.
//! - [`service`] – [`BridgeService`]: read loops, routing and heartbeat.
//! - [`logging`] – tracing subscriber and OTLP export.

pub mod config;
mod context;
pub mod handshake;
pub mod hardware;
pub mod logging;
mod monitor;
pub mod remote;
pub mod service;
mod transitions;

pub use config::{BridgeConfig, HeartbeatMode, LogFormat, LoggingConfig, Secret};
pub use context::BridgeLinks;
pub use logging::{TracerProviderGuard, init_tracing};
pub use monitor::{NOTIFICATION_TITLE, bme_value, low_battery_body};
pub use service::{BridgeInbound, BridgeService};
