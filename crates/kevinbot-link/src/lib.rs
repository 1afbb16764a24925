//! `kevinbot-link` – transports and wire codecs.
//!
//! Moves bytes between the bridge and the outside world without caring
//! about their meaning.
//!
//! # Modules
//!
//! - [`codec`] – `key=value` line codec shared by every serial link.
//! - [`xbee`] – XBee API-frame encoder and streaming decoder.
//! - [`adapter`] – the [`LinkWriter`], [`TelemetrySink`] and
//!   [`TelemetrySource`] seams.
//! - [`serial`] – serial line link and XBee radio link.
//! - [`mqtt`] – MQTT telemetry client.
//! - [`bus`] – in-process broadcast telemetry bus.
//! - [`memory`] – recording link for tests.

pub mod adapter;
pub mod bus;
pub mod codec;
pub mod memory;
pub mod mqtt;
pub mod serial;
pub mod xbee;

pub use adapter::{
    INBOUND_CAPACITY, Inbound, InboundFrames, LinkWriter, TelemetryMessage, TelemetrySink,
    TelemetrySource,
};
pub use bus::{TelemetryBus, TopicSubscriber};
pub use codec::Frame;
pub use memory::MemoryLink;
pub use mqtt::{MqttSettings, MqttSubscription, MqttTelemetry};
pub use serial::{SerialLineLink, SerialSettings, XBeeLink, XBeeSettings};
