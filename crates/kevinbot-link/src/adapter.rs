//! Transport seams.
//!
//! The bridge never touches a serial port or a broker client directly.  It
//! writes through a [`LinkWriter`], reads decoded lines from an
//! [`InboundFrames`] channel, and exchanges telemetry through a
//! [`TelemetrySink`] / [`TelemetrySource`] pair.
//!
//! | Seam | Production | Tests |
//! |---|---|---|
//! | [`LinkWriter`] | [`SerialLineLink`][crate::serial::SerialLineLink], [`XBeeLink`][crate::serial::XBeeLink] | [`MemoryLink`][crate::memory::MemoryLink] |
//! | [`TelemetrySink`] | [`MqttTelemetry`][crate::mqtt::MqttTelemetry] | [`TelemetryBus`][crate::bus::TelemetryBus] |
//! | [`TelemetrySource`] | [`MqttSubscription`][crate::mqtt::MqttSubscription] | [`TopicSubscriber`][crate::bus::TopicSubscriber] |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kevinbot_types::{ComError, Link};
use tokio::sync::mpsc;

use crate::codec;

/// Buffered inbound lines per link before the reader thread blocks.
pub const INBOUND_CAPACITY: usize = 256;

/// One inbound item: a raw line (or RF payload), or the fault that ended the
/// reader.
pub type Inbound = Result<Vec<u8>, ComError>;

/// Receiving half of a link, drained by the bridge's read loops.
pub type InboundFrames = mpsc::Receiver<Inbound>;

/// Outbound half of a link.
///
/// Writes are synchronous: they are issued from the command executor
/// thread, which is the only place allowed to talk to the hardware.
pub trait LinkWriter: Send + Sync {
    /// Which link this writer drives.
    fn link(&self) -> Link;

    /// Write one already-encoded line.
    fn send(&self, line: &[u8]) -> Result<(), ComError>;

    /// Block until buffered output has left the host.
    fn flush(&self) -> Result<(), ComError> {
        Ok(())
    }

    /// Encode and write a `key=value` frame.
    fn send_frame(&self, key: &str, value: &str) -> Result<(), ComError> {
        self.send(&codec::encode(key, value))
    }
}

/// A message received from the telemetry broker.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryMessage {
    pub topic: String,
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

impl TelemetryMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Time since the message arrived; zero if the clock stepped backwards.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.received_at).to_std().unwrap_or_default()
    }
}

/// Fire-and-forget publisher for telemetry topics.
pub trait TelemetrySink: Send + Sync {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), ComError>;
}

/// Stream of subscribed telemetry messages.
#[async_trait]
pub trait TelemetrySource: Send {
    /// Next message, or `None` once the source is closed.
    async fn next(&mut self) -> Option<TelemetryMessage>;
}
