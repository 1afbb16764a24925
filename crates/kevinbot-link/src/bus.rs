//! In-process telemetry bus.
//!
//! Uses [`tokio::sync::broadcast`] so that every subscriber receives every
//! message without any single subscriber blocking the others.  It stands in
//! for the MQTT broker when the broker is disabled and in tests.
//!
//! | API | Use |
//! |---|---|
//! | [`TelemetryBus::publish_message`] | publish a full [`TelemetryMessage`] |
//! | [`TelemetryBus::subscribe`] | raw receiver for every topic |
//! | [`TelemetryBus::subscribe_topics`] | [`TopicSubscriber`] filtered to exact topic names |

use async_trait::async_trait;
use kevinbot_types::ComError;
use tokio::sync::broadcast;
use tracing::warn;

use crate::adapter::{TelemetryMessage, TelemetrySink, TelemetrySource};

/// Default channel capacity (number of buffered messages before old ones
/// are dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Shared telemetry bus. Clone it cheaply: all clones share one channel.
#[derive(Clone, Debug)]
pub struct TelemetryBus {
    sender: broadcast::Sender<TelemetryMessage>,
}

impl TelemetryBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a message.
    ///
    /// Returns the number of subscribers that were handed the message.
    /// `Ok(0)` when nobody is listening; that is normal for telemetry.
    pub fn publish_message(&self, message: TelemetryMessage) -> Result<usize, ComError> {
        match self.sender.send(message) {
            Ok(n) => Ok(n),
            Err(broadcast::error::SendError(_)) => Ok(0),
        }
    }

    /// Subscribe to every topic.
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryMessage> {
        self.sender.subscribe()
    }

    /// Subscribe to an exact set of topic names.  An empty set matches all.
    pub fn subscribe_topics<I, S>(&self, topics: I) -> TopicSubscriber
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TopicSubscriber {
            topics: topics.into_iter().map(Into::into).collect(),
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for TelemetryBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TelemetrySink for TelemetryBus {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), ComError> {
        self.publish_message(TelemetryMessage::new(topic, payload)).map(|_| ())
    }
}

/// A subscriber that only delivers messages on its topics.
pub struct TopicSubscriber {
    topics: Vec<String>,
    receiver: broadcast::Receiver<TelemetryMessage>,
}

impl TopicSubscriber {
    /// Wait for the next matching message.
    ///
    /// Returns `None` when the bus is closed and no further messages will
    /// arrive.
    pub async fn recv(&mut self) -> Option<TelemetryMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if self.matches(&message.topic) => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topics = ?self.topics, lagged_by = n, "telemetry subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn matches(&self, topic: &str) -> bool {
        self.topics.is_empty() || self.topics.iter().any(|t| t == topic)
    }
}

#[async_trait]
impl TelemetrySource for TopicSubscriber {
    async fn next(&mut self) -> Option<TelemetryMessage> {
        self.recv().await
    }
}
