//! MQTT telemetry adapter.
//!
//! [`connect`] starts the client event loop on the current Tokio runtime
//! and returns a publishing half ([`MqttTelemetry`]) and a subscribed
//! stream ([`MqttSubscription`]).  Subscriptions are renewed after every
//! (re)connect; the event loop itself retries after a broker outage.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use kevinbot_types::{ComError, Link};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use zeroize::Zeroize;

use crate::adapter::{INBOUND_CAPACITY, TelemetryMessage, TelemetrySink, TelemetrySource};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Broker connection parameters.
#[derive(Clone)]
pub struct MqttSettings {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttSettings")
            .field("client_id", &self.client_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", if self.password.is_some() { &"<redacted>" } else { &"<not set>" })
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

impl Drop for MqttSettings {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// Publishing half of the MQTT connection.
#[derive(Clone)]
pub struct MqttTelemetry {
    client: AsyncClient,
}

impl TelemetrySink for MqttTelemetry {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), ComError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| ComError::io(Link::Telemetry, e))
    }
}

/// Subscribed half of the MQTT connection.
pub struct MqttSubscription {
    rx: mpsc::Receiver<TelemetryMessage>,
}

#[async_trait]
impl TelemetrySource for MqttSubscription {
    async fn next(&mut self) -> Option<TelemetryMessage> {
        self.rx.recv().await
    }
}

/// Connect to the broker and subscribe to `topics`.
///
/// Must be called from within a Tokio runtime.
pub fn connect(settings: &MqttSettings, topics: Vec<String>) -> (MqttTelemetry, MqttSubscription) {
    let mut options = MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);
    options.set_keep_alive(settings.keep_alive);
    if let Some(username) = &settings.username {
        options.set_credentials(username.clone(), settings.password.clone().unwrap_or_default());
    }

    let (client, mut eventloop) = AsyncClient::new(options, 64);
    let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
    let subscriber = client.clone();
    let host = format!("{}:{}", settings.host, settings.port);

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(broker = %host, "mqtt connected");
                    for topic in &topics {
                        if let Err(e) = subscriber.subscribe(topic.as_str(), QoS::AtMostOnce).await {
                            warn!(topic = %topic, error = %e, "mqtt subscribe failed");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let payload = match String::from_utf8(publish.payload.to_vec()) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(topic = %publish.topic, error = %e, "dropping non-UTF-8 telemetry");
                            continue;
                        }
                    };
                    trace!(topic = %publish.topic, payload = %payload, "telemetry received");
                    if tx.send(TelemetryMessage::new(publish.topic, payload)).await.is_err() {
                        debug!("telemetry subscription dropped; mqtt receive loop keeps publishing only");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(broker = %host, error = %e, "mqtt connection error; retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    });

    (MqttTelemetry { client }, MqttSubscription { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MqttSettings {
        MqttSettings {
            client_id: "kevinbot-com-service-test".to_string(),
            host: "localhost".to_string(),
            port: 1883,
            username: Some("kevin".to_string()),
            password: Some("hunter2".to_string()),
            keep_alive: Duration::from_secs(5),
        }
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", settings());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn publish_is_queued_without_a_broker() -> Result<(), Box<dyn std::error::Error>> {
        let (telemetry, _subscription) = connect(&settings(), vec!["imu".to_string()]);
        telemetry.publish("enabled", "false")?;
        Ok(())
    }
}
