//! Battery monitoring and sensor telemetry routing.

use std::sync::Arc;

use kevinbot_hal::{Notification, Sound};
use kevinbot_kernel::LowCell;
use kevinbot_kernel::battery::raw_to_volts;
use kevinbot_link::TelemetryMessage;
use kevinbot_link::codec::parse_list;
use kevinbot_types::{ComError, DecodeError, Environment, Orientation};
use tracing::{debug, trace, warn};

use crate::context::Context;
use crate::remote;

pub const NOTIFICATION_TITLE: &str = "Kevinbot System";

/// Desktop notification body for the cells that just went low.
pub fn low_battery_body(cells: &[LowCell]) -> String {
    cells
        .iter()
        .map(|cell| format!("Battery #{} is critically low.\nVoltage: {}V", cell.index + 1, cell.volts))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Which sensor a telemetry topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensorTopic {
    Imu,
    Temperature,
    Humidity,
    Pressure,
}

impl Context {
    fn sensor_topic(&self, topic: &str) -> Option<SensorTopic> {
        let topics = &self.config.topics;
        if topic == topics.imu {
            Some(SensorTopic::Imu)
        } else if topic == topics.temperature {
            Some(SensorTopic::Temperature)
        } else if topic == topics.humidity {
            Some(SensorTopic::Humidity)
        } else if topic == topics.pressure {
            Some(SensorTopic::Pressure)
        } else {
            None
        }
    }

    /// Store a `bms.voltages` frame, publish it and queue any warnings.
    pub(crate) fn on_voltages(self: &Arc<Self>, raw: [u32; 2]) {
        let volts = raw.map(raw_to_volts);
        let alert = self.state.update(|state| self.battery.assess(state, volts));
        for (topic, value) in self.config.topics.batteries().into_iter().zip(volts) {
            self.publish(topic, value);
        }
        if alert.is_empty() {
            return;
        }
        warn!(?volts, cells = ?alert.notify, "battery low");
        if alert.play_sound {
            self.submit("low battery sound", |ctx| ctx.effectors.sounds.play(Sound::LowBattery));
        }
        if !alert.notify.is_empty() {
            let notification = Notification::new(NOTIFICATION_TITLE, low_battery_body(&alert.notify)).critical();
            self.submit("low battery notification", move |ctx| {
                ctx.effectors.notifier.notify(&notification)
            });
        }
    }

    /// Cache a sensor reading from the broker and re-broadcast it to the
    /// remotes.  Malformed payloads leave the cache untouched.
    pub(crate) fn on_telemetry(&self, message: &TelemetryMessage) -> Result<(), ComError> {
        let Some(sensor) = self.sensor_topic(&message.topic) else {
            trace!(topic = %message.topic, "ignoring unsubscribed topic");
            return Ok(());
        };
        let age = message.age();
        if age > self.config.telemetry_max_age() {
            debug!(topic = %message.topic, received_at = %message.received_at, ?age, "dropping stale telemetry");
            return Ok(());
        }
        match parse_sensor(sensor, &message.topic, &message.payload) {
            Ok(values) => self.apply_sensor(sensor, &values),
            Err(e) => {
                warn!(topic = %message.topic, payload = %message.payload, error = %e, "dropping malformed telemetry");
                Ok(())
            }
        }
    }

    fn apply_sensor(&self, sensor: SensorTopic, values: &[f32]) -> Result<(), ComError> {
        match sensor {
            SensorTopic::Imu => {
                let orientation = Orientation {
                    roll: values[0],
                    pitch: values[1],
                    yaw: values[2],
                };
                self.state.set_orientation(orientation);
                self.links.remote.send_frame(
                    remote::IMU,
                    &format!("{},{},{}", orientation.roll, orientation.pitch, orientation.yaw),
                )
            }
            SensorTopic::Temperature => {
                self.state.update_environment(|env| env.temperature = values[0]);
                Ok(())
            }
            SensorTopic::Humidity => {
                self.state.update_environment(|env| env.humidity = values[0]);
                Ok(())
            }
            SensorTopic::Pressure => {
                let env = self.state.update_environment(|env| env.pressure = values[0]);
                self.links.remote.send_frame(remote::BME, &bme_value(&env))
            }
        }
    }

    /// Environment reading reported by the controller itself.
    pub(crate) fn on_core_environment(&self, reading: Environment) {
        debug!(?reading, "core environment reading");
        self.state.update_environment(|env| *env = reading);
    }
}

fn parse_sensor(sensor: SensorTopic, topic: &str, payload: &str) -> Result<Vec<f32>, DecodeError> {
    let expected = if sensor == SensorTopic::Imu { 3 } else { 1 };
    let values: Vec<f32> = parse_list(topic, payload, Some(expected))?;
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(DecodeError::InvalidNumber {
            field: topic.to_string(),
            value: bad.to_string(),
        });
    }
    Ok(values)
}

/// `tC,tF,h,p`.
pub fn bme_value(env: &Environment) -> String {
    format!(
        "{},{},{},{}",
        env.temperature,
        env.temperature_fahrenheit(),
        env.humidity,
        env.pressure
    )
}
