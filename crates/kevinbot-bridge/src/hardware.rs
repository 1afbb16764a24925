//! Core link vocabulary: what the hardware controller sends and the keys
//! the bridge writes back.

use kevinbot_link::Frame;
use kevinbot_types::{DecodeError, LightingZone};

// ── Outbound keys ────────────────────────────────────────────────────────────

pub const IS_READY: &str = "connection.isready";
pub const CONNECTION_START: &str = "connection.start";
pub const CLEAR_ERRORS: &str = "core.errors.clear";
pub const CONNECTION_OK: &str = "connection.ok";
pub const TRY_ENABLE: &str = "kevinbot.tryenable";
pub const ENABLED: &str = "kevinbot.enabled";
pub const ESTOP: &str = "system.estop";
pub const TICK: &str = "system.tick";
pub const CAMERA_BRIGHTNESS: &str = "cam_brightness";

/// `<zone>_<suffix>`, e.g. `head_color1`.
pub fn zone_key(zone: LightingZone, suffix: &str) -> String {
    format!("{zone}_{suffix}")
}

// ── Inbound messages ─────────────────────────────────────────────────────────

/// A decoded line from the hardware controller.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreMessage {
    /// Answer to `connection.isready`.
    Ready,
    /// The controller restarted and wants a fresh handshake.
    RequestHandshake,
    /// Raw cell voltages in tenths of a volt.
    Voltages([u32; 2]),
    Error(u32),
    Uptime(u64),
    Temperatures(Vec<f32>),
    Environment { temperature: f32, humidity: f32, pressure: f32 },
    Enabled(bool),
    /// Anything else; relayed but otherwise ignored.
    Other,
}

impl CoreMessage {
    pub fn parse(frame: &Frame) -> Result<Self, DecodeError> {
        let message = match frame.key.as_str() {
            "ready" | "connection.ready" => CoreMessage::Ready,
            "connection.requesthandshake" => CoreMessage::RequestHandshake,
            "bms.voltages" => {
                let cells = frame.numbers::<u32>(2)?;
                CoreMessage::Voltages([cells[0], cells[1]])
            }
            "core.error" => CoreMessage::Error(single(frame)?),
            "core.uptime" => CoreMessage::Uptime(single(frame)?),
            "sensors.temps" => {
                let temps = kevinbot_link::codec::parse_list(&frame.key, &frame.value, None)?;
                CoreMessage::Temperatures(temps)
            }
            "sensors.bme" => {
                let v = frame.numbers::<f32>(3)?;
                CoreMessage::Environment {
                    temperature: v[0],
                    humidity: v[1],
                    pressure: v[2],
                }
            }
            ENABLED => CoreMessage::Enabled(frame.flag()?),
            _ => CoreMessage::Other,
        };
        Ok(message)
    }

    /// Handshake control lines stay between the bridge and the controller.
    pub fn is_handshake_control(&self) -> bool {
        matches!(self, CoreMessage::Ready | CoreMessage::RequestHandshake)
    }
}

fn single<T: std::str::FromStr>(frame: &Frame) -> Result<T, DecodeError> {
    frame.numbers::<T>(1).map(|mut v| v.remove(0))
}
