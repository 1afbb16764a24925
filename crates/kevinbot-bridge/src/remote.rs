//! Remote link vocabulary.
//!
//! Every inbound remote frame maps onto exactly one [`RemoteCommand`]
//! variant; keys the bridge does not know become
//! [`RemoteCommand::Unrecognized`] and keep their raw line so they can be
//! forwarded to the hardware untouched.

use kevinbot_link::Frame;
use kevinbot_link::codec::parse_bool;
use kevinbot_types::{DecodeError, LightingZone, SpeechEngine};

use crate::hardware;

// ── Outbound keys ────────────────────────────────────────────────────────────

pub const ENABLED: &str = "kevinbot.enabled";
pub const ENABLE_FAILED: &str = "kevinbot.enablefailed";
pub const ESTOP: &str = "system.estop";
pub const UPTIME: &str = "system.uptime";
pub const HANDSHAKE_START: &str = "handshake.start";
pub const HANDSHAKE_END: &str = "handshake.end";
pub const SPEECH_ENGINE: &str = "system.speechEngine";
pub const IMU: &str = "sensors.imu";
pub const BME: &str = "sensors.bme";

/// Prefix of eye controller reports relayed to the remotes.
pub const EYE_SETTINGS_PREFIX: &str = "eye_settings.";

/// `lighting.<zone>.<param>`.
pub fn lighting_key(zone: LightingZone, param: LightingParam) -> String {
    format!("lighting.{zone}.{}", param.as_str())
}

// ── Lighting ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightingParam {
    Effect,
    Color1,
    Color2,
    Update,
    Brightness,
}

impl LightingParam {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "effect" => LightingParam::Effect,
            "color1" => LightingParam::Color1,
            "color2" => LightingParam::Color2,
            "update" => LightingParam::Update,
            "brightness" => LightingParam::Brightness,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LightingParam::Effect => "effect",
            LightingParam::Color1 => "color1",
            LightingParam::Color2 => "color2",
            LightingParam::Update => "update",
            LightingParam::Brightness => "brightness",
        }
    }

    /// Suffix of the matching core key.
    fn core_suffix(self) -> &'static str {
        match self {
            LightingParam::Brightness => "effect_brightness",
            other => other.as_str(),
        }
    }

    /// Whether the value is a cached integer.
    pub fn is_cached(self) -> bool {
        matches!(self, LightingParam::Update | LightingParam::Brightness)
    }
}

// ── Motion ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionAxis {
    HeadX,
    HeadY,
    DriveLeft,
    DriveRight,
    Arms,
}

impl MotionAxis {
    fn parse(key: &str) -> Option<Self> {
        Some(match key {
            "head.position.x" => MotionAxis::HeadX,
            "head.position.y" => MotionAxis::HeadY,
            "drivebase.left" => MotionAxis::DriveLeft,
            "drivebase.right" => MotionAxis::DriveRight,
            "arms.positions" => MotionAxis::Arms,
            _ => return None,
        })
    }

    pub fn core_key(self) -> &'static str {
        match self {
            MotionAxis::HeadX => "head_x",
            MotionAxis::HeadY => "head_y",
            MotionAxis::DriveLeft => "left_motor",
            MotionAxis::DriveRight => "right_motor",
            MotionAxis::Arms => "arms",
        }
    }
}

// ── Commands ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCommand {
    RemoteListAdd(String),
    RemoteListRemove(String),
    RemoteListFetch,
    RemoteStatus(String),
    Ping { target: String, sender: String },
    RequestEnable(bool),
    RequestEstop,
    RequestShutdown,
    SpeechEngine(SpeechEngine),
    Speak(String),
    Lighting {
        zone: LightingZone,
        param: LightingParam,
        value: String,
    },
    CameraBrightness(String),
    Eye { command: String, value: String },
    Motion { axis: MotionAxis, value: String },
    Unrecognized { raw: Vec<u8> },
}

fn invalid(frame: &Frame) -> DecodeError {
    DecodeError::InvalidValue {
        key: frame.key.clone(),
        value: frame.value.clone(),
    }
}

impl RemoteCommand {
    /// Classify `frame`; `raw` is the line as read and is kept for
    /// unrecognized keys.
    pub fn parse(frame: &Frame, raw: &[u8]) -> Result<Self, DecodeError> {
        let key = frame.key.as_str();
        let value = frame.value.clone();
        let command = match key {
            "connection.remotes.add" => RemoteCommand::RemoteListAdd(value),
            "connection.remotes.remove" => RemoteCommand::RemoteListRemove(value),
            "connection.remotes.get" => RemoteCommand::RemoteListFetch,
            "connection.remote.status" => RemoteCommand::RemoteStatus(value),
            "connection.ping" => {
                let (target, sender) = frame.value.split_once(',').ok_or_else(|| DecodeError::FieldCount {
                    key: frame.key.clone(),
                    expected: 2,
                    found: 1,
                })?;
                RemoteCommand::Ping {
                    target: target.trim().to_string(),
                    sender: sender.trim().to_string(),
                }
            }
            "kevinbot.request.enable" => {
                RemoteCommand::RequestEnable(parse_bool(&frame.value).ok_or_else(|| invalid(frame))?)
            }
            "kevinbot.request.estop" => RemoteCommand::RequestEstop,
            "system.shutdown" => RemoteCommand::RequestShutdown,
            SPEECH_ENGINE => RemoteCommand::SpeechEngine(frame.value.parse().map_err(|_| invalid(frame))?),
            "system.speak" => RemoteCommand::Speak(value),
            "lighting.camera.brightness" => RemoteCommand::CameraBrightness(value),
            _ => {
                if let Some(command) = key.strip_prefix("eyes.") {
                    RemoteCommand::Eye {
                        command: command.to_string(),
                        value,
                    }
                } else if let Some(axis) = MotionAxis::parse(key) {
                    RemoteCommand::Motion { axis, value }
                } else if let Some(lighting) = parse_lighting(frame)? {
                    lighting
                } else {
                    RemoteCommand::Unrecognized { raw: raw.to_vec() }
                }
            }
        };
        Ok(command)
    }
}

fn parse_lighting(frame: &Frame) -> Result<Option<RemoteCommand>, DecodeError> {
    let Some(rest) = frame.key.strip_prefix("lighting.") else {
        return Ok(None);
    };
    let Some((zone, param)) = rest.split_once('.') else {
        return Ok(None);
    };
    let (Ok(zone), Some(param)) = (zone.parse::<LightingZone>(), LightingParam::parse(param)) else {
        return Ok(None);
    };
    if param.is_cached() {
        lighting_number(&frame.key, &frame.value)?;
    }
    Ok(Some(RemoteCommand::Lighting {
        zone,
        param,
        value: frame.value.clone(),
    }))
}

/// Integer value of a cached lighting parameter.
pub fn lighting_number(key: &str, value: &str) -> Result<u32, DecodeError> {
    value.trim().parse().map_err(|_| DecodeError::InvalidNumber {
        field: key.to_string(),
        value: value.to_string(),
    })
}

/// Core key and value for a lighting change.
pub fn lighting_core_frame(zone: LightingZone, param: LightingParam, value: &str) -> (String, String) {
    (hardware::zone_key(zone, param.core_suffix()), value.to_string())
}
