use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The physical or logical channels the bridge talks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Link {
    /// Serial line to the low-level hardware controller.
    Core,
    /// XBee radio mesh to the handheld remotes.
    Remote,
    /// Serial line to the eye/head display controller.
    Eye,
    /// Publish/subscribe telemetry broker.
    Telemetry,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Core => write!(f, "core"),
            Link::Remote => write!(f, "remote"),
            Link::Eye => write!(f, "eye"),
            Link::Telemetry => write!(f, "telemetry"),
        }
    }
}

/// Speech synthesis backend used to render `system.speak` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechEngine {
    #[default]
    Espeak,
    Festival,
}

impl fmt::Display for SpeechEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeechEngine::Espeak => write!(f, "espeak"),
            SpeechEngine::Festival => write!(f, "festival"),
        }
    }
}

impl FromStr for SpeechEngine {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "espeak" => Ok(SpeechEngine::Espeak),
            "festival" => Ok(SpeechEngine::Festival),
            other => Err(DecodeError::InvalidValue {
                key: "speech engine".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// One of the three addressable lighting strips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightingZone {
    Head,
    Body,
    Base,
}

impl LightingZone {
    /// All zones in the order they are reset and reported.
    pub const ALL: [LightingZone; 3] = [LightingZone::Head, LightingZone::Body, LightingZone::Base];

    pub fn as_str(self) -> &'static str {
        match self {
            LightingZone::Head => "head",
            LightingZone::Body => "body",
            LightingZone::Base => "base",
        }
    }
}

impl fmt::Display for LightingZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LightingZone {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "head" => Ok(LightingZone::Head),
            "body" => Ok(LightingZone::Body),
            "base" => Ok(LightingZone::Base),
            other => Err(DecodeError::InvalidValue {
                key: "lighting zone".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Cached animation parameters of a single lighting zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightingChannel {
    /// Effect frame interval in milliseconds.
    pub update_interval: u32,
    pub brightness: u32,
}

impl Default for LightingChannel {
    fn default() -> Self {
        Self {
            update_interval: 200,
            brightness: 120,
        }
    }
}

/// Lighting parameters for every zone, handed to newly joined remotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LightingState {
    pub head: LightingChannel,
    pub body: LightingChannel,
    pub base: LightingChannel,
}

impl LightingState {
    pub fn get(&self, zone: LightingZone) -> &LightingChannel {
        match zone {
            LightingZone::Head => &self.head,
            LightingZone::Body => &self.body,
            LightingZone::Base => &self.base,
        }
    }

    pub fn get_mut(&mut self, zone: LightingZone) -> &mut LightingChannel {
        match zone {
            LightingZone::Head => &mut self.head,
            LightingZone::Body => &mut self.body,
            LightingZone::Base => &mut self.base,
        }
    }
}

/// Last-known IMU orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Orientation {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

/// Last-known environmental reading.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Environment {
    /// Degrees Celsius.
    pub temperature: f32,
    /// Relative humidity, percent.
    pub humidity: f32,
    /// Hectopascal.
    pub pressure: f32,
}

impl Environment {
    pub fn temperature_fahrenheit(&self) -> f32 {
        self.temperature * 1.8 + 32.0
    }
}

/// Telemetry cache; every field is updated independently.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorCache {
    pub orientation: Orientation,
    pub environment: Environment,
    /// Controller-side temperature probes, in the order the core reports them.
    pub temperatures: Vec<f32>,
}

/// When to play the low-battery warning sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarnSoundPolicy {
    /// Every low-voltage frame.
    Repeat,
    /// First low-voltage frame of each debounce episode.
    #[default]
    Once,
    Never,
}

/// Human-readable description of a hardware-reported `core.error` code.
pub fn fault_description(code: u32) -> &'static str {
    match code {
        0 => "no fault",
        1 => "invalid arm startup position",
        2 => "invalid command",
        3 => "BME280 setup failed",
        4 => "BME280 read failed",
        5 => "one-wire bus short",
        6 => "one-wire bus error",
        7 => "one-wire device not found",
        _ => "unknown fault",
    }
}

/// A single frame could not be turned into a typed message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame is not valid UTF-8 (valid up to byte {valid_up_to})")]
    Encoding { valid_up_to: usize },

    #[error("field '{field}' is not numeric: {value:?}")]
    InvalidNumber { field: String, value: String },

    #[error("'{key}' expects {expected} fields, got {found}")]
    FieldCount {
        key: String,
        expected: usize,
        found: usize,
    },

    #[error("invalid value for '{key}': {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("malformed radio frame: {0}")]
    Frame(String),
}

/// Error type spanning decode failures, transport faults and host actions.
#[derive(Error, Debug)]
pub enum ComError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("I/O fault on {link} link: {details}")]
    Io { link: Link, details: String },

    #[error("cannot open {link} link: {details}")]
    Open { link: Link, details: String },

    #[error("host action '{action}' failed: {details}")]
    Host { action: String, details: String },

    #[error("core handshake gave up after {attempts} attempts")]
    HandshakeTimeout { attempts: u32 },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ComError {
    pub fn io(link: Link, details: impl fmt::Display) -> Self {
        ComError::Io {
            link,
            details: details.to_string(),
        }
    }

    pub fn host(action: impl Into<String>, details: impl fmt::Display) -> Self {
        ComError::Host {
            action: action.into(),
            details: details.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_engine_parses_case_insensitively() {
        assert_eq!("Festival".parse::<SpeechEngine>(), Ok(SpeechEngine::Festival));
        assert_eq!(" espeak\r".parse::<SpeechEngine>(), Ok(SpeechEngine::Espeak));
        assert!("pico".parse::<SpeechEngine>().is_err());
    }

    #[test]
    fn speech_engine_display_matches_wire_name() {
        assert_eq!(SpeechEngine::Espeak.to_string(), "espeak");
        assert_eq!(SpeechEngine::Festival.to_string(), "festival");
    }

    #[test]
    fn warn_sound_policy_uses_lowercase_names() {
        let policy: WarnSoundPolicy = serde_json::from_str("\"repeat\"").unwrap();
        assert_eq!(policy, WarnSoundPolicy::Repeat);
        assert_eq!(serde_json::to_string(&WarnSoundPolicy::Never).unwrap(), "\"never\"");
    }

    #[test]
    fn lighting_state_addresses_each_zone() {
        let mut lighting = LightingState::default();
        lighting.get_mut(LightingZone::Body).brightness = 42;
        assert_eq!(lighting.body.brightness, 42);
        assert_eq!(lighting.get(LightingZone::Head).brightness, 120);
        assert_eq!("base".parse::<LightingZone>(), Ok(LightingZone::Base));
    }

    #[test]
    fn fahrenheit_conversion() {
        let env = Environment {
            temperature: 25.0,
            humidity: 40.0,
            pressure: 1013.0,
        };
        assert!((env.temperature_fahrenheit() - 77.0).abs() < 1e-4);
    }

    #[test]
    fn fault_descriptions_cover_known_codes() {
        assert_eq!(fault_description(2), "invalid command");
        assert_eq!(fault_description(99), "unknown fault");
    }

    #[test]
    fn com_error_display() {
        let err = ComError::io(Link::Core, "broken pipe");
        assert!(err.to_string().contains("core link"));

        let err: ComError = DecodeError::Encoding { valid_up_to: 3 }.into();
        assert!(err.to_string().contains("UTF-8"));
    }
}
