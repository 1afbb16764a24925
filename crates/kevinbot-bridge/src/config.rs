//! [`BridgeConfig`] – every tunable of the bridge, loaded once at startup.
//!
//! All sections and fields are defaulted, so an empty file (or no file)
//! yields a working configuration for the stock robot:
//!
//! ```toml
//! [serial]
//! core_port = "/dev/ttyAMA2"
//! remote_escaped = true
//!
//! [com]
//! tick = "core"
//! ```
//!
//! The configuration is immutable after startup; the bridge only ever reads
//! it through an `Arc`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use kevinbot_hal::HostCommands;
use kevinbot_kernel::BatteryPolicy;
use kevinbot_kernel::roster::member_tag;
use kevinbot_kernel::state::RuntimeState;
use kevinbot_link::{MqttSettings, SerialSettings, XBeeSettings};
use kevinbot_types::{
    ComError, LightingChannel, LightingState, LightingZone, SpeechEngine, WarnSoundPolicy,
};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::handshake::HandshakePolicy;

// ─────────────────────────────────────────────────────────────────────────────
// Secret
// ─────────────────────────────────────────────────────────────────────────────

/// A credential that never shows up in `Debug` output and is wiped on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Heartbeat mode
// ─────────────────────────────────────────────────────────────────────────────

/// What paces the heartbeat.
///
/// Written in configuration as `"core"` or as a duration: `"1s"`,
/// `"500ms"`, `"0.25s"` or a bare number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HeartbeatMode {
    /// Answer every `core.uptime` line from the hardware controller.
    Core,
    /// Fire on a fixed interval.
    Internal(Duration),
}

impl Default for HeartbeatMode {
    fn default() -> Self {
        HeartbeatMode::Internal(Duration::from_secs(1))
    }
}

/// Longest accepted heartbeat interval.
const MAX_TICK_MS: u64 = 3_600_000;

impl FromStr for HeartbeatMode {
    type Err = ComError;

    /// Intervals are whole milliseconds between 1 ms and one hour.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("core") {
            return Ok(HeartbeatMode::Core);
        }
        let invalid = || {
            ComError::Config(format!(
                "invalid tick {s:?}: expected \"core\" or a duration of whole milliseconds between 1ms and 1h"
            ))
        };
        let millis = if let Some(ms) = s.strip_suffix("ms") {
            ms.trim().parse::<u64>().map_err(|_| invalid())?
        } else {
            let secs: f64 = s.strip_suffix('s').unwrap_or(s).trim().parse().map_err(|_| invalid())?;
            let millis = secs * 1000.0;
            if !millis.is_finite() || millis < 0.0 || millis > MAX_TICK_MS as f64 {
                return Err(invalid());
            }
            let rounded = millis.round();
            if (millis - rounded).abs() > 1e-6 {
                return Err(invalid());
            }
            rounded as u64
        };
        if millis == 0 || millis > MAX_TICK_MS {
            return Err(invalid());
        }
        Ok(HeartbeatMode::Internal(Duration::from_millis(millis)))
    }
}

impl TryFrom<String> for HeartbeatMode {
    type Error = ComError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HeartbeatMode> for String {
    fn from(mode: HeartbeatMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for HeartbeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeartbeatMode::Core => write!(f, "core"),
            HeartbeatMode::Internal(d) if d.subsec_nanos() == 0 => write!(f, "{}s", d.as_secs()),
            HeartbeatMode::Internal(d) => write!(f, "{}ms", d.as_millis()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Identifier remotes address pings to; first field of the roster tag.
    pub id: String,
    pub version: String,
    pub kind: String,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            id: "KEVINBOTV3".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            kind: "kevinbot.kevinbot".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub core_port: String,
    pub core_baud: u32,
    pub remote_port: String,
    pub remote_baud: u32,
    /// XBee API mode 2.
    pub remote_escaped: bool,
    pub remote_destination: u16,
    /// Head / eye controller; `None` disables the eye link.
    pub eye_port: Option<String>,
    pub eye_baud: u32,
    pub io_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            core_port: "/dev/ttyAMA2".to_string(),
            core_baud: 624_000,
            remote_port: "/dev/ttyAMA0".to_string(),
            remote_baud: 460_800,
            remote_escaped: false,
            remote_destination: 0xFFFF,
            eye_port: Some("/dev/ttyUSB0".to_string()),
            eye_baud: 115_200,
            io_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<Secret>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "localhost".to_string(),
            port: 1883,
            keep_alive_secs: 15,
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub imu: String,
    pub temperature: String,
    pub humidity: String,
    pub pressure: String,
    pub batt1: String,
    pub batt2: String,
    pub sys_uptime: String,
    pub core_uptime: String,
    pub enabled: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            imu: "kevinbot/mpu/imu".to_string(),
            temperature: "kevinbot/bme/temperature".to_string(),
            humidity: "kevinbot/bme/humidity".to_string(),
            pressure: "kevinbot/bme/pressure".to_string(),
            batt1: "kevinbot/battery/batt1".to_string(),
            batt2: "kevinbot/battery/batt2".to_string(),
            sys_uptime: "kevinbot/uptimes/os".to_string(),
            core_uptime: "kevinbot/uptimes/core".to_string(),
            enabled: "kevinbot/enabled".to_string(),
        }
    }
}

impl TopicConfig {
    /// Topics the bridge listens to.
    pub fn subscribed(&self) -> Vec<String> {
        vec![
            self.imu.clone(),
            self.temperature.clone(),
            self.humidity.clone(),
            self.pressure.clone(),
        ]
    }

    /// Per-cell battery topics, indexed like the cells.
    pub fn batteries(&self) -> [&str; 2] {
        [&self.batt1, &self.batt2]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub enable_two: bool,
    /// Volts, per cell.
    pub warn_voltages: [f32; 2],
    pub warn_sound: WarnSoundPolicy,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        let policy = BatteryPolicy::default();
        Self {
            enable_two: policy.enable_two,
            warn_voltages: policy.warn_voltages,
            warn_sound: policy.sound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    /// Milliseconds between effect frames.
    pub update: u32,
    pub brightness: u32,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        let channel = LightingChannel::default();
        Self {
            update: channel.update_interval,
            brightness: channel.brightness,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    pub head: ZoneConfig,
    pub body: ZoneConfig,
    pub base: ZoneConfig,
    /// Effect written to every zone on disable.
    pub default_effect: String,
    /// Primary colour written to every zone on disable.
    pub default_color: String,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            head: ZoneConfig::default(),
            body: ZoneConfig::default(),
            base: ZoneConfig::default(),
            default_effect: "color1".to_string(),
            default_color: "#000000".to_string(),
        }
    }
}

impl LightingConfig {
    pub fn zone(&self, zone: LightingZone) -> &ZoneConfig {
        match zone {
            LightingZone::Head => &self.head,
            LightingZone::Body => &self.body,
            LightingZone::Base => &self.base,
        }
    }

    pub fn initial_state(&self) -> LightingState {
        let mut state = LightingState::default();
        for zone in LightingZone::ALL {
            let config = self.zone(zone);
            *state.get_mut(zone) = LightingChannel {
                update_interval: config.update,
                brightness: config.brightness,
            };
        }
        state
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    pub low_battery: PathBuf,
    pub device_notify: PathBuf,
    /// Player program and its leading arguments; the file path is appended.
    pub player: Vec<String>,
}

impl Default for SoundConfig {
    fn default() -> Self {
        let commands = HostCommands::default();
        Self {
            low_battery: commands.low_battery_sound,
            device_notify: commands.device_notify_sound,
            player: commands.player,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComConfig {
    pub tick: HeartbeatMode,
    /// Byte budget per roster chunk.
    pub data_max: usize,
    /// Command queue idle wake-up interval.
    pub queue_tick_ms: u64,
    pub handshake_interval_ms: u64,
    /// `None` polls the hardware controller forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_max_attempts: Option<u32>,
    /// Core link silence that forces a disable; `None` turns the watchdog off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_timeout_ms: Option<u64>,
    /// Host commands (speech, sounds, notifications) are killed after this.
    pub host_command_timeout_ms: u64,
    /// Sensor telemetry older than this when it is routed is dropped.
    pub telemetry_max_age_ms: u64,
}

impl Default for ComConfig {
    fn default() -> Self {
        Self {
            tick: HeartbeatMode::default(),
            data_max: 50,
            queue_tick_ms: 100,
            handshake_interval_ms: 100,
            handshake_max_attempts: None,
            core_timeout_ms: None,
            host_command_timeout_ms: 30_000,
            telemetry_max_age_ms: 2_000,
        }
    }
}

/// Console log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
}

impl FromStr for LogFormat {
    type Err = ComError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(ComError::Config(format!("unknown log format {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `"info"` or `"kevinbot_bridge=debug,info"`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub default_engine: SpeechEngine,
}

// ─────────────────────────────────────────────────────────────────────────────
// BridgeConfig
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub robot: RobotConfig,
    pub serial: SerialConfig,
    pub mqtt: MqttConfig,
    pub topics: TopicConfig,
    pub battery: BatteryConfig,
    pub lighting: LightingConfig,
    pub sounds: SoundConfig,
    pub com: ComConfig,
    pub speech: SpeechConfig,
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ComError> {
        if self.com.data_max == 0 {
            return Err(ComError::Config("com.data_max must be at least 1".to_string()));
        }
        if self.com.queue_tick_ms == 0
            || self.com.handshake_interval_ms == 0
            || self.com.host_command_timeout_ms == 0
        {
            return Err(ComError::Config(
                "com.queue_tick_ms, com.handshake_interval_ms and com.host_command_timeout_ms must be positive"
                    .to_string(),
            ));
        }
        if self.sounds.player.is_empty() {
            return Err(ComError::Config("sounds.player must name a program".to_string()));
        }
        if self.robot.id.is_empty() {
            return Err(ComError::Config("robot.id must not be empty".to_string()));
        }
        if let Err(e) = tracing_subscriber::EnvFilter::try_new(&self.logging.level) {
            return Err(ComError::Config(format!("logging.level {:?}: {e}", self.logging.level)));
        }
        Ok(())
    }

    /// This robot's roster entry.
    pub fn self_tag(&self) -> String {
        member_tag(&self.robot.id, &self.robot.version, &self.robot.kind)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.io_timeout_ms)
    }

    pub fn core_serial(&self) -> SerialSettings {
        SerialSettings {
            port: self.serial.core_port.clone(),
            baud: self.serial.core_baud,
            timeout: self.io_timeout(),
        }
    }

    pub fn remote_xbee(&self) -> XBeeSettings {
        XBeeSettings {
            serial: SerialSettings {
                port: self.serial.remote_port.clone(),
                baud: self.serial.remote_baud,
                timeout: self.io_timeout(),
            },
            escaped: self.serial.remote_escaped,
            destination: self.serial.remote_destination,
        }
    }

    pub fn eye_serial(&self) -> Option<SerialSettings> {
        self.serial.eye_port.as_ref().map(|port| SerialSettings {
            port: port.clone(),
            baud: self.serial.eye_baud,
            timeout: self.io_timeout(),
        })
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            client_id: format!("{}-com-service", self.robot.id.to_ascii_lowercase()),
            host: self.mqtt.address.clone(),
            port: self.mqtt.port,
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.as_ref().map(|p| p.expose().to_string()),
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs.max(5)),
        }
    }

    pub fn host_commands(&self) -> HostCommands {
        HostCommands {
            player: self.sounds.player.clone(),
            low_battery_sound: self.sounds.low_battery.clone(),
            device_notify_sound: self.sounds.device_notify.clone(),
            timeout: Duration::from_millis(self.com.host_command_timeout_ms),
            ..HostCommands::default()
        }
    }

    pub fn battery_policy(&self) -> BatteryPolicy {
        BatteryPolicy {
            warn_voltages: self.battery.warn_voltages,
            sound: self.battery.warn_sound,
            enable_two: self.battery.enable_two,
        }
    }

    pub fn handshake_policy(&self) -> HandshakePolicy {
        HandshakePolicy {
            interval: Duration::from_millis(self.com.handshake_interval_ms),
            max_attempts: self.com.handshake_max_attempts,
        }
    }

    pub fn queue_tick(&self) -> Duration {
        Duration::from_millis(self.com.queue_tick_ms)
    }

    pub fn telemetry_max_age(&self) -> Duration {
        Duration::from_millis(self.com.telemetry_max_age_ms)
    }

    pub fn core_timeout(&self) -> Option<Duration> {
        self.com.core_timeout_ms.map(Duration::from_millis)
    }

    /// Runtime record at startup: disabled, no fault, configured lighting
    /// and speech engine.
    pub fn initial_state(&self) -> RuntimeState {
        RuntimeState {
            speech_engine: self.speech.default_engine,
            lighting: self.lighting.initial_state(),
            ..RuntimeState::default()
        }
    }
}
