//! Config file handling – reads/writes `~/.kevinbot/com.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use kevinbot_bridge::{BridgeConfig, HeartbeatMode};

/// Overrides the config file location.
pub const CONFIG_VAR: &str = "KEVINBOT_CONFIG";

/// Return `$KEVINBOT_CONFIG`, or `~/.kevinbot/com.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_VAR) {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".kevinbot").join("com.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<BridgeConfig>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<BridgeConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: BridgeConfig =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `KEVINBOT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `KEVINBOT_CORE_PORT` | `serial.core_port` |
/// | `KEVINBOT_REMOTE_PORT` | `serial.remote_port` |
/// | `KEVINBOT_MQTT_ADDRESS` | `mqtt.address` |
/// | `KEVINBOT_MQTT_PORT` | `mqtt.port` |
/// | `KEVINBOT_TICK` | `com.tick` |
///
/// Unparseable numbers and tick values are ignored.
pub fn apply_env_overrides(cfg: &mut BridgeConfig) {
    if let Ok(v) = std::env::var("KEVINBOT_CORE_PORT") {
        cfg.serial.core_port = v;
    }
    if let Ok(v) = std::env::var("KEVINBOT_REMOTE_PORT") {
        cfg.serial.remote_port = v;
    }
    if let Ok(v) = std::env::var("KEVINBOT_MQTT_ADDRESS") {
        cfg.mqtt.address = v;
    }
    if let Ok(v) = std::env::var("KEVINBOT_MQTT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.mqtt.port = port;
    }
    if let Ok(v) = std::env::var("KEVINBOT_TICK")
        && let Ok(tick) = v.parse::<HeartbeatMode>()
    {
        cfg.com.tick = tick;
    }
}

/// Save the config to disk, creating the parent directory if necessary.
pub fn save(cfg: &BridgeConfig) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// The directory to create for `path`; `None` for a bare file name.
fn config_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|parent| !parent.as_os_str().is_empty())
}

pub(crate) fn save_to(cfg: &BridgeConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = config_dir(path) {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // The file may hold broker credentials: owner read/write only.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kevinbot_bridge::Secret;
    use std::time::Duration;

    #[cfg(unix)]
    #[test]
    fn config_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&BridgeConfig::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let parent = path.parent().expect("parent dir");
        let dir_mode = std::fs::metadata(parent).expect("dir metadata").permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn bare_file_name_has_no_config_dir() {
        assert_eq!(config_dir(Path::new("com.toml")), None);
        assert_eq!(config_dir(Path::new("/etc/kevinbot/com.toml")), Some(Path::new("/etc/kevinbot")));
        assert_eq!(config_dir(Path::new("conf/com.toml")), Some(Path::new("conf")));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = BridgeConfig::default();
        cfg.robot.id = "KEVINBOTTEST".to_string();
        cfg.com.tick = HeartbeatMode::Core;
        cfg.mqtt.username = Some("kevin".to_string());
        cfg.mqtt.password = Some(Secret::new("hunter2"));
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.robot.id, "KEVINBOTTEST");
        assert_eq!(loaded.com.tick, HeartbeatMode::Core);
        assert_eq!(loaded.mqtt.password.as_ref().map(Secret::expose), Some("hunter2"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("com.toml");
        std::fs::write(&path, "[serial]\ncore_port = \"/dev/ttyS9\"\n\n[com]\ntick = \"250ms\"\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.serial.core_port, "/dev/ttyS9");
        assert_eq!(loaded.com.tick, HeartbeatMode::Internal(Duration::from_millis(250)));
        assert_eq!(loaded.com.data_max, 50);
    }

    #[test]
    fn broken_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("com.toml");
        std::fs::write(&path, "[com]\ntick = \"sometimes\"\n").expect("write");
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn config_path_points_to_kevinbot_dir() {
        let p = config_path_for_home("/home/kevin");
        assert_eq!(p, PathBuf::from("/home/kevin/.kevinbot/com.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    // Each test below owns its variable, so they can run in parallel.

    #[test]
    fn env_overrides_core_port() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("KEVINBOT_CORE_PORT", "/dev/ttyACM0") };
        let mut cfg = BridgeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.serial.core_port, "/dev/ttyACM0");
        unsafe { std::env::remove_var("KEVINBOT_CORE_PORT") };
    }

    #[test]
    fn env_overrides_mqtt_port_ignores_garbage() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("KEVINBOT_MQTT_PORT", "not-a-port") };
        let mut cfg = BridgeConfig::default();
        let original = cfg.mqtt.port;
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.mqtt.port, original);

        unsafe { std::env::set_var("KEVINBOT_MQTT_PORT", "8883") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.mqtt.port, 8883);
        unsafe { std::env::remove_var("KEVINBOT_MQTT_PORT") };
    }

    #[test]
    fn env_overrides_tick() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("KEVINBOT_TICK", "core") };
        let mut cfg = BridgeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.com.tick, HeartbeatMode::Core);
        unsafe { std::env::remove_var("KEVINBOT_TICK") };
    }
}
