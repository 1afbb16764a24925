//! Host uptime from `/proc/uptime`.

use std::path::Path;

use kevinbot_types::ComError;

const PROC_UPTIME: &str = "/proc/uptime";

/// Seconds since the host booted.
pub fn os_uptime() -> Result<u64, ComError> {
    read_uptime(Path::new(PROC_UPTIME))
}

/// Whole seconds from an uptime file (`"<up> <idle>"`).
pub fn read_uptime(path: &Path) -> Result<u64, ComError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ComError::host("read uptime", format!("{}: {e}", path.display())))?;
    parse_uptime(&contents)
        .ok_or_else(|| ComError::host("read uptime", format!("unexpected contents {contents:?}")))
}

fn parse_uptime(contents: &str) -> Option<u64> {
    let seconds: f64 = contents.split_whitespace().next()?.parse().ok()?;
    (seconds.is_finite() && seconds >= 0.0).then(|| seconds as u64)
}
