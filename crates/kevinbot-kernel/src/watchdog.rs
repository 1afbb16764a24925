//! [`LinkWatchdog`] – silence detector for inbound links.
//!
//! Each read loop calls [`LinkWatchdog::feed`] when a line arrives.  The
//! heartbeat loop calls [`LinkWatchdog::check_all`], which reports a link
//! the first time its deadline is exceeded and then stays quiet until the
//! link is fed again.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use kevinbot_types::Link;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Health state reported for a single link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    Healthy,
    TimedOut,
}

// ────────────────────────────────────────────────────────────────────────────
// Internal entry
// ────────────────────────────────────────────────────────────────────────────

struct LinkEntry {
    last_seen: Instant,
    timeout: Duration,
    reported: bool,
}

impl LinkEntry {
    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > self.timeout
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// Tracks the last inbound traffic per link.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use kevinbot_kernel::watchdog::{LinkHealth, LinkWatchdog};
/// use kevinbot_types::Link;
///
/// let mut wd = LinkWatchdog::new();
/// wd.register(Link::Core, Duration::from_secs(5));
/// wd.feed(Link::Core);
///
/// assert_eq!(wd.health(Link::Core), LinkHealth::Healthy);
/// ```
#[derive(Default)]
pub struct LinkWatchdog {
    links: HashMap<Link, LinkEntry>,
}

impl LinkWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `link` with a silence `timeout`.  The deadline starts now;
    /// re-registering resets it.
    pub fn register(&mut self, link: Link, timeout: Duration) {
        self.links.insert(
            link,
            LinkEntry {
                last_seen: Instant::now(),
                timeout,
                reported: false,
            },
        );
    }

    /// Traffic seen on `link`.  No-op for unwatched links.
    pub fn feed(&mut self, link: Link) {
        if let Some(entry) = self.links.get_mut(&link) {
            entry.last_seen = Instant::now();
            entry.reported = false;
        }
    }

    /// Unwatched links are reported healthy.
    pub fn health(&self, link: Link) -> LinkHealth {
        match self.links.get(&link) {
            Some(entry) if entry.expired(Instant::now()) => LinkHealth::TimedOut,
            _ => LinkHealth::Healthy,
        }
    }

    /// Links that went silent since the last check.  Each silence episode
    /// is reported once.
    pub fn check_all(&mut self) -> Vec<Link> {
        let now = Instant::now();
        let mut silent: Vec<Link> = self
            .links
            .iter_mut()
            .filter(|(_, entry)| !entry.reported && entry.expired(now))
            .map(|(link, entry)| {
                entry.reported = true;
                *link
            })
            .collect();
        silent.sort_by_key(|link| link.to_string());
        silent
    }
}
