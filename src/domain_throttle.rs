//! Fixed per-domain admission throttle for the concurrent fetcher.
//!
//! Enforces a minimum gap between transfer starts on the same host. Never
//! backs off or recovers; it only answers whether a transfer may start now.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use url::Url;

/// Tracks the last admission time per host and decides whether a new
/// transfer on that host may start right now.
pub struct DomainThrottle {
    min_gap: Duration,
    last_start: Mutex<HashMap<String, Instant>>,
}

impl DomainThrottle {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_start: Mutex::new(HashMap::new()),
        }
    }

    pub fn extract_host(url: &str) -> Option<String> {
        Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string))
    }

    /// Attempt to admit a transfer for `url`. Returns `true` and records the
    /// admission time if the host's throttle window has elapsed (or the host
    /// has never been seen); returns `false` without side effects otherwise.
    /// On `false` the caller skips the URL this pass and retries it on the
    /// next.
    pub fn try_admit(&self, url: &str) -> bool {
        let Some(host) = Self::extract_host(url) else {
            return true;
        };
        let now = Instant::now();
        let mut last_start = self.last_start.lock().unwrap();
        match last_start.get(&host) {
            Some(last) if now.duration_since(*last) < self.min_gap => false,
            _ => {
                last_start.insert(host, now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_first_request_for_a_host() {
        let throttle = DomainThrottle::new(Duration::from_secs(5));
        assert!(throttle.try_admit("https://example.com/a"));
    }

    #[test]
    fn defers_second_request_within_window() {
        let throttle = DomainThrottle::new(Duration::from_secs(5));
        assert!(throttle.try_admit("https://example.com/a"));
        assert!(!throttle.try_admit("https://example.com/b"));
    }

    #[test]
    fn different_hosts_do_not_interfere() {
        let throttle = DomainThrottle::new(Duration::from_secs(5));
        assert!(throttle.try_admit("https://example.com/a"));
        assert!(throttle.try_admit("https://other.example/b"));
    }
}
