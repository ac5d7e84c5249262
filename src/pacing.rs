//! Request pacing.
//!
//! - [`HostPacer`]: fixed minimum spacing between requests to the same
//!   host, shared by every worker through an `Arc`.
//! - [`PauseRange`]: a randomized delay, used between queries and between
//!   entities and before opening a remote session.

use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::debug;
use url::Url;

/// Uniformly random delay between `min` and `max`.
///
/// Deserializes from a `[min_secs, max_secs]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct PauseRange {
    pub min: Duration,
    pub max: Duration,
}

impl PauseRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn secs(min: u64, max: u64) -> Self {
        Self::new(Duration::from_secs(min), Duration::from_secs(max))
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        Duration::from_millis(rng().random_range(lo..=hi))
    }

    /// Sleep for a sampled duration. Returns what was slept.
    pub async fn pause(&self) -> Duration {
        let delay = self.sample();
        if !delay.is_zero() {
            debug!(?delay, "Pacing pause");
            sleep(delay).await;
        }
        delay
    }
}

impl From<(f64, f64)> for PauseRange {
    fn from((min, max): (f64, f64)) -> Self {
        Self::new(
            Duration::from_secs_f64(min.max(0.0)),
            Duration::from_secs_f64(max.max(0.0)),
        )
    }
}

impl From<PauseRange> for (f64, f64) {
    fn from(p: PauseRange) -> Self {
        (p.min.as_secs_f64(), p.max.as_secs_f64())
    }
}

/// Per-host fixed-delay limiter.
///
/// Each call to [`HostPacer::wait`] reserves the next free slot for the
/// URL's host and sleeps until it. Slots for one host are `interval` apart.
#[derive(Debug)]
pub struct HostPacer {
    interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HostPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    pub async fn wait(&self, url: &str) {
        if self.interval.is_zero() {
            return;
        }
        let host = host_key(url);
        let now = Instant::now();
        let start = {
            let mut slots = self.next_slot.lock().await;
            let slot = slots.entry(host.clone()).or_insert(now);
            let start = (*slot).max(now);
            *slot = start + self.interval;
            start
        };
        if start > now {
            debug!(%host, wait_ms = (start - now).as_millis() as u64, "Waiting for host slot");
            sleep_until(start).await;
        }
    }
}

fn host_key(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_within_range() {
        let p = PauseRange::secs(2, 5);
        for _ in 0..100 {
            let d = p.sample();
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_degenerate_range() {
        assert_eq!(PauseRange::none().sample(), Duration::ZERO);
        assert_eq!(PauseRange::secs(7, 3).sample(), Duration::from_secs(7));
    }

    #[test]
    fn test_pause_range_from_yaml_pair() {
        let p: PauseRange = serde_yaml::from_str("[10, 20.5]").unwrap();
        assert_eq!(p.min, Duration::from_secs(10));
        assert_eq!(p.max, Duration::from_millis(20_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_host_is_spaced() {
        let pacer = HostPacer::new(Duration::from_secs(2));
        let t0 = Instant::now();
        pacer.wait("https://www.google.com/search?q=a").await;
        pacer.wait("https://www.google.com/search?q=b").await;
        pacer.wait("https://www.google.com/search?q=c").await;
        assert!(t0.elapsed() >= Duration::from_secs(4));
        assert!(t0.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_hosts_do_not_wait() {
        let pacer = HostPacer::new(Duration::from_secs(2));
        let t0 = Instant::now();
        pacer.wait("https://a.example.com/").await;
        pacer.wait("https://b.example.com/").await;
        assert_eq!(t0.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_sleeps_sampled_duration() {
        let t0 = Instant::now();
        let slept = PauseRange::secs(3, 3).pause().await;
        assert_eq!(slept, Duration::from_secs(3));
        assert!(t0.elapsed() >= Duration::from_secs(3));
    }
}
