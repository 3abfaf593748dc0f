//! Sliding-window rate limiter, sharded by ip hash.
//!
//! Three independent windows guard admission: per-minute per ip, per-hour
//! per ip, and a global per-minute window. A request must clear all three
//! or it is dropped; lock order is always ip shard → global.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use palisade_core::config::RateLimitConfig;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

#[derive(Debug, Default)]
struct Window {
    events: VecDeque<Instant>,
}

impl Window {
    fn prune(&mut self, now: Instant, span: Duration) {
        while self
            .events
            .front()
            .is_some_and(|t| now.duration_since(*t) >= span)
        {
            self.events.pop_front();
        }
    }

    fn len(&self) -> usize {
        self.events.len()
    }

    fn push(&mut self, now: Instant) {
        self.events.push_back(now);
    }
}

#[derive(Debug, Default)]
struct IpWindows {
    minute: Window,
    hour: Window,
}

pub struct RateLimiter {
    cfg: RateLimitConfig,
    per_ip: DashMap<String, IpWindows>,
    global: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self {
            cfg,
            per_ip: DashMap::new(),
            global: Mutex::new(Window::default()),
        }
    }

    /// Admit or reject one request for `ip_hash`. Admission records the
    /// event in all three windows; rejection records nothing, so a blocked
    /// client does not extend its own penalty.
    pub fn admit(&self, ip_hash: &str) -> bool {
        let now = Instant::now();

        let mut entry = self.per_ip.entry(ip_hash.to_string()).or_default();
        entry.minute.prune(now, MINUTE);
        entry.hour.prune(now, HOUR);
        if entry.minute.len() >= self.cfg.per_ip_per_minute as usize
            || entry.hour.len() >= self.cfg.per_ip_per_hour as usize
        {
            return false;
        }

        let mut global = self.global.lock().unwrap();
        global.prune(now, MINUTE);
        if global.len() >= self.cfg.global_per_minute as usize {
            return false;
        }

        global.push(now);
        entry.minute.push(now);
        entry.hour.push(now);
        true
    }

    /// Drop shards whose windows have fully drained. Called from the
    /// periodic sweeper so the map doesn't grow with one-shot visitors.
    pub fn prune_idle(&self) {
        let now = Instant::now();
        self.per_ip.retain(|_, w| {
            w.minute.prune(now, MINUTE);
            w.hour.prune(now, HOUR);
            w.hour.len() > 0
        });
    }

    pub fn tracked_ips(&self) -> usize {
        self.per_ip.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(per_min: u32, per_hour: u32, global: u32) -> RateLimitConfig {
        RateLimitConfig {
            per_ip_per_minute: per_min,
            per_ip_per_hour: per_hour,
            global_per_minute: global,
        }
    }

    #[test]
    fn admits_up_to_the_minute_cap_then_rejects() {
        let limiter = RateLimiter::new(cfg(10, 100, 1000));
        for _ in 0..10 {
            assert!(limiter.admit("ip-a"));
        }
        assert!(!limiter.admit("ip-a"));
        // A different source is unaffected.
        assert!(limiter.admit("ip-b"));
    }

    #[test]
    fn hour_cap_binds_independently() {
        let limiter = RateLimiter::new(cfg(100, 5, 1000));
        for _ in 0..5 {
            assert!(limiter.admit("ip-a"));
        }
        assert!(!limiter.admit("ip-a"));
    }

    #[test]
    fn global_cap_rejects_across_sources() {
        let limiter = RateLimiter::new(cfg(10, 100, 3));
        assert!(limiter.admit("a"));
        assert!(limiter.admit("b"));
        assert!(limiter.admit("c"));
        assert!(!limiter.admit("d"));
    }

    #[test]
    fn rejection_does_not_consume_quota() {
        let limiter = RateLimiter::new(cfg(2, 100, 1000));
        assert!(limiter.admit("a"));
        assert!(limiter.admit("a"));
        for _ in 0..5 {
            assert!(!limiter.admit("a"));
        }
        // Still exactly two events recorded; nothing extra accumulated.
        let entry = limiter.per_ip.get("a").unwrap();
        assert_eq!(entry.minute.len(), 2);
    }

    #[test]
    fn prune_idle_drops_drained_shards() {
        let limiter = RateLimiter::new(cfg(10, 100, 1000));
        assert!(limiter.admit("a"));
        assert_eq!(limiter.tracked_ips(), 1);
        // Events are still inside the hour window, shard stays.
        limiter.prune_idle();
        assert_eq!(limiter.tracked_ips(), 1);
    }
}
