//! Per-client sliding window rate limiting

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

const WINDOW: Duration = Duration::from_secs(60);

/// Allows `max_per_minute` requests per client over any rolling minute
pub struct RateLimiter {
    max_per_minute: u32,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    /// A limit of 0 disables limiting
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            windows: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_per_minute > 0
    }

    /// Record a request from `client`, returning false if it is over the limit
    pub fn check(&self, client: &str) -> bool {
        self.check_at(client, Instant::now())
    }

    pub fn check_at(&self, client: &str, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let mut window = self.windows.entry(client.to_string()).or_default();
        expire(&mut window, now);

        if window.len() >= self.max_per_minute as usize {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Forget clients with no requests in the last minute; returns how many
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    pub fn prune_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            expire(window, now);
            !window.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

fn expire(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(oldest) = window.front() {
        if now.saturating_duration_since(*oldest) >= WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}
