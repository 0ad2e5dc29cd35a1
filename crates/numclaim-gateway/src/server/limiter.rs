//! Per-client sliding-window admission control.
//!
//! [`RateLimiter`] keeps, for every client key, the timestamps of its recent
//! admissions. A request is admitted when fewer than `max_per_window`
//! timestamps are younger than `window`; rejected requests are not recorded.
//!
//! The whole table sits behind one [`parking_lot::Mutex`]. The critical
//! section is bounded by `max_per_window` and never awaits, so a single coarse
//! lock is enough.
//!
//! Age is `now - timestamp`. A timestamp that is *ahead* of `now` (the caller
//! passed an earlier instant than a previous call) counts as live, so a clock
//! that steps backwards can never make entries expire early.

use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    time::{Duration, Instant},
};

/// Current window usage of a single client, as reported by `/api/queue/stats`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ClientUsage {
    pub requests_in_window: usize,
    pub remaining_quota: usize,
}

pub struct RateLimiter {
    window: Duration,
    max_per_window: usize,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Window and quota are fixed for the lifetime of the limiter.
    pub fn new(window: Duration, max_per_window: usize) -> Self {
        Self {
            window,
            max_per_window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub const fn window(&self) -> Duration {
        self.window
    }

    pub const fn max_per_window(&self) -> usize {
        self.max_per_window
    }

    /// Trims `key`'s expired timestamps, then records `now` and returns `true`
    /// if the client still has quota. Returns `false` without recording
    /// anything otherwise.
    pub fn admit(&self, key: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock();
        match windows.get_mut(key) {
            Some(timestamps) => {
                timestamps.retain(|&ts| is_live(self.window, now, ts));
                if timestamps.len() >= self.max_per_window {
                    return false;
                }
                timestamps.push_back(now);
                true
            }
            None if self.max_per_window == 0 => false,
            None => {
                windows.insert(key.to_owned(), VecDeque::from([now]));
                true
            }
        }
    }

    /// Snapshot of every tracked client's usage at `now`. Does not trim.
    pub fn usage(&self, now: Instant) -> BTreeMap<String, ClientUsage> {
        let windows = self.windows.lock();
        windows
            .iter()
            .map(|(key, timestamps)| {
                let requests_in_window = timestamps
                    .iter()
                    .filter(|&&ts| is_live(self.window, now, ts))
                    .count();
                let usage = ClientUsage {
                    requests_in_window,
                    remaining_quota: self.max_per_window.saturating_sub(requests_in_window),
                };
                (key.clone(), usage)
            })
            .collect()
    }

    /// Drops clients whose windows are empty at `now`. Returns how many were
    /// removed.
    pub fn purge_idle(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, timestamps| {
            timestamps.retain(|&ts| is_live(self.window, now, ts));
            !timestamps.is_empty()
        });
        before - windows.len()
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().len()
    }
}

#[inline]
fn is_live(window: Duration, now: Instant, ts: Instant) -> bool {
    now.checked_duration_since(ts)
        .is_none_or(|age| age < window)
}
