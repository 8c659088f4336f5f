/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! A fixed-window rate limiter whose counters live in the meta store, so the
//! limits hold across restarts.

use std::str::FromStr;

use crate::error::{info, warn};
use crate::internal::storage::Storage;

pub struct PersistedRateLimiter {
    op_name: String,
    /// Window length in seconds.
    periodic_interval: u64,
    max_requests_in_interval: u16,
}

impl PersistedRateLimiter {
    pub fn new(op_name: &str, periodic_interval: u64, max_requests_in_interval: u16) -> Self {
        Self {
            op_name: op_name.to_owned(),
            periodic_interval,
            max_requests_in_interval,
        }
    }

    /// Count an attempt and say whether it fits in the window. Refused
    /// attempts count too.
    pub fn check<S: Storage>(&self, store: &S) -> bool {
        self.check_at(store, now_secs())
    }

    /// Whether one more attempt would fit, without counting it.
    pub fn allows<S: Storage>(&self, store: &S) -> bool {
        self.allows_at(store, now_secs())
    }

    /// Count an attempt that was let through by [`Self::allows`].
    pub fn record<S: Storage>(&self, store: &S) {
        self.record_at(store, now_secs())
    }

    fn check_at<S: Storage>(&self, store: &S, now: u64) -> bool {
        let (timestamp, count) = self.window_at(store, now);
        let count = count.saturating_add(1);
        self.persist_counters(store, timestamp, count);
        if count > self.max_requests_in_interval {
            info!(
                "{} refused, {} attempts in the current window (max {})",
                self.op_name, count, self.max_requests_in_interval
            );
            return false;
        }
        true
    }

    fn allows_at<S: Storage>(&self, store: &S, now: u64) -> bool {
        self.window_at(store, now).1 < self.max_requests_in_interval
    }

    fn record_at<S: Storage>(&self, store: &S, now: u64) {
        let (timestamp, count) = self.window_at(store, now);
        self.persist_counters(store, timestamp, count.saturating_add(1));
    }

    /// The persisted window, or a fresh one starting at `now` if it expired.
    fn window_at<S: Storage>(&self, store: &S, now: u64) -> (u64, u16) {
        let (timestamp, count) = self.get_counters(store);
        if now.saturating_sub(timestamp) >= self.periodic_interval {
            info!("new rate limit window for {}", self.op_name);
            return (now, 0);
        }
        (timestamp, count)
    }

    fn meta_keys(&self) -> (String, String) {
        (
            format!("ratelimit_{}_timestamp", self.op_name),
            format!("ratelimit_{}_count", self.op_name),
        )
    }

    pub(crate) fn get_counters<S: Storage>(&self, store: &S) -> (u64, u16) {
        let (timestamp_key, count_key) = self.meta_keys();
        (
            read_integer(store, &timestamp_key),
            read_integer(store, &count_key),
        )
    }

    pub(crate) fn persist_counters<S: Storage>(&self, store: &S, timestamp: u64, count: u16) {
        let (timestamp_key, count_key) = self.meta_keys();
        let written = store
            .set_meta(&timestamp_key, &timestamp.to_string())
            .and_then(|_| store.set_meta(&count_key, &count.to_string()));
        if let Err(e) = written {
            warn!("could not persist counters for {}: {}", self.op_name, e);
        }
    }
}

// Unreadable or missing counters read as zero, which opens a new window.
fn read_integer<S: Storage, T: FromStr + Default>(store: &S, key: &str) -> T {
    store
        .get_meta(key)
        .ok()
        .flatten()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

// `SystemTime::now` panics on wasm32-unknown-unknown.
#[cfg(target_arch = "wasm32")]
fn now_secs() -> u64 {
    (js_sys::Date::now() / 1000.0) as u64
}

#[cfg(not(target_arch = "wasm32"))]
fn now_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
