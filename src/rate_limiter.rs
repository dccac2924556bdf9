/*
 * Copyright (C) 2025 Jakub Žitník
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 */

//! Process-wide sliding-window rate limiter, keyed by request fingerprint.
//!
//! A single FIFO queue backs every fingerprint: each attempt appends an
//! entry, evicts anything older than the window, then counts how many
//! entries (including the one just appended) match the current
//! fingerprint. This mirrors the append-evict-count sequence being one
//! atomic step under a single mutex, per the concurrency model.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use crate::model::{RecentRequest, RequestFingerprint};

static RECENT_REQUESTS: Lazy<Mutex<VecDeque<RecentRequest>>> =
    Lazy::new(|| Mutex::new(VecDeque::new()));

#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    pub window: Duration,
    pub limit: usize,
}

impl RateLimiter {
    pub fn new(window_ms: u64, limit: usize) -> Self {
        RateLimiter {
            window: Duration::from_millis(window_ms),
            limit,
        }
    }

    /// Returns `true` if this attempt exceeds the limit and should be
    /// short-circuited with 429.
    pub fn check(&self, fingerprint: &RequestFingerprint) -> bool {
        self.check_at(fingerprint, Instant::now())
    }

    fn check_at(&self, fingerprint: &RequestFingerprint, now: Instant) -> bool {
        let mut queue = RECENT_REQUESTS.lock().unwrap_or_else(|e| e.into_inner());

        queue.push_back(RecentRequest {
            fingerprint: fingerprint.clone(),
            at: now,
        });

        while let Some(front) = queue.front() {
            if now.duration_since(front.at) > self.window {
                queue.pop_front();
            } else {
                break;
            }
        }

        let count = queue.iter().filter(|r| &r.fingerprint == fingerprint).count();
        count > self.limit
    }
}
