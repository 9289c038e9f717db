//! Shared rate limiter for the remote execution service.
//!
//! One instance per pipeline run, shared (`Arc`) by every job and every call
//! kind: submit, compile check, status poll, and result fetch all consume one
//! permit. The limiter keeps a sliding log of grant times rather than a
//! continuous-refill bucket so the guarantee is exact: at most `quota` grants
//! fall inside any rolling `window`, no matter how calls burst.
//!
//! `acquire` blocks; it never errors and never drops a caller.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RateLimiter {
    quota: usize,
    window: Duration,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `quota` permits per rolling `window`.
    pub fn new(quota: usize, window: Duration) -> Self {
        assert!(quota > 0, "quota must be at least 1");
        Self {
            quota,
            window,
            grants: Mutex::new(VecDeque::with_capacity(quota)),
        }
    }

    /// Service default: 30 requests per rolling minute.
    pub fn per_minute(quota: usize) -> Self {
        Self::new(quota, Duration::from_secs(60))
    }

    /// Block until a permit is available, then take it.
    pub fn acquire(&self) {
        loop {
            let wait = {
                let mut grants = self.grants.lock().unwrap();
                let now = Instant::now();
                while let Some(&front) = grants.front() {
                    if now.duration_since(front) >= self.window {
                        grants.pop_front();
                    } else {
                        break;
                    }
                }
                if grants.len() < self.quota {
                    grants.push_back(now);
                    return;
                }
                // Oldest grant leaves the window first; sleep until it does.
                self.window - now.duration_since(*grants.front().unwrap())
            };
            thread::sleep(wait);
        }
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(&self) -> bool {
        let mut grants = self.grants.lock().unwrap();
        let now = Instant::now();
        while let Some(&front) = grants.front() {
            if now.duration_since(front) >= self.window {
                grants.pop_front();
            } else {
                break;
            }
        }
        if grants.len() < self.quota {
            grants.push_back(now);
            true
        } else {
            false
        }
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
