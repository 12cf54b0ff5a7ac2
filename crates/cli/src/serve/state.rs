//! Application state and rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use postmortem_engine::{Actor, HeuristicSuggester, Workflow};
use postmortem_storage::MemoryStorage;

use super::RATE_LIMIT_WINDOW_SECS;

/// Per-IP request tracker: (request count, window start time).
struct IpTracker {
    windows: HashMap<IpAddr, (u64, Instant)>,
    last_sweep: Instant,
}

impl IpTracker {
    /// Drop every address whose window has expired, at most once per window.
    fn sweep(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.last_sweep) < window {
            return;
        }
        self.windows
            .retain(|_, (_, started)| now.duration_since(*started) < window);
        self.last_sweep = now;
    }
}

/// Fixed-window per-IP rate limiter.
pub(crate) struct RateLimiter {
    tracker: Mutex<IpTracker>,
    max_requests: u64,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u64) -> Self {
        Self {
            tracker: Mutex::new(IpTracker {
                windows: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            max_requests,
        }
    }

    /// `Err(retry_after_secs)` once `ip` exceeds its budget for the window.
    pub(crate) async fn check(&self, ip: IpAddr) -> Result<(), u64> {
        self.check_at(ip, Instant::now()).await
    }

    async fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), u64> {
        let mut tracker = self.tracker.lock().await;
        tracker.sweep(now, Duration::from_secs(RATE_LIMIT_WINDOW_SECS));
        let (count, started) = tracker.windows.entry(ip).or_insert((0, now));

        let elapsed = now.duration_since(*started).as_secs();
        if elapsed >= RATE_LIMIT_WINDOW_SECS {
            *count = 0;
            *started = now;
        }

        *count += 1;
        if *count > self.max_requests {
            Err(RATE_LIMIT_WINDOW_SECS.saturating_sub(elapsed))
        } else {
            Ok(())
        }
    }
}

pub(crate) struct AppState {
    pub(crate) workflow: Workflow<MemoryStorage>,
    pub(crate) suggester: HeuristicSuggester,
    /// API key -> actor, from the `[[users]]` table.
    pub(crate) users: HashMap<String, Actor>,
    pub(crate) rate_limiter: RateLimiter,
}

impl AppState {
    pub(crate) fn authenticate(&self, api_key: &str) -> Option<&Actor> {
        self.users.get(api_key)
    }
}
