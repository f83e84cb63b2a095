use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{Duration, Instant};

pub const WINDOW: Duration = Duration::from_secs(1);

// Counter state of one window
struct Window {
    start: Instant,
    count: u32,
}

/// Fixed one-second window limiter for a single identity (API key or outbound path).
///
/// Both calls roll the window over first when a full second has passed since
/// it started. A quota of zero never allows anything.
pub struct FixedWindowLimiter {
    quota: u32,
    window: Mutex<Window>,
}

impl FixedWindowLimiter {
    pub fn new(quota: u32) -> Self {
        Self {
            quota,
            window: Mutex::new(Window {
                start: Instant::now(),
                count: 0,
            }),
        }
    }

    pub fn quota(&self) -> u32 {
        self.quota
    }

    /// Consume one unit of quota if the current window has any left.
    pub fn allow(&self) -> bool {
        let mut window = self.lock_rolled();
        if window.count < self.quota {
            window.count += 1;
            return true;
        }
        false
    }

    /// Probe without consuming.
    pub fn is_limited(&self) -> bool {
        let window = self.lock_rolled();
        window.count >= self.quota
    }

    // Requests still allowed in the current window
    pub fn remaining(&self) -> u32 {
        let window = self.lock_rolled();
        self.quota.saturating_sub(window.count)
    }

    fn lock_rolled(&self) -> MutexGuard<'_, Window> {
        // counters stay consistent even if a holder panicked
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if now.saturating_duration_since(window.start) >= WINDOW {
            window.start = now;
            window.count = 0;
        }
        window
    }
}

/// Lazily built identity -> limiter map.
///
/// Lookups take a shard read lock; creation goes through the entry API which
/// holds the shard write lock, so concurrent first calls for one identity end
/// up sharing a single limiter. The quota passed on the first call sticks.
#[derive(Default)]
pub struct LimiterRegistry {
    limiters: DashMap<String, Arc<FixedWindowLimiter>>,
}

impl LimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &str) -> Option<Arc<FixedWindowLimiter>> {
        self.limiters.get(identity).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_or_create(&self, identity: &str, quota: u32) -> Arc<FixedWindowLimiter> {
        if let Some(limiter) = self.get(identity) {
            return limiter;
        }
        let entry = self
            .limiters
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(FixedWindowLimiter::new(quota)));
        Arc::clone(entry.value())
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}
