//! Token-bucket gate in front of [`log`], so a hostile or malformed peer
//! cannot flood the log with TLS-layer noise.

use std::time::{Duration, Instant};

/// Caps both the sustained frequency and the burst size of a log site.
pub struct RateLimiter {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// `burst` tokens available immediately, refilling at `per_sec` tokens/s.
    pub fn new(burst: u32, per_sec: f64) -> Self {
        RateLimiter {
            capacity: burst as f64,
            tokens: burst as f64,
            refill_per_sec: per_sec,
            last_refill: Instant::now(),
        }
    }

    /// Returns `true` if the caller should log this occurrence.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl Default for RateLimiter {
    /// 5 bursts, refilling at 1 per 10 seconds — generous enough for real
    /// operational noise, tight enough to absorb an error-queue flood from
    /// a single malformed handshake.
    fn default() -> Self {
        RateLimiter::new(5, 0.1)
    }
}

/// A named rate limiter plus a minimum spacing, convenient for "warn once,
/// then shut up" log sites like the DH-parameter-length warning.
pub struct NamedLimiter {
    limiter: RateLimiter,
    min_gap: Duration,
    last_logged: Option<Instant>,
}

impl NamedLimiter {
    pub fn new() -> Self {
        NamedLimiter {
            limiter: RateLimiter::default(),
            min_gap: Duration::from_secs(5),
            last_logged: None,
        }
    }

    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_logged {
            if now.duration_since(last) < self.min_gap {
                return false;
            }
        }
        if self.limiter.allow() {
            self.last_logged = Some(now);
            true
        } else {
            false
        }
    }
}

impl Default for NamedLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_throttle() {
        let mut rl = RateLimiter::new(3, 0.0001);
        assert!(rl.allow());
        assert!(rl.allow());
        assert!(rl.allow());
        assert!(!rl.allow(), "burst exhausted, refill is negligible in this window");
    }
}
