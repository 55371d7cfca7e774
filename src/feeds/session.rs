//! Reconnect policy shared by every adapter: exponential backoff with
//! jitter, capped, with an extended cool-down after too many consecutive
//! failures. Also the once-per-window log limiter used by polling loops.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::warn;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const EXTENDED_COOLDOWN: Duration = Duration::from_secs(60);
const JITTER_FACTOR: f64 = 0.3;

/// Per-connection backoff state. `reset()` after a successful session.
#[derive(Debug)]
pub struct Backoff {
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt: 0,
        }
    }

    /// Delay before the next connection attempt. After `max_attempts`
    /// consecutive failures the extended cool-down applies and the attempt
    /// counter starts over.
    pub fn next_delay(&mut self, venue: &str) -> Duration {
        if self.attempt >= self.max_attempts {
            warn!(
                venue,
                attempts = self.attempt,
                "reconnect attempts exhausted, entering extended cool-down"
            );
            self.attempt = 0;
            return jitter(EXTENDED_COOLDOWN);
        }

        let exp = BACKOFF_BASE
            .saturating_mul(1u32 << self.attempt.min(30))
            .min(BACKOFF_CAP);
        self.attempt += 1;
        jitter(exp)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// ±30% jitter, floored at the base delay.
fn jitter(d: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(1.0 - JITTER_FACTOR..=1.0 + JITTER_FACTOR);
    let jittered = d.mul_f64(factor);
    jittered.max(BACKOFF_BASE)
}

/// Allows one warn-level log per window; repeat occurrences inside the
/// window should be demoted to debug.
#[derive(Debug)]
pub struct WarnWindow {
    window: Duration,
    last: Option<Instant>,
}

impl WarnWindow {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Backoff::new(10);
        let mut last = Duration::ZERO;
        for _ in 0..6 {
            let d = backoff.next_delay("test");
            // Jitter aside, each delay should stay within the configured cap.
            assert!(d <= BACKOFF_CAP.mul_f64(1.0 + JITTER_FACTOR));
            assert!(d >= BACKOFF_BASE);
            last = d;
        }
        assert!(last >= Duration::from_secs(10));
    }

    #[test]
    fn test_extended_cooldown_after_max_attempts() {
        let mut backoff = Backoff::new(3);
        for _ in 0..3 {
            backoff.next_delay("test");
        }
        let cooldown = backoff.next_delay("test");
        assert!(cooldown >= EXTENDED_COOLDOWN.mul_f64(1.0 - JITTER_FACTOR));
        // Counter restarts after the cool-down.
        assert_eq!(backoff.attempt(), 0);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(10);
        backoff.next_delay("test");
        backoff.next_delay("test");
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
    }

    #[test]
    fn test_warn_window() {
        let mut window = WarnWindow::new(Duration::from_secs(60));
        assert!(window.allow());
        assert!(!window.allow());
        assert!(!window.allow());

        let mut tight = WarnWindow::new(Duration::ZERO);
        assert!(tight.allow());
        assert!(tight.allow());
    }
}
