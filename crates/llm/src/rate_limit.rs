//! Completion provider rate-limit discipline
//!
//! Per-provider state: a rolling window of request timestamps from the
//! last 60 seconds.
//!
//! - Every request waits a random 1-2 s jitter before firing.
//! - **Reactive** (default): on a rate-limit response, wait until the
//!   oldest in-window timestamp is older than 60 s, plus a 2 s safety
//!   buffer. If full-window waits repeat back to back, switch to
//!   micro-retry: prune timestamps past 58 s and back off
//!   `min(5 s * consecutive_full_waits, 15 s)` instead.
//! - **Proactive** (opt-in): acquire a slot from a sliding-window limiter
//!   before sending; never more than N requests per minute.
//! - On success, timestamps older than 30 s are dropped. On final failure
//!   the provider's window is cleared.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ragforge_config::constants::rate_limit as limits;

/// Identify a rate-limit response by provider code or message substring.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    limits::RATE_LIMIT_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Which slot-acquisition strategy the limiter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitStrategy {
    /// Wait only after the provider pushes back
    Reactive,
    /// Never send more than `max_per_minute` requests per minute
    Proactive { max_per_minute: usize },
}

#[derive(Debug, Default)]
struct WindowState {
    timestamps: VecDeque<Instant>,
    consecutive_full_waits: u32,
}

/// Per-provider rate limiter. Construct once per provider instance at
/// startup; the window dies with the provider.
pub struct RateLimiter {
    provider: String,
    strategy: RateLimitStrategy,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    pub fn new(provider: impl Into<String>, strategy: RateLimitStrategy) -> Self {
        Self {
            provider: provider.into(),
            strategy,
            state: Mutex::new(WindowState::default()),
        }
    }

    pub fn reactive(provider: impl Into<String>) -> Self {
        Self::new(provider, RateLimitStrategy::Reactive)
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Jitter, optional proactive slot acquisition, then record the
    /// request timestamp. Call immediately before sending.
    pub async fn before_request(&self) {
        let jitter_ms = rand::thread_rng().gen_range(limits::JITTER_MIN_MS..=limits::JITTER_MAX_MS);
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;

        if let RateLimitStrategy::Proactive { .. } = self.strategy {
            loop {
                let wait = self.proactive_delay_at(Instant::now());
                if wait.is_zero() {
                    break;
                }
                tracing::debug!(
                    provider = %self.provider,
                    wait_ms = wait.as_millis() as u64,
                    "Proactive limiter holding request"
                );
                tokio::time::sleep(wait).await;
            }
        }

        self.record_at(Instant::now());
    }

    /// Record an outgoing request timestamp.
    pub fn record_at(&self, now: Instant) {
        self.state.lock().timestamps.push_back(now);
    }

    /// Wait out a rate-limit response, returning the delay actually slept.
    pub async fn on_rate_limit(&self) -> Duration {
        let delay = self.reactive_delay_at(Instant::now());
        if !delay.is_zero() {
            tracing::warn!(
                provider = %self.provider,
                delay_ms = delay.as_millis() as u64,
                "Rate limited; waiting for window"
            );
            tokio::time::sleep(delay).await;
        }
        delay
    }

    /// Compute the reactive wait for a rate limit observed at `now`.
    pub fn reactive_delay_at(&self, now: Instant) -> Duration {
        let mut state = self.state.lock();

        let Some(oldest) = state.timestamps.front().copied() else {
            // Nothing in flight recently; a single probe is allowed.
            return Duration::ZERO;
        };

        let oldest_age = now.duration_since(oldest);
        if oldest_age > limits::WINDOW {
            // Window already expired; retry immediately.
            state.consecutive_full_waits = 0;
            return Duration::ZERO;
        }

        state.consecutive_full_waits += 1;
        if state.consecutive_full_waits > 1 {
            // Repeated full-window waits: prune the stale tail and take a
            // short backoff instead of another full wait.
            if let Some(horizon) = now.checked_sub(limits::PRUNE_HORIZON) {
                while state.timestamps.front().is_some_and(|t| *t < horizon) {
                    state.timestamps.pop_front();
                }
            }
            let backoff = limits::MICRO_RETRY_STEP * state.consecutive_full_waits;
            return backoff.min(limits::MICRO_RETRY_MAX);
        }

        limits::WINDOW - oldest_age + limits::SAFETY_BUFFER
    }

    /// Proactive slot check: how long until a slot frees up at `now`.
    pub fn proactive_delay_at(&self, now: Instant) -> Duration {
        let RateLimitStrategy::Proactive { max_per_minute } = self.strategy else {
            return Duration::ZERO;
        };

        let mut state = self.state.lock();
        if let Some(horizon) = now.checked_sub(limits::WINDOW) {
            while state.timestamps.front().is_some_and(|t| *t < horizon) {
                state.timestamps.pop_front();
            }
        }

        if state.timestamps.len() < max_per_minute {
            return Duration::ZERO;
        }

        let oldest = *state.timestamps.front().expect("non-empty window");
        limits::WINDOW
            .checked_sub(now.duration_since(oldest))
            .unwrap_or(Duration::ZERO)
    }

    /// Success: drop timestamps past the 30 s horizon and reset the
    /// full-wait counter.
    pub fn on_success_at(&self, now: Instant) {
        let mut state = self.state.lock();
        if let Some(horizon) = now.checked_sub(limits::SUCCESS_DROP_HORIZON) {
            while state.timestamps.front().is_some_and(|t| *t < horizon) {
                state.timestamps.pop_front();
            }
        }
        state.consecutive_full_waits = 0;
    }

    pub fn on_success(&self) {
        self.on_success_at(Instant::now());
    }

    /// Final failure: clear all timestamps for this provider.
    pub fn on_final_failure(&self) {
        let mut state = self.state.lock();
        state.timestamps.clear();
        state.consecutive_full_waits = 0;
    }

    /// Requests currently tracked in the window.
    pub fn window_len(&self) -> usize {
        self.state.lock().timestamps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_detection() {
        assert!(is_rate_limit_message("HTTP 429 Too Many Requests"));
        assert!(is_rate_limit_message("Quota exceeded for model"));
        assert!(is_rate_limit_message("RESOURCE EXHAUSTED"));
        assert!(is_rate_limit_message("you hit a rate limit"));
        assert!(!is_rate_limit_message("internal server error"));
    }

    #[test]
    fn test_reactive_full_window_wait() {
        // Ten requests fired within 5 s; the 11th is rate limited when the
        // oldest is 4 s old: wait 56 s remaining + 2 s buffer = 58 s.
        let limiter = RateLimiter::reactive("test");
        let start = Instant::now();
        for i in 0..10 {
            limiter.record_at(start + Duration::from_millis(i * 500));
        }

        let now = start + Duration::from_secs(4);
        let delay = limiter.reactive_delay_at(now);
        assert_eq!(delay, Duration::from_secs(58));
    }

    #[test]
    fn test_reactive_expired_window_retries_immediately() {
        let limiter = RateLimiter::reactive("test");
        let start = Instant::now();
        limiter.record_at(start);

        // First rate limit at 4 s: full-window wait.
        let first = limiter.reactive_delay_at(start + Duration::from_secs(4));
        assert!(first > Duration::ZERO);

        // Retry rate-limited again, but the oldest timestamp is now 61 s
        // old: the window is expired, proceed immediately.
        let second = limiter.reactive_delay_at(start + Duration::from_secs(61));
        assert_eq!(second, Duration::ZERO);
    }

    #[test]
    fn test_micro_retry_after_repeated_full_waits() {
        let limiter = RateLimiter::reactive("test");
        let start = Instant::now();
        limiter.record_at(start);

        let now = start + Duration::from_secs(10);
        let first = limiter.reactive_delay_at(now);
        assert_eq!(first, Duration::from_secs(52)); // 50 remaining + 2 buffer

        // Second consecutive full-window hit switches to micro-retry.
        let second = limiter.reactive_delay_at(now + Duration::from_secs(1));
        assert_eq!(second, Duration::from_secs(10)); // min(5 * 2, 15)

        let third = limiter.reactive_delay_at(now + Duration::from_secs(2));
        assert_eq!(third, Duration::from_secs(15)); // min(5 * 3, 15) capped
    }

    #[test]
    fn test_success_drops_old_timestamps() {
        let limiter = RateLimiter::reactive("test");
        let start = Instant::now();
        limiter.record_at(start);
        limiter.record_at(start + Duration::from_secs(25));
        limiter.record_at(start + Duration::from_secs(35));

        limiter.on_success_at(start + Duration::from_secs(40));
        // Entries older than 30 s (the first one) are gone.
        assert_eq!(limiter.window_len(), 2);
    }

    #[test]
    fn test_final_failure_clears_window() {
        let limiter = RateLimiter::reactive("test");
        limiter.record_at(Instant::now());
        limiter.on_final_failure();
        assert_eq!(limiter.window_len(), 0);
    }

    #[test]
    fn test_proactive_slot_acquisition() {
        let limiter = RateLimiter::new(
            "test",
            RateLimitStrategy::Proactive { max_per_minute: 2 },
        );
        let start = Instant::now();
        limiter.record_at(start);
        limiter.record_at(start + Duration::from_secs(1));

        // Window full: must wait until the oldest entry ages out.
        let wait = limiter.proactive_delay_at(start + Duration::from_secs(10));
        assert_eq!(wait, Duration::from_secs(50));

        // After the window passes, a slot is free.
        let wait = limiter.proactive_delay_at(start + Duration::from_secs(61));
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn test_empty_window_allows_probe() {
        let limiter = RateLimiter::reactive("test");
        assert_eq!(limiter.reactive_delay_at(Instant::now()), Duration::ZERO);
    }
}
