//! Per-source request budgets: rolling minute/hour/day windows, minimum
//! inter-request delay with jitter, and a burst allowance with cooldown.
//!
//! All state lives behind one mutex so reserve-check-increment is a single
//! indivisible operation, so two concurrent callers can never both believe
//! they took the last slot in a window.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

use talentroot_common::{OverflowPolicy, RateLimitPolicy, Result, TalentrootError};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86_400);

/// Outcome of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Slot reserved. The caller must sleep `delay` before issuing the
    /// request (min-delay spacing plus jitter).
    Ready { delay: Duration },
    /// Every slot in some window is taken; come back after `after`.
    RetryAfter { after: Duration },
}

struct Window {
    started: Instant,
    count: u32,
}

impl Window {
    fn new(now: Instant) -> Self {
        Self {
            started: now,
            count: 0,
        }
    }

    fn roll(&mut self, now: Instant, span: Duration) {
        if now.duration_since(self.started) >= span {
            self.started = now;
            self.count = 0;
        }
    }

    fn resets_in(&self, now: Instant, span: Duration) -> Duration {
        span.saturating_sub(now.duration_since(self.started))
    }
}

struct LimiterState {
    minute: Window,
    hour: Window,
    day: Window,
    /// When the most recently reserved request is scheduled to fire.
    last_scheduled: Option<Instant>,
    burst_used: u32,
    burst_cooldown_until: Option<Instant>,
}

pub struct RateLimiter {
    policy: RateLimitPolicy,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        let now = Instant::now();
        Self {
            policy,
            state: Mutex::new(LimiterState {
                minute: Window::new(now),
                hour: Window::new(now),
                day: Window::new(now),
                last_scheduled: None,
                burst_used: 0,
                burst_cooldown_until: None,
            }),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Attempt to reserve one request slot. Window counters are checked and
    /// incremented under the same lock acquisition.
    pub fn try_reserve(&self) -> Reservation {
        let now = Instant::now();
        let mut s = self.state.lock().unwrap();

        s.minute.roll(now, MINUTE);
        s.hour.roll(now, HOUR);
        s.day.roll(now, DAY);

        // A limit of 0 disables that window.
        let mut blocked_for: Option<Duration> = None;
        let windows = [
            (self.policy.max_per_minute, &s.minute, MINUTE),
            (self.policy.max_per_hour, &s.hour, HOUR),
            (self.policy.max_per_day, &s.day, DAY),
        ];
        for (limit, window, span) in windows {
            if limit > 0 && window.count >= limit {
                let wait = window.resets_in(now, span);
                blocked_for = Some(blocked_for.map_or(wait, |w: Duration| w.max(wait)));
            }
        }
        if let Some(after) = blocked_for {
            return Reservation::RetryAfter { after };
        }

        // Burst cooldown expiry restores the allowance.
        if matches!(s.burst_cooldown_until, Some(until) if until <= now) {
            s.burst_cooldown_until = None;
            s.burst_used = 0;
        }

        // Min-delay spacing. Requests arriving faster than min_delay consume
        // the burst allowance; once it is spent they wait out the spacing
        // until the burst cooldown ends.
        let min_delay = Duration::from_millis(self.policy.min_delay_ms);
        let mut delay = Duration::ZERO;
        if let Some(last) = s.last_scheduled {
            let next_allowed = last + min_delay;
            if next_allowed > now {
                let in_cooldown = matches!(s.burst_cooldown_until, Some(until) if until > now);
                if !in_cooldown && s.burst_used < self.policy.burst_size {
                    s.burst_used += 1;
                    if s.burst_used >= self.policy.burst_size {
                        s.burst_cooldown_until =
                            Some(now + Duration::from_secs(self.policy.burst_cooldown_secs));
                    }
                } else {
                    delay = next_allowed - now;
                }
            } else if s.burst_cooldown_until.is_none() {
                // Naturally spaced traffic keeps the allowance full.
                s.burst_used = 0;
            }
        }

        if self.policy.jitter_ms > 0 {
            delay += Duration::from_millis(rand::rng().random_range(0..self.policy.jitter_ms));
        }

        s.minute.count += 1;
        s.hour.count += 1;
        s.day.count += 1;
        s.last_scheduled = Some(now + delay);

        Reservation::Ready { delay }
    }

    /// Reserve a slot, honoring the source's overflow policy: `Wait` sleeps
    /// until the window resets, `Reject` returns a retry-after error.
    pub async fn acquire(&self) -> Result<()> {
        loop {
            match self.try_reserve() {
                Reservation::Ready { delay } => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    return Ok(());
                }
                Reservation::RetryAfter { after } => match self.policy.overflow {
                    OverflowPolicy::Wait => tokio::time::sleep(after).await,
                    OverflowPolicy::Reject => {
                        return Err(TalentrootError::RateLimited {
                            retry_after_ms: after.as_millis() as u64,
                        })
                    }
                },
            }
        }
    }
}
