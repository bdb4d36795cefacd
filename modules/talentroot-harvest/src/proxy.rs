//! Proxy selection and outcome recording.
//!
//! Pure functions over the source's owned proxy list; the registry holds the
//! round-robin cursor and the lock.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use talentroot_common::{Proxy, ProxyPolicy, RotationStrategy};

/// Pick the next proxy index per the source's strategy. Only active,
/// non-cooling proxies qualify; returns None when the list is exhausted.
pub fn select(
    proxies: &[Proxy],
    strategy: RotationStrategy,
    cursor: usize,
    now: DateTime<Utc>,
) -> Option<usize> {
    let eligible: Vec<usize> = proxies
        .iter()
        .enumerate()
        .filter(|(_, p)| p.active && !p.is_cooling(now))
        .map(|(i, _)| i)
        .collect();
    if eligible.is_empty() {
        return None;
    }

    let picked = match strategy {
        RotationStrategy::RoundRobin => eligible[cursor % eligible.len()],
        RotationStrategy::Random => eligible[rand::rng().random_range(0..eligible.len())],
        RotationStrategy::LeastUsed => *eligible
            .iter()
            .min_by_key(|&&i| proxies[i].total_attempts())?,
        RotationStrategy::Performance => *eligible
            .iter()
            .max_by(|&&a, &&b| {
                performance_score(&proxies[a])
                    .partial_cmp(&performance_score(&proxies[b]))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?,
    };
    Some(picked)
}

/// Success rate per millisecond of average latency. Zero-history proxies
/// score highest so they get tried at least once.
fn performance_score(proxy: &Proxy) -> f64 {
    proxy.success_rate() / proxy.avg_response_ms.max(1.0)
}

/// Update a proxy after a request. A failure streak at the policy threshold
/// puts the proxy into cooldown and resets the streak.
pub fn record_outcome(
    proxy: &mut Proxy,
    success: bool,
    response_ms: u64,
    policy: &ProxyPolicy,
    now: DateTime<Utc>,
) {
    proxy.record(success, response_ms);
    if !success && proxy.consecutive_failures >= policy.failure_threshold {
        proxy.cooldown_until = Some(now + Duration::seconds(policy.cooldown_secs as i64));
        proxy.consecutive_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxies(n: usize) -> Vec<Proxy> {
        (0..n)
            .map(|i| Proxy::new(format!("http://10.0.0.{i}:8080")))
            .collect()
    }

    #[test]
    fn round_robin_cycles_through_eligible() {
        let list = proxies(3);
        let now = Utc::now();
        let picks: Vec<_> = (0..6)
            .map(|cursor| select(&list, RotationStrategy::RoundRobin, cursor, now).unwrap())
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn cooling_proxies_are_skipped() {
        let mut list = proxies(3);
        let now = Utc::now();
        list[1].cooldown_until = Some(now + Duration::minutes(5));
        let picks: Vec<_> = (0..4)
            .map(|cursor| select(&list, RotationStrategy::RoundRobin, cursor, now).unwrap())
            .collect();
        assert_eq!(picks, vec![0, 2, 0, 2]);
    }

    #[test]
    fn no_eligible_proxy_returns_none() {
        let mut list = proxies(2);
        let now = Utc::now();
        list[0].active = false;
        list[1].cooldown_until = Some(now + Duration::minutes(1));
        assert_eq!(select(&list, RotationStrategy::RoundRobin, 0, now), None);
    }

    #[test]
    fn least_used_prefers_fewest_attempts() {
        let mut list = proxies(3);
        list[0].record(true, 100);
        list[0].record(true, 100);
        list[1].record(true, 100);
        let picked = select(&list, RotationStrategy::LeastUsed, 0, Utc::now()).unwrap();
        assert_eq!(picked, 2);
    }

    #[test]
    fn performance_prefers_fast_reliable_proxies() {
        let mut list = proxies(2);
        // Proxy 0: perfect but slow. Proxy 1: perfect and fast.
        for _ in 0..10 {
            list[0].record(true, 2000);
            list[1].record(true, 100);
        }
        let picked = select(&list, RotationStrategy::Performance, 0, Utc::now()).unwrap();
        assert_eq!(picked, 1);
    }

    #[test]
    fn failure_streak_triggers_cooldown() {
        let mut proxy = Proxy::new("http://10.0.0.1:8080");
        let policy = ProxyPolicy::default();
        let now = Utc::now();
        for _ in 0..4 {
            record_outcome(&mut proxy, false, 50, &policy, now);
            assert!(proxy.cooldown_until.is_none());
        }
        record_outcome(&mut proxy, false, 50, &policy, now);
        assert!(proxy.is_cooling(now + Duration::seconds(1)));
        assert_eq!(proxy.consecutive_failures, 0);
    }

    #[test]
    fn success_resets_failure_streak() {
        let mut proxy = Proxy::new("http://10.0.0.1:8080");
        let policy = ProxyPolicy::default();
        let now = Utc::now();
        for _ in 0..4 {
            record_outcome(&mut proxy, false, 50, &policy, now);
        }
        record_outcome(&mut proxy, true, 50, &policy, now);
        assert_eq!(proxy.consecutive_failures, 0);
        record_outcome(&mut proxy, false, 50, &policy, now);
        assert!(proxy.cooldown_until.is_none());
    }
}
