use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(20);

/// Table size above which expired entries are swept on admission.
const PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Rate limit exceeded: 1 per {} second", .window.as_secs())]
pub struct RateLimitExceeded {
    pub window: Duration,
    pub retry_after: Duration,
}

impl RateLimitExceeded {
    /// Whole seconds until the client may retry, rounded up and never zero.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 || secs == 0 {
            secs + 1
        } else {
            secs
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Fixed-window admission gate keyed by client address.
///
/// A client is admitted when no admission was recorded for it within the last
/// `window`. The lookup and the record happen under one lock, so two racing
/// requests from the same address can never both be admitted.
#[derive(Debug)]
pub struct RateLimiter<C = SystemClock> {
    window: Duration,
    clock: C,
    admitted: Mutex<HashMap<IpAddr, Instant>>,
}

impl RateLimiter<SystemClock> {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(window: Duration, clock: C) -> Self {
        Self {
            window,
            clock,
            admitted: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check(&self, client: IpAddr) -> Result<(), RateLimitExceeded> {
        let now = self.clock.now();
        let mut admitted = self
            .admitted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(&last) = admitted.get(&client) {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.window {
                return Err(RateLimitExceeded {
                    window: self.window,
                    retry_after: self.window - elapsed,
                });
            }
        }

        if admitted.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            admitted.retain(|_, last| now.saturating_duration_since(*last) < window);
        }
        admitted.insert(client, now);
        Ok(())
    }

    pub fn tracked_clients(&self) -> usize {
        self.admitted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{Clock, RateLimiter};

    #[derive(Clone)]
    struct ManualClock(Arc<Mutex<Instant>>);

    impl ManualClock {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(Instant::now())))
        }

        fn advance(&self, by: Duration) {
            *self.0.lock().expect("clock lock") += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock().expect("clock lock")
        }
    }

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn second_request_inside_window_is_rejected() {
        let clock = ManualClock::new();
        let limiter = RateLimiter::with_clock(Duration::from_secs(20), clock.clone());

        assert!(limiter.check(addr(1)).is_ok());
        clock.advance(Duration::from_millis(19_500));
        let err = limiter.check(addr(1)).expect_err("inside window");
        assert_eq!(err.retry_after, Duration::from_millis(500));
        assert_eq!(err.retry_after_secs(), 1);
        assert_eq!(err.to_string(), "Rate limit exceeded: 1 per 20 second");
    }

    #[test]
    fn request_after_window_is_admitted() {
        let clock = ManualClock::new();
        let limiter = RateLimiter::with_clock(Duration::from_secs(20), clock.clone());

        assert!(limiter.check(addr(1)).is_ok());
        clock.advance(Duration::from_secs(20));
        assert!(limiter.check(addr(1)).is_ok());
    }

    #[test]
    fn rejected_request_does_not_extend_window() {
        let clock = ManualClock::new();
        let limiter = RateLimiter::with_clock(Duration::from_secs(20), clock.clone());

        assert!(limiter.check(addr(1)).is_ok());
        clock.advance(Duration::from_secs(10));
        assert!(limiter.check(addr(1)).is_err());
        clock.advance(Duration::from_secs(10));
        assert!(limiter.check(addr(1)).is_ok());
    }

    #[test]
    fn distinct_clients_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(20));
        assert!(limiter.check(addr(1)).is_ok());
        assert!(limiter.check(addr(2)).is_ok());
        assert!(limiter.check(addr(1)).is_err());
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn concurrent_checks_admit_exactly_one() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(20)));
        let handles = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || limiter.check(addr(7)).is_ok())
            })
            .collect::<Vec<_>>();

        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread should finish"))
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn expired_entries_are_pruned_once_table_is_large() {
        let clock = ManualClock::new();
        let limiter = RateLimiter::with_clock(Duration::from_secs(1), clock.clone());

        for i in 0..super::PRUNE_THRESHOLD {
            let ip = IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + i as u32));
            assert!(limiter.check(ip).is_ok());
        }
        clock.advance(Duration::from_secs(2));
        assert!(limiter.check(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1))).is_ok());
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
