//! Bounded readiness polling.
//!
//! Replaces fixed settle sleeps: a check is polled until it passes or the
//! budget runs out. Time is read through `Clock` so tests never sleep.
use anyhow::Result;
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `Instant` and `thread::sleep`.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// How a bounded wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready { polls: u32, waited: Duration },
    TimedOut { polls: u32, waited: Duration },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }

    pub fn polls(&self) -> u32 {
        match self {
            Readiness::Ready { polls, .. } | Readiness::TimedOut { polls, .. } => *polls,
        }
    }

    pub fn waited(&self) -> Duration {
        match self {
            Readiness::Ready { waited, .. } | Readiness::TimedOut { waited, .. } => *waited,
        }
    }
}

/// Poll `check` every `interval` until it returns true or `timeout` elapses.
///
/// The check always runs at least once, so a zero timeout is a single probe.
/// Errors from `check` abort the wait.
pub fn wait_until<C, F>(
    clock: &C,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<Readiness>
where
    C: Clock + ?Sized,
    F: FnMut() -> Result<bool>,
{
    let start = clock.now();
    let mut polls = 0;
    loop {
        polls += 1;
        let ready = check()?;
        let waited = clock.now().saturating_sub(start);
        if ready {
            return Ok(Readiness::Ready { polls, waited });
        }
        if waited >= timeout {
            return Ok(Readiness::TimedOut { polls, waited });
        }
        let remaining = timeout - waited;
        clock.sleep(interval.min(remaining));
    }
}

/// Single TCP connect attempt against the bridge's Modbus listener.
pub fn tcp_reachable(addr: SocketAddr, connect_timeout: Duration) -> bool {
    match TcpStream::connect_timeout(&addr, connect_timeout) {
        Ok(_) => true,
        Err(err) => {
            tracing::debug!(%addr, error = %err, "bridge probe not reachable yet");
            false
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeClock;
    use super::*;
    use anyhow::anyhow;
    use std::net::TcpListener;

    #[test]
    fn ready_on_first_poll_does_not_sleep() {
        let clock = FakeClock::default();
        let outcome = wait_until(&clock, Duration::from_secs(10), Duration::from_millis(500), || {
            Ok(true)
        })
        .expect("wait");
        assert_eq!(
            outcome,
            Readiness::Ready {
                polls: 1,
                waited: Duration::ZERO
            }
        );
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn becomes_ready_after_a_few_polls() {
        let clock = FakeClock::default();
        let mut remaining = 3;
        let outcome = wait_until(&clock, Duration::from_secs(10), Duration::from_secs(1), || {
            remaining -= 1;
            Ok(remaining == 0)
        })
        .expect("wait");
        assert_eq!(
            outcome,
            Readiness::Ready {
                polls: 3,
                waited: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn times_out_at_the_budget_without_overshooting() {
        let clock = FakeClock::default();
        let outcome = wait_until(&clock, Duration::from_millis(1200), Duration::from_millis(500), || {
            Ok(false)
        })
        .expect("wait");
        assert!(!outcome.is_ready());
        assert_eq!(
            outcome,
            Readiness::TimedOut {
                polls: 4,
                waited: Duration::from_millis(1200)
            }
        );
        assert_eq!(clock.elapsed(), Duration::from_millis(1200));
    }

    #[test]
    fn zero_timeout_polls_once() {
        let clock = FakeClock::default();
        let mut calls = 0;
        let outcome = wait_until(&clock, Duration::ZERO, Duration::from_millis(500), || {
            calls += 1;
            Ok(false)
        })
        .expect("wait");
        assert_eq!(calls, 1);
        assert!(!outcome.is_ready());
    }

    #[test]
    fn check_errors_abort_the_wait() {
        let clock = FakeClock::default();
        let err = wait_until(&clock, Duration::from_secs(5), Duration::from_secs(1), || {
            Err(anyhow!("ps failed"))
        })
        .expect_err("error propagates");
        assert_eq!(err.to_string(), "ps failed");
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn tcp_probe_sees_a_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        assert!(tcp_reachable(addr, Duration::from_millis(500)));
        drop(listener);
    }
}
