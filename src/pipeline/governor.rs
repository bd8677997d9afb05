//! Outbound pacing to a target frame interval

use std::time::{Duration, Instant};

/// Keeps successive deliveries at least `interval` apart.
///
/// If the source is already slower nothing is slept: the loop then runs as
/// fast as frames arrive, never faster than requested.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateGovernor {
    interval: Duration,
}

impl RateGovernor {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// `None` for a non-positive or non-finite rate, or one so low that
    /// its interval does not fit in a [`Duration`]
    pub fn from_fps(fps: f64) -> Option<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return None;
        }
        Duration::try_from_secs_f64(fps.recip()).ok().map(Self::new)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Remaining time to wait after `elapsed` of work
    pub fn delay_after(&self, elapsed: Duration) -> Duration {
        self.interval.saturating_sub(elapsed)
    }

    /// Block the current thread until `interval` has passed since `started`,
    /// usually the previous delivery
    pub fn pace(&self, started: Instant) -> Duration {
        let delay = self.delay_after(started.elapsed());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        delay
    }

    /// Async variant of [`pace`](Self::pace) for tasks on the runtime
    pub async fn pace_async(&self, started: Instant) -> Duration {
        let delay = self.delay_after(started.elapsed());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_interval_minus_work() {
        let governor = RateGovernor::new(Duration::from_millis(100));
        assert_eq!(
            governor.delay_after(Duration::from_millis(10)),
            Duration::from_millis(90)
        );
        assert_eq!(governor.delay_after(Duration::from_millis(150)), Duration::ZERO);
    }

    #[test]
    fn fps_conversion_rejects_nonsense() {
        assert_eq!(
            RateGovernor::from_fps(25.0).map(|g| g.interval()),
            Some(Duration::from_millis(40))
        );
        assert!(RateGovernor::from_fps(0.0).is_none());
        assert!(RateGovernor::from_fps(f64::NAN).is_none());
    }

    #[test]
    fn vanishing_rates_do_not_overflow() {
        assert!(RateGovernor::from_fps(1e-30).is_none());
        assert!(RateGovernor::from_fps(f64::MIN_POSITIVE).is_none());
        assert!(RateGovernor::from_fps(-1.0).is_none());
        assert!(RateGovernor::from_fps(f64::INFINITY).is_none());
        assert_eq!(
            RateGovernor::from_fps(0.5).map(|g| g.interval()),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn slow_work_is_not_delayed_further() {
        let governor = RateGovernor::new(Duration::from_millis(5));
        let started = Instant::now() - Duration::from_millis(20);
        assert_eq!(governor.pace(started), Duration::ZERO);
    }

    #[tokio::test]
    async fn async_pacing_waits_out_the_interval() {
        let governor = RateGovernor::new(Duration::from_millis(30));
        let started = Instant::now();
        governor.pace_async(started).await;
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
