//! Staleness sweep over the peer registry

use std::time::{Duration, Instant};
use tokio::time::{interval_at, Interval, MissedTickBehavior};

use super::registry::PeerRegistry;
use super::types::PeerId;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Finds records whose last activity is at least `timeout` old
#[derive(Debug, Clone, Copy)]
pub struct Pruner {
    timeout: Duration,
}

impl Pruner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Identifiers to evict at `now`
    pub fn sweep(&self, registry: &PeerRegistry, now: Instant) -> Vec<PeerId> {
        registry.stale(now, self.timeout)
    }

    /// Recurring timer with period equal to the timeout, first tick one
    /// period from now
    pub fn ticker(&self) -> Interval {
        let period = self.timeout.max(MIN_PERIOD);
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticker_period() {
        let pruner = Pruner::new(Duration::from_millis(1000));
        let mut ticker = pruner.ticker();
        let start = tokio::time::Instant::now();
        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_does_not_panic() {
        let pruner = Pruner::new(Duration::ZERO);
        let mut ticker = pruner.ticker();
        ticker.tick().await;
    }

    #[test]
    fn test_sweep_empty_registry() {
        let pruner = Pruner::new(Duration::from_millis(1000));
        assert!(pruner.sweep(&PeerRegistry::new(), Instant::now()).is_empty());
    }
}
