//! Inbound heart-beat watchdog.
//!
//! The receive loop calls [`Liveness::mark_alive`] for every WebSocket
//! message (data or heart-beat). [`run_watchdog`] checks the flag once per
//! negotiated incoming interval and gives up after enough silent ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

/// Consecutive silent intervals tolerated before the broker is considered dead.
pub const MISSED_INTERVALS: u32 = 2;

/// Activity flag shared between the receive loop and the watchdog.
#[derive(Debug)]
pub struct Liveness {
    alive: AtomicBool,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    /// New flag, initially alive.
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
        }
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Read and clear the flag.
    pub fn check_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }
}

/// Outcome of the watchdog loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogResult {
    /// Nothing arrived for `MISSED_INTERVALS × interval`.
    TimedOut {
        /// Silence that triggered the timeout.
        elapsed: Duration,
    },
    /// The watchdog was cancelled externally.
    Cancelled,
}

/// Watch inbound activity at `interval`.
///
/// Each tick consumes the alive flag. If nothing arrived since the previous
/// tick the missed counter increments; reaching [`MISSED_INTERVALS`] returns
/// [`WatchdogResult::TimedOut`].
pub async fn run_watchdog(
    liveness: &Liveness,
    interval: Duration,
    cancel: CancellationToken,
) -> WatchdogResult {
    let mut check_interval = time::interval(interval);
    check_interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if liveness.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= MISSED_INTERVALS {
                        return WatchdogResult::TimedOut {
                            elapsed: interval * missed,
                        };
                    }
                }
            }
            () = cancel.cancelled() => {
                return WatchdogResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn check_alive_consumes_flag() {
        let liveness = Liveness::new();
        assert!(liveness.check_alive());
        assert!(!liveness.check_alive());
        liveness.mark_alive();
        assert!(liveness.check_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_cancelled() {
        let liveness = Arc::new(Liveness::new());
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let lv = liveness.clone();

        let handle = tokio::spawn(async move {
            run_watchdog(&lv, Duration::from_secs(100), cancel2).await
        });

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), WatchdogResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_broker_times_out_after_two_intervals() {
        let liveness = Liveness::new();
        let start = time::Instant::now();
        let result = run_watchdog(&liveness, Duration::from_secs(4), CancellationToken::new()).await;

        assert_eq!(
            result,
            WatchdogResult::TimedOut {
                elapsed: Duration::from_secs(8)
            }
        );
        assert_eq!(start.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn active_broker_stays_alive() {
        let liveness = Arc::new(Liveness::new());
        let lv = liveness.clone();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            run_watchdog(&lv, Duration::from_millis(50), cancel2).await
        });

        for _ in 0..10 {
            time::sleep(Duration::from_millis(30)).await;
            liveness.mark_alive();
        }

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), WatchdogResult::Cancelled);
    }
}
