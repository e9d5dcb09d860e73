//! The flush scheduler.
//!
//! A quiescence timer expressed as a pure state machine. The caller passes
//! the current instant in and sleeps until [`FlushScheduler::deadline`]; no
//! timer lives in here, so tests drive it with a paused tokio clock or with
//! hand-built instants.
//!
//! ```text
//! Idle --enqueue--> Armed --deadline--> Flushing --finish--> Idle
//!                     ^                    |
//!                     +----pending---------+
//! ```

use std::time::Duration;

use tokio::time::Instant;

use crate::config::SyncConfig;

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No pending changes.
    Idle,
    /// Pending changes, waiting for quiet.
    Armed {
        /// When the oldest unflushed event arrived.
        first_event: Instant,
        /// When the flush fires.
        deadline: Instant,
    },
    /// A commit is running.
    Flushing {
        /// First event that arrived during the commit, if any.
        next_first: Option<Instant>,
    },
}

/// What an enqueue means for timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmDecision {
    /// The max-wait bound is exceeded: flush right away.
    FlushNow,
    /// The flush is (re)scheduled for this instant.
    Armed(Instant),
    /// A commit is in flight; the change joins the next cycle.
    Deferred,
}

#[derive(Debug, Clone)]
pub struct FlushScheduler {
    idle_window: Duration,
    max_wait: Duration,
    state: SchedulerState,
}

impl FlushScheduler {
    pub fn new(idle_window: Duration, max_wait: Duration) -> Self {
        Self {
            idle_window,
            max_wait: max_wait.max(idle_window),
            state: SchedulerState::Idle,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.idle_window(), config.max_wait())
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Record an enqueue at `now`.
    pub fn on_enqueue(&mut self, now: Instant) -> ArmDecision {
        match &mut self.state {
            SchedulerState::Idle => {
                let deadline = self.deadline_for(now, now);
                self.state = SchedulerState::Armed {
                    first_event: now,
                    deadline,
                };
                ArmDecision::Armed(deadline)
            }
            SchedulerState::Armed {
                first_event,
                deadline,
            } => {
                if now.saturating_duration_since(*first_event) >= self.max_wait {
                    *deadline = now;
                    return ArmDecision::FlushNow;
                }
                let first = *first_event;
                *deadline = (now + self.idle_window).min(first + self.max_wait);
                ArmDecision::Armed(*deadline)
            }
            SchedulerState::Flushing { next_first } => {
                next_first.get_or_insert(now);
                ArmDecision::Deferred
            }
        }
    }

    /// When the armed flush fires.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            SchedulerState::Armed { deadline, .. } => Some(deadline),
            _ => None,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().map(|d| now >= d).unwrap_or(false)
    }

    /// Enter `Flushing`. The caller drains the queues right after.
    pub fn begin_flush(&mut self) {
        self.state = SchedulerState::Flushing { next_first: None };
    }

    /// Leave `Flushing`: back to `Idle`, or `Armed` if changes are pending.
    pub fn finish_flush(&mut self, now: Instant, has_pending: bool) {
        let next_first = match self.state {
            SchedulerState::Flushing { next_first } => next_first,
            _ => None,
        };

        self.state = if has_pending {
            let first = next_first.unwrap_or(now);
            SchedulerState::Armed {
                first_event: first,
                deadline: self.deadline_for(first, now),
            }
        } else {
            SchedulerState::Idle
        };
    }

    fn deadline_for(&self, first: Instant, now: Instant) -> Instant {
        (now + self.idle_window).min(first + self.max_wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> FlushScheduler {
        FlushScheduler::new(Duration::from_millis(150), Duration::from_millis(500))
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_first_enqueue_arms_idle_window() {
        let mut s = scheduler();
        let t0 = Instant::now();
        assert_eq!(s.on_enqueue(t0), ArmDecision::Armed(t0 + ms(150)));
        assert!(!s.is_due(t0 + ms(149)));
        assert!(s.is_due(t0 + ms(150)));
    }

    #[test]
    fn test_enqueue_restarts_window() {
        let mut s = scheduler();
        let t0 = Instant::now();
        s.on_enqueue(t0);
        assert_eq!(s.on_enqueue(t0 + ms(100)), ArmDecision::Armed(t0 + ms(250)));
    }

    #[test]
    fn test_deadline_clamped_to_max_wait() {
        let mut s = scheduler();
        let t0 = Instant::now();
        s.on_enqueue(t0);
        s.on_enqueue(t0 + ms(140));
        s.on_enqueue(t0 + ms(280));
        assert_eq!(s.on_enqueue(t0 + ms(420)), ArmDecision::Armed(t0 + ms(500)));
        assert_eq!(s.on_enqueue(t0 + ms(500)), ArmDecision::FlushNow);
        assert!(s.is_due(t0 + ms(500)));
    }

    #[test]
    fn test_enqueue_during_flush_is_deferred() {
        let mut s = scheduler();
        let t0 = Instant::now();
        s.on_enqueue(t0);
        s.begin_flush();
        assert_eq!(s.on_enqueue(t0 + ms(160)), ArmDecision::Deferred);
        assert_eq!(s.deadline(), None);

        s.finish_flush(t0 + ms(170), true);
        assert_eq!(
            s.state(),
            SchedulerState::Armed {
                first_event: t0 + ms(160),
                deadline: t0 + ms(320),
            }
        );
    }

    #[test]
    fn test_finish_without_pending_goes_idle() {
        let mut s = scheduler();
        let t0 = Instant::now();
        s.on_enqueue(t0);
        s.begin_flush();
        s.finish_flush(t0 + ms(151), false);
        assert_eq!(s.state(), SchedulerState::Idle);
        assert!(!s.is_due(t0 + ms(10_000)));
    }
}
