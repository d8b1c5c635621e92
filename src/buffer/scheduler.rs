use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    TimerPending { deadline: Instant },
}

/// Flush timer for one buffer.
///
/// The scheduler never touches a clock or a buffer: callers feed it the
/// current instant and act on what it answers, so it can be driven
/// deterministically.
#[derive(Debug, Clone)]
pub struct FlushScheduler {
    timeout: Duration,
    state: SchedulerState,
}

impl FlushScheduler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: SchedulerState::Idle,
        }
    }

    /// Arms the timer on the first add after idle. A pending timer keeps its
    /// original deadline.
    pub fn on_add(&mut self, now: Instant) {
        if self.state == SchedulerState::Idle {
            self.state = SchedulerState::TimerPending {
                deadline: now + self.timeout,
            };
        }
    }

    /// Returns true exactly once per armed timer, when its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            SchedulerState::TimerPending { deadline } if now >= deadline => {
                self.state = SchedulerState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Unload-class signal: the caller flushes right away, so any pending
    /// timer is cancelled unconditionally.
    pub fn on_lifecycle(&mut self) {
        self.state = SchedulerState::Idle;
    }

    /// Disarms the timer once its buffer has been emptied by another trigger.
    pub fn cancel(&mut self) {
        self.state = SchedulerState::Idle;
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            SchedulerState::TimerPending { deadline } => Some(deadline),
            SchedulerState::Idle => None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_armed_once_and_fires_once() {
        let start = Instant::now();
        let mut scheduler = FlushScheduler::new(Duration::from_secs(30));
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        scheduler.on_add(start);
        scheduler.on_add(start + Duration::from_secs(10));
        assert_eq!(scheduler.deadline(), Some(start + Duration::from_secs(30)));

        assert!(!scheduler.poll(start + Duration::from_secs(29)));
        assert!(scheduler.poll(start + Duration::from_secs(30)));
        assert!(!scheduler.poll(start + Duration::from_secs(31)));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_lifecycle_cancels_pending_timer() {
        let start = Instant::now();
        let mut scheduler = FlushScheduler::new(Duration::from_secs(5));

        scheduler.on_add(start);
        scheduler.on_lifecycle();
        assert_eq!(scheduler.deadline(), None);
        assert!(!scheduler.poll(start + Duration::from_secs(60)));

        scheduler.on_add(start + Duration::from_secs(60));
        assert_eq!(scheduler.deadline(), Some(start + Duration::from_secs(65)));
    }
}
