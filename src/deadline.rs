//! Monotonic deadline bookkeeping for timed I/O loops.

use std::time::{Duration, Instant};

/// A captured start instant plus a time budget.
///
/// All queries consult the monotonic clock, so wall-clock jumps cannot
/// shorten or extend a wait. `remaining` saturates at zero.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start a deadline of `budget` from now.
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    /// Re-arm the deadline from the current instant.
    pub fn restart(&mut self) { self.start = Instant::now(); }

    /// Whether the configured budget has run out.
    #[must_use]
    pub fn elapsed(&self) -> bool { self.elapsed_for(self.budget) }

    /// Whether `budget` has run out, measured from the same start instant.
    #[must_use]
    pub fn elapsed_for(&self, budget: Duration) -> bool { self.start.elapsed() >= budget }

    /// Time left in the configured budget, zero once it has run out.
    #[must_use]
    pub fn remaining(&self) -> Duration { self.remaining_for(self.budget) }

    /// Time left in `budget`, measured from the same start instant.
    #[must_use]
    pub fn remaining_for(&self, budget: Duration) -> Duration {
        budget.saturating_sub(self.start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::Deadline;

    #[test]
    fn fresh_deadline_has_its_full_budget() {
        let deadline = Deadline::new(Duration::from_secs(60));
        assert!(!deadline.elapsed());
        assert!(deadline.remaining() > Duration::from_secs(59));
    }

    #[test]
    fn zero_budget_elapses_immediately() {
        let deadline = Deadline::new(Duration::ZERO);
        assert!(deadline.elapsed());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let deadline = Deadline::new(Duration::from_millis(1));
        thread::sleep(Duration::from_millis(5));
        assert!(deadline.elapsed());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn alternate_budget_shares_the_start_instant() {
        let deadline = Deadline::new(Duration::from_millis(1));
        thread::sleep(Duration::from_millis(5));
        assert!(deadline.elapsed());
        assert!(!deadline.elapsed_for(Duration::from_secs(60)));
        assert!(deadline.remaining_for(Duration::from_secs(60)) > Duration::from_secs(59));
    }

    #[test]
    fn restart_rearms_the_budget() {
        let mut deadline = Deadline::new(Duration::from_millis(1));
        thread::sleep(Duration::from_millis(5));
        assert!(deadline.elapsed());
        deadline.restart();
        assert!(!deadline.elapsed_for(Duration::from_secs(60)));
        assert!(deadline.remaining_for(Duration::from_secs(60)) > Duration::from_secs(59));
    }
}
