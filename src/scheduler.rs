//! Time sources and the single-slot debounce timer shared by the form store
//! and the preview scheduler.
//!
//! Nothing here spawns threads or sleeps. A timer only records a deadline and
//! the task waiting for it; the owner polls it from its own `tick` so the whole
//! pipeline runs as one cooperative loop. Tests drive time with [`VirtualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotonic time source measured from an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
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
}

/// Manually advanced clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    elapsed_ms: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.elapsed_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms.load(Ordering::SeqCst))
    }
}

/// Holds at most one pending task and the instant it becomes due.
///
/// Scheduling again replaces both the task and the deadline, which is what
/// gives debounce semantics: only the most recent task survives and the
/// window restarts from the latest call.
pub struct DebounceTimer<T> {
    clock: Arc<dyn Clock>,
    pending: Option<(Duration, T)>,
}

impl<T> DebounceTimer<T> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            pending: None,
        }
    }

    /// Schedules `task` to become due `delay` from now, superseding any
    /// pending task. Returns the superseded task, if there was one.
    pub fn schedule(&mut self, delay: Duration, task: T) -> Option<T> {
        let deadline = self.clock.now() + delay;
        self.pending
            .replace((deadline, task))
            .map(|(_, superseded)| superseded)
    }

    /// Drops the pending task without running it and hands it back.
    pub fn cancel_pending(&mut self) -> Option<T> {
        self.pending.take().map(|(_, task)| task)
    }

    /// Takes the pending task if its deadline has been reached.
    pub fn poll(&mut self) -> Option<T> {
        match &self.pending {
            Some((deadline, _)) if self.clock.now() >= *deadline => {
                self.pending.take().map(|(_, task)| task)
            }
            _ => None,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&T> {
        self.pending.as_ref().map(|(_, task)| task)
    }

    /// Time left until the pending task is due; zero when overdue.
    pub fn remaining(&self) -> Option<Duration> {
        self.pending
            .as_ref()
            .map(|(deadline, _)| deadline.saturating_sub(self.clock.now()))
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer() -> (VirtualClock, DebounceTimer<&'static str>) {
        let clock = VirtualClock::new();
        let timer = DebounceTimer::new(Arc::new(clock.clone()));
        (clock, timer)
    }

    #[test]
    fn test_poll_before_and_after_deadline() {
        let (clock, mut timer) = timer();
        timer.schedule(Duration::from_millis(16), "flush");
        clock.advance_ms(15);
        assert_eq!(timer.poll(), None);
        clock.advance_ms(1);
        assert_eq!(timer.poll(), Some("flush"));
        assert!(!timer.has_pending());
    }

    #[test]
    fn test_schedule_resets_window_and_supersedes() {
        let (clock, mut timer) = timer();
        timer.schedule(Duration::from_millis(800), "first");
        clock.advance_ms(500);
        let superseded = timer.schedule(Duration::from_millis(800), "second");
        assert_eq!(superseded, Some("first"));
        clock.advance_ms(500);
        assert_eq!(timer.poll(), None);
        assert_eq!(timer.remaining(), Some(Duration::from_millis(300)));
        clock.advance_ms(300);
        assert_eq!(timer.poll(), Some("second"));
    }

    #[test]
    fn test_cancel_pending() {
        let (clock, mut timer) = timer();
        timer.schedule(Duration::from_millis(10), "task");
        assert_eq!(timer.cancel_pending(), Some("task"));
        clock.advance_ms(100);
        assert_eq!(timer.poll(), None);
    }

    #[test]
    fn test_virtual_clock_clones_share_time() {
        let clock = VirtualClock::new();
        let other = clock.clone();
        clock.advance_ms(42);
        assert_eq!(other.now(), Duration::from_millis(42));
    }
}
