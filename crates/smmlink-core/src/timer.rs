//! Named, cancellable timers
//!
//! Devices never sleep or spawn delayed closures. They register deadlines
//! here and the runtime calls back into them once a deadline has passed,
//! so cancelling a timer (or all of them on stop) guarantees it never fires.

use std::fmt::Debug;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Timer<K> {
    kind: K,
    deadline: Instant,
    period: Option<Duration>,
}

/// A set of timers keyed by kind; at most one timer per kind is active
#[derive(Debug, Clone)]
pub struct Scheduler<K> {
    timers: Vec<Timer<K>>,
}

impl<K> Default for Scheduler<K> {
    fn default() -> Self {
        Self { timers: Vec::new() }
    }
}

impl<K: Copy + Ord + Debug> Scheduler<K> {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire once, `delay` after `from`; replaces any active timer of this kind
    pub fn start_once(&mut self, kind: K, from: Instant, delay: Duration) {
        self.insert(Timer {
            kind,
            deadline: from + delay,
            period: None,
        });
    }

    /// Fire every `period`, first at `from + period`; replaces any active
    /// timer of this kind
    pub fn start_every(&mut self, kind: K, from: Instant, period: Duration) {
        self.insert(Timer {
            kind,
            deadline: from + period,
            period: Some(period),
        });
    }

    fn insert(&mut self, timer: Timer<K>) {
        self.cancel(timer.kind);
        self.timers.push(timer);
    }

    /// Cancel one timer; returns whether it was active
    pub fn cancel(&mut self, kind: K) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.kind != kind);
        self.timers.len() != before
    }

    /// Cancel every timer
    pub fn cancel_all(&mut self) {
        self.timers.clear();
    }

    /// Whether a timer of this kind is pending
    pub fn is_active(&self, kind: K) -> bool {
        self.timers.iter().any(|t| t.kind == kind)
    }

    /// Whether no timer is pending
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.iter().map(|t| t.deadline).min()
    }

    /// Remove and return the earliest timer due at `now`, with the deadline
    /// it was due at.
    ///
    /// Recurring timers are re-armed on their own grid at the first period
    /// boundary after `now`. A timer that fell behind fires once and its
    /// missed periods are skipped.
    ///
    /// Ties are broken by kind order.
    pub fn pop_expired(&mut self, now: Instant) -> Option<(K, Instant)> {
        let index = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.deadline <= now)
            .min_by_key(|(_, t)| (t.deadline, t.kind))
            .map(|(i, _)| i)?;

        let timer = self.timers[index];
        match timer.period {
            Some(period) => {
                self.timers[index].deadline = next_after(timer.deadline, period, now);
            }
            None => {
                self.timers.swap_remove(index);
            }
        }
        Some((timer.kind, timer.deadline))
    }
}

fn next_after(deadline: Instant, period: Duration, now: Instant) -> Instant {
    let next = deadline + period;
    if next > now || period.is_zero() {
        return next;
    }
    let missed = (now - deadline).as_nanos() / period.as_nanos();
    let missed = u32::try_from(missed).unwrap_or(u32::MAX);
    deadline + period.saturating_mul(missed) + period
}
