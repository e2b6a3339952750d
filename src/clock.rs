//! Clocks, scheduling slots and cancellation.
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::{DEFAULT_DT, TIME_TOLERANCE};

/// Handle of a clock owned by a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClockId(pub(crate) usize);

impl ClockId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A discrete clock with time step `dt`.
///
/// The time of the clock is always derived from its tick count, `t = tick * dt`, so that clocks never drift.
/// Clocks ticking at the same instant are scheduled by increasing `order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clock {
    dt: f64,
    order: i32,
    tick: u64,
}

impl Clock {
    /// Create a clock with the given time step (in seconds).
    /// Returns an error if the time step is not positive and finite.
    pub fn new(dt: f64) -> Result<Self, SimError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SimError::InvalidParameters(format!(
                "The time step must be positive and finite, got {}",
                dt
            )));
        }
        Ok(Clock { dt, order: 0, tick: 0 })
    }

    /// Set the priority of the clock among clocks ticking at the same instant (lower first).
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    /// The index of the next tick to execute.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The time of the next tick to execute.
    pub fn time(&self) -> f64 {
        self.tick as f64 * self.dt
    }

    /// Whether the next tick starts strictly before `end`. A tick starting at `end` is never executed.
    pub(crate) fn is_due_before(&self, end: f64) -> bool {
        self.time() < end - TIME_TOLERANCE * self.dt
    }

    /// Move the clock to its first tick starting at or after `t`.
    pub(crate) fn align_to(&mut self, t: f64) {
        self.tick = (t / self.dt - TIME_TOLERANCE).ceil().max(0.0) as u64;
    }

    pub(crate) fn advance(&mut self) {
        self.tick += 1;
    }

    /// Compare the next ticks of two clocks: earlier first, then lower order.
    /// Times closer than a fraction of the smaller time step are considered simultaneous.
    pub(crate) fn schedule_cmp(&self, other: &Clock) -> Ordering {
        let tolerance = TIME_TOLERANCE * self.dt.min(other.dt);
        let (t1, t2) = (self.time(), other.time());
        if (t1 - t2).abs() <= tolerance {
            self.order.cmp(&other.order)
        } else if t1 < t2 {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock {
            dt: DEFAULT_DT,
            order: 0,
            tick: 0,
        }
    }
}

/// The slot of a tick at which a network operation is executed.
///
/// The fixed phases of a tick are, in order: state update, threshold, reset, propagation (including plasticity)
/// and monitors. Operations are executed between them according to their slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum When {
    /// Before the state update.
    Start,
    /// After the state update, before the threshold.
    AfterGroups,
    /// After the resets, before the propagation.
    Middle,
    /// After the propagation and plasticity.
    #[default]
    AfterConnections,
    /// After all other operations, before the monitors.
    End,
}

/// A flag shared with a running network, checked between ticks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Request the run to stop before its next tick.
    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }

    /// Clear the request, allowing further runs.
    pub fn reset(&self) {
        self.0.store(false, AtomicOrdering::SeqCst);
    }
}
