//! Threshold conditions, resets and refractoriness.
//!
//! After every state update, each population with a threshold produces the ascending list of indices of its units
//! satisfying the threshold condition, skipping units within their refractory window. The list is the contract
//! consumed by resets, connections and monitors of the same tick.
use derivative::Derivative;
use rand::Rng;

use crate::error::SimError;
use crate::network::graph::{PopulationId, SimContext};
use crate::network::operation::ResetHandler;
use crate::state::StateBuffer;

/// A per-unit predicate on the state of a population.
pub type UnitPredicate = Box<dyn Fn(&StateBuffer, usize) -> bool + Send + Sync>;

/// The condition under which a unit emits a spike.
#[derive(Derivative)]
#[derivative(Debug)]
pub enum Threshold {
    /// Fires when `variable >= level`.
    Above { variable: String, level: f64 },
    /// Fires when `variable >= threshold`, where `threshold` is another state variable (per-unit thresholds).
    Variable { variable: String, threshold: String },
    /// Fires with probability `rate * dt` per tick, where `rate` is a state variable (in Hz).
    Poisson { rate: String },
    /// Fires when the predicate holds.
    Custom(#[derivative(Debug = "ignore")] UnitPredicate),
}

impl Threshold {
    pub fn above(variable: &str, level: f64) -> Self {
        Threshold::Above {
            variable: variable.to_string(),
            level,
        }
    }

    pub fn variable(variable: &str, threshold: &str) -> Self {
        Threshold::Variable {
            variable: variable.to_string(),
            threshold: threshold.to_string(),
        }
    }

    pub fn poisson(rate: &str) -> Self {
        Threshold::Poisson {
            rate: rate.to_string(),
        }
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&StateBuffer, usize) -> bool + Send + Sync + 'static,
    {
        Threshold::Custom(Box::new(predicate))
    }

    /// Check that the variables the condition reads exist.
    pub(crate) fn validate(&self, state: &StateBuffer) -> Result<(), SimError> {
        match self {
            Threshold::Above { variable, level } => {
                if level.is_nan() {
                    return Err(SimError::InvalidParameters(
                        "Threshold level must not be NaN".to_string(),
                    ));
                }
                state.slot_of(variable).map(|_| ())
            }
            Threshold::Variable {
                variable,
                threshold,
            } => state
                .slot_of(variable)
                .and_then(|_| state.slot_of(threshold))
                .map(|_| ()),
            Threshold::Poisson { rate } => state.slot_of(rate).map(|_| ()),
            Threshold::Custom(_) => Ok(()),
        }
    }

    /// Collect, in ascending order, the units satisfying the condition among the non-refractory ones.
    /// A unit `i` is refractory while `refractory_until[i] > tick`.
    pub(crate) fn detect<R: Rng>(
        &self,
        state: &StateBuffer,
        refractory_until: &[u64],
        tick: u64,
        dt: f64,
        rng: &mut R,
        spikes: &mut Vec<usize>,
    ) -> Result<(), SimError> {
        spikes.clear();
        let active = |i: usize| refractory_until[i] <= tick;
        match self {
            Threshold::Above { variable, level } => {
                let values = state.column(state.slot_of(variable)?);
                spikes.extend((0..values.len()).filter(|&i| active(i) && values[i] >= *level));
            }
            Threshold::Variable {
                variable,
                threshold,
            } => {
                let values = state.column(state.slot_of(variable)?);
                let levels = state.column(state.slot_of(threshold)?);
                spikes.extend((0..values.len()).filter(|&i| active(i) && values[i] >= levels[i]));
            }
            Threshold::Poisson { rate } => {
                let rates = state.column(state.slot_of(rate)?);
                // One draw per unit and per tick keeps the random stream independent of refractoriness
                for (i, r) in rates.iter().enumerate() {
                    let u: f64 = rng.gen();
                    if u < r * dt && active(i) {
                        spikes.push(i);
                    }
                }
            }
            Threshold::Custom(predicate) => {
                spikes.extend((0..state.size()).filter(|&i| active(i) && predicate(state, i)));
            }
        }
        Ok(())
    }
}

/// The instantaneous state change applied to units that just crossed their threshold.
pub enum Reset {
    /// Set a variable to a fixed value.
    Value { variable: String, value: f64 },
    /// Delegate to a handler, which may mutate this and other populations and connections.
    Custom(Box<dyn ResetHandler>),
}

impl Reset {
    pub fn value(variable: &str, value: f64) -> Self {
        Reset::Value {
            variable: variable.to_string(),
            value,
        }
    }

    pub fn custom<H: ResetHandler + 'static>(handler: H) -> Self {
        Reset::Custom(Box::new(handler))
    }

    /// A custom reset from a closure `f(population, spikes, ctx)`.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnMut(PopulationId, &[usize], &mut SimContext<'_>) -> Result<(), SimError> + Send + 'static,
    {
        Reset::Custom(Box::new(f))
    }
}

impl std::fmt::Debug for Reset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reset::Value { variable, value } => f
                .debug_struct("Value")
                .field("variable", variable)
                .field("value", value)
                .finish(),
            Reset::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// A built-in reset, resolved against the state of its population.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ValueReset {
    pub(crate) slot: usize,
    pub(crate) value: f64,
}

impl ValueReset {
    /// Clamp the reset variable of the given units.
    pub(crate) fn apply(&self, state: &mut StateBuffer, spikes: &[usize]) {
        let column = state.column_mut(self.slot);
        for &i in spikes {
            column[i] = self.value;
        }
    }
}

/// The number of ticks of a refractory window, i.e., the smallest `R` such that `R dt >= period`.
pub fn refractory_ticks(period: f64, dt: f64) -> u64 {
    if period <= 0.0 {
        0
    } else {
        // Absorbs rounding errors when the period is a multiple of dt
        (period / dt - 1e-9).ceil().max(1.0) as u64
    }
}
