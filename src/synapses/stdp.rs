//! Pairwise spike-timing-dependent plasticity with bounded weights.
//!
//! Each side of a plastic connection carries a trace, an ordinary differential state variable of its population
//! (typically `dA/dt = -A / tau`) integrated like any other. When source unit `i` fires, every synapse of row `i`
//! receives the current post-synaptic trace of its target; when target unit `j` fires, every synapse of column `j`
//! receives the current pre-synaptic trace of its source. Weights are then clipped to `[w_min, w_max]` and the traces
//! of the firing units are incremented. Depression is obtained with a negative post-synaptic increment.
use serde::{Deserialize, Serialize};

use super::matrix::WeightMatrix;
use crate::error::SimError;

/// Parameters of a pairwise STDP rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stdp {
    /// The trace variable of the source population.
    pre_trace: String,
    /// The trace variable of the target population.
    post_trace: String,
    /// Added to the pre-synaptic trace of a firing source unit.
    pre_increment: f64,
    /// Added to the post-synaptic trace of a firing target unit.
    post_increment: f64,
    w_min: f64,
    w_max: f64,
}

impl Stdp {
    /// Create a STDP rule. Returns an error if the weight bounds are not ordered or not finite.
    pub fn new(
        pre_trace: &str,
        post_trace: &str,
        pre_increment: f64,
        post_increment: f64,
        lim_weights: (f64, f64),
    ) -> Result<Self, SimError> {
        let (w_min, w_max) = lim_weights;
        if !(w_min.is_finite() && w_max.is_finite() && w_min <= w_max) {
            return Err(SimError::InvalidParameters(format!(
                "Invalid weight bounds [{}, {}]",
                w_min, w_max
            )));
        }
        if !(pre_increment.is_finite() && post_increment.is_finite()) {
            return Err(SimError::InvalidParameters(
                "Trace increments must be finite".to_string(),
            ));
        }
        Ok(Stdp {
            pre_trace: pre_trace.to_string(),
            post_trace: post_trace.to_string(),
            pre_increment,
            post_increment,
            w_min,
            w_max,
        })
    }

    pub fn pre_trace(&self) -> &str {
        &self.pre_trace
    }

    pub fn post_trace(&self) -> &str {
        &self.post_trace
    }

    pub fn pre_increment(&self) -> f64 {
        self.pre_increment
    }

    pub fn post_increment(&self) -> f64 {
        self.post_increment
    }

    /// Returns `(w_min, w_max)`.
    pub fn bounds(&self) -> (f64, f64) {
        (self.w_min, self.w_max)
    }

    /// Clip a weight to the bounds. Returns the clipped weight and whether it was modified.
    pub fn clip(&self, weight: f64) -> (f64, bool) {
        if weight < self.w_min {
            (self.w_min, true)
        } else if weight > self.w_max {
            (self.w_max, true)
        } else {
            (weight, false)
        }
    }

    /// Apply the weight updates triggered by the spikes of one tick, reading the traces before any increment.
    /// Spikes and traces are in the local coordinates of the weight matrix.
    /// Returns the number of weights that had to be clipped.
    pub fn update_weights(
        &self,
        weights: &mut WeightMatrix,
        pre_spikes: &[usize],
        post_spikes: &[usize],
        pre_trace: &[f64],
        post_trace: &[f64],
    ) -> usize {
        let mut num_clipped = 0;
        for &i in pre_spikes {
            weights.update_row(i, |j, w| {
                let (w, clipped) = self.clip(w + post_trace[j]);
                num_clipped += clipped as usize;
                w
            });
        }
        for &j in post_spikes {
            weights.update_column(j, |i, w| {
                let (w, clipped) = self.clip(w + pre_trace[i]);
                num_clipped += clipped as usize;
                w
            });
        }
        num_clipped
    }
}
