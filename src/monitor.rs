//! Passive observers of a population, sampled after every tick of its clock.
//!
//! Monitors receive read-only access to the network: the recorded values are the post-reset, post-propagation
//! values of the tick at which they are sampled.
use std::any::Any;

use serde::Serialize;

use crate::error::SimError;
use crate::network::graph::{Graph, PopulationId};

/// A recorder bound to the clock of the population it observes.
pub trait Monitor: Any + Send {
    /// The observed population.
    fn population(&self) -> PopulationId;

    /// Check the monitor against the network it is added to.
    fn validate(&self, graph: &Graph) -> Result<(), SimError> {
        graph.population(self.population()).map(|_| ())
    }

    /// Record the state of the network after the tick starting at `t`.
    fn record(&mut self, graph: &Graph, t: f64, dt: f64) -> Result<(), SimError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Records every spike as a `(unit, time)` pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpikeMonitor {
    population: PopulationId,
    spikes: Vec<(usize, f64)>,
}

impl SpikeMonitor {
    pub fn new(population: PopulationId) -> Self {
        SpikeMonitor {
            population,
            spikes: Vec::new(),
        }
    }

    /// The recorded spikes, by time then by unit.
    pub fn spikes(&self) -> &[(usize, f64)] {
        &self.spikes
    }

    pub fn num_spikes(&self) -> usize {
        self.spikes.len()
    }

    /// The spike times of one unit.
    pub fn spike_times(&self, unit: usize) -> Vec<f64> {
        self.spikes
            .iter()
            .filter(|(i, _)| *i == unit)
            .map(|(_, t)| *t)
            .collect()
    }
}

impl Monitor for SpikeMonitor {
    fn population(&self) -> PopulationId {
        self.population
    }

    fn record(&mut self, graph: &Graph, t: f64, _dt: f64) -> Result<(), SimError> {
        let population = graph.population(self.population)?;
        self.spikes.extend(population.spikes().iter().map(|&i| (i, t)));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Counts the spikes of every unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpikeCounter {
    population: PopulationId,
    counts: Vec<u64>,
}

impl SpikeCounter {
    pub fn new(population: PopulationId) -> Self {
        SpikeCounter {
            population,
            counts: Vec::new(),
        }
    }

    /// The spike count of every unit (empty before the first tick).
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

impl Monitor for SpikeCounter {
    fn population(&self) -> PopulationId {
        self.population
    }

    fn record(&mut self, graph: &Graph, _t: f64, _dt: f64) -> Result<(), SimError> {
        let population = graph.population(self.population)?;
        self.counts.resize(population.size(), 0);
        for &i in population.spikes() {
            self.counts[i] += 1;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Records the trace of one variable for a set of units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateMonitor {
    population: PopulationId,
    variable: String,
    indices: Vec<usize>,
    times: Vec<f64>,
    values: Vec<Vec<f64>>,
}

impl StateMonitor {
    pub fn new(population: PopulationId, variable: &str, indices: &[usize]) -> Self {
        StateMonitor {
            population,
            variable: variable.to_string(),
            indices: indices.to_vec(),
            times: Vec::new(),
            values: vec![Vec::new(); indices.len()],
        }
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// The times of the recorded states, i.e., the end of the sampled ticks.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// The recorded values of a unit, aligned with the sampling times.
    pub fn trace(&self, unit: usize) -> Option<&[f64]> {
        self.indices
            .iter()
            .position(|&i| i == unit)
            .map(|k| &self.values[k][..])
    }
}

impl Monitor for StateMonitor {
    fn population(&self) -> PopulationId {
        self.population
    }

    fn validate(&self, graph: &Graph) -> Result<(), SimError> {
        let population = graph.population(self.population)?;
        population.get(&self.variable)?;
        match self.indices.iter().find(|&&i| i >= population.size()) {
            Some(i) => Err(SimError::OutOfBounds(format!(
                "Unit {} of population {} with {} units",
                i,
                population.name(),
                population.size()
            ))),
            None => Ok(()),
        }
    }

    fn record(&mut self, graph: &Graph, t: f64, dt: f64) -> Result<(), SimError> {
        let column = graph.population(self.population)?.get(&self.variable)?;
        self.times.push(t + dt);
        for (trace, &i) in self.values.iter_mut().zip(self.indices.iter()) {
            trace.push(column[i]);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Records the instantaneous firing rate of a population, i.e., the fraction of units firing during a tick divided
/// by the time step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopulationRateMonitor {
    population: PopulationId,
    dt: Option<f64>,
    times: Vec<f64>,
    rates: Vec<f64>,
}

impl PopulationRateMonitor {
    pub fn new(population: PopulationId) -> Self {
        PopulationRateMonitor {
            population,
            dt: None,
            times: Vec::new(),
            rates: Vec::new(),
        }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// The rates (in Hz), aligned with the sampling times.
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    /// The rates smoothed by a centered flat window of the given width (in seconds).
    /// Samples outside the recording are considered zero.
    pub fn smooth_rate(&self, width: f64) -> Result<Vec<f64>, SimError> {
        if !(width.is_finite() && width > 0.0) {
            return Err(SimError::InvalidParameters(format!(
                "The window width must be positive, got {}",
                width
            )));
        }
        let dt = match self.dt {
            Some(dt) => dt,
            None => return Ok(Vec::new()),
        };
        // An odd number of samples keeps the window centered
        let half = ((width / dt).round() as usize).max(1) / 2;
        let len = (2 * half + 1) as f64;
        let n = self.rates.len();
        Ok((0..n)
            .map(|k| {
                let start = k.saturating_sub(half);
                let end = (k + half + 1).min(n);
                self.rates[start..end].iter().sum::<f64>() / len
            })
            .collect())
    }
}

impl Monitor for PopulationRateMonitor {
    fn population(&self) -> PopulationId {
        self.population
    }

    fn record(&mut self, graph: &Graph, t: f64, dt: f64) -> Result<(), SimError> {
        let population = graph.population(self.population)?;
        if self.dt.is_none() {
            self.dt = Some(dt);
        }
        self.times.push(t);
        self.rates
            .push(population.spikes().len() as f64 / (population.size() as f64 * dt));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
