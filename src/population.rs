//! Module implementing populations of homogeneous units.
//!
//! A population is a fixed-size array of units sharing one equation set, with one state column per variable.
//! Its equation set, threshold and reset are fixed at construction; only the state values may change afterwards,
//! either through the simulation or through the parameter interface between runs.
use derivative::Derivative;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::clock::ClockId;
use crate::config::SimConfig;
use crate::equations::equation_set::{EquationSet, VariableKind};
use crate::error::SimError;
use crate::integrator::Integrator;
use crate::network::operation::ResetHandler;
use crate::state::StateBuffer;
use crate::threshold::{refractory_ticks, Reset, Threshold, ValueReset};

/// A description of a population, turned into a [`Population`] when added to a network.
#[derive(Debug)]
pub struct PopulationBuilder {
    size: usize,
    equations: EquationSet,
    name: Option<String>,
    threshold: Option<Threshold>,
    reset: Option<Reset>,
    refractory: f64,
    clock: Option<ClockId>,
}

impl PopulationBuilder {
    pub fn new(size: usize, equations: EquationSet) -> Self {
        PopulationBuilder {
            size,
            equations,
            name: None,
            threshold: None,
            reset: None,
            refractory: 0.0,
            clock: None,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn threshold(mut self, threshold: Threshold) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn reset(mut self, reset: Reset) -> Self {
        self.reset = Some(reset);
        self
    }

    /// Set the refractory period (in seconds). During this period after a spike, a unit is not tested against the
    /// threshold and its reset variable (for value resets) is held at the reset value. Synaptic input to a held
    /// variable is discarded within the tick it arrives in, before monitors sample the state.
    pub fn refractory(mut self, period: f64) -> Self {
        self.refractory = period;
        self
    }

    /// Bind the population to a clock. Defaults to the default clock of the network.
    pub fn clock(mut self, clock: ClockId) -> Self {
        self.clock = Some(clock);
        self
    }

    pub(crate) fn clock_id(&self) -> Option<ClockId> {
        self.clock
    }

    /// Validate and compile the population. Custom resets are returned apart, as they are owned by the network.
    pub(crate) fn build(
        self,
        index: usize,
        clock: ClockId,
        dt: f64,
        config: &SimConfig,
    ) -> Result<(Population, Option<Box<dyn ResetHandler>>), SimError> {
        if self.size == 0 {
            return Err(SimError::InvalidParameters(
                "A population must have at least one unit".to_string(),
            ));
        }
        if !(self.refractory.is_finite() && self.refractory >= 0.0) {
            return Err(SimError::InvalidParameters(format!(
                "The refractory period must be non-negative and finite, got {}",
                self.refractory
            )));
        }
        if self.threshold.is_none() && (self.reset.is_some() || self.refractory > 0.0) {
            return Err(SimError::InvalidParameters(
                "A reset or a refractory period requires a threshold".to_string(),
            ));
        }

        let names = self
            .equations
            .equations()
            .iter()
            .map(|eq| eq.name.clone())
            .collect::<Vec<String>>();
        let mut state = StateBuffer::new(self.size, &names);
        let integrator = Integrator::new(&self.equations, &state, config.min_units_par)?;
        integrator.update_algebraic(&mut state, 0.0);

        if let Some(threshold) = &self.threshold {
            threshold.validate(&state)?;
        }
        let (value_reset, handler) = match self.reset {
            Some(Reset::Value { variable, value }) => (
                Some(ValueReset {
                    slot: state.slot_of(&variable)?,
                    value,
                }),
                None,
            ),
            Some(Reset::Custom(handler)) => (None, Some(handler)),
            None => (None, None),
        };

        let name = self.name.unwrap_or_else(|| format!("population_{}", index));
        log::debug!(
            "Population {} compiled: {} units, {} exact and {} midpoint updates",
            name,
            self.size,
            integrator.num_exact(),
            integrator.num_nonlinear()
        );

        let population = Population {
            name,
            equations: self.equations,
            state,
            integrator,
            threshold: self.threshold,
            reset: value_reset,
            refractory_ticks: refractory_ticks(self.refractory, dt),
            refractory_until: vec![0; self.size],
            spikes: Vec::new(),
            clock,
            rng: ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(index as u64)),
        };
        Ok((population, handler))
    }
}

/// A population owned by a network.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Population {
    name: String,
    equations: EquationSet,
    state: StateBuffer,
    #[derivative(Debug = "ignore")]
    integrator: Integrator,
    threshold: Option<Threshold>,
    reset: Option<ValueReset>,
    refractory_ticks: u64,
    refractory_until: Vec<u64>,
    spikes: Vec<usize>,
    clock: ClockId,
    #[derivative(Debug = "ignore")]
    rng: ChaCha8Rng,
}

impl Population {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The number of units.
    pub fn size(&self) -> usize {
        self.state.size()
    }

    pub fn clock(&self) -> ClockId {
        self.clock
    }

    pub fn equations(&self) -> &EquationSet {
        &self.equations
    }

    pub fn threshold(&self) -> Option<&Threshold> {
        self.threshold.as_ref()
    }

    pub fn state(&self) -> &StateBuffer {
        &self.state
    }

    /// Mutable access to the state, for custom resets and network operations.
    pub fn state_mut(&mut self) -> &mut StateBuffer {
        &mut self.state
    }

    /// The ascending indices of the units that fired during the last executed tick.
    pub fn spikes(&self) -> &[usize] {
        &self.spikes
    }

    /// The length of the refractory window, in ticks.
    pub fn refractory_ticks(&self) -> u64 {
        self.refractory_ticks
    }

    /// Whether unit `i` is refractory at the given tick.
    pub fn is_refractory(&self, i: usize, tick: u64) -> bool {
        self.refractory_until.get(i).map_or(false, |&until| until > tick)
    }

    /// The unit label of a variable.
    pub fn unit(&self, variable: &str) -> Option<&str> {
        self.equations.get(variable).map(|eq| eq.unit.as_str())
    }

    /// Returns the values of a variable for all units.
    pub fn get(&self, variable: &str) -> Result<&[f64], SimError> {
        self.state
            .get(variable)
            .ok_or_else(|| SimError::UnknownVariable(variable.to_string()))
    }

    /// Returns the value of a variable for one unit.
    pub fn value(&self, variable: &str, index: usize) -> Result<f64, SimError> {
        self.state.value(variable, index)
    }

    /// Assign a variable for all units, aligned with the unit ordering.
    pub fn set(&mut self, variable: &str, values: &[f64]) -> Result<(), SimError> {
        self.check_assignable(variable)?;
        self.state.set(variable, values)
    }

    /// Assign a variable for one unit.
    pub fn set_at(&mut self, variable: &str, index: usize, value: f64) -> Result<(), SimError> {
        self.check_assignable(variable)?;
        self.state.set_at(variable, index, value)
    }

    /// Assign the same value to a variable for all units.
    pub fn fill(&mut self, variable: &str, value: f64) -> Result<(), SimError> {
        self.check_assignable(variable)?;
        self.state.fill(variable, value)
    }

    /// Assign `f(i)` to a variable for every unit `i`.
    pub fn set_with<F: Fn(usize) -> f64>(&mut self, variable: &str, f: F) -> Result<(), SimError> {
        let values = (0..self.size()).map(f).collect::<Vec<f64>>();
        self.set(variable, &values)
    }

    /// Algebraic variables are always derived from the others.
    fn check_assignable(&self, variable: &str) -> Result<(), SimError> {
        match self.equations.get(variable) {
            Some(eq) if matches!(eq.kind, VariableKind::Algebraic(_)) => Err(SimError::InvalidOperation(
                format!("{} is algebraic and cannot be assigned", variable),
            )),
            Some(_) => Ok(()),
            None => Err(SimError::UnknownVariable(variable.to_string())),
        }
    }

    /// Recompute the algebraic variables, e.g., after assignments between runs.
    pub(crate) fn prepare(&mut self, t: f64) {
        self.integrator.update_algebraic(&mut self.state, t);
    }

    /// Advance the state by one tick. Refractory units have their reset variable held at the reset value.
    pub(crate) fn integrate(
        &mut self,
        t: f64,
        dt: f64,
        tick: u64,
        check_finite: bool,
    ) -> Result<(), SimError> {
        self.integrator.step(&mut self.state, t, dt);
        self.hold(tick, t + dt);

        if check_finite {
            if let Some(slot) = self.integrator.find_non_finite(&self.state) {
                return Err(SimError::NonFiniteState {
                    population: self.name.clone(),
                    variable: self.state.names()[slot].clone(),
                    tick,
                });
            }
        }
        Ok(())
    }

    /// Clamp the reset variable of the units still refractory at the given tick, then refresh the algebraic
    /// variables at time `t`.
    pub(crate) fn hold(&mut self, tick: u64, t: f64) {
        if let Some(reset) = &self.reset {
            let held = (0..self.size())
                .filter(|&i| self.refractory_until[i] > tick)
                .collect::<Vec<usize>>();
            if !held.is_empty() {
                reset.apply(&mut self.state, &held);
                self.integrator.update_algebraic(&mut self.state, t);
            }
        }
    }

    /// Collect the units crossing their threshold at the given tick.
    pub(crate) fn detect(&mut self, tick: u64, dt: f64) -> Result<(), SimError> {
        match &self.threshold {
            Some(threshold) => threshold.detect(
                &self.state,
                &self.refractory_until,
                tick,
                dt,
                &mut self.rng,
                &mut self.spikes,
            ),
            None => {
                self.spikes.clear();
                Ok(())
            }
        }
    }

    /// Apply the value reset to the units that just fired and start their refractory timers.
    pub(crate) fn reset(&mut self, tick: u64) {
        if let Some(reset) = &self.reset {
            reset.apply(&mut self.state, &self.spikes);
        }
        if self.refractory_ticks > 0 {
            for &i in self.spikes.iter() {
                self.refractory_until[i] = tick + self.refractory_ticks;
            }
        }
    }
}
