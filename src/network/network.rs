//! Module implementing the network and its scheduler.
//!
//! Every tick of a clock executes, for the populations, connections, operations and monitors bound to it:
//! 1. the operations scheduled at [`When::Start`],
//! 2. the state update of every population,
//! 3. the operations scheduled at [`When::AfterGroups`],
//! 4. the threshold detection of every population,
//! 5. the resets of every population, presynaptic populations first,
//! 6. the operations scheduled at [`When::Middle`],
//! 7. the propagation of the spikes through every connection,
//! 8. the weight updates of plastic connections, then their trace increments, then the refractory hold of the
//!    populations,
//! 9. the operations scheduled at [`When::AfterConnections`] and then at [`When::End`],
//! 10. the monitors.
//!
//! Clocks are interleaved by the time of their next tick; clocks ticking at the same instant run by increasing order,
//! then by creation. A connection is bound to the clock of its source population.
use std::collections::HashSet;

use itertools::Itertools;
use rayon::prelude::*;

use super::graph::{ConnectionId, Graph, MonitorId, PopulationId, SimContext, Subgroup};
use super::operation::{NetworkOperation, ResetHandler};
use crate::clock::{CancelToken, Clock, ClockId, When};
use crate::config::SimConfig;
use crate::error::SimError;
use crate::monitor::Monitor;
use crate::population::{Population, PopulationBuilder};
use crate::synapses::connection::{Connection, ConnectionBuilder};

/// The outcome of a call to [`Network::run`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// The number of ticks executed, over all clocks.
    pub ticks: u64,
    /// The time of the network at the end of the run.
    pub end_time: f64,
    /// Whether the run was interrupted by its cancel token.
    pub cancelled: bool,
}

struct Operation {
    when: When,
    clock: ClockId,
    operation: Box<dyn NetworkOperation>,
}

struct MonitorEntry {
    clock: ClockId,
    monitor: Box<dyn Monitor>,
}

/// A spiking neural network: the owner of all clocks, populations, connections, operations and monitors.
pub struct Network {
    config: SimConfig,
    clocks: Vec<Clock>,
    graph: Graph,
    resets: Vec<Option<Box<dyn ResetHandler>>>,
    operations: Vec<Operation>,
    monitors: Vec<MonitorEntry>,
    reset_order: Vec<usize>,
    cancel: CancelToken,
    time: f64,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("config", &self.config)
            .field("clocks", &self.clocks)
            .field("graph", &self.graph)
            .field("num_operations", &self.operations.len())
            .field("num_monitors", &self.monitors.len())
            .field("time", &self.time)
            .finish()
    }
}

impl Default for Network {
    fn default() -> Self {
        Network {
            config: SimConfig::default(),
            clocks: vec![Clock::default()],
            graph: Graph::default(),
            resets: Vec::new(),
            operations: Vec::new(),
            monitors: Vec::new(),
            reset_order: Vec::new(),
            cancel: CancelToken::new(),
            time: 0.0,
        }
    }
}

impl Network {
    /// Create an empty network with the default configuration.
    pub fn new() -> Self {
        Network::default()
    }

    /// Create an empty network with the given configuration.
    /// Returns an error if the configuration is invalid.
    pub fn with_config(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        let clock = Clock::new(config.default_dt)?;
        Ok(Network {
            config,
            clocks: vec![clock],
            ..Network::default()
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The time reached by the previous runs; the next run starts from it.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// The clock used by populations not bound to any other clock.
    pub fn default_clock(&self) -> ClockId {
        ClockId(0)
    }

    /// Add a clock. Its first tick is the first one starting at or after the current time of the network.
    pub fn add_clock(&mut self, mut clock: Clock) -> ClockId {
        clock.align_to(self.time);
        self.clocks.push(clock);
        ClockId(self.clocks.len() - 1)
    }

    pub fn clock(&self, id: ClockId) -> Result<&Clock, SimError> {
        self.clocks
            .get(id.0)
            .ok_or_else(|| SimError::OutOfBounds(format!("Unknown clock {}", id.0)))
    }

    pub fn num_clocks(&self) -> usize {
        self.clocks.len()
    }

    /// Add a population to the network.
    /// Returns an error if its equations, threshold, reset or clock are invalid.
    pub fn add_population(&mut self, builder: PopulationBuilder) -> Result<PopulationId, SimError> {
        let clock = builder.clock_id().unwrap_or(ClockId(0));
        let dt = self.clock(clock)?.dt();
        let index = self.graph.populations.len();
        let (population, handler) = builder.build(index, clock, dt, &self.config)?;
        self.graph.populations.push(population);
        self.resets.push(handler);
        Ok(PopulationId(index))
    }

    /// The units `start..start + len` of a population, usable as source or target of connections.
    pub fn subgroup(
        &self,
        population: PopulationId,
        start: usize,
        len: usize,
    ) -> Result<Subgroup, SimError> {
        let size = self.graph.population(population)?.size();
        if start.checked_add(len).map_or(true, |end| end > size) {
            return Err(SimError::OutOfBounds(format!(
                "Subgroup of {} units starting at {} in a population with {} units",
                len, start, size
            )));
        }
        Ok(Subgroup::new(population, start, len))
    }

    /// Add a connection to the network.
    /// Returns an error if it does not fit the populations it links, or if one of its traces is already driven by
    /// another plastic connection.
    pub fn add_connection(&mut self, builder: ConnectionBuilder) -> Result<ConnectionId, SimError> {
        let index = self.graph.connections.len();
        let seed = self
            .config
            .seed
            .wrapping_add(1 << 32)
            .wrapping_add(index as u64);
        let connection = builder.build(&self.graph.populations, seed)?;

        if let Some(stdp) = connection.stdp() {
            let mut traces = self
                .graph
                .connections
                .iter()
                .filter_map(|c| c.stdp().map(|s| (c, s)))
                .flat_map(|(c, s)| {
                    [
                        (c.source(), s.pre_trace().to_string()),
                        (c.target(), s.post_trace().to_string()),
                    ]
                })
                .collect::<HashSet<(PopulationId, String)>>();
            for key in [
                (connection.source(), stdp.pre_trace().to_string()),
                (connection.target(), stdp.post_trace().to_string()),
            ] {
                if !traces.insert(key.clone()) {
                    return Err(SimError::InvalidOperation(format!(
                        "Trace {} of population {} is already driven by a plastic connection",
                        key.1,
                        key.0.index()
                    )));
                }
            }
        }

        self.graph.connections.push(connection);
        Ok(ConnectionId(index))
    }

    /// Replace the reset of a population.
    pub fn set_reset<H: ResetHandler + 'static>(
        &mut self,
        population: PopulationId,
        handler: H,
    ) -> Result<(), SimError> {
        if self.graph.population(population)?.threshold().is_none() {
            return Err(SimError::InvalidOperation(
                "A reset requires a threshold".to_string(),
            ));
        }
        self.resets[population.0] = Some(Box::new(handler));
        Ok(())
    }

    /// Execute a closure once per tick of a clock, at the given slot.
    pub fn add_operation<F>(&mut self, when: When, clock: ClockId, f: F) -> Result<(), SimError>
    where
        F: FnMut(&mut SimContext<'_>) -> Result<(), SimError> + Send + 'static,
    {
        self.add_network_operation(when, clock, f)
    }

    /// Execute an operation once per tick of a clock, at the given slot.
    /// Operations sharing a clock and a slot run in the order they were added.
    pub fn add_network_operation<O: NetworkOperation + 'static>(
        &mut self,
        when: When,
        clock: ClockId,
        operation: O,
    ) -> Result<(), SimError> {
        self.clock(clock)?;
        self.operations.push(Operation {
            when,
            clock,
            operation: Box::new(operation),
        });
        Ok(())
    }

    /// Add a monitor, sampled after every tick of the clock of its population.
    pub fn add_monitor<M: Monitor>(&mut self, monitor: M) -> Result<MonitorId, SimError> {
        monitor.validate(&self.graph)?;
        let clock = self.graph.population(monitor.population())?.clock();
        self.monitors.push(MonitorEntry {
            clock,
            monitor: Box::new(monitor),
        });
        Ok(MonitorId(self.monitors.len() - 1))
    }

    /// Returns a monitor, if it exists and has the requested type.
    pub fn monitor<M: Monitor>(&self, id: MonitorId) -> Option<&M> {
        self.monitors
            .get(id.0)
            .and_then(|entry| entry.monitor.as_any().downcast_ref::<M>())
    }

    pub fn monitor_mut<M: Monitor>(&mut self, id: MonitorId) -> Option<&mut M> {
        self.monitors
            .get_mut(id.0)
            .and_then(|entry| entry.monitor.as_any_mut().downcast_mut::<M>())
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn population(&self, id: PopulationId) -> Result<&Population, SimError> {
        self.graph.population(id)
    }

    pub fn population_mut(&mut self, id: PopulationId) -> Result<&mut Population, SimError> {
        self.graph.population_mut(id)
    }

    pub fn connection(&self, id: ConnectionId) -> Result<&Connection, SimError> {
        self.graph.connection(id)
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Result<&mut Connection, SimError> {
        self.graph.connection_mut(id)
    }

    pub fn num_populations(&self) -> usize {
        self.graph.num_populations()
    }

    pub fn num_connections(&self) -> usize {
        self.graph.num_connections()
    }

    /// A handle to interrupt the runs of the network from another thread.
    /// Once cancelled, the token must be reset before the next run.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the simulation for the given duration (in seconds), starting from the current time.
    /// Every tick starting strictly before the end of the run is executed; no partial tick is executed.
    pub fn run(&mut self, duration: f64) -> Result<RunSummary, SimError> {
        if !(duration.is_finite() && duration >= 0.0) {
            return Err(SimError::InvalidParameters(format!(
                "The duration must be non-negative and finite, got {}",
                duration
            )));
        }
        let start = self.time;
        let end = start + duration;
        log::info!(
            "Starting simulation from {} to {} ({} clocks, {} populations, {} connections)...",
            start,
            end,
            self.clocks.len(),
            self.graph.num_populations(),
            self.graph.num_connections()
        );

        self.reset_order = presynaptic_order(
            self.graph.num_populations(),
            self.graph
                .connections
                .iter()
                .map(|c| (c.source().0, c.target().0)),
        );
        for population in self.graph.populations.iter_mut() {
            let t = self.clocks[population.clock().0].time();
            population.prepare(t);
        }

        // For logging purposes
        let log_interval = duration * self.config.progress_interval;
        let mut last_log_time = start;

        let mut ticks = 0;
        let mut cancelled = false;
        while let Some(clock) = self.next_clock(end) {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.tick(clock)?;
            ticks += 1;

            let time = self.clocks[clock.0].time();
            if time - last_log_time >= log_interval && duration > 0.0 {
                log::debug!(
                    "Simulation progress: {:.2}% (Time: {:.4}/{:.4})",
                    (time - start) / duration * 100.0,
                    time,
                    end
                );
                last_log_time = time;
            }
        }

        self.time = if cancelled {
            self.clocks
                .iter()
                .map(|clock| clock.time())
                .fold(end, f64::min)
        } else {
            end
        };

        if cancelled {
            log::info!("Simulation cancelled at {}", self.time);
        } else {
            log::info!("Simulation completed successfully! ({} ticks)", ticks);
        }
        Ok(RunSummary {
            ticks,
            end_time: self.time,
            cancelled,
        })
    }

    /// The clock with the earliest next tick before `end`, if any.
    fn next_clock(&self, end: f64) -> Option<ClockId> {
        self.clocks
            .iter()
            .enumerate()
            .filter(|(_, clock)| clock.is_due_before(end))
            .min_by(|(_, a), (_, b)| a.schedule_cmp(b))
            .map(|(i, _)| ClockId(i))
    }

    /// Execute one tick of a clock.
    fn tick(&mut self, id: ClockId) -> Result<(), SimError> {
        let clock = &self.clocks[id.0];
        let (t, dt, tick) = (clock.time(), clock.dt(), clock.tick());
        log::trace!("Tick {} of clock {} at {}", tick, id.0, t);

        self.run_operations(When::Start, id, t, dt, tick)?;

        // State updates, with parallel computation if several populations share the clock
        let check_finite = self.config.check_finite;
        let on_clock = self
            .graph
            .populations
            .iter()
            .filter(|p| p.clock() == id)
            .count();
        let results = if on_clock > 1 {
            self.graph
                .populations
                .par_iter_mut()
                .filter(|p| p.clock() == id)
                .map(|p| p.integrate(t, dt, tick, check_finite))
                .collect::<Vec<Result<(), SimError>>>()
        } else {
            self.graph
                .populations
                .iter_mut()
                .filter(|p| p.clock() == id)
                .map(|p| p.integrate(t, dt, tick, check_finite))
                .collect::<Vec<Result<(), SimError>>>()
        };
        results.into_iter().collect::<Result<Vec<()>, SimError>>()?;

        self.run_operations(When::AfterGroups, id, t, dt, tick)?;

        for population in self.graph.populations.iter_mut().filter(|p| p.clock() == id) {
            population.detect(tick, dt)?;
        }

        for &k in self.reset_order.iter() {
            let population = &mut self.graph.populations[k];
            if population.clock() != id {
                continue;
            }
            population.reset(tick);
            if let Some(handler) = self.resets[k].as_mut() {
                let spikes = population.spikes().to_vec();
                if !spikes.is_empty() {
                    let mut ctx = SimContext::new(&mut self.graph, t, dt, tick, id);
                    handler.apply(PopulationId(k), &spikes, &mut ctx)?;
                }
            }
        }

        self.run_operations(When::Middle, id, t, dt, tick)?;

        let Graph {
            populations,
            connections,
        } = &mut self.graph;
        for connection in connections.iter() {
            if populations[connection.source().0].clock() == id {
                connection.propagate(populations)?;
            }
        }

        let plastic = connections
            .iter()
            .positions(|c| c.stdp().is_some() && populations[c.source().0].clock() == id)
            .collect::<Vec<usize>>();
        for &c in plastic.iter() {
            let num_clipped = connections[c].update_plastic_weights(populations)?;
            if num_clipped > 0 {
                log::debug!(
                    "Connection {}: {} weights clipped at tick {}",
                    c,
                    num_clipped,
                    tick
                );
            }
        }
        for &c in plastic.iter() {
            connections[c].increment_traces(populations)?;
        }

        // Input received by units refractory at the next tick is discarded now rather than at the next update
        for population in populations.iter_mut().filter(|p| p.clock() == id) {
            population.hold(tick + 1, t + dt);
        }

        self.run_operations(When::AfterConnections, id, t, dt, tick)?;
        self.run_operations(When::End, id, t, dt, tick)?;

        for entry in self.monitors.iter_mut().filter(|entry| entry.clock == id) {
            entry.monitor.record(&self.graph, t, dt)?;
        }

        self.clocks[id.0].advance();
        Ok(())
    }

    fn run_operations(
        &mut self,
        when: When,
        clock: ClockId,
        t: f64,
        dt: f64,
        tick: u64,
    ) -> Result<(), SimError> {
        for op in self
            .operations
            .iter_mut()
            .filter(|op| op.when == when && op.clock == clock)
        {
            let mut ctx = SimContext::new(&mut self.graph, t, dt, tick, clock);
            op.operation.call(&mut ctx)?;
        }
        Ok(())
    }
}

/// Order the populations so that the sources of connections come before their targets, ignoring self-loops.
/// Populations involved in cycles keep their insertion order, after all the others.
fn presynaptic_order<I>(num_populations: usize, edges: I) -> Vec<usize>
where
    I: IntoIterator<Item = (usize, usize)>,
{
    let edges = edges
        .into_iter()
        .filter(|(source, target)| source != target)
        .unique()
        .collect::<Vec<(usize, usize)>>();
    let mut in_degree = vec![0; num_populations];
    for &(_, target) in edges.iter() {
        in_degree[target] += 1;
    }

    let mut order = Vec::with_capacity(num_populations);
    let mut done = vec![false; num_populations];
    while let Some(k) = (0..num_populations).find(|&k| !done[k] && in_degree[k] == 0) {
        done[k] = true;
        order.push(k);
        for &(_, target) in edges.iter().filter(|(source, _)| *source == k) {
            in_degree[target] -= 1;
        }
    }
    order.extend((0..num_populations).filter(|&k| !done[k]));
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presynaptic_order() {
        assert_eq!(presynaptic_order(3, vec![]), vec![0, 1, 2]);
        assert_eq!(presynaptic_order(3, vec![(2, 0), (1, 0)]), vec![1, 2, 0]);
        assert_eq!(presynaptic_order(3, vec![(2, 1), (1, 0), (0, 0)]), vec![2, 1, 0]);
        // 1 and 2 form a cycle fed by 0
        assert_eq!(
            presynaptic_order(4, vec![(0, 1), (1, 2), (2, 1), (3, 3)]),
            vec![0, 3, 1, 2]
        );
    }

    #[test]
    fn test_with_config() {
        let config = SimConfig {
            default_dt: 1e-3,
            ..SimConfig::default()
        };
        let network = Network::with_config(config).unwrap();
        assert_eq!(network.clock(network.default_clock()).unwrap().dt(), 1e-3);
        assert_eq!(network.time(), 0.0);

        let config = SimConfig {
            default_dt: -1.0,
            ..SimConfig::default()
        };
        assert!(Network::with_config(config).is_err());
    }

    #[test]
    fn test_run_empty_network() {
        let mut network = Network::new();
        let summary = network.run(1e-3).unwrap();
        assert_eq!(summary.ticks, 10);
        assert!(!summary.cancelled);
        assert_eq!(network.time(), 1e-3);
        assert!(network.run(-1.0).is_err());
    }
}
