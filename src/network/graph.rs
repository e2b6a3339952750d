//! The populations and connections owned by a network, and the handles used to refer to them.
//!
//! Connections, monitors and user callbacks never hold references to populations; they refer to them by handle and
//! access them through the [`Graph`] for the duration of a call.
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::clock::ClockId;
use crate::error::SimError;
use crate::population::Population;
use crate::synapses::connection::Connection;

/// Handle of a population owned by a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PopulationId(pub(crate) usize);

impl PopulationId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Handle of a connection owned by a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub(crate) usize);

impl ConnectionId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Handle of a monitor owned by a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonitorId(pub(crate) usize);

impl MonitorId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A contiguous range of units of a population, or the whole population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subgroup {
    population: PopulationId,
    range: Option<(usize, usize)>,
}

impl Subgroup {
    /// The units `start..start + len` of a population.
    pub fn new(population: PopulationId, start: usize, len: usize) -> Self {
        Subgroup {
            population,
            range: Some((start, len)),
        }
    }

    pub fn population(&self) -> PopulationId {
        self.population
    }

    /// Returns `(start, len)`, or `None` for the whole population.
    pub fn range(&self) -> Option<(usize, usize)> {
        self.range
    }
}

impl From<PopulationId> for Subgroup {
    fn from(population: PopulationId) -> Self {
        Subgroup {
            population,
            range: None,
        }
    }
}

/// The populations and connections of a network.
#[derive(Debug, Default)]
pub struct Graph {
    pub(crate) populations: Vec<Population>,
    pub(crate) connections: Vec<Connection>,
}

impl Graph {
    pub fn population(&self, id: PopulationId) -> Result<&Population, SimError> {
        self.populations
            .get(id.0)
            .ok_or_else(|| SimError::OutOfBounds(format!("Unknown population {}", id.0)))
    }

    pub fn population_mut(&mut self, id: PopulationId) -> Result<&mut Population, SimError> {
        self.populations
            .get_mut(id.0)
            .ok_or_else(|| SimError::OutOfBounds(format!("Unknown population {}", id.0)))
    }

    pub fn connection(&self, id: ConnectionId) -> Result<&Connection, SimError> {
        self.connections
            .get(id.0)
            .ok_or_else(|| SimError::OutOfBounds(format!("Unknown connection {}", id.0)))
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Result<&mut Connection, SimError> {
        self.connections
            .get_mut(id.0)
            .ok_or_else(|| SimError::OutOfBounds(format!("Unknown connection {}", id.0)))
    }

    pub fn populations(&self) -> &[Population] {
        &self.populations
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn num_populations(&self) -> usize {
        self.populations.len()
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }
}

/// The capability given to reset handlers and network operations: mutable access to every population and
/// connection of the network, and the timing of the tick being executed.
#[derive(Debug)]
pub struct SimContext<'a> {
    graph: &'a mut Graph,
    t: f64,
    dt: f64,
    tick: u64,
    clock: ClockId,
}

impl<'a> SimContext<'a> {
    pub(crate) fn new(graph: &'a mut Graph, t: f64, dt: f64, tick: u64, clock: ClockId) -> Self {
        SimContext {
            graph,
            t,
            dt,
            tick,
            clock,
        }
    }

    /// The time of the tick being executed.
    pub fn t(&self) -> f64 {
        self.t
    }

    /// The time step of the clock being executed.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// The index of the tick being executed, on its own clock.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn clock(&self) -> ClockId {
        self.clock
    }
}

impl Deref for SimContext<'_> {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        self.graph
    }
}

impl DerefMut for SimContext<'_> {
    fn deref_mut(&mut self) -> &mut Graph {
        self.graph
    }
}
