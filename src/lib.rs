//! This crate provides a discrete-time simulator for spiking neural networks (SNNs) in Rust.
//!
//! Networks are made of populations of homogeneous units, each governed by a set of differential and algebraic
//! equations, linked by weighted (and possibly plastic) connections. Populations emit spikes when a threshold
//! condition holds, after which they are reset; spikes are propagated instantaneously to the target populations.
//! The simulation is driven by one or several clocks.
//!
//! # Creating Networks
//!
//! ```rust
//! use rusty_sim::equations::equation_set::EquationSet;
//! use rusty_sim::equations::expr::Expr;
//! use rusty_sim::monitor::SpikeCounter;
//! use rusty_sim::network::network::Network;
//! use rusty_sim::population::PopulationBuilder;
//! use rusty_sim::synapses::connection::Connection;
//! use rusty_sim::threshold::{Reset, Threshold};
//! use rusty_sim::units::{MS, MV};
//!
//! // dv/dt = (b - v) / tau : volt
//! let eqs = EquationSet::new()
//!     .differential("v", (Expr::var("b") - Expr::var("v")) / Expr::var("tau"), "volt")
//!     .parameter("b", "volt")
//!     .constant("tau", 10.0 * MS);
//!
//! let mut network = Network::new();
//! let input = network
//!     .add_population(
//!         PopulationBuilder::new(10, eqs.clone())
//!             .threshold(Threshold::above("v", 10.0 * MV))
//!             .reset(Reset::value("v", 0.0)),
//!     )
//!     .unwrap();
//! let output = network
//!     .add_population(
//!         PopulationBuilder::new(5, eqs)
//!             .threshold(Threshold::above("v", 10.0 * MV))
//!             .reset(Reset::value("v", 0.0))
//!             .refractory(2.0 * MS),
//!     )
//!     .unwrap();
//! network
//!     .add_connection(Connection::full(input, output, "v", 2.0 * MV))
//!     .unwrap();
//!
//! // Drive the input population above threshold
//! network.population_mut(input).unwrap().fill("b", 15.0 * MV).unwrap();
//!
//! let counter = network.add_monitor(SpikeCounter::new(output)).unwrap();
//! network.run(100.0 * MS).unwrap();
//!
//! let counter = network.monitor::<SpikeCounter>(counter).unwrap();
//! assert!(counter.total() > 0);
//! ```
//!
//! # Simulating Networks
//!
//! Every tick of a clock executes the fixed sequence of phases described in [`network::network`]: state update,
//! threshold, reset, propagation and plasticity, and monitors, with user operations in between.
//! Runs are deterministic given the seed of the [`config::SimConfig`].
//!
//! # Parameter Sweeps
//!
//! Independent runs, each owning its own network, can be distributed on a pool of workers with [`sweep`].
pub mod clock;
pub mod config;
pub mod equations;
pub mod error;
pub mod integrator;
pub mod monitor;
pub mod network;
pub mod population;
pub mod state;
pub mod sweep;
pub mod synapses;
pub mod threshold;
pub mod units;

/// Minimum number of units in a population to update its state with parallel computation.
pub const MIN_UNITS_PAR: usize = 1000;
/// The time step (in seconds) of the default clock.
pub const DEFAULT_DT: f64 = 1e-4;
/// Tolerance, relative to the time step, under which two instants are considered equal.
pub const TIME_TOLERANCE: f64 = 1e-9;
