//! Composition of populations, connections and clocks into a runnable network.
pub mod graph;
pub mod network;
pub mod operation;
