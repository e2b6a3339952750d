//! Connections between populations: weight storage, propagation and plasticity.
pub mod connection;
pub mod matrix;
pub mod stdp;
