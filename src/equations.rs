//! Equations governing the state variables of a population.
pub mod equation_set;
pub mod expr;
