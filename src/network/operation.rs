//! User callbacks executed by the scheduler.
//!
//! Both kinds of callbacks receive a [`SimContext`] through which they may read and mutate any population or
//! connection of the network. Errors they return abort the run and are passed to its caller unchanged.
use super::graph::{PopulationId, SimContext};
use crate::error::SimError;

/// A custom reset, applied to the units of a population that just crossed their threshold.
///
/// Handlers run after the threshold detection of their tick and before any propagation of the same tick, so that
/// weight or modulation changes they make are seen by the connections.
pub trait ResetHandler: Send {
    fn apply(
        &mut self,
        population: PopulationId,
        spikes: &[usize],
        ctx: &mut SimContext<'_>,
    ) -> Result<(), SimError>;
}

impl<F> ResetHandler for F
where
    F: FnMut(PopulationId, &[usize], &mut SimContext<'_>) -> Result<(), SimError> + Send,
{
    fn apply(
        &mut self,
        population: PopulationId,
        spikes: &[usize],
        ctx: &mut SimContext<'_>,
    ) -> Result<(), SimError> {
        self(population, spikes, ctx)
    }
}

/// An arbitrary callback executed once per tick of its clock, at a fixed slot of the tick.
pub trait NetworkOperation: Send {
    fn call(&mut self, ctx: &mut SimContext<'_>) -> Result<(), SimError>;
}

impl<F> NetworkOperation for F
where
    F: FnMut(&mut SimContext<'_>) -> Result<(), SimError> + Send,
{
    fn call(&mut self, ctx: &mut SimContext<'_>) -> Result<(), SimError> {
        self(ctx)
    }
}
