//! Module implementing weighted connections between populations.
//!
//! A connection links the spikes of a source (sub)population to one state variable of a target (sub)population.
//! When source unit `i` fires, row `i` of the weight matrix, optionally scaled by the value of a modulation variable
//! of unit `i`, is added to the target variable. Propagation is strictly additive, so several connections may share
//! a target variable.
use derivative::Derivative;
use itertools::Itertools;
use nalgebra::DMatrix;
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Binomial, Distribution};

use super::matrix::{SparseMatrix, WeightMatrix};
use super::stdp::Stdp;
use crate::error::SimError;
use crate::network::graph::{PopulationId, Subgroup};
use crate::population::Population;

/// The weight of the synapses created by a connectivity builder.
#[derive(Derivative)]
#[derivative(Debug)]
pub enum Weight {
    /// The same weight for all synapses.
    Constant(f64),
    /// A weight depending on the (local) source and target indices.
    Function(#[derivative(Debug = "ignore")] Box<dyn Fn(usize, usize) -> f64 + Send + Sync>),
}

impl Weight {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(usize, usize) -> f64 + Send + Sync + 'static,
    {
        Weight::Function(Box::new(f))
    }

    fn at(&self, i: usize, j: usize) -> f64 {
        match self {
            Weight::Constant(w) => *w,
            Weight::Function(f) => f(i, j),
        }
    }
}

impl From<f64> for Weight {
    fn from(w: f64) -> Self {
        Weight::Constant(w)
    }
}

/// The storage of the weight matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Structure {
    Dense,
    Sparse,
}

#[derive(Debug)]
enum Pattern {
    Full(Weight),
    OneToOne(Weight),
    Random { probability: f64, weight: Weight },
    Matrix(DMatrix<f64>),
    Triplets(Vec<(usize, usize, f64)>),
}

/// A contiguous range of units of a population, resolved against its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub(crate) population: PopulationId,
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

impl Span {
    pub(crate) fn resolve(subgroup: &Subgroup, size: usize) -> Result<Self, SimError> {
        let (offset, len) = subgroup.range().unwrap_or((0, size));
        if offset.checked_add(len).map_or(true, |end| end > size) {
            return Err(SimError::OutOfBounds(format!(
                "Subgroup of {} units starting at {} exceeds the size {} of population {}",
                len,
                offset,
                size,
                subgroup.population().index()
            )));
        }
        Ok(Span {
            population: subgroup.population(),
            offset,
            len,
        })
    }

    /// The local index of a unit of the population, if it belongs to the span.
    fn local(&self, i: usize) -> Option<usize> {
        i.checked_sub(self.offset).filter(|&li| li < self.len)
    }

    fn locals<'a>(&'a self, spikes: &'a [usize]) -> impl Iterator<Item = usize> + 'a {
        spikes.iter().filter_map(|&i| self.local(i))
    }
}

/// A description of a connection, turned into a [`Connection`] when added to a network.
#[derive(Debug)]
pub struct ConnectionBuilder {
    source: Subgroup,
    target: Subgroup,
    variable: String,
    pattern: Pattern,
    structure: Option<Structure>,
    modulation: Option<String>,
    self_loops: bool,
    stdp: Option<Stdp>,
    seed: Option<u64>,
}

impl ConnectionBuilder {
    fn new(source: Subgroup, target: Subgroup, variable: &str, pattern: Pattern) -> Self {
        ConnectionBuilder {
            source,
            target,
            variable: variable.to_string(),
            pattern,
            structure: None,
            modulation: None,
            self_loops: true,
            stdp: None,
            seed: None,
        }
    }

    /// Scale the propagated weights by a state variable of the source population.
    pub fn with_modulation(mut self, variable: &str) -> Self {
        self.modulation = Some(variable.to_string());
        self
    }

    /// Drop the synapses from a unit onto itself (only relevant if source and target overlap).
    pub fn without_self_loops(mut self) -> Self {
        self.self_loops = false;
        self
    }

    /// Force the storage of the weight matrix. By default, `full` and `dense` connections are dense and the others
    /// are sparse.
    pub fn with_structure(mut self, structure: Structure) -> Self {
        self.structure = Some(structure);
        self
    }

    /// Make the connection plastic.
    pub fn with_stdp(mut self, stdp: Stdp) -> Self {
        self.stdp = Some(stdp);
        self
    }

    /// Seed the random connectivity. Defaults to a seed derived from the network configuration.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn source(&self) -> &Subgroup {
        &self.source
    }

    pub fn target(&self) -> &Subgroup {
        &self.target
    }

    /// Resolve the connection against the populations of a network.
    pub(crate) fn build(
        self,
        populations: &[Population],
        default_seed: u64,
    ) -> Result<Connection, SimError> {
        let source_pop = populations
            .get(self.source.population().index())
            .ok_or_else(|| SimError::OutOfBounds("Unknown source population".to_string()))?;
        let target_pop = populations
            .get(self.target.population().index())
            .ok_or_else(|| SimError::OutOfBounds("Unknown target population".to_string()))?;
        let source = Span::resolve(&self.source, source_pop.size())?;
        let target = Span::resolve(&self.target, target_pop.size())?;

        target_pop.state().slot_of(&self.variable)?;
        if let Some(modulation) = &self.modulation {
            source_pop.state().slot_of(modulation)?;
        }
        if let Some(stdp) = &self.stdp {
            source_pop.state().slot_of(stdp.pre_trace())?;
            target_pop.state().slot_of(stdp.post_trace())?;
            if source_pop.clock() != target_pop.clock() {
                return Err(SimError::InvalidOperation(
                    "A plastic connection requires source and target on the same clock".to_string(),
                ));
            }
        }

        let is_self_loop = |i: usize, j: usize| {
            source.population == target.population && source.offset + i == target.offset + j
        };
        let keep = |i: usize, j: usize| self.self_loops || !is_self_loop(i, j);

        let (rows, cols) = (source.len, target.len);
        let (weights, default_structure) = match self.pattern {
            Pattern::Full(weight) => {
                if self.self_loops && self.structure != Some(Structure::Sparse) {
                    (
                        WeightMatrix::dense(DMatrix::from_fn(rows, cols, |i, j| weight.at(i, j))),
                        Structure::Dense,
                    )
                } else {
                    let triplets = (0..rows)
                        .cartesian_product(0..cols)
                        .filter(|&(i, j)| keep(i, j))
                        .map(|(i, j)| (i, j, weight.at(i, j)))
                        .collect();
                    (
                        WeightMatrix::Sparse(SparseMatrix::from_triplets(rows, cols, triplets)?),
                        Structure::Sparse,
                    )
                }
            }
            Pattern::OneToOne(weight) => {
                if rows != cols {
                    return Err(SimError::IncompatibleShape(format!(
                        "One-to-one connection between groups of sizes {} and {}",
                        rows, cols
                    )));
                }
                let triplets = (0..rows)
                    .filter(|&i| keep(i, i))
                    .map(|i| (i, i, weight.at(i, i)))
                    .collect();
                (
                    WeightMatrix::Sparse(SparseMatrix::from_triplets(rows, cols, triplets)?),
                    Structure::Sparse,
                )
            }
            Pattern::Random {
                probability,
                weight,
            } => {
                if !(0.0..=1.0).contains(&probability) {
                    return Err(SimError::InvalidParameters(format!(
                        "Connection probability must be in [0, 1], got {}",
                        probability
                    )));
                }
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed.unwrap_or(default_seed));
                let binomial = Binomial::new(cols as u64, probability)
                    .map_err(|e| SimError::InvalidParameters(e.to_string()))?;
                let mut triplets = Vec::new();
                for i in 0..rows {
                    let k = binomial.sample(&mut rng) as usize;
                    let targets = sample(&mut rng, cols, k).into_iter().sorted();
                    triplets.extend(
                        targets
                            .filter(|&j| keep(i, j))
                            .map(|j| (i, j, weight.at(i, j))),
                    );
                }
                (
                    WeightMatrix::Sparse(SparseMatrix::from_triplets(rows, cols, triplets)?),
                    Structure::Sparse,
                )
            }
            Pattern::Matrix(matrix) => {
                if matrix.shape() != (rows, cols) {
                    return Err(SimError::IncompatibleShape(format!(
                        "Weight matrix of shape {:?} between groups of sizes {} and {}",
                        matrix.shape(),
                        rows,
                        cols
                    )));
                }
                if self.structure == Some(Structure::Sparse) {
                    let triplets = (0..rows)
                        .cartesian_product(0..cols)
                        .filter(|&(i, j)| matrix[(i, j)] != 0.0 && keep(i, j))
                        .map(|(i, j)| (i, j, matrix[(i, j)]))
                        .collect();
                    (
                        WeightMatrix::Sparse(SparseMatrix::from_triplets(rows, cols, triplets)?),
                        Structure::Sparse,
                    )
                } else if self.self_loops {
                    (WeightMatrix::dense(matrix), Structure::Dense)
                } else {
                    let mask = DMatrix::from_fn(rows, cols, |i, j| keep(i, j));
                    (WeightMatrix::masked(matrix, mask)?, Structure::Dense)
                }
            }
            Pattern::Triplets(triplets) => {
                let triplets = triplets
                    .into_iter()
                    .filter(|&(i, j, _)| i >= rows || j >= cols || keep(i, j))
                    .collect();
                (
                    WeightMatrix::Sparse(SparseMatrix::from_triplets(rows, cols, triplets)?),
                    Structure::Sparse,
                )
            }
        };

        let weights = match (self.structure.unwrap_or(default_structure), weights) {
            (Structure::Dense, WeightMatrix::Sparse(sparse)) => WeightMatrix::densify(&sparse),
            (_, weights) => weights,
        };

        Ok(Connection {
            source,
            target,
            variable: self.variable,
            modulation: self.modulation,
            weights,
            stdp: self.stdp,
        })
    }
}

fn check_bounds(w_min: f64, w_max: f64) -> Result<(), SimError> {
    if w_min <= w_max {
        Ok(())
    } else {
        Err(SimError::InvalidParameters(format!(
            "Invalid weight bounds [{}, {}]",
            w_min, w_max
        )))
    }
}

/// A connection owned by a network.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    source: Span,
    target: Span,
    variable: String,
    modulation: Option<String>,
    weights: WeightMatrix,
    stdp: Option<Stdp>,
}

impl Connection {
    /// Connect every source unit to every target unit.
    pub fn full<S, T, W>(source: S, target: T, variable: &str, weight: W) -> ConnectionBuilder
    where
        S: Into<Subgroup>,
        T: Into<Subgroup>,
        W: Into<Weight>,
    {
        ConnectionBuilder::new(
            source.into(),
            target.into(),
            variable,
            Pattern::Full(weight.into()),
        )
    }

    /// Connect the source and target groups with an explicit (source size x target size) weight matrix.
    pub fn dense<S, T>(source: S, target: T, variable: &str, weights: DMatrix<f64>) -> ConnectionBuilder
    where
        S: Into<Subgroup>,
        T: Into<Subgroup>,
    {
        ConnectionBuilder::new(source.into(), target.into(), variable, Pattern::Matrix(weights))
    }

    /// Connect source unit `i` to target unit `i` only.
    pub fn one_to_one<S, T, W>(source: S, target: T, variable: &str, weight: W) -> ConnectionBuilder
    where
        S: Into<Subgroup>,
        T: Into<Subgroup>,
        W: Into<Weight>,
    {
        ConnectionBuilder::new(
            source.into(),
            target.into(),
            variable,
            Pattern::OneToOne(weight.into()),
        )
    }

    /// Connect every pair of units independently with the given probability.
    pub fn random<S, T, W>(
        source: S,
        target: T,
        variable: &str,
        probability: f64,
        weight: W,
    ) -> ConnectionBuilder
    where
        S: Into<Subgroup>,
        T: Into<Subgroup>,
        W: Into<Weight>,
    {
        ConnectionBuilder::new(
            source.into(),
            target.into(),
            variable,
            Pattern::Random {
                probability,
                weight: weight.into(),
            },
        )
    }

    /// Connect the source and target groups with an explicit list of `(source, target, weight)` synapses.
    pub fn from_triplets<S, T>(
        source: S,
        target: T,
        variable: &str,
        triplets: Vec<(usize, usize, f64)>,
    ) -> ConnectionBuilder
    where
        S: Into<Subgroup>,
        T: Into<Subgroup>,
    {
        ConnectionBuilder::new(source.into(), target.into(), variable, Pattern::Triplets(triplets))
    }

    /// Returns the source population.
    pub fn source(&self) -> PopulationId {
        self.source.population
    }

    /// Returns the target population.
    pub fn target(&self) -> PopulationId {
        self.target.population
    }

    /// Returns the index range `(offset, len)` of the source group within its population.
    pub fn source_range(&self) -> (usize, usize) {
        (self.source.offset, self.source.len)
    }

    /// Returns the index range `(offset, len)` of the target group within its population.
    pub fn target_range(&self) -> (usize, usize) {
        (self.target.offset, self.target.len)
    }

    /// Returns the target variable.
    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn modulation(&self) -> Option<&str> {
        self.modulation.as_deref()
    }

    pub fn stdp(&self) -> Option<&Stdp> {
        self.stdp.as_ref()
    }

    pub fn weights(&self) -> &WeightMatrix {
        &self.weights
    }

    /// The number of synapses.
    pub fn num_synapses(&self) -> usize {
        self.weights.nnz()
    }

    /// Returns the weight of the synapse from source `i` to target `j` (local indices), zero if there is none.
    pub fn weight(&self, i: usize, j: usize) -> f64 {
        self.weights.get(i, j)
    }

    /// Set the weight of the synapse from source `i` to target `j`.
    /// Returns an error if the synapse does not belong to the connectivity pattern and the weight is nonzero.
    pub fn set_weight(&mut self, i: usize, j: usize, weight: f64) -> Result<(), SimError> {
        self.weights.set(i, j, weight)
    }

    /// Apply `f(j, w)` to every existing synapse of source `i`.
    pub fn update_row<F: FnMut(usize, f64) -> f64>(&mut self, i: usize, f: F) -> Result<(), SimError> {
        let (rows, _) = self.weights.shape();
        if i >= rows {
            return Err(SimError::OutOfBounds(format!("Row {} of {}", i, rows)));
        }
        self.weights.update_row(i, f);
        Ok(())
    }

    /// Apply `f(i, w)` to every existing synapse of target `j`.
    pub fn update_column<F: FnMut(usize, f64) -> f64>(&mut self, j: usize, f: F) -> Result<(), SimError> {
        let (_, cols) = self.weights.shape();
        if j >= cols {
            return Err(SimError::OutOfBounds(format!("Column {} of {}", j, cols)));
        }
        self.weights.update_column(j, f);
        Ok(())
    }

    /// Clip the synapses of source `i` to `[w_min, w_max]`.
    pub fn clip_row(&mut self, i: usize, w_min: f64, w_max: f64) -> Result<(), SimError> {
        check_bounds(w_min, w_max)?;
        self.update_row(i, |_, w| w.clamp(w_min, w_max))
    }

    /// Clip the synapses of target `j` to `[w_min, w_max]`.
    pub fn clip_column(&mut self, j: usize, w_min: f64, w_max: f64) -> Result<(), SimError> {
        check_bounds(w_min, w_max)?;
        self.update_column(j, |_, w| w.clamp(w_min, w_max))
    }

    /// Add the weights of the firing source units to the target variable.
    pub(crate) fn propagate(&self, populations: &mut [Population]) -> Result<(), SimError> {
        let source = &populations[self.source.population.index()];
        let factors = match &self.modulation {
            Some(name) => Some(source.state().column(source.state().slot_of(name)?)),
            None => None,
        };
        let events = self
            .source
            .locals(source.spikes())
            .map(|li| {
                let factor = factors.map_or(1.0, |column| column[self.source.offset + li]);
                (li, factor)
            })
            .collect::<Vec<(usize, f64)>>();
        if events.is_empty() {
            return Ok(());
        }

        let target = &mut populations[self.target.population.index()];
        let slot = target.state().slot_of(&self.variable)?;
        let column = &mut target.state_mut().column_mut(slot)
            [self.target.offset..self.target.offset + self.target.len];
        for (li, factor) in events {
            self.weights.propagate_row(li, factor, column);
        }
        Ok(())
    }

    /// Update the weights of a plastic connection from the spikes of the current tick.
    /// Returns the number of clipped weights.
    pub(crate) fn update_plastic_weights(
        &mut self,
        populations: &[Population],
    ) -> Result<usize, SimError> {
        let stdp = match &self.stdp {
            Some(stdp) => stdp,
            None => return Ok(0),
        };
        let source = &populations[self.source.population.index()];
        let target = &populations[self.target.population.index()];
        let pre_spikes = self.source.locals(source.spikes()).collect::<Vec<usize>>();
        let post_spikes = self.target.locals(target.spikes()).collect::<Vec<usize>>();
        if pre_spikes.is_empty() && post_spikes.is_empty() {
            return Ok(0);
        }

        let pre_trace = &source.state().column(source.state().slot_of(stdp.pre_trace())?)
            [self.source.offset..self.source.offset + self.source.len];
        let post_trace = &target.state().column(target.state().slot_of(stdp.post_trace())?)
            [self.target.offset..self.target.offset + self.target.len];
        Ok(stdp.update_weights(
            &mut self.weights,
            &pre_spikes,
            &post_spikes,
            pre_trace,
            post_trace,
        ))
    }

    /// Increment the traces of the units that fired during the current tick.
    pub(crate) fn increment_traces(&self, populations: &mut [Population]) -> Result<(), SimError> {
        let stdp = match &self.stdp {
            Some(stdp) => stdp,
            None => return Ok(()),
        };
        for (span, trace, increment) in [
            (&self.source, stdp.pre_trace(), stdp.pre_increment()),
            (&self.target, stdp.post_trace(), stdp.post_increment()),
        ] {
            let population = &mut populations[span.population.index()];
            let slot = population.state().slot_of(trace)?;
            let fired = span.locals(population.spikes()).collect::<Vec<usize>>();
            let column = population.state_mut().column_mut(slot);
            for li in fired {
                column[span.offset + li] += increment;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::clock::ClockId;
    use crate::config::SimConfig;
    use crate::equations::equation_set::EquationSet;
    use crate::equations::expr::Expr;
    use crate::population::PopulationBuilder;

    fn populations(sizes: &[usize]) -> Vec<Population> {
        let eqs = EquationSet::new()
            .differential("v", -Expr::var("v") / 0.01, "volt")
            .differential("trace", -Expr::var("trace") / 0.02, "1")
            .parameter("u", "1");
        sizes
            .iter()
            .enumerate()
            .map(|(k, &size)| {
                PopulationBuilder::new(size, eqs.clone())
                    .build(k, ClockId(k % 2), 1e-4, &SimConfig::default())
                    .unwrap()
                    .0
            })
            .collect()
    }

    fn pop(k: usize) -> PopulationId {
        PopulationId(k)
    }

    #[test]
    fn test_full() {
        let pops = populations(&[3, 4]);
        let connection = Connection::full(pop(0), pop(1), "v", Weight::function(|i, j| (i * 10 + j) as f64))
            .build(&pops, 0)
            .unwrap();
        assert!(connection.weights().is_dense());
        assert_eq!(connection.weights().shape(), (3, 4));
        assert_eq!(connection.num_synapses(), 12);
        assert_eq!(connection.weight(2, 3), 23.0);
    }

    #[test]
    fn test_full_without_self_loops() {
        let pops = populations(&[4]);
        let connection = Connection::full(pop(0), pop(0), "v", 1.0)
            .without_self_loops()
            .build(&pops, 0)
            .unwrap();
        assert!(!connection.weights().is_dense());
        assert_eq!(connection.num_synapses(), 12);
        assert!((0..4).all(|i| !connection.weights().contains(i, i)));

        // self-loops are relative to the population, not to the subgroups
        let source = Subgroup::new(pop(0), 0, 2);
        let target = Subgroup::new(pop(0), 1, 3);
        let connection = Connection::full(source, target, "v", 1.0)
            .without_self_loops()
            .build(&pops, 0)
            .unwrap();
        assert_eq!(connection.num_synapses(), 5);
        assert!(!connection.weights().contains(1, 0));
    }

    #[test]
    fn test_one_to_one() {
        let pops = populations(&[3, 3, 2]);
        let connection = Connection::one_to_one(pop(0), pop(1), "v", 0.5)
            .build(&pops, 0)
            .unwrap();
        assert_eq!(connection.num_synapses(), 3);
        assert_eq!(connection.weight(1, 1), 0.5);
        assert_eq!(connection.weight(1, 2), 0.0);

        let res = Connection::one_to_one(pop(0), pop(2), "v", 0.5).build(&pops, 0);
        assert!(matches!(res, Err(SimError::IncompatibleShape(_))));
    }

    #[test]
    fn test_random() {
        let pops = populations(&[200, 300]);
        let build = |seed| {
            Connection::random(pop(0), pop(1), "v", 0.1, 1.0)
                .with_seed(seed)
                .build(&pops, 0)
                .unwrap()
        };
        let connection = build(42);
        let density = connection.num_synapses() as f64 / (200.0 * 300.0);
        assert_relative_eq!(density, 0.1, epsilon = 0.01);
        assert_eq!(connection, build(42));
        assert_ne!(connection, build(43));

        let res = Connection::random(pop(0), pop(1), "v", 1.5, 1.0).build(&pops, 0);
        assert!(matches!(res, Err(SimError::InvalidParameters(_))));
    }

    #[test]
    fn test_dense() {
        let pops = populations(&[2, 3]);
        let matrix = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 2.0, 0.0, 3.0, 0.0]);
        let connection = Connection::dense(pop(0), pop(1), "v", matrix.clone())
            .build(&pops, 0)
            .unwrap();
        assert_eq!(connection.weights().to_dense(), matrix);

        let connection = Connection::dense(pop(0), pop(1), "v", matrix.clone())
            .with_structure(Structure::Sparse)
            .build(&pops, 0)
            .unwrap();
        assert_eq!(connection.num_synapses(), 3);
        assert_eq!(connection.weights().to_dense(), matrix);

        let res = Connection::dense(pop(1), pop(0), "v", matrix).build(&pops, 0);
        assert!(matches!(res, Err(SimError::IncompatibleShape(_))));
    }

    #[test]
    fn test_dense_structure_keeps_pattern() {
        let pops = populations(&[3, 3]);
        let mut connection = Connection::one_to_one(pop(0), pop(1), "v", 0.5)
            .with_structure(Structure::Dense)
            .build(&pops, 0)
            .unwrap();
        assert!(connection.weights().is_dense());
        assert_eq!(connection.num_synapses(), 3);
        assert!(!connection.weights().contains(0, 1));
        assert_eq!(
            connection.set_weight(0, 1, 0.2),
            Err(SimError::StructuralViolation {
                source: 0,
                target: 1
            })
        );
        connection.update_row(0, |_, w| w + 1.0).unwrap();
        connection.update_column(1, |_, w| w + 1.0).unwrap();
        assert_eq!(connection.weight(0, 0), 1.5);
        assert_eq!(connection.weight(0, 1), 0.0);
        assert_eq!(connection.weight(1, 1), 1.5);

        // the diagonal of a dense matrix without self-loops is outside the pattern
        let pops = populations(&[3]);
        let mut connection = Connection::dense(pop(0), pop(0), "v", DMatrix::from_element(3, 3, 1.0))
            .without_self_loops()
            .build(&pops, 0)
            .unwrap();
        assert!(connection.weights().is_dense());
        assert_eq!(connection.num_synapses(), 6);
        assert_eq!(connection.weight(2, 2), 0.0);
        connection.update_column(2, |_, w| w + 1.0).unwrap();
        assert_eq!(connection.weight(2, 2), 0.0);
        assert_eq!(connection.weight(0, 2), 2.0);
        assert!(connection.set_weight(1, 1, 1.0).is_err());
    }

    #[test]
    fn test_subgroup_overflow() {
        let pops = populations(&[3, 3]);
        let res = Connection::full(Subgroup::new(pop(0), usize::MAX, 2), pop(1), "v", 1.0).build(&pops, 0);
        assert!(matches!(res, Err(SimError::OutOfBounds(_))));
    }

    #[test]
    fn test_invalid_connections() {
        let pops = populations(&[2, 3]);
        let res = Connection::full(pop(0), pop(1), "w", 1.0).build(&pops, 0);
        assert_eq!(res, Err(SimError::UnknownVariable("w".to_string())));

        let res = Connection::full(pop(0), pop(1), "v", 1.0)
            .with_modulation("x")
            .build(&pops, 0);
        assert_eq!(res, Err(SimError::UnknownVariable("x".to_string())));

        let res = Connection::full(pop(0), pop(5), "v", 1.0).build(&pops, 0);
        assert!(matches!(res, Err(SimError::OutOfBounds(_))));

        let res = Connection::full(Subgroup::new(pop(0), 1, 2), pop(1), "v", 1.0).build(&pops, 0);
        assert!(matches!(res, Err(SimError::OutOfBounds(_))));

        let res = Connection::from_triplets(pop(0), pop(1), "v", vec![(0, 3, 1.0)]).build(&pops, 0);
        assert!(matches!(res, Err(SimError::OutOfBounds(_))));

        // populations 0 and 1 are bound to different clocks
        let stdp = Stdp::new("trace", "trace", 0.1, -0.1, (0.0, 1.0)).unwrap();
        let res = Connection::full(pop(0), pop(1), "v", 1.0)
            .with_stdp(stdp)
            .build(&pops, 0);
        assert!(matches!(res, Err(SimError::InvalidOperation(_))));
    }

    #[test]
    fn test_weight_helpers() {
        let pops = populations(&[2, 2]);
        let mut connection =
            Connection::from_triplets(pop(0), pop(1), "v", vec![(0, 0, 1.0), (0, 1, 2.0), (1, 1, 3.0)])
                .build(&pops, 0)
                .unwrap();
        connection.update_row(0, |_, w| w * 2.0).unwrap();
        assert_eq!(connection.weight(0, 1), 4.0);
        connection.update_column(1, |_, w| w - 1.0).unwrap();
        assert_eq!(connection.weight(0, 1), 3.0);
        assert_eq!(connection.weight(1, 1), 2.0);
        connection.clip_row(0, 0.0, 2.5).unwrap();
        assert_eq!(connection.weight(0, 0), 2.0);
        assert_eq!(connection.weight(0, 1), 2.5);
        connection.clip_column(1, 0.0, 1.0).unwrap();
        assert_eq!(connection.weight(1, 1), 1.0);

        assert!(connection.set_weight(1, 1, 0.5).is_ok());
        assert!(matches!(
            connection.set_weight(1, 0, 0.5),
            Err(SimError::StructuralViolation { .. })
        ));
        assert!(connection.update_row(2, |_, w| w).is_err());
        assert!(connection.clip_row(0, 1.0, 0.0).is_err());
    }
}
