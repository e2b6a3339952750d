//! Sets of equations shared by all units of a population.
use std::collections::{BTreeSet, HashMap, HashSet};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::expr::Expr;
use crate::error::SimError;

/// The role of a state variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VariableKind {
    /// `dx/dt = expr`, integrated over time.
    Differential(Expr),
    /// `x = expr`, recomputed after every state update.
    Algebraic(Expr),
    /// A per-unit constant, set from outside the simulation.
    Parameter,
}

/// A state variable with its defining equation and unit label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equation {
    pub name: String,
    pub kind: VariableKind,
    pub unit: String,
}

impl Equation {
    /// The right-hand side of the equation, if any.
    pub fn expr(&self) -> Option<&Expr> {
        match &self.kind {
            VariableKind::Differential(expr) | VariableKind::Algebraic(expr) => Some(expr),
            VariableKind::Parameter => None,
        }
    }

    pub fn is_differential(&self) -> bool {
        matches!(self.kind, VariableKind::Differential(_))
    }

    pub fn is_algebraic(&self) -> bool {
        matches!(self.kind, VariableKind::Algebraic(_))
    }
}

/// An ordered collection of equations and named scalar constants.
///
/// ```rust
/// use rusty_sim::equations::equation_set::EquationSet;
/// use rusty_sim::equations::expr::Expr;
/// use rusty_sim::units::MS;
///
/// // dv/dt = (v0 - v) / tau : volt
/// // v0 : volt
/// let eqs = EquationSet::new()
///     .differential("v", (Expr::var("v0") - Expr::var("v")) / Expr::var("tau"), "volt")
///     .parameter("v0", "volt")
///     .constant("tau", 10.0 * MS);
/// assert!(eqs.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquationSet {
    equations: Vec<Equation>,
    constants: Vec<(String, f64)>,
}

impl EquationSet {
    pub fn new() -> Self {
        EquationSet::default()
    }

    /// Add a differential equation `d<name>/dt = expr`.
    pub fn differential(mut self, name: &str, expr: Expr, unit: &str) -> Self {
        self.push(name, VariableKind::Differential(expr), unit);
        self
    }

    /// Add an algebraic equation `<name> = expr`.
    pub fn algebraic(mut self, name: &str, expr: Expr, unit: &str) -> Self {
        self.push(name, VariableKind::Algebraic(expr), unit);
        self
    }

    /// Add a per-unit parameter.
    pub fn parameter(mut self, name: &str, unit: &str) -> Self {
        self.push(name, VariableKind::Parameter, unit);
        self
    }

    /// Add a named scalar constant, inlined in every expression referring to it.
    pub fn constant(mut self, name: &str, value: f64) -> Self {
        self.constants.push((name.to_string(), value));
        self
    }

    fn push(&mut self, name: &str, kind: VariableKind, unit: &str) {
        self.equations.push(Equation {
            name: name.to_string(),
            kind,
            unit: unit.to_string(),
        });
    }

    /// Merge two equation sets, e.g., a neuron model and a synaptic current model.
    pub fn extend(mut self, other: EquationSet) -> Self {
        self.equations.extend(other.equations);
        self.constants.extend(other.constants);
        self
    }

    /// Returns the equations in declaration order.
    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    /// Returns the equation of a variable.
    pub fn get(&self, name: &str) -> Option<&Equation> {
        self.equations.iter().find(|eq| eq.name == name)
    }

    /// Returns the named constants as a map.
    pub fn constants(&self) -> HashMap<String, f64> {
        self.constants.iter().cloned().collect()
    }

    /// The number of state variables (constants excluded).
    pub fn len(&self) -> usize {
        self.equations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equations.is_empty()
    }

    /// Check the equation set: unique names, known references and no circular algebraic dependency.
    pub fn validate(&self) -> Result<(), SimError> {
        let mut seen = HashSet::new();
        for name in self
            .equations
            .iter()
            .map(|eq| &eq.name)
            .chain(self.constants.iter().map(|(name, _)| name))
        {
            if !seen.insert(name.as_str()) {
                return Err(SimError::DuplicateVariable(name.clone()));
            }
        }

        for (name, value) in self.constants.iter() {
            if !value.is_finite() {
                return Err(SimError::InvalidParameters(format!(
                    "Constant {} must be finite, got {}",
                    name, value
                )));
            }
        }

        for eq in self.equations.iter() {
            if let Some(expr) = eq.expr() {
                if let Some(unknown) = expr.variables().into_iter().find(|v| !seen.contains(v.as_str())) {
                    return Err(SimError::UnknownVariable(format!(
                        "{} (in the equation of {})",
                        unknown, eq.name
                    )));
                }
            }
        }

        self.algebraic_order().map(|_| ())
    }

    /// Returns the indices of the algebraic equations, ordered so that every variable comes after the
    /// algebraic variables it depends on.
    pub fn algebraic_order(&self) -> Result<Vec<usize>, SimError> {
        let algebraic: Vec<usize> = self
            .equations
            .iter()
            .positions(|eq| eq.is_algebraic())
            .collect();
        let deps: HashMap<usize, BTreeSet<usize>> = algebraic
            .iter()
            .map(|&i| {
                let vars = self.equations[i].expr().map(Expr::variables).unwrap_or_default();
                let deps = algebraic
                    .iter()
                    .copied()
                    .filter(|&j| vars.contains(&self.equations[j].name))
                    .collect();
                (i, deps)
            })
            .collect();

        let mut order: Vec<usize> = Vec::with_capacity(algebraic.len());
        let mut done: HashSet<usize> = HashSet::new();
        while order.len() < algebraic.len() {
            // Declaration order among the variables whose dependencies are all resolved
            let ready = algebraic
                .iter()
                .copied()
                .find(|i| !done.contains(i) && deps[i].iter().all(|j| done.contains(j)));
            match ready {
                Some(i) => {
                    done.insert(i);
                    order.push(i);
                }
                None => {
                    let cycle = algebraic
                        .iter()
                        .filter(|i| !done.contains(*i))
                        .map(|&i| self.equations[i].name.as_str())
                        .join(", ");
                    return Err(SimError::CircularDependency(format!(
                        "algebraic variables {} have no differential anchor",
                        cycle
                    )));
                }
            }
        }
        Ok(order)
    }

    /// Returns the algebraic expressions with every algebraic variable they refer to replaced by its own
    /// (inlined) expression, in dependency order.
    pub fn inlined_algebraic(&self) -> Result<Vec<(String, Expr)>, SimError> {
        let mut inlined: Vec<(String, Expr)> = Vec::new();
        for i in self.algebraic_order()? {
            let eq = &self.equations[i];
            let mut expr = eq.expr().cloned().unwrap_or(Expr::Const(0.0));
            for (name, definition) in inlined.iter() {
                expr = expr.substitute(name, definition);
            }
            inlined.push((eq.name.clone(), expr));
        }
        Ok(inlined)
    }

    /// Returns the differential expressions with all algebraic variables inlined, in declaration order.
    pub fn inlined_differentials(&self) -> Result<Vec<(String, Expr)>, SimError> {
        let algebraic = self.inlined_algebraic()?;
        Ok(self
            .equations
            .iter()
            .filter_map(|eq| match &eq.kind {
                VariableKind::Differential(expr) => {
                    let expr = algebraic
                        .iter()
                        .fold(expr.clone(), |acc, (name, def)| acc.substitute(name, def));
                    Some((eq.name.clone(), expr))
                }
                _ => None,
            })
            .collect())
    }
}
