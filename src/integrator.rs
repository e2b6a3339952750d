//! State updates of a population over one clock tick.
//!
//! Differential equations that are affine in their own variable, `dx/dt = a + b x` with a non-zero slope `b`, are
//! advanced with the exponential midpoint method: `a` and `b` are evaluated at the midpoint of the tick and the
//! equation is then solved exactly over the whole tick, `x <- x_inf + (x - x_inf) exp(b dt)` where `x_inf = -a / b`.
//! Leaky integrators `dx/dt = (a - x) / tau` fall in this class: they are exact for constant drives and second-order
//! accurate otherwise, without any stability constraint on `dt`. All other equations, including those which do not
//! depend on their own variable, are advanced with the second-order Runge-Kutta (midpoint) method. Both methods share
//! the same midpoint state. Algebraic variables are then recomputed in dependency order, at the end of the tick.
use itertools::izip;
use rayon::prelude::*;

use crate::equations::equation_set::EquationSet;
use crate::equations::expr::Kernel;
use crate::error::SimError;
use crate::state::StateBuffer;

/// Exponential update of a variable affine in itself.
#[derive(Debug, Clone)]
struct AffineUpdate {
    slot: usize,
    offset: Kernel,
    slope: Kernel,
}

impl AffineUpdate {
    fn coefficients(&self, columns: &[Vec<f64>], t: f64, n: usize) -> (Vec<f64>, Vec<f64>) {
        (self.offset.eval(columns, t, n), self.slope.eval(columns, t, n))
    }
}

/// Compiled update rules of an equation set.
#[derive(Debug, Clone)]
pub struct Integrator {
    affine: Vec<AffineUpdate>,
    nonlinear: Vec<(usize, Kernel)>,
    algebraic: Vec<(usize, Kernel)>,
    min_units_par: usize,
}

impl Integrator {
    /// Compile the equations against the slots of a state buffer.
    /// Returns an error if the equation set is invalid.
    pub fn new(
        equations: &EquationSet,
        state: &StateBuffer,
        min_units_par: usize,
    ) -> Result<Self, SimError> {
        equations.validate()?;
        let slots = state.slots();
        let constants = equations.constants();

        let mut affine = Vec::new();
        let mut nonlinear = Vec::new();
        for (name, expr) in equations.inlined_differentials()? {
            let slot = state.slot_of(&name)?;
            let decomposition = match expr.affine_in(&name) {
                Some((offset, slope)) => Some((
                    offset.compile(&slots, &constants)?,
                    slope.compile(&slots, &constants)?,
                )),
                None => None,
            };
            match decomposition {
                Some((offset, slope)) if slope.as_constant() != Some(0.0) => {
                    affine.push(AffineUpdate {
                        slot,
                        offset,
                        slope,
                    })
                }
                _ => nonlinear.push((slot, expr.compile(&slots, &constants)?)),
            }
        }

        let algebraic = equations
            .inlined_algebraic()?
            .into_iter()
            .map(|(name, expr)| Ok((state.slot_of(&name)?, expr.compile(&slots, &constants)?)))
            .collect::<Result<Vec<_>, SimError>>()?;

        Ok(Integrator {
            affine,
            nonlinear,
            algebraic,
            min_units_par,
        })
    }

    /// The number of differential variables integrated with the exponential midpoint method.
    pub fn num_exact(&self) -> usize {
        self.affine.len()
    }

    /// The number of differential variables integrated with the midpoint method.
    pub fn num_nonlinear(&self) -> usize {
        self.nonlinear.len()
    }

    /// Advance all differential variables from `t` to `t + dt`, then recompute the algebraic variables at `t + dt`.
    pub fn step(&self, state: &mut StateBuffer, t: f64, dt: f64) {
        let n = state.size();
        if self.affine.is_empty() && self.nonlinear.is_empty() {
            self.update_algebraic(state, t + dt);
            return;
        }

        // Midpoint state, from the right-hand sides at the start of the tick
        let mut midpoint = state.columns().to_vec();
        for update in self.affine.iter() {
            let (offset, slope) = update.coefficients(state.columns(), t, n);
            for (x, a, b) in izip!(midpoint[update.slot].iter_mut(), offset.iter(), slope.iter()) {
                *x = exact_update(*x, *a, *b, 0.5 * dt);
            }
        }
        for (slot, kernel) in self.nonlinear.iter() {
            let k1 = kernel.eval(state.columns(), t, n);
            midpoint[*slot]
                .iter_mut()
                .zip(k1.iter())
                .for_each(|(x, k)| *x += 0.5 * dt * k);
        }

        // Full tick, from the right-hand sides at the midpoint
        let t_mid = t + 0.5 * dt;
        let coefficients: Vec<(Vec<f64>, Vec<f64>)> = self
            .affine
            .iter()
            .map(|update| update.coefficients(&midpoint, t_mid, n))
            .collect();
        let increments: Vec<Vec<f64>> = self
            .nonlinear
            .iter()
            .map(|(_, kernel)| kernel.eval(&midpoint, t_mid, n))
            .collect();

        let parallel = n >= self.min_units_par;
        let columns = state.columns_mut();
        for (update, (offset, slope)) in self.affine.iter().zip(coefficients.iter()) {
            let column = &mut columns[update.slot];
            if parallel {
                column
                    .par_iter_mut()
                    .zip(offset.par_iter())
                    .zip(slope.par_iter())
                    .for_each(|((x, a), b)| *x = exact_update(*x, *a, *b, dt));
            } else {
                for (x, a, b) in izip!(column.iter_mut(), offset.iter(), slope.iter()) {
                    *x = exact_update(*x, *a, *b, dt);
                }
            }
        }

        for ((slot, _), k2) in self.nonlinear.iter().zip(increments.iter()) {
            columns[*slot]
                .iter_mut()
                .zip(k2.iter())
                .for_each(|(x, k)| *x += dt * k);
        }

        self.update_algebraic(state, t + dt);
    }

    /// Recompute all algebraic variables from the current state.
    pub fn update_algebraic(&self, state: &mut StateBuffer, t: f64) {
        let n = state.size();
        for (slot, kernel) in self.algebraic.iter() {
            let values = kernel.eval(state.columns(), t, n);
            state.column_mut(*slot).copy_from_slice(&values);
        }
    }

    /// Returns the slot of the first differential or algebraic variable holding a non-finite value, if any.
    pub fn find_non_finite(&self, state: &StateBuffer) -> Option<usize> {
        self.affine
            .iter()
            .map(|update| update.slot)
            .chain(self.nonlinear.iter().map(|(slot, _)| *slot))
            .chain(self.algebraic.iter().map(|(slot, _)| *slot))
            .find(|slot| state.column(*slot).iter().any(|x| !x.is_finite()))
    }
}

/// Exact solution of `dx/dt = a + b x` after `dt`, for constant `a` and `b`.
#[inline]
fn exact_update(x: f64, a: f64, b: f64, dt: f64) -> f64 {
    if b == 0.0 {
        x + a * dt
    } else {
        let x_inf = -a / b;
        x_inf + (x - x_inf) * (b * dt).exp()
    }
}
