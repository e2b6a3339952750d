//! Symbolic expressions of state variables and their vectorized evaluation.
//!
//! An [`Expr`] is what an equation parser hands over to the kernel: a tree of constants, variables, the
//! simulation time and arithmetic. Before a run, expressions are compiled into [`Kernel`]s where variables are
//! resolved to column slots of a [`crate::state::StateBuffer`], so that they can be evaluated for all units of a
//! population at once.
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops;

use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Elementary functions available in expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Func {
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Tanh,
    Abs,
}

impl Func {
    /// Apply the function to a scalar.
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Func::Exp => x.exp(),
            Func::Log => x.ln(),
            Func::Sqrt => x.sqrt(),
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tanh => x.tanh(),
            Func::Abs => x.abs(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Sqrt => "sqrt",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tanh => "tanh",
            Func::Abs => "abs",
        }
    }
}

/// A symbolic expression.
///
/// Expressions are usually built with the arithmetic operators, which fold constants on the fly:
///
/// ```rust
/// use rusty_sim::equations::expr::Expr;
///
/// // dv/dt = (v0 - v) / tau
/// let rhs = (Expr::var("v0") - Expr::var("v")) / Expr::var("tau");
/// assert!(rhs.depends_on("v"));
/// assert_eq!(Expr::constant(2.0) * 3.0 + 1.0, Expr::constant(7.0));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const(f64),
    Var(String),
    /// The current simulation time.
    Time,
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Powf(Box<Expr>, f64),
    Call(Func, Box<Expr>),
}

impl Expr {
    pub fn constant(value: f64) -> Self {
        Expr::Const(value)
    }

    pub fn var(name: &str) -> Self {
        Expr::Var(name.to_string())
    }

    pub fn time() -> Self {
        Expr::Time
    }

    /// Returns the value of the expression if it is a constant.
    pub fn as_constant(&self) -> Option<f64> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }

    fn is_const(&self, value: f64) -> bool {
        self.as_constant() == Some(value)
    }

    pub fn exp(self) -> Self {
        Expr::call(Func::Exp, self)
    }

    pub fn ln(self) -> Self {
        Expr::call(Func::Log, self)
    }

    pub fn sqrt(self) -> Self {
        Expr::call(Func::Sqrt, self)
    }

    pub fn sin(self) -> Self {
        Expr::call(Func::Sin, self)
    }

    pub fn cos(self) -> Self {
        Expr::call(Func::Cos, self)
    }

    pub fn tanh(self) -> Self {
        Expr::call(Func::Tanh, self)
    }

    pub fn abs(self) -> Self {
        Expr::call(Func::Abs, self)
    }

    pub fn powf(self, exponent: f64) -> Self {
        if let Some(c) = self.as_constant() {
            Expr::Const(c.powf(exponent))
        } else if exponent == 1.0 {
            self
        } else if exponent == 0.0 {
            Expr::Const(1.0)
        } else {
            Expr::Powf(Box::new(self), exponent)
        }
    }

    fn call(func: Func, arg: Expr) -> Self {
        match arg {
            Expr::Const(c) => Expr::Const(func.apply(c)),
            _ => Expr::Call(func, Box::new(arg)),
        }
    }

    fn negation(arg: Expr) -> Self {
        match arg {
            Expr::Const(c) => Expr::Const(-c),
            Expr::Neg(inner) => *inner,
            _ => Expr::Neg(Box::new(arg)),
        }
    }

    fn sum(lhs: Expr, rhs: Expr) -> Self {
        if let (Some(a), Some(b)) = (lhs.as_constant(), rhs.as_constant()) {
            Expr::Const(a + b)
        } else if lhs.is_const(0.0) {
            rhs
        } else if rhs.is_const(0.0) {
            lhs
        } else {
            Expr::Add(Box::new(lhs), Box::new(rhs))
        }
    }

    fn difference(lhs: Expr, rhs: Expr) -> Self {
        if let (Some(a), Some(b)) = (lhs.as_constant(), rhs.as_constant()) {
            Expr::Const(a - b)
        } else if rhs.is_const(0.0) {
            lhs
        } else if lhs.is_const(0.0) {
            Expr::negation(rhs)
        } else {
            Expr::Sub(Box::new(lhs), Box::new(rhs))
        }
    }

    fn product(lhs: Expr, rhs: Expr) -> Self {
        if let (Some(a), Some(b)) = (lhs.as_constant(), rhs.as_constant()) {
            Expr::Const(a * b)
        } else if lhs.is_const(0.0) || rhs.is_const(0.0) {
            Expr::Const(0.0)
        } else if lhs.is_const(1.0) {
            rhs
        } else if rhs.is_const(1.0) {
            lhs
        } else {
            Expr::Mul(Box::new(lhs), Box::new(rhs))
        }
    }

    fn quotient(lhs: Expr, rhs: Expr) -> Self {
        if let (Some(a), Some(b)) = (lhs.as_constant(), rhs.as_constant()) {
            Expr::Const(a / b)
        } else if rhs.is_const(1.0) {
            lhs
        } else if lhs.is_const(0.0) {
            Expr::Const(0.0)
        } else {
            Expr::Div(Box::new(lhs), Box::new(rhs))
        }
    }

    /// Returns the names of all variables appearing in the expression.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Const(_) | Expr::Time => {}
            Expr::Var(name) => {
                names.insert(name.clone());
            }
            Expr::Neg(a) | Expr::Powf(a, _) | Expr::Call(_, a) => a.collect_variables(names),
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                a.collect_variables(names);
                b.collect_variables(names);
            }
        }
    }

    /// Whether the expression refers to the given variable.
    pub fn depends_on(&self, name: &str) -> bool {
        match self {
            Expr::Const(_) | Expr::Time => false,
            Expr::Var(var) => var == name,
            Expr::Neg(a) | Expr::Powf(a, _) | Expr::Call(_, a) => a.depends_on(name),
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                a.depends_on(name) || b.depends_on(name)
            }
        }
    }

    /// Replace every occurrence of a variable by another expression.
    pub fn substitute(&self, name: &str, with: &Expr) -> Expr {
        match self {
            Expr::Const(_) | Expr::Time => self.clone(),
            Expr::Var(var) if var == name => with.clone(),
            Expr::Var(_) => self.clone(),
            Expr::Neg(a) => Expr::negation(a.substitute(name, with)),
            Expr::Add(a, b) => Expr::sum(a.substitute(name, with), b.substitute(name, with)),
            Expr::Sub(a, b) => {
                Expr::difference(a.substitute(name, with), b.substitute(name, with))
            }
            Expr::Mul(a, b) => Expr::product(a.substitute(name, with), b.substitute(name, with)),
            Expr::Div(a, b) => Expr::quotient(a.substitute(name, with), b.substitute(name, with)),
            Expr::Powf(a, p) => a.substitute(name, with).powf(*p),
            Expr::Call(func, a) => Expr::call(*func, a.substitute(name, with)),
        }
    }

    /// Split the expression into `(offset, slope)` such that `self = offset + slope * name`, where neither
    /// part depends on `name`. Returns `None` if the expression is not affine in `name`.
    pub fn affine_in(&self, name: &str) -> Option<(Expr, Expr)> {
        if !self.depends_on(name) {
            return Some((self.clone(), Expr::Const(0.0)));
        }
        match self {
            Expr::Var(_) => Some((Expr::Const(0.0), Expr::Const(1.0))),
            Expr::Neg(a) => {
                let (offset, slope) = a.affine_in(name)?;
                Some((Expr::negation(offset), Expr::negation(slope)))
            }
            Expr::Add(a, b) => {
                let (offset_a, slope_a) = a.affine_in(name)?;
                let (offset_b, slope_b) = b.affine_in(name)?;
                Some((Expr::sum(offset_a, offset_b), Expr::sum(slope_a, slope_b)))
            }
            Expr::Sub(a, b) => {
                let (offset_a, slope_a) = a.affine_in(name)?;
                let (offset_b, slope_b) = b.affine_in(name)?;
                Some((
                    Expr::difference(offset_a, offset_b),
                    Expr::difference(slope_a, slope_b),
                ))
            }
            Expr::Mul(a, b) if !a.depends_on(name) => {
                let (offset, slope) = b.affine_in(name)?;
                Some((
                    Expr::product((**a).clone(), offset),
                    Expr::product((**a).clone(), slope),
                ))
            }
            Expr::Mul(a, b) if !b.depends_on(name) => {
                let (offset, slope) = a.affine_in(name)?;
                Some((
                    Expr::product(offset, (**b).clone()),
                    Expr::product(slope, (**b).clone()),
                ))
            }
            Expr::Div(a, b) if !b.depends_on(name) => {
                let (offset, slope) = a.affine_in(name)?;
                Some((
                    Expr::quotient(offset, (**b).clone()),
                    Expr::quotient(slope, (**b).clone()),
                ))
            }
            Expr::Powf(a, p) if *p == 1.0 => a.affine_in(name),
            _ => None,
        }
    }

    /// Resolve variables to column slots. Constants in `constants` are inlined.
    pub fn compile(
        &self,
        slots: &HashMap<String, usize>,
        constants: &HashMap<String, f64>,
    ) -> Result<Kernel, SimError> {
        let kernel = match self {
            Expr::Const(c) => Kernel::Const(*c),
            Expr::Time => Kernel::Time,
            Expr::Var(name) => match (slots.get(name), constants.get(name)) {
                (Some(slot), _) => Kernel::Slot(*slot),
                (None, Some(value)) => Kernel::Const(*value),
                (None, None) => return Err(SimError::UnknownVariable(name.clone())),
            },
            Expr::Neg(a) => Kernel::Neg(Box::new(a.compile(slots, constants)?)),
            Expr::Add(a, b) => Kernel::binary(BinOp::Add, a, b, slots, constants)?,
            Expr::Sub(a, b) => Kernel::binary(BinOp::Sub, a, b, slots, constants)?,
            Expr::Mul(a, b) => Kernel::binary(BinOp::Mul, a, b, slots, constants)?,
            Expr::Div(a, b) => Kernel::binary(BinOp::Div, a, b, slots, constants)?,
            Expr::Powf(a, p) => Kernel::Powf(Box::new(a.compile(slots, constants)?), *p),
            Expr::Call(func, a) => Kernel::Call(*func, Box::new(a.compile(slots, constants)?)),
        };
        Ok(kernel.folded())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{}", c),
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Time => write!(f, "t"),
            Expr::Neg(a) => write!(f, "-({})", a),
            Expr::Add(a, b) => write!(f, "({} + {})", a, b),
            Expr::Sub(a, b) => write!(f, "({} - {})", a, b),
            Expr::Mul(a, b) => write!(f, "{} * {}", a, b),
            Expr::Div(a, b) => write!(f, "{} / {}", a, b),
            Expr::Powf(a, p) => write!(f, "({})^{}", a, p),
            Expr::Call(func, a) => write!(f, "{}({})", func.name(), a),
        }
    }
}

impl ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::negation(self)
    }
}

macro_rules! impl_binary_op {
    ($op:ident, $method:ident, $build:ident) => {
        impl ops::$op<Expr> for Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                Expr::$build(self, rhs)
            }
        }

        impl ops::$op<f64> for Expr {
            type Output = Expr;

            fn $method(self, rhs: f64) -> Expr {
                Expr::$build(self, Expr::Const(rhs))
            }
        }

        impl ops::$op<Expr> for f64 {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                Expr::$build(Expr::Const(self), rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, sum);
impl_binary_op!(Sub, sub, difference);
impl_binary_op!(Mul, mul, product);
impl_binary_op!(Div, div, quotient);

/// Binary arithmetic operators of a compiled kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    #[inline]
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
        }
    }
}

/// An expression whose variables are resolved to column slots, ready for vectorized evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Kernel {
    Const(f64),
    Slot(usize),
    Time,
    Neg(Box<Kernel>),
    Binary(BinOp, Box<Kernel>, Box<Kernel>),
    Powf(Box<Kernel>, f64),
    Call(Func, Box<Kernel>),
}

impl Kernel {
    fn binary(
        op: BinOp,
        a: &Expr,
        b: &Expr,
        slots: &HashMap<String, usize>,
        constants: &HashMap<String, f64>,
    ) -> Result<Kernel, SimError> {
        Ok(Kernel::Binary(
            op,
            Box::new(a.compile(slots, constants)?),
            Box::new(b.compile(slots, constants)?),
        ))
    }

    /// Fold the constant subtrees created by inlining named constants.
    fn folded(self) -> Kernel {
        match self {
            Kernel::Neg(a) => match *a {
                Kernel::Const(c) => Kernel::Const(-c),
                a => Kernel::Neg(Box::new(a)),
            },
            Kernel::Binary(op, a, b) => match (*a, *b) {
                (Kernel::Const(x), Kernel::Const(y)) => Kernel::Const(op.apply(x, y)),
                (a, b) => Kernel::Binary(op, Box::new(a), Box::new(b)),
            },
            Kernel::Powf(a, p) => match *a {
                Kernel::Const(c) => Kernel::Const(c.powf(p)),
                a => Kernel::Powf(Box::new(a), p),
            },
            Kernel::Call(func, a) => match *a {
                Kernel::Const(c) => Kernel::Const(func.apply(c)),
                a => Kernel::Call(func, Box::new(a)),
            },
            kernel => kernel,
        }
    }

    /// Returns the value of the kernel if it does not depend on the state nor on time.
    pub fn as_constant(&self) -> Option<f64> {
        match self {
            Kernel::Const(c) => Some(*c),
            _ => None,
        }
    }

    /// Evaluate the kernel for all `n` units, reading variables from `columns`.
    pub fn eval(&self, columns: &[Vec<f64>], t: f64, n: usize) -> Vec<f64> {
        match self {
            Kernel::Const(c) => vec![*c; n],
            Kernel::Time => vec![t; n],
            Kernel::Slot(slot) => columns[*slot].clone(),
            Kernel::Neg(a) => {
                let mut values = a.eval(columns, t, n);
                values.iter_mut().for_each(|x| *x = -*x);
                values
            }
            Kernel::Powf(a, p) => {
                let mut values = a.eval(columns, t, n);
                values.iter_mut().for_each(|x| *x = x.powf(*p));
                values
            }
            Kernel::Call(func, a) => {
                let mut values = a.eval(columns, t, n);
                values.iter_mut().for_each(|x| *x = func.apply(*x));
                values
            }
            Kernel::Binary(op, a, b) => match (a.as_ref(), b.as_ref()) {
                (_, Kernel::Const(y)) => {
                    let mut values = a.eval(columns, t, n);
                    values.iter_mut().for_each(|x| *x = op.apply(*x, *y));
                    values
                }
                (Kernel::Const(x), _) => {
                    let mut values = b.eval(columns, t, n);
                    values.iter_mut().for_each(|y| *y = op.apply(*x, *y));
                    values
                }
                _ => {
                    let mut values = a.eval(columns, t, n);
                    let rhs = b.eval(columns, t, n);
                    values
                        .iter_mut()
                        .zip(rhs.iter())
                        .for_each(|(x, y)| *x = op.apply(*x, *y));
                    values
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn slots(names: &[&str]) -> HashMap<String, usize> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect()
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(Expr::constant(2.0) + 3.0, Expr::constant(5.0));
        assert_eq!(Expr::var("x") * 1.0, Expr::var("x"));
        assert_eq!(Expr::var("x") * 0.0, Expr::constant(0.0));
        assert_eq!(0.0 - Expr::var("x"), -Expr::var("x"));
        assert_eq!(-(-Expr::var("x")), Expr::var("x"));
        assert_eq!(Expr::constant(0.0).exp(), Expr::constant(1.0));
    }

    #[test]
    fn test_variables() {
        let expr = Expr::var("ge") * (Expr::var("Ee") - Expr::var("v")) + Expr::var("El");
        let names: Vec<String> = expr.variables().into_iter().collect();
        assert_eq!(names, vec!["Ee", "El", "ge", "v"]);
        assert!(expr.depends_on("ge"));
        assert!(!expr.depends_on("gi"));
    }

    #[test]
    fn test_affine_leaky() {
        // (v0 - v) / tau
        let expr = (Expr::var("v0") - Expr::var("v")) / Expr::var("tau");
        let (offset, slope) = expr.affine_in("v").unwrap();
        assert_eq!(offset, Expr::var("v0") / Expr::var("tau"));
        assert_eq!(slope, -Expr::constant(1.0) / Expr::var("tau"));
    }

    #[test]
    fn test_affine_conductance() {
        // ge * (Ee - v) + El - v is affine in v since ge does not depend on v
        let expr = Expr::var("ge") * (Expr::var("Ee") - Expr::var("v")) + Expr::var("El")
            - Expr::var("v");
        let (offset, slope) = expr.affine_in("v").unwrap();
        assert!(!offset.depends_on("v"));
        assert!(!slope.depends_on("v"));

        let constants = HashMap::from([("Ee".to_string(), 0.0), ("El".to_string(), -0.07)]);
        let slots = slots(&["v", "ge"]);
        let columns = vec![vec![-0.06, -0.05], vec![0.5, 2.0]];
        let full = expr.compile(&slots, &constants).unwrap().eval(&columns, 0.0, 2);
        let offset = offset.compile(&slots, &constants).unwrap().eval(&columns, 0.0, 2);
        let slope = slope.compile(&slots, &constants).unwrap().eval(&columns, 0.0, 2);
        for i in 0..2 {
            assert_relative_eq!(full[i], offset[i] + slope[i] * columns[0][i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_not_affine() {
        assert!((Expr::var("v") * Expr::var("v")).affine_in("v").is_none());
        assert!(Expr::var("v").exp().affine_in("v").is_none());
        assert!((Expr::constant(1.0) / Expr::var("v")).affine_in("v").is_none());
        assert!(Expr::var("v").powf(2.0).affine_in("v").is_none());
        // independent of v: trivially affine with zero slope
        let (offset, slope) = Expr::var("x").exp().affine_in("v").unwrap();
        assert_eq!(offset, Expr::var("x").exp());
        assert_eq!(slope, Expr::constant(0.0));
    }

    #[test]
    fn test_substitute() {
        let expr = (Expr::var("a") - Expr::var("x")) / Expr::var("tau");
        let substituted = expr.substitute("a", &Expr::constant(0.0));
        assert_eq!(substituted, -Expr::var("x") / Expr::var("tau"));
    }

    #[test]
    fn test_compile_unknown_variable() {
        let expr = Expr::var("v") + Expr::var("w");
        assert_eq!(
            expr.compile(&slots(&["v"]), &HashMap::new()),
            Err(SimError::UnknownVariable("w".to_string()))
        );
    }

    #[test]
    fn test_compile_inlines_constants() {
        let expr = Expr::var("a") * Expr::var("b");
        let constants = HashMap::from([("a".to_string(), 2.0), ("b".to_string(), 4.0)]);
        let kernel = expr.compile(&HashMap::new(), &constants).unwrap();
        assert_eq!(kernel.as_constant(), Some(8.0));
    }

    #[test]
    fn test_eval() {
        let expr = (Expr::var("x") * 2.0 + Expr::time()).sin().abs() - Expr::var("y").powf(2.0);
        let kernel = expr.compile(&slots(&["x", "y"]), &HashMap::new()).unwrap();
        let columns = vec![vec![0.0, 1.0, -2.0], vec![1.0, 2.0, 3.0]];
        let values = kernel.eval(&columns, 0.5, 3);
        for i in 0..3 {
            let (x, y) = (columns[0][i], columns[1][i]);
            assert_relative_eq!(values[i], (x * 2.0 + 0.5).sin().abs() - y * y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_display() {
        let expr = (Expr::var("v0") - Expr::var("v")) / Expr::var("tau");
        assert_eq!(expr.to_string(), "(v0 - v) / tau");
    }
}
