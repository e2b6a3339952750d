//! Error module for the Rusty Sim library.
use std::error::Error;
use std::fmt;

/// Error types for the library.
#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    /// Error for invalid parameters, e.g., a non-positive time step.
    InvalidParameters(String),
    /// Error for a reference to a variable that is not declared.
    UnknownVariable(String),
    /// Error for a variable declared twice in the same equation set.
    DuplicateVariable(String),
    /// Error for algebraic variables depending on each other in a cycle.
    CircularDependency(String),
    /// Error for arrays or matrices whose shape does not match the populations they are bound to.
    IncompatibleShape(String),
    /// Error for a write to a synapse outside the connectivity pattern.
    StructuralViolation { source: usize, target: usize },
    /// Error for a state variable that became NaN or infinite during integration.
    NonFiniteState {
        population: String,
        variable: String,
        tick: u64,
    },
    /// Error for out of bounds access, e.g., population not found.
    OutOfBounds(String),
    /// Error for invalid operation.
    InvalidOperation(String),
    /// Error raised by a user-supplied reset, operation or monitor.
    Callback(String),
    /// Error for a sweep job that could not complete.
    JobFailed(String),
    /// Error for I/O operations.
    IOError(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SimError::InvalidParameters(e) => write!(f, "Invalid parameters: {}", e),
            SimError::UnknownVariable(e) => write!(f, "Unknown variable: {}", e),
            SimError::DuplicateVariable(e) => write!(f, "Duplicate variable: {}", e),
            SimError::CircularDependency(e) => write!(f, "Circular dependency: {}", e),
            SimError::IncompatibleShape(e) => write!(f, "Incompatible shape: {}", e),
            SimError::StructuralViolation { source, target } => write!(
                f,
                "Structural violation: no synapse from {} to {} in the connectivity pattern",
                source, target
            ),
            SimError::NonFiniteState {
                population,
                variable,
                tick,
            } => write!(
                f,
                "Non-finite value of {} in population {} at tick {}",
                variable, population, tick
            ),
            SimError::OutOfBounds(e) => write!(f, "Index out of bounds: {}", e),
            SimError::InvalidOperation(e) => write!(f, "Invalid operation: {}", e),
            SimError::Callback(e) => write!(f, "Callback error: {}", e),
            SimError::JobFailed(e) => write!(f, "Job failed: {}", e),
            SimError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for SimError {}

/// A specialized result type for the library.
pub type Result<T> = std::result::Result<T, SimError>;
