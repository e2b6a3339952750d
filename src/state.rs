//! Storage for the state variables of a population.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Named dense columns of equal length, one per state variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateBuffer {
    size: usize,
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl StateBuffer {
    /// Create a buffer of `size` units where all variables are zero.
    pub fn new(size: usize, names: &[String]) -> Self {
        StateBuffer {
            size,
            names: names.to_vec(),
            columns: vec![vec![0.0; size]; names.len()],
        }
    }

    /// The number of units.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The names of the variables, in slot order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the slot of a variable.
    pub fn slot(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub(crate) fn slot_of(&self, name: &str) -> Result<usize, SimError> {
        self.slot(name)
            .ok_or_else(|| SimError::UnknownVariable(name.to_string()))
    }

    /// Returns the mapping from variable names to slots.
    pub fn slots(&self) -> HashMap<String, usize> {
        self.names
            .iter()
            .enumerate()
            .map(|(slot, name)| (name.clone(), slot))
            .collect()
    }

    /// Returns the values of a variable for all units.
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.slot(name).map(|slot| &self.columns[slot][..])
    }

    /// Returns the values of a variable for all units, mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut [f64]> {
        self.slot(name).map(move |slot| &mut self.columns[slot][..])
    }

    pub fn column(&self, slot: usize) -> &[f64] {
        &self.columns[slot]
    }

    pub fn column_mut(&mut self, slot: usize) -> &mut [f64] {
        &mut self.columns[slot]
    }

    /// All columns, in slot order.
    pub fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }

    pub(crate) fn columns_mut(&mut self) -> &mut [Vec<f64>] {
        &mut self.columns
    }

    /// Assign a whole variable. The values must be aligned with the units.
    pub fn set(&mut self, name: &str, values: &[f64]) -> Result<(), SimError> {
        let size = self.size;
        let slot = self.slot_of(name)?;
        if values.len() != size {
            return Err(SimError::IncompatibleShape(format!(
                "{} values given for variable {} of {} units",
                values.len(),
                name,
                size
            )));
        }
        self.columns[slot].copy_from_slice(values);
        Ok(())
    }

    /// Assign the same value to a variable for all units.
    pub fn fill(&mut self, name: &str, value: f64) -> Result<(), SimError> {
        let slot = self.slot_of(name)?;
        self.columns[slot].iter_mut().for_each(|x| *x = value);
        Ok(())
    }

    /// Assign the value of a variable for a single unit.
    pub fn set_at(&mut self, name: &str, index: usize, value: f64) -> Result<(), SimError> {
        let slot = self.slot_of(name)?;
        let size = self.size;
        let x = self.columns[slot].get_mut(index).ok_or_else(|| {
            SimError::OutOfBounds(format!("unit {} of a population of {}", index, size))
        })?;
        *x = value;
        Ok(())
    }

    /// Returns the value of a variable for a single unit.
    pub fn value(&self, name: &str, index: usize) -> Result<f64, SimError> {
        let slot = self.slot_of(name)?;
        self.columns[slot].get(index).copied().ok_or_else(|| {
            SimError::OutOfBounds(format!("unit {} of a population of {}", index, self.size))
        })
    }
}
