//! Fit parameters.
//!
//! Parameters form an ordered set: the order in which they are added is the
//! order of the parameter vector, the residual Jacobian columns, and the rows
//! and columns of the covariance matrix.

use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// A named scalar with an initial guess and closed bounds `[min, max]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub init: f64,
    pub min: f64,
    pub max: f64,
}

impl Parameter {
    /// Validate and build a parameter.
    ///
    /// Bounds must be finite with `min < max`; the initial guess must lie in
    /// `[min, max]` (seeding exactly on a bound is allowed).
    pub fn new(name: impl Into<String>, init: f64, min: f64, max: f64) -> Result<Self, FitError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(FitError::ConfigInvalid("parameter name is empty".to_string()));
        }
        if !(init.is_finite() && min.is_finite() && max.is_finite()) {
            return Err(FitError::ConfigInvalid(format!(
                "parameter `{name}`: init_guess, min and max must be finite"
            )));
        }
        if min >= max {
            return Err(FitError::ConfigInvalid(format!(
                "parameter `{name}`: min ({min}) must be < max ({max})"
            )));
        }
        if init < min || init > max {
            return Err(FitError::ConfigInvalid(format!(
                "parameter `{name}`: init_guess ({init}) outside [{min}, {max}]"
            )));
        }
        Ok(Self { name, init, min, max })
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Insertion-ordered parameter collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    params: Vec<Parameter>,
    names: Vec<String>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter. Names must be unique.
    pub fn add(&mut self, param: Parameter) -> Result<(), FitError> {
        if self.index_of(&param.name).is_some() {
            return Err(FitError::ConfigInvalid(format!(
                "duplicate parameter `{}`",
                param.name
            )));
        }
        self.names.push(param.name.clone());
        self.params.push(param);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&Parameter> {
        self.params.get(idx)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn initial_values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.init).collect()
    }

    /// Check that `values` has one in-bounds entry per parameter.
    pub fn check_values(&self, values: &[f64]) -> Result<(), FitError> {
        if values.len() != self.params.len() {
            return Err(FitError::ModelInvalid(format!(
                "expected {} parameter values, got {}",
                self.params.len(),
                values.len()
            )));
        }
        for (p, &v) in self.params.iter().zip(values) {
            if !p.contains(v) {
                return Err(FitError::ModelInvalid(format!(
                    "parameter `{}` = {v} outside [{}, {}]",
                    p.name, p.min, p.max
                )));
            }
        }
        Ok(())
    }
}

/// Read-only name → value view handed to the ODE right-hand side.
#[derive(Debug, Clone, Copy)]
pub struct ParamMap<'a> {
    names: &'a [String],
    values: &'a [f64],
}

impl<'a> ParamMap<'a> {
    pub fn new(names: &'a [String], values: &'a [f64]) -> Self {
        debug_assert_eq!(names.len(), values.len());
        Self { names, values }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.values[idx])
    }

    /// Value by position (parameter order).
    pub fn value_at(&self, idx: usize) -> f64 {
        self.values[idx]
    }

    pub fn values(&self) -> &'a [f64] {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, f64)> + 'a {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

impl Index<&str> for ParamMap<'_> {
    type Output = f64;

    /// # Panics
    /// Panics if `name` is not a parameter of the model.
    fn index(&self, name: &str) -> &f64 {
        match self.names.iter().position(|n| n == name) {
            Some(idx) => &self.values[idx],
            None => panic!("unknown parameter `{name}`"),
        }
    }
}
