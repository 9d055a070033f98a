//! Design descriptor: factors, their levels, and the canonical cell order.
//!
//! Factors are stored in canonical order: every between-subject (whole-plot)
//! factor first, then every within-subject (sub-plot) factor, each block in
//! declaration order. Cells are the Cartesian product of the factor levels in
//! that order with the last factor varying fastest, which is the order the
//! Kronecker-product hypothesis matrices act on.
//!
//! Because between-subject factors lead, cell `c` splits into a
//! between-subject group `c / n_repeated` and a repeated-measurement slot
//! `c % n_repeated`. The covariance of the cell means is then block diagonal
//! with one contiguous block per group.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Whether a factor varies across subjects or within each subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactorKind {
    /// Whole-plot factor: each subject is observed at exactly one level.
    Between,
    /// Sub-plot factor: each subject is observed at every level.
    Within,
}

/// A single design factor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Factor {
    /// Factor name, unique within a design.
    pub name: String,
    /// Number of levels (at least 2).
    pub levels: usize,
    /// Between- or within-subject designation.
    pub kind: FactorKind,
}

impl Factor {
    /// A between-subject factor.
    pub fn between(name: impl Into<String>, levels: usize) -> Self {
        Self {
            name: name.into(),
            levels,
            kind: FactorKind::Between,
        }
    }

    /// A within-subject factor.
    pub fn within(name: impl Into<String>, levels: usize) -> Self {
        Self {
            name: name.into(),
            levels,
            kind: FactorKind::Within,
        }
    }
}

/// Immutable description of a factorial repeated-measures design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Design {
    factors: Vec<Factor>,
    n_between: usize,
}

impl Design {
    /// Build a design from factors in any order.
    ///
    /// The factors are reordered stably so that between-subject factors come
    /// first.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when there are no factors, a factor has fewer
    /// than two levels, or two factors share a name.
    pub fn new(factors: Vec<Factor>) -> Result<Self> {
        if factors.is_empty() {
            return Err(Error::config("design needs at least one factor"));
        }

        for (i, factor) in factors.iter().enumerate() {
            if factor.levels < 2 {
                return Err(Error::config(format!(
                    "factor '{}' has {} level(s); at least 2 are required",
                    factor.name, factor.levels
                )));
            }
            if factors[..i].iter().any(|f| f.name == factor.name) {
                return Err(Error::config(format!(
                    "duplicate factor name '{}'",
                    factor.name
                )));
            }
        }

        let (mut ordered, within): (Vec<Factor>, Vec<Factor>) = factors
            .into_iter()
            .partition(|f| f.kind == FactorKind::Between);
        let n_between = ordered.len();
        ordered.extend(within);

        Ok(Self {
            factors: ordered,
            n_between,
        })
    }

    /// Factors in canonical order.
    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    /// Canonical position of the factor called `name`.
    pub fn factor_index(&self, name: &str) -> Option<usize> {
        self.factors.iter().position(|f| f.name == name)
    }

    /// Level count per factor in canonical order.
    pub fn level_counts(&self) -> Vec<usize> {
        self.factors.iter().map(|f| f.levels).collect()
    }

    /// Number of between-subject factors.
    pub fn n_between_factors(&self) -> usize {
        self.n_between
    }

    /// Number of within-subject factors.
    pub fn n_within_factors(&self) -> usize {
        self.factors.len() - self.n_between
    }

    /// Number of between-subject groups (1 without between factors).
    pub fn n_groups(&self) -> usize {
        self.factors[..self.n_between].iter().map(|f| f.levels).product()
    }

    /// Repeated measurements per subject (1 without within factors).
    pub fn n_repeated(&self) -> usize {
        self.factors[self.n_between..].iter().map(|f| f.levels).product()
    }

    /// Total number of cells.
    pub fn n_cells(&self) -> usize {
        self.n_groups() * self.n_repeated()
    }

    /// Cell index for a level tuple given in canonical factor order.
    ///
    /// # Errors
    ///
    /// [`Error::Data`] when the tuple has the wrong length or a level is out
    /// of range.
    pub fn cell_index(&self, levels: &[usize]) -> Result<usize> {
        if levels.len() != self.factors.len() {
            return Err(Error::data(format!(
                "expected {} factor levels, got {}",
                self.factors.len(),
                levels.len()
            )));
        }

        let mut index = 0;
        for (factor, &level) in self.factors.iter().zip(levels) {
            if level >= factor.levels {
                return Err(Error::data(format!(
                    "level {} out of range for factor '{}' ({} levels)",
                    level, factor.name, factor.levels
                )));
            }
            index = index * factor.levels + level;
        }
        Ok(index)
    }

    /// Level tuple (canonical order) of a cell index.
    ///
    /// # Panics
    ///
    /// Panics if `cell >= self.n_cells()`.
    pub fn cell_levels(&self, cell: usize) -> Vec<usize> {
        assert!(cell < self.n_cells(), "cell index out of range");

        let mut rest = cell;
        let mut levels = vec![0; self.factors.len()];
        for (slot, factor) in levels.iter_mut().zip(&self.factors).rev() {
            *slot = rest % factor.levels;
            rest /= factor.levels;
        }
        levels
    }

    /// Split a cell into (between-subject group, repeated-measurement slot).
    pub fn split_cell(&self, cell: usize) -> (usize, usize) {
        let n_repeated = self.n_repeated();
        (cell / n_repeated, cell % n_repeated)
    }

    /// Whether every factor of `effect` is a between-subject factor.
    pub fn is_between_effect(&self, effect: &[usize]) -> bool {
        effect.iter().all(|&i| i < self.n_between)
    }
}
