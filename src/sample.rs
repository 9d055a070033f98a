//! Long-format samples and their per-subject arrangement.
//!
//! A [`Sample`] is what the surrounding application hands over: one response
//! per observation, tagged with a subject identifier and a cell index from
//! the design's canonical enumeration. [`Sample::arrange`] validates it
//! against a [`Design`] and produces a [`SubjectTable`]: one
//! `subjects × repeated-measurements` matrix per between-subject group. The
//! moment estimator and every resampling perturbation work on that table.

use std::collections::BTreeMap;

use crate::design::Design;
use crate::error::{Error, Result};
use crate::types::{Matrix, Vector};

/// Raw repeated-measures observations.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    response: Vec<f64>,
    subjects: Vec<u64>,
    cells: Vec<usize>,
}

impl Sample {
    /// Create a sample from parallel vectors.
    ///
    /// # Errors
    ///
    /// [`Error::Data`] when the vectors differ in length, are empty, or the
    /// response contains a non-finite value (missing values arrive as NaN).
    pub fn new(response: Vec<f64>, subjects: Vec<u64>, cells: Vec<usize>) -> Result<Self> {
        if response.len() != subjects.len() || response.len() != cells.len() {
            return Err(Error::data(format!(
                "length mismatch: {} responses, {} subject ids, {} cell ids",
                response.len(),
                subjects.len(),
                cells.len()
            )));
        }
        if response.is_empty() {
            return Err(Error::data("sample contains no observations"));
        }
        if let Some(i) = response.iter().position(|y| !y.is_finite()) {
            return Err(Error::data(format!(
                "observation {} has missing or non-finite response {}",
                i, response[i]
            )));
        }

        Ok(Self {
            response,
            subjects,
            cells,
        })
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.response.len()
    }

    /// Always false for a constructed sample.
    pub fn is_empty(&self) -> bool {
        self.response.is_empty()
    }

    /// Response values.
    pub fn response(&self) -> &[f64] {
        &self.response
    }

    /// Arrange observations into one subject matrix per between-subject group.
    ///
    /// Subjects are ordered by identifier within each group. Replicated
    /// observations of a subject in the same cell are averaged.
    ///
    /// # Errors
    ///
    /// [`Error::Data`] when a cell index is out of range, a subject appears
    /// in more than one between-subject group, a subject misses one of the
    /// repeated measurements, or a group has fewer than two subjects.
    pub fn arrange(&self, design: &Design) -> Result<SubjectTable> {
        let n_cells = design.n_cells();
        let n_repeated = design.n_repeated();

        struct Profile {
            group: usize,
            sums: Vec<f64>,
            counts: Vec<usize>,
        }

        let mut profiles: BTreeMap<u64, Profile> = BTreeMap::new();
        for ((&y, &subject), &cell) in self.response.iter().zip(&self.subjects).zip(&self.cells) {
            if cell >= n_cells {
                return Err(Error::data(format!(
                    "cell index {} out of range (design has {} cells)",
                    cell, n_cells
                )));
            }
            let (group, slot) = design.split_cell(cell);
            let profile = profiles.entry(subject).or_insert_with(|| Profile {
                group,
                sums: vec![0.0; n_repeated],
                counts: vec![0; n_repeated],
            });
            if profile.group != group {
                return Err(Error::data(format!(
                    "subject {} appears in between-subject groups {} and {}",
                    subject, profile.group, group
                )));
            }
            profile.sums[slot] += y;
            profile.counts[slot] += 1;
        }

        let mut rows: Vec<Vec<Vec<f64>>> = vec![Vec::new(); design.n_groups()];
        for (subject, profile) in profiles {
            if let Some(slot) = profile.counts.iter().position(|&c| c == 0) {
                return Err(Error::data(format!(
                    "subject {} has no observation for repeated measurement {}",
                    subject, slot
                )));
            }
            let means = profile
                .sums
                .iter()
                .zip(&profile.counts)
                .map(|(s, &c)| s / c as f64)
                .collect();
            rows[profile.group].push(means);
        }

        let groups = rows
            .into_iter()
            .map(|subjects| {
                Matrix::from_fn(subjects.len(), n_repeated, |i, j| subjects[i][j])
            })
            .collect();

        SubjectTable::from_groups(groups)
    }
}

/// Subject-level data grouped by between-subject cell.
///
/// Group `i` is a matrix whose rows are subjects and whose columns are the
/// repeated measurements in canonical within-subject order.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectTable {
    groups: Vec<Matrix>,
}

impl SubjectTable {
    /// Build a table directly from per-group subject matrices.
    ///
    /// # Errors
    ///
    /// [`Error::Data`] when there are no groups, the groups disagree on the
    /// number of repeated measurements, a group has fewer than two subjects,
    /// or an entry is non-finite.
    pub fn from_groups(groups: Vec<Matrix>) -> Result<Self> {
        let Some(first) = groups.first() else {
            return Err(Error::data("no between-subject groups"));
        };
        let n_repeated = first.ncols();

        for (i, group) in groups.iter().enumerate() {
            if group.ncols() != n_repeated || n_repeated == 0 {
                return Err(Error::data(format!(
                    "group {} has {} repeated measurements, expected {}",
                    i,
                    group.ncols(),
                    n_repeated
                )));
            }
            if group.nrows() < 2 {
                return Err(Error::data(format!(
                    "between-subject group {} has {} subject(s); at least 2 are required",
                    i,
                    group.nrows()
                )));
            }
            if group.iter().any(|y| !y.is_finite()) {
                return Err(Error::data(format!("group {} contains non-finite values", i)));
            }
        }

        Ok(Self { groups })
    }

    /// Per-group subject matrices.
    pub fn groups(&self) -> &[Matrix] {
        &self.groups
    }

    pub(crate) fn groups_mut(&mut self) -> &mut [Matrix] {
        &mut self.groups
    }

    /// Subjects per group.
    pub fn group_sizes(&self) -> Vec<usize> {
        self.groups.iter().map(|g| g.nrows()).collect()
    }

    /// Total number of subjects.
    pub fn n_subjects(&self) -> usize {
        self.groups.iter().map(|g| g.nrows()).sum()
    }

    /// Repeated measurements per subject.
    pub fn n_repeated(&self) -> usize {
        self.groups[0].ncols()
    }

    /// Number of cells (groups × repeated measurements).
    pub fn n_cells(&self) -> usize {
        self.groups.len() * self.n_repeated()
    }

    /// Subtract each group's mean profile from its subjects.
    pub fn centered(&self) -> Self {
        let groups = self
            .groups
            .iter()
            .map(|group| {
                let mean: Vector = group.row_mean().transpose();
                let mut centered = group.clone();
                for mut row in centered.row_iter_mut() {
                    row -= mean.transpose();
                }
                centered
            })
            .collect();
        Self { groups }
    }
}
