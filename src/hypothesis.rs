//! Hypothesis matrices for main effects and interactions.
//!
//! Every effect of a full factorial design is encoded as a projection
//! `T = A₁ ⊗ A₂ ⊗ … ⊗ A_f` over the cell means, where `A_k` is the centering
//! matrix `P_k = I − J/k` for the factors in the effect and the identity for
//! every other factor. Kronecker products of symmetric idempotent matrices
//! are symmetric and idempotent, so each `T` is an orthogonal projection with
//! rank `∏ (k − 1)` over the participating factors.

use serde::{Deserialize, Serialize};

use crate::design::Design;
use crate::error::{Error, Result};
use crate::types::Matrix;

/// Which effects the caller wants tested.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EffectSpec {
    /// Every main effect and every interaction.
    #[default]
    Full,
    /// Main effects only; interactions are generated but left untested.
    MainEffects,
    /// Explicit list of effects, each given as the names of its factors.
    ///
    /// Must describe either all main effects or the full factorial set;
    /// partial interaction structures are rejected.
    Declared(Vec<Vec<String>>),
}

/// A named hypothesis matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    name: String,
    factors: Vec<usize>,
    matrix: Matrix,
    df: usize,
    tested: bool,
}

impl Hypothesis {
    /// Effect name, factor names joined with `:` in canonical order.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical indices of the participating factors.
    pub fn factors(&self) -> &[usize] {
        &self.factors
    }

    /// The projection matrix.
    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    /// Degrees of freedom, equal to the rank of the matrix.
    pub fn df(&self) -> usize {
        self.df
    }

    /// Whether the effect was requested by the caller.
    pub fn is_tested(&self) -> bool {
        self.tested
    }
}

/// All regenerated effects of a design, in formula order.
#[derive(Debug, Clone, PartialEq)]
pub struct HypothesisSet {
    hypotheses: Vec<Hypothesis>,
}

impl HypothesisSet {
    /// Number of regenerated effects (tested or not).
    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    /// True when the set holds no effects.
    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }

    /// Every regenerated effect.
    pub fn iter(&self) -> impl Iterator<Item = &Hypothesis> {
        self.hypotheses.iter()
    }

    /// Effects the caller asked to test.
    pub fn tested(&self) -> impl Iterator<Item = &Hypothesis> {
        self.hypotheses.iter().filter(|h| h.tested)
    }

    /// Look up an effect by name.
    pub fn get(&self, name: &str) -> Option<&Hypothesis> {
        self.hypotheses.iter().find(|h| h.name == name)
    }
}

/// Centering projection `I_k − (1/k) J_k`.
pub fn centering_matrix(k: usize) -> Matrix {
    let off = 1.0 / k as f64;
    Matrix::from_fn(k, k, |i, j| if i == j { 1.0 - off } else { -off })
}

/// Kronecker-product projection for one effect.
///
/// `levels` are the level counts in canonical order and `effect` the sorted
/// canonical indices of the factors in the effect.
pub fn effect_matrix(levels: &[usize], effect: &[usize]) -> Matrix {
    levels
        .iter()
        .enumerate()
        .map(|(i, &k)| {
            if effect.contains(&i) {
                centering_matrix(k)
            } else {
                Matrix::identity(k, k)
            }
        })
        .fold(Matrix::identity(1, 1), |acc, m| acc.kronecker(&m))
}

/// Identity hypothesis over all cells ("every cell mean is zero").
///
/// Its resampled Wald-type distribution drives simultaneous confidence
/// intervals for the cell means.
pub fn identity_hypothesis(design: &Design) -> Hypothesis {
    let n = design.n_cells();
    Hypothesis {
        name: "(cells)".to_string(),
        factors: (0..design.factors().len()).collect(),
        matrix: Matrix::identity(n, n),
        df: n,
        tested: false,
    }
}

/// Every non-empty factor subset ordered like formula terms: main effects
/// first, then two-way interactions, and so on.
fn full_factorial_effects(n_factors: usize) -> Vec<Vec<usize>> {
    let mut effects: Vec<Vec<usize>> = (1u32..(1 << n_factors))
        .map(|mask| (0..n_factors).filter(|i| mask & (1 << i) != 0).collect())
        .collect();
    effects.sort_by(|a: &Vec<usize>, b: &Vec<usize>| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    effects
}

/// Resolve a declared effect list into canonical index sets, checking that it
/// describes either the main effects or the full factorial structure.
fn resolve_declared(design: &Design, declared: &[Vec<String>]) -> Result<Vec<Vec<usize>>> {
    let n_factors = design.factors().len();
    let n_full = (1usize << n_factors) - 1;

    let mut resolved = Vec::with_capacity(declared.len());
    for names in declared {
        let mut effect = Vec::with_capacity(names.len());
        for name in names {
            let index = design
                .factor_index(name)
                .ok_or_else(|| Error::config(format!("unknown factor '{}' in effect list", name)))?;
            if effect.contains(&index) {
                return Err(Error::config(format!(
                    "factor '{}' repeated within one effect",
                    name
                )));
            }
            effect.push(index);
        }
        if effect.is_empty() {
            return Err(Error::config("empty effect in effect list"));
        }
        effect.sort_unstable();
        if resolved.contains(&effect) {
            return Err(Error::config(format!(
                "effect '{}' declared twice",
                names.join(":")
            )));
        }
        resolved.push(effect);
    }

    let main_only = resolved.iter().all(|e| e.len() == 1);
    if resolved.len() == n_factors && main_only {
        Ok(resolved)
    } else if resolved.len() == n_full {
        Ok(full_factorial_effects(n_factors))
    } else {
        Err(Error::config(format!(
            "{} effects declared for {} factors; expected {} main effects or the full factorial \
             set of {} effects (perhaps an interaction term is missing)",
            resolved.len(),
            n_factors,
            n_factors,
            n_full
        )))
    }
}

/// Build the hypothesis matrices of a design.
///
/// The full factorial structure is always regenerated; effects outside the
/// requested set are kept but marked untested.
///
/// # Errors
///
/// [`Error::Configuration`] for declared effect lists that name unknown
/// factors or describe a partial interaction structure.
pub fn build_hypothesis_matrices(design: &Design, spec: &EffectSpec) -> Result<HypothesisSet> {
    let levels = design.level_counts();
    let n_factors = levels.len();

    let requested = match spec {
        EffectSpec::Full => full_factorial_effects(n_factors),
        EffectSpec::MainEffects => (0..n_factors).map(|i| vec![i]).collect(),
        EffectSpec::Declared(declared) => resolve_declared(design, declared)?,
    };

    let hypotheses = full_factorial_effects(n_factors)
        .into_iter()
        .map(|effect| {
            let name = effect
                .iter()
                .map(|&i| design.factors()[i].name.as_str())
                .collect::<Vec<_>>()
                .join(":");
            let df = effect.iter().map(|&i| levels[i] - 1).product();
            Hypothesis {
                matrix: effect_matrix(&levels, &effect),
                tested: requested.contains(&effect),
                name,
                factors: effect,
                df,
            }
        })
        .collect();

    Ok(HypothesisSet { hypotheses })
}
