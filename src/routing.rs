//! Tsallis-entropy routing over the probability simplex
//!
//! Turns per-expert utility scores into a sparse routing distribution that
//! approximates the Nash equilibrium strategy of the selector in a zero-sum
//! routing game regularized by Tsallis entropy.
//!
//! With `s_i = u_i / temperature` and exponent `e = 1 / (q − 1)`:
//!
//! ```text
//! p_i(τ) = max(0, s_i − τ)^e        with τ chosen so that Σ p_i(τ) = 1
//! ```
//!
//! `Σ p_i(τ)` is continuous and non-increasing in τ, so τ is found by
//! bisection. As `q → 1` the projection degenerates and plain softmax is used.
//!
//! - q → 1: dense, softmax-like
//! - q = 2: sparsemax
//! - q > 2: increasingly sparse
//!
//! Rows of a batch are independent; [`route_batch`] fans them out with rayon.

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;

use crate::errors::{FallbackReason, Result, RouterError};
use crate::model_config::{FallbackStrategy, RouterConfig};

/// How the threshold for one row was obtained
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdSolution {
    /// `q ≈ 1`: routed with softmax, no threshold involved
    Softmax,
    /// Bisection met the tolerance at `tau`
    Converged { tau: f64, iterations: usize },
    /// Bisection failed; the configured fallback distribution was returned
    FallbackUsed { reason: FallbackReason },
}

impl ThresholdSolution {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ThresholdSolution::FallbackUsed { .. })
    }

    pub fn tau(&self) -> Option<f64> {
        match self {
            ThresholdSolution::Converged { tau, .. } => Some(*tau),
            _ => None,
        }
    }
}

/// Routing distribution for one utility vector plus how it was solved
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingOutcome {
    pub probabilities: Array1<f64>,
    pub solution: ThresholdSolution,
}

/// Routing distributions for a batch, one row per input
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRouting {
    pub probabilities: Array2<f64>,
    pub solutions: Vec<ThresholdSolution>,
}

impl BatchRouting {
    pub fn fallback_count(&self) -> usize {
        self.solutions.iter().filter(|s| s.is_fallback()).count()
    }
}

/// Numerically stable softmax of a single row
///
/// ```text
/// softmax(x_i) = exp(x_i - max(x)) / Σ exp(x_j - max(x))
/// ```
pub fn softmax_row(x: ArrayView1<f64>) -> Array1<f64> {
    let max_val = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exp_row = x.mapv(|val| (val - max_val).exp());
    let sum_exp = exp_row.sum();
    exp_row / sum_exp
}

/// Divide by the temperature, rejecting empty, NaN or infinite input
fn scale_utilities(utilities: ArrayView1<f64>, temperature: f64) -> Result<Array1<f64>> {
    if utilities.is_empty() {
        return Err(RouterError::invalid_parameter(
            "expert set must not be empty",
        ));
    }
    if let Some((idx, &value)) = utilities.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(RouterError::invalid_input(format!(
            "utility for expert {idx} is not finite ({value})"
        )));
    }
    let scaled = utilities.mapv(|u| u / temperature);
    if let Some((idx, _)) = scaled.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(RouterError::invalid_input(format!(
            "utility for expert {idx} overflows at temperature {temperature}"
        )));
    }
    Ok(scaled)
}

/// `max(0, s_i − τ)^e`, clipped before the power so no base is ever negative
#[inline]
fn clipped_power(scaled: ArrayView1<f64>, tau: f64, exponent: f64) -> Array1<f64> {
    scaled.mapv(|s| (s - tau).max(0.0).powf(exponent))
}

#[inline]
fn residual(scaled: ArrayView1<f64>, tau: f64, exponent: f64) -> f64 {
    scaled
        .iter()
        .map(|&s| (s - tau).max(0.0).powf(exponent))
        .sum::<f64>()
        - 1.0
}

fn min_max(values: ArrayView1<f64>) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

fn uniform(num_experts: usize) -> Array1<f64> {
    Array1::from_elem(num_experts, 1.0 / num_experts as f64)
}

/// Find τ with `Σ max(0, s_i − τ)^{1/(q−1)} = 1` for already-scaled utilities
///
/// Bisects over `[min(min(s) − margin, max(s) − 1), max(s)]`. At the lower end
/// the top expert alone contributes at least 1; at the upper end every term
/// is clipped to zero. Only the upper end of the bracket (where `Σ ≤ 1`) is
/// ever accepted, so the returned τ never sits below the true root and experts
/// outside the support stay exactly zero.
///
/// Stops once `|Σ − 1| < tolerance`. If the bracket shrinks to adjacent floats
/// first, the upper end is still accepted while its residual is below
/// `collapse_tolerance`.
///
/// Returns `(tau, iterations)`, or [`RouterError::ConvergenceFailure`] when
/// neither bound can be met.
pub fn solve_threshold(scaled: ArrayView1<f64>, config: &RouterConfig) -> Result<(f64, usize)> {
    if scaled.is_empty() {
        return Err(RouterError::invalid_parameter(
            "expert set must not be empty",
        ));
    }
    if config.is_shannon_limit() {
        return Err(RouterError::invalid_parameter(
            "threshold search requires q > 1",
        ));
    }

    let exponent = 1.0 / (config.q - 1.0);
    let (min, max) = min_max(scaled);

    if max == min {
        // Equal utilities: p_i = 1/n exactly at τ = s − n^{−(q−1)}
        let n = scaled.len() as f64;
        return Ok((max - n.powf(-(config.q - 1.0)), 0));
    }

    let mut lo = (min - config.bracket_margin).min(max - 1.0);
    if !lo.is_finite() {
        lo = max - 1.0;
    }
    let mut hi = max;
    let mut hi_residual = -1.0_f64;

    for iteration in 1..=config.max_iterations {
        let mid = 0.5 * lo + 0.5 * hi;
        if mid <= lo || mid >= hi {
            // No f64 lies between lo and hi: hi is the best representable τ.
            // Its sum is ≤ 1 and re-normalization absorbs the residual.
            if hi_residual.abs() < config.collapse_tolerance {
                return Ok((hi, iteration - 1));
            }
            return Err(RouterError::ConvergenceFailure {
                reason: FallbackReason::BracketCollapsed {
                    iterations: iteration - 1,
                    residual: hi_residual.abs(),
                },
            });
        }

        let r = residual(scaled, mid, exponent);
        if r.is_nan() {
            return Err(RouterError::ConvergenceFailure {
                reason: FallbackReason::NonFiniteSum { tau: mid },
            });
        }

        if r > 0.0 {
            lo = mid;
        } else {
            hi = mid;
            hi_residual = r;
            if r.abs() < config.tolerance {
                return Ok((mid, iteration));
            }
        }
    }

    Err(RouterError::ConvergenceFailure {
        reason: FallbackReason::IterationBudgetExhausted {
            iterations: config.max_iterations,
            residual: hi_residual.abs(),
        },
    })
}

fn fallback_distribution(scaled: ArrayView1<f64>, strategy: FallbackStrategy) -> Array1<f64> {
    match strategy {
        FallbackStrategy::Softmax => softmax_row(scaled),
        FallbackStrategy::Uniform => uniform(scaled.len()),
    }
}

/// Route one utility vector
pub fn route_row(utilities: ArrayView1<f64>, config: &RouterConfig) -> Result<RoutingOutcome> {
    config.validate()?;
    let scaled = scale_utilities(utilities, config.temperature)?;

    if config.is_shannon_limit() {
        return Ok(RoutingOutcome {
            probabilities: softmax_row(scaled.view()),
            solution: ThresholdSolution::Softmax,
        });
    }

    let exponent = 1.0 / (config.q - 1.0);
    let solved = solve_threshold(scaled.view(), config).and_then(|(tau, iterations)| {
        let (min, max) = min_max(scaled.view());
        if max == min {
            return Ok((uniform(scaled.len()), tau, iterations));
        }
        let clipped = clipped_power(scaled.view(), tau, exponent);
        let total = clipped.sum();
        if !total.is_finite() || total <= 0.0 {
            return Err(RouterError::ConvergenceFailure {
                reason: FallbackReason::NonFiniteSum { tau },
            });
        }
        // Re-normalize by the actual sum to absorb the remaining residual
        Ok((clipped / total, tau, iterations))
    });

    match solved {
        Ok((probabilities, tau, iterations)) => {
            tracing::debug!(tau = tau, iterations = iterations, q = config.q, "Threshold converged");
            Ok(RoutingOutcome {
                probabilities,
                solution: ThresholdSolution::Converged { tau, iterations },
            })
        }
        Err(RouterError::ConvergenceFailure { reason }) => {
            tracing::warn!(
                q = config.q,
                temperature = config.temperature,
                fallback = ?config.fallback,
                reason = %reason,
                "Threshold search failed, using fallback distribution"
            );
            Ok(RoutingOutcome {
                probabilities: fallback_distribution(scaled.view(), config.fallback),
                solution: ThresholdSolution::FallbackUsed { reason },
            })
        }
        Err(e) => Err(e),
    }
}

/// Route a single utility vector with the given `q` and `temperature`
///
/// Uses the default tolerance, iteration budget and softmax fallback.
pub fn route(utilities: ArrayView1<f64>, q: f64, temperature: f64) -> Result<Array1<f64>> {
    let config = RouterConfig::default()
        .with_q(q)
        .with_temperature(temperature);
    route_row(utilities, &config).map(|outcome| outcome.probabilities)
}

/// Route every row of a `(batch_size, num_experts)` utility matrix
pub fn route_batch(utilities: &Array2<f64>, config: &RouterConfig) -> Result<Array2<f64>> {
    route_batch_with_diagnostics(utilities, config).map(|batch| batch.probabilities)
}

/// Route every row and keep each row's [`ThresholdSolution`]
pub fn route_batch_with_diagnostics(
    utilities: &Array2<f64>,
    config: &RouterConfig,
) -> Result<BatchRouting> {
    config.validate()?;
    let (batch_size, num_experts) = utilities.dim();
    if num_experts == 0 {
        return Err(RouterError::invalid_parameter(
            "expert set must not be empty",
        ));
    }

    let rows: Vec<ArrayView1<f64>> = utilities.rows().into_iter().collect();
    let outcomes = rows
        .par_iter()
        .map(|row| route_row(*row, config))
        .collect::<Result<Vec<_>>>()?;

    let mut probabilities = Array2::<f64>::zeros((batch_size, num_experts));
    let mut solutions = Vec::with_capacity(batch_size);
    for (mut dst, outcome) in probabilities.rows_mut().into_iter().zip(outcomes) {
        dst.assign(&outcome.probabilities);
        solutions.push(outcome.solution);
    }

    let fallbacks = solutions.iter().filter(|s| s.is_fallback()).count();
    if fallbacks > 0 {
        tracing::warn!(
            batch_size = batch_size,
            fallbacks = fallbacks,
            "Some rows were routed with the fallback distribution"
        );
    }

    Ok(BatchRouting {
        probabilities,
        solutions,
    })
}
