//! Sparsity and concentration measures for routing distributions

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, RouterError};

/// Probability above which an expert counts as active
pub const ACTIVATION_THRESHOLD: f64 = 0.01;

/// Batch-averaged sparsity summary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SparsityMetrics {
    /// Mean number of experts with probability above the activation threshold
    pub active_experts: f64,
    /// Mean Gini coefficient of the routing rows
    pub gini_coefficient: f64,
}

/// Number of entries strictly greater than `threshold`
pub fn active_expert_count(row: ArrayView1<f64>, threshold: f64) -> usize {
    row.iter().filter(|&&p| p > threshold).count()
}

/// Indices of active experts, most probable first
pub fn active_expert_indices(row: ArrayView1<f64>, threshold: f64) -> Vec<usize> {
    let mut indexed: Vec<(usize, f64)> = row
        .iter()
        .enumerate()
        .filter(|(_, p)| **p > threshold)
        .map(|(idx, &p)| (idx, p))
        .collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    indexed.into_iter().map(|(idx, _)| idx).collect()
}

pub fn average_active_experts(batch: &Array2<f64>, threshold: f64) -> f64 {
    if batch.nrows() == 0 {
        return 0.0;
    }
    let total: usize = batch
        .rows()
        .into_iter()
        .map(|row| active_expert_count(row, threshold))
        .sum();
    total as f64 / batch.nrows() as f64
}

/// Gini coefficient of one distribution
///
/// ```text
/// G = 2 Σ_i i · p_(i) / (n Σ p) − (n + 1) / n,   p_(1) ≤ … ≤ p_(n), i = 1..n
/// ```
///
/// 0 for a uniform row, `(n − 1) / n` for a one-hot row.
pub fn gini_coefficient(row: ArrayView1<f64>) -> Result<f64> {
    let n = row.len();
    if n == 0 {
        return Err(RouterError::invalid_input("empty distribution"));
    }
    let mut sorted: Vec<f64> = row.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let total: f64 = sorted.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(RouterError::invalid_input(format!(
            "distribution must have positive finite mass, got {total}"
        )));
    }

    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, &p)| (i + 1) as f64 * p)
        .sum();
    let n = n as f64;
    Ok(2.0 * weighted / (n * total) - (n + 1.0) / n)
}

/// Shannon entropy in nats; zero entries contribute nothing
pub fn shannon_entropy(row: ArrayView1<f64>) -> f64 {
    row.iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.ln())
        .sum()
}

/// Mean routing mass per expert across the batch
pub fn expert_utilization(batch: &Array2<f64>) -> Array1<f64> {
    batch
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(batch.ncols()))
}

pub fn compute_sparsity_metrics(batch: &Array2<f64>) -> Result<SparsityMetrics> {
    compute_sparsity_metrics_with_threshold(batch, ACTIVATION_THRESHOLD)
}

pub fn compute_sparsity_metrics_with_threshold(
    batch: &Array2<f64>,
    threshold: f64,
) -> Result<SparsityMetrics> {
    if batch.nrows() == 0 {
        return Err(RouterError::invalid_input("empty routing batch"));
    }
    let gini_sum = batch
        .rows()
        .into_iter()
        .map(gini_coefficient)
        .sum::<Result<f64>>()?;

    Ok(SparsityMetrics {
        active_experts: average_active_experts(batch, threshold),
        gini_coefficient: gini_sum / batch.nrows() as f64,
    })
}
