//! Game-theoretic Mixture of Experts
//!
//! ```text
//! Input → UtilityNet → Tsallis threshold router → Σ_i p_i · expert_i(x) → Output
//! ```
//!
//! The router plays the selector in a zero-sum game against worst-case
//! perturbations; its Tsallis-regularized best response is the sparse routing
//! distribution computed in [`crate::routing`]. Experts are plain two-layer
//! perceptrons evaluated densely; the combiner is a weighted sum along the
//! expert axis.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, RouterError};
use crate::feed_forward::FeedForward;
use crate::model_config::{MoeConfig, RouterConfig};
use crate::routing::{self, BatchRouting};

/// Single expert network
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Expert {
    network: FeedForward,
}

impl Expert {
    pub fn new_with_rng<R: Rng + ?Sized>(
        input_dim: usize,
        hidden_dim: usize,
        output_dim: usize,
        rng: &mut R,
    ) -> Result<Self> {
        Ok(Expert {
            network: FeedForward::new_with_rng(input_dim, hidden_dim, output_dim, rng)?,
        })
    }

    pub fn from_network(network: FeedForward) -> Self {
        Expert { network }
    }

    pub fn forward(&self, input: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.network.forward(input)
    }

    pub fn output_dim(&self) -> usize {
        self.network.output_dim()
    }

    pub fn parameters(&self) -> usize {
        self.network.parameters()
    }
}

/// Router module: learned utilities followed by Tsallis routing
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TsallisRouter {
    /// Maps `(batch, input_dim)` to `(batch, num_experts)` utilities
    utility_net: FeedForward,
    config: RouterConfig,
}

impl TsallisRouter {
    pub fn new_with_rng<R: Rng + ?Sized>(
        input_dim: usize,
        num_experts: usize,
        utility_hidden_dim: usize,
        config: RouterConfig,
        rng: &mut R,
    ) -> Result<Self> {
        config.validate()?;
        if num_experts == 0 {
            return Err(RouterError::invalid_parameter(
                "expert set must not be empty",
            ));
        }
        let utility_net = FeedForward::new_with_rng(input_dim, utility_hidden_dim, num_experts, rng)?;
        Ok(TsallisRouter {
            utility_net,
            config,
        })
    }

    /// Wrap an existing utility network
    pub fn from_utility_net(utility_net: FeedForward, config: RouterConfig) -> Result<Self> {
        config.validate()?;
        Ok(TsallisRouter {
            utility_net,
            config,
        })
    }

    pub fn num_experts(&self) -> usize {
        self.utility_net.output_dim()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Swap `q`/temperature without touching the utility network
    pub fn set_config(&mut self, config: RouterConfig) -> Result<()> {
        config.validate()?;
        tracing::info!(q = config.q, temperature = config.temperature, "Router configuration updated");
        self.config = config;
        Ok(())
    }

    pub fn utilities(&self, input: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.utility_net.forward(input)
    }

    pub fn route(&self, input: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.route_with_diagnostics(input).map(|batch| batch.probabilities)
    }

    pub fn route_with_diagnostics(&self, input: ArrayView2<f64>) -> Result<BatchRouting> {
        let utilities = self.utilities(input)?;
        routing::route_batch_with_diagnostics(&utilities, &self.config)
    }

    pub fn parameters(&self) -> usize {
        self.utility_net.parameters()
    }
}

/// Result of a forward pass
#[derive(Debug, Clone)]
pub struct MoeOutput {
    /// `(batch, output_dim)`
    pub output: Array2<f64>,
    /// `(batch, num_experts)`, each row on the simplex
    pub routing_probs: Array2<f64>,
    /// Number of rows that needed the fallback distribution
    pub fallback_rows: usize,
}

/// Mixture of experts with Tsallis-entropy routing
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GameTheoreticMoE {
    router: TsallisRouter,
    experts: Vec<Expert>,
}

impl GameTheoreticMoE {
    pub fn new(config: &MoeConfig) -> Result<Self> {
        Self::new_with_rng(config, &mut rand::rng())
    }

    pub fn new_with_rng<R: Rng + ?Sized>(config: &MoeConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;

        let router = TsallisRouter::new_with_rng(
            config.input_dim,
            config.num_experts,
            config.utility_hidden_dim,
            config.router,
            &mut *rng,
        )?;
        let experts = (0..config.num_experts)
            .map(|_| {
                Expert::new_with_rng(config.input_dim, config.hidden_dim, config.output_dim, &mut *rng)
            })
            .collect::<Result<Vec<_>>>()?;

        let moe = GameTheoreticMoE { router, experts };
        tracing::info!(
            num_experts = config.num_experts,
            q = config.router.q,
            temperature = config.router.temperature,
            parameters = moe.parameters(),
            "Game-theoretic MoE initialized"
        );
        Ok(moe)
    }

    /// Assemble from parts; expert count and output widths must agree
    pub fn from_parts(router: TsallisRouter, experts: Vec<Expert>) -> Result<Self> {
        if experts.len() != router.num_experts() {
            return Err(RouterError::invalid_input(format!(
                "router scores {} experts but {} were given",
                router.num_experts(),
                experts.len()
            )));
        }
        if let Some(first) = experts.first() {
            let width = first.output_dim();
            if experts.iter().any(|e| e.output_dim() != width) {
                return Err(RouterError::invalid_input(
                    "experts must share the same output dimension",
                ));
            }
        }
        Ok(GameTheoreticMoE { router, experts })
    }

    pub fn router(&self) -> &TsallisRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut TsallisRouter {
        &mut self.router
    }

    pub fn num_experts(&self) -> usize {
        self.experts.len()
    }

    /// Every expert's output stacked as `(batch, num_experts, output_dim)`
    pub fn expert_outputs(&self, input: ArrayView2<f64>) -> Result<Array3<f64>> {
        let outputs = self
            .experts
            .par_iter()
            .map(|expert| expert.forward(input))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<ArrayView2<f64>> = outputs.iter().map(|o| o.view()).collect();
        ndarray::stack(Axis(1), &views)
            .map_err(|e| RouterError::invalid_input(format!("cannot stack expert outputs: {e}")))
    }

    pub fn forward(&self, input: ArrayView2<f64>) -> Result<MoeOutput> {
        let routed = self.router.route_with_diagnostics(input)?;
        let expert_outputs = self.expert_outputs(input)?;
        let output = combine_expert_outputs(routed.probabilities.view(), expert_outputs.view())?;

        Ok(MoeOutput {
            output,
            fallback_rows: routed.fallback_count(),
            routing_probs: routed.probabilities,
        })
    }

    pub fn parameters(&self) -> usize {
        self.router.parameters() + self.experts.iter().map(|e| e.parameters()).sum::<usize>()
    }
}

/// Weighted sum of expert outputs along the expert axis
///
/// `routing: (batch, n)`, `expert_outputs: (batch, n, d)` → `(batch, d)` with
/// `out[b, j] = Σ_i routing[b, i] · expert_outputs[b, i, j]`.
pub fn combine_expert_outputs(
    routing: ArrayView2<f64>,
    expert_outputs: ArrayView3<f64>,
) -> Result<Array2<f64>> {
    let (batch_size, num_experts) = routing.dim();
    let (out_batch, out_experts, _) = expert_outputs.dim();
    if batch_size != out_batch || num_experts != out_experts {
        return Err(RouterError::invalid_input(format!(
            "routing shape {:?} does not match expert outputs {:?}",
            routing.dim(),
            expert_outputs.dim()
        )));
    }

    let weights = routing.insert_axis(Axis(2));
    Ok((&expert_outputs * &weights).sum_axis(Axis(1)))
}

/// Single-instance form of [`combine_expert_outputs`]: `(n)` × `(n, d)` → `(d)`
pub fn combine_row(routing: ArrayView1<f64>, expert_outputs: ArrayView2<f64>) -> Result<Array1<f64>> {
    if routing.len() != expert_outputs.nrows() {
        return Err(RouterError::invalid_input(format!(
            "{} routing weights for {} expert outputs",
            routing.len(),
            expert_outputs.nrows()
        )));
    }
    Ok(routing.dot(&expert_outputs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn small_config() -> MoeConfig {
        let mut config = MoeConfig::new(6, 12, 3, 4);
        config.utility_hidden_dim = 16;
        config
    }

    #[test]
    fn test_combine_weighted_sum() {
        let routing = array![[0.75, 0.25, 0.0]];
        let outputs = Array3::from_shape_vec(
            (1, 3, 2),
            vec![1.0, 2.0, 5.0, 6.0, 100.0, 100.0],
        )
        .unwrap();
        let combined = combine_expert_outputs(routing.view(), outputs.view()).unwrap();
        assert_abs_diff_eq!(combined[[0, 0]], 0.75 * 1.0 + 0.25 * 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(combined[[0, 1]], 0.75 * 2.0 + 0.25 * 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_combine_row_matches_batch() {
        let routing = array![0.5, 0.5];
        let outputs = array![[1.0, 3.0], [3.0, 5.0]];
        let combined = combine_row(routing.view(), outputs.view()).unwrap();
        assert_eq!(combined, array![2.0, 4.0]);
    }

    #[test]
    fn test_combine_rejects_mismatch() {
        let routing = array![[0.5, 0.5]];
        let outputs = Array3::<f64>::zeros((1, 3, 2));
        assert!(matches!(
            combine_expert_outputs(routing.view(), outputs.view()),
            Err(RouterError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_forward_shapes_and_simplex() {
        let mut rng = StdRng::seed_from_u64(3);
        let moe = GameTheoreticMoE::new_with_rng(&small_config(), &mut rng).unwrap();
        let input = Array2::from_shape_fn((5, 6), |(i, j)| (i as f64 - j as f64) * 0.1);

        let out = moe.forward(input.view()).unwrap();
        assert_eq!(out.output.dim(), (5, 3));
        assert_eq!(out.routing_probs.dim(), (5, 4));
        for row in out.routing_probs.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-6);
            assert!(row.iter().all(|&p| p >= 0.0));
        }
    }

    #[test]
    fn test_router_config_swap_keeps_utilities() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut moe = GameTheoreticMoE::new_with_rng(&small_config(), &mut rng).unwrap();
        let input = Array2::from_elem((2, 6), 0.5);
        let before = moe.router().utilities(input.view()).unwrap();

        moe.router_mut().set_config(RouterConfig::softmax()).unwrap();
        let after = moe.router().utilities(input.view()).unwrap();
        assert_eq!(before, after);
        assert!(moe.router_mut().set_config(RouterConfig::default().with_q(0.0)).is_err());
    }

    #[test]
    fn test_from_parts_checks_expert_count() {
        let mut rng = StdRng::seed_from_u64(5);
        let router = TsallisRouter::new_with_rng(4, 3, 8, RouterConfig::default(), &mut rng).unwrap();
        let experts = vec![Expert::new_with_rng(4, 8, 2, &mut rng).unwrap()];
        assert!(matches!(
            GameTheoreticMoE::from_parts(router, experts),
            Err(RouterError::InvalidInput { .. })
        ));
    }
}
