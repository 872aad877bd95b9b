pub mod errors;
pub mod feed_forward;
pub mod metrics;
pub mod model_config;
pub mod moe;
pub mod routing;
// Re-export key items for easier access
pub use errors::{FallbackReason, Result, RouterError};
pub use feed_forward::FeedForward;
pub use metrics::{
    ACTIVATION_THRESHOLD, SparsityMetrics, compute_sparsity_metrics, gini_coefficient,
    shannon_entropy,
};
pub use model_config::{FallbackStrategy, MoeConfig, RouterConfig, SHANNON_EPSILON};
pub use moe::{Expert, GameTheoreticMoE, MoeOutput, TsallisRouter, combine_expert_outputs};
pub use routing::{
    BatchRouting, RoutingOutcome, ThresholdSolution, route, route_batch,
    route_batch_with_diagnostics, route_row, solve_threshold,
};

// Constants
pub const DEFAULT_INPUT_DIM: usize = 32;
pub const DEFAULT_HIDDEN_DIM: usize = 64;
pub const DEFAULT_NUM_EXPERTS: usize = 8;
pub const UTILITY_HIDDEN_DIM: usize = 256;
