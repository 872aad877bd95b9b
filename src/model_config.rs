use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, RouterError};

/// Distance from `q = 1` below which the Shannon limit (softmax) is used
pub const SHANNON_EPSILON: f64 = 1e-6;

/// What to return when the threshold search cannot meet its tolerance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FallbackStrategy {
    /// Softmax of the scaled utilities (the q → 1 limit)
    /// - Keeps the ordering of the utilities
    /// - Dense: every expert gets positive mass
    #[default]
    Softmax,

    /// Uniform distribution over all experts
    Uniform,
}

/// Hyperparameters of the Tsallis threshold router
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Entropic index `q ≥ 1`
    /// - q → 1: softmax (Shannon entropy)
    /// - q = 2: sparsemax-like quadratic projection
    /// - q > 2: increasingly sparse
    pub q: f64,

    /// Divides utilities before projection; must be > 0
    pub temperature: f64,

    /// Target for `|Σp(τ) − 1|` in the threshold search
    pub tolerance: f64,

    /// Bisection step budget
    pub max_iterations: usize,

    /// Largest `|Σp(τ) − 1|` still accepted once the bracket has shrunk to
    /// adjacent floats and `tolerance` is out of reach
    pub collapse_tolerance: f64,

    /// How far below `min(u)/temperature` the lower bracket starts
    pub bracket_margin: f64,

    /// Deterministic replacement when the search fails
    pub fallback: FallbackStrategy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            q: 2.0,
            temperature: 1.0,
            tolerance: 1e-6,
            max_iterations: 200,
            collapse_tolerance: 1e-2,
            bracket_margin: 10.0,
            fallback: FallbackStrategy::Softmax,
        }
    }
}

impl RouterConfig {
    /// Shannon limit: plain softmax routing
    pub fn softmax() -> Self {
        Self {
            q: 1.0,
            ..Self::default()
        }
    }

    /// Quadratic (q = 2) projection
    pub fn sparsemax() -> Self {
        Self::default()
    }

    pub fn with_q(mut self, q: f64) -> Self {
        self.q = q;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackStrategy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_collapse_tolerance(mut self, collapse_tolerance: f64) -> Self {
        self.collapse_tolerance = collapse_tolerance;
        self
    }

    /// Whether `q` is close enough to 1 to route with softmax
    #[inline]
    pub fn is_shannon_limit(&self) -> bool {
        (self.q - 1.0).abs() < SHANNON_EPSILON
    }

    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(RouterError::invalid_parameter(format!(
                "temperature must be positive and finite, got {}",
                self.temperature
            )));
        }
        if !self.q.is_finite() || self.q < 1.0 {
            return Err(RouterError::invalid_parameter(format!(
                "q must be finite and >= 1, got {}",
                self.q
            )));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(RouterError::invalid_parameter(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(RouterError::invalid_parameter(
                "max_iterations must be at least 1",
            ));
        }
        if !self.collapse_tolerance.is_finite() || self.collapse_tolerance <= 0.0 {
            return Err(RouterError::invalid_parameter(format!(
                "collapse_tolerance must be positive, got {}",
                self.collapse_tolerance
            )));
        }
        if !self.bracket_margin.is_finite() || self.bracket_margin < 0.0 {
            return Err(RouterError::invalid_parameter(format!(
                "bracket_margin must be finite and non-negative, got {}",
                self.bracket_margin
            )));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }
}

/// Shape of a game-theoretic MoE model plus its router settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoeConfig {
    pub input_dim: usize,
    /// Hidden width of every expert
    pub hidden_dim: usize,
    pub output_dim: usize,
    pub num_experts: usize,
    /// Hidden width of the utility network
    pub utility_hidden_dim: usize,
    pub router: RouterConfig,
}

impl Default for MoeConfig {
    fn default() -> Self {
        Self::new(
            crate::DEFAULT_INPUT_DIM,
            crate::DEFAULT_HIDDEN_DIM,
            crate::DEFAULT_INPUT_DIM,
            crate::DEFAULT_NUM_EXPERTS,
        )
    }
}

impl MoeConfig {
    pub fn new(input_dim: usize, hidden_dim: usize, output_dim: usize, num_experts: usize) -> Self {
        Self {
            input_dim,
            hidden_dim,
            output_dim,
            num_experts,
            utility_hidden_dim: crate::UTILITY_HIDDEN_DIM,
            router: RouterConfig::default(),
        }
    }

    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("input_dim", self.input_dim),
            ("hidden_dim", self.hidden_dim),
            ("output_dim", self.output_dim),
            ("utility_hidden_dim", self.utility_hidden_dim),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(RouterError::invalid_parameter(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.num_experts == 0 {
            return Err(RouterError::invalid_parameter(
                "expert set must not be empty",
            ));
        }
        self.router.validate()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }
}
