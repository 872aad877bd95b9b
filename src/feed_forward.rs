use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, RouterError};

/// Two-layer perceptron: `Linear → ReLU → Linear`
///
/// Used both as an expert network and as the router's utility network.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FeedForward {
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array2<f64>,
    b2: Array1<f64>,
}

impl FeedForward {
    /// Initialize with He-normal weights and zero biases
    pub fn new(input_dim: usize, hidden_dim: usize, output_dim: usize) -> Result<Self> {
        Self::new_with_rng(input_dim, hidden_dim, output_dim, &mut rand::rng())
    }

    pub fn new_with_rng<R: Rng + ?Sized>(
        input_dim: usize,
        hidden_dim: usize,
        output_dim: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if input_dim == 0 || hidden_dim == 0 || output_dim == 0 {
            return Err(RouterError::invalid_parameter(format!(
                "feed-forward dimensions must be non-zero, got {input_dim}x{hidden_dim}x{output_dim}"
            )));
        }

        // He initialization: std = sqrt(2 / fan_in)
        let normal_w1 = he_normal(input_dim)?;
        let normal_w2 = he_normal(hidden_dim)?;

        Ok(FeedForward {
            w1: Array2::from_shape_fn((input_dim, hidden_dim), |_| normal_w1.sample(rng)),
            b1: Array1::zeros(hidden_dim),
            w2: Array2::from_shape_fn((hidden_dim, output_dim), |_| normal_w2.sample(rng)),
            b2: Array1::zeros(output_dim),
        })
    }

    /// Build from explicit weights; `w1: (in, hidden)`, `w2: (hidden, out)`
    pub fn from_weights(
        w1: Array2<f64>,
        b1: Array1<f64>,
        w2: Array2<f64>,
        b2: Array1<f64>,
    ) -> Result<Self> {
        if w1.ncols() != b1.len() || w1.ncols() != w2.nrows() || w2.ncols() != b2.len() {
            return Err(RouterError::invalid_input(format!(
                "inconsistent feed-forward shapes: w1 {:?}, b1 {}, w2 {:?}, b2 {}",
                w1.dim(),
                b1.len(),
                w2.dim(),
                b2.len()
            )));
        }
        Ok(FeedForward { w1, b1, w2, b2 })
    }

    pub fn input_dim(&self) -> usize {
        self.w1.nrows()
    }

    pub fn output_dim(&self) -> usize {
        self.w2.ncols()
    }

    /// Forward pass over a `(batch_size, input_dim)` matrix
    pub fn forward(&self, input: ArrayView2<f64>) -> Result<Array2<f64>> {
        if input.ncols() != self.input_dim() {
            return Err(RouterError::invalid_input(format!(
                "expected input width {}, got {}",
                self.input_dim(),
                input.ncols()
            )));
        }

        let hidden = (input.dot(&self.w1) + &self.b1).mapv(|x| x.max(0.0)); // ReLU
        Ok(hidden.dot(&self.w2) + &self.b2)
    }

    pub fn parameters(&self) -> usize {
        self.w1.len() + self.b1.len() + self.w2.len() + self.b2.len()
    }
}

fn he_normal(fan_in: usize) -> Result<Normal<f64>> {
    let std = (2.0 / fan_in as f64).sqrt();
    Normal::new(0.0, std).map_err(|e| {
        RouterError::invalid_parameter(format!("cannot build initializer for fan-in {fan_in}: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_forward_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let ff = FeedForward::new_with_rng(4, 16, 3, &mut rng).unwrap();
        let input = Array2::<f64>::ones((5, 4));
        let output = ff.forward(input.view()).unwrap();
        assert_eq!(output.dim(), (5, 3));
        assert_eq!(ff.parameters(), 4 * 16 + 16 + 16 * 3 + 3);
    }

    #[test]
    fn test_relu_and_bias() {
        // hidden = relu([1, -1]) = [1, 0]; out = 2*1 + 0.5
        let ff = FeedForward::from_weights(
            array![[1.0, -1.0]],
            array![0.0, 0.0],
            array![[2.0], [3.0]],
            array![0.5],
        )
        .unwrap();
        let output = ff.forward(array![[1.0]].view()).unwrap();
        assert_eq!(output, array![[2.5]]);
    }

    #[test]
    fn test_rejects_wrong_width() {
        let mut rng = StdRng::seed_from_u64(1);
        let ff = FeedForward::new_with_rng(4, 8, 2, &mut rng).unwrap();
        let input = Array2::<f64>::zeros((1, 3));
        assert!(matches!(
            ff.forward(input.view()),
            Err(RouterError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_seeded_init_is_reproducible() {
        let a = FeedForward::new_with_rng(3, 5, 2, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = FeedForward::new_with_rng(3, 5, 2, &mut StdRng::seed_from_u64(42)).unwrap();
        let input = array![[0.3, -0.2, 1.0]];
        assert_eq!(a.forward(input.view()).unwrap(), b.forward(input.view()).unwrap());
    }
}
