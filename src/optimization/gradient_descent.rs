use super::Optimizer;
use crate::{
    Result,
    arch::layers::{Layer, Params},
};

/// Gradient descent optimization algorithm.
#[derive(Debug, Clone, Copy)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Returns a new `GradientDescent`.
    ///
    /// # Arguments
    /// * `learning_rate` - The *length* of the steps taken on `step`.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

impl Optimizer for GradientDescent {
    /// Makes a step in the opposite direction of the gradient, with a length of `learning_rate`.
    fn step(&mut self, layer: &mut dyn Layer) -> Result<()> {
        let Some(Params {
            weights,
            bias,
            delta_weights,
            delta_bias,
        }) = layer.params()?
        else {
            return Ok(());
        };

        let lr = self.learning_rate;
        weights.scaled_subtract(delta_weights, lr)?;
        bias.scaled_subtract(delta_bias, lr)
    }
}
