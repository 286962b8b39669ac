use super::LossFn;
use crate::{Result, tensor::Matrix};

/// Mean squared error loss function.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mse;

impl Mse {
    /// Returns a new `Mse`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Mse {
    fn loss(&self, y_pred: &Matrix, y: &Matrix) -> Result<f32> {
        let sum = y_pred.zip_fold(y, "mse", |acc, p, t| acc + (p - t).powi(2))?;
        Ok(sum / y_pred.len() as f32)
    }

    fn gradient(&self, y_pred: &Matrix, y: &Matrix) -> Result<Matrix> {
        y_pred.check_same_shape(y, "mse")?;

        let mut d = y_pred.try_clone()?;
        d.subtract(y)?;
        d.scale(2. / y_pred.len() as f32);
        Ok(d)
    }
}
