use crate::{Result, tensor::Matrix};

/// A loss function, measures how far a prediction is from its target.
///
/// Implementations must not mutate their inputs.
pub trait LossFn {
    /// Computes the scalar loss of `y_pred` against `y`.
    fn loss(&self, y_pred: &Matrix, y: &Matrix) -> Result<f32>;

    /// Computes the gradient of the loss with respect to `y_pred`.
    ///
    /// This is the gradient of the value `loss` returns, so any averaging over the batch is
    /// already applied; layers sum their gradients over the batch rows.
    ///
    /// # Returns
    /// A new matrix with the same shape as `y_pred`.
    fn gradient(&self, y_pred: &Matrix, y: &Matrix) -> Result<Matrix>;
}
