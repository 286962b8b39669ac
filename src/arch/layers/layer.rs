use std::io::{Read, Write};

use crate::{
    MlErr, Result,
    tensor::{Matrix, Vector},
};

/// The trainable parameters of a layer together with their latest gradients.
pub struct Params<'a> {
    pub weights: &'a mut Matrix,
    pub bias: &'a mut Vector,
    pub delta_weights: &'a Matrix,
    pub delta_bias: &'a Vector,
}

/// Parameters parsed out of a persisted layer, not yet in use by it.
pub struct StagedParams {
    pub weights: Matrix,
    pub bias: Vector,
}

/// A stage of a feed-forward network.
///
/// Information flows forward when computing an output and backward when computing the
/// gradients, each call to `backward` must be preceded by exactly one call to `forward`.
pub trait Layer {
    /// Computes this layer's output for `x`.
    ///
    /// The input is moved in and retained until the next `backward`.
    ///
    /// # Arguments
    /// * `x` - A batch with one sample per row.
    ///
    /// # Returns
    /// A newly owned output batch.
    fn forward(&mut self, x: Matrix) -> Result<Matrix>;

    /// Computes the gradients of this layer given the gradient of the loss with respect to its
    /// output, storing the ones of its parameters.
    ///
    /// # Arguments
    /// * `d` - The gradient of the loss with respect to the output of the last `forward`.
    ///
    /// # Returns
    /// The gradient of the loss with respect to the input of the last `forward`, or
    /// `UninitializedGradient` if there was no `forward` since the previous `backward`.
    fn backward(&mut self, d: Matrix) -> Result<Matrix>;

    /// Hands the parameters and their fresh gradients to an optimizer.
    ///
    /// The gradients are considered consumed afterwards.
    ///
    /// # Returns
    /// `None` for layers without parameters, or `UninitializedGradient` if there are no gradients
    /// computed since the last time they were handed.
    fn params(&mut self) -> Result<Option<Params<'_>>>;

    /// Serializes this layer's parameters into `sink`.
    fn write(&self, sink: &mut dyn Write) -> Result<()>;

    /// Parses this layer's parameters out of `source` without applying them.
    ///
    /// # Returns
    /// The parameters to hand to `load`, `None` for layers without any, or
    /// `SerializationFailure` if the data is malformed or doesn't belong to a layer of this kind
    /// and shape.
    fn read(&self, source: &mut dyn Read) -> Result<Option<StagedParams>>;

    /// Replaces this layer's parameters with ones previously returned by `read`.
    fn load(&mut self, _params: StagedParams) -> Result<()> {
        Err(MlErr::serialization(format!(
            "the {} layer has no parameters to load",
            self.name()
        )))
    }

    /// Returns the amount of trainable parameters.
    fn size(&self) -> usize;

    fn name(&self) -> &'static str;
}
