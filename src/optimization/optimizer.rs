use crate::{Result, arch::layers::Layer};

/// Updates the parameters of a layer out of its latest gradients.
pub trait Optimizer {
    /// Makes a single step on `layer`'s parameters.
    ///
    /// Must be called once per layer after each backward pass and before the next forward one.
    fn step(&mut self, layer: &mut dyn Layer) -> Result<()>;
}
