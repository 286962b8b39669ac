use std::io::{Read, Write};

use log::trace;

use super::{Layer, Params, StagedParams};
use crate::{
    MlErr, Result,
    device::Device,
    initialization::ParamGen,
    persistence::{self, LayerTag},
    tensor::{Matrix, Vector},
};

/// A fully connected layer computing `x · W + b`.
///
/// The weights have shape `(inputs, outputs)`, so a batch of shape `(n, inputs)` is mapped to one
/// of shape `(n, outputs)`.
pub struct Dense {
    dim: (usize, usize),
    weights: Matrix,
    bias: Vector,
    delta_weights: Matrix,
    delta_bias: Vector,

    // Forward metadata
    x: Option<Matrix>,

    // Whether the deltas were computed and not yet handed to an optimizer
    fresh: bool,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `device` - The device to allocate the parameters on.
    /// * `dim` - The amount of inputs and outputs.
    /// * `param_gen` - The generator for the initial weights, sampled first, and biases.
    ///
    /// # Returns
    /// A new `Dense` instance or an error if the parameters couldn't be allocated.
    pub fn new<G>(device: &Device, dim: (usize, usize), param_gen: &mut G) -> Result<Self>
    where
        G: ParamGen + ?Sized,
    {
        let (inputs, outputs) = dim;
        let weights = Matrix::from_vec(device, inputs, outputs, param_gen.sample(inputs * outputs))?;
        let bias = Vector::from_vec(device, param_gen.sample(outputs))?;

        Self::from_params(weights, bias)
    }

    /// Creates a new `Dense` layer out of existing parameters.
    ///
    /// # Returns
    /// An error if `bias` doesn't have one element per column of `weights` or if both live on
    /// different devices.
    pub fn from_params(weights: Matrix, bias: Vector) -> Result<Self> {
        let dim = weights.shape();
        let device = weights.device().clone();

        if !device.same(bias.device()) {
            return Err(MlErr::DeviceMismatch { op: "dense" });
        }

        if bias.len() != dim.1 {
            return Err(MlErr::shape_mismatch("dense", dim, (1, bias.len())));
        }

        Ok(Self {
            dim,
            delta_weights: Matrix::zeros(&device, dim.0, dim.1)?,
            delta_bias: Vector::zeros(&device, dim.1)?,
            weights,
            bias,
            x: None,
            fresh: false,
        })
    }

    /// Returns the amount of inputs and outputs.
    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn weights(&self) -> &Matrix {
        &self.weights
    }

    pub fn bias(&self) -> &Vector {
        &self.bias
    }

    /// The gradient of the loss with respect to the weights computed by the last `backward`.
    pub fn delta_weights(&self) -> &Matrix {
        &self.delta_weights
    }

    /// The gradient of the loss with respect to the bias computed by the last `backward`.
    pub fn delta_bias(&self) -> &Vector {
        &self.delta_bias
    }
}

impl Layer for Dense {
    fn forward(&mut self, x: Matrix) -> Result<Matrix> {
        let mut z = x.multiply(&self.weights)?;
        z.add_vector(&self.bias)?;

        self.x = Some(x);
        Ok(z)
    }

    fn backward(&mut self, d: Matrix) -> Result<Matrix> {
        let Some(x) = self.x.as_ref() else {
            return Err(MlErr::UninitializedGradient { layer: self.name() });
        };

        let dx = d.multiply_by_transposition(&self.weights)?;
        let dw = x.transpose_and_multiply(&d)?;
        let db = d.sum_x()?;

        trace!(batch = x.rows(); "dense gradients computed");

        self.delta_weights = dw;
        self.delta_bias = db;
        self.x = None;
        self.fresh = true;
        Ok(dx)
    }

    fn params(&mut self) -> Result<Option<Params<'_>>> {
        if !self.fresh {
            return Err(MlErr::UninitializedGradient { layer: self.name() });
        }

        self.fresh = false;
        Ok(Some(Params {
            weights: &mut self.weights,
            bias: &mut self.bias,
            delta_weights: &self.delta_weights,
            delta_bias: &self.delta_bias,
        }))
    }

    fn write(&self, sink: &mut dyn Write) -> Result<()> {
        persistence::write_layer_header(sink, LayerTag::Dense)?;
        persistence::write_matrix(sink, &self.weights)?;
        persistence::write_vector(sink, &self.bias)
    }

    fn read(&self, source: &mut dyn Read) -> Result<Option<StagedParams>> {
        let device = self.weights.device();

        persistence::read_layer_header(source, LayerTag::Dense)?;
        let weights = persistence::read_matrix(source, device, self.dim)?;
        let bias = persistence::read_vector(source, device, self.dim.1)?;

        Ok(Some(StagedParams { weights, bias }))
    }

    fn load(&mut self, params: StagedParams) -> Result<()> {
        let StagedParams { weights, bias } = params;
        let device = self.weights.device();

        if !device.same(weights.device()) || !device.same(bias.device()) {
            return Err(MlErr::DeviceMismatch { op: "dense" });
        }

        if weights.shape() != self.dim {
            return Err(MlErr::shape_mismatch("dense", self.dim, weights.shape()));
        }

        if bias.len() != self.dim.1 {
            return Err(MlErr::shape_mismatch("dense", self.dim, (1, bias.len())));
        }

        self.weights = weights;
        self.bias = bias;
        self.fresh = false;
        Ok(())
    }

    fn size(&self) -> usize {
        (self.dim.0 + 1) * self.dim.1
    }

    fn name(&self) -> &'static str {
        "dense"
    }
}
