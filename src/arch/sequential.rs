use std::{
    cell::RefCell,
    io::{Read, Write},
    rc::Rc,
};

use log::{debug, trace};

use super::{layers::Layer, loss::LossFn};
use crate::{MlErr, Result, optimization::Optimizer, persistence, tensor::Matrix};

/// Where a `Sequential` is within a training step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Forwarded,
    GradientsReady,
}

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
///
/// The optimizer is shared with the caller, which keeps its own handle to it.
pub struct Sequential<L: LossFn, O: Optimizer> {
    layers: Vec<Box<dyn Layer>>,
    loss_fn: L,
    optimizer: Rc<RefCell<O>>,
    stage: Stage,
}

impl<L: LossFn, O: Optimizer> Sequential<L, O> {
    /// Creates a new `Sequential` without layers.
    ///
    /// # Arguments
    /// * `loss_fn` - The loss function to compute the initial gradient with.
    /// * `optimizer` - The optimizer to update the layers with after each backward pass.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new(loss_fn: L, optimizer: Rc<RefCell<O>>) -> Self {
        Self {
            layers: Vec::new(),
            loss_fn,
            optimizer,
            stage: Stage::Idle,
        }
    }

    /// Appends `layer`, it will run after every layer already in the model.
    pub fn add_layer<T: Layer + 'static>(&mut self, layer: T) {
        self.layers.push(Box::new(layer));
    }

    /// Appends an already boxed layer.
    pub fn add_boxed_layer(&mut self, layer: Box<dyn Layer>) {
        self.layers.push(layer);
    }

    /// Builder flavour of `add_layer`.
    pub fn with_layer<T: Layer + 'static>(mut self, layer: T) -> Self {
        self.add_layer(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> impl Iterator<Item = &dyn Layer> {
        self.layers.iter().map(|layer| layer.as_ref())
    }

    /// Returns the amount of trainable parameters in the model.
    pub fn size(&self) -> usize {
        self.layers.iter().map(|layer| layer.size()).sum()
    }

    pub fn loss_fn(&self) -> &L {
        &self.loss_fn
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `x` - The input batch, one sample per row.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    pub fn forward(&mut self, mut x: Matrix) -> Result<Matrix> {
        if self.layers.is_empty() {
            return Err(MlErr::EmptyModel);
        }

        self.stage = Stage::Idle;

        for (i, layer) in self.layers.iter_mut().enumerate() {
            trace!(layer = i, kind = layer.name(); "forward");
            x = layer.forward(x)?;
        }

        self.stage = Stage::Forwarded;
        Ok(x)
    }

    /// Makes a backward pass through the network, leaving each layer's gradients ready for the
    /// optimizer.
    ///
    /// # Arguments
    /// * `y_pred` - The output of the last forward pass.
    /// * `y` - The expected output.
    ///
    /// # Returns
    /// `UninitializedGradient` if there was no forward pass since the last backward one.
    pub fn backward(&mut self, y_pred: &Matrix, y: &Matrix) -> Result<()> {
        if self.layers.is_empty() {
            return Err(MlErr::EmptyModel);
        }

        if self.stage != Stage::Forwarded {
            return Err(MlErr::UninitializedGradient {
                layer: "sequential",
            });
        }

        self.stage = Stage::Idle;

        let mut d = self.loss_fn.gradient(y_pred, y)?;
        let nlayers = self.layers.len();

        for (i, layer) in self.layers.iter_mut().enumerate().rev() {
            trace!(layer = i, kind = layer.name(); "backward");
            d = layer.backward(d)?;
        }

        debug!(layers = nlayers; "gradients ready");
        self.stage = Stage::GradientsReady;
        Ok(())
    }

    /// Updates every layer with the optimizer, exactly once.
    ///
    /// # Returns
    /// `UninitializedGradient` if there was no backward pass since the last update.
    pub fn optimize(&mut self) -> Result<()> {
        if self.stage != Stage::GradientsReady {
            return Err(MlErr::UninitializedGradient {
                layer: "sequential",
            });
        }

        self.stage = Stage::Idle;

        let mut optimizer = self.optimizer.borrow_mut();
        for layer in self.layers.iter_mut() {
            optimizer.step(layer.as_mut())?;
        }

        Ok(())
    }

    /// Runs a whole training step over a single batch: forward, backward and optimization.
    ///
    /// # Arguments
    /// * `x` - The input batch.
    /// * `y` - The expected output.
    ///
    /// # Returns
    /// The loss of the prediction made before updating the parameters.
    pub fn train_step(&mut self, x: Matrix, y: &Matrix) -> Result<f32> {
        let y_pred = self.forward(x)?;
        let loss = self.loss_fn.loss(&y_pred, y)?;

        self.backward(&y_pred, y)?;
        self.optimize()?;

        debug!(loss = loss; "training step done");
        Ok(loss)
    }

    /// Serializes every layer, in order, into `sink`.
    pub fn write(&self, sink: &mut dyn Write) -> Result<()> {
        persistence::write_model_header(sink, self.layers.len())?;

        for layer in &self.layers {
            layer.write(sink)?;
        }

        Ok(())
    }

    /// Loads every layer's parameters from `source`.
    ///
    /// The persisted model must have the same layers, in the same order and with the same
    /// shapes, as this one. Nothing is replaced unless every layer is read successfully.
    pub fn read(&mut self, source: &mut dyn Read) -> Result<()> {
        let count = persistence::read_model_header(source)?;

        if count != self.layers.len() {
            return Err(MlErr::serialization(format!(
                "expected {} layers, found {count}",
                self.layers.len()
            )));
        }

        let mut staged = Vec::with_capacity(count);
        for layer in &self.layers {
            staged.push(layer.read(source)?);
        }

        self.stage = Stage::Idle;

        for (layer, params) in self.layers.iter_mut().zip(staged) {
            if let Some(params) = params {
                layer.load(params)?;
            }
        }

        debug!(layers = count; "model loaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::{
        arch::{
            layers::{Dense, Sigmoid},
            loss::Mse,
        },
        device::Device,
        optimization::GradientDescent,
        tensor::Vector,
    };

    fn sum_model(device: &Device) -> Sequential<Mse, GradientDescent> {
        let weights = Matrix::from_host(device, 2, 1, &[1., 1.]).unwrap();
        let bias = Vector::from_host(device, &[0.]).unwrap();
        let optimizer = Rc::new(RefCell::new(GradientDescent::new(0.1)));

        Sequential::new(Mse, optimizer).with_layer(Dense::from_params(weights, bias).unwrap())
    }

    #[test]
    fn empty_model_fails() {
        let device = Device::cpu().unwrap();
        let optimizer = Rc::new(RefCell::new(GradientDescent::new(0.1)));
        let mut model = Sequential::new(Mse, optimizer);

        let x = Matrix::from_host(&device, 1, 1, &[1.]).unwrap();
        assert!(matches!(model.forward(x), Err(MlErr::EmptyModel)));
    }

    #[test]
    fn stages_must_follow_in_order() {
        let device = Device::cpu().unwrap();
        let mut model = sum_model(&device);
        let y = Matrix::from_host(&device, 1, 1, &[3.]).unwrap();

        assert!(model.backward(&y, &y).is_err());
        assert!(model.optimize().is_err());

        let x = Matrix::from_host(&device, 1, 2, &[1., 2.]).unwrap();
        let y_pred = model.forward(x).unwrap();
        assert!(model.optimize().is_err());

        model.backward(&y_pred, &y).unwrap();
        assert!(model.backward(&y_pred, &y).is_err());

        model.optimize().unwrap();
        assert!(model.optimize().is_err());
    }

    #[test]
    fn a_failed_pass_goes_back_to_idle() {
        let device = Device::cpu().unwrap();
        let mut model = sum_model(&device);

        let x = Matrix::from_host(&device, 1, 2, &[1., 2.]).unwrap();
        let y_pred = model.forward(x).unwrap();
        let wrong = Matrix::from_host(&device, 1, 2, &[1., 2.]).unwrap();

        assert!(matches!(
            model.backward(&y_pred, &wrong),
            Err(MlErr::ShapeMismatch { .. })
        ));
        assert!(model.optimize().is_err());
    }

    #[test]
    fn layers_run_in_insertion_order() {
        let device = Device::cpu().unwrap();
        let mut model = sum_model(&device).with_layer(Sigmoid::new(2.));

        assert_eq!(model.len(), 2);
        assert_eq!(model.size(), 3);

        let x = Matrix::from_host(&device, 1, 2, &[1., -1.]).unwrap();
        assert_eq!(model.forward(x).unwrap().to_array(), array![[1.]]);

        let names: Vec<_> = model.layers().map(|layer| layer.name()).collect();
        assert_eq!(names, ["dense", "sigmoid"]);
    }

    #[test]
    fn read_checks_the_layer_count() {
        let device = Device::cpu().unwrap();
        let model = sum_model(&device);
        let mut other = sum_model(&device).with_layer(Sigmoid::new(1.));

        let mut buf = Vec::new();
        model.write(&mut buf).unwrap();

        assert!(matches!(
            other.read(&mut buf.as_slice()),
            Err(MlErr::SerializationFailure(_))
        ));
    }
}
