use std::io::{Read, Write};

use super::{Layer, Params, StagedParams};
use crate::{
    MlErr, Result,
    persistence::{self, LayerTag},
    tensor::Matrix,
};

/// An activation layer applying `amp / (1 + e^(-z))` to every element.
pub struct Sigmoid {
    amp: f32,
    a: Option<Matrix>,
}

impl Sigmoid {
    /// Creates a new `Sigmoid`.
    ///
    /// # Arguments
    /// * `amp` - The amplitude, the function's output ranges over `(0, amp)`.
    pub fn new(amp: f32) -> Self {
        Self { amp, a: None }
    }

    pub fn amp(&self) -> f32 {
        self.amp
    }
}

impl Layer for Sigmoid {
    fn forward(&mut self, x: Matrix) -> Result<Matrix> {
        let amp = self.amp;
        let mut a = x;
        a.map_inplace(|z| amp / (1. + (-z).exp()));

        self.a = Some(a.try_clone()?);
        Ok(a)
    }

    fn backward(&mut self, mut d: Matrix) -> Result<Matrix> {
        let amp = self.amp;
        let a = self.a.take().ok_or(MlErr::UninitializedGradient { layer: self.name() })?;

        d.zip_mut_with(&a, "sigmoid", |d, a| *d *= a * (amp - a) / amp)?;
        Ok(d)
    }

    fn params(&mut self) -> Result<Option<Params<'_>>> {
        Ok(None)
    }

    fn write(&self, sink: &mut dyn Write) -> Result<()> {
        persistence::write_layer_header(sink, LayerTag::Sigmoid)
    }

    fn read(&self, source: &mut dyn Read) -> Result<Option<StagedParams>> {
        persistence::read_layer_header(source, LayerTag::Sigmoid)?;
        Ok(None)
    }

    fn size(&self) -> usize {
        0
    }

    fn name(&self) -> &'static str {
        "sigmoid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;

    #[test]
    fn forward_and_backward() {
        let device = Device::cpu().unwrap();
        let mut layer = Sigmoid::new(1.);

        let x = Matrix::from_host(&device, 1, 3, &[0., 100., -100.]).unwrap();
        let a = layer.forward(x).unwrap().to_host();

        assert_eq!(a[0], 0.5);
        assert!((a[1] - 1.).abs() < 1e-6);
        assert!(a[2].abs() < 1e-6);

        let d = Matrix::from_host(&device, 1, 3, &[1., 1., 1.]).unwrap();
        let dx = layer.backward(d).unwrap().to_host();

        assert_eq!(dx[0], 0.25);
        assert!(dx[1].abs() < 1e-6);
    }

    #[test]
    fn amplitude_scales_output_and_derivative() {
        let device = Device::cpu().unwrap();
        let mut layer = Sigmoid::new(2.);

        let x = Matrix::from_host(&device, 1, 1, &[0.]).unwrap();
        assert_eq!(layer.forward(x).unwrap().to_host(), [1.]);

        let d = Matrix::from_host(&device, 1, 1, &[1.]).unwrap();
        assert_eq!(layer.backward(d).unwrap().to_host(), [0.5]);
    }

    #[test]
    fn backward_without_forward_fails() {
        let device = Device::cpu().unwrap();
        let mut layer = Sigmoid::new(1.);
        let d = Matrix::from_host(&device, 1, 1, &[1.]).unwrap();

        assert!(matches!(
            layer.backward(d),
            Err(MlErr::UninitializedGradient { layer: "sigmoid" })
        ));
    }

    #[test]
    fn has_no_params() {
        let mut layer = Sigmoid::new(1.);

        assert!(layer.params().unwrap().is_none());
        assert_eq!(layer.size(), 0);
    }
}
