use std::io::{Read, Write};

use super::{Layer, Params, StagedParams};
use crate::{
    MlErr, Result,
    persistence::{self, LayerTag},
    tensor::Matrix,
};

/// An activation layer applying `max(0, z)` to every element.
#[derive(Default)]
pub struct Relu {
    x: Option<Matrix>,
}

impl Relu {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for Relu {
    fn forward(&mut self, x: Matrix) -> Result<Matrix> {
        let mut a = x.try_clone()?;
        a.map_inplace(|z| z.max(0.));

        self.x = Some(x);
        Ok(a)
    }

    fn backward(&mut self, mut d: Matrix) -> Result<Matrix> {
        let x = self.x.take().ok_or(MlErr::UninitializedGradient { layer: self.name() })?;

        d.zip_mut_with(&x, "relu", |d, z| {
            if z <= 0. {
                *d = 0.;
            }
        })?;

        Ok(d)
    }

    fn params(&mut self) -> Result<Option<Params<'_>>> {
        Ok(None)
    }

    fn write(&self, sink: &mut dyn Write) -> Result<()> {
        persistence::write_layer_header(sink, LayerTag::Relu)
    }

    fn read(&self, source: &mut dyn Read) -> Result<Option<StagedParams>> {
        persistence::read_layer_header(source, LayerTag::Relu)?;
        Ok(None)
    }

    fn size(&self) -> usize {
        0
    }

    fn name(&self) -> &'static str {
        "relu"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;

    #[test]
    fn masks_negative_inputs() {
        let device = Device::cpu().unwrap();
        let mut layer = Relu::new();

        let x = Matrix::from_host(&device, 2, 2, &[-1., 2., 0., 3.]).unwrap();
        assert_eq!(layer.forward(x).unwrap().to_host(), [0., 2., 0., 3.]);

        let d = Matrix::from_host(&device, 2, 2, &[5., 5., 5., 5.]).unwrap();
        assert_eq!(layer.backward(d).unwrap().to_host(), [0., 5., 0., 5.]);
    }

    #[test]
    fn gradient_shape_must_match_input() {
        let device = Device::cpu().unwrap();
        let mut layer = Relu::new();

        layer
            .forward(Matrix::from_host(&device, 1, 2, &[1., 2.]).unwrap())
            .unwrap();

        let d = Matrix::from_host(&device, 2, 1, &[1., 1.]).unwrap();
        assert!(matches!(
            layer.backward(d),
            Err(MlErr::ShapeMismatch { op: "relu", .. })
        ));
    }
}
