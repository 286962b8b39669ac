use std::{cell::RefCell, num::NonZeroUsize, rc::Rc};

use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    MlErr, Result,
    arch::{
        Sequential,
        layers::{Dense, Layer, Relu, Sigmoid},
        loss::LossFn,
    },
    device::Device,
    initialization::{ConstParamGen, ParamGen, RandParamGen},
    optimization::Optimizer,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFnConfig {
    Sigmoid { amp: f32 },
    Relu,
}

/// How to initialize a layer's parameters, the fans are taken from the layer's dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamGenConfig {
    Const { value: f32 },
    Uniform { low: f32, high: f32 },
    UniformInclusive { low: f32, high: f32 },
    XavierUniform,
    LecunUniform,
    Normal { mean: f32, std_dev: f32 },
    Kaiming,
    Xavier,
    Lecun,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerConfig {
    Dense {
        input: NonZeroUsize,
        output: NonZeroUsize,
        init: ParamGenConfig,
        act_fn: Option<ActFnConfig>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelConfig {
    Sequential { layers: Vec<LayerConfig> },
}

impl ParamGenConfig {
    /// Creates the parameter generator for a layer with `fan_in` inputs and `fan_out` outputs.
    pub fn build<'r, R: Rng>(
        &self,
        rng: &'r mut R,
        fan_in: usize,
        fan_out: usize,
    ) -> Result<Box<dyn ParamGen + 'r>> {
        let param_gen: Box<dyn ParamGen + 'r> = match *self {
            Self::Const { value } => Box::new(ConstParamGen::new(value)),
            Self::Uniform { low, high } => Box::new(RandParamGen::uniform(rng, low, high)?),
            Self::UniformInclusive { low, high } => {
                Box::new(RandParamGen::uniform_inclusive(rng, low, high)?)
            }
            Self::XavierUniform => Box::new(RandParamGen::xavier_uniform(rng, fan_in, fan_out)?),
            Self::LecunUniform => Box::new(RandParamGen::lecun_uniform(rng, fan_in)?),
            Self::Normal { mean, std_dev } => Box::new(RandParamGen::normal(rng, mean, std_dev)?),
            Self::Kaiming => Box::new(RandParamGen::kaiming(rng, fan_in)?),
            Self::Xavier => Box::new(RandParamGen::xavier(rng, fan_in, fan_out)?),
            Self::Lecun => Box::new(RandParamGen::lecun(rng, fan_in)?),
        };

        Ok(param_gen)
    }
}

impl ActFnConfig {
    pub fn build(&self) -> Box<dyn Layer> {
        match *self {
            Self::Sigmoid { amp } => Box::new(Sigmoid::new(amp)),
            Self::Relu => Box::new(Relu::new()),
        }
    }
}

impl LayerConfig {
    /// Returns the amount of inputs and outputs.
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Self::Dense { input, output, .. } => (input.get(), output.get()),
        }
    }

    /// Creates the layers this configuration stands for, in order.
    pub fn build<R: Rng>(&self, device: &Device, rng: &mut R) -> Result<Vec<Box<dyn Layer>>> {
        let Self::Dense { init, act_fn, .. } = self;
        let dim = self.dim();

        let mut param_gen = init.build(rng, dim.0, dim.1)?;
        let dense = Dense::new(device, dim, &mut param_gen)?;

        let mut layers: Vec<Box<dyn Layer>> = Vec::with_capacity(2);
        layers.push(Box::new(dense));

        if let Some(act_fn) = act_fn {
            layers.push(act_fn.build());
        }

        Ok(layers)
    }
}

impl ModelConfig {
    /// Parses a configuration out of its json representation.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn layers(&self) -> &[LayerConfig] {
        match self {
            Self::Sequential { layers } => layers,
        }
    }

    /// Checks there is at least one layer and that each layer takes as many inputs as the
    /// previous one outputs.
    pub fn validate(&self) -> Result<()> {
        let layers = self.layers();

        if layers.is_empty() {
            return Err(MlErr::InvalidConfig("the model has no layers".into()));
        }

        for (i, pair) in layers.windows(2).enumerate() {
            let (_, out) = pair[0].dim();
            let (inp, _) = pair[1].dim();

            if out != inp {
                return Err(MlErr::InvalidConfig(format!(
                    "layer {i} outputs {out} values but layer {} takes {inp}",
                    i + 1
                )));
            }
        }

        Ok(())
    }

    /// Creates the model this configuration stands for.
    ///
    /// # Arguments
    /// * `device` - The device to allocate every parameter on.
    /// * `loss_fn` - The model's loss function.
    /// * `optimizer` - The model's optimizer.
    /// * `rng` - The random number generator for the initializers that need one.
    pub fn build<L, O, R>(
        &self,
        device: &Device,
        loss_fn: L,
        optimizer: Rc<RefCell<O>>,
        rng: &mut R,
    ) -> Result<Sequential<L, O>>
    where
        L: LossFn,
        O: Optimizer,
        R: Rng,
    {
        self.validate()?;

        let mut model = Sequential::new(loss_fn, optimizer);
        for layer in self.layers() {
            for built in layer.build(device, rng)? {
                model.add_boxed_layer(built);
            }
        }

        info!(
            device = device.name(),
            layers = model.len(),
            params = model.size();
            "model built"
        );

        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{arch::loss::Mse, optimization::GradientDescent, tensor::Matrix};

    const XOR: &str = r#"{
        "sequential": {
            "layers": [
                {
                    "dense": {
                        "input": 2,
                        "output": 3,
                        "init": "xavier_uniform",
                        "act_fn": { "sigmoid": { "amp": 1.0 } }
                    }
                },
                {
                    "dense": {
                        "input": 3,
                        "output": 1,
                        "init": { "const": { "value": 0.25 } },
                        "act_fn": "relu"
                    }
                }
            ]
        }
    }"#;

    #[test]
    fn parses_json() {
        let config = ModelConfig::from_json(XOR).unwrap();
        let layers = config.layers();

        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].dim(), (2, 3));
        assert_eq!(
            layers[1],
            LayerConfig::Dense {
                input: NonZeroUsize::new(3).unwrap(),
                output: NonZeroUsize::new(1).unwrap(),
                init: ParamGenConfig::Const { value: 0.25 },
                act_fn: Some(ActFnConfig::Relu),
            }
        );
    }

    #[test]
    fn missing_act_fn_is_none() {
        let json = r#"{ "sequential": { "layers": [
            { "dense": { "input": 1, "output": 1, "init": "kaiming" } }
        ] } }"#;

        let config = ModelConfig::from_json(json).unwrap();
        let LayerConfig::Dense { act_fn, .. } = config.layers()[0];
        assert!(act_fn.is_none());
    }

    #[test]
    fn rejects_disconnected_layers() {
        let json = r#"{ "sequential": { "layers": [
            { "dense": { "input": 2, "output": 3, "init": "lecun" } },
            { "dense": { "input": 2, "output": 1, "init": "lecun" } }
        ] } }"#;

        assert!(matches!(
            ModelConfig::from_json(json),
            Err(MlErr::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_empty_models() {
        let json = r#"{ "sequential": { "layers": [] } }"#;
        assert!(ModelConfig::from_json(json).is_err());
    }

    #[test]
    fn builds_the_model() {
        let device = Device::cpu().unwrap();
        let config = ModelConfig::from_json(XOR).unwrap();
        let optimizer = Rc::new(RefCell::new(GradientDescent::new(0.1)));
        let mut rng = StdRng::seed_from_u64(3);

        let mut model = config.build(&device, Mse, optimizer, &mut rng).unwrap();

        let names: Vec<_> = model.layers().map(|layer| layer.name()).collect();
        assert_eq!(names, ["dense", "sigmoid", "dense", "relu"]);
        assert_eq!(model.size(), 9 + 4);

        let x = Matrix::from_host(&device, 4, 2, &[0., 0., 0., 1., 1., 0., 1., 1.]).unwrap();
        assert_eq!(model.forward(x).unwrap().shape(), (4, 1));
    }

    #[test]
    fn invalid_initializers_are_reported() {
        let device = Device::cpu().unwrap();
        let layer = LayerConfig::Dense {
            input: NonZeroUsize::new(2).unwrap(),
            output: NonZeroUsize::new(2).unwrap(),
            init: ParamGenConfig::Uniform { low: 1., high: 0. },
            act_fn: None,
        };

        let res = layer.build(&device, &mut StdRng::seed_from_u64(0));
        assert!(matches!(res, Err(MlErr::InvalidConfig(_))));
    }
}
