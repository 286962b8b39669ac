use std::{cell::RefCell, env, rc::Rc};

use feedforward::{
    Result,
    arch::loss::Mse,
    config::{DeviceConfig, ModelConfig},
    device::Device,
    optimization::GradientDescent,
    tensor::Matrix,
};
use log::info;
use rand::{SeedableRng, rngs::StdRng};

const DEFAULT_EPOCHS: usize = 5000;
const LEARNING_RATE: f32 = 2.5;

const MODEL: &str = r#"{
    "sequential": {
        "layers": [
            { "dense": { "input": 2, "output": 4, "init": "xavier_uniform", "act_fn": { "sigmoid": { "amp": 1.0 } } } },
            { "dense": { "input": 4, "output": 1, "init": "xavier_uniform", "act_fn": { "sigmoid": { "amp": 1.0 } } } }
        ]
    }
}"#;

#[rustfmt::skip]
const XOR: [f32; 12] = [
    0.0, 0.0, 0.0,
    0.0, 1.0, 1.0,
    1.0, 0.0, 1.0,
    1.0, 1.0, 0.0,
];

fn main() -> Result<()> {
    env_logger::init();

    let epochs = env::var("EPOCHS")
        .ok()
        .and_then(|epochs| epochs.parse().ok())
        .unwrap_or(DEFAULT_EPOCHS);

    let device = Device::new(&DeviceConfig::default())?;
    let config = ModelConfig::from_json(MODEL)?;
    let optimizer = Rc::new(RefCell::new(GradientDescent::new(LEARNING_RATE)));
    let mut rng = StdRng::seed_from_u64(42);
    let mut model = config.build(&device, Mse, optimizer, &mut rng)?;

    let xs: Vec<f32> = XOR.chunks(3).flat_map(|row| [row[0], row[1]]).collect();
    let ys: Vec<f32> = XOR.chunks(3).map(|row| row[2]).collect();
    let y = Matrix::from_host(&device, 4, 1, &ys)?;

    for epoch in 0..epochs {
        let x = Matrix::from_host(&device, 4, 2, &xs)?;
        let loss = model.train_step(x, &y)?;

        if epoch % 500 == 0 {
            info!("epoch {epoch}: loss {loss}");
        }
    }

    let y_pred = model.forward(Matrix::from_host(&device, 4, 2, &xs)?)?;
    for (sample, pred) in xs.chunks(2).zip(y_pred.to_host()) {
        println!("{} xor {} = {pred:.3}", sample[0], sample[1]);
    }

    info!("allocated {} bytes on {}", device.allocated(), device.name());
    Ok(())
}
