mod device;
mod model;

pub use device::DeviceConfig;
pub use model::{ActFnConfig, LayerConfig, ModelConfig, ParamGenConfig};
