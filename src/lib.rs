pub mod arch;
pub mod config;
pub mod device;
pub mod error;
pub mod initialization;
pub mod optimization;
mod persistence;
pub mod tensor;

pub use error::{MlErr, Result};
