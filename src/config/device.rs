use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// The configuration of a compute device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// A name for the device, its workers are named after it.
    pub name: String,
    /// The amount of workers, `None` lets the pool pick one per core.
    pub threads: Option<NonZeroUsize>,
    /// The maximum amount of bytes live buffers may hold, `None` for no limit.
    pub memory_limit: Option<usize>,
}

impl DeviceConfig {
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_threads(mut self, threads: NonZeroUsize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "cpu".into(),
            threads: None,
            memory_limit: None,
        }
    }
}
