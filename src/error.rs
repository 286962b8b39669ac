use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The crate's error type.
#[derive(Debug)]
pub enum MlErr {
    /// A binary operation was invoked on operands of incompatible dimensions.
    ShapeMismatch {
        op: &'static str,
        lhs: (usize, usize),
        rhs: (usize, usize),
    },
    /// A buffer was requested with a zero dimension, or the host data backing
    /// it doesn't have `rows * cols` elements.
    InvalidShape {
        rows: usize,
        cols: usize,
        len: usize,
    },
    /// The operands of a binary operation live on different devices.
    DeviceMismatch { op: &'static str },
    /// Gradients were requested from a layer that has no fresh ones, either
    /// because `backward` ran without a matching `forward` or because the
    /// deltas were already consumed.
    UninitializedGradient { layer: &'static str },
    /// The device can't provide the requested amount of bytes.
    AllocationFailure { requested: usize, available: usize },
    /// Persisted data is truncated, malformed or incompatible with its target.
    SerializationFailure(String),
    /// A forward or backward pass was requested on a model without layers.
    EmptyModel,
    InvalidConfig(String),
    /// The device's compute context couldn't be created.
    Device(String),
    Io(io::Error),
}

impl MlErr {
    pub(crate) fn shape_mismatch(
        op: &'static str,
        lhs: (usize, usize),
        rhs: (usize, usize),
    ) -> Self {
        Self::ShapeMismatch { op, lhs, rhs }
    }

    pub(crate) fn serialization<S: Into<String>>(reason: S) -> Self {
        Self::SerializationFailure(reason.into())
    }
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::ShapeMismatch { op, lhs, rhs } => write!(
                f,
                "shape mismatch on {op}: got {}x{} and {}x{}",
                lhs.0, lhs.1, rhs.0, rhs.1
            ),
            MlErr::InvalidShape { rows, cols, len } => write!(
                f,
                "invalid shape {rows}x{cols} for a buffer of {len} elements"
            ),
            MlErr::DeviceMismatch { op } => {
                write!(f, "the operands of {op} live on different devices")
            }
            MlErr::UninitializedGradient { layer } => {
                write!(f, "the {layer} layer has no fresh gradients")
            }
            MlErr::AllocationFailure {
                requested,
                available,
            } => write!(
                f,
                "failed to allocate {requested} bytes on device, only {available} available"
            ),
            MlErr::SerializationFailure(reason) => write!(f, "serialization failure: {reason}"),
            MlErr::EmptyModel => write!(f, "the model has no layers"),
            MlErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            MlErr::Device(msg) => write!(f, "device error: {msg}"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::UnexpectedEof => Self::serialization("truncated input"),
            _ => Self::Io(value),
        }
    }
}

impl From<rand_distr::uniform::Error> for MlErr {
    fn from(value: rand_distr::uniform::Error) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}

impl From<rand_distr::NormalError> for MlErr {
    fn from(value: rand_distr::NormalError) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}
