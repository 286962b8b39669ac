mod matrix;
mod vector;

pub use matrix::Matrix;
pub use vector::Vector;

#[cfg(test)]
pub(crate) use matrix::transpose;

use crate::{MlErr, Result};

/// Allocates `len` zeros on the host, failing instead of aborting when the memory isn't there.
fn zeroed(len: usize) -> Result<Vec<f32>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| MlErr::AllocationFailure {
            requested: len.saturating_mul(size_of::<f32>()),
            available: 0,
        })?;

    buf.resize(len, 0.);
    Ok(buf)
}
