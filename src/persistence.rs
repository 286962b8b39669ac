//! The binary layout of persisted layers and models.
//!
//! Every header field is big endian. Payloads are the raw `f32` values in row-major order, in the
//! platform's native byte order.
//!
//! ```text
//! layer  := b"FFLY" version:u16 tag:u8 body
//! dense  := matrix vector
//! matrix := rows:u64 cols:u64 payload
//! vector := len:u64 payload
//! model  := b"FFSQ" version:u16 count:u32 layer*
//! ```

use std::io::{Read, Write};

use crate::{
    MlErr, Result,
    device::Device,
    tensor::{Matrix, Vector},
};

const LAYER_MAGIC: [u8; 4] = *b"FFLY";
const MODEL_MAGIC: [u8; 4] = *b"FFSQ";
const VERSION: u16 = 1;

type Dim = u64;

/// Identifies the kind of a persisted layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum LayerTag {
    Dense = 1,
    Sigmoid = 2,
    Relu = 3,
}

impl TryFrom<u8> for LayerTag {
    type Error = MlErr;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Dense),
            2 => Ok(Self::Sigmoid),
            3 => Ok(Self::Relu),
            tag => Err(MlErr::serialization(format!("unknown layer tag {tag}"))),
        }
    }
}

pub(crate) fn write_layer_header(sink: &mut dyn Write, tag: LayerTag) -> Result<()> {
    sink.write_all(&LAYER_MAGIC)?;
    sink.write_all(&VERSION.to_be_bytes())?;
    sink.write_all(&[tag as u8])?;
    Ok(())
}

/// Reads a layer header, failing unless it belongs to a layer of kind `expected`.
pub(crate) fn read_layer_header(source: &mut dyn Read, expected: LayerTag) -> Result<()> {
    read_preamble(source, LAYER_MAGIC)?;

    let mut tag = [0; 1];
    source.read_exact(&mut tag)?;
    let tag = LayerTag::try_from(tag[0])?;

    if tag != expected {
        return Err(MlErr::serialization(format!(
            "expected a {expected:?} layer, found a {tag:?} layer"
        )));
    }

    Ok(())
}

pub(crate) fn write_model_header(sink: &mut dyn Write, count: usize) -> Result<()> {
    let count = u32::try_from(count)
        .map_err(|_| MlErr::serialization(format!("too many layers to persist: {count}")))?;

    sink.write_all(&MODEL_MAGIC)?;
    sink.write_all(&VERSION.to_be_bytes())?;
    sink.write_all(&count.to_be_bytes())?;
    Ok(())
}

/// Reads a model header.
///
/// # Returns
/// The amount of layers that follow.
pub(crate) fn read_model_header(source: &mut dyn Read) -> Result<usize> {
    read_preamble(source, MODEL_MAGIC)?;

    let mut count = [0; size_of::<u32>()];
    source.read_exact(&mut count)?;
    Ok(u32::from_be_bytes(count) as usize)
}

pub(crate) fn write_matrix(sink: &mut dyn Write, m: &Matrix) -> Result<()> {
    write_dim(sink, m.rows())?;
    write_dim(sink, m.cols())?;
    write_payload(sink, &m.to_host())
}

/// Reads a matrix, validating its shape against `expected` before allocating it on `device`.
pub(crate) fn read_matrix(
    source: &mut dyn Read,
    device: &Device,
    expected: (usize, usize),
) -> Result<Matrix> {
    let rows = read_dim(source)?;
    let cols = read_dim(source)?;

    if (rows, cols) != expected {
        return Err(MlErr::serialization(format!(
            "expected a {}x{} matrix, found a {rows}x{cols} one",
            expected.0, expected.1
        )));
    }

    let payload = read_payload(source, rows * cols)?;
    Matrix::from_vec(device, rows, cols, payload)
}

pub(crate) fn write_vector(sink: &mut dyn Write, v: &Vector) -> Result<()> {
    write_dim(sink, v.len())?;
    write_payload(sink, &v.to_host())
}

/// Reads a vector, validating its length against `expected` before allocating it on `device`.
pub(crate) fn read_vector(source: &mut dyn Read, device: &Device, expected: usize) -> Result<Vector> {
    let len = read_dim(source)?;

    if len != expected {
        return Err(MlErr::serialization(format!(
            "expected a vector of length {expected}, found one of length {len}"
        )));
    }

    let payload = read_payload(source, len)?;
    Vector::from_vec(device, payload)
}

fn read_preamble(source: &mut dyn Read, expected: [u8; 4]) -> Result<()> {
    let mut magic = [0; 4];
    source.read_exact(&mut magic)?;

    if magic != expected {
        return Err(MlErr::serialization(format!(
            "bad magic {magic:?}, expected {expected:?}"
        )));
    }

    let mut version = [0; size_of::<u16>()];
    source.read_exact(&mut version)?;
    let version = u16::from_be_bytes(version);

    if version != VERSION {
        return Err(MlErr::serialization(format!(
            "unsupported version {version}, expected {VERSION}"
        )));
    }

    Ok(())
}

fn write_dim(sink: &mut dyn Write, dim: usize) -> Result<()> {
    sink.write_all(&(dim as Dim).to_be_bytes())?;
    Ok(())
}

fn read_dim(source: &mut dyn Read) -> Result<usize> {
    let mut buf = [0; size_of::<Dim>()];
    source.read_exact(&mut buf)?;

    usize::try_from(Dim::from_be_bytes(buf))
        .map_err(|_| MlErr::serialization("dimension doesn't fit in memory"))
}

fn write_payload(sink: &mut dyn Write, nums: &[f32]) -> Result<()> {
    sink.write_all(bytemuck::cast_slice(nums))?;
    Ok(())
}

fn read_payload(source: &mut dyn Read, len: usize) -> Result<Vec<f32>> {
    let mut nums = vec![0f32; len];
    source.read_exact(bytemuck::cast_slice_mut(&mut nums))?;
    Ok(nums)
}
