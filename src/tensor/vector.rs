use ndarray::{Array1, ArrayView1, Zip};

use crate::{
    MlErr, Result,
    device::{Device, Reservation},
    tensor::zeroed,
};

/// A rank-1 buffer of `f32` living on a `Device`.
///
/// The vector owns its memory exclusively and gives it back to the device when dropped. Its
/// length is fixed at construction.
pub struct Vector {
    data: Array1<f32>,
    mem: Reservation,
}

impl Vector {
    /// Creates a new `Vector` by copying host data onto the device.
    ///
    /// # Arguments
    /// * `device` - The device to allocate on.
    /// * `data` - The host values, must not be empty.
    pub fn from_host(device: &Device, data: &[f32]) -> Result<Self> {
        Self::from_vec(device, data.to_vec())
    }

    /// Creates a new `Vector` taking ownership of `data` without copying it.
    pub fn from_vec(device: &Device, data: Vec<f32>) -> Result<Self> {
        Self::from_array(device, Array1::from(data))
    }

    /// Wraps an already materialized array, transferring its ownership to the device.
    pub fn from_array(device: &Device, data: Array1<f32>) -> Result<Self> {
        let len = data.len();
        check_len(len)?;

        let mem = device.reserve(len)?;
        Ok(Self { data, mem })
    }

    /// Creates a new zero filled `Vector` of length `len`.
    pub fn zeros(device: &Device, len: usize) -> Result<Self> {
        check_len(len)?;

        let mem = device.reserve(len)?;
        let data = Array1::from(zeroed(len)?);
        Ok(Self { data, mem })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always `false`, vectors have at least one element.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn device(&self) -> &Device {
        self.mem.device()
    }

    /// Copies the values back to the host.
    pub fn to_host(&self) -> Vec<f32> {
        self.data.to_vec()
    }

    /// Copies this vector into a new buffer on the same device.
    pub fn try_clone(&self) -> Result<Self> {
        let mem = self.device().reserve(self.len())?;
        let data = self.data.clone();
        Ok(Self { data, mem })
    }

    /// Adds `other` elementwise in place.
    pub fn add(&mut self, other: &Vector) -> Result<()> {
        self.zip_mut_with(other, "add", |a, b| *a += b)
    }

    /// Subtracts `other` elementwise in place.
    pub fn subtract(&mut self, other: &Vector) -> Result<()> {
        self.zip_mut_with(other, "subtract", |a, b| *a -= b)
    }

    /// Multiplies every element by `factor` in place.
    pub fn scale(&mut self, factor: f32) {
        let Self { data, mem } = self;
        mem.device().run(|| data.par_mapv_inplace(|x| x * factor));
    }

    /// Computes `self -= factor * other` in place, without allocating.
    pub(crate) fn scaled_subtract(&mut self, other: &Vector, factor: f32) -> Result<()> {
        self.zip_mut_with(other, "scaled_subtract", |a, b| *a -= factor * b)
    }

    pub(crate) fn view(&self) -> ArrayView1<'_, f32> {
        self.data.view()
    }

    pub(crate) fn data_mut(&mut self) -> &mut Array1<f32> {
        &mut self.data
    }

    fn zip_mut_with<F>(&mut self, other: &Vector, op: &'static str, f: F) -> Result<()>
    where
        F: Fn(&mut f32, f32) + Send + Sync,
    {
        if !self.device().same(other.device()) {
            return Err(MlErr::DeviceMismatch { op });
        }

        if self.len() != other.len() {
            return Err(MlErr::shape_mismatch(op, (1, self.len()), (1, other.len())));
        }

        let Self { data, mem } = self;
        mem.device().run(|| {
            Zip::from(data)
                .and(&other.data)
                .par_for_each(|a, &b| f(a, b))
        });

        Ok(())
    }
}

fn check_len(len: usize) -> Result<()> {
    if len == 0 {
        return Err(MlErr::InvalidShape {
            rows: 1,
            cols: 0,
            len,
        });
    }

    Ok(())
}
