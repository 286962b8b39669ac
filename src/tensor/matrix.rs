use log::trace;
use ndarray::{Array2, ArrayView1, ArrayView2, Zip, linalg};

use super::Vector;
use crate::{
    MlErr, Result,
    device::{Device, Reservation},
    tensor::zeroed,
};

/// A rank-2 row-major buffer of `f32` living on a `Device`.
///
/// Activation batches are laid out with one sample per row and one feature per column, weight
/// matrices as `(inputs, outputs)`.
///
/// Every binary operation validates shapes and devices before reserving or touching any memory.
pub struct Matrix {
    data: Array2<f32>,
    mem: Reservation,
}

impl Matrix {
    /// Creates a new `Matrix` by copying row-major host data onto the device.
    ///
    /// # Arguments
    /// * `device` - The device to allocate on.
    /// * `rows` - The amount of rows.
    /// * `cols` - The amount of columns.
    /// * `data` - The host values, must hold exactly `rows * cols` elements.
    pub fn from_host(device: &Device, rows: usize, cols: usize, data: &[f32]) -> Result<Self> {
        check_shape(rows, cols, data.len())?;
        Self::from_vec(device, rows, cols, data.to_vec())
    }

    /// Creates a new `Matrix` taking ownership of the row-major `data` without copying it.
    pub fn from_vec(device: &Device, rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        check_shape(rows, cols, data.len())?;

        let mem = device.reserve(data.len())?;
        let len = data.len();
        let data = Array2::from_shape_vec((rows, cols), data)
            .map_err(|_| MlErr::InvalidShape { rows, cols, len })?;

        Ok(Self { data, mem })
    }

    /// Wraps an already materialized array, transferring its ownership to the device.
    pub fn from_array(device: &Device, data: Array2<f32>) -> Result<Self> {
        let (rows, cols) = data.dim();
        check_shape(rows, cols, data.len())?;

        let mem = device.reserve(data.len())?;
        Ok(Self { data, mem })
    }

    /// Creates a new zero filled `Matrix` of shape `(rows, cols)`.
    pub fn zeros(device: &Device, rows: usize, cols: usize) -> Result<Self> {
        let len = element_count(rows, cols)?;

        let mem = device.reserve(len)?;
        let data = Array2::from_shape_vec((rows, cols), zeroed(len)?)
            .map_err(|_| MlErr::InvalidShape { rows, cols, len })?;

        Ok(Self { data, mem })
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// The total amount of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always `false`, matrices have at least one element.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn device(&self) -> &Device {
        self.mem.device()
    }

    /// Copies the values back to the host in row-major order.
    pub fn to_host(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    /// Copies the values back to the host as an `ndarray` array.
    pub fn to_array(&self) -> Array2<f32> {
        self.data.to_owned()
    }

    /// Copies this matrix into a new buffer on the same device.
    pub fn try_clone(&self) -> Result<Self> {
        let mem = self.device().reserve(self.len())?;
        let data = self.data.clone();
        Ok(Self { data, mem })
    }

    /// Adds `other` elementwise in place.
    pub fn add(&mut self, other: &Matrix) -> Result<()> {
        self.zip_mut_with(other, "add", |a, b| *a += b)
    }

    /// Subtracts `other` elementwise in place.
    pub fn subtract(&mut self, other: &Matrix) -> Result<()> {
        self.zip_mut_with(other, "subtract", |a, b| *a -= b)
    }

    /// Adds `bias` to every row in place.
    ///
    /// This is the only broadcasting rule there is, `bias` must have one element per column.
    pub fn add_vector(&mut self, bias: &Vector) -> Result<()> {
        const OP: &str = "add_vector";

        self.check_device(bias.device(), OP)?;
        if bias.len() != self.cols() {
            return Err(MlErr::shape_mismatch(OP, self.shape(), (1, bias.len())));
        }

        let b = bias.view();
        let Self { data, mem } = self;
        mem.device().run(|| {
            Zip::from(data.rows_mut()).par_for_each(|mut row| row += &b);
        });

        Ok(())
    }

    /// Multiplies every element by `factor` in place.
    pub fn scale(&mut self, factor: f32) {
        self.map_inplace(|x| x * factor);
    }

    /// Computes `self × other`.
    ///
    /// # Returns
    /// A new `(self.rows, other.cols)` matrix, or `ShapeMismatch` if `self.cols != other.rows`.
    pub fn multiply(&self, other: &Matrix) -> Result<Matrix> {
        const OP: &str = "multiply";

        self.check_device(other.device(), OP)?;
        if self.cols() != other.rows() {
            return Err(MlErr::shape_mismatch(OP, self.shape(), other.shape()));
        }

        let mut out = Matrix::zeros(self.device(), self.rows(), other.cols())?;
        self.gemm(&self.data.view(), &other.data.view(), &mut out, OP);
        Ok(out)
    }

    /// Computes `self × otherᵗ` without materializing the transposition.
    ///
    /// # Returns
    /// A new `(self.rows, other.rows)` matrix, or `ShapeMismatch` if `self.cols != other.cols`.
    pub fn multiply_by_transposition(&self, other: &Matrix) -> Result<Matrix> {
        const OP: &str = "multiply_by_transposition";

        self.check_device(other.device(), OP)?;
        if self.cols() != other.cols() {
            return Err(MlErr::shape_mismatch(OP, self.shape(), other.shape()));
        }

        let mut out = Matrix::zeros(self.device(), self.rows(), other.rows())?;
        self.gemm(&self.data.view(), &other.data.t(), &mut out, OP);
        Ok(out)
    }

    /// Computes `selfᵗ × other` without materializing the transposition.
    ///
    /// # Returns
    /// A new `(self.cols, other.cols)` matrix, or `ShapeMismatch` if `self.rows != other.rows`.
    pub fn transpose_and_multiply(&self, other: &Matrix) -> Result<Matrix> {
        const OP: &str = "transpose_and_multiply";

        self.check_device(other.device(), OP)?;
        if self.rows() != other.rows() {
            return Err(MlErr::shape_mismatch(OP, self.shape(), other.shape()));
        }

        let mut out = Matrix::zeros(self.device(), self.cols(), other.cols())?;
        self.gemm(&self.data.t(), &other.data.view(), &mut out, OP);
        Ok(out)
    }

    /// Averages every column over all the rows.
    ///
    /// # Returns
    /// A new vector with one element per column.
    pub fn mean_x(&self) -> Result<Vector> {
        let rows = self.rows() as f32;
        self.reduce_columns(|col| col.sum() / rows)
    }

    /// Sums every column over all the rows.
    ///
    /// # Returns
    /// A new vector with one element per column.
    pub fn sum_x(&self) -> Result<Vector> {
        self.reduce_columns(|col| col.sum())
    }

    /// Computes `self -= factor * other` in place, without allocating.
    pub(crate) fn scaled_subtract(&mut self, other: &Matrix, factor: f32) -> Result<()> {
        self.zip_mut_with(other, "scaled_subtract", |a, b| *a -= factor * b)
    }

    fn reduce_columns<F>(&self, f: F) -> Result<Vector>
    where
        F: Fn(ArrayView1<f32>) -> f32 + Send + Sync,
    {
        let mut out = Vector::zeros(self.device(), self.cols())?;
        let data = &self.data;

        self.device().run(|| {
            Zip::from(out.data_mut())
                .and(data.columns())
                .par_for_each(|acc, col| *acc = f(col));
        });

        Ok(out)
    }

    /// Applies `f` to every element in place.
    pub(crate) fn map_inplace<F>(&mut self, f: F)
    where
        F: Fn(f32) -> f32 + Send + Sync,
    {
        let Self { data, mem } = self;
        mem.device().run(|| data.par_mapv_inplace(f));
    }

    /// Replaces every element `a` of this matrix with `f(a, b)`, where `b` is the element of
    /// `other` at the same position.
    pub(crate) fn zip_mut_with<F>(&mut self, other: &Matrix, op: &'static str, f: F) -> Result<()>
    where
        F: Fn(&mut f32, f32) + Send + Sync,
    {
        self.check_same_shape(other, op)?;

        let Self { data, mem } = self;
        mem.device().run(|| {
            Zip::from(data)
                .and(&other.data)
                .par_for_each(|a, &b| f(a, b))
        });

        Ok(())
    }

    /// Folds every pair of elements at the same position of both matrices.
    pub(crate) fn zip_fold<F>(&self, other: &Matrix, op: &'static str, f: F) -> Result<f32>
    where
        F: Fn(f32, f32, f32) -> f32 + Send + Sync,
    {
        self.check_same_shape(other, op)?;

        let acc = self.device().run(|| {
            Zip::from(&self.data)
                .and(&other.data)
                .fold(0., |acc, &a, &b| f(acc, a, b))
        });

        Ok(acc)
    }

    pub(crate) fn check_same_shape(&self, other: &Matrix, op: &'static str) -> Result<()> {
        self.check_device(other.device(), op)?;
        if self.shape() != other.shape() {
            return Err(MlErr::shape_mismatch(op, self.shape(), other.shape()));
        }

        Ok(())
    }

    fn check_device(&self, other: &Device, op: &'static str) -> Result<()> {
        if !self.device().same(other) {
            return Err(MlErr::DeviceMismatch { op });
        }

        Ok(())
    }

    /// Writes `a × b` into `out`, `a` and `b` may be transposed views.
    fn gemm(&self, a: &ArrayView2<f32>, b: &ArrayView2<f32>, out: &mut Matrix, op: &'static str) {
        trace!(
            op = op,
            m = a.nrows(),
            k = a.ncols(),
            n = b.ncols();
            "dispatching gemm"
        );

        let c = &mut out.data;
        self.device()
            .run(|| linalg::general_mat_mul(1., a, b, 0., c));
    }
}

/// Builds the transposition of `m` on the same device. Only meant as a reference for the fused
/// kernels.
#[cfg(test)]
pub(crate) fn transpose(m: &Matrix) -> Matrix {
    let t = m.data.t().as_standard_layout().into_owned();
    Matrix::from_array(m.device(), t).unwrap()
}

fn check_shape(rows: usize, cols: usize, len: usize) -> Result<()> {
    match rows.checked_mul(cols) {
        Some(count) if count > 0 && count == len => Ok(()),
        _ => Err(MlErr::InvalidShape { rows, cols, len }),
    }
}

/// The amount of elements of a `rows × cols` matrix, if it can be represented.
fn element_count(rows: usize, cols: usize) -> Result<usize> {
    match rows.checked_mul(cols) {
        Some(len) if len > 0 => Ok(len),
        _ => Err(MlErr::InvalidShape { rows, cols, len: 0 }),
    }
}

impl std::fmt::Debug for Matrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matrix")
            .field("shape", &self.shape())
            .field("device", &self.device().name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use ndarray_rand::{RandomExt, rand_distr::StandardNormal};

    use super::*;

    const TOLERANCE: f32 = 1e-4;

    fn device() -> Device {
        Device::cpu().unwrap()
    }

    fn matrix(device: &Device, data: Array2<f32>) -> Matrix {
        Matrix::from_array(device, data).unwrap()
    }

    fn random(device: &Device, rows: usize, cols: usize) -> Matrix {
        matrix(device, Array2::random((rows, cols), StandardNormal))
    }

    fn assert_close(a: &Matrix, b: &Matrix) {
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.to_host().into_iter().zip(b.to_host()) {
            assert!((x - y).abs() < TOLERANCE, "{x} != {y}");
        }
    }

    #[test]
    fn host_round_trip_is_row_major() {
        let device = device();
        let m = Matrix::from_host(&device, 2, 3, &[1., 2., 3., 4., 5., 6.]).unwrap();

        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m.to_array(), array![[1., 2., 3.], [4., 5., 6.]]);
        assert_eq!(m.to_host(), [1., 2., 3., 4., 5., 6.]);
    }

    #[test]
    fn invalid_shapes_are_rejected() {
        let device = device();

        assert!(matches!(
            Matrix::from_host(&device, 2, 2, &[1., 2., 3.]),
            Err(MlErr::InvalidShape { .. })
        ));
        assert!(Matrix::zeros(&device, 0, 3).is_err());
        assert_eq!(device.allocated(), 0);
    }

    #[test]
    fn add_and_subtract() {
        let device = device();
        let mut a = matrix(&device, array![[1., 2.], [3., 4.]]);
        let b = matrix(&device, array![[1., 1.], [2., 2.]]);

        a.add(&b).unwrap();
        assert_eq!(a.to_array(), array![[2., 3.], [5., 6.]]);

        a.subtract(&b).unwrap();
        a.subtract(&b).unwrap();
        assert_eq!(a.to_array(), array![[0., 1.], [1., 2.]]);
    }

    #[test]
    fn add_with_different_shape_leaves_receiver_untouched() {
        let device = device();
        let mut a = matrix(&device, array![[1., 2.], [3., 4.]]);
        let b = matrix(&device, array![[1., 1.]]);

        assert!(matches!(a.add(&b), Err(MlErr::ShapeMismatch { op: "add", .. })));
        assert_eq!(a.to_array(), array![[1., 2.], [3., 4.]]);
    }

    #[test]
    fn add_vector_broadcasts_over_rows() {
        let device = device();
        let mut a = matrix(&device, array![[1., 2., 3.], [4., 5., 6.]]);
        let b = Vector::from_host(&device, &[10., 20., 30.]).unwrap();

        a.add_vector(&b).unwrap();
        assert_eq!(a.to_array(), array![[11., 22., 33.], [14., 25., 36.]]);

        let wrong = Vector::from_host(&device, &[1., 2.]).unwrap();
        assert!(matches!(
            a.add_vector(&wrong),
            Err(MlErr::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn scale() {
        let device = device();
        let mut a = matrix(&device, array![[1., -2.], [0.5, 4.]]);

        a.scale(-2.);
        assert_eq!(a.to_array(), array![[-2., 4.], [-1., -8.]]);
    }

    #[test]
    fn multiply_small_case() {
        let device = device();
        let a = matrix(&device, array![[1., 2., 3.], [4., 5., 6.]]);
        let b = matrix(&device, array![[7., 8.], [9., 10.], [11., 12.]]);

        let c = a.multiply(&b).unwrap();

        assert_eq!(c.shape(), (2, 2));
        assert_eq!(c.to_array(), array![[58., 64.], [139., 154.]]);
    }

    #[test]
    fn multiply_with_mismatched_inner_dims_does_not_allocate() {
        let device = device();
        let a = matrix(&device, array![[1., 2., 3.], [4., 5., 6.]]);
        let b = matrix(&device, array![[1., 2.], [3., 4.]]);
        let before = device.allocated();

        let res = a.multiply(&b);

        assert!(matches!(
            res,
            Err(MlErr::ShapeMismatch {
                op: "multiply",
                lhs: (2, 3),
                rhs: (2, 2),
            })
        ));
        assert_eq!(device.allocated(), before);
    }

    #[test]
    fn multiply_by_transposition_matches_reference() {
        let device = device();
        let a = random(&device, 5, 7);
        let b = random(&device, 3, 7);

        let fused = a.multiply_by_transposition(&b).unwrap();
        let reference = a.multiply(&transpose(&b)).unwrap();

        assert_eq!(fused.shape(), (5, 3));
        assert_close(&fused, &reference);
    }

    #[test]
    fn multiply_by_transposition_checks_columns() {
        let device = device();
        let a = random(&device, 2, 3);
        let b = random(&device, 3, 2);

        assert!(matches!(
            a.multiply_by_transposition(&b),
            Err(MlErr::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn transpose_and_multiply_matches_reference() {
        let device = device();
        let a = random(&device, 6, 4);
        let b = random(&device, 6, 2);

        let fused = a.transpose_and_multiply(&b).unwrap();
        let reference = transpose(&a).multiply(&b).unwrap();

        assert_eq!(fused.shape(), (4, 2));
        assert_close(&fused, &reference);
    }

    #[test]
    fn transpose_and_multiply_checks_rows() {
        let device = device();
        let a = random(&device, 2, 3);
        let b = random(&device, 3, 3);

        assert!(matches!(
            a.transpose_and_multiply(&b),
            Err(MlErr::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn mean_x_averages_columns() {
        let device = device();
        let a = matrix(&device, array![[1., 2., 3.], [3., 6., -3.]]);

        let mean = a.mean_x().unwrap();
        assert_eq!(mean.to_host(), [2., 4., 0.]);
    }

    #[test]
    fn sum_x_adds_columns() {
        let device = device();
        let a = matrix(&device, array![[1., 2., 3.], [3., 6., -3.]]);

        assert_eq!(a.sum_x().unwrap().to_host(), [4., 8., 0.]);
    }

    #[test]
    fn scaled_subtract_in_place() {
        let device = device();
        let mut a = matrix(&device, array![[1., 2.], [3., 4.]]);
        let b = matrix(&device, array![[2., 2.], [-2., 0.]]);
        let before = device.allocated();

        a.scaled_subtract(&b, 0.5).unwrap();

        assert_eq!(a.to_array(), array![[0., 1.], [4., 4.]]);
        assert_eq!(device.allocated(), before);
    }

    #[test]
    fn overflowing_shapes_are_rejected() {
        let device = device();

        assert!(matches!(
            Matrix::zeros(&device, usize::MAX / 2 + 1, 2),
            Err(MlErr::InvalidShape { .. })
        ));
        assert!(matches!(
            Matrix::from_host(&device, usize::MAX, 2, &[1., 2.]),
            Err(MlErr::InvalidShape { .. })
        ));
        assert!(matches!(
            Matrix::zeros(&device, usize::MAX / 4, 2),
            Err(MlErr::AllocationFailure { .. })
        ));
        assert_eq!(device.allocated(), 0);
    }

    #[test]
    fn mean_x_of_a_single_row_is_the_row() {
        let device = device();
        let a = matrix(&device, array![[0.1, -7.25, 3.5]]);

        assert_eq!(a.mean_x().unwrap().to_host(), [0.1, -7.25, 3.5]);
    }

    #[test]
    fn operands_must_share_device() {
        let a = random(&device(), 2, 2);
        let b = random(&device(), 2, 2);

        assert!(matches!(
            a.multiply(&b),
            Err(MlErr::DeviceMismatch { op: "multiply" })
        ));
    }

    #[test]
    fn results_are_accounted_on_the_device() {
        let device = device();
        let a = random(&device, 4, 4);
        let b = random(&device, 4, 4);
        assert_eq!(device.allocated(), 2 * 16 * 4);

        let c = a.multiply(&b).unwrap();
        assert_eq!(device.allocated(), 3 * 16 * 4);

        drop(c);
        assert_eq!(device.allocated(), 2 * 16 * 4);
    }
}
