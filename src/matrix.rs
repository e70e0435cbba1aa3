use crate::error::{Error, Result};
use ndarray::{s, Array2, ArrayView2, ArrayViewMut2, Zip};
use rand::{
    distributions::{Distribution, Uniform},
    Rng,
};
use std::{
    fmt::{self, Display},
    ops::{Index, IndexMut},
};


/// Dense row-major matrix of `f64`.
///
/// The buffer always holds `rows * cols` elements in standard layout. Element
/// access through [`Index`] panics when out of bounds, [`.get()`](Matrix::get)
/// returns [`None`] instead.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Matrix {
    data: Array2<f64>,
}

impl Matrix {
    /// A `rows` x `cols` matrix of zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: Array2::zeros((rows, cols)),
        }
    }
    /// Like [`.zeros()`](Self::zeros()), but reports allocation failure.
    ///
    /// **Errors**
    /// [`Error::AllocationFailure`] if `rows * cols` overflows or the buffer
    /// cannot be reserved.
    pub fn try_zeros(rows: usize, cols: usize) -> Result<Self> {
        let elems = rows
            .checked_mul(cols)
            .ok_or(Error::AllocationFailure { elems: usize::MAX })?;
        Self::from_shape_vec(rows, cols, try_filled(elems, 0.)?)
    }
    /// `count` matrices of zeros, ie the activations of each channel.
    ///
    /// **Errors**
    /// [`Error::AllocationFailure`] if `count * rows * cols` overflows or the
    /// buffers cannot be reserved.
    pub(crate) fn try_zeros_vec(count: usize, rows: usize, cols: usize) -> Result<Vec<Self>> {
        let elems = count
            .checked_mul(rows)
            .and_then(|elems| elems.checked_mul(cols))
            .ok_or(Error::AllocationFailure { elems: usize::MAX })?;
        let mut matrices = Vec::new();
        matrices
            .try_reserve_exact(count)
            .map_err(|_| Error::AllocationFailure { elems })?;
        for _ in 0..count {
            matrices.push(Self::try_zeros(rows, cols)?);
        }
        Ok(matrices)
    }
    /// Creates a matrix from row-major `elems`.
    ///
    /// **Errors**
    /// [`Error::LengthMismatch`] if `elems.len() != rows * cols`.
    pub fn from_shape_vec(rows: usize, cols: usize, elems: Vec<f64>) -> Result<Self> {
        let found = elems.len();
        let data = Array2::from_shape_vec((rows, cols), elems).map_err(|_| {
            Error::LengthMismatch {
                op: "from_shape_vec",
                expected: rows.saturating_mul(cols),
                found,
            }
        })?;
        Ok(Self { data })
    }
    /// A column vector holding `elems`.
    pub fn column(elems: Vec<f64>) -> Self {
        let rows = elems.len();
        Self {
            data: Array2::from_shape_vec((rows, 1), elems).unwrap_or_default(),
        }
    }
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }
    pub fn cols(&self) -> usize {
        self.data.ncols()
    }
    /// [rows, cols]
    pub fn dim(&self) -> [usize; 2] {
        [self.rows(), self.cols()]
    }
    /// The number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    /// The element at (`row`, `col`), or [`None`] if out of bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.data.get((row, col)).copied()
    }
    pub fn get_mut(&mut self, row: usize, col: usize) -> Option<&mut f64> {
        self.data.get_mut((row, col))
    }
    /// The element at (`row`, `col`) of `self` padded by `padding` zeros on
    /// each side, or [`None`] if that position lies in the padding or beyond.
    pub(crate) fn padded_get(&self, row: usize, col: usize, padding: usize) -> Option<f64> {
        let row = row.checked_sub(padding)?;
        let col = col.checked_sub(padding)?;
        self.get(row, col)
    }
    pub fn view(&self) -> ArrayView2<f64> {
        self.data.view()
    }
    pub fn view_mut(&mut self) -> ArrayViewMut2<f64> {
        self.data.view_mut()
    }
    /// Iterates the elements in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = &f64> + '_ {
        self.data.iter()
    }
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut f64> + '_ {
        self.data.iter_mut()
    }
    /// Iterates ((row, col), elem) in row-major order.
    pub fn indexed_iter(&self) -> impl Iterator<Item = ((usize, usize), &f64)> + '_ {
        self.data.indexed_iter()
    }
    /// Sum of the elements.
    pub fn sum(&self) -> f64 {
        self.data.sum()
    }
    /// The row-major elements as a vec.
    pub fn to_vec(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }
    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }
    /// Fills with samples drawn uniformly from [`min`, `max`).
    ///
    /// **Errors**
    /// [`Error::InvalidParameter`] unless `min < max` and both are finite.
    pub fn fill_random<R: Rng + ?Sized>(&mut self, rng: &mut R, min: f64, max: f64) -> Result<()> {
        let dist = uniform(min, max)?;
        self.data.iter_mut().for_each(|x| *x = dist.sample(rng));
        Ok(())
    }
    /// Copies `elems` into the buffer in row-major order.
    pub(crate) fn assign_iter(&mut self, elems: impl Iterator<Item = f64>) {
        self.data.iter_mut().zip(elems).for_each(|(x, y)| *x = y);
    }
    /// Matrix product `self * rhs`.
    ///
    /// **Errors**
    /// [`Error::DimensionMismatch`] unless `self.cols() == rhs.rows()`.
    pub fn multiply(&self, rhs: &Matrix) -> Result<Matrix> {
        if self.cols() != rhs.rows() {
            return Err(Error::dimension_mismatch("multiply", self.dim(), rhs.dim()));
        }
        let mut output = Self::try_zeros(self.rows(), rhs.cols())?;
        self.multiply_into(rhs, &mut output)?;
        Ok(output)
    }
    /// Writes `self * rhs` into `output`.
    ///
    /// Output rows are computed in parallel.
    pub fn multiply_into(&self, rhs: &Matrix, output: &mut Matrix) -> Result<()> {
        if self.cols() != rhs.rows() {
            return Err(Error::dimension_mismatch("multiply", self.dim(), rhs.dim()));
        }
        if output.dim() != [self.rows(), rhs.cols()] {
            return Err(Error::dimension_mismatch(
                "multiply_into",
                [self.rows(), rhs.cols()],
                output.dim(),
            ));
        }
        Zip::from(output.data.rows_mut())
            .and(self.data.rows())
            .par_for_each(|mut output, lhs| {
                for (y, rhs) in output.iter_mut().zip(rhs.data.columns()) {
                    *y = lhs.dot(&rhs);
                }
            });
        Ok(())
    }
    /// Writes `selfᵗ * rhs` into `output` without materializing the transpose.
    pub fn transpose_multiply_into(&self, rhs: &Matrix, output: &mut Matrix) -> Result<()> {
        if self.rows() != rhs.rows() {
            return Err(Error::dimension_mismatch(
                "transpose_multiply",
                [self.cols(), self.rows()],
                rhs.dim(),
            ));
        }
        if output.dim() != [self.cols(), rhs.cols()] {
            return Err(Error::dimension_mismatch(
                "transpose_multiply_into",
                [self.cols(), rhs.cols()],
                output.dim(),
            ));
        }
        Zip::from(output.data.rows_mut())
            .and(self.data.columns())
            .par_for_each(|mut output, lhs| {
                for (y, rhs) in output.iter_mut().zip(rhs.data.columns()) {
                    *y = lhs.dot(&rhs);
                }
            });
        Ok(())
    }
    /// A new matrix holding the transpose.
    pub fn transpose(&self) -> Matrix {
        Self {
            data: self.data.t().as_standard_layout().into_owned(),
        }
    }
    /// self += s
    pub fn add_scalar(&mut self, s: f64) {
        self.data.par_mapv_inplace(|x| x + s);
    }
    /// self += s, for a single column matrix.
    ///
    /// **Errors**
    /// [`Error::DimensionMismatch`] if `self` has more than one column.
    pub fn add_column_scalar(&mut self, s: f64) -> Result<()> {
        if self.cols() != 1 {
            return Err(Error::dimension_mismatch(
                "add_column_scalar",
                self.dim(),
                [self.rows(), 1],
            ));
        }
        self.add_scalar(s);
        Ok(())
    }
    /// self += rhs
    ///
    /// **Errors**
    /// [`Error::DimensionMismatch`] if the shapes differ.
    pub fn accumulate(&mut self, rhs: &Matrix) -> Result<()> {
        if self.dim() != rhs.dim() {
            return Err(Error::dimension_mismatch("accumulate", self.dim(), rhs.dim()));
        }
        Zip::from(&mut self.data)
            .and(&rhs.data)
            .par_for_each(|x, &y| *x += y);
        Ok(())
    }
    /// self += alpha * rhs
    ///
    /// **Errors**
    /// [`Error::DimensionMismatch`] if the shapes differ.
    pub fn scaled_add(&mut self, alpha: f64, rhs: &Matrix) -> Result<()> {
        if self.dim() != rhs.dim() {
            return Err(Error::dimension_mismatch("scaled_add", self.dim(), rhs.dim()));
        }
        Zip::from(&mut self.data)
            .and(&rhs.data)
            .par_for_each(|x, &y| *x += alpha * y);
        Ok(())
    }
    /// 2D cross correlation of `self` with `kernel`.
    ///
    /// The kernel is not flipped. Input indices outside of the matrix, ie in
    /// the zero `padding`, contribute 0.
    ///
    /// **Errors**
    /// [`Error::InvalidParameter`] if `stride` is 0 or the kernel is larger than the padded input.
    pub fn convolve2d(&self, kernel: &Matrix, stride: usize, padding: usize) -> Result<Matrix> {
        let rows = convolution_output_len(self.rows(), kernel.rows(), stride, padding)?;
        let cols = convolution_output_len(self.cols(), kernel.cols(), stride, padding)?;
        let mut output = Self::try_zeros(rows, cols)?;
        self.convolve2d_add_into(kernel, stride, padding, &mut output)?;
        Ok(output)
    }
    /// Adds the correlation of `self` with `kernel` to `output`.
    pub fn convolve2d_add_into(
        &self,
        kernel: &Matrix,
        stride: usize,
        padding: usize,
        output: &mut Matrix,
    ) -> Result<()> {
        let rows = convolution_output_len(self.rows(), kernel.rows(), stride, padding)?;
        let cols = convolution_output_len(self.cols(), kernel.cols(), stride, padding)?;
        if output.dim() != [rows, cols] {
            return Err(Error::dimension_mismatch(
                "convolve2d",
                [rows, cols],
                output.dim(),
            ));
        }
        Zip::indexed(&mut output.data).par_for_each(|(i, j), y| {
            let mut sum = 0.;
            for ((di, dj), w) in kernel.indexed_iter() {
                if let Some(x) = self.padded_get(i * stride + di, j * stride + dj, padding) {
                    sum += x * w;
                }
            }
            *y += sum;
        });
        Ok(())
    }
    /// Non overlapping max pooling.
    ///
    /// Output dims are `floor(dim / pool_size)`, trailing rows / cols are dropped.
    ///
    /// **Errors**
    /// [`Error::InvalidParameter`] if `pool_size` is 0 or larger than the input.
    pub fn max_pool2d(&self, pool_size: usize) -> Result<Matrix> {
        let mut output = self.pool_output(pool_size)?;
        self.max_pool2d_into(pool_size, &mut output)?;
        Ok(output)
    }
    /// Writes the max pooling of `self` into `output`.
    pub fn max_pool2d_into(&self, pool_size: usize, output: &mut Matrix) -> Result<()> {
        self.pool2d_into(pool_size, output, |window| {
            window.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        })
    }
    /// Non overlapping average pooling.
    ///
    /// See [`.max_pool2d()`](Self::max_pool2d()).
    pub fn avg_pool2d(&self, pool_size: usize) -> Result<Matrix> {
        let mut output = self.pool_output(pool_size)?;
        self.avg_pool2d_into(pool_size, &mut output)?;
        Ok(output)
    }
    /// Writes the average pooling of `self` into `output`.
    pub fn avg_pool2d_into(&self, pool_size: usize, output: &mut Matrix) -> Result<()> {
        let area = pool_size
            .checked_mul(pool_size)
            .ok_or_else(|| Error::invalid_parameter("pool_size", "pool area overflows"))?
            as f64;
        self.pool2d_into(pool_size, output, |window| window.sum() / area)
    }
    fn pool_output(&self, pool_size: usize) -> Result<Matrix> {
        let rows = pool_output_len(self.rows(), pool_size)?;
        let cols = pool_output_len(self.cols(), pool_size)?;
        Self::try_zeros(rows, cols)
    }
    fn pool2d_into<F>(&self, pool_size: usize, output: &mut Matrix, f: F) -> Result<()>
    where
        F: Fn(ArrayView2<f64>) -> f64 + Send + Sync,
    {
        let rows = pool_output_len(self.rows(), pool_size)?;
        let cols = pool_output_len(self.cols(), pool_size)?;
        if output.dim() != [rows, cols] {
            return Err(Error::dimension_mismatch("pool2d", [rows, cols], output.dim()));
        }
        let input = &self.data;
        Zip::indexed(&mut output.data).par_for_each(|(i, j), y| {
            let (r, c) = (i * pool_size, j * pool_size);
            *y = f(input.slice(s![r..r + pool_size, c..c + pool_size]));
        });
        Ok(())
    }
}

/// Output length of a convolution along one axis.
///
/// floor((input - kernel + 2 * padding) / stride) + 1
pub fn convolution_output_len(
    input: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
) -> Result<usize> {
    if stride == 0 {
        return Err(Error::invalid_parameter("stride", "must be greater than 0"));
    }
    if kernel == 0 {
        return Err(Error::invalid_parameter("kernel_size", "must be greater than 0"));
    }
    let padded = padding
        .checked_mul(2)
        .and_then(|padding| padding.checked_add(input))
        .ok_or_else(|| Error::invalid_parameter("padding", "padded input overflows"))?;
    if padded < kernel {
        return Err(Error::invalid_parameter(
            "kernel_size",
            format!("kernel {kernel} is larger than padded input {padded}"),
        ));
    }
    Ok((padded - kernel) / stride + 1)
}

/// A vector of `len` copies of `value`, reporting allocation failure.
pub(crate) fn try_filled<T: Clone>(len: usize, value: T) -> Result<Vec<T>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| Error::AllocationFailure { elems: len })?;
    buffer.resize(len, value);
    Ok(buffer)
}

/// Output length of a pooling along one axis.
pub fn pool_output_len(input: usize, pool_size: usize) -> Result<usize> {
    if pool_size == 0 {
        return Err(Error::invalid_parameter("pool_size", "must be greater than 0"));
    }
    if input < pool_size {
        return Err(Error::invalid_parameter(
            "pool_size",
            format!("pool {pool_size} is larger than input {input}"),
        ));
    }
    Ok(input / pool_size)
}

pub(crate) fn uniform(min: f64, max: f64) -> Result<Uniform<f64>> {
    if min.is_finite() && max.is_finite() && min < max {
        Ok(Uniform::new(min, max))
    } else {
        Err(Error::invalid_parameter(
            "range",
            format!("expected min < max, found [{min}, {max})"),
        ))
    }
}

impl From<Array2<f64>> for Matrix {
    fn from(array: Array2<f64>) -> Self {
        Self {
            data: array.as_standard_layout().into_owned(),
        }
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;
    fn index(&self, index: (usize, usize)) -> &f64 {
        &self.data[index]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, index: (usize, usize)) -> &mut f64 {
        &mut self.data[index]
    }
}

impl Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.data, f)
    }
}
