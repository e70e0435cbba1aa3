use crate::{
    error::{Error, Result},
    gradient::{Conv2dGradient, DenseGradient, LayerGradient},
    matrix::{convolution_output_len, pool_output_len, try_filled, uniform, Matrix},
};
use derive_more::Display;
use ndarray::ArrayViewMut2;
use rand::{distributions::Distribution, Rng};
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};


/// Activation functions.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Activation {
    /// 1 / (1 + e^-x)
    #[display(fmt = "sigmoid")]
    Sigmoid,
    /// max(0, x)
    #[display(fmt = "relu")]
    Relu,
    #[display(fmt = "tanh")]
    Tanh,
    /// e^(x - max) / Σ e^(x - max), over the whole activation.
    ///
    /// Intended for the output layer with a cross entropy loss.
    #[display(fmt = "softmax")]
    Softmax,
}

impl Activation {
    /// Applies the activation to `matrix` inplace.
    pub fn apply(self, matrix: &mut Matrix) {
        match self {
            Self::Sigmoid => matrix.view_mut().par_mapv_inplace(sigmoid),
            Self::Relu => matrix
                .view_mut()
                .par_mapv_inplace(|x| if x > 0. { x } else { 0. }),
            Self::Tanh => matrix.view_mut().par_mapv_inplace(f64::tanh),
            Self::Softmax => softmax(matrix),
        }
    }
    /// The derivative, as a function of the activation `a`.
    ///
    /// The softmax derivative is 1, its jacobian is folded into the
    /// output error of the cross entropy loss.
    pub fn derivative(self, a: f64) -> f64 {
        match self {
            Self::Sigmoid => a * (1. - a),
            Self::Relu => {
                if a > 0. {
                    1.
                } else {
                    0.
                }
            }
            Self::Tanh => 1. - a * a,
            Self::Softmax => 1.,
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1. / (1. + (-x).exp())
}

fn softmax(matrix: &mut Matrix) {
    let max = matrix.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut y = matrix.view_mut();
    y.mapv_inplace(|x| (x - max).exp());
    let sum = y.sum();
    y.mapv_inplace(|x| x / sum);
}

/// Pooling kinds.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PoolKind {
    #[display(fmt = "max")]
    Max,
    #[display(fmt = "avg")]
    Avg,
}

/// The shape flowing between layers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Shape {
    /// `channels` matrices of `height` x `width`.
    Spatial {
        height: usize,
        width: usize,
        channels: usize,
    },
    /// A column vector.
    Flat(usize),
}

impl Shape {
    /// The number of elements.
    pub fn len(&self) -> usize {
        match *self {
            Self::Spatial {
                height,
                width,
                channels,
            } => height * width * channels,
            Self::Flat(len) => len,
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Input layer.
///
/// Holds a copy of the most recent input, one matrix per channel.
#[derive(Clone, Debug)]
pub struct Input {
    height: usize,
    width: usize,
    channels: usize,
    outputs: Vec<Matrix>,
}

impl Input {
    pub(crate) fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
            outputs: Vec::new(),
        }
    }
    pub fn height(&self) -> usize {
        self.height
    }
    pub fn width(&self) -> usize {
        self.width
    }
    pub fn channels(&self) -> usize {
        self.channels
    }
    pub fn shape(&self) -> Shape {
        Shape::Spatial {
            height: self.height,
            width: self.width,
            channels: self.channels,
        }
    }
    pub fn outputs(&self) -> &[Matrix] {
        &self.outputs
    }
    fn compile(&mut self) -> Result<Shape> {
        for (name, value) in [
            ("height", self.height),
            ("width", self.width),
            ("channels", self.channels),
        ] {
            if value == 0 {
                return Err(Error::invalid_parameter(name, "must be greater than 0"));
            }
        }
        self.outputs = Matrix::try_zeros_vec(self.channels, self.height, self.width)?;
        Ok(self.shape())
    }
    /// Copies `input` channel by channel.
    ///
    /// `input` may have any shape with height * width * channels elements.
    pub(crate) fn load(&mut self, input: &Matrix) -> Result<()> {
        let expected = self.shape().len();
        if input.len() != expected {
            return Err(Error::LengthMismatch {
                op: "forward",
                expected,
                found: input.len(),
            });
        }
        let mut elems = input.iter().copied();
        for output in self.outputs.iter_mut() {
            let len = output.len();
            output.assign_iter(elems.by_ref().take(len));
        }
        Ok(())
    }
    pub(crate) fn load_channels(&mut self, input: &[Matrix]) -> Result<()> {
        if input.len() != self.channels {
            return Err(Error::ChannelMismatch {
                op: "forward",
                expected: self.channels,
                found: input.len(),
            });
        }
        if let Some(x) = input
            .iter()
            .find(|x| x.dim() != [self.height, self.width])
        {
            return Err(Error::dimension_mismatch(
                "forward",
                [self.height, self.width],
                x.dim(),
            ));
        }
        for (output, x) in self.outputs.iter_mut().zip(input) {
            output.assign_iter(x.iter().copied());
        }
        Ok(())
    }
}

/// Dense / fully connected layer.
///
/// Computes `activation(weightsᵗ · x + bias)`, where `x` is the flattened
/// output of the previous layer. The bias is a single scalar shared by all
/// units.
#[derive(Clone, Debug)]
pub struct Dense {
    size: usize,
    activation: Activation,
    weights: Matrix,
    bias: f64,
    output: Matrix,
}

impl Dense {
    pub(crate) fn new(size: usize, activation: Activation) -> Result<Self> {
        if size == 0 {
            return Err(Error::invalid_parameter("size", "must be greater than 0"));
        }
        Ok(Self {
            size,
            activation,
            weights: Matrix::default(),
            bias: 0.,
            output: Matrix::default(),
        })
    }
    /// The number of units.
    pub fn size(&self) -> usize {
        self.size
    }
    pub fn activation(&self) -> Activation {
        self.activation
    }
    /// The weights, inputs x outputs.
    pub fn weights(&self) -> &Matrix {
        &self.weights
    }
    /// A mutable view of the weights.
    pub fn weights_mut(&mut self) -> ArrayViewMut2<f64> {
        self.weights.view_mut()
    }
    pub fn bias(&self) -> f64 {
        self.bias
    }
    pub fn set_bias(&mut self, bias: f64) {
        self.bias = bias;
    }
    /// The activation of the last forward pass, a size x 1 column.
    pub fn output(&self) -> &Matrix {
        &self.output
    }
    fn compile(&mut self, incoming: Shape) -> Result<Shape> {
        self.weights = Matrix::try_zeros(incoming.len(), self.size)?;
        self.output = Matrix::try_zeros(self.size, 1)?;
        Ok(Shape::Flat(self.size))
    }
    fn forward(&mut self, inputs: &[Matrix]) -> Result<()> {
        let flat;
        let x = match inputs {
            [x] if x.cols() == 1 => x,
            _ => {
                flat = flatten(inputs);
                &flat
            }
        };
        self.weights.transpose_multiply_into(x, &mut self.output)?;
        self.output.add_column_scalar(self.bias)?;
        self.activation.apply(&mut self.output);
        Ok(())
    }
    fn backward(&self, inputs: &[Matrix], error: &[Matrix], propagate: bool) -> Result<Backward> {
        let delta = Matrix::column(flat_iter(error).collect());
        let delta = output_delta(self.activation, &delta, &self.output)?;
        let x = flatten(inputs);
        // weights[j][i] = x[j] * delta[i]
        let weights = x.multiply(&delta.transpose())?;
        let bias = delta.sum();
        let input_error = if propagate {
            // error[j] = Σ_i weights[j][i] * delta[i]
            Some(unflatten(&self.weights.multiply(&delta)?, inputs)?)
        } else {
            None
        };
        Ok((
            LayerGradient::Dense(DenseGradient { weights, bias }),
            input_error,
        ))
    }
}

/// 2D convolutional layer.
///
/// Output `k` is `activation(Σ_c conv(input_c, kernel_{k, c}) + bias_k)`.
#[derive(Clone, Debug)]
pub struct Conv2d {
    kernel_count: usize,
    kernel_size: usize,
    channels: usize,
    padding: usize,
    stride: usize,
    activation: Activation,
    // kernel k for channel c at k * channels + c
    kernels: Vec<Matrix>,
    biases: Vec<f64>,
    outputs: Vec<Matrix>,
}

impl Conv2d {
    pub(crate) fn new(
        kernel_count: usize,
        kernel_size: usize,
        channels: usize,
        padding: usize,
        stride: usize,
        activation: Activation,
    ) -> Result<Self> {
        for (name, value) in [
            ("kernel_count", kernel_count),
            ("kernel_size", kernel_size),
            ("channels", channels),
            ("stride", stride),
        ] {
            if value == 0 {
                return Err(Error::invalid_parameter(name, "must be greater than 0"));
            }
        }
        Ok(Self {
            kernel_count,
            kernel_size,
            channels,
            padding,
            stride,
            activation,
            kernels: Vec::new(),
            biases: Vec::new(),
            outputs: Vec::new(),
        })
    }
    pub fn kernel_count(&self) -> usize {
        self.kernel_count
    }
    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }
    /// The number of input channels.
    pub fn channels(&self) -> usize {
        self.channels
    }
    pub fn padding(&self) -> usize {
        self.padding
    }
    pub fn stride(&self) -> usize {
        self.stride
    }
    pub fn activation(&self) -> Activation {
        self.activation
    }
    /// The kernel applied to `channel` for output `kernel`.
    pub fn kernel(&self, kernel: usize, channel: usize) -> Option<&Matrix> {
        if channel < self.channels {
            self.kernels.get(kernel * self.channels + channel)
        } else {
            None
        }
    }
    pub fn kernel_mut(&mut self, kernel: usize, channel: usize) -> Option<ArrayViewMut2<f64>> {
        if channel < self.channels {
            self.kernels
                .get_mut(kernel * self.channels + channel)
                .map(Matrix::view_mut)
        } else {
            None
        }
    }
    pub fn biases(&self) -> &[f64] {
        &self.biases
    }
    pub fn biases_mut(&mut self) -> &mut [f64] {
        &mut self.biases
    }
    /// The activations of the last forward pass, one per kernel.
    pub fn outputs(&self) -> &[Matrix] {
        &self.outputs
    }
    fn compile(&mut self, index: usize, incoming: Shape) -> Result<Shape> {
        let (height, width, channels) = match incoming {
            Shape::Spatial {
                height,
                width,
                channels,
            } => (height, width, channels),
            Shape::Flat(_) => {
                return Err(Error::UnsupportedLayerKind {
                    index,
                    kind: "conv2d",
                })
            }
        };
        if channels != self.channels {
            return Err(Error::ChannelMismatch {
                op: "conv2d",
                expected: self.channels,
                found: channels,
            });
        }
        let height = convolution_output_len(height, self.kernel_size, self.stride, self.padding)?;
        let width = convolution_output_len(width, self.kernel_size, self.stride, self.padding)?;
        let kernels = self.kernel_count.checked_mul(self.channels).ok_or_else(|| {
            Error::invalid_parameter(
                "kernel_count",
                format!(
                    "{} kernels of {} channels overflow",
                    self.kernel_count, self.channels
                ),
            )
        })?;
        self.kernels = Matrix::try_zeros_vec(kernels, self.kernel_size, self.kernel_size)?;
        self.biases = try_filled(self.kernel_count, 0.)?;
        self.outputs = Matrix::try_zeros_vec(self.kernel_count, height, width)?;
        Ok(Shape::Spatial {
            height,
            width,
            channels: self.kernel_count,
        })
    }
    fn forward(&mut self, inputs: &[Matrix]) -> Result<()> {
        if inputs.len() != self.channels {
            return Err(Error::ChannelMismatch {
                op: "conv2d",
                expected: self.channels,
                found: inputs.len(),
            });
        }
        let (channels, stride, padding, activation) =
            (self.channels, self.stride, self.padding, self.activation);
        let kernels = &self.kernels;
        self.outputs
            .par_iter_mut()
            .zip(self.biases.par_iter())
            .enumerate()
            .try_for_each(|(k, (output, bias))| {
                output.fill(0.);
                let kernels = &kernels[k * channels..(k + 1) * channels];
                for (input, kernel) in inputs.iter().zip(kernels) {
                    input.convolve2d_add_into(kernel, stride, padding, output)?;
                }
                output.add_scalar(*bias);
                activation.apply(output);
                Ok(())
            })
    }
    fn backward(&self, inputs: &[Matrix], error: &[Matrix], propagate: bool) -> Result<Backward> {
        if inputs.len() != self.channels {
            return Err(Error::ChannelMismatch {
                op: "conv2d",
                expected: self.channels,
                found: inputs.len(),
            });
        }
        if error.len() != self.kernel_count {
            return Err(Error::ChannelMismatch {
                op: "conv2d_backward",
                expected: self.kernel_count,
                found: error.len(),
            });
        }
        let deltas = error
            .iter()
            .zip(self.outputs.iter())
            .map(|(error, output)| output_delta(self.activation, error, output))
            .collect::<Result<Vec<_>>>()?;
        let kernels = (0..self.kernels.len())
            .into_par_iter()
            .map(|index| {
                let (k, c) = (index / self.channels, index % self.channels);
                self.kernel_gradient(&inputs[c], &deltas[k])
            })
            .collect::<Result<Vec<_>>>()?;
        let biases = deltas.iter().map(Matrix::sum).collect();
        let input_error = if propagate {
            Some(
                inputs
                    .par_iter()
                    .enumerate()
                    .map(|(c, input)| self.input_error(input, c, &deltas))
                    .collect::<Result<Vec<_>>>()?,
            )
        } else {
            None
        };
        Ok((
            LayerGradient::Conv2d(Conv2dGradient {
                kernels,
                biases,
                channels: self.channels,
            }),
            input_error,
        ))
    }
    // grad[di][dj] = Σ_ij delta[i][j] * input[i * stride - padding + di][j * stride - padding + dj]
    fn kernel_gradient(&self, input: &Matrix, delta: &Matrix) -> Result<Matrix> {
        let mut grad = Matrix::try_zeros(self.kernel_size, self.kernel_size)?;
        let (stride, padding) = (self.stride, self.padding);
        for ((di, dj), g) in grad.view_mut().indexed_iter_mut() {
            *g = delta
                .indexed_iter()
                .filter_map(|((i, j), d)| {
                    input
                        .padded_get(i * stride + di, j * stride + dj, padding)
                        .map(|x| x * d)
                })
                .sum();
        }
        Ok(grad)
    }
    fn input_error(&self, input: &Matrix, channel: usize, deltas: &[Matrix]) -> Result<Matrix> {
        let mut error = Matrix::try_zeros(input.rows(), input.cols())?;
        let (stride, padding) = (self.stride, self.padding);
        for (delta, kernels) in deltas.iter().zip(self.kernels.chunks(self.channels)) {
            let kernel = &kernels[channel];
            for ((i, j), d) in delta.indexed_iter() {
                for ((di, dj), w) in kernel.indexed_iter() {
                    let (row, col) = (i * stride + di, j * stride + dj);
                    if row < padding || col < padding {
                        continue;
                    }
                    if let Some(e) = error.get_mut(row - padding, col - padding) {
                        *e += d * w;
                    }
                }
            }
        }
        Ok(error)
    }
}

/// Pooling layer.
///
/// Non overlapping windows of `pool_size`, applied to each channel.
#[derive(Clone, Debug)]
pub struct Pool {
    kind: PoolKind,
    pool_size: usize,
    channels: usize,
    outputs: Vec<Matrix>,
}

impl Pool {
    pub(crate) fn new(kind: PoolKind, pool_size: usize) -> Result<Self> {
        if pool_size == 0 {
            return Err(Error::invalid_parameter("pool_size", "must be greater than 0"));
        }
        Ok(Self {
            kind,
            pool_size,
            channels: 0,
            outputs: Vec::new(),
        })
    }
    pub fn kind(&self) -> PoolKind {
        self.kind
    }
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
    /// The number of channels, copied from the previous layer on compile.
    pub fn channels(&self) -> usize {
        self.channels
    }
    pub fn outputs(&self) -> &[Matrix] {
        &self.outputs
    }
    fn kind_name(&self) -> &'static str {
        match self.kind {
            PoolKind::Max => "max_pool",
            PoolKind::Avg => "avg_pool",
        }
    }
    fn compile(&mut self, index: usize, incoming: Shape) -> Result<Shape> {
        let (height, width, channels) = match incoming {
            Shape::Spatial {
                height,
                width,
                channels,
            } => (height, width, channels),
            Shape::Flat(_) => {
                return Err(Error::UnsupportedLayerKind {
                    index,
                    kind: self.kind_name(),
                })
            }
        };
        let height = pool_output_len(height, self.pool_size)?;
        let width = pool_output_len(width, self.pool_size)?;
        self.channels = channels;
        self.outputs = Matrix::try_zeros_vec(channels, height, width)?;
        Ok(Shape::Spatial {
            height,
            width,
            channels,
        })
    }
    fn forward(&mut self, inputs: &[Matrix]) -> Result<()> {
        if inputs.len() != self.channels {
            return Err(Error::ChannelMismatch {
                op: self.kind_name(),
                expected: self.channels,
                found: inputs.len(),
            });
        }
        let (kind, pool_size) = (self.kind, self.pool_size);
        self.outputs
            .par_iter_mut()
            .zip(inputs.par_iter())
            .try_for_each(|(output, input)| match kind {
                PoolKind::Max => input.max_pool2d_into(pool_size, output),
                PoolKind::Avg => input.avg_pool2d_into(pool_size, output),
            })
    }
    fn backward(&self, inputs: &[Matrix], error: &[Matrix], propagate: bool) -> Result<Backward> {
        if !propagate {
            return Ok((LayerGradient::Pool, None));
        }
        if inputs.len() != self.channels || error.len() != self.channels {
            return Err(Error::ChannelMismatch {
                op: self.kind_name(),
                expected: self.channels,
                found: inputs.len().min(error.len()),
            });
        }
        let input_error = inputs
            .par_iter()
            .zip(error.par_iter())
            .map(|(input, error)| self.input_error(input, error))
            .collect::<Result<Vec<_>>>()?;
        Ok((LayerGradient::Pool, Some(input_error)))
    }
    fn input_error(&self, input: &Matrix, error: &Matrix) -> Result<Matrix> {
        let mut input_error = Matrix::try_zeros(input.rows(), input.cols())?;
        let size = self.pool_size;
        let area = (size * size) as f64;
        for ((i, j), e) in error.indexed_iter() {
            let (row, col) = (i * size, j * size);
            match self.kind {
                PoolKind::Max => {
                    // first maximum of the window
                    let mut max = f64::NEG_INFINITY;
                    let mut argmax = (row, col);
                    for di in 0..size {
                        for dj in 0..size {
                            if let Some(x) = input.get(row + di, col + dj) {
                                if x > max {
                                    max = x;
                                    argmax = (row + di, col + dj);
                                }
                            }
                        }
                    }
                    if let Some(x) = input_error.get_mut(argmax.0, argmax.1) {
                        *x += e;
                    }
                }
                PoolKind::Avg => {
                    for di in 0..size {
                        for dj in 0..size {
                            if let Some(x) = input_error.get_mut(row + di, col + dj) {
                                *x += e / area;
                            }
                        }
                    }
                }
            }
        }
        Ok(input_error)
    }
}

/// Flattens the previous layer into a column.
///
/// Channels are concatenated, each in row-major order.
#[derive(Clone, Debug, Default)]
pub struct Flatten {
    output: Matrix,
}

impl Flatten {
    pub fn output(&self) -> &Matrix {
        &self.output
    }
    fn compile(&mut self, incoming: Shape) -> Result<Shape> {
        let len = incoming.len();
        self.output = Matrix::try_zeros(len, 1)?;
        Ok(Shape::Flat(len))
    }
    fn forward(&mut self, inputs: &[Matrix]) -> Result<()> {
        let found = total_len(inputs);
        if found != self.output.len() {
            return Err(Error::LengthMismatch {
                op: "flatten",
                expected: self.output.len(),
                found,
            });
        }
        self.output.assign_iter(flat_iter(inputs));
        Ok(())
    }
    fn backward(&self, inputs: &[Matrix], error: &[Matrix], propagate: bool) -> Result<Backward> {
        let input_error = if propagate {
            let error = flatten(error);
            if error.len() != total_len(inputs) {
                return Err(Error::LengthMismatch {
                    op: "flatten_backward",
                    expected: total_len(inputs),
                    found: error.len(),
                });
            }
            Some(unflatten(&error, inputs)?)
        } else {
            None
        };
        Ok((LayerGradient::Flatten, input_error))
    }
}

/// (gradient, error of the previous layer)
type Backward = (LayerGradient, Option<Vec<Matrix>>);

/// A layer of a [`Network`](crate::network::Network).
#[derive(Clone, Debug)]
pub enum Layer {
    Input(Input),
    Dense(Dense),
    Conv2d(Conv2d),
    Pool(Pool),
    Flatten(Flatten),
}

impl Layer {
    /// A short name of the layer kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "input",
            Self::Dense(_) => "dense",
            Self::Conv2d(_) => "conv2d",
            Self::Pool(layer) => layer.kind_name(),
            Self::Flatten(_) => "flatten",
        }
    }
    /// The activation of dense and conv2d layers.
    pub fn activation(&self) -> Option<Activation> {
        match self {
            Self::Dense(layer) => Some(layer.activation),
            Self::Conv2d(layer) => Some(layer.activation),
            Self::Input(_) | Self::Pool(_) | Self::Flatten(_) => None,
        }
    }
    /// The activations of the last forward pass.
    ///
    /// Empty until the network is compiled.
    pub fn outputs(&self) -> &[Matrix] {
        match self {
            Self::Input(layer) => &layer.outputs,
            Self::Dense(layer) => std::slice::from_ref(&layer.output),
            Self::Conv2d(layer) => &layer.outputs,
            Self::Pool(layer) => &layer.outputs,
            Self::Flatten(layer) => std::slice::from_ref(&layer.output),
        }
    }
    pub fn as_input(&self) -> Option<&Input> {
        match self {
            Self::Input(layer) => Some(layer),
            _ => None,
        }
    }
    pub fn as_dense(&self) -> Option<&Dense> {
        match self {
            Self::Dense(layer) => Some(layer),
            _ => None,
        }
    }
    pub(crate) fn as_dense_mut(&mut self) -> Option<&mut Dense> {
        match self {
            Self::Dense(layer) => Some(layer),
            _ => None,
        }
    }
    pub fn as_conv2d(&self) -> Option<&Conv2d> {
        match self {
            Self::Conv2d(layer) => Some(layer),
            _ => None,
        }
    }
    pub(crate) fn as_conv2d_mut(&mut self) -> Option<&mut Conv2d> {
        match self {
            Self::Conv2d(layer) => Some(layer),
            _ => None,
        }
    }
    pub fn as_pool(&self) -> Option<&Pool> {
        match self {
            Self::Pool(layer) => Some(layer),
            _ => None,
        }
    }
    pub fn as_flatten(&self) -> Option<&Flatten> {
        match self {
            Self::Flatten(layer) => Some(layer),
            _ => None,
        }
    }
    /// Allocates buffers given the shape of the previous layer.
    ///
    /// `incoming` is [`None`] for the first layer, which must be the input.
    pub(crate) fn compile(&mut self, index: usize, incoming: Option<Shape>) -> Result<Shape> {
        match (self, incoming) {
            (Self::Input(layer), None) => layer.compile(),
            (Self::Dense(layer), Some(shape)) => layer.compile(shape),
            (Self::Conv2d(layer), Some(shape)) => layer.compile(index, shape),
            (Self::Pool(layer), Some(shape)) => layer.compile(index, shape),
            (Self::Flatten(layer), Some(shape)) => layer.compile(shape),
            (layer, _) => Err(Error::UnsupportedLayerKind {
                index,
                kind: layer.kind(),
            }),
        }
    }
    /// Computes the activations from the outputs of the previous layer.
    pub(crate) fn forward(&mut self, inputs: &[Matrix]) -> Result<()> {
        match self {
            Self::Input(_) => Ok(()),
            Self::Dense(layer) => layer.forward(inputs),
            Self::Conv2d(layer) => layer.forward(inputs),
            Self::Pool(layer) => layer.forward(inputs),
            Self::Flatten(layer) => layer.forward(inputs),
        }
    }
    /// Computes the gradient given the `error` of the outputs.
    ///
    /// If `propagate`, also returns the error of `inputs`, the outputs of the previous layer.
    pub(crate) fn backward(
        &self,
        inputs: &[Matrix],
        error: &[Matrix],
        propagate: bool,
    ) -> Result<Backward> {
        match self {
            Self::Input(_) => Ok((LayerGradient::Input, None)),
            Self::Dense(layer) => layer.backward(inputs, error, propagate),
            Self::Conv2d(layer) => layer.backward(inputs, error, propagate),
            Self::Pool(layer) => layer.backward(inputs, error, propagate),
            Self::Flatten(layer) => layer.backward(inputs, error, propagate),
        }
    }
    pub(crate) fn zero_gradient(&self) -> Result<LayerGradient> {
        Ok(match self {
            Self::Input(_) => LayerGradient::Input,
            Self::Dense(layer) => LayerGradient::Dense(DenseGradient {
                weights: Matrix::try_zeros(layer.weights.rows(), layer.weights.cols())?,
                bias: 0.,
            }),
            Self::Conv2d(layer) => LayerGradient::Conv2d(Conv2dGradient {
                kernels: layer
                    .kernels
                    .iter()
                    .map(|k| Matrix::try_zeros(k.rows(), k.cols()))
                    .collect::<Result<_>>()?,
                biases: vec![0.; layer.biases.len()],
                channels: layer.channels,
            }),
            Self::Pool(_) => LayerGradient::Pool,
            Self::Flatten(_) => LayerGradient::Flatten,
        })
    }
    /// Draws parameters uniformly from [`min`, `max`).
    pub(crate) fn init_random<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        min: f64,
        max: f64,
    ) -> Result<()> {
        match self {
            Self::Dense(layer) => {
                layer.weights.fill_random(rng, min, max)?;
                layer.bias = uniform(min, max)?.sample(rng);
            }
            Self::Conv2d(layer) => {
                for kernel in layer.kernels.iter_mut() {
                    kernel.fill_random(rng, min, max)?;
                }
                let dist = uniform(min, max)?;
                for bias in layer.biases.iter_mut() {
                    *bias = dist.sample(rng);
                }
            }
            Self::Input(_) | Self::Pool(_) | Self::Flatten(_) => (),
        }
        Ok(())
    }
    pub(crate) fn init_zero(&mut self) {
        match self {
            Self::Dense(layer) => {
                layer.weights.fill(0.);
                layer.bias = 0.;
            }
            Self::Conv2d(layer) => {
                layer.kernels.iter_mut().for_each(|k| k.fill(0.));
                layer.biases.iter_mut().for_each(|b| *b = 0.);
            }
            Self::Input(_) | Self::Pool(_) | Self::Flatten(_) => (),
        }
    }
    /// parameters += alpha * gradient
    pub(crate) fn apply_gradient(
        &mut self,
        index: usize,
        gradient: &LayerGradient,
        alpha: f64,
    ) -> Result<()> {
        match (self, gradient) {
            (Self::Dense(layer), LayerGradient::Dense(grad)) => {
                layer.weights.scaled_add(alpha, &grad.weights)?;
                layer.bias += alpha * grad.bias;
            }
            (Self::Conv2d(layer), LayerGradient::Conv2d(grad)) => {
                for (kernel, grad) in layer.kernels.iter_mut().zip(grad.kernels.iter()) {
                    kernel.scaled_add(alpha, grad)?;
                }
                for (bias, grad) in layer.biases.iter_mut().zip(grad.biases.iter()) {
                    *bias += alpha * grad;
                }
            }
            (Self::Input(_), LayerGradient::Input)
            | (Self::Pool(_), LayerGradient::Pool)
            | (Self::Flatten(_), LayerGradient::Flatten) => (),
            _ => {
                return Err(Error::LayerMismatch {
                    op: "apply_gradient",
                    index,
                })
            }
        }
        Ok(())
    }
}

fn flat_iter(matrices: &[Matrix]) -> impl Iterator<Item = f64> + '_ {
    matrices.iter().flat_map(|x| x.iter().copied())
}

fn total_len(matrices: &[Matrix]) -> usize {
    matrices.iter().map(Matrix::len).sum()
}

/// Concatenates `matrices` into a column.
pub(crate) fn flatten(matrices: &[Matrix]) -> Matrix {
    Matrix::column(flat_iter(matrices).collect())
}

/// Splits `flat` into matrices shaped like `like`.
fn unflatten(flat: &Matrix, like: &[Matrix]) -> Result<Vec<Matrix>> {
    let mut elems = flat.iter().copied();
    like.iter()
        .map(|x| {
            let mut y = Matrix::try_zeros(x.rows(), x.cols())?;
            y.assign_iter(elems.by_ref().take(x.len()));
            Ok(y)
        })
        .collect()
}

/// delta = error ⊙ activation'(output)
fn output_delta(activation: Activation, error: &Matrix, output: &Matrix) -> Result<Matrix> {
    if error.len() != output.len() {
        return Err(Error::LengthMismatch {
            op: "backward",
            expected: output.len(),
            found: error.len(),
        });
    }
    let mut delta = Matrix::try_zeros(output.rows(), output.cols())?;
    delta.assign_iter(
        error
            .iter()
            .zip(output.iter())
            .map(|(e, a)| e * activation.derivative(*a)),
    );
    Ok(delta)
}
