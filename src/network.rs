//! Networks.
//!
//! A [`Network`] is a chain of layers starting with an input layer. Layers are
//! appended, then the network is compiled, which infers the shape of each layer
//! and allocates its parameters and activation buffers. Buffers are reused by
//! every forward and backward pass.
//!
//! ```no_run
//! # use convnet::{Activation, Network};
//! # fn main() -> convnet::Result<()> {
//! let mut network = Network::new(28, 28, 1);
//! network
//!     .append_conv2d(8, 5, 1, 0, 1, Activation::Relu)?
//!     .append_max_pool(2)?
//!     .append_flatten()?
//!     .append_dense(10, Activation::Softmax)?;
//! network.compile()?;
//! # Ok(())
//! # }
//! ```
use crate::{
    error::{Error, Result},
    gradient::{Gradient, LayerGradient},
    layer::{flatten, Activation, Conv2d, Dense, Flatten, Input, Layer, Pool, PoolKind, Shape},
    matrix::Matrix,
};
use rand::{thread_rng, Rng};

#[cfg(test)]
mod tests;

/// A feed forward network.
#[derive(Clone, Debug)]
pub struct Network {
    layers: Vec<Layer>,
    compiled: bool,
}

impl Network {
    /// Creates a network with an input layer of `channels` matrices of
    /// `height` x `width`.
    ///
    /// Dimensions are validated on [`.compile()`](Self::compile).
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            layers: vec![Layer::Input(Input::new(height, width, channels))],
            compiled: false,
        }
    }
    fn append(&mut self, layer: Layer) -> Result<&mut Self> {
        if self.compiled {
            return Err(Error::AlreadyCompiled);
        }
        self.layers.push(layer);
        Ok(self)
    }
    /// Appends a dense layer of `size` units.
    ///
    /// **Errors**
    /// - [`Error::AlreadyCompiled`]
    /// - [`Error::InvalidParameter`] if `size` is 0.
    pub fn append_dense(&mut self, size: usize, activation: Activation) -> Result<&mut Self> {
        let layer = Dense::new(size, activation)?;
        self.append(Layer::Dense(layer))
    }
    /// Appends a convolutional layer with `kernel_count` outputs, each with
    /// one `kernel_size` x `kernel_size` kernel per input channel.
    ///
    /// `channels` must equal the channels of the previous layer, checked on compile.
    pub fn append_conv2d(
        &mut self,
        kernel_count: usize,
        kernel_size: usize,
        channels: usize,
        padding: usize,
        stride: usize,
        activation: Activation,
    ) -> Result<&mut Self> {
        let layer = Conv2d::new(
            kernel_count,
            kernel_size,
            channels,
            padding,
            stride,
            activation,
        )?;
        self.append(Layer::Conv2d(layer))
    }
    pub fn append_max_pool(&mut self, pool_size: usize) -> Result<&mut Self> {
        let layer = Pool::new(PoolKind::Max, pool_size)?;
        self.append(Layer::Pool(layer))
    }
    pub fn append_avg_pool(&mut self, pool_size: usize) -> Result<&mut Self> {
        let layer = Pool::new(PoolKind::Avg, pool_size)?;
        self.append(Layer::Pool(layer))
    }
    pub fn append_flatten(&mut self) -> Result<&mut Self> {
        self.append(Layer::Flatten(Flatten::default()))
    }
    /// Compiles the network with [`thread_rng()`].
    ///
    /// See [`.compile_with_rng()`](Self::compile_with_rng).
    pub fn compile(&mut self) -> Result<()> {
        self.compile_with_rng(&mut thread_rng())
    }
    /// Compiles the network.
    ///
    /// Infers the shape of each layer, allocates buffers, and draws parameters
    /// uniformly from [-1, 1) with `rng`. On error the network is left as it was.
    ///
    /// **Errors**
    /// - [`Error::AlreadyCompiled`]
    /// - [`Error::EmptyNetwork`] if only the input layer was added.
    /// - [`Error::ChannelMismatch`] if a conv layer does not match the channels of its input.
    /// - [`Error::UnsupportedLayerKind`] if a conv or pool layer follows a flat layer.
    /// - [`Error::InvalidParameter`] if a window does not fit its input.
    /// - [`Error::AllocationFailure`]
    pub fn compile_with_rng<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        if self.compiled {
            return Err(Error::AlreadyCompiled);
        }
        if self.layers.len() < 2 {
            return Err(Error::EmptyNetwork);
        }
        let mut layers = self.layers.clone();
        let mut shape = None;
        for (index, layer) in layers.iter_mut().enumerate() {
            let output_shape = layer.compile(index, shape)?;
            tracing::debug!(index, kind = layer.kind(), shape = ?output_shape, "compiled layer");
            shape.replace(output_shape);
        }
        for layer in layers.iter_mut() {
            layer.init_random(rng, -1., 1.)?;
        }
        self.layers = layers;
        self.compiled = true;
        Ok(())
    }
    pub fn is_compiled(&self) -> bool {
        self.compiled
    }
    fn check_compiled(&self, op: &'static str) -> Result<()> {
        if self.compiled {
            Ok(())
        } else {
            Err(Error::UncompiledNetwork { op })
        }
    }
    /// Draws all parameters uniformly from [`min`, `max`) with [`thread_rng()`].
    pub fn init_random(&mut self, min: f64, max: f64) -> Result<()> {
        self.init_random_with_rng(&mut thread_rng(), min, max)
    }
    /// Draws all parameters uniformly from [`min`, `max`) with `rng`.
    ///
    /// **Errors**
    /// - [`Error::UncompiledNetwork`]
    /// - [`Error::InvalidParameter`] unless `min < max`.
    pub fn init_random_with_rng<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        min: f64,
        max: f64,
    ) -> Result<()> {
        self.check_compiled("init_random")?;
        crate::matrix::uniform(min, max)?;
        for layer in self.layers.iter_mut() {
            layer.init_random(rng, min, max)?;
        }
        tracing::debug!(min, max, "initialized parameters");
        Ok(())
    }
    /// Zeros all parameters.
    pub fn init_zero(&mut self) -> Result<()> {
        self.check_compiled("init_zero")?;
        self.layers.iter_mut().for_each(Layer::init_zero);
        Ok(())
    }
    /// The layers, starting with the input.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }
    /// The dense layer at `index`, ie to set its parameters.
    ///
    /// Parameters can be modified but shapes are fixed.
    pub fn dense_mut(&mut self, index: usize) -> Option<&mut Dense> {
        self.layers.get_mut(index).and_then(Layer::as_dense_mut)
    }
    /// The conv2d layer at `index`, ie to set its kernels and biases.
    pub fn conv2d_mut(&mut self, index: usize) -> Option<&mut Conv2d> {
        self.layers.get_mut(index).and_then(Layer::as_conv2d_mut)
    }
    /// The input layer.
    ///
    /// **Errors**
    /// - [`Error::UnsupportedLayerKind`] if the first layer is not an input layer.
    pub fn input(&self) -> Result<&Input> {
        match self.layers.first() {
            Some(Layer::Input(input)) => Ok(input),
            layer => Err(Error::UnsupportedLayerKind {
                index: 0,
                kind: layer.map_or("none", Layer::kind),
            }),
        }
    }
    fn input_mut(&mut self) -> Result<&mut Input> {
        match self.layers.first_mut() {
            Some(Layer::Input(input)) => Ok(input),
            layer => Err(Error::UnsupportedLayerKind {
                index: 0,
                kind: layer.map_or("none", |layer| layer.kind()),
            }),
        }
    }
    /// The number of elements of the output, ie a valid target.
    pub fn output_len(&self) -> Result<usize> {
        Ok(self.outputs()?.iter().map(Matrix::len).sum())
    }
    /// Computes the output for `input`.
    ///
    /// `input` holds the channels concatenated in row-major order, ie
    /// a channels * height x width matrix, a column, or a row.
    ///
    /// **Errors**
    /// - [`Error::UncompiledNetwork`]
    /// - [`Error::LengthMismatch`] if `input` does not have height * width * channels elements.
    /// - [`Error::ChannelMismatch`] if the output has more than 1 channel, see [`.outputs()`](Self::outputs).
    pub fn forward(&mut self, input: &Matrix) -> Result<&Matrix> {
        self.check_compiled("forward")?;
        self.input_mut()?.load(input)?;
        self.propagate()?;
        self.output()
    }
    /// Like [`.forward()`](Self::forward), with one matrix per channel.
    ///
    /// Returns all output channels.
    pub fn forward_channels(&mut self, input: &[Matrix]) -> Result<&[Matrix]> {
        self.check_compiled("forward")?;
        self.input_mut()?.load_channels(input)?;
        self.propagate()?;
        self.outputs()
    }
    /// Like [`.forward()`](Self::forward), returning all output channels as one column.
    pub(crate) fn forward_flat(&mut self, input: &Matrix) -> Result<Matrix> {
        self.check_compiled("forward")?;
        self.input_mut()?.load(input)?;
        self.propagate()?;
        Ok(flatten(self.outputs()?))
    }
    fn propagate(&mut self) -> Result<()> {
        for index in 1..self.layers.len() {
            let (previous, layers) = self.layers.split_at_mut(index);
            layers[0].forward(previous[index - 1].outputs())?;
        }
        Ok(())
    }
    /// The output of the last forward pass.
    ///
    /// **Errors**
    /// - [`Error::UncompiledNetwork`]
    /// - [`Error::ChannelMismatch`] if the last layer has more than 1 channel.
    pub fn output(&self) -> Result<&Matrix> {
        match self.outputs()? {
            [output] => Ok(output),
            outputs => Err(Error::ChannelMismatch {
                op: "output",
                expected: 1,
                found: outputs.len(),
            }),
        }
    }
    /// All channels of the output of the last forward pass.
    pub fn outputs(&self) -> Result<&[Matrix]> {
        self.check_compiled("output")?;
        Ok(self.layers.last().map_or(&[][..], Layer::outputs))
    }
    /// Computes the gradient of the last forward pass given `target`.
    ///
    /// The output error is `output - target`, propagated backwards to the
    /// first hidden layer. `target` may have any shape with as many elements
    /// as the output.
    ///
    /// **Errors**
    /// - [`Error::UncompiledNetwork`]
    /// - [`Error::LengthMismatch`] if `target` does not match the output.
    pub fn backprop(&self, target: &Matrix) -> Result<Gradient> {
        let outputs = self.outputs()?;
        let expected = outputs.iter().map(Matrix::len).sum();
        if target.len() != expected {
            return Err(Error::LengthMismatch {
                op: "backprop",
                expected,
                found: target.len(),
            });
        }
        let mut targets = target.iter();
        let mut error = outputs
            .iter()
            .map(|output| {
                let mut error = output.clone();
                error
                    .iter_mut()
                    .zip(targets.by_ref())
                    .for_each(|(e, t)| *e -= t);
                error
            })
            .collect::<Vec<_>>();
        let mut gradients = Vec::with_capacity(self.layers.len());
        for index in (1..self.layers.len()).rev() {
            let inputs = self.layers[index - 1].outputs();
            let (gradient, input_error) =
                self.layers[index].backward(inputs, &error, index > 1)?;
            gradients.push(gradient);
            if let Some(input_error) = input_error {
                error = input_error;
            }
        }
        gradients.push(LayerGradient::Input);
        gradients.reverse();
        Ok(Gradient::from_layers(gradients))
    }
    /// parameters += alpha * gradient
    ///
    /// The structure of `gradient` is checked before any parameter is updated.
    pub(crate) fn apply_gradient(&mut self, gradient: &Gradient, alpha: f64) -> Result<()> {
        self.check_compiled("apply_gradient")?;
        gradient.check(self)?;
        for (index, (layer, gradient)) in self
            .layers
            .iter_mut()
            .zip(gradient.layers())
            .enumerate()
        {
            layer.apply_gradient(index, gradient, alpha)?;
        }
        Ok(())
    }
    /// The shape of each layer's output.
    pub fn shapes(&self) -> Result<Vec<Shape>> {
        self.check_compiled("shapes")?;
        Ok(self
            .layers
            .iter()
            .map(|layer| match layer {
                Layer::Dense(_) | Layer::Flatten(_) => {
                    Shape::Flat(layer.outputs().iter().map(Matrix::len).sum())
                }
                _ => {
                    let outputs = layer.outputs();
                    let [height, width] = outputs.first().map_or([0, 0], Matrix::dim);
                    Shape::Spatial {
                        height,
                        width,
                        channels: outputs.len(),
                    }
                }
            })
            .collect())
    }
}
