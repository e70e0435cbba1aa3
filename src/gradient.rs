//! Gradients.
//!
//! A [`Gradient`] mirrors the layers of a [`Network`]: one [`LayerGradient`]
//! per layer, holding partial derivatives for the parameters of that layer.
//! [`Network::backprop()`] returns a fresh gradient per sample; training sums
//! them across a batch with [`Gradient::accumulate()`] before an optimizer step.
use crate::{
    error::{Error, Result},
    layer::Layer,
    matrix::Matrix,
    network::Network,
};

/// Gradient of a [`Dense`](crate::layer::Dense) layer.
#[derive(Clone, Debug, PartialEq)]
pub struct DenseGradient {
    pub(crate) weights: Matrix,
    pub(crate) bias: f64,
}

impl DenseGradient {
    /// Gradient of the weights, shaped like the weights (inputs x outputs).
    pub fn weights(&self) -> &Matrix {
        &self.weights
    }
    /// Gradient of the shared bias, ie the sum of the unit deltas.
    pub fn bias(&self) -> f64 {
        self.bias
    }
}

/// Gradient of a [`Conv2d`](crate::layer::Conv2d) layer.
#[derive(Clone, Debug, PartialEq)]
pub struct Conv2dGradient {
    pub(crate) kernels: Vec<Matrix>,
    pub(crate) biases: Vec<f64>,
    pub(crate) channels: usize,
}

impl Conv2dGradient {
    /// Gradient of the kernel applied to `channel` by output `kernel`.
    pub fn kernel(&self, kernel: usize, channel: usize) -> Option<&Matrix> {
        if channel < self.channels {
            self.kernels.get(kernel * self.channels + channel)
        } else {
            None
        }
    }
    pub fn kernels(&self) -> &[Matrix] {
        &self.kernels
    }
    pub fn biases(&self) -> &[f64] {
        &self.biases
    }
}

/// Gradient of one layer.
///
/// Layers without parameters have unit variants.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerGradient {
    Input,
    Dense(DenseGradient),
    Conv2d(Conv2dGradient),
    Pool,
    Flatten,
}

impl LayerGradient {
    fn same_structure(&self, rhs: &Self) -> bool {
        match (self, rhs) {
            (Self::Input, Self::Input) | (Self::Pool, Self::Pool) | (Self::Flatten, Self::Flatten) => {
                true
            }
            (Self::Dense(a), Self::Dense(b)) => a.weights.dim() == b.weights.dim(),
            (Self::Conv2d(a), Self::Conv2d(b)) => {
                a.channels == b.channels
                    && a.biases.len() == b.biases.len()
                    && a.kernels.len() == b.kernels.len()
                    && a.kernels
                        .iter()
                        .zip(b.kernels.iter())
                        .all(|(a, b)| a.dim() == b.dim())
            }
            _ => false,
        }
    }
    /// Whether `self` can be applied to `layer`.
    pub(crate) fn matches(&self, layer: &Layer) -> bool {
        match (self, layer) {
            (Self::Input, Layer::Input(_))
            | (Self::Pool, Layer::Pool(_))
            | (Self::Flatten, Layer::Flatten(_)) => true,
            (Self::Dense(grad), Layer::Dense(dense)) => grad.weights.dim() == dense.weights().dim(),
            (Self::Conv2d(grad), Layer::Conv2d(conv)) => {
                grad.channels == conv.channels()
                    && grad.biases.len() == conv.kernel_count()
                    && grad.kernels.len() == conv.kernel_count() * conv.channels()
                    && grad
                        .kernels
                        .iter()
                        .all(|k| k.dim() == [conv.kernel_size(), conv.kernel_size()])
            }
            _ => false,
        }
    }
    fn scale(&mut self, alpha: f64) {
        match self {
            Self::Dense(grad) => {
                grad.weights.view_mut().mapv_inplace(|x| alpha * x);
                grad.bias *= alpha;
            }
            Self::Conv2d(grad) => {
                for kernel in grad.kernels.iter_mut() {
                    kernel.view_mut().mapv_inplace(|x| alpha * x);
                }
                grad.biases.iter_mut().for_each(|b| *b *= alpha);
            }
            Self::Input | Self::Pool | Self::Flatten => (),
        }
    }
    fn scaled_add(&mut self, alpha: f64, rhs: &Self) -> Result<()> {
        match (self, rhs) {
            (Self::Dense(a), Self::Dense(b)) => {
                a.weights.scaled_add(alpha, &b.weights)?;
                a.bias += alpha * b.bias;
            }
            (Self::Conv2d(a), Self::Conv2d(b)) => {
                for (a, b) in a.kernels.iter_mut().zip(b.kernels.iter()) {
                    a.scaled_add(alpha, b)?;
                }
                for (a, b) in a.biases.iter_mut().zip(b.biases.iter()) {
                    *a += alpha * b;
                }
            }
            _ => (),
        }
        Ok(())
    }
    fn reset(&mut self) {
        match self {
            Self::Dense(grad) => {
                grad.weights.fill(0.);
                grad.bias = 0.;
            }
            Self::Conv2d(grad) => {
                grad.kernels.iter_mut().for_each(|k| k.fill(0.));
                grad.biases.iter_mut().for_each(|b| *b = 0.);
            }
            Self::Input | Self::Pool | Self::Flatten => (),
        }
    }
}

/// Gradient of a [`Network`].
#[derive(Clone, Debug, PartialEq)]
pub struct Gradient {
    layers: Vec<LayerGradient>,
}

impl Gradient {
    /// A zeroed gradient shaped like `network`.
    ///
    /// **Errors**
    /// [`Error::UncompiledNetwork`] if `network` is not compiled.
    pub fn zeros(network: &Network) -> Result<Self> {
        if !network.is_compiled() {
            return Err(Error::UncompiledNetwork { op: "gradient" });
        }
        let layers = network
            .layers()
            .iter()
            .map(Layer::zero_gradient)
            .collect::<Result<_>>()?;
        Ok(Self { layers })
    }
    pub(crate) fn from_layers(layers: Vec<LayerGradient>) -> Self {
        Self { layers }
    }
    /// The per layer gradients, in network order.
    pub fn layers(&self) -> &[LayerGradient] {
        &self.layers
    }
    /// The gradient of layer `index`, if it is a dense layer.
    pub fn dense(&self, index: usize) -> Option<&DenseGradient> {
        match self.layers.get(index) {
            Some(LayerGradient::Dense(grad)) => Some(grad),
            _ => None,
        }
    }
    /// The gradient of layer `index`, if it is a conv layer.
    pub fn conv2d(&self, index: usize) -> Option<&Conv2dGradient> {
        match self.layers.get(index) {
            Some(LayerGradient::Conv2d(grad)) => Some(grad),
            _ => None,
        }
    }
    /// self += rhs
    ///
    /// **Errors**
    /// [`Error::LengthMismatch`] or [`Error::LayerMismatch`] if `rhs` does not
    /// have the same structure. `self` is not modified on error.
    pub fn accumulate(&mut self, rhs: &Gradient) -> Result<()> {
        self.scaled_add(1., rhs)
    }
    /// self += alpha * rhs
    ///
    /// **Errors**
    /// See [`.accumulate()`](Self::accumulate).
    pub fn scaled_add(&mut self, alpha: f64, rhs: &Gradient) -> Result<()> {
        if self.layers.len() != rhs.layers.len() {
            return Err(Error::LengthMismatch {
                op: "accumulate_gradient",
                expected: self.layers.len(),
                found: rhs.layers.len(),
            });
        }
        if let Some(index) = self
            .layers
            .iter()
            .zip(rhs.layers.iter())
            .position(|(a, b)| !a.same_structure(b))
        {
            return Err(Error::LayerMismatch {
                op: "accumulate_gradient",
                index,
            });
        }
        for (a, b) in self.layers.iter_mut().zip(rhs.layers.iter()) {
            a.scaled_add(alpha, b)?;
        }
        Ok(())
    }
    /// self *= alpha
    pub fn scale(&mut self, alpha: f64) {
        self.layers.iter_mut().for_each(|x| x.scale(alpha));
    }
    /// Zeros all values, keeping the structure.
    pub fn reset(&mut self) {
        self.layers.iter_mut().for_each(LayerGradient::reset);
    }
    /// Checks that `self` can be applied to `network`.
    pub(crate) fn check(&self, network: &Network) -> Result<()> {
        let layers = network.layers();
        if self.layers.len() != layers.len() {
            return Err(Error::LengthMismatch {
                op: "apply_gradient",
                expected: layers.len(),
                found: self.layers.len(),
            });
        }
        if let Some(index) = self
            .layers
            .iter()
            .zip(layers.iter())
            .position(|(grad, layer)| !grad.matches(layer))
        {
            return Err(Error::LayerMismatch {
                op: "apply_gradient",
                index,
            });
        }
        Ok(())
    }
}
