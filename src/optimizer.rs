//! Optimizers.
use crate::{
    error::{Error, Result},
    gradient::Gradient,
    network::Network,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Optimizer builders.
pub mod builder {
    use super::*;

    /// Builder for creating a [`Sgd`].
    #[derive(Debug)]
    pub struct SgdBuilder {
        learning_rate: f64,
        momentum: Option<f64>,
    }

    impl SgdBuilder {
        pub(super) fn new() -> Self {
            Self {
                learning_rate: 0.01,
                momentum: None,
            }
        }
        /// Learning rate. Default is 0.01.
        pub fn learning_rate(self, learning_rate: f64) -> Self {
            Self {
                learning_rate,
                ..self
            }
        }
        /// Momentum. Default is 0.
        ///
        /// If `momentum` is greater than 0, a velocity mirroring the gradient
        /// is kept between steps.
        pub fn momentum(self, momentum: f64) -> Self {
            Self {
                momentum: Some(momentum),
                ..self
            }
        }
        /// Builds the optimizer.
        ///
        /// **Errors**
        /// [`Error::InvalidParameter`] unless the learning rate is finite and
        /// positive and the momentum is in [0, 1).
        pub fn build(self) -> Result<Sgd> {
            let Self {
                learning_rate,
                momentum,
            } = self;
            if !(learning_rate.is_finite() && learning_rate > 0.) {
                return Err(Error::invalid_parameter(
                    "learning_rate",
                    format!("expected a finite value > 0, found {learning_rate}"),
                ));
            }
            if let Some(momentum) = momentum {
                if !(0. ..1.).contains(&momentum) {
                    return Err(Error::invalid_parameter(
                        "momentum",
                        format!("expected a value in [0, 1), found {momentum}"),
                    ));
                }
            }
            Ok(Sgd {
                learning_rate,
                momentum: momentum.filter(|m| *m > 0.),
                velocity: None,
            })
        }
    }
}
use builder::SgdBuilder;

/// Optimizer.
pub trait Optimizer {
    /// Updates the parameters of `network` with `gradient`, the sum of the
    /// gradients of `batch_size` samples.
    ///
    /// **Errors**
    /// - [`Error::InvalidBatchSize`] if `batch_size` is 0.
    /// - [`Error::LayerMismatch`] if `gradient` was not computed by `network`.
    fn step(&mut self, network: &mut Network, gradient: &Gradient, batch_size: usize)
        -> Result<()>;
}

/// Stochastic gradient descent.
///
/// `p -= learning_rate * g / batch_size`
///
/// With momentum:
/// ```text
/// v = momentum * v + g / batch_size
/// p -= learning_rate * v
/// ```
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sgd {
    learning_rate: f64,
    momentum: Option<f64>,
    #[cfg_attr(feature = "serde", serde(skip))]
    velocity: Option<Gradient>,
}

impl Sgd {
    /// Sgd with `learning_rate`.
    ///
    /// See [`SgdBuilder::build()`].
    pub fn new(learning_rate: f64) -> Result<Self> {
        Self::builder().learning_rate(learning_rate).build()
    }
    /// A builder for creating a [`Sgd`].
    pub fn builder() -> SgdBuilder {
        SgdBuilder::new()
    }
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
    pub fn momentum(&self) -> f64 {
        self.momentum.unwrap_or(0.)
    }
}

impl Optimizer for Sgd {
    fn step(
        &mut self,
        network: &mut Network,
        gradient: &Gradient,
        batch_size: usize,
    ) -> Result<()> {
        if batch_size == 0 {
            return Err(Error::InvalidBatchSize);
        }
        let scale = 1. / batch_size as f64;
        if let Some(momentum) = self.momentum {
            gradient.check(network)?;
            let velocity = match self.velocity.take() {
                Some(mut velocity) if velocity.check(network).is_ok() => {
                    velocity.scale(momentum);
                    velocity
                }
                _ => Gradient::zeros(network)?,
            };
            let velocity = self.velocity.insert(velocity);
            velocity.scaled_add(scale, gradient)?;
            network.apply_gradient(velocity, -self.learning_rate)?;
        } else {
            network.apply_gradient(gradient, -self.learning_rate * scale)?;
        }
        tracing::trace!(
            learning_rate = self.learning_rate,
            batch_size,
            "optimizer step"
        );
        Ok(())
    }
}
