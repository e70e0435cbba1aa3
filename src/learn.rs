//! Training.
use crate::{
    error::{Error, Result},
    gradient::Gradient,
    layer::{Activation, Layer},
    matrix::Matrix,
    network::Network,
    optimizer::{Optimizer, Sgd},
};
use self::criterion::{Accuracy, CrossEntropyLoss, Criterion, MeanSquaredError};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

pub mod criterion;

/// Training / Testing statistics.
#[non_exhaustive]
#[derive(Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Stats {
    /// The number of samples.
    pub count: usize,
    /// The mean loss.
    ///
    /// Cross entropy if the last layer is a dense or conv2d layer with softmax
    /// activation, otherwise half the sum of squared errors.
    pub loss: Option<f64>,
    /// The number of correct predictions.
    ///
    /// None for networks with a single output unit.
    pub correct: Option<usize>,
}

impl Stats {
    /// The accuracy as a ratio between 0. and 1.
    ///
    /// If correct is Some, correct / count, else None.
    pub fn accuracy(&self) -> Option<f64> {
        self.correct
            .filter(|_| self.count > 0)
            .map(|correct| correct as f64 / self.count as f64)
    }
}

impl Debug for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("Stats");
        builder.field("count", &self.count);
        if let Some(loss) = self.loss.as_ref() {
            builder.field("loss", loss);
        }
        if let Some(correct) = self.correct.as_ref() {
            builder.field("correct", correct);
        }
        if let Some(accuracy) = self.accuracy() {
            builder.field("accuracy", &accuracy);
        }
        builder.finish()
    }
}

/// Sums loss and correct predictions over samples.
struct StatsBuilder {
    count: usize,
    loss: f64,
    correct: Option<usize>,
    cross_entropy: bool,
}

impl StatsBuilder {
    fn new(network: &Network) -> Result<Self> {
        let cross_entropy = network
            .layers()
            .last()
            .and_then(Layer::activation)
            == Some(Activation::Softmax);
        let correct = if network.output_len()? > 1 {
            Some(0)
        } else {
            None
        };
        Ok(Self {
            count: 0,
            loss: 0.,
            correct,
            cross_entropy,
        })
    }
    fn push(&mut self, output: &Matrix, target: &Matrix) -> Result<()> {
        self.loss += if self.cross_entropy {
            CrossEntropyLoss.eval(output, target)?
        } else {
            MeanSquaredError.eval(output, target)?
        };
        if let Some(correct) = self.correct.as_mut() {
            *correct += Accuracy.eval(output, target)?;
        }
        self.count += 1;
        Ok(())
    }
    fn build(self) -> Stats {
        Stats {
            count: self.count,
            loss: if self.count > 0 {
                Some(self.loss / self.count as f64)
            } else {
                None
            },
            correct: self.correct,
        }
    }
}

/// Each row of `x` and `y` as a column.
fn samples<'a>(x: &'a Matrix, y: &'a Matrix) -> impl Iterator<Item = (Matrix, Matrix)> + 'a {
    (0..x.rows()).map(move |i| {
        (
            Matrix::column(x.view().row(i).to_vec()),
            Matrix::column(y.view().row(i).to_vec()),
        )
    })
}

impl Network {
    fn check_samples(&self, op: &'static str, x: &Matrix, y: &Matrix) -> Result<()> {
        let output_len = self.output_len()?;
        if x.rows() != y.rows() {
            return Err(Error::LengthMismatch {
                op,
                expected: x.rows(),
                found: y.rows(),
            });
        }
        let input_len = self.input()?.shape().len();
        if x.cols() != input_len {
            return Err(Error::LengthMismatch {
                op,
                expected: input_len,
                found: x.cols(),
            });
        }
        if y.cols() != output_len {
            return Err(Error::LengthMismatch {
                op,
                expected: output_len,
                found: y.cols(),
            });
        }
        Ok(())
    }
    /// Trains for one epoch with [`Sgd`].
    ///
    /// See [`.fit_with()`](Self::fit_with).
    pub fn fit(
        &mut self,
        x: &Matrix,
        y: &Matrix,
        batch_size: usize,
        learning_rate: f64,
    ) -> Result<Stats> {
        if batch_size == 0 {
            return Err(Error::InvalidBatchSize);
        }
        let mut optimizer = Sgd::new(learning_rate)?;
        self.fit_with(&mut optimizer, x, y, batch_size)
    }
    /// Trains for one epoch with `optimizer`.
    ///
    /// Each row of `x` is a sample and the same row of `y` its target. Samples
    /// are visited in order; gradients are summed over `batch_size` samples and
    /// then applied. A trailing partial batch is applied with its own size.
    ///
    /// Returns the stats of the outputs seen during training.
    ///
    /// **Errors**
    /// - [`Error::InvalidBatchSize`] if `batch_size` is 0.
    /// - [`Error::UncompiledNetwork`]
    /// - [`Error::LengthMismatch`] if `x` and `y` do not have the same number of
    /// rows, or their rows do not match the input and output of the network.
    ///
    /// Checks are performed before any parameter is updated.
    pub fn fit_with<O: Optimizer>(
        &mut self,
        optimizer: &mut O,
        x: &Matrix,
        y: &Matrix,
        batch_size: usize,
    ) -> Result<Stats> {
        if batch_size == 0 {
            return Err(Error::InvalidBatchSize);
        }
        self.check_samples("fit", x, y)?;
        let _span = tracing::debug_span!("fit", samples = x.rows(), batch_size).entered();
        let mut stats = StatsBuilder::new(self)?;
        let mut gradient = Gradient::zeros(self)?;
        let mut pending = 0;
        for (x, t) in samples(x, y) {
            let output = self.forward_flat(&x)?;
            stats.push(&output, &t)?;
            gradient.accumulate(&self.backprop(&t)?)?;
            pending += 1;
            if pending == batch_size {
                optimizer.step(self, &gradient, pending)?;
                gradient.reset();
                pending = 0;
            }
        }
        if pending > 0 {
            optimizer.step(self, &gradient, pending)?;
        }
        let stats = stats.build();
        tracing::debug!(?stats, "fit");
        Ok(stats)
    }
    /// Computes the stats of the network on `x` and `y` without training.
    ///
    /// **Errors**
    /// See [`.fit_with()`](Self::fit_with).
    pub fn evaluate(&mut self, x: &Matrix, y: &Matrix) -> Result<Stats> {
        self.check_samples("evaluate", x, y)?;
        let mut stats = StatsBuilder::new(self)?;
        for (x, t) in samples(x, y) {
            let output = self.forward_flat(&x)?;
            stats.push(&output, &t)?;
        }
        Ok(stats.build())
    }
}
