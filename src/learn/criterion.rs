//! Losses and metrics.
use crate::{
    error::{Error, Result},
    matrix::Matrix,
};

/// Evaluates `input` against `target`.
pub trait Criterion<X, T> {
    type Output;
    fn eval(&self, input: X, target: T) -> Result<Self::Output>;
}

fn check_len(op: &'static str, input: &Matrix, target: &Matrix) -> Result<()> {
    if input.len() == target.len() {
        Ok(())
    } else {
        Err(Error::LengthMismatch {
            op,
            expected: input.len(),
            found: target.len(),
        })
    }
}

/// Cross entropy `-Σ t ln(y)`.
///
/// Expects probabilities, ie the output of a softmax. `y` is clamped to the
/// smallest positive value so that the loss stays finite.
#[derive(Default, Clone, Copy, Debug)]
pub struct CrossEntropyLoss;

impl Criterion<&Matrix, &Matrix> for CrossEntropyLoss {
    type Output = f64;
    fn eval(&self, input: &Matrix, target: &Matrix) -> Result<f64> {
        check_len("cross_entropy_loss", input, target)?;
        Ok(-input
            .iter()
            .zip(target.iter())
            .map(|(y, t)| t * y.max(f64::MIN_POSITIVE).ln())
            .sum::<f64>())
    }
}

/// Half the sum of squared errors, `Σ (y - t)² / 2`.
///
/// Its gradient is the output error `y - t` used by backprop.
#[derive(Default, Clone, Copy, Debug)]
pub struct MeanSquaredError;

impl Criterion<&Matrix, &Matrix> for MeanSquaredError {
    type Output = f64;
    fn eval(&self, input: &Matrix, target: &Matrix) -> Result<f64> {
        check_len("mean_squared_error", input, target)?;
        Ok(input
            .iter()
            .zip(target.iter())
            .map(|(y, t)| (y - t) * (y - t))
            .sum::<f64>()
            / 2.)
    }
}

/// Accuracy.
///
/// 1 if the first maximum of the input and the target are at the same index, else 0.
#[derive(Default, Clone, Copy, Debug)]
pub struct Accuracy;

impl Criterion<&Matrix, &Matrix> for Accuracy {
    type Output = usize;
    fn eval(&self, input: &Matrix, target: &Matrix) -> Result<usize> {
        check_len("accuracy", input, target)?;
        Ok((argmax(input) == argmax(target)) as usize)
    }
}

fn argmax(x: &Matrix) -> Option<usize> {
    let mut max = f64::NEG_INFINITY;
    let mut max_index = None;
    for (i, x) in x.iter().copied().enumerate() {
        if x > max || max_index.is_none() {
            max = x;
            max_index = Some(i);
        }
    }
    max_index
}
