//! Errors.
//!
//! Every variant describes a contract violation. Operations check their
//! preconditions before touching any buffer, so an [`Err`] never leaves a
//! network or matrix partially updated.

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type of the crate.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    /// Matrix shapes are incompatible for `op`.
    #[error("{op}: incompatible shapes {lhs:?} and {rhs:?}")]
    DimensionMismatch {
        op: &'static str,
        lhs: [usize; 2],
        rhs: [usize; 2],
    },
    /// Channel counts disagree.
    #[error("{op}: expected {expected} channels, found {found}")]
    ChannelMismatch {
        op: &'static str,
        expected: usize,
        found: usize,
    },
    /// Element counts disagree.
    #[error("{op}: expected {expected} elements, found {found}")]
    LengthMismatch {
        op: &'static str,
        expected: usize,
        found: usize,
    },
    /// Layer `index` of a gradient does not match its counterpart.
    #[error("{op}: layer {index} has a different structure")]
    LayerMismatch { op: &'static str, index: usize },
    /// A buffer of `elems` doubles could not be allocated.
    #[error("unable to allocate {elems} elements")]
    AllocationFailure { elems: usize },
    /// Layer `index` cannot be placed where it is.
    #[error("layer {index} ({kind}) is not supported at this position")]
    UnsupportedLayerKind { index: usize, kind: &'static str },
    /// `fit` was called with a batch size of 0.
    #[error("batch size must be greater than 0")]
    InvalidBatchSize,
    /// `op` requires a compiled network.
    #[error("{op} requires a compiled network")]
    UncompiledNetwork { op: &'static str },
    /// Layers can only be appended before compile.
    #[error("network is already compiled")]
    AlreadyCompiled,
    /// Compile was called with only the input layer.
    #[error("network has no layers after the input")]
    EmptyNetwork,
    /// A hyperparameter is out of range.
    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

impl Error {
    pub(crate) fn dimension_mismatch(op: &'static str, lhs: [usize; 2], rhs: [usize; 2]) -> Self {
        Self::DimensionMismatch { op, lhs, rhs }
    }
    pub(crate) fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
