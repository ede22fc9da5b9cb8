use thiserror::Error;

// ---------------------------------------------------------------------------
// Error taxonomy: format / shape / domain
// ---------------------------------------------------------------------------

/// A mandatory part of the declared or sniffed file format is missing or
/// malformed. Optional content never raises this; it is skipped with a
/// `log::warn!` diagnostic instead.
#[derive(Error, Debug)]
pub enum FormatError {
    /// No adapter matched the file and none was specified.
    #[error("no format adapter matched '{path}'")]
    UnknownFormat { path: String },

    /// A format-mandatory section is absent.
    #[error("{format}: mandatory section '{section}' is missing")]
    MissingSection {
        format: &'static str,
        section: &'static str,
    },

    /// A format-mandatory construct could not be parsed.
    #[error("{format}: line {line}: {reason}")]
    Malformed {
        format: &'static str,
        /// 1-based line number, 0 when the location is not line-addressable.
        line: usize,
        reason: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A tensor assignment is incompatible with the current period axis or with
/// the tensor kind's fixed trailing shape.
#[derive(Error, Debug)]
pub enum ShapeError {
    /// Period values must be strictly positive and finite.
    #[error("period[{index}] = {value} is not a positive finite number")]
    BadPeriod { index: usize, value: f64 },

    /// Leading dimension of a tensor stack must equal the period length.
    #[error("{kind} has {got} entries but the period axis has {expected}")]
    LengthMismatch {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    /// A covariance-family matrix is not square.
    #[error("matrix is not square ({rows} rows, {len} values)")]
    NotSquare { rows: usize, len: usize },

    /// Matrices within one stack must share a single dimension.
    #[error("{kind}[{index}] has dimension {got}, stack dimension is {expected}")]
    RaggedStack {
        kind: &'static str,
        index: usize,
        expected: usize,
        got: usize,
    },
}

/// A domain-level violation at the transfer-function boundary: a tensor
/// assigned against a mismatching period axis, or merge operands that cannot
/// be combined.
///
/// A wrong-*type* merge argument is unrepresentable here because
/// [`crate::tf::MergeOperand`] is a closed set of variants, leaving
/// [`TfError::MissingOperand`] as the one bad-argument failure.
#[derive(Error, Debug)]
pub enum TfError {
    /// A period-keyed tensor was assigned with the wrong leading length.
    /// Distinct from [`ShapeError`] so callers can tell a domain-model
    /// violation from a raw container failure.
    #[error("tensor covers {got} periods but the transfer function has {expected}")]
    PeriodMismatch { expected: usize, got: usize },

    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// A merge operand was built without its transfer function.
    #[error("merge operand is missing its 'tf' entry")]
    MissingOperand,

    /// Merge operands disagree on a component-axis cardinality.
    #[error("merge operands have incompatible {kind} dimensions: {left} vs {right}")]
    IncompatibleOperands {
        kind: &'static str,
        left: usize,
        right: usize,
    },
}
