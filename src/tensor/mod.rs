//! Canonical tensor store: period-indexed impedance, tipper and
//! covariance-family stacks.
//!
//! Architecture:
//! ```text
//!   periods: Vec<f64>          shared index axis, input order preserved
//!        │
//!        ├─ impedance              Vec<[[Complex64; 2]; 2]>
//!        ├─ tipper                 Vec<[Complex64; 2]>
//!        ├─ inverse_signal_power   Vec<SquareMatrix>
//!        └─ residual_covariance    Vec<SquareMatrix>
//! ```
//! Every stack's leading length is pinned to the period length the moment
//! it is stored; changing the period axis invalidates all stacks.
use num_complex::Complex64;

use crate::error::ShapeError;

/// One period's impedance: rows (ex, ey) × columns (hx, hy).
pub type ImpedanceMatrix = [[Complex64; 2]; 2];

/// One period's tipper: (hx, hy) → hz.
pub type TipperRow = [Complex64; 2];

/// A complex NaN, the fill value for spans a tensor kind does not cover.
pub fn nan_c64() -> Complex64 {
    Complex64::new(f64::NAN, f64::NAN)
}

// ---------------------------------------------------------------------------
// SquareMatrix – runtime-sized dense complex square matrix
// ---------------------------------------------------------------------------

/// Dense complex square matrix for the covariance-family tensors, whose
/// dimension follows the channel set they were computed over.
#[derive(Debug, Clone, PartialEq)]
pub struct SquareMatrix {
    dim: usize,
    /// Row-major, `dim * dim` values.
    values: Vec<Complex64>,
}

impl SquareMatrix {
    /// A `dim × dim` matrix with every entry set to `value`.
    pub fn filled(dim: usize, value: Complex64) -> Self {
        SquareMatrix {
            dim,
            values: vec![value; dim * dim],
        }
    }

    /// Build from nested rows; fails unless the rows form a square.
    pub fn from_rows(rows: Vec<Vec<Complex64>>) -> Result<Self, ShapeError> {
        let dim = rows.len();
        let values: Vec<Complex64> = rows.into_iter().flatten().collect();
        if values.len() != dim * dim {
            return Err(ShapeError::NotSquare {
                rows: dim,
                len: values.len(),
            });
        }
        Ok(SquareMatrix { dim, values })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn get(&self, row: usize, col: usize) -> Complex64 {
        self.values[row * self.dim + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: Complex64) {
        self.values[row * self.dim + col] = value;
    }

    /// Row-major view of the values.
    pub fn values(&self) -> &[Complex64] {
        &self.values
    }
}

// ---------------------------------------------------------------------------
// TensorStore – the canonical period-indexed container
// ---------------------------------------------------------------------------

/// Period-indexed container for the four transfer-function tensor kinds.
///
/// Presence of a kind is its `Option` being `Some`; the `has_*` probes are
/// pure and never fail. Setters copy the caller's data by value and
/// validate the leading dimension against the current period length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorStore {
    periods: Vec<f64>,
    impedance: Option<Vec<ImpedanceMatrix>>,
    tipper: Option<Vec<TipperRow>>,
    inverse_signal_power: Option<Vec<SquareMatrix>>,
    residual_covariance: Option<Vec<SquareMatrix>>,
}

impl TensorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_periods(&self) -> usize {
        self.periods.len()
    }

    pub fn periods(&self) -> &[f64] {
        &self.periods
    }

    /// Install a new period axis. Every previously stored tensor is
    /// dropped, since stack lengths are pinned to the period length.
    ///
    /// Values must be strictly positive and finite; input order is kept.
    pub fn set_periods(&mut self, periods: Vec<f64>) -> Result<(), ShapeError> {
        for (index, &value) in periods.iter().enumerate() {
            if !(value.is_finite() && value > 0.0) {
                return Err(ShapeError::BadPeriod { index, value });
            }
        }
        self.periods = periods;
        self.impedance = None;
        self.tipper = None;
        self.inverse_signal_power = None;
        self.residual_covariance = None;
        Ok(())
    }

    fn check_len(&self, kind: &'static str, got: usize) -> Result<(), ShapeError> {
        if got != self.periods.len() {
            return Err(ShapeError::LengthMismatch {
                kind,
                expected: self.periods.len(),
                got,
            });
        }
        Ok(())
    }

    pub fn set_impedance(&mut self, stack: Vec<ImpedanceMatrix>) -> Result<(), ShapeError> {
        self.check_len("impedance", stack.len())?;
        self.impedance = Some(stack);
        Ok(())
    }

    pub fn set_tipper(&mut self, stack: Vec<TipperRow>) -> Result<(), ShapeError> {
        self.check_len("tipper", stack.len())?;
        self.tipper = Some(stack);
        Ok(())
    }

    pub fn set_inverse_signal_power(
        &mut self,
        stack: Vec<SquareMatrix>,
    ) -> Result<(), ShapeError> {
        self.check_len("inverse_signal_power", stack.len())?;
        check_uniform("inverse_signal_power", &stack)?;
        self.inverse_signal_power = Some(stack);
        Ok(())
    }

    pub fn set_residual_covariance(
        &mut self,
        stack: Vec<SquareMatrix>,
    ) -> Result<(), ShapeError> {
        self.check_len("residual_covariance", stack.len())?;
        check_uniform("residual_covariance", &stack)?;
        self.residual_covariance = Some(stack);
        Ok(())
    }

    pub fn has_impedance(&self) -> bool {
        self.impedance.is_some()
    }

    pub fn has_tipper(&self) -> bool {
        self.tipper.is_some()
    }

    pub fn has_inverse_signal_power(&self) -> bool {
        self.inverse_signal_power.is_some()
    }

    pub fn has_residual_covariance(&self) -> bool {
        self.residual_covariance.is_some()
    }

    pub fn impedance(&self) -> Option<&[ImpedanceMatrix]> {
        self.impedance.as_deref()
    }

    pub fn tipper(&self) -> Option<&[TipperRow]> {
        self.tipper.as_deref()
    }

    pub fn inverse_signal_power(&self) -> Option<&[SquareMatrix]> {
        self.inverse_signal_power.as_deref()
    }

    pub fn residual_covariance(&self) -> Option<&[SquareMatrix]> {
        self.residual_covariance.as_deref()
    }
}

/// All matrices in one covariance-family stack must share one dimension.
fn check_uniform(kind: &'static str, stack: &[SquareMatrix]) -> Result<(), ShapeError> {
    let Some(first) = stack.first() else {
        return Ok(());
    };
    let expected = first.dim();
    for (index, m) in stack.iter().enumerate().skip(1) {
        if m.dim() != expected {
            return Err(ShapeError::RaggedStack {
                kind,
                index,
                expected,
                got: m.dim(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn z_stack(n: usize) -> Vec<ImpedanceMatrix> {
        (0..n)
            .map(|i| {
                let v = c(i as f64, -(i as f64));
                [[v, v], [v, v]]
            })
            .collect()
    }

    #[test]
    fn set_periods_rejects_non_positive() {
        let mut store = TensorStore::new();
        let err = store.set_periods(vec![1.0, -2.0]).unwrap_err();
        match err {
            ShapeError::BadPeriod { index, value } => {
                assert_eq!(index, 1);
                assert_eq!(value, -2.0);
            }
            other => panic!("expected BadPeriod, got {other}"),
        }
        assert!(store.set_periods(vec![1.0, f64::NAN]).is_err());
        assert!(store.set_periods(vec![f64::INFINITY]).is_err());
    }

    #[test]
    fn set_periods_resets_all_tensors() {
        let mut store = TensorStore::new();
        store.set_periods(vec![1.0, 2.0]).unwrap();
        store.set_impedance(z_stack(2)).unwrap();
        store.set_tipper(vec![[c(0.1, 0.2), c(0.3, 0.4)]; 2]).unwrap();
        assert!(store.has_impedance());
        assert!(store.has_tipper());

        store.set_periods(vec![1.0, 2.0, 3.0]).unwrap();
        assert!(!store.has_impedance());
        assert!(!store.has_tipper());
        assert!(!store.has_inverse_signal_power());
        assert!(!store.has_residual_covariance());
    }

    #[test]
    fn leading_length_is_pinned_to_period_length() {
        let mut store = TensorStore::new();
        store.set_periods(vec![1.0, 2.0, 3.0]).unwrap();
        let err = store.set_impedance(z_stack(2)).unwrap_err();
        match err {
            ShapeError::LengthMismatch { kind, expected, got } => {
                assert_eq!(kind, "impedance");
                assert_eq!(expected, 3);
                assert_eq!(got, 2);
            }
            other => panic!("expected LengthMismatch, got {other}"),
        }
    }

    #[test]
    fn setters_copy_by_value() {
        let mut store = TensorStore::new();
        store.set_periods(vec![1.0]).unwrap();
        let mut mine = z_stack(1);
        store.set_impedance(mine.clone()).unwrap();
        mine[0][0][0] = c(99.0, 99.0);
        assert_eq!(store.impedance().unwrap()[0][0][0], c(0.0, 0.0));
    }

    #[test]
    fn covariance_stack_must_be_uniform() {
        let mut store = TensorStore::new();
        store.set_periods(vec![1.0, 2.0]).unwrap();
        let stack = vec![
            SquareMatrix::filled(2, c(1.0, 0.0)),
            SquareMatrix::filled(3, c(1.0, 0.0)),
        ];
        let err = store.set_inverse_signal_power(stack).unwrap_err();
        assert!(matches!(err, ShapeError::RaggedStack { index: 1, .. }));
    }

    #[test]
    fn square_matrix_from_rows_rejects_ragged() {
        let rows = vec![vec![c(1.0, 0.0), c(2.0, 0.0)], vec![c(3.0, 0.0)]];
        assert!(SquareMatrix::from_rows(rows).is_err());

        let good = SquareMatrix::from_rows(vec![
            vec![c(1.0, 0.0), c(2.0, 0.0)],
            vec![c(3.0, 0.0), c(4.0, 0.0)],
        ])
        .unwrap();
        assert_eq!(good.dim(), 2);
        assert_eq!(good.get(1, 0), c(3.0, 0.0));
    }

    #[test]
    fn probes_are_pure_on_empty_store() {
        let store = TensorStore::new();
        assert!(!store.has_impedance());
        assert!(!store.has_tipper());
        assert!(store.impedance().is_none());
        assert_eq!(store.n_periods(), 0);
    }
}
