//! Merge engine: combine two transfer functions over their period axes.
//!
//! The result spans `self`'s filtered periods followed by `other`'s, each
//! operand's internal order preserved (no global re-sort, duplicates kept).
//! A tensor kind present in only one operand is NaN-filled over the other
//! operand's span so every stack keeps the shared period length. Metadata
//! is copied from the first operand only. All result storage is freshly
//! allocated; neither input is mutated.

use crate::error::TfError;
use crate::tensor::{nan_c64, ImpedanceMatrix, SquareMatrix, TipperRow};

use super::TF;

// ---------------------------------------------------------------------------
// Operands and bounds
// ---------------------------------------------------------------------------

/// Inclusive period-axis bounds; `None` leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeriodBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl PeriodBounds {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        PeriodBounds { min, max }
    }

    fn contains(&self, period: f64) -> bool {
        self.min.map_or(true, |min| period >= min) && self.max.map_or(true, |max| period <= max)
    }
}

/// The second merge operand: a transfer function plus optional bounds
/// applied only to it.
///
/// A hand-built operand must carry its transfer function; one without it
/// fails the merge with [`TfError::MissingOperand`].
#[derive(Debug, Clone, Default)]
pub struct MergeOperand {
    pub tf: Option<TF>,
    pub bounds: PeriodBounds,
}

impl MergeOperand {
    pub fn new(tf: TF) -> Self {
        MergeOperand {
            tf: Some(tf),
            bounds: PeriodBounds::default(),
        }
    }

    pub fn bounded(tf: TF, min: Option<f64>, max: Option<f64>) -> Self {
        MergeOperand {
            tf: Some(tf),
            bounds: PeriodBounds::new(min, max),
        }
    }
}

impl From<TF> for MergeOperand {
    fn from(tf: TF) -> Self {
        MergeOperand::new(tf)
    }
}

impl From<&TF> for MergeOperand {
    fn from(tf: &TF) -> Self {
        MergeOperand::new(tf.clone())
    }
}

// ---------------------------------------------------------------------------
// The merge algorithm
// ---------------------------------------------------------------------------

/// Indices of the periods a bound keeps, in original order.
fn kept_indices(periods: &[f64], bounds: PeriodBounds) -> Vec<usize> {
    periods
        .iter()
        .enumerate()
        .filter(|(_, &p)| bounds.contains(p))
        .map(|(i, _)| i)
        .collect()
}

/// Concatenate one tensor kind across both operands, NaN-filling the spans
/// of an operand that lacks it.
fn concat_stacks<T: Clone>(
    left: Option<&[T]>,
    left_kept: &[usize],
    right: Option<&[T]>,
    right_kept: &[usize],
    fill: &T,
) -> Option<Vec<T>> {
    if left.is_none() && right.is_none() {
        return None;
    }
    let mut out = Vec::with_capacity(left_kept.len() + right_kept.len());
    match left {
        Some(stack) => out.extend(left_kept.iter().map(|&i| stack[i].clone())),
        None => out.extend(std::iter::repeat(fill.clone()).take(left_kept.len())),
    }
    match right {
        Some(stack) => out.extend(right_kept.iter().map(|&i| stack[i].clone())),
        None => out.extend(std::iter::repeat(fill.clone()).take(right_kept.len())),
    }
    Some(out)
}

/// The square-kind dimension both operands must agree on; a kind present in
/// one operand only adopts that operand's dimension.
fn square_dim(
    kind: &'static str,
    left: Option<&[SquareMatrix]>,
    right: Option<&[SquareMatrix]>,
) -> Result<Option<usize>, TfError> {
    let left_dim = left.and_then(|s| s.first()).map(SquareMatrix::dim);
    let right_dim = right.and_then(|s| s.first()).map(SquareMatrix::dim);
    match (left_dim, right_dim) {
        (Some(l), Some(r)) if l != r => Err(TfError::IncompatibleOperands {
            kind,
            left: l,
            right: r,
        }),
        (Some(d), _) | (_, Some(d)) => Ok(Some(d)),
        (None, None) => Ok(None),
    }
}

pub(super) fn merge(left: &TF, operand: &MergeOperand, bounds: PeriodBounds) -> Result<TF, TfError> {
    let right = operand.tf.as_ref().ok_or(TfError::MissingOperand)?;

    let left_kept = kept_indices(left.periods(), bounds);
    let right_kept = kept_indices(right.periods(), operand.bounds);

    // Check component-axis compatibility before allocating anything.
    let isp_dim = square_dim(
        "inverse_signal_power",
        left.inverse_signal_power(),
        right.inverse_signal_power(),
    )?;
    let rc_dim = square_dim(
        "residual_covariance",
        left.residual_covariance(),
        right.residual_covariance(),
    )?;

    let mut periods = Vec::with_capacity(left_kept.len() + right_kept.len());
    periods.extend(left_kept.iter().map(|&i| left.periods()[i]));
    periods.extend(right_kept.iter().map(|&i| right.periods()[i]));

    let mut merged = TF::new();
    merged.set_periods(periods)?;

    let z_fill: ImpedanceMatrix = [[nan_c64(); 2]; 2];
    if let Some(stack) = concat_stacks(
        left.impedance(),
        &left_kept,
        right.impedance(),
        &right_kept,
        &z_fill,
    ) {
        merged.set_impedance(stack)?;
    }
    let t_fill: TipperRow = [nan_c64(); 2];
    if let Some(stack) = concat_stacks(
        left.tipper(),
        &left_kept,
        right.tipper(),
        &right_kept,
        &t_fill,
    ) {
        merged.set_tipper(stack)?;
    }
    if let Some(dim) = isp_dim {
        let fill = SquareMatrix::filled(dim, nan_c64());
        if let Some(stack) = concat_stacks(
            left.inverse_signal_power(),
            &left_kept,
            right.inverse_signal_power(),
            &right_kept,
            &fill,
        ) {
            merged.set_inverse_signal_power(stack)?;
        }
    }
    if let Some(dim) = rc_dim {
        let fill = SquareMatrix::filled(dim, nan_c64());
        if let Some(stack) = concat_stacks(
            left.residual_covariance(),
            &left_kept,
            right.residual_covariance(),
            &right_kept,
            &fill,
        ) {
            merged.set_residual_covariance(stack)?;
        }
    }

    // First-operand-wins: no reconciliation with `other`'s metadata.
    *merged.survey_mut() = left.survey().clone();
    *merged.station_mut() = left.station().clone();
    *merged.runs_mut() = left.runs().to_vec();
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    fn tf_with(periods: &[f64], z_re: f64) -> TF {
        let mut tf = TF::new();
        tf.set_periods(periods.to_vec()).unwrap();
        let z = vec![[[Complex64::new(z_re, 0.0); 2]; 2]; periods.len()];
        tf.set_impedance(z).unwrap();
        tf
    }

    #[test]
    fn concatenates_with_inclusive_self_bounds() {
        let mut left = tf_with(&[1.0, 2.0, 3.0, 10.0], 1.0);
        left.station_mut().id = "left".to_string();
        let right = tf_with(&[10.0, 11.0, 12.0], 2.0);

        let merged = left
            .merge(&right, PeriodBounds::new(Some(0.0), Some(9.9)))
            .unwrap();
        // Left's 10 is excluded by the upper bound; right is appended
        // unfiltered.
        assert_eq!(merged.periods(), &[1.0, 2.0, 3.0, 10.0, 11.0, 12.0]);
        let z = merged.impedance().unwrap();
        assert_eq!(z[2][0][0].re, 1.0);
        assert_eq!(z[3][0][0].re, 2.0);
        // Inputs untouched.
        assert_eq!(left.periods(), &[1.0, 2.0, 3.0, 10.0]);
        assert_eq!(right.periods(), &[10.0, 11.0, 12.0]);
    }

    #[test]
    fn bounds_are_inclusive_at_equality() {
        let left = tf_with(&[1.0, 5.0, 10.0], 1.0);
        let right = tf_with(&[20.0], 2.0);
        let merged = left
            .merge(&right, PeriodBounds::new(Some(5.0), Some(10.0)))
            .unwrap();
        assert_eq!(merged.periods(), &[5.0, 10.0, 20.0]);
    }

    #[test]
    fn operand_bounds_filter_other_only() {
        let left = tf_with(&[1.0, 2.0], 1.0);
        let right = tf_with(&[5.0, 50.0, 500.0], 2.0);
        let merged = left
            .merge(
                MergeOperand::bounded(right, Some(10.0), Some(100.0)),
                PeriodBounds::default(),
            )
            .unwrap();
        assert_eq!(merged.periods(), &[1.0, 2.0, 50.0]);
    }

    #[test]
    fn operand_order_is_preserved_without_resort() {
        let left = tf_with(&[10.0, 1.0], 1.0);
        let right = tf_with(&[5.0, 2.0], 2.0);
        let merged = left.merge(&right, PeriodBounds::default()).unwrap();
        assert_eq!(merged.periods(), &[10.0, 1.0, 5.0, 2.0]);
    }

    #[test]
    fn metadata_comes_from_self_only() {
        let mut left = tf_with(&[1.0], 1.0);
        left.station_mut().id = "left".to_string();
        left.survey_mut().name = "left survey".to_string();
        let mut right = tf_with(&[2.0], 2.0);
        right.station_mut().id = "right".to_string();

        let merged = left.merge(&right, PeriodBounds::default()).unwrap();
        assert_eq!(merged.station(), left.station());
        assert_eq!(merged.survey(), left.survey());
    }

    #[test]
    fn kind_present_in_one_operand_is_nan_filled() {
        let left = tf_with(&[1.0, 2.0], 1.0);
        let mut right = TF::new();
        right.set_periods(vec![10.0]).unwrap();
        right
            .set_tipper(vec![[Complex64::new(0.5, 0.5); 2]])
            .unwrap();

        let merged = left.merge(&right, PeriodBounds::default()).unwrap();
        let z = merged.impedance().unwrap();
        assert_eq!(z.len(), 3);
        assert_eq!(z[0][0][0].re, 1.0);
        assert!(z[2][0][0].re.is_nan());
        let t = merged.tipper().unwrap();
        assert!(t[0][0].re.is_nan());
        assert_eq!(t[2][0].re, 0.5);
    }

    #[test]
    fn incompatible_square_dimensions_fail() {
        let mut left = tf_with(&[1.0], 1.0);
        left.set_residual_covariance(vec![SquareMatrix::filled(3, nan_c64())])
            .unwrap();
        let mut right = tf_with(&[2.0], 2.0);
        right
            .set_residual_covariance(vec![SquareMatrix::filled(2, nan_c64())])
            .unwrap();

        let err = left.merge(&right, PeriodBounds::default()).unwrap_err();
        assert!(matches!(
            err,
            TfError::IncompatibleOperands {
                kind: "residual_covariance",
                left: 3,
                right: 2,
            }
        ));
    }

    #[test]
    fn square_kind_in_one_operand_adopts_its_dimension() {
        let mut left = tf_with(&[1.0], 1.0);
        left.set_inverse_signal_power(vec![SquareMatrix::filled(2, Complex64::new(1.0, 0.0))])
            .unwrap();
        let right = tf_with(&[2.0], 2.0);

        let merged = left.merge(&right, PeriodBounds::default()).unwrap();
        let isp = merged.inverse_signal_power().unwrap();
        assert_eq!(isp.len(), 2);
        assert_eq!(isp[0].dim(), 2);
        assert!(isp[1].get(0, 0).re.is_nan());
    }

    #[test]
    fn operand_without_tf_is_a_missing_key_error() {
        let left = tf_with(&[1.0], 1.0);
        let operand = MergeOperand {
            tf: None,
            bounds: PeriodBounds::new(Some(1.0), None),
        };
        let err = left.merge(operand, PeriodBounds::default()).unwrap_err();
        assert!(matches!(err, TfError::MissingOperand));
    }
}
