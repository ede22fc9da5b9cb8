//! Transfer-function facade: the public entry point over one canonical
//! record.
//!
//! Architecture:
//! ```text
//!   TF::read ──▶ Format::detect (sniff) ──▶ adapter.parse ──▶ Record
//!      │                                                        │
//!      ├─ validated period/tensor setters (TfError) ────────────┤
//!      └─ TF::merge ──▶ new TF (union of period axes) ◀─────────┘
//! ```
//! `ShapeError`/`TfError` raised below are never caught or downgraded here;
//! they propagate directly to the caller.
use std::path::Path;

use crate::error::{FormatError, TfError};
use crate::formats::Format;
use crate::metadata::{Run, Station, Survey};
use crate::record::Record;
use crate::tensor::{ImpedanceMatrix, SquareMatrix, TipperRow};

mod merge;

pub use merge::{MergeOperand, PeriodBounds};

/// One station's transfer functions plus their metadata, behind validated
/// accessors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TF {
    record: Record,
}

impl TF {
    /// An empty transfer function; populate it with [`TF::read`] or the
    /// setters.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_record(record: Record) -> Self {
        TF { record }
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    // ---- File I/O ------------------------------------------------------

    /// Read a file, picking the adapter by extension or content signature.
    pub fn read(path: &Path) -> Result<Self, FormatError> {
        let content = std::fs::read_to_string(path)?;
        let format = Format::detect(path, &content).ok_or_else(|| FormatError::UnknownFormat {
            path: path.display().to_string(),
        })?;
        log::debug!("reading {} as {format}", path.display());
        Self::from_text(&content, format)
    }

    /// Read a file with an explicitly chosen adapter.
    pub fn read_as(path: &Path, format: Format) -> Result<Self, FormatError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_text(&content, format)
    }

    /// Parse in-memory content with the given adapter.
    pub fn from_text(content: &str, format: Format) -> Result<Self, FormatError> {
        Ok(TF {
            record: format.parse(content)?,
        })
    }

    /// Serialize to a file in the given format. The file handle is opened,
    /// written and closed within this call.
    pub fn write(&self, path: &Path, format: Format) -> Result<(), FormatError> {
        let content = format.serialize(&self.record)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_text(&self, format: Format) -> Result<String, FormatError> {
        format.serialize(&self.record)
    }

    // ---- Period axis ---------------------------------------------------

    pub fn periods(&self) -> &[f64] {
        self.record.data.periods()
    }

    pub fn n_periods(&self) -> usize {
        self.record.data.n_periods()
    }

    /// 1/period, recomputed on every call.
    pub fn frequencies(&self) -> Vec<f64> {
        self.record.data.periods().iter().map(|p| 1.0 / p).collect()
    }

    /// Install a new period axis. Every stored tensor is dropped, since
    /// tensor lengths are pinned to the period length.
    pub fn set_periods(&mut self, periods: Vec<f64>) -> Result<(), TfError> {
        self.record.data.set_periods(periods)?;
        Ok(())
    }

    // ---- Tensor setters: period-axis mismatch is a domain error --------

    fn check_period_len(&self, got: usize) -> Result<(), TfError> {
        let expected = self.record.data.n_periods();
        if got != expected {
            return Err(TfError::PeriodMismatch { expected, got });
        }
        Ok(())
    }

    pub fn set_impedance(&mut self, stack: Vec<ImpedanceMatrix>) -> Result<(), TfError> {
        self.check_period_len(stack.len())?;
        self.record.data.set_impedance(stack)?;
        Ok(())
    }

    pub fn set_tipper(&mut self, stack: Vec<TipperRow>) -> Result<(), TfError> {
        self.check_period_len(stack.len())?;
        self.record.data.set_tipper(stack)?;
        Ok(())
    }

    pub fn set_inverse_signal_power(&mut self, stack: Vec<SquareMatrix>) -> Result<(), TfError> {
        self.check_period_len(stack.len())?;
        self.record.data.set_inverse_signal_power(stack)?;
        Ok(())
    }

    pub fn set_residual_covariance(&mut self, stack: Vec<SquareMatrix>) -> Result<(), TfError> {
        self.check_period_len(stack.len())?;
        self.record.data.set_residual_covariance(stack)?;
        Ok(())
    }

    // ---- Tensor accessors ----------------------------------------------

    pub fn impedance(&self) -> Option<&[ImpedanceMatrix]> {
        self.record.data.impedance()
    }

    pub fn tipper(&self) -> Option<&[TipperRow]> {
        self.record.data.tipper()
    }

    pub fn inverse_signal_power(&self) -> Option<&[SquareMatrix]> {
        self.record.data.inverse_signal_power()
    }

    pub fn residual_covariance(&self) -> Option<&[SquareMatrix]> {
        self.record.data.residual_covariance()
    }

    pub fn has_impedance(&self) -> bool {
        self.record.data.has_impedance()
    }

    pub fn has_tipper(&self) -> bool {
        self.record.data.has_tipper()
    }

    pub fn has_inverse_signal_power(&self) -> bool {
        self.record.data.has_inverse_signal_power()
    }

    pub fn has_residual_covariance(&self) -> bool {
        self.record.data.has_residual_covariance()
    }

    // ---- Metadata ------------------------------------------------------

    pub fn survey(&self) -> &Survey {
        &self.record.survey
    }

    pub fn survey_mut(&mut self) -> &mut Survey {
        &mut self.record.survey
    }

    pub fn station(&self) -> &Station {
        &self.record.station
    }

    pub fn station_mut(&mut self) -> &mut Station {
        &mut self.record.station
    }

    pub fn runs(&self) -> &[Run] {
        &self.record.runs
    }

    pub fn runs_mut(&mut self) -> &mut Vec<Run> {
        &mut self.record.runs
    }

    // ---- Merge ---------------------------------------------------------

    /// Combine `self` and `other` into a new TF spanning both period
    /// ranges. `bounds` filters `self`; the operand's own bounds filter
    /// `other`; all bounds are inclusive. Neither input is mutated.
    pub fn merge(
        &self,
        other: impl Into<MergeOperand>,
        bounds: PeriodBounds,
    ) -> Result<TF, TfError> {
        merge::merge(self, &other.into(), bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::nan_c64;

    fn z_stack(n: usize) -> Vec<ImpedanceMatrix> {
        vec![[[nan_c64(); 2]; 2]; n]
    }

    #[test]
    fn period_mismatch_is_a_domain_error() {
        let mut tf = TF::new();
        tf.set_periods(vec![1.0, 2.0, 3.0]).unwrap();
        let err = tf.set_impedance(z_stack(2)).unwrap_err();
        match err {
            TfError::PeriodMismatch { expected, got } => {
                assert_eq!(expected, 3);
                assert_eq!(got, 2);
            }
            other => panic!("expected PeriodMismatch, got {other}"),
        }
    }

    #[test]
    fn set_periods_rejects_bad_values_and_resets() {
        let mut tf = TF::new();
        tf.set_periods(vec![1.0, 2.0]).unwrap();
        tf.set_impedance(z_stack(2)).unwrap();
        assert!(tf.has_impedance());

        assert!(matches!(
            tf.set_periods(vec![1.0, -1.0]),
            Err(TfError::Shape(_))
        ));
        // The failed call left the axis untouched.
        assert_eq!(tf.periods(), &[1.0, 2.0]);

        tf.set_periods(vec![4.0]).unwrap();
        assert!(!tf.has_impedance());
    }

    #[test]
    fn frequencies_are_computed_from_periods() {
        let mut tf = TF::new();
        tf.set_periods(vec![1.0, 10.0, 100.0]).unwrap();
        assert_eq!(tf.frequencies(), vec![1.0, 0.1, 0.01]);
    }

    #[test]
    fn unknown_format_is_a_format_error() {
        let err = TF::read(Path::new("/nonexistent/site.qqq")).unwrap_err();
        // Extension and content both unknown (the read itself fails first
        // here; a missing file surfaces as Io).
        assert!(matches!(err, FormatError::Io(_)));
    }

    #[test]
    fn probes_delegate_to_the_store() {
        let tf = TF::new();
        assert!(!tf.has_impedance());
        assert!(!tf.has_tipper());
        assert!(!tf.has_inverse_signal_power());
        assert!(!tf.has_residual_covariance());
    }
}
