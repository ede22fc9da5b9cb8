//! Merge-engine scenarios over the public API.

use num_complex::Complex64;

use mt_transfer::{MergeOperand, PeriodBounds, TfError, TF};

fn c(re: f64) -> Complex64 {
    Complex64::new(re, 0.0)
}

fn tf_with(periods: &[f64], marker: f64) -> TF {
    let mut tf = TF::new();
    tf.set_periods(periods.to_vec()).unwrap();
    tf.set_impedance(vec![[[c(marker); 2]; 2]; periods.len()])
        .unwrap();
    tf
}

#[test]
fn band_merge_excludes_selfs_overlap_and_appends_other() {
    let mut broadband = tf_with(&[1.0, 2.0, 3.0, 10.0], 1.0);
    broadband.station_mut().id = "mt01".to_string();
    broadband.station_mut().acquired_by = "ACME".to_string();
    let long_period = tf_with(&[10.0, 11.0, 12.0], 2.0);

    let merged = broadband
        .merge(&long_period, PeriodBounds::new(Some(0.0), Some(9.9)))
        .unwrap();

    // Broadband's 10 s is excluded by the upper bound; the long-period
    // operand is appended unfiltered.
    assert_eq!(merged.periods(), &[1.0, 2.0, 3.0, 10.0, 11.0, 12.0]);
    assert_eq!(merged.impedance().unwrap().len(), merged.periods().len());
    assert_eq!(merged.impedance().unwrap()[2][0][0], c(1.0));
    assert_eq!(merged.impedance().unwrap()[3][0][0], c(2.0));
}

#[test]
fn merged_metadata_equals_self_metadata_exactly() {
    let mut left = tf_with(&[1.0], 1.0);
    left.station_mut().id = "mt01".to_string();
    left.station_mut().latitude = 40.5;
    left.survey_mut().name = "basin survey".to_string();
    let mut right = tf_with(&[2.0], 2.0);
    right.station_mut().id = "other".to_string();
    right.station_mut().latitude = -3.25;
    right.survey_mut().name = "other survey".to_string();

    let merged = left.merge(&right, PeriodBounds::default()).unwrap();
    assert_eq!(merged.station(), left.station());
    assert_eq!(merged.survey(), left.survey());
    assert_eq!(merged.runs(), left.runs());
}

#[test]
fn merge_does_not_mutate_either_operand() {
    let left = tf_with(&[1.0, 2.0], 1.0);
    let right = tf_with(&[3.0], 2.0);
    let (left_before, right_before) = (left.clone(), right.clone());

    let _ = left
        .merge(&right, PeriodBounds::new(Some(1.5), None))
        .unwrap();
    assert_eq!(left, left_before);
    assert_eq!(right, right_before);
}

#[test]
fn one_sided_tensor_kinds_are_nan_filled_to_the_full_axis() {
    let left = tf_with(&[1.0, 2.0], 1.0);
    let mut right = TF::new();
    right.set_periods(vec![10.0, 20.0]).unwrap();
    right
        .set_tipper(vec![[c(0.5), c(0.6)], [c(0.7), c(0.8)]])
        .unwrap();

    let merged = left.merge(&right, PeriodBounds::default()).unwrap();
    assert_eq!(merged.periods().len(), 4);
    let z = merged.impedance().unwrap();
    assert_eq!(z.len(), 4);
    assert!(z[3][1][1].re.is_nan());
    let t = merged.tipper().unwrap();
    assert_eq!(t.len(), 4);
    assert!(t[1][0].re.is_nan());
    assert_eq!(t[2][0], c(0.5));
}

#[test]
fn operand_missing_its_tf_is_rejected() {
    let left = tf_with(&[1.0], 1.0);
    let operand = MergeOperand::default();
    assert!(matches!(
        left.merge(operand, PeriodBounds::default()),
        Err(TfError::MissingOperand)
    ));
}

#[test]
fn chained_merges_accumulate_bands() {
    let audio = tf_with(&[0.01, 0.1], 1.0);
    let broadband = tf_with(&[1.0, 10.0], 2.0);
    let long_period = tf_with(&[100.0, 1000.0], 3.0);

    let merged = audio
        .merge(&broadband, PeriodBounds::default())
        .unwrap()
        .merge(&long_period, PeriodBounds::default())
        .unwrap();
    assert_eq!(merged.periods(), &[0.01, 0.1, 1.0, 10.0, 100.0, 1000.0]);
    assert_eq!(merged.impedance().unwrap()[5][0][0], c(3.0));
}
