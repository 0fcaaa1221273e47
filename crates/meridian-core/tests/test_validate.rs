mod common;

use std::path::PathBuf;

use meridian_core::combine::validate::validate_frames;

use common::write_constant;

#[test]
fn consistent_batch_validates_clean() {
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<PathBuf> = (0..5)
        .map(|i| write_constant(dir.path(), &format!("f{i}.fits"), (16, 16), 100.0, &[]))
        .collect();

    let report = validate_frames(&paths);
    assert_eq!(report.valid_count, 5);
    assert_eq!(report.invalid_count, 0);
    assert_eq!(report.dimensions, vec![(16, 16)]);
    assert!(!report.dimension_mismatch);
}

#[test]
fn mismatched_shapes_are_reported_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_constant(dir.path(), "a.fits", (16, 16), 1.0, &[]);
    let b = write_constant(dir.path(), "b.fits", (16, 16), 1.0, &[]);
    let c = write_constant(dir.path(), "c.fits", (32, 32), 1.0, &[]);

    let report = validate_frames(&[a, b, c]);
    assert_eq!(report.valid_count, 3);
    assert!(report.dimension_mismatch);
    assert_eq!(report.dimensions.len(), 2);
}

#[test]
fn bad_files_are_recorded_with_reasons() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_constant(dir.path(), "good.fits", (8, 8), 1.0, &[]);
    let missing = dir.path().join("missing.fits");
    let junk = dir.path().join("junk.fits");
    std::fs::write(&junk, b"garbage").unwrap();

    let report = validate_frames(&[good, missing.clone(), junk.clone()]);
    assert_eq!(report.valid_count, 1);
    assert_eq!(report.invalid_count, 2);
    assert!(!report.dimension_mismatch);

    let invalid: Vec<&PathBuf> = report.invalid_files.iter().map(|f| &f.path).collect();
    assert!(invalid.contains(&&missing));
    assert!(invalid.contains(&&junk));
    for f in &report.invalid_files {
        assert!(!f.reason.is_empty());
    }
}

#[test]
fn empty_input_reports_zero_counts() {
    let report = validate_frames(&[]);
    assert_eq!(report.valid_count, 0);
    assert_eq!(report.invalid_count, 0);
    assert!(!report.dimension_mismatch);
}
