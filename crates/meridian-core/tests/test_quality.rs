mod common;

use std::path::PathBuf;

use meridian_core::quality::{analyze_batch, analyze_frame, filter_by_quality};

use common::{noisy_background, star_field, write_frame};

#[test]
fn starless_frame_is_a_valid_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_frame(dir.path(), "empty.fits", noisy_background((64, 64), 100.0), &[]);

    let metrics = analyze_frame(&path, 3.0);
    assert!(metrics.error.is_none());
    assert_eq!(metrics.star_count, 0);
    assert!(metrics.fwhm_mean.is_none());
    assert!(metrics.fwhm_median.is_none());
    assert!(metrics.roundness_mean.is_none());
    assert!(metrics.sharpness_mean.is_none());
    // Background statistics are still measured.
    let bg = metrics.background_median.unwrap();
    assert!((bg - 100.0).abs() < 2.0);
}

#[test]
fn star_frame_measures_fwhm_near_truth() {
    let dir = tempfile::tempdir().unwrap();
    let stars = common::standard_star_positions();
    let path = write_frame(dir.path(), "stars.fits", star_field((96, 96), &stars), &[]);

    let metrics = analyze_frame(&path, 3.0);
    assert!(metrics.error.is_none());
    assert_eq!(metrics.star_count, stars.len());
    // Injected FWHM is 2.3548 * 1.3 ~ 3.06 px; the moment estimate on a
    // truncated window reads a little low.
    let fwhm = metrics.fwhm_median.unwrap();
    assert!(fwhm > 1.5 && fwhm < 4.5, "fwhm = {fwhm}");
    assert!(metrics.fwhm_std.unwrap() < 1.0);
}

#[test]
fn unreadable_frame_is_captured_as_error() {
    let dir = tempfile::tempdir().unwrap();
    let junk = dir.path().join("junk.fits");
    std::fs::write(&junk, b"not fits").unwrap();

    let metrics = analyze_frame(&junk, 3.0);
    assert!(metrics.error.is_some());
    assert_eq!(metrics.star_count, 0);
    assert!(metrics.background_median.is_none());
}

#[test]
fn batch_survives_a_bad_frame() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_frame(
        dir.path(),
        "good.fits",
        star_field((64, 64), &[(30.0, 30.0, 800.0)]),
        &[],
    );
    let junk = dir.path().join("junk.fits");
    std::fs::write(&junk, b"broken").unwrap();

    let results = analyze_batch(&[good, junk], 3.0);
    assert_eq!(results.len(), 2);
    assert!(results[0].error.is_none());
    assert_eq!(results[0].star_count, 1);
    assert!(results[1].error.is_some());
}

#[test]
fn quality_gate_passes_only_good_frames() {
    let dir = tempfile::tempdir().unwrap();
    let sharp = write_frame(
        dir.path(),
        "sharp.fits",
        star_field((96, 96), &common::standard_star_positions()),
        &[],
    );
    let junk = dir.path().join("cloudy.fits");
    std::fs::write(&junk, b"broken").unwrap();

    let metrics = analyze_batch(&[sharp.clone(), junk], 3.0);
    let passed: Vec<PathBuf> = filter_by_quality(&metrics, Some(3), Some(6.0), None);
    assert_eq!(passed, vec![sharp]);
}
