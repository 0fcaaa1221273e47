mod common;

use std::path::PathBuf;

use meridian_core::combine::{CombineMethod, RejectionPolicy};
use meridian_core::io::fits::{read_fits, FitsValue};
use meridian_core::stack::{stack_by_filter, stack_images, UNKNOWN_FILTER};

use common::write_constant;

#[test]
fn stacked_output_carries_provenance() {
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<PathBuf> = (0..5)
        .map(|i| write_constant(dir.path(), &format!("l{i}.fits"), (8, 8), 2000.0, &[]))
        .collect();

    let output = dir.path().join("stacked.fits");
    let stats = stack_images(
        &paths,
        &output,
        CombineMethod::Median,
        &RejectionPolicy::SigmaClip {
            low: 3.0,
            high: 3.0,
        },
    )
    .unwrap();
    assert_eq!(stats.num_frames, 5);

    let stacked = read_fits(&output).unwrap();
    assert_eq!(stacked.header.get_bool("STACKED"), Some(true));
    assert_eq!(stacked.header.get_int("NSTACKED"), Some(5));
    assert_eq!(stacked.header.get_string("STKMETOD"), Some("median"));
    assert_eq!(
        stacked.header.get_string("STKREJCT"),
        Some("sigma_clip(3,3)")
    );
}

#[test]
fn frames_group_by_filter_tag() {
    // {L, L, R, R, untagged} must produce exactly three stacks keyed
    // L, R, UNKNOWN, each built only from its own frames.
    let dir = tempfile::tempdir().unwrap();
    let filter = |name: &str| [("FILTER", FitsValue::Text(name.to_string()))];

    let paths = vec![
        write_constant(dir.path(), "l1.fits", (8, 8), 10.0, &filter("L")),
        write_constant(dir.path(), "l2.fits", (8, 8), 20.0, &filter("L")),
        write_constant(dir.path(), "r1.fits", (8, 8), 100.0, &filter("R")),
        write_constant(dir.path(), "r2.fits", (8, 8), 200.0, &filter("R")),
        write_constant(dir.path(), "untagged.fits", (8, 8), 1000.0, &[]),
    ];

    let out_dir = dir.path().join("stacked");
    let results = stack_by_filter(
        &paths,
        &out_dir,
        CombineMethod::Average,
        &RejectionPolicy::None,
    );

    assert_eq!(results.len(), 3);
    let keys: Vec<&String> = results.keys().collect();
    assert_eq!(keys, vec!["L", "R", UNKNOWN_FILTER]);
    for outcome in results.values() {
        assert!(outcome.success);
    }
    assert_eq!(results["L"].num_files, 2);
    assert_eq!(results["R"].num_files, 2);
    assert_eq!(results[UNKNOWN_FILTER].num_files, 1);

    // Each group stacked only from its own frames.
    let l = read_fits(&out_dir.join("stacked_L.fits")).unwrap();
    assert_eq!(l.data[[0, 0]], 15.0);
    let r = read_fits(&out_dir.join("stacked_R.fits")).unwrap();
    assert_eq!(r.data[[0, 0]], 150.0);
    let unknown = read_fits(&out_dir.join(format!("stacked_{UNKNOWN_FILTER}.fits"))).unwrap();
    assert_eq!(unknown.data[[0, 0]], 1000.0);
}

#[test]
fn unreadable_frame_lands_in_unknown_group() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_constant(
        dir.path(),
        "l1.fits",
        (8, 8),
        10.0,
        &[("FILTER", FitsValue::Text("L".into()))],
    );
    let junk = dir.path().join("junk.fits");
    std::fs::write(&junk, b"broken").unwrap();

    let out_dir = dir.path().join("stacked");
    let results = stack_by_filter(
        &[good, junk],
        &out_dir,
        CombineMethod::Average,
        &RejectionPolicy::None,
    );

    assert_eq!(results.len(), 2);
    assert!(results["L"].success);
    // The junk frame formed an UNKNOWN group; stacking it then failed
    // because nothing in the group loads, without touching the L stack.
    let unknown = &results[UNKNOWN_FILTER];
    assert!(!unknown.success);
    assert!(unknown.error.is_some());
}

#[test]
fn failed_group_does_not_block_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![
        write_constant(
            dir.path(),
            "l1.fits",
            (8, 8),
            10.0,
            &[("FILTER", FitsValue::Text("L".into()))],
        ),
        write_constant(
            dir.path(),
            "l2.fits",
            (8, 8),
            30.0,
            &[("FILTER", FitsValue::Text("L".into()))],
        ),
        // Two R frames with disagreeing shapes: that group refuses to stack.
        write_constant(
            dir.path(),
            "r1.fits",
            (8, 8),
            100.0,
            &[("FILTER", FitsValue::Text("R".into()))],
        ),
        write_constant(
            dir.path(),
            "r2.fits",
            (16, 16),
            200.0,
            &[("FILTER", FitsValue::Text("R".into()))],
        ),
    ];

    let out_dir = dir.path().join("stacked");
    let results = stack_by_filter(
        &paths,
        &out_dir,
        CombineMethod::Average,
        &RejectionPolicy::None,
    );

    assert!(results["L"].success);
    assert!(!results["R"].success);
    let l = read_fits(&out_dir.join("stacked_L.fits")).unwrap();
    assert_eq!(l.data[[4, 4]], 20.0);
}
