mod common;

use std::path::PathBuf;

use meridian_core::calibrate::{calibrate_frame, CalibrationConfig};
use meridian_core::combine::{CombineMethod, RejectionPolicy};
use meridian_core::error::MeridianError;
use meridian_core::frame::ImageType;
use meridian_core::io::fits::{read_fits, FitsValue};
use meridian_core::masters::{MasterService, MasterTags};
use meridian_core::pipeline::{PipelineService, Status, StepType};

use common::{star_field, write_constant, write_frame};

#[test]
fn masters_end_to_end_bias_then_flat() {
    // 8 bias frames at a constant 1000 ADU combine to a master of exactly
    // 1000 with zero spread; flat-correcting a science frame with the
    // matching master flat then leaves a uniform field whose normalized
    // level is exactly 1.0.
    let dir = tempfile::tempdir().unwrap();
    let service = MasterService::open(dir.path());
    let session = service
        .create_session("night1", "2026-08-01", None, Some("TestCam".into()))
        .unwrap();

    let bias_paths: Vec<PathBuf> = (0..8)
        .map(|i| write_constant(dir.path(), &format!("bias_{i}.fits"), (16, 16), 1000.0, &[]))
        .collect();
    let master_bias = service
        .create_master(
            &session.id,
            ImageType::Bias,
            &bias_paths,
            CombineMethod::Median,
            &RejectionPolicy::None,
            MasterTags::default(),
        )
        .unwrap();
    assert_eq!(master_bias.num_frames, 8);
    assert_eq!(master_bias.filename, "master_bias.fits");

    let bias_file = service.master_path(&master_bias).unwrap();
    let bias_frame = read_fits(&bias_file).unwrap();
    assert!(bias_frame.data.iter().all(|v| *v == 1000.0));

    let flat_paths: Vec<PathBuf> = (0..8)
        .map(|i| write_constant(dir.path(), &format!("flat_{i}.fits"), (16, 16), 30000.0, &[]))
        .collect();
    let master_flat = service
        .create_master(
            &session.id,
            ImageType::Flat,
            &flat_paths,
            CombineMethod::Median,
            &RejectionPolicy::None,
            MasterTags {
                filter: Some("L".into()),
                ..MasterTags::default()
            },
        )
        .unwrap();
    assert_eq!(master_flat.filename, "master_flat_L.fits");

    // Bias + flat on a uniform science frame.
    let science = write_constant(dir.path(), "science.fits", (16, 16), 31000.0, &[]);
    let output = dir.path().join("science_cal.fits");
    calibrate_frame(
        &science,
        &output,
        &CalibrationConfig {
            master_bias: Some(bias_file),
            master_flat: Some(service.master_path(&master_flat).unwrap()),
            ..CalibrationConfig::default()
        },
    )
    .unwrap();

    let calibrated = read_fits(&output).unwrap();
    let mean = calibrated.data.sum() / calibrated.data.len() as f64;
    assert!((mean - 30000.0).abs() < 1e-9);
    for v in calibrated.data.iter() {
        assert!((v / mean - 1.0).abs() < 1e-12, "field not uniform: {v}");
    }
}

#[test]
fn master_registry_round_trip_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let service = MasterService::open(dir.path());
    let session = service
        .create_session("night1", "2026-08-01", Some("FSQ-106".into()), None)
        .unwrap();

    assert_eq!(service.sessions().unwrap().len(), 1);
    assert!(service.session(&session.id).unwrap().is_some());
    assert!(service.session("bogus").unwrap().is_none());

    let bias_paths: Vec<PathBuf> = (0..3)
        .map(|i| write_constant(dir.path(), &format!("b{i}.fits"), (8, 8), 1000.0, &[]))
        .collect();
    let master = service
        .create_master(
            &session.id,
            ImageType::Bias,
            &bias_paths,
            CombineMethod::Median,
            &RejectionPolicy::None,
            MasterTags::default(),
        )
        .unwrap();

    assert_eq!(service.masters(Some(&session.id)).unwrap().len(), 1);
    assert_eq!(service.masters(Some("other")).unwrap().len(), 0);
    assert!(service.master(&master.id).unwrap().is_some());

    // Unknown session refuses before any combination.
    let err = service
        .create_master(
            "bogus",
            ImageType::Bias,
            &bias_paths,
            CombineMethod::Median,
            &RejectionPolicy::None,
            MasterTags::default(),
        )
        .unwrap_err();
    assert!(matches!(err, MeridianError::NotFound { kind: "session", .. }));

    // Delete with file removal.
    let file = service.master_path(&master).unwrap();
    assert!(file.exists());
    assert!(service.delete_master(&master.id, true).unwrap());
    assert!(!file.exists());
    assert!(!service.delete_master(&master.id, true).unwrap());
    assert!(service.master(&master.id).unwrap().is_none());
}

#[test]
fn pipeline_runs_calibrate_analyze_register_stack() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path();

    // Three lights of the same field, shifted between exposures, on top
    // of a 1000 ADU bias pedestal.
    let stars = common::standard_star_positions();
    let shifts = [(0.0, 0.0), (2.0, -1.5), (-1.0, 2.5)];
    let mut lights = Vec::new();
    for (i, (dy, dx)) in shifts.into_iter().enumerate() {
        let shifted: Vec<(f64, f64, f64)> =
            stars.iter().map(|&(r, c, a)| (r + dy, c + dx, a)).collect();
        let mut data = star_field((96, 96), &shifted);
        data += 1000.0;
        lights.push(write_frame(
            project,
            &format!("light_{i}.fits"),
            data,
            &[
                ("EXPTIME", FitsValue::Real(300.0)),
                ("FILTER", FitsValue::Text("L".into())),
                ("IMAGETYP", FitsValue::Text("Light Frame".into())),
            ],
        ));
    }
    let master_bias = write_constant(project, "master_bias.fits", (96, 96), 1000.0, &[]);

    let service = PipelineService::open(project);
    let pipeline = service.create_pipeline("M31", vec!["L".into()], None).unwrap();
    assert_eq!(pipeline.status, Status::Pending);

    // Calibration
    let cal = service
        .execute_calibration(
            &pipeline.id,
            &lights,
            &CalibrationConfig {
                master_bias: Some(master_bias),
                ..CalibrationConfig::default()
            },
        )
        .unwrap();
    assert_eq!(cal.successful, 3);
    let calibrated: Vec<PathBuf> = cal
        .results
        .iter()
        .filter_map(|r| r.stats.as_ref().map(|s| s.output.clone()))
        .collect();

    let p = service.pipeline(&pipeline.id).unwrap();
    assert_eq!(p.status, Status::Running);
    assert_eq!(p.steps[0].step_type, StepType::Calibration);
    assert_eq!(p.steps[0].status, Status::Completed);

    // Quality analysis
    let report = service
        .execute_quality_analysis(&pipeline.id, &calibrated, 3.0)
        .unwrap();
    assert_eq!(report.total, 3);
    assert!(report.metrics.iter().all(|m| m.star_count > 0));

    // Registration with automatic reference selection
    let reg = service
        .execute_registration(&pipeline.id, &calibrated, None, Some(&report.metrics), 5.0)
        .unwrap();
    assert_eq!(reg.successful, 2);
    assert_eq!(reg.failed, 0);
    assert!(calibrated.contains(&reg.reference));

    // Stacking: the chosen reference plus the two registered outputs.
    let mut to_stack: Vec<PathBuf> = reg
        .results
        .iter()
        .filter_map(|r| r.result.as_ref().map(|res| res.output.clone()))
        .collect();
    to_stack.push(reg.reference.clone());

    let stacked = service
        .execute_stacking(
            &pipeline.id,
            &to_stack,
            CombineMethod::Average,
            &RejectionPolicy::None,
        )
        .unwrap();
    assert_eq!(stacked.total_filters, 1);
    assert_eq!(stacked.successful, 1);
    assert!(stacked.results.contains_key("L"));

    // Stacking completion completes the pipeline.
    let p = service.pipeline(&pipeline.id).unwrap();
    assert_eq!(p.status, Status::Completed);
    assert_eq!(p.steps.len(), 4);
    assert!(p.steps.iter().all(|s| s.status == Status::Completed));

    // The stacked L image exists and kept the star signal.
    let stacked_frame =
        read_fits(&stacked.results["L"].stats.as_ref().unwrap().output_path).unwrap();
    assert_eq!(stacked_frame.shape(), (96, 96));
    let max = stacked_frame.data.iter().cloned().fold(f64::MIN, f64::max);
    assert!(max > 500.0, "stars lost in stacking: max = {max}");
}

#[test]
fn failed_step_marks_pipeline_failed() {
    let dir = tempfile::tempdir().unwrap();
    let service = PipelineService::open(dir.path());
    let pipeline = service.create_pipeline("M42", vec![], None).unwrap();

    // Registration over an empty input cannot select a reference.
    let err = service
        .execute_registration(&pipeline.id, &[], None, None, 5.0)
        .unwrap_err();
    assert!(matches!(err, MeridianError::Config(_)));

    let p = service.pipeline(&pipeline.id).unwrap();
    assert_eq!(p.status, Status::Failed);
    assert_eq!(p.steps.len(), 1);
    assert_eq!(p.steps[0].status, Status::Failed);
    assert!(p.steps[0].error_message.is_some());

    // Retrying appends a fresh step and resumes the pipeline.
    let lights = [write_frame(
        dir.path(),
        "l0.fits",
        star_field((96, 96), &common::standard_star_positions()),
        &[],
    )];
    let reg = service
        .execute_registration(&pipeline.id, &lights, None, None, 5.0)
        .unwrap();
    assert_eq!(reg.total, 0); // only the reference itself was supplied
    let p = service.pipeline(&pipeline.id).unwrap();
    assert_eq!(p.status, Status::Running);
}

#[test]
fn unknown_pipeline_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let service = PipelineService::open(dir.path());
    let err = service.pipeline("missing").unwrap_err();
    assert!(matches!(
        err,
        MeridianError::NotFound { kind: "pipeline", .. }
    ));

    assert!(!service.delete_pipeline("missing").unwrap());
    let err = service
        .execute_quality_analysis("missing", &[], 3.0)
        .unwrap_err();
    assert!(matches!(err, MeridianError::NotFound { .. }));
}
