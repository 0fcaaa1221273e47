//! Camera sensor characterization via the photon-transfer method.
//!
//! Read noise comes from a pair of bias frames, gain from a pair of flat
//! frames, and full-well capacity from the gain and the saturation
//! headroom above the bias level.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::consts::{BACKGROUND_CLIP_MAX_ITERS, BACKGROUND_CLIP_SIGMA, SATURATION_ADU};
use crate::error::{MeridianError, Result};
use crate::io::fits::read_fits;
use crate::quality::background::sigma_clipped_stats;

/// Paired calibration frames for characterization: two bias frames and
/// two flat frames at identical settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CharacterizationInput {
    pub bias_frames: Vec<PathBuf>,
    pub flat_frames: Vec<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BiasStats {
    pub bias1_mean: f64,
    pub bias2_mean: f64,
    pub bias1_std: f64,
    pub bias2_std: f64,
    pub read_noise_adu: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlatStats {
    pub flat1_mean: f64,
    pub flat2_mean: f64,
    pub flat1_std: f64,
    pub flat2_std: f64,
    pub flat_level_percent: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CharacterizationResult {
    /// Read noise in electrons.
    pub read_noise: f64,
    /// Gain in e-/ADU.
    pub gain: f64,
    /// Full well capacity in electrons.
    pub full_well_capacity: i64,
    pub bias_stats: BiasStats,
    pub flat_stats: FlatStats,
    /// 0.1..1.0, lowered by each plausibility warning.
    pub confidence: f64,
    pub warnings: Vec<String>,
}

/// Measured sensor parameters bound to the settings they were taken at.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SensorProfile {
    pub camera_model: String,
    pub read_noise: f64,
    pub gain: f64,
    pub full_well_capacity: i64,
    pub gain_setting: Option<i64>,
    pub offset: Option<i64>,
    pub temperature: Option<f64>,
    pub binning: String,
    pub notes: Option<String>,
}

/// Derive read noise, gain, and full-well capacity from paired frames.
pub fn characterize(input: &CharacterizationInput) -> Result<CharacterizationResult> {
    if input.bias_frames.len() < 2 {
        return Err(MeridianError::Config(
            "characterization needs two bias frames".into(),
        ));
    }
    if input.flat_frames.len() < 2 {
        return Err(MeridianError::Config(
            "characterization needs two flat frames".into(),
        ));
    }

    let bias1 = read_fits(&input.bias_frames[0])?;
    let bias2 = read_fits(&input.bias_frames[1])?;
    let flat1 = read_fits(&input.flat_frames[0])?;
    let flat2 = read_fits(&input.flat_frames[1])?;

    for (a, b) in [(&bias1, &bias2), (&flat1, &flat2)] {
        let (ah, aw) = a.shape();
        let (bh, bw) = b.shape();
        if (ah, aw) != (bh, bw) {
            return Err(MeridianError::DimensionMismatch {
                first_height: ah,
                first_width: aw,
                height: bh,
                width: bw,
            });
        }
    }

    let mut warnings = Vec::new();

    let b1 = sigma_clipped_stats(&bias1.data, BACKGROUND_CLIP_SIGMA, BACKGROUND_CLIP_MAX_ITERS);
    let b2 = sigma_clipped_stats(&bias2.data, BACKGROUND_CLIP_SIGMA, BACKGROUND_CLIP_MAX_ITERS);
    let bias_level = (b1.mean + b2.mean) / 2.0;

    let f1 = sigma_clipped_stats(&flat1.data, BACKGROUND_CLIP_SIGMA, BACKGROUND_CLIP_MAX_ITERS);
    let f2 = sigma_clipped_stats(&flat2.data, BACKGROUND_CLIP_SIGMA, BACKGROUND_CLIP_MAX_ITERS);

    // Flats should sit in the middle of the dynamic range.
    let flat_level_percent = f1.mean / 65535.0 * 100.0;
    if !(30.0..=70.0).contains(&flat_level_percent) {
        warnings.push(format!(
            "Flats at {flat_level_percent:.1}% of max. Ideal range: 40-60%"
        ));
    }

    // Photon transfer: the variance of a flat difference isolates shot
    // noise, halved because differencing doubles the variance.
    let flat_diff = &flat1.data - &flat2.data;
    let flat_diff_var = variance(&flat_diff) / 2.0;
    let flat_mean = (f1.mean + f2.mean) / 2.0 - bias_level;

    let gain = if flat_diff_var > 0.0 && flat_mean > 0.0 {
        (flat_mean * flat_mean) / flat_diff_var
    } else {
        warnings.push("Could not calculate gain reliably. Using default: 1.0".into());
        1.0
    };

    let bias_diff = &bias1.data - &bias2.data;
    let read_noise_adu = variance(&bias_diff).sqrt() / std::f64::consts::SQRT_2;
    let read_noise_electrons = read_noise_adu * gain;

    let full_well_capacity = (gain * (SATURATION_ADU - bias_level)) as i64;

    let mut confidence = 0.8 - 0.1 * warnings.len() as f64;
    if !(0.1..=10.0).contains(&gain) {
        confidence -= 0.2;
        warnings.push(format!(
            "Gain value ({gain:.2}) seems unusual. Typical range: 0.5-3.0"
        ));
    }
    if !(0.5..=20.0).contains(&read_noise_electrons) {
        confidence -= 0.2;
        warnings.push(format!(
            "Read noise ({read_noise_electrons:.2}e-) seems unusual."
        ));
    }
    let confidence = confidence.clamp(0.1, 1.0);

    info!(
        gain = gain,
        read_noise = read_noise_electrons,
        full_well = full_well_capacity,
        "characterization complete"
    );

    Ok(CharacterizationResult {
        read_noise: round_to(read_noise_electrons, 2),
        gain: round_to(gain, 3),
        full_well_capacity,
        bias_stats: BiasStats {
            bias1_mean: b1.mean,
            bias2_mean: b2.mean,
            bias1_std: b1.std,
            bias2_std: b2.std,
            read_noise_adu,
        },
        flat_stats: FlatStats {
            flat1_mean: f1.mean,
            flat2_mean: f2.mean,
            flat1_std: f1.std,
            flat2_std: f2.std,
            flat_level_percent,
        },
        confidence,
        warnings,
    })
}

/// Build a [`SensorProfile`] from a characterization run.
pub fn create_sensor_profile(
    result: &CharacterizationResult,
    camera_model: &str,
    gain_setting: Option<i64>,
    offset: Option<i64>,
    temperature: Option<f64>,
    binning: &str,
) -> SensorProfile {
    let notes = if result.warnings.is_empty() {
        None
    } else {
        Some(result.warnings.join("; "))
    };

    SensorProfile {
        camera_model: camera_model.to_string(),
        read_noise: result.read_noise,
        gain: result.gain,
        full_well_capacity: result.full_well_capacity,
        gain_setting,
        offset,
        temperature,
        binning: binning.to_string(),
        notes,
    }
}

fn variance(data: &ndarray::Array2<f64>) -> f64 {
    let n = data.len() as f64;
    let mean = data.sum() / n;
    data.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
}

fn round_to(v: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (v * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_helper() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(2.4996, 3), 2.5);
    }

    #[test]
    fn profile_carries_warnings_as_notes() {
        let result = CharacterizationResult {
            read_noise: 3.5,
            gain: 1.2,
            full_well_capacity: 50_000,
            bias_stats: BiasStats {
                bias1_mean: 1000.0,
                bias2_mean: 1000.0,
                bias1_std: 5.0,
                bias2_std: 5.0,
                read_noise_adu: 2.9,
            },
            flat_stats: FlatStats {
                flat1_mean: 30000.0,
                flat2_mean: 30000.0,
                flat1_std: 100.0,
                flat2_std: 100.0,
                flat_level_percent: 45.0,
            },
            confidence: 0.7,
            warnings: vec!["a".into(), "b".into()],
        };
        let profile = create_sensor_profile(&result, "TestCam", Some(100), None, Some(-10.0), "1x1");
        assert_eq!(profile.notes.as_deref(), Some("a; b"));
        assert_eq!(profile.camera_model, "TestCam");
    }
}
