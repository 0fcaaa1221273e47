//! Matched-filter point-source detection.
//!
//! The frame is background-subtracted, smoothed with a Gaussian kernel of
//! a characteristic FWHM, and local maxima above a sigma threshold become
//! source candidates. Each candidate is then measured on the unsmoothed
//! residual: intensity-weighted centroid, second-moment FWHM, roundness,
//! eccentricity, and sharpness.

use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::{
    DEFAULT_DETECTION_SIGMA, DETECTION_KERNEL_FWHM, GAUSSIAN_SIGMA_TO_FWHM,
    PARALLEL_PIXEL_THRESHOLD,
};
use crate::quality::background::{sigma_clipped_stats, ClippedStats};

#[derive(Clone, Debug)]
pub struct DetectionConfig {
    /// Characteristic FWHM (pixels) of the matched-filter kernel.
    pub kernel_fwhm: f64,
    /// Detection threshold in standard deviations above background.
    pub threshold_sigma: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            kernel_fwhm: DETECTION_KERNEL_FWHM,
            threshold_sigma: DEFAULT_DETECTION_SIGMA,
        }
    }
}

/// A detected point source with its measured properties.
#[derive(Clone, Debug)]
pub struct DetectedSource {
    /// Centroid column, pixels.
    pub x: f64,
    /// Centroid row, pixels.
    pub y: f64,
    /// Summed background-subtracted flux over the measurement window.
    pub flux: f64,
    /// Peak background-subtracted pixel value.
    pub peak: f64,
    /// Full width at half maximum from second moments, pixels.
    pub fwhm: f64,
    /// Moment asymmetry (x-variance vs y-variance), 0 for a round source.
    pub roundness: f64,
    /// sqrt(1 - b^2/a^2) of the moment ellipse; 0 circular, 1 degenerate.
    pub eccentricity: f64,
    /// Ratio of the peak pixel to the smoothed peak; near 1 for extended
    /// structure, larger for point-like sources.
    pub sharpness: f64,
}

/// Measurement window half-size around each candidate peak.
const FIT_RADIUS: usize = 4;

/// Detect point sources in a frame. Returns sources ordered brightest
/// first (by flux). An empty result is a valid outcome.
pub fn detect_sources(
    data: &Array2<f64>,
    background: &ClippedStats,
    config: &DetectionConfig,
) -> Vec<DetectedSource> {
    let (h, w) = data.dim();
    if h <= 2 * FIT_RADIUS || w <= 2 * FIT_RADIUS {
        return Vec::new();
    }

    let residual = data.mapv(|v| v - background.median);
    let kernel = gaussian_kernel(config.kernel_fwhm / GAUSSIAN_SIGMA_TO_FWHM);
    let smoothed = convolve(&residual, &kernel);

    let threshold = config.threshold_sigma * background.std;
    if threshold <= 0.0 {
        return Vec::new();
    }

    let mut sources = Vec::new();
    for row in FIT_RADIUS..h - FIT_RADIUS {
        for col in FIT_RADIUS..w - FIT_RADIUS {
            let v = smoothed[[row, col]];
            if v <= threshold {
                continue;
            }
            if !is_local_max(&smoothed, row, col) {
                continue;
            }
            if let Some(source) = measure_source(&residual, &smoothed, row, col) {
                sources.push(source);
            }
        }
    }

    sources.sort_by(|a, b| b.flux.total_cmp(&a.flux));
    sources
}

/// Detect with background estimated internally at 3 sigma.
pub fn detect_in_frame(data: &Array2<f64>, config: &DetectionConfig) -> Vec<DetectedSource> {
    let background = sigma_clipped_stats(
        data,
        crate::consts::BACKGROUND_CLIP_SIGMA,
        crate::consts::BACKGROUND_CLIP_MAX_ITERS,
    );
    detect_sources(data, &background, config)
}

fn is_local_max(data: &Array2<f64>, row: usize, col: usize) -> bool {
    let v = data[[row, col]];
    for dr in -1i64..=1 {
        for dc in -1i64..=1 {
            if dr == 0 && dc == 0 {
                continue;
            }
            let r = (row as i64 + dr) as usize;
            let c = (col as i64 + dc) as usize;
            if data[[r, c]] >= v {
                return false;
            }
        }
    }
    true
}

fn measure_source(
    residual: &Array2<f64>,
    smoothed: &Array2<f64>,
    peak_row: usize,
    peak_col: usize,
) -> Option<DetectedSource> {
    let mut flux = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut peak = 0.0f64;

    for r in peak_row - FIT_RADIUS..=peak_row + FIT_RADIUS {
        for c in peak_col - FIT_RADIUS..=peak_col + FIT_RADIUS {
            let v = residual[[r, c]].max(0.0);
            flux += v;
            sum_x += c as f64 * v;
            sum_y += r as f64 * v;
            peak = peak.max(residual[[r, c]]);
        }
    }
    if flux <= 0.0 {
        return None;
    }
    let cx = sum_x / flux;
    let cy = sum_y / flux;

    // Second central moments of the light distribution.
    let mut mxx = 0.0;
    let mut myy = 0.0;
    let mut mxy = 0.0;
    for r in peak_row - FIT_RADIUS..=peak_row + FIT_RADIUS {
        for c in peak_col - FIT_RADIUS..=peak_col + FIT_RADIUS {
            let v = residual[[r, c]].max(0.0);
            let dx = c as f64 - cx;
            let dy = r as f64 - cy;
            mxx += dx * dx * v;
            myy += dy * dy * v;
            mxy += dx * dy * v;
        }
    }
    mxx /= flux;
    myy /= flux;
    mxy /= flux;

    let trace = mxx + myy;
    if trace <= 0.0 {
        return None;
    }
    let fwhm = GAUSSIAN_SIGMA_TO_FWHM * (trace / 2.0).sqrt();
    let roundness = (mxx - myy) / trace;

    // Eigenvalues of the moment matrix give the ellipse axes.
    let disc = ((mxx - myy) * (mxx - myy) + 4.0 * mxy * mxy).sqrt();
    let lambda1 = (trace + disc) / 2.0;
    let lambda2 = (trace - disc) / 2.0;
    let eccentricity = if lambda1 > 0.0 && lambda2 >= 0.0 {
        (1.0 - lambda2 / lambda1).max(0.0).sqrt()
    } else {
        0.0
    };

    let smoothed_peak = smoothed[[peak_row, peak_col]];
    let sharpness = if smoothed_peak > 0.0 {
        residual[[peak_row, peak_col]] / smoothed_peak
    } else {
        0.0
    };

    Some(DetectedSource {
        x: cx,
        y: cy,
        flux,
        peak,
        fwhm,
        roundness,
        eccentricity,
        sharpness,
    })
}

/// Normalized 2D Gaussian kernel, radius 2 sigma (minimum 2 pixels).
fn gaussian_kernel(sigma: f64) -> Array2<f64> {
    let radius = (2.0 * sigma).ceil().max(2.0) as usize;
    let size = 2 * radius + 1;
    let mut kernel = Array2::<f64>::zeros((size, size));
    let denom = 2.0 * sigma * sigma;
    let mut sum = 0.0;
    for r in 0..size {
        for c in 0..size {
            let dy = r as f64 - radius as f64;
            let dx = c as f64 - radius as f64;
            let v = (-(dx * dx + dy * dy) / denom).exp();
            kernel[[r, c]] = v;
            sum += v;
        }
    }
    kernel /= sum;
    kernel
}

/// Direct convolution; out-of-bounds pixels are treated as zero.
/// Row-parallel for large frames.
fn convolve(data: &Array2<f64>, kernel: &Array2<f64>) -> Array2<f64> {
    let (h, w) = data.dim();
    let (kh, kw) = kernel.dim();
    let (ry, rx) = (kh / 2, kw / 2);

    let convolve_row = |row: usize| -> Vec<f64> {
        let mut out = vec![0.0f64; w];
        for (col, o) in out.iter_mut().enumerate() {
            let mut acc = 0.0;
            for kr in 0..kh {
                let r = row as i64 + kr as i64 - ry as i64;
                if r < 0 || r >= h as i64 {
                    continue;
                }
                for kc in 0..kw {
                    let c = col as i64 + kc as i64 - rx as i64;
                    if c < 0 || c >= w as i64 {
                        continue;
                    }
                    acc += data[[r as usize, c as usize]] * kernel[[kr, kc]];
                }
            }
            *o = acc;
        }
        out
    };

    let rows: Vec<Vec<f64>> = if h * w >= PARALLEL_PIXEL_THRESHOLD {
        (0..h).into_par_iter().map(convolve_row).collect()
    } else {
        (0..h).map(convolve_row).collect()
    };

    let mut result = Array2::<f64>::zeros((h, w));
    for (row, row_data) in rows.into_iter().enumerate() {
        for (col, val) in row_data.into_iter().enumerate() {
            result[[row, col]] = val;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_gaussian_star(data: &mut Array2<f64>, cy: f64, cx: f64, amp: f64, sigma: f64) {
        let (h, w) = data.dim();
        for r in 0..h {
            for c in 0..w {
                let dy = r as f64 - cy;
                let dx = c as f64 - cx;
                data[[r, c]] += amp * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
            }
        }
    }

    fn noise_background(h: usize, w: usize, level: f64) -> Array2<f64> {
        // Deterministic low-amplitude ripple so the background std is nonzero.
        Array2::from_shape_fn((h, w), |(r, c)| {
            level + ((r * 31 + c * 17) % 7) as f64 - 3.0
        })
    }

    #[test]
    fn finds_isolated_stars() {
        let mut data = noise_background(64, 64, 100.0);
        add_gaussian_star(&mut data, 20.0, 20.0, 800.0, 1.3);
        add_gaussian_star(&mut data, 45.0, 40.0, 600.0, 1.3);

        let sources = detect_in_frame(&data, &DetectionConfig::default());
        assert_eq!(sources.len(), 2);
        // Brightest first
        assert!(sources[0].flux > sources[1].flux);
        assert!((sources[0].x - 20.0).abs() < 0.5);
        assert!((sources[0].y - 20.0).abs() < 0.5);
        assert!(sources[0].fwhm > 1.0 && sources[0].fwhm < 6.0);
        assert!(sources[0].eccentricity < 0.5);
    }

    #[test]
    fn blank_frame_yields_no_sources() {
        let data = noise_background(64, 64, 100.0);
        let sources = detect_in_frame(&data, &DetectionConfig::default());
        assert!(sources.is_empty());
    }

    #[test]
    fn elongated_source_has_high_eccentricity() {
        let mut data = noise_background(64, 64, 100.0);
        // Star trailed along x: wide in x, narrow in y.
        let (h, w) = data.dim();
        for r in 0..h {
            for c in 0..w {
                let dy = r as f64 - 30.0;
                let dx = c as f64 - 30.0;
                data[[r, c]] +=
                    900.0 * (-(dx * dx / (2.0 * 9.0) + dy * dy / (2.0 * 1.0))).exp();
            }
        }
        let sources = detect_in_frame(&data, &DetectionConfig::default());
        assert!(!sources.is_empty());
        assert!(sources[0].eccentricity > 0.5);
    }
}
