use std::path::{Path, PathBuf};

use ndarray::Array2;

use meridian_core::frame::Frame;
use meridian_core::io::fits::{write_fits, FitsHeader, FitsValue};

/// Write a frame with the given pixel data and extra header cards.
/// Returns the path written.
pub fn write_frame(
    dir: &Path,
    name: &str,
    data: Array2<f64>,
    cards: &[(&str, FitsValue)],
) -> PathBuf {
    let mut header = FitsHeader::new();
    for (key, value) in cards {
        header.set(key, value.clone());
    }
    let path = dir.join(name);
    write_fits(&path, &Frame::new(data, header)).expect("write test frame");
    path
}

/// Write a constant-valued frame.
pub fn write_constant(
    dir: &Path,
    name: &str,
    shape: (usize, usize),
    value: f64,
    cards: &[(&str, FitsValue)],
) -> PathBuf {
    write_frame(dir, name, Array2::from_elem(shape, value), cards)
}

/// Deterministic low-amplitude ripple standing in for read noise, so
/// background statistics have a nonzero spread.
pub fn noisy_background(shape: (usize, usize), level: f64) -> Array2<f64> {
    Array2::from_shape_fn(shape, |(r, c)| level + ((r * 31 + c * 17) % 7) as f64 - 3.0)
}

/// Add a circular Gaussian star at (row, col) with the given peak amplitude.
pub fn add_star(data: &mut Array2<f64>, row: f64, col: f64, amplitude: f64, sigma: f64) {
    let (h, w) = data.dim();
    for r in 0..h {
        for c in 0..w {
            let dy = r as f64 - row;
            let dx = c as f64 - col;
            data[[r, c]] += amplitude * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
        }
    }
}

/// A star field with background level 100 and the given (row, col, peak)
/// stars at FWHM ~3 px.
pub fn star_field(shape: (usize, usize), stars: &[(f64, f64, f64)]) -> Array2<f64> {
    let mut data = noisy_background(shape, 100.0);
    for &(row, col, amplitude) in stars {
        add_star(&mut data, row, col, amplitude, 1.3);
    }
    data
}

/// Star positions used across registration tests: irregular, well spread,
/// away from borders.
pub fn standard_star_positions() -> Vec<(f64, f64, f64)> {
    vec![
        (14.0, 18.0, 900.0),
        (22.0, 52.0, 850.0),
        (38.0, 30.0, 800.0),
        (52.0, 55.0, 750.0),
        (58.0, 12.0, 700.0),
        (44.0, 70.0, 650.0),
        (70.0, 40.0, 600.0),
        (30.0, 72.0, 550.0),
    ]
}
