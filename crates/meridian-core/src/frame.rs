use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::io::fits::FitsHeader;

/// A single 2D astronomical frame.
///
/// Pixel values are ADU counts held as f64, regardless of the on-disk
/// encoding, so stacked arithmetic never accumulates rounding bias.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Pixel data, row-major, shape = (height, width)
    pub data: Array2<f64>,
    /// Key-value header carried from (and written back to) the container file
    pub header: FitsHeader,
}

impl Frame {
    pub fn new(data: Array2<f64>, header: FitsHeader) -> Self {
        Self { data, header }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// (height, width) of the pixel array.
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Exposure time in seconds, if the header carries one.
    pub fn exposure_time(&self) -> Option<f64> {
        self.header.get_float("EXPTIME")
    }

    pub fn gain(&self) -> Option<f64> {
        self.header.get_float("GAIN")
    }

    /// Filter name from the header, if present.
    pub fn filter(&self) -> Option<String> {
        self.header.get_string("FILTER").map(|s| s.to_string())
    }

    pub fn image_type(&self) -> Option<ImageType> {
        self.header
            .get_string("IMAGETYP")
            .and_then(ImageType::parse)
    }
}

/// Role of a raw frame in the calibration workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageType {
    Light,
    Dark,
    Bias,
    Flat,
}

impl ImageType {
    /// Parse an `IMAGETYP` header value. Accepts the common variants
    /// written by capture software ("Bias", "Bias Frame", "BIAS", ...).
    pub fn parse(value: &str) -> Option<Self> {
        let lower = value.trim().to_ascii_lowercase();
        if lower.starts_with("light") {
            Some(Self::Light)
        } else if lower.starts_with("dark") {
            Some(Self::Dark)
        } else if lower.starts_with("bias") || lower.starts_with("zero") {
            Some(Self::Bias)
        } else if lower.starts_with("flat") {
            Some(Self::Flat)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Light => write!(f, "Light"),
            Self::Dark => write!(f, "Dark"),
            Self::Bias => write!(f, "Bias"),
            Self::Flat => write!(f, "Flat"),
        }
    }
}
