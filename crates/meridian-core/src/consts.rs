/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-12;

/// FITS records are laid out in fixed 2880-byte blocks.
pub const FITS_BLOCK_SIZE: usize = 2880;

/// Each FITS header card is an 80-character ASCII record.
pub const FITS_CARD_SIZE: usize = 80;

/// Sigma used for robust background statistics (iterative clipping).
pub const BACKGROUND_CLIP_SIGMA: f64 = 3.0;

/// Maximum iterations for sigma-clipped background statistics.
pub const BACKGROUND_CLIP_MAX_ITERS: usize = 5;

/// Characteristic FWHM (pixels) of the star-finder matched filter kernel.
pub const DETECTION_KERNEL_FWHM: f64 = 3.0;

/// Default star-detection threshold, in sigma above background.
pub const DEFAULT_DETECTION_SIGMA: f64 = 5.0;

/// Brightest sources kept per frame when matching star patterns.
pub const MAX_PATTERN_STARS: usize = 20;

/// Minimum control points for an affine transform fit.
pub const MIN_CONTROL_POINTS: usize = 3;

/// Refinement passes before registration gives up on a transform.
pub const MAX_MATCH_ITERATIONS: usize = 10;

/// Conversion factor between a Gaussian sigma and its full width at half maximum.
pub const GAUSSIAN_SIGMA_TO_FWHM: f64 = 2.354_820_045;

/// Minimum frames with extractable features for session anomaly screening.
pub const MIN_SCREENING_FRAMES: usize = 10;

/// Fixed seed for the anomaly screening model, so re-runs are reproducible.
pub const SCREENING_SEED: u64 = 42;

/// Trees in the anomaly screening isolation forest.
pub const SCREENING_TREES: usize = 100;

/// Subsample size per isolation tree.
pub const SCREENING_SUBSAMPLE: usize = 256;

/// Assumed saturation level (ADU) of a 16-bit sensor for full-well estimation.
pub const SATURATION_ADU: f64 = 65_000.0;
