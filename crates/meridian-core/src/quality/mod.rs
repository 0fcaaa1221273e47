pub mod anomaly;
pub mod background;
pub mod detect;
pub mod metrics;

pub use background::{sigma_clipped_stats, ClippedStats};
pub use detect::{detect_sources, DetectedSource, DetectionConfig};
pub use metrics::{analyze_batch, analyze_frame, filter_by_quality, QualityMetrics};
