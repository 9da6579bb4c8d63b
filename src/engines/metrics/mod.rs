pub mod coverage;
pub mod report;

pub use coverage::CoverageMetrics;
pub use report::{FuzzingReport, GenerationRecord};
