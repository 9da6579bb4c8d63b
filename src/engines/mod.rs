pub mod detection;
pub mod execution;
pub mod generation;
pub mod metrics;
