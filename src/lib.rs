//! Genetic fuzzer for EVM smart contracts.
//!
//! Transaction sequences are evolved against a pluggable EVM. Every trace is
//! replayed through a taint analyzer that feeds coverage and data dependency
//! feedback back into the search, a branch-negating constraint solver, and a
//! set of vulnerability detectors.

pub mod config;
pub mod engines;
pub mod error;
pub mod types;

pub use config::{AppConfig, ConfigManager};
pub use engines::detection::{Finding, Severity};
pub use engines::execution::{ConstraintSolver, EvmEngine, ExecutionTraceAnalyzer};
pub use engines::generation::{EvolutionEngine, FuzzingTarget, Generator, Individual, Population};
pub use error::{EncodeError, FuzzerError, Result};
