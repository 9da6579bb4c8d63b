use thiserror::Error;

#[derive(Error, Debug)]
pub enum FuzzerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Unsupported ABI type: {0}")]
    UnsupportedType(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("TOML error: {0}")]
    Toml(String),
}

/// Failure to turn a gene into a concrete transaction. Kept per transaction
/// inside a solution, so it has to be cheap to clone and compare.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("value {value} does not fit in {ty}")]
    OutOfRange { ty: String, value: String },

    #[error("fixed bytes of width {width} cannot hold {len} bytes")]
    InvalidWidth { width: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, FuzzerError>;
