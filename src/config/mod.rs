pub mod traits;
pub mod evolution;
pub mod fuzzing;
pub mod manager;

pub use manager::{AppConfig, ConfigManager};
pub use evolution::EvolutionConfig;
pub use fuzzing::FuzzingConfig;
pub use traits::ConfigSection;
