use super::{evolution::EvolutionConfig, fuzzing::FuzzingConfig, traits::ConfigSection};
use crate::error::FuzzerError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Environment variables with this prefix override file values, e.g.
/// `CROSSFUZZ_FUZZING__GAS_LIMIT=3000000`.
pub const ENV_PREFIX: &str = "CROSSFUZZ";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub evolution: EvolutionConfig,
    pub fuzzing: FuzzingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), FuzzerError> {
        validate_section(&self.evolution)?;
        validate_section(&self.fuzzing)?;
        Ok(())
    }
}

/// Prefix configuration errors with the section they came from.
fn validate_section<S: ConfigSection>(section: &S) -> Result<(), FuzzerError> {
    section.validate().map_err(|e| match e {
        FuzzerError::Configuration(message) => {
            FuzzerError::Configuration(format!("[{}] {}", S::section_name(), message))
        }
        other => other,
    })
}

pub struct ConfigManager {
    config: Arc<RwLock<AppConfig>>,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> FuzzerError {
    FuzzerError::Configuration("Configuration lock poisoned".to_string())
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(AppConfig::default())),
        }
    }

    /// Layer a TOML or JSON file and `CROSSFUZZ_*` environment overrides on
    /// top of the defaults.
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<(), FuzzerError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FuzzerError::Configuration(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        log::info!("Loaded configuration from {}", path.display());

        *self.config.write().map_err(poisoned)? = config;
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), FuzzerError> {
        let config = self.config.read().map_err(poisoned)?;
        let toml_str = toml::to_string_pretty(&*config)
            .map_err(|e| FuzzerError::Toml(format!("Failed to serialize: {}", e)))?;

        std::fs::write(path, toml_str)?;
        Ok(())
    }

    pub fn get(&self) -> Result<AppConfig, FuzzerError> {
        Ok(self.config.read().map_err(poisoned)?.clone())
    }

    pub fn update<F>(&self, f: F) -> Result<(), FuzzerError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = self.config.write().map_err(poisoned)?;
        let mut candidate = config.clone();
        f(&mut candidate);
        candidate.validate()?;
        *config = candidate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn odd_population_is_rejected() {
        let manager = ConfigManager::new();
        let result = manager.update(|c| c.evolution.population_size = 7);
        assert!(matches!(result, Err(FuzzerError::Configuration(_))));
        assert_eq!(manager.get().unwrap().evolution.population_size, 10);
    }

    #[test]
    fn errors_name_their_section() {
        let mut config = AppConfig::default();
        config.fuzzing.cross_probability_percent = 101;
        match config.validate() {
            Err(FuzzerError::Configuration(message)) => assert!(message.starts_with("[fuzzing]")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn round_trips_through_toml_file() {
        let dir = std::env::temp_dir().join(format!("crossfuzz-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.toml");

        let manager = ConfigManager::new();
        manager
            .update(|c| {
                c.evolution.population_size = 4;
                c.fuzzing.max_array_length = 3;
            })
            .unwrap();
        manager.save_to_file(&path).unwrap();

        let reloaded = ConfigManager::new();
        reloaded.load_from_file(&path).unwrap();
        let config = reloaded.get().unwrap();
        assert_eq!(config.evolution.population_size, 4);
        assert_eq!(config.fuzzing.max_array_length, 3);

        std::fs::remove_dir_all(&dir).ok();
    }
}
