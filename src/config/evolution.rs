use super::traits::ConfigSection;
use crate::error::FuzzerError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    pub population_size: usize,
    pub generations: usize,
    pub probability_crossover: f64,
    pub probability_mutation: f64,
    /// Selection probability of the worst ranked individual.
    pub pmin: f64,
    /// Selection probability of the best ranked individual.
    pub pmax: f64,
    pub seed: Option<u64>,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 10,
            generations: 10,
            probability_crossover: 0.9,
            probability_mutation: 0.1,
            pmin: 0.1,
            pmax: 0.9,
            seed: None,
        }
    }
}

impl ConfigSection for EvolutionConfig {
    fn section_name() -> &'static str {
        "evolution"
    }

    fn validate(&self) -> Result<(), FuzzerError> {
        if self.population_size == 0 || self.population_size % 2 != 0 {
            return Err(FuzzerError::Configuration(format!(
                "Population size must be a positive even number, got {}",
                self.population_size
            )));
        }
        if self.probability_crossover <= 0.0 || self.probability_crossover > 1.0 {
            return Err(FuzzerError::Configuration(
                "Crossover probability must be in (0, 1]".to_string(),
            ));
        }
        if self.probability_mutation <= 0.0 || self.probability_mutation > 1.0 {
            return Err(FuzzerError::Configuration(
                "Mutation probability must be in (0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.pmin) || !(0.0..=1.0).contains(&self.pmax) {
            return Err(FuzzerError::Configuration(
                "Selection probabilities must be between 0 and 1".to_string(),
            ));
        }
        if self.pmin > self.pmax {
            return Err(FuzzerError::Configuration(
                "pmin must not exceed pmax".to_string(),
            ));
        }
        Ok(())
    }
}
