use super::traits::ConfigSection;
use crate::error::FuzzerError;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const WEI_PER_ETHER: u64 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzingConfig {
    pub max_individual_length: usize,
    /// Consecutive stalled generations before the population is rebuilt.
    pub max_symbolic_execution: usize,
    pub gas_limit: u64,
    /// Balance of every funded account, in ether. Caps solved call values.
    pub account_balance_ether: u64,
    pub max_array_length: usize,
    pub ring_buffer_length: usize,
    pub constraint_solving: bool,
    pub data_dependency: bool,
    pub cross_contract: bool,
    pub cross_probability_percent: u32,
    pub cross_queue_capacity: usize,
    pub max_supply_calls: usize,
    pub solver_timeout_ms: u64,
    pub timeout_secs: Option<u64>,
    pub max_transactions: Option<usize>,
    pub results_path: Option<PathBuf>,
}

impl Default for FuzzingConfig {
    fn default() -> Self {
        Self {
            max_individual_length: 10,
            max_symbolic_execution: 10,
            gas_limit: 4_500_000,
            account_balance_ether: 100,
            max_array_length: 2,
            ring_buffer_length: 10,
            constraint_solving: true,
            data_dependency: true,
            cross_contract: true,
            cross_probability_percent: 80,
            cross_queue_capacity: 64,
            max_supply_calls: 3,
            solver_timeout_ms: 10_000,
            timeout_secs: None,
            max_transactions: None,
            results_path: None,
        }
    }
}

impl FuzzingConfig {
    pub fn account_balance(&self) -> U256 {
        U256::from(self.account_balance_ether) * U256::from(WEI_PER_ETHER)
    }
}

impl ConfigSection for FuzzingConfig {
    fn section_name() -> &'static str {
        "fuzzing"
    }

    fn validate(&self) -> Result<(), FuzzerError> {
        if self.max_individual_length == 0 {
            return Err(FuzzerError::Configuration(
                "Maximum individual length must be at least 1".to_string(),
            ));
        }
        if self.ring_buffer_length == 0 {
            return Err(FuzzerError::Configuration(
                "Ring buffer length must be at least 1".to_string(),
            ));
        }
        if self.cross_probability_percent > 100 {
            return Err(FuzzerError::Configuration(
                "Cross probability is a percentage between 0 and 100".to_string(),
            ));
        }
        if self.cross_contract && self.cross_queue_capacity == 0 {
            return Err(FuzzerError::Configuration(
                "Cross queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
