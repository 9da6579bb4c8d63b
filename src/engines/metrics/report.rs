// src/engines/metrics/report.rs
use super::coverage::CoverageMetrics;
use crate::engines::detection::Finding;
use crate::engines::execution::environment::FuzzingEnvironment;
use crate::error::Result;
use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One line of the per-generation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub generation: usize,
    pub time: f64,
    pub total_transactions: usize,
    pub unique_transactions: usize,
    pub code_coverage: f64,
    pub branch_coverage: f64,
    pub cross_transactions: usize,
}

impl GenerationRecord {
    pub fn capture(generation: usize, env: &FuzzingEnvironment) -> Self {
        let coverage = CoverageMetrics::calculate(env);
        Self {
            generation,
            time: env.elapsed_secs(),
            total_transactions: env.nr_of_transactions,
            unique_transactions: env.unique_individuals.len(),
            code_coverage: coverage.code_coverage,
            branch_coverage: coverage.branch_coverage,
            cross_transactions: env.cross_transactions,
        }
    }
}

/// Results document of one fuzzing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzingReport {
    pub contract: String,
    pub address_under_test: Option<Address>,
    pub seed: u64,
    pub finished_at: DateTime<Utc>,
    pub errors: BTreeMap<u32, Vec<Finding>>,
    pub generations: Vec<GenerationRecord>,
    pub transactions: usize,
    pub unique_transactions: usize,
    pub cross_transactions: usize,
    pub transactions_per_second: f64,
    pub coverage: CoverageMetrics,
    pub execution_time: f64,
    pub memory_consumption: Option<f64>,
}

impl FuzzingReport {
    pub fn from_environment(env: &FuzzingEnvironment, address_under_test: Option<Address>) -> Self {
        let execution_time = env.elapsed_secs();
        let transactions_per_second = if execution_time > 0.0 {
            env.nr_of_transactions as f64 / execution_time
        } else {
            0.0
        };

        Self {
            contract: env.contract_name.clone(),
            address_under_test,
            seed: env.seed,
            finished_at: Utc::now(),
            errors: env.errors.clone(),
            generations: env.generations.clone(),
            transactions: env.nr_of_transactions,
            unique_transactions: env.unique_individuals.len(),
            cross_transactions: env.cross_transactions,
            transactions_per_second,
            coverage: CoverageMetrics::calculate(env),
            execution_time,
            memory_consumption: resident_memory_mb(),
        }
    }

    pub fn finding_count(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    /// Store the report under its contract name, keeping the entries of
    /// other contracts already in the file.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut document: serde_json::Map<String, serde_json::Value> = if path.exists() {
            let content = fs::read_to_string(path)?;
            match serde_json::from_str(&content) {
                Ok(existing) => existing,
                Err(e) => {
                    log::warn!("Overwriting unreadable results file {}: {}", path.display(), e);
                    serde_json::Map::new()
                }
            }
        } else {
            serde_json::Map::new()
        };

        document.insert(self.contract.clone(), serde_json::to_value(self)?);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&document)?)?;
        log::info!("Results written to {}", path.display());
        Ok(())
    }

    pub fn log_summary(&self) {
        log::info!("-----------------------------------------------------");
        log::info!(
            "Number of generations: \t {}",
            self.generations.last().map(|g| g.generation).unwrap_or(0)
        );
        log::info!(
            "Number of transactions: \t {} ({} unique, {} cross)",
            self.transactions,
            self.unique_transactions,
            self.cross_transactions
        );
        log::info!("Transactions per second: \t {:.0}", self.transactions_per_second);
        log::info!(
            "Total code coverage: \t {:.2}% ({}/{})",
            self.coverage.code_coverage,
            self.coverage.covered_pcs,
            self.coverage.total_pcs
        );
        log::info!(
            "Total branch coverage: \t {:.2}% ({}/{})",
            self.coverage.branch_coverage,
            self.coverage.covered_branches,
            self.coverage.total_branches
        );
        log::info!("Total execution time: \t {:.2} seconds", self.execution_time);
        if let Some(memory) = self.memory_consumption {
            log::info!("Total memory consumption: \t {:.2} MB", memory);
        }
        log::info!("Findings: \t {}", self.finding_count());
        log::info!("-----------------------------------------------------");
    }
}

/// Resident set size of this process in megabytes, where the platform
/// exposes it.
pub fn resident_memory_mb() -> Option<f64> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kilobytes: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kilobytes / 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::execution::cfg::ControlFlowGraph;
    use crate::types::Accounts;

    fn environment(name: &str) -> FuzzingEnvironment {
        FuzzingEnvironment::new(
            name,
            1,
            Accounts::default(),
            Default::default(),
            ControlFlowGraph::from_bytecode(&[0x60, 0x00, 0x00]),
        )
    }

    #[test]
    fn records_capture_transaction_counters() {
        let mut env = environment("Token");
        env.nr_of_transactions = 12;
        env.unique_individuals.insert("a".to_string());
        env.code_coverage.insert(0);

        let record = GenerationRecord::capture(3, &env);
        assert_eq!(record.generation, 3);
        assert_eq!(record.total_transactions, 12);
        assert_eq!(record.unique_transactions, 1);
        assert_eq!(record.code_coverage, 50.0);
    }

    #[test]
    fn reports_merge_by_contract_name() {
        let dir = std::env::temp_dir().join(format!("crossfuzz-report-{}", std::process::id()));
        let path = dir.join("results.json");
        let _ = fs::remove_file(&path);

        FuzzingReport::from_environment(&environment("Token"), None)
            .write_to(&path)
            .unwrap();
        FuzzingReport::from_environment(&environment("Vault"), None)
            .write_to(&path)
            .unwrap();

        let written: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(written.contains_key("Token"));
        assert!(written.contains_key("Vault"));
        let _ = fs::remove_dir_all(&dir);
    }
}
