mod common;

use common::*;
use crossfuzz::config::AppConfig;
use crossfuzz::engines::execution::NullSolver;
use crossfuzz::engines::generation::{
    ChannelProgressCallback, EvolutionEngine, FitnessFunction, FuzzingTarget, LogProgressCallback, ProgressMessage,
};
use crossfuzz::engines::metrics::FuzzingReport;
use crossfuzz::types::Value;
use std::sync::mpsc;

/// Small, seeded session for fast tests
fn create_test_config(seed: u64) -> AppConfig {
    let mut config = AppConfig::default();
    config.evolution.population_size = 4;
    config.evolution.generations = 3;
    config.evolution.seed = Some(seed);
    config.fuzzing.max_individual_length = 4;
    config
}

fn vault_target() -> FuzzingTarget {
    target(&VAULT_SIGNATURES, &VAULT_RUNTIME)
}

fn run_session(config: &AppConfig) -> anyhow::Result<(FuzzingTarget, FuzzingReport)> {
    let mut target = vault_target();
    let mut engine = EvolutionEngine::new(config, vault_evm(), NullSolver)?;
    let report = engine.run(&mut target, LogProgressCallback)?;
    Ok((target, report))
}

#[test]
fn test_session_reports_every_generation() -> anyhow::Result<()> {
    init_logger();
    let (target, report) = run_session(&create_test_config(7))?;

    assert_eq!(report.contract, "Vault");
    assert_eq!(report.seed, 7);
    assert_eq!(report.address_under_test, Some(CONTRACT));
    assert_eq!(report.generations.len(), 3);
    assert_eq!(
        report.generations.iter().map(|g| g.generation).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(report.transactions > 0);
    assert_eq!(report.transactions, target.env.nr_of_transactions);
    assert!(report.coverage.covered_pcs > 0);
    assert!(report.coverage.covered_pcs <= report.coverage.total_pcs);
    assert_eq!(report.coverage.total_branches, 4);
    Ok(())
}

#[test]
fn test_storage_order_is_rewarded_after_a_session() -> anyhow::Result<()> {
    init_logger();
    let (target, _) = run_session(&create_test_config(7))?;

    let set = call(OWNER, "set(uint256)", vec![Value::uint(256, 1)], 0);
    let pay = call(OWNER, "pay()", vec![], 0);
    let fitness = FitnessFunction::new(&target.env, true);
    let ordered = fitness.evaluate(&individual(vec![set.clone(), pay.clone()]));
    let reversed = fitness.evaluate(&individual(vec![pay, set]));
    assert!(ordered > reversed, "ordered {} vs reversed {}", ordered, reversed);
    Ok(())
}

#[test]
fn test_same_seed_same_session() -> anyhow::Result<()> {
    init_logger();
    let config = create_test_config(21);
    let (_, first) = run_session(&config)?;
    let (_, second) = run_session(&config)?;

    let shape = |report: &FuzzingReport| {
        report
            .generations
            .iter()
            .map(|g| (g.total_transactions, g.unique_transactions, g.cross_transactions))
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&first), shape(&second));
    assert_eq!(first.coverage.covered_pcs, second.coverage.covered_pcs);
    Ok(())
}

#[test]
fn test_progress_is_streamed() -> anyhow::Result<()> {
    init_logger();
    let (sender, receiver) = mpsc::channel();
    let mut target = vault_target();
    let mut engine = EvolutionEngine::new(&create_test_config(3), vault_evm(), NullSolver)?;
    engine.run(&mut target, ChannelProgressCallback::new(sender))?;

    let messages: Vec<ProgressMessage> = receiver.try_iter().collect();
    let started = messages
        .iter()
        .filter(|m| matches!(m, ProgressMessage::GenerationStart(_)))
        .count();
    let completed: Vec<usize> = messages
        .iter()
        .filter_map(|m| match m {
            ProgressMessage::GenerationComplete { record, .. } => Some(record.generation),
            _ => None,
        })
        .collect();
    assert_eq!(started, 3);
    assert_eq!(completed, vec![0, 1, 2]);
    Ok(())
}

#[test]
fn test_transaction_budget_stops_early() -> anyhow::Result<()> {
    init_logger();
    let mut config = create_test_config(5);
    config.evolution.generations = 50;
    config.fuzzing.max_transactions = Some(1);
    let (_, report) = run_session(&config)?;
    assert_eq!(report.generations.len(), 1);
    Ok(())
}

#[test]
fn test_results_are_written_under_the_contract_name() -> anyhow::Result<()> {
    init_logger();
    let path = std::env::temp_dir().join(format!("crossfuzz-results-{}.json", std::process::id()));
    let mut config = create_test_config(11);
    config.fuzzing.results_path = Some(path.clone());
    run_session(&config)?;

    let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    std::fs::remove_file(&path)?;
    assert_eq!(written["Vault"]["seed"], 11);
    assert_eq!(written["Vault"]["generations"].as_array().map(Vec::len), Some(3));
    Ok(())
}
