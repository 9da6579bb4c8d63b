mod common;

use alloy_primitives::U256;
use common::*;
use crossfuzz::engines::execution::environment::DataDependencies;
use crossfuzz::engines::generation::{
    DataDependencyCrossover, DataDependencyLinearRankingSelection, GeneMutation, Population, SequenceCrossover,
};
use crossfuzz::types::{Field, FunctionId, Gene, Value};
use crossfuzz::{AppConfig, EvolutionEngine, FuzzerError, Individual};
use crossfuzz::engines::execution::NullSolver;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn set(value: u64) -> Gene {
    call(OWNER, "set(uint256)", vec![Value::uint(256, value)], 0)
}

fn pay() -> Gene {
    call(OWNER, "pay()", vec![], 0)
}

fn check(value: u64) -> Gene {
    call(OWNER, "check(uint256)", vec![Value::uint(256, value)], 0)
}

fn vault_dependencies() -> DataDependencies {
    let mut deps = DataDependencies::default();
    deps.record_write(FunctionId::from_signature("set(uint256)"), U256::ZERO);
    deps.record_read(FunctionId::from_signature("pay()"), U256::ZERO);
    deps
}

#[test]
fn dependent_parents_are_paired() -> anyhow::Result<()> {
    let deps = vault_dependencies();
    let writer = individual(vec![set(1)]);
    let reader = individual(vec![pay()]);
    let others = [individual(vec![check(1)]), individual(vec![check(2)])];
    let ranked: Vec<&Individual> = vec![&others[0], &writer, &others[1], &reader];
    let selection = DataDependencyLinearRankingSelection::new(0.1, 0.9)?;

    for seed in 0..64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let (father, mother) = selection.select(&ranked, &deps, &mut rng).expect("non-empty ranking");
        if father.hash() == writer.hash() {
            assert_eq!(mother.hash(), reader.hash());
        } else if father.hash() == reader.hash() {
            assert_eq!(mother.hash(), writer.hash());
        }
    }
    Ok(())
}

#[test]
fn writer_is_spliced_before_reader() -> anyhow::Result<()> {
    let deps = vault_dependencies();
    let crossover = DataDependencyCrossover::new(1.0, 10)?;
    let writer = individual(vec![set(1)]);
    let reader = individual(vec![pay()]);
    let mut rng = StdRng::seed_from_u64(5);

    let (first, second) = crossover.cross(&writer, &reader, &deps, &mut rng);
    assert_eq!(
        first.function_sequence(),
        vec![
            FunctionId::from_signature("set(uint256)"),
            FunctionId::from_signature("pay()")
        ]
    );
    assert_eq!(second.hash(), reader.hash());
    Ok(())
}

#[test]
fn children_never_exceed_the_maximum_length() -> anyhow::Result<()> {
    let crossover = SequenceCrossover::new(1.0, 3)?;
    let father = individual(vec![set(1), pay()]);
    let mother = individual(vec![check(1), check(2)]);
    let mut rng = StdRng::seed_from_u64(9);

    let (first, second) = crossover.cross(&father, &mother, &mut rng);
    assert_eq!(first.hash(), father.hash());
    assert_eq!(second.hash(), mother.hash());
    assert!(!first.is_from_cross());
    Ok(())
}

#[test]
fn mutation_keeps_the_call_sequence() -> anyhow::Result<()> {
    let mut generators = generators(&VAULT_SIGNATURES);
    let mutation = GeneMutation::new(1.0)?;
    let mut rng = StdRng::seed_from_u64(11);
    let mut gene = set(1);
    gene.balance = Field::Absent;
    gene.call_return = None;
    let mut subject = individual(vec![gene, pay(), check(3)]);
    let before = subject.function_sequence();

    mutation.mutate(&mut subject, &mut generators, &mut rng);

    assert_eq!(subject.function_sequence(), before);
    assert_eq!(subject.solution().len(), 3);
    let first = &subject.chromosome()[0];
    assert!(!first.balance.is_absent());
    assert!(first.call_return.is_some());
    assert!([OWNER, ATTACKER].contains(&first.account));
    Ok(())
}

#[test]
fn odd_population_is_rejected_up_front() {
    init_logger();
    let mut config = AppConfig::default();
    config.evolution.population_size = 5;
    let engine = EvolutionEngine::new(&config, vault_evm(), NullSolver);
    assert!(matches!(engine, Err(FuzzerError::Configuration(_))));
    assert!(matches!(Population::new(5), Err(FuzzerError::Configuration(_))));
}

#[test]
fn invalid_probabilities_are_rejected() {
    assert!(matches!(GeneMutation::new(1.5), Err(FuzzerError::Configuration(_))));
    assert!(matches!(SequenceCrossover::new(-0.1, 4), Err(FuzzerError::Configuration(_))));
    assert!(DataDependencyLinearRankingSelection::new(0.9, 0.1).is_err());
}

#[test]
fn decoding_is_stable() {
    let chromosome = vec![set(7), pay()];
    let a = individual(chromosome.clone());
    let b = individual(chromosome.clone());
    assert_eq!(a.hash(), b.hash());
    assert_eq!(a.solution(), &Individual::decode(&chromosome));

    let mut edited = a.clone();
    edited.update(|_| {});
    assert_eq!(edited.hash(), a.hash());
    edited.update(|genes| genes.reverse());
    assert_ne!(edited.hash(), a.hash());
}

#[test]
fn calls_carry_selector_and_encoded_arguments() {
    let subject = individual(vec![set(42)]);
    let test = subject.solution()[0].as_ref().expect("uint256 encodes");
    assert_eq!(test.transaction.data.len(), 4 + 32);
    assert_eq!(argument(test, 0), U256::from(42u8));
    assert_eq!(
        FunctionId::from_signature("set(uint256)").selector().map(|s| s.to_vec()),
        Some(test.transaction.data[..4].to_vec())
    );
}

#[test]
fn seeded_population_is_even() -> anyhow::Result<()> {
    let mut generators = generators(&VAULT_SIGNATURES);
    let mut rng = StdRng::seed_from_u64(1);
    let mut population = Population::new(2)?;
    population.init_seeded(&mut generators, &mut rng)?;
    assert_eq!(population.size(), 4);
    assert!(population.individuals().iter().all(|i| !i.is_empty()));
    Ok(())
}
