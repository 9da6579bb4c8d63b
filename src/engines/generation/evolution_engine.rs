use crate::config::{AppConfig, EvolutionConfig, FuzzingConfig};
use crate::engines::detection::DetectorExecutor;
use crate::engines::execution::analyzer::{AnalyzerSettings, ExecutionTraceAnalyzer};
use crate::engines::execution::cfg::ControlFlowGraph;
use crate::engines::execution::environment::FuzzingEnvironment;
use crate::engines::execution::evm::EvmEngine;
use crate::engines::execution::solver::ConstraintSolver;
use crate::engines::generation::{
    cross_contract::{cross_channel, generate_individual_by_cross, BadIndividual, CrossContractPlanner, DataDependencyPlanner},
    fitness::FitnessFunction,
    generator_set::GeneratorSet,
    individual::Individual,
    operators::{
        Crossover, DataDependencyCrossover, DataDependencyLinearRankingSelection, GeneMutation,
        LinearRankingSelection, Selection, SequenceCrossover,
    },
    population::Population,
};
use crate::engines::metrics::report::{FuzzingReport, GenerationRecord};
use crate::error::Result;
use crate::types::{Accounts, Interface};
use alloy_primitives::Address;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::mpsc::Receiver;

/// The contracts under test together with the session state they share.
#[derive(Debug)]
pub struct FuzzingTarget {
    pub generators: GeneratorSet,
    pub env: FuzzingEnvironment,
}

impl FuzzingTarget {
    /// `runtime_code` is the deployed code of the main contract; it sizes
    /// the coverage tables.
    pub fn new(generators: GeneratorSet, accounts: Accounts, runtime_code: &[u8]) -> Self {
        let mut interface = Interface::new();
        for id in generators.ids() {
            for (function, types) in generators.get(id).interface() {
                interface.entry(*function).or_insert_with(|| types.clone());
            }
        }
        let env = FuzzingEnvironment::new(
            generators.main().name(),
            0,
            accounts,
            interface,
            ControlFlowGraph::from_bytecode(runtime_code),
        );
        Self { generators, env }
    }

    /// Track coverage of an auxiliary contract reached through calls.
    pub fn with_auxiliary_code(mut self, address: Address, runtime_code: &[u8]) -> Self {
        self.env.add_other_contract(address, runtime_code);
        self
    }
}

pub trait ProgressCallback: Send {
    fn on_generation_start(&mut self, generation: usize);
    fn on_generation_complete(&mut self, record: &GenerationRecord, best_fitness: f64);
    fn on_population_reset(&mut self, generation: usize);
}

pub struct EvolutionEngine<E: EvmEngine, S: ConstraintSolver> {
    evolution: EvolutionConfig,
    fuzzing: FuzzingConfig,
    analyzer: ExecutionTraceAnalyzer<E, S>,
    selection: Selection,
    crossover: Crossover,
    mutation: GeneMutation,
    planner: Box<dyn CrossContractPlanner>,
    cross_receiver: Option<Receiver<BadIndividual>>,
    seed: u64,
    rng: StdRng,
}

impl<E: EvmEngine, S: ConstraintSolver> EvolutionEngine<E, S> {
    pub fn new(config: &AppConfig, evm: E, solver: S) -> Result<Self> {
        config.validate()?;
        let evolution = config.evolution.clone();
        let fuzzing = config.fuzzing.clone();

        let seed = evolution.seed.unwrap_or_else(rand::random);
        let rng = StdRng::seed_from_u64(seed);

        let (selection, crossover) = if fuzzing.data_dependency {
            (
                Selection::DataDependencyLinearRanking(DataDependencyLinearRankingSelection::new(
                    evolution.pmin,
                    evolution.pmax,
                )?),
                Crossover::DataDependency(DataDependencyCrossover::new(
                    evolution.probability_crossover,
                    fuzzing.max_individual_length,
                )?),
            )
        } else {
            (
                Selection::LinearRanking(LinearRankingSelection::new(evolution.pmin, evolution.pmax)?),
                Crossover::Sequence(SequenceCrossover::new(
                    evolution.probability_crossover,
                    fuzzing.max_individual_length,
                )?),
            )
        };
        let mutation = GeneMutation::new(evolution.probability_mutation)?;

        let mut analyzer = ExecutionTraceAnalyzer::new(evm, solver, AnalyzerSettings::from(&fuzzing), seed);
        let mut cross_receiver = None;
        if fuzzing.cross_contract {
            let (sender, receiver) = cross_channel(fuzzing.cross_queue_capacity);
            analyzer = analyzer.with_cross_channel(sender);
            cross_receiver = Some(receiver);
        }

        Ok(Self {
            planner: Box::new(DataDependencyPlanner::new(fuzzing.max_supply_calls)),
            evolution,
            fuzzing,
            analyzer,
            selection,
            crossover,
            mutation,
            cross_receiver,
            seed,
            rng,
        })
    }

    pub fn with_planner<P: CrossContractPlanner + 'static>(mut self, planner: P) -> Self {
        self.planner = Box::new(planner);
        self
    }

    pub fn with_detectors(mut self, detectors: DetectorExecutor) -> Self {
        self.analyzer = self.analyzer.with_detectors(detectors);
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn analyzer(&self) -> &ExecutionTraceAnalyzer<E, S> {
        &self.analyzer
    }

    pub fn analyzer_mut(&mut self) -> &mut ExecutionTraceAnalyzer<E, S> {
        &mut self.analyzer
    }

    /// Run the fuzzing session
    pub fn run<C: ProgressCallback>(&mut self, target: &mut FuzzingTarget, mut callback: C) -> Result<FuzzingReport> {
        target.env.seed = self.seed;
        log::info!(
            "Fuzzing {} with seed {} ({} individuals, {} generations)",
            target.env.contract_name,
            self.seed,
            self.evolution.population_size,
            self.evolution.generations
        );

        let mut population = Population::new(self.evolution.population_size)?;
        population.init_random(&mut target.generators, &mut self.rng)?;

        for generation in 0..self.evolution.generations {
            callback.on_generation_start(generation);

            if generation > 0 {
                population = self.breed(&population, target)?;
            }

            let outcome = self.analyzer.register_step(
                generation,
                &mut target.env,
                &mut target.generators,
                population.individuals(),
            );

            if outcome.reset_population {
                callback.on_population_reset(generation);
                target.env.clear_population_state();
                population.init_random(&mut target.generators, &mut self.rng)?;
                self.analyzer
                    .execute(&mut target.env, &mut target.generators, population.individuals());
                target.env.previous_code_coverage_length = target.env.code_coverage.len();
            }

            let best_fitness = self.memoize_fitness(&population, &mut target.env);
            callback.on_generation_complete(&outcome.record, best_fitness);

            if let Some(limit) = self.fuzzing.timeout_secs {
                if target.env.elapsed_secs() >= limit as f64 {
                    log::info!("Timeout of {}s reached", limit);
                    break;
                }
            }
            if let Some(limit) = self.fuzzing.max_transactions {
                if target.env.nr_of_transactions >= limit {
                    log::info!("Transaction budget of {} reached", limit);
                    break;
                }
            }
        }

        let report = self
            .analyzer
            .finalize(&target.env, target.generators.main().contract_address());
        if let Some(path) = &self.fuzzing.results_path {
            report.write_to(path)?;
            log::info!("Results written to {}", path.display());
        }
        Ok(report)
    }

    /// Score the executed population once and keep the scores for this
    /// generation. Returns the best score.
    fn memoize_fitness(&self, population: &Population, env: &mut FuzzingEnvironment) -> f64 {
        let fitness = FitnessFunction::new(env, self.fuzzing.data_dependency);
        let fits = population.all_fits(|individual| fitness.evaluate(individual));
        let best = fits.iter().copied().fold(0.0, f64::max);
        let scored: Vec<(String, f64)> = population
            .individuals()
            .iter()
            .zip(fits)
            .map(|(individual, fit)| (individual.hash().to_string(), fit))
            .collect();
        env.memoized_fitness.extend(scored);
        best
    }

    /// Selection, crossover and mutation, with the best individual kept and
    /// pending cross-contract replays taking the trailing slots.
    fn breed(&mut self, population: &Population, target: &mut FuzzingTarget) -> Result<Population> {
        let size = population.size();
        let fitness = FitnessFunction::new(&target.env, self.fuzzing.data_dependency);
        let evaluate = |individual: &Individual| fitness.evaluate(individual);
        let ranked = population.ranked(evaluate);
        let best = population
            .best(evaluate)
            .map(|individual| individual.offspring(individual.chromosome().to_vec()));

        let mut offspring = Vec::with_capacity(size);
        while offspring.len() < size {
            let Some((father, mother)) =
                self.selection
                    .select(&ranked, &target.env.data_dependencies, &mut self.rng)
            else {
                break;
            };
            let (mut first, mut second) =
                self.crossover
                    .cross(father, mother, &target.env.data_dependencies, &mut self.rng);
            self.mutation.mutate(&mut first, &mut target.generators, &mut self.rng);
            self.mutation.mutate(&mut second, &mut target.generators, &mut self.rng);
            offspring.push(first);
            offspring.push(second);
        }
        if let (Some(best), Some(slot)) = (best, offspring.first_mut()) {
            *slot = best;
        }

        let mut next = Population::new(size)?;
        next.init_with(offspring)?;
        self.inject_cross(&mut next, target);
        Ok(next)
    }

    fn inject_cross(&mut self, population: &mut Population, target: &mut FuzzingTarget) {
        let Some(receiver) = &self.cross_receiver else {
            return;
        };
        // Slot 0 holds the elite.
        let available = population.len().saturating_sub(1);
        let pending: Vec<BadIndividual> = receiver.try_iter().take(available).collect();
        for (offset, bad) in pending.iter().enumerate() {
            let individual = generate_individual_by_cross(
                &mut target.generators,
                self.planner.as_ref(),
                bad,
                &target.env.data_dependencies,
                &target.env.transaction_dependencies,
                self.fuzzing.max_individual_length,
                &mut self.rng,
            );
            population.replace(population.len() - 1 - offset, individual);
        }
        if !pending.is_empty() {
            log::debug!("Injected {} cross-contract individuals", pending.len());
        }
    }
}
