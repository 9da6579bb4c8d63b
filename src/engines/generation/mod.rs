pub mod cross_contract;
pub mod evolution_engine;
pub mod fitness;
pub mod generator;
pub mod generator_set;
pub mod individual;
pub mod operators;
pub mod pool;
pub mod population;
pub mod progress;

pub use cross_contract::{
    cross_channel, generate_individual_by_cross, BadIndividual, CrossContractPlanner, DataDependencyPlanner,
    PlanRequest, SupplyCall,
};
pub use evolution_engine::{EvolutionEngine, FuzzingTarget, ProgressCallback};
pub use fitness::{compute_branch_coverage_fitness, compute_data_dependency_fitness, FitnessFunction};
pub use generator::{ContractSpec, Generator, GeneratorSettings};
pub use generator_set::{GeneratorId, GeneratorSet};
pub use individual::{Individual, Solution};
pub use operators::{
    Crossover, DataDependencyCrossover, DataDependencyLinearRankingSelection, GeneMutation, LinearRankingSelection,
    Selection, SequenceCrossover,
};
pub use pool::{CircularSet, PoolMap};
pub use population::Population;
pub use progress::{ChannelProgressCallback, LogProgressCallback, ProgressMessage};
