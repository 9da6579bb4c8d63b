use super::individual::Individual;
use crate::engines::execution::environment::{DataDependencies, FuzzingEnvironment, JumpTable};
use crate::types::Gene;
use std::collections::BTreeSet;

/// Scores individuals against the state of the last executed generation.
#[derive(Debug, Clone, Copy)]
pub struct FitnessFunction<'a> {
    env: &'a FuzzingEnvironment,
    data_dependency: bool,
}

impl<'a> FitnessFunction<'a> {
    pub fn new(env: &'a FuzzingEnvironment, data_dependency: bool) -> Self {
        Self {
            env,
            data_dependency,
        }
    }

    pub fn evaluate(&self, individual: &Individual) -> f64 {
        if let Some(fitness) = self.env.memoized_fitness.get(individual.hash()) {
            return *fitness;
        }

        let mut fitness = self
            .env
            .individual_branches
            .get(individual.hash())
            .map(|branches| compute_branch_coverage_fitness(branches, &self.env.code_coverage))
            .unwrap_or(0.0);
        if self.data_dependency {
            fitness += compute_data_dependency_fitness(individual.chromosome(), &self.env.data_dependencies);
        }
        fitness
    }
}

/// Branch destinations the individual saw but did not take that no
/// individual has covered yet.
pub fn compute_branch_coverage_fitness(branches: &JumpTable, pcs: &BTreeSet<usize>) -> f64 {
    branches
        .values()
        .flat_map(|destinations| destinations.iter())
        .filter(|(destination, taken)| !**taken && !pcs.contains(*destination))
        .count() as f64
}

/// One point per slot a transaction writes that a later transaction of the
/// same chromosome reads.
pub fn compute_data_dependency_fitness(chromosome: &[Gene], dependencies: &DataDependencies) -> f64 {
    let mut bonus = 0usize;
    for (index, gene) in chromosome.iter().enumerate() {
        let Some(footprint) = dependencies.get(&gene.function) else {
            continue;
        };
        let later = &chromosome[index + 1..];
        bonus += footprint
            .write
            .iter()
            .filter(|slot| {
                later.iter().any(|reader| {
                    dependencies
                        .get(&reader.function)
                        .is_some_and(|set| set.read.contains(*slot))
                })
            })
            .count();
    }
    bonus as f64
}
