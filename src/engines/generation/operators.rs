use super::generator_set::{GeneratorId, GeneratorSet};
use super::individual::Individual;
use crate::engines::execution::environment::DataDependencies;
use crate::error::{FuzzerError, Result};
use crate::types::{AddressValues, Field, Gene};
use alloy_primitives::{Address, U256};
use rand::seq::SliceRandom;
use rand::Rng;

fn check_probability(name: &str, value: f64) -> Result<f64> {
    if value <= 0.0 || value > 1.0 {
        return Err(FuzzerError::Configuration(format!(
            "Invalid {} probability {}, expected a value in (0, 1]",
            name, value
        )));
    }
    Ok(value)
}

/// Copy of an individual that no longer counts as cross-generated.
fn clone_of(individual: &Individual) -> Individual {
    individual.offspring(individual.chromosome().to_vec())
}

/// Linear ranking selection.
///
/// Individuals are ranked by ascending fitness; the worst gets weight
/// `pmin`, the best `pmax` and everything in between is interpolated.
#[derive(Debug, Clone, Copy)]
pub struct LinearRankingSelection {
    pmin: f64,
    pmax: f64,
}

impl LinearRankingSelection {
    pub fn new(pmin: f64, pmax: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&pmin) || !(0.0..=1.0).contains(&pmax) || pmin > pmax {
            return Err(FuzzerError::Configuration(format!(
                "Invalid ranking probabilities pmin={} pmax={}",
                pmin, pmax
            )));
        }
        Ok(Self { pmin, pmax })
    }

    /// Cumulative selection wheel for `n` ranked individuals.
    pub fn wheel(&self, n: usize) -> Vec<f64> {
        if n == 0 {
            return Vec::new();
        }
        let probabilities: Vec<f64> = (1..=n)
            .map(|i| {
                if n == 1 {
                    self.pmax
                } else {
                    self.pmin + (self.pmax - self.pmin) * (i - 1) as f64 / (n - 1) as f64
                }
            })
            .collect();
        let total: f64 = probabilities.iter().sum();

        let mut cumulative = 0.0;
        probabilities
            .iter()
            .map(|p| {
                cumulative += if total > 0.0 { p / total } else { 1.0 / n as f64 };
                cumulative
            })
            .collect()
    }

    /// Rank index drawn from the wheel.
    pub fn spin<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> usize {
        let wheel = self.wheel(n);
        let draw: f64 = rng.gen();
        wheel.partition_point(|w| *w <= draw).min(n.saturating_sub(1))
    }

    /// Father by rank, mother next in rank order. `ranked` must be sorted
    /// by ascending fitness.
    pub fn select<'p, R: Rng + ?Sized>(
        &self,
        ranked: &[&'p Individual],
        rng: &mut R,
    ) -> Option<(&'p Individual, &'p Individual)> {
        if ranked.is_empty() {
            return None;
        }
        let father = self.spin(ranked.len(), rng);
        let mother = (father + 1) % ranked.len();
        Some((ranked[father], ranked[mother]))
    }
}

/// Ranking selection whose mother shares storage with the father.
#[derive(Debug, Clone, Copy)]
pub struct DataDependencyLinearRankingSelection {
    ranking: LinearRankingSelection,
}

impl DataDependencyLinearRankingSelection {
    pub fn new(pmin: f64, pmax: f64) -> Result<Self> {
        Ok(Self {
            ranking: LinearRankingSelection::new(pmin, pmax)?,
        })
    }

    pub fn select<'p, R: Rng + ?Sized>(
        &self,
        ranked: &[&'p Individual],
        dependencies: &DataDependencies,
        rng: &mut R,
    ) -> Option<(&'p Individual, &'p Individual)> {
        if ranked.is_empty() {
            return None;
        }
        let father_index = self.ranking.spin(ranked.len(), rng);
        let father = ranked[father_index];
        let father_functions = father.function_sequence();
        let (father_reads, father_writes) = dependencies.reads_and_writes(father.chromosome());

        let mut candidates: Vec<&'p Individual> = ranked.to_vec();
        candidates.shuffle(rng);
        let dependent = candidates.into_iter().find(|candidate| {
            if candidate.function_sequence() == father_functions {
                return false;
            }
            let (reads, writes) = dependencies.reads_and_writes(candidate.chromosome());
            !reads.is_disjoint(&father_writes) || !father_reads.is_disjoint(&writes)
        });

        let mother = dependent.unwrap_or(ranked[(father_index + 1) % ranked.len()]);
        Some((father, mother))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Selection {
    LinearRanking(LinearRankingSelection),
    DataDependencyLinearRanking(DataDependencyLinearRankingSelection),
}

impl Selection {
    pub fn select<'p, R: Rng + ?Sized>(
        &self,
        ranked: &[&'p Individual],
        dependencies: &DataDependencies,
        rng: &mut R,
    ) -> Option<(&'p Individual, &'p Individual)> {
        match self {
            Selection::LinearRanking(selection) => selection.select(ranked, rng),
            Selection::DataDependencyLinearRanking(selection) => selection.select(ranked, dependencies, rng),
        }
    }
}

/// Sequence crossover: children are the two parents' chromosomes spliced
/// end to end, never longer than `max_length`.
#[derive(Debug, Clone, Copy)]
pub struct SequenceCrossover {
    pc: f64,
    max_length: usize,
}

impl SequenceCrossover {
    pub fn new(pc: f64, max_length: usize) -> Result<Self> {
        Ok(Self {
            pc: check_probability("crossover", pc)?,
            max_length,
        })
    }

    fn attempt<R: Rng + ?Sized>(&self, father: &Individual, mother: &Individual, rng: &mut R) -> bool {
        let do_cross = rng.gen::<f64>() <= self.pc;
        do_cross && father.len() + mother.len() <= self.max_length
    }

    pub fn cross<R: Rng + ?Sized>(
        &self,
        father: &Individual,
        mother: &Individual,
        rng: &mut R,
    ) -> (Individual, Individual) {
        if !self.attempt(father, mother, rng) {
            return (clone_of(father), clone_of(mother));
        }
        (splice(father, mother), splice(mother, father))
    }
}

/// Sequence crossover that only splices parents with a storage dependency
/// in the direction of the splice.
#[derive(Debug, Clone, Copy)]
pub struct DataDependencyCrossover {
    sequence: SequenceCrossover,
}

impl DataDependencyCrossover {
    pub fn new(pc: f64, max_length: usize) -> Result<Self> {
        Ok(Self {
            sequence: SequenceCrossover::new(pc, max_length)?,
        })
    }

    pub fn cross<R: Rng + ?Sized>(
        &self,
        father: &Individual,
        mother: &Individual,
        dependencies: &DataDependencies,
        rng: &mut R,
    ) -> (Individual, Individual) {
        if !self.sequence.attempt(father, mother, rng) {
            return (clone_of(father), clone_of(mother));
        }
        let (father_reads, father_writes) = dependencies.reads_and_writes(father.chromosome());
        let (mother_reads, mother_writes) = dependencies.reads_and_writes(mother.chromosome());

        // Each child is spliced only when its tail reads what its head writes.
        let first = if !mother_reads.is_disjoint(&father_writes) {
            splice(father, mother)
        } else {
            clone_of(father)
        };
        let second = if !father_reads.is_disjoint(&mother_writes) {
            splice(mother, father)
        } else {
            clone_of(mother)
        };
        (first, second)
    }
}

fn splice(head: &Individual, tail: &Individual) -> Individual {
    let mut chromosome = head.chromosome().to_vec();
    chromosome.extend_from_slice(tail.chromosome());
    head.offspring(chromosome)
}

#[derive(Debug, Clone, Copy)]
pub enum Crossover {
    Sequence(SequenceCrossover),
    DataDependency(DataDependencyCrossover),
}

impl Crossover {
    pub fn cross<R: Rng + ?Sized>(
        &self,
        father: &Individual,
        mother: &Individual,
        dependencies: &DataDependencies,
        rng: &mut R,
    ) -> (Individual, Individual) {
        match self {
            Crossover::Sequence(crossover) => crossover.cross(father, mother, rng),
            Crossover::DataDependency(crossover) => crossover.cross(father, mother, dependencies, rng),
        }
    }
}

/// Per-field mutation drawing replacements from the generators' pools.
#[derive(Debug, Clone, Copy)]
pub struct GeneMutation {
    pm: f64,
}

impl GeneMutation {
    pub fn new(pm: f64) -> Result<Self> {
        Ok(Self {
            pm: check_probability("mutation", pm)?,
        })
    }

    pub fn mutate<R: Rng + ?Sized>(&self, individual: &mut Individual, generators: &mut GeneratorSet, rng: &mut R) {
        let preferred = individual.generator();
        let pm = self.pm;
        individual.update(|chromosome| {
            for gene in chromosome.iter_mut() {
                mutate_gene(gene, pm, generators, preferred, rng);
            }
        });
    }
}

fn mutate_gene<R: Rng + ?Sized>(
    gene: &mut Gene,
    pm: f64,
    generators: &mut GeneratorSet,
    preferred: GeneratorId,
    rng: &mut R,
) {
    let function = gene.function;
    let owner = generators.owner_of(&function, preferred);
    let types = generators
        .get(owner)
        .argument_types(&function)
        .map(<[_]>::to_vec)
        .unwrap_or_default();
    let generator = generators.get_mut(owner);

    if rng.gen::<f64>() <= pm {
        gene.account = generator.get_random_account(function, rng);
    }
    if rng.gen::<f64>() <= pm {
        gene.amount = generator.get_random_amount(function, rng);
    }
    if rng.gen::<f64>() <= pm {
        gene.gaslimit = generator.get_random_gaslimit(function);
    }
    for (index, ty) in types.iter().enumerate() {
        if index < gene.arguments.len() && rng.gen::<f64>() <= pm {
            gene.arguments[index] = generator.get_random_argument(ty, function, index, rng);
        }
    }

    if gene.timestamp.is_absent() || rng.gen::<f64>() <= pm {
        gene.timestamp = Field::from(generator.get_random_timestamp(function));
    }
    if gene.blocknumber.is_absent() || rng.gen::<f64>() <= pm {
        gene.blocknumber = Field::from(generator.get_random_blocknumber(function));
    }
    if gene.balance.is_absent() || rng.gen::<f64>() <= pm {
        gene.balance = Field::from(generator.get_random_balance(function));
    }

    match gene.call_return.as_mut() {
        None => {
            gene.call_return = Some(first_touch(generator.get_random_callresult_and_address(function, rng)));
        }
        Some(values) => {
            for (address, value) in values.iter_mut() {
                if rng.gen::<f64>() <= pm {
                    if let Some(result) = generator.get_random_callresult(function, *address) {
                        *value = result;
                    }
                }
            }
        }
    }
    match gene.extcodesize.as_mut() {
        None => {
            gene.extcodesize = Some(first_touch(generator.get_random_extcodesize_and_address(function, rng)));
        }
        Some(values) => {
            for (address, value) in values.iter_mut() {
                if rng.gen::<f64>() <= pm {
                    if let Some(size) = generator.get_random_extcodesize(function, *address) {
                        *value = size;
                    }
                }
            }
        }
    }
    match gene.returndatasize.as_mut() {
        None => {
            gene.returndatasize = Some(first_touch(generator.get_random_returndatasize_and_address(function, rng)));
        }
        Some(values) => {
            for (address, value) in values.iter_mut() {
                if rng.gen::<f64>() <= pm {
                    if let Some(size) = generator.get_random_returndatasize(function, *address) {
                        *value = size;
                    }
                }
            }
        }
    }
}

fn first_touch(entry: Option<(Address, U256)>) -> AddressValues {
    let mut values = AddressValues::new();
    if let Some((address, value)) = entry {
        values.insert(address, value);
    }
    values
}
