//! Cross-contract replay of reverted transaction sequences.
//!
//! The trace analyzer pushes individuals whose transaction reverted into a
//! bounded channel. At breeding time the engine drains it and asks a
//! [`CrossContractPlanner`] which calls, possibly into auxiliary contracts,
//! should run first so the failing call sees the storage it depends on.

use super::generator_set::{GeneratorId, GeneratorSet};
use super::individual::Individual;
use crate::engines::execution::environment::{DataDependencies, ReadWriteSet};
use crate::types::{FunctionId, Gene};
use alloy_primitives::U256;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::mpsc::{self, Receiver, SyncSender};

/// An individual whose transaction at `transaction_index` reverted.
#[derive(Debug, Clone)]
pub struct BadIndividual {
    pub individual: Individual,
    pub transaction_index: usize,
}

/// Bounded hand-off queue between the trace analyzer and the engine.
pub fn cross_channel(capacity: usize) -> (SyncSender<BadIndividual>, Receiver<BadIndividual>) {
    mpsc::sync_channel(capacity)
}

/// A call to prepend, named the way contracts and signatures are known to
/// the dependency collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplyCall {
    pub contract: String,
    pub function: String,
}

/// What a planner may look at for one failing sequence.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub failing: &'a BadIndividual,
    pub generators: &'a GeneratorSet,
    pub data_dependencies: &'a DataDependencies,
    /// Per individual hash, per transaction storage footprint.
    pub transaction_dependencies: &'a HashMap<String, BTreeMap<usize, ReadWriteSet>>,
}

impl PlanRequest<'_> {
    pub fn failing_gene(&self) -> Option<&Gene> {
        self.failing
            .individual
            .chromosome()
            .get(self.failing.transaction_index)
    }

    /// Slots read by the failing transaction, falling back to everything its
    /// function has been seen reading.
    pub fn failing_reads(&self) -> BTreeSet<U256> {
        let observed = self
            .transaction_dependencies
            .get(self.failing.individual.hash())
            .and_then(|per_tx| per_tx.get(&self.failing.transaction_index))
            .map(|set| set.read.clone())
            .unwrap_or_default();
        if !observed.is_empty() {
            return observed;
        }
        self.failing_gene()
            .and_then(|gene| self.data_dependencies.get(&gene.function))
            .map(|set| set.read.clone())
            .unwrap_or_default()
    }
}

/// Decides which calls should precede a failing transaction.
pub trait CrossContractPlanner {
    fn plan(&self, request: &PlanRequest<'_>) -> Vec<SupplyCall>;
}

/// Plans writers of the slots the failing transaction reads.
#[derive(Debug, Clone)]
pub struct DataDependencyPlanner {
    max_supply_calls: usize,
}

impl DataDependencyPlanner {
    pub fn new(max_supply_calls: usize) -> Self {
        Self { max_supply_calls }
    }
}

impl Default for DataDependencyPlanner {
    fn default() -> Self {
        Self::new(3)
    }
}

impl CrossContractPlanner for DataDependencyPlanner {
    fn plan(&self, request: &PlanRequest<'_>) -> Vec<SupplyCall> {
        let Some(failing_function) = request.failing_gene().map(|gene| gene.function) else {
            return Vec::new();
        };
        let reads = request.failing_reads();
        if reads.is_empty() {
            return Vec::new();
        }

        let mut calls = Vec::new();
        for id in request.generators.ids() {
            let generator = request.generators.get(id);
            for (signature, function) in generator.interface_mapper() {
                if *function == failing_function {
                    continue;
                }
                let writes_read_slot = request
                    .data_dependencies
                    .get(function)
                    .is_some_and(|set| !set.write.is_disjoint(&reads));
                if writes_read_slot {
                    calls.push(SupplyCall {
                        contract: generator.name().to_string(),
                        function: bare_name(signature).to_string(),
                    });
                }
            }
        }
        calls.truncate(self.max_supply_calls);
        calls
    }
}

fn bare_name(signature: &str) -> &str {
    signature.split('(').next().unwrap_or(signature)
}

/// Build a chromosome that runs the planned supply calls before replaying
/// the failing prefix of `bad`.
///
/// Deployments come first: the failing sequence's own constructors, then the
/// auxiliary ones. When the planner finds nothing, a single random call of
/// the main contract stands in for the supply calls. The replayed prefix is
/// always kept whole; supply calls that do not fit the length budget are
/// dropped from the front, and with no room left the failing sequence is
/// returned as is.
pub fn generate_individual_by_cross<P, R>(
    generators: &mut GeneratorSet,
    planner: &P,
    bad: &BadIndividual,
    data_dependencies: &DataDependencies,
    transaction_dependencies: &HashMap<String, BTreeMap<usize, ReadWriteSet>>,
    max_individual_length: usize,
    rng: &mut R,
) -> Individual
where
    P: CrossContractPlanner + ?Sized,
    R: Rng + ?Sized,
{
    let failing = bad.individual.chromosome();
    let constructors = failing
        .iter()
        .take_while(|gene| gene.function == FunctionId::Constructor)
        .count();
    let replayed: Vec<Gene> = failing
        .iter()
        .take(bad.transaction_index + 1)
        .skip(constructors)
        .cloned()
        .collect();

    let budget = max_individual_length.saturating_sub(constructors + replayed.len());
    if budget == 0 {
        return Individual::from_cross(bad.individual.generator(), failing.to_vec());
    }

    let mut deployments: Vec<Gene> = Vec::new();
    let auxiliaries: Vec<GeneratorId> = generators.auxiliary_ids().collect();
    for id in &auxiliaries {
        deployments.extend(generators.get_mut(*id).generate_constructor(rng));
    }
    deployments.truncate(budget);

    let plan = planner.plan(&PlanRequest {
        failing: bad,
        generators,
        data_dependencies,
        transaction_dependencies,
    });

    let mut supplied = Vec::new();
    for call in &plan {
        let Some(id) = generators.by_name(&call.contract) else {
            log::debug!("Unknown contract {} in cross-contract plan", call.contract);
            continue;
        };
        let generator = generators.get_mut(id);
        match generator.function_by_name(&call.function) {
            Some((function, types)) => supplied.extend(generator.generate_individual(function, &types, rng)),
            None => log::debug!("Unknown function {}.{} in cross-contract plan", call.contract, call.function),
        }
    }
    if supplied.is_empty() {
        supplied = generators
            .main_mut()
            .generate_random_individual_without_constructor(None, rng);
    }
    let room = budget - deployments.len();
    if supplied.len() > room {
        supplied.drain(..supplied.len() - room);
    }

    let mut assembled: Vec<Gene> = failing[..constructors].to_vec();
    assembled.extend(deployments);
    assembled.extend(supplied);
    assembled.extend(replayed);

    Individual::from_cross(bad.individual.generator(), assembled)
}
