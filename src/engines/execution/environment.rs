use super::cfg::ControlFlowGraph;
use super::expr::BranchPredicate;
use crate::engines::detection::Finding;
use crate::engines::generation::generator_set::GeneratorId;
use crate::engines::metrics::report::GenerationRecord;
use crate::types::{Accounts, FunctionId, Gene, Interface};
use alloy_primitives::{Address, U256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Instant;

/// Storage slots a function (or a single transaction) reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadWriteSet {
    pub read: BTreeSet<U256>,
    pub write: BTreeSet<U256>,
}

/// Per-function storage footprint accumulated over every replayed trace.
#[derive(Debug, Clone, Default)]
pub struct DataDependencies {
    functions: HashMap<FunctionId, ReadWriteSet>,
}

impl DataDependencies {
    pub fn record_read(&mut self, function: FunctionId, slot: U256) {
        self.functions.entry(function).or_default().read.insert(slot);
    }

    pub fn record_write(&mut self, function: FunctionId, slot: U256) {
        self.functions.entry(function).or_default().write.insert(slot);
    }

    pub fn get(&self, function: &FunctionId) -> Option<&ReadWriteSet> {
        self.functions.get(function)
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Union of the slots read and written by the functions of a chromosome.
    pub fn reads_and_writes(&self, chromosome: &[Gene]) -> (BTreeSet<U256>, BTreeSet<U256>) {
        let mut reads = BTreeSet::new();
        let mut writes = BTreeSet::new();
        for gene in chromosome {
            if let Some(set) = self.functions.get(&gene.function) {
                reads.extend(set.read.iter().copied());
                writes.extend(set.write.iter().copied());
            }
        }
        (reads, writes)
    }
}

/// Outcome of each JUMPI per jump destination: `true` when that destination
/// was taken.
pub type JumpTable = BTreeMap<usize, BTreeMap<usize, bool>>;

/// Last individual observed taking one side of a branch.
#[derive(Debug, Clone)]
pub struct BranchVisit {
    pub individual_hash: String,
    pub chromosome: Vec<Gene>,
    pub generator: GeneratorId,
    pub transaction_index: usize,
    /// Path condition up to and including this branch, when it was tainted.
    pub path: Option<Vec<BranchPredicate>>,
}

/// Session-wide fuzzing state shared by the engine, the trace analyzer and
/// the reporting code.
#[derive(Debug)]
pub struct FuzzingEnvironment {
    pub contract_name: String,
    pub seed: u64,
    pub execution_begin: Instant,
    pub accounts: Accounts,
    /// Merged interface of every contract under test.
    pub interface: Interface,
    pub cfg: ControlFlowGraph,
    pub other_contracts: HashSet<Address>,
    pub overall_pcs_with_children: usize,

    pub nr_of_transactions: usize,
    pub unique_individuals: HashSet<String>,
    pub code_coverage: BTreeSet<usize>,
    pub children_code_coverage: HashMap<Address, BTreeSet<usize>>,
    pub previous_code_coverage_length: usize,
    pub visited_branches: BTreeMap<usize, BTreeMap<bool, BranchVisit>>,
    pub individual_branches: HashMap<String, JumpTable>,
    pub data_dependencies: DataDependencies,
    pub transaction_dependencies: HashMap<String, BTreeMap<usize, ReadWriteSet>>,

    pub memoized_fitness: HashMap<String, f64>,
    pub memoized_symbolic_execution: HashSet<BranchPredicate>,

    pub cross_bad_hashes: HashSet<String>,
    pub cross_transactions: usize,

    pub errors: BTreeMap<u32, Vec<Finding>>,
    pub generations: Vec<GenerationRecord>,
}

impl FuzzingEnvironment {
    pub fn new(
        contract_name: &str,
        seed: u64,
        accounts: Accounts,
        interface: Interface,
        cfg: ControlFlowGraph,
    ) -> Self {
        let overall_pcs_with_children = cfg.instruction_count();
        Self {
            contract_name: contract_name.to_string(),
            seed,
            execution_begin: Instant::now(),
            accounts,
            interface,
            cfg,
            other_contracts: HashSet::new(),
            overall_pcs_with_children,
            nr_of_transactions: 0,
            unique_individuals: HashSet::new(),
            code_coverage: BTreeSet::new(),
            children_code_coverage: HashMap::new(),
            previous_code_coverage_length: 0,
            visited_branches: BTreeMap::new(),
            individual_branches: HashMap::new(),
            data_dependencies: DataDependencies::default(),
            transaction_dependencies: HashMap::new(),
            memoized_fitness: HashMap::new(),
            memoized_symbolic_execution: HashSet::new(),
            cross_bad_hashes: HashSet::new(),
            cross_transactions: 0,
            errors: BTreeMap::new(),
            generations: Vec::new(),
        }
    }

    /// Register an auxiliary contract whose coverage is tracked separately.
    pub fn add_other_contract(&mut self, address: Address, runtime_code: &[u8]) {
        if self.other_contracts.insert(address) {
            self.overall_pcs_with_children += ControlFlowGraph::from_bytecode(runtime_code).instruction_count();
        }
    }

    /// Caches that only describe the generation being executed.
    pub fn clear_generation_caches(&mut self) {
        self.memoized_fitness.clear();
        self.individual_branches.clear();
    }

    /// Per-individual state that only the discarded population could use.
    /// `unique_individuals` is kept: it backs the session-wide unique count.
    pub fn clear_population_state(&mut self) {
        self.transaction_dependencies.clear();
        self.cross_bad_hashes.clear();
        self.clear_generation_caches();
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.execution_begin.elapsed().as_secs_f64()
    }

    /// Record a finding once per (SWC id, program counter, kind).
    pub fn add_finding(&mut self, finding: Finding) -> bool {
        let entries = self.errors.entry(finding.swc_id).or_default();
        if entries
            .iter()
            .any(|f| f.program_counter == finding.program_counter && f.kind == finding.kind)
        {
            return false;
        }
        entries.push(finding);
        true
    }
}
