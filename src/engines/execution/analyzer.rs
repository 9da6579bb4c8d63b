use super::environment::{BranchVisit, FuzzingEnvironment, JumpTable, ReadWriteSet};
use super::evm::{EvmEngine, ExecutionResult, Instruction, Rollback};
use super::expr::BranchPredicate;
use super::opcode::Opcode;
use super::solver::ConstraintSolver;
use super::symbolic::{retract_value, symbolic_execution};
use super::symvar::{CallKind, SymbolicVariable};
use super::taint::SymbolicTaintAnalyzer;
use crate::config::FuzzingConfig;
use crate::engines::detection::{DetectionContext, DetectorExecutor};
use crate::engines::generation::cross_contract::BadIndividual;
use crate::engines::generation::generator_set::{GeneratorId, GeneratorSet};
use crate::engines::generation::individual::Individual;
use crate::engines::metrics::report::{FuzzingReport, GenerationRecord};
use crate::types::{word_to_address, word_to_usize, AbiType, FunctionId, Gene, TestCase, TxTarget};
use alloy_primitives::{Address, U256};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc::{SyncSender, TrySendError};

/// Preimages followed when resolving a hashed storage slot.
const MAX_PREIMAGE_DEPTH: usize = 16;

#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub max_symbolic_execution: usize,
    pub constraint_solving: bool,
    pub cross_contract: bool,
    pub cross_probability_percent: u32,
    pub account_balance: U256,
}

impl From<&FuzzingConfig> for AnalyzerSettings {
    fn from(config: &FuzzingConfig) -> Self {
        Self {
            max_symbolic_execution: config.max_symbolic_execution,
            constraint_solving: config.constraint_solving,
            cross_contract: config.cross_contract,
            cross_probability_percent: config.cross_probability_percent,
            account_balance: config.account_balance(),
        }
    }
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self::from(&FuzzingConfig::default())
    }
}

/// What the engine has to do after a generation was analysed.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub record: GenerationRecord,
    /// Coverage stalled for too long; rebuild the population from scratch.
    pub reset_population: bool,
}

/// Replays individuals on the EVM and turns their traces into coverage,
/// branch, data dependency and vulnerability feedback.
pub struct ExecutionTraceAnalyzer<E: EvmEngine, S: ConstraintSolver> {
    evm: E,
    solver: S,
    taint: SymbolicTaintAnalyzer,
    detectors: DetectorExecutor,
    cross_sender: Option<SyncSender<BadIndividual>>,
    settings: AnalyzerSettings,
    symbolic_execution_count: usize,
    rng: StdRng,
}

impl<E: EvmEngine, S: ConstraintSolver> ExecutionTraceAnalyzer<E, S> {
    pub fn new(evm: E, solver: S, settings: AnalyzerSettings, seed: u64) -> Self {
        Self {
            evm,
            solver,
            taint: SymbolicTaintAnalyzer::new(),
            detectors: DetectorExecutor::new(),
            cross_sender: None,
            settings,
            symbolic_execution_count: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Hand reverted individuals to the cross-contract generator.
    pub fn with_cross_channel(mut self, sender: SyncSender<BadIndividual>) -> Self {
        self.cross_sender = Some(sender);
        self
    }

    pub fn with_detectors(mut self, detectors: DetectorExecutor) -> Self {
        self.detectors = detectors;
        self
    }

    pub fn evm(&self) -> &E {
        &self.evm
    }

    pub fn evm_mut(&mut self) -> &mut E {
        &mut self.evm
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    /// Execute every distinct individual of a generation once.
    pub fn execute(
        &mut self,
        env: &mut FuzzingEnvironment,
        generators: &mut GeneratorSet,
        individuals: &[Individual],
    ) {
        env.clear_generation_caches();
        let mut executed: HashSet<&str> = HashSet::new();
        for individual in individuals {
            if !executed.insert(individual.hash()) {
                continue;
            }
            self.execution_function(env, generators, individual);
        }
    }

    /// Execute one generation, log it and decide whether the search stalled.
    pub fn register_step(
        &mut self,
        generation: usize,
        env: &mut FuzzingEnvironment,
        generators: &mut GeneratorSet,
        individuals: &[Individual],
    ) -> StepOutcome {
        self.execute(env, generators, individuals);

        let record = GenerationRecord::capture(generation, env);
        log::info!(
            "Generation number {} \t Code coverage: {:.2}% ({}/{}) \t Branch coverage: {:.2}% \t Transactions: {} ({} unique, {} from cross) \t Time: {:.2}",
            generation,
            record.code_coverage,
            env.code_coverage.len(),
            env.cfg.instruction_count(),
            record.branch_coverage,
            record.total_transactions,
            record.unique_transactions,
            record.cross_transactions,
            record.time
        );
        env.generations.push(record.clone());

        let mut reset_population = false;
        if env.code_coverage.len() == env.previous_code_coverage_length {
            self.run_symbolic_execution(env, generators);
            if self.symbolic_execution_count == self.settings.max_symbolic_execution {
                log::debug!("Resetting population...");
                reset_population = true;
                self.symbolic_execution_count = 0;
            }
            self.symbolic_execution_count += 1;
        } else {
            self.symbolic_execution_count = 0;
        }
        env.previous_code_coverage_length = env.code_coverage.len();

        StepOutcome {
            record,
            reset_population,
        }
    }

    fn run_symbolic_execution(&mut self, env: &mut FuzzingEnvironment, generators: &mut GeneratorSet) {
        if !self.settings.constraint_solving {
            return;
        }
        let solved = symbolic_execution(
            env,
            generators,
            &mut self.evm,
            &mut self.solver,
            self.settings.account_balance,
        );
        log::debug!("Symbolic execution solved {} branches", solved);
    }

    /// Build the results document and log the session summary.
    pub fn finalize(&self, env: &FuzzingEnvironment, address_under_test: Option<Address>) -> FuzzingReport {
        let report = FuzzingReport::from_environment(env, address_under_test);
        report.log_summary();
        if log::log_enabled!(log::Level::Debug) {
            let unexecuted: Vec<String> = env
                .cfg
                .pcs()
                .filter(|pc| !env.code_coverage.contains(pc))
                .map(|pc| format!("{:#x}", pc))
                .collect();
            log::debug!("Unexecuted instructions: {}", unexecuted.join(", "));
        }
        report
    }

    fn execution_function(
        &mut self,
        env: &mut FuzzingEnvironment,
        generators: &mut GeneratorSet,
        individual: &Individual,
    ) {
        let Self {
            evm,
            taint,
            detectors,
            cross_sender,
            settings,
            rng,
            ..
        } = self;
        let mut evm = Rollback::new(evm);

        env.unique_individuals.insert(individual.hash().to_string());
        if individual.is_from_cross() {
            env.cross_transactions += individual.len();
        }
        detectors.initialize_detectors();

        let mut branches = JumpTable::new();
        let mut deployments: Vec<(Address, Option<GeneratorId>)> = Vec::new();
        let mut main_address = generators.main().contract_address();
        let can_send_ether = env.cfg.can_send_ether();

        for (transaction_index, decoded) in individual.solution().iter().enumerate() {
            let Some(gene) = individual.chromosome().get(transaction_index) else {
                break;
            };
            let test = match decoded {
                Ok(test) => test,
                Err(e) => {
                    log::warn!(
                        "({} - {}) Skipping malformed transaction: {}",
                        individual.hash(),
                        transaction_index,
                        e
                    );
                    continue;
                }
            };

            let owner = generators.owner_of(&gene.function, individual.generator());
            let Some(test) = resolve_target(test, owner, generators, &deployments) else {
                log::debug!(
                    "({} - {}) No contract to send the transaction to",
                    individual.hash(),
                    transaction_index
                );
                continue;
            };

            let result = match evm.deploy_transaction(&test) {
                Ok(result) => result,
                Err(e) => {
                    log::error!(
                        "Validation error in {} : {} (ignoring for now)",
                        individual.hash(),
                        e
                    );
                    continue;
                }
            };

            let deployed_by = deployer(&test, generators);
            let targets_main = match (&test.transaction.to, deployed_by) {
                (TxTarget::Create, by) => by == Some(GeneratorSet::MAIN),
                (TxTarget::Call(to), _) => main_address.map_or(true, |main| main == *to),
                (TxTarget::Unresolved, _) => false,
            };
            if !result.is_error && test.transaction.to == TxTarget::Create {
                log::debug!(
                    "({} - {}) Contract deployed at {}",
                    individual.hash(),
                    transaction_index,
                    result.storage_address
                );
                deployments.push((result.storage_address, deployed_by));
                if deployed_by == Some(GeneratorSet::MAIN) {
                    main_address = Some(result.storage_address);
                }
            }

            for child in &result.children {
                if !env.other_contracts.contains(&child.to) {
                    continue;
                }
                env.children_code_coverage
                    .entry(child.to)
                    .or_default()
                    .extend(child.trace.iter().map(|instruction| instruction.pc));
            }

            env.nr_of_transactions += 1;

            if targets_main {
                let mut replay = TransactionReplay {
                    env: &mut *env,
                    generators: &mut *generators,
                    taint: &mut *taint,
                    detectors: &mut *detectors,
                    cross_sender: cross_sender.as_ref(),
                    settings: &*settings,
                    rng: &mut *rng,
                    individual,
                    gene,
                    test: &test,
                    transaction_index,
                    can_send_ether,
                    branches: &mut branches,
                };
                replay.analyze(&result);
            }

            taint.clear_callstack();
        }

        env.individual_branches
            .insert(individual.hash().to_string(), branches);
        taint.clear_storage();
    }
}

/// Per-transaction state while walking one trace.
struct TransactionReplay<'a> {
    env: &'a mut FuzzingEnvironment,
    generators: &'a mut GeneratorSet,
    taint: &'a mut SymbolicTaintAnalyzer,
    detectors: &'a mut DetectorExecutor,
    cross_sender: Option<&'a SyncSender<BadIndividual>>,
    settings: &'a AnalyzerSettings,
    rng: &'a mut StdRng,
    individual: &'a Individual,
    gene: &'a Gene,
    test: &'a TestCase,
    transaction_index: usize,
    can_send_ether: bool,
    branches: &'a mut JumpTable,
}

impl TransactionReplay<'_> {
    fn analyze(&mut self, result: &ExecutionResult) {
        let trace = &result.trace;
        let mut previous: Option<&Instruction> = None;
        let mut path: Vec<BranchPredicate> = Vec::new();
        let mut previous_branch_expression: Option<BranchPredicate> = None;
        let mut previous_call_address: Option<Address> = None;
        let mut preimages: HashMap<U256, Vec<u8>> = HashMap::new();
        let mut array_size_indexes: BTreeMap<usize, usize> = BTreeMap::new();
        let mut cross_checked = false;

        for (i, instruction) in trace.iter().enumerate() {
            let next = trace.get(i + 1);

            self.taint.propagate_taint(instruction);
            self.run_detectors(previous, instruction, &path);

            if self.gene.function == FunctionId::Constructor {
                continue;
            }

            self.env.code_coverage.insert(instruction.pc);

            if let Some(previous) = previous {
                track_preimage(&mut preimages, previous, instruction);
            }

            match instruction.op {
                Opcode::JumpI => {
                    previous_branch_expression = self.record_branch(instruction, &mut path);
                }
                Opcode::SLoad | Opcode::SStore => {
                    if let Some(key) = instruction.stack_top(0) {
                        let slot = resolve_slot(&preimages, key);
                        self.record_storage_access(instruction.op == Opcode::SStore, slot);
                    }
                }
                op if op.is_failure() => {
                    if !cross_checked && self.enqueue_cross() {
                        cross_checked = true;
                    }
                    if let Some(expression) = &previous_branch_expression {
                        let variables = expression.variables();
                        if variables.len() == 1 {
                            if let Some(variable) = variables.iter().next() {
                                retract_value(
                                    self.generators,
                                    self.individual.generator(),
                                    self.individual.chromosome(),
                                    self.transaction_index,
                                    &self.test.transaction,
                                    variable,
                                );
                            }
                        }
                    }
                }
                _ => {
                    if let Some(variable) = self.taint_source(
                        instruction,
                        next,
                        &mut previous_call_address,
                        &mut array_size_indexes,
                    ) {
                        self.taint.introduce_taint(variable, instruction);
                    }
                }
            }

            previous = Some(instruction);
        }
    }

    fn run_detectors(
        &mut self,
        previous: Option<&Instruction>,
        instruction: &Instruction,
        path: &[BranchPredicate],
    ) {
        let output = {
            let ctx = DetectionContext {
                previous_instruction: previous,
                current_instruction: instruction,
                tainted_record: Some(self.taint.check_taint()),
                previous_branch: path,
                individual: self.individual,
                transaction_index: self.transaction_index,
                interface: &self.env.interface,
                accounts: &self.env.accounts,
                can_send_ether: self.can_send_ether,
            };
            self.detectors.run_detectors(&ctx, self.env.elapsed_secs())
        };

        for finding in output.findings {
            let (detector, swc_id, pc, tx) = (
                finding.detector.clone(),
                finding.swc_id,
                finding.program_counter,
                finding.transaction_index,
            );
            if self.env.add_finding(finding) {
                log::warn!(
                    "!!! {} (SWC-{}) detected at pc {:#x} in transaction {} of {} !!!",
                    detector,
                    swc_id,
                    pc,
                    tx,
                    self.individual.hash()
                );
            }
        }
        for variable in output.taint_requests {
            self.taint.taint_stack_slot(1, variable);
        }
    }

    /// Update the jump tables and extend the path condition when the branch
    /// condition is tainted. Returns the new path predicate.
    fn record_branch(
        &mut self,
        instruction: &Instruction,
        path: &mut Vec<BranchPredicate>,
    ) -> Option<BranchPredicate> {
        let (Some(destination), Some(condition)) = (instruction.stack_top(0), instruction.stack_top(1))
        else {
            return None;
        };
        let destination = word_to_usize(destination);
        let taken = !condition.is_zero();

        let outcomes = self.branches.entry(instruction.pc).or_default();
        outcomes.insert(destination, taken);
        outcomes.insert(instruction.pc + 1, !taken);

        let predicate = self
            .taint
            .check_taint()
            .stack_top(1)
            .map(|expr| BranchPredicate::new(expr.clone(), taken));
        if let Some(predicate) = &predicate {
            path.push(predicate.clone());
        }

        self.env.visited_branches.entry(instruction.pc).or_default().insert(
            taken,
            BranchVisit {
                individual_hash: self.individual.hash().to_string(),
                chromosome: self.individual.chromosome().to_vec(),
                generator: self.individual.generator(),
                transaction_index: self.transaction_index,
                path: predicate.as_ref().map(|_| path.clone()),
            },
        );
        predicate
    }

    fn record_storage_access(&mut self, write: bool, slot: U256) {
        let function = self.gene.function;
        let per_transaction = self
            .env
            .transaction_dependencies
            .entry(self.individual.hash().to_string())
            .or_default()
            .entry(self.transaction_index)
            .or_insert_with(ReadWriteSet::default);
        if write {
            per_transaction.write.insert(slot);
            self.env.data_dependencies.record_write(function, slot);
        } else {
            per_transaction.read.insert(slot);
            self.env.data_dependencies.record_read(function, slot);
        }
    }

    /// Queue the individual for cross-contract replay. True once queued.
    fn enqueue_cross(&mut self) -> bool {
        let Some(sender) = self.cross_sender else {
            return false;
        };
        if !self.settings.cross_contract
            || self.rng.gen_range(0..=100u32) > self.settings.cross_probability_percent
        {
            return false;
        }
        if !self.env.cross_bad_hashes.insert(self.individual.hash().to_string()) {
            return false;
        }
        let request = BadIndividual {
            individual: self.individual.clone(),
            transaction_index: self.transaction_index,
        };
        match sender.try_send(request) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("Cross-contract queue full, dropping {}", self.individual.hash());
                self.env.cross_bad_hashes.remove(self.individual.hash());
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Symbolic variable introduced by an environment-dependent opcode.
    fn taint_source(
        &self,
        instruction: &Instruction,
        next: Option<&Instruction>,
        previous_call_address: &mut Option<Address>,
        array_size_indexes: &mut BTreeMap<usize, usize>,
    ) -> Option<SymbolicVariable> {
        let tx = self.transaction_index;
        let produced = || next.and_then(|n| n.stack_top(0));

        Some(match instruction.op {
            Opcode::Balance => SymbolicVariable::Balance { tx },
            Opcode::Call | Opcode::StaticCall => {
                let address = word_to_address(instruction.stack_top(1)?);
                *previous_call_address = Some(address);
                SymbolicVariable::Call {
                    kind: if instruction.op == Opcode::Call {
                        CallKind::Call
                    } else {
                        CallKind::StaticCall
                    },
                    tx,
                    address,
                    result: produced(),
                    pc: instruction.pc,
                }
            }
            Opcode::Caller => SymbolicVariable::Caller { tx },
            Opcode::CallDataLoad => {
                return self.calldataload_source(instruction, produced(), array_size_indexes)
            }
            Opcode::CallDataCopy => {
                let offset = word_to_usize(instruction.stack_top(1)?);
                let start = offset.checked_sub(4)? / 32;
                let param = *array_size_indexes.get(&start.checked_sub(1)?)?;
                SymbolicVariable::CallDataCopy { tx, param }
            }
            Opcode::CallDataSize => SymbolicVariable::CallDataSize { tx },
            Opcode::CallValue => SymbolicVariable::CallValue { tx },
            Opcode::Gas => SymbolicVariable::Gas { tx },
            Opcode::BlockHash => SymbolicVariable::BlockHash { tx },
            Opcode::Coinbase => SymbolicVariable::Coinbase { tx },
            Opcode::Timestamp => SymbolicVariable::Timestamp { tx },
            Opcode::Number => SymbolicVariable::BlockNumber { tx },
            Opcode::Difficulty => SymbolicVariable::Difficulty { tx },
            Opcode::GasLimit => SymbolicVariable::GasLimit { tx },
            Opcode::ExtCodeSize => SymbolicVariable::ExtCodeSize {
                tx,
                address: word_to_address(instruction.stack_top(0)?),
                result: produced(),
            },
            Opcode::ReturnDataSize => SymbolicVariable::ReturnDataSize {
                tx,
                address: (*previous_call_address)?,
                size: produced().unwrap_or_default(),
            },
            _ => return None,
        })
    }

    fn calldataload_source(
        &self,
        instruction: &Instruction,
        loaded: Option<U256>,
        array_size_indexes: &mut BTreeMap<usize, usize>,
    ) -> Option<SymbolicVariable> {
        let tx = self.transaction_index;
        let offset = word_to_usize(instruction.stack_top(0)?);
        if offset == 0 {
            return None;
        }
        let Some(types) = self.env.interface.get(&self.gene.function) else {
            log::debug!("No interface entry for {}", self.gene.function);
            return None;
        };
        let index = offset.saturating_sub(4) / 32;

        match types.get(index) {
            Some(ty) if ty.is_array() => {
                if let Some(head) = loaded {
                    array_size_indexes.insert(word_to_usize(head) / 32, index);
                }
                None
            }
            Some(AbiType::Bytes) | Some(AbiType::FixedBytes(_)) => None,
            Some(_) => Some(SymbolicVariable::CallDataLoad { tx, param: index }),
            None => array_size_indexes
                .get(&index)
                .map(|param| SymbolicVariable::InputArraySize { tx, param: *param }),
        }
    }
}

/// Point transactions without a destination at the contract the sequence
/// deployed last, preferring a deployment of the function's own contract.
fn resolve_target(
    test: &TestCase,
    owner: GeneratorId,
    generators: &GeneratorSet,
    deployments: &[(Address, Option<GeneratorId>)],
) -> Option<TestCase> {
    if test.transaction.to != TxTarget::Unresolved {
        return Some(test.clone());
    }
    let address = deployments
        .iter()
        .rev()
        .find(|(_, deployer)| *deployer == Some(owner))
        .or_else(|| deployments.last())
        .map(|(address, _)| *address)
        .or_else(|| generators.get(owner).contract_address())?;

    let mut resolved = test.clone();
    resolved.transaction.to = TxTarget::Call(address);
    Some(resolved)
}

/// Generator whose init code a creation transaction carries.
fn deployer(test: &TestCase, generators: &GeneratorSet) -> Option<GeneratorId> {
    if test.transaction.to != TxTarget::Create {
        return None;
    }
    generators.ids().find(|id| {
        let bytecode = generators.get(*id).bytecode();
        !bytecode.is_empty() && test.transaction.data.starts_with(bytecode)
    })
}

/// Remember which memory a SHA3 hashed, following the result through one
/// ADD so array element slots resolve to their base.
fn track_preimage(preimages: &mut HashMap<U256, Vec<u8>>, previous: &Instruction, current: &Instruction) {
    let Some(result) = current.stack_top(0) else {
        return;
    };
    match previous.op {
        Opcode::Sha3 => {
            if let (Some(offset), Some(size)) = (previous.stack_top(0), previous.stack_top(1)) {
                let preimage = previous.memory_slice(word_to_usize(offset), word_to_usize(size));
                preimages.insert(result, preimage);
            }
        }
        Opcode::Add => {
            for n in 0..2 {
                let inherited = previous
                    .stack_top(n)
                    .and_then(|operand| preimages.get(&operand).cloned());
                if let Some(preimage) = inherited {
                    preimages.insert(result, preimage);
                }
            }
        }
        _ => {}
    }
}

/// Storage slot a hashed key was derived from: the mapping slot for
/// `keccak(key . slot)`, the array slot for `keccak(slot)`.
fn resolve_slot(preimages: &HashMap<U256, Vec<u8>>, key: U256) -> U256 {
    let mut slot = key;
    for _ in 0..MAX_PREIMAGE_DEPTH {
        let Some(preimage) = preimages.get(&slot) else {
            break;
        };
        let base = if preimage.len() == 64 {
            &preimage[32..64]
        } else {
            &preimage[..]
        };
        match U256::try_from_be_slice(base) {
            Some(next) if next != slot => slot = next,
            _ => break,
        }
    }
    slot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha3(offset: u64, memory: Vec<u8>) -> Instruction {
        let size = memory.len() as u64 - offset;
        Instruction::new(10, Opcode::Sha3, vec![U256::from(size), U256::from(offset)]).with_memory(memory)
    }

    #[test]
    fn mapping_slots_resolve_to_their_declaration() {
        let mut preimages = HashMap::new();
        let mut memory = vec![0u8; 64];
        memory[31] = 0xaa;
        memory[63] = 3;
        let hashed = U256::from(0xdead_beefu64);
        let after = Instruction::new(11, Opcode::SLoad, vec![hashed]);

        track_preimage(&mut preimages, &sha3(0, memory), &after);
        assert_eq!(resolve_slot(&preimages, hashed), U256::from(3u8));
        assert_eq!(resolve_slot(&preimages, U256::from(7u8)), U256::from(7u8));
    }

    #[test]
    fn array_elements_inherit_the_base_through_add() {
        let mut preimages = HashMap::new();
        let mut memory = vec![0u8; 32];
        memory[31] = 5;
        let base = U256::from(0x1000u64);
        let element = U256::from(0x1002u64);

        let add = Instruction::new(12, Opcode::Add, vec![U256::from(2u8), base]);
        track_preimage(
            &mut preimages,
            &sha3(0, memory),
            &Instruction::new(11, Opcode::Add, vec![base]),
        );
        track_preimage(
            &mut preimages,
            &add,
            &Instruction::new(13, Opcode::SStore, vec![U256::ZERO, element]),
        );
        assert_eq!(resolve_slot(&preimages, element), U256::from(5u8));
    }

    #[test]
    fn self_referencing_preimages_terminate() {
        let mut preimages = HashMap::new();
        let key = U256::from(9u8);
        preimages.insert(key, key.to_be_bytes::<32>().to_vec());
        assert_eq!(resolve_slot(&preimages, key), key);
    }
}
