#![allow(dead_code)]

use alloy_primitives::{Address, U256};
use crossfuzz::engines::execution::evm::{EvmEngine, ExecutionResult, Instruction};
use crossfuzz::engines::execution::expr::BranchPredicate;
use crossfuzz::engines::execution::opcode::Opcode;
use crossfuzz::engines::execution::solver::{ConstraintSolver, Model, Objective, SolverOutcome};
use crossfuzz::engines::execution::symvar::SymbolicVariable;
use crossfuzz::engines::generation::{ContractSpec, Generator, GeneratorSet, GeneratorSettings};
use crossfuzz::engines::generation::{FuzzingTarget, Individual};
use crossfuzz::types::{Accounts, AddressValues, Field, FunctionId, Gene, Target, TestCase, TxTarget, Value};
use crossfuzz::{FuzzerError, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

pub type Storage = BTreeMap<U256, U256>;
type Handler = Box<dyn Fn(&TestCase, &mut Storage) -> Vec<Instruction>>;

pub const CONTRACT: Address = Address::repeat_byte(0xc0);
pub const OWNER: Address = Address::repeat_byte(0x01);
pub const ATTACKER: Address = Address::repeat_byte(0xaa);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn word(v: u64) -> U256 {
    U256::from(v)
}

pub fn op(pc: usize, op: Opcode, stack: &[U256]) -> Instruction {
    Instruction::new(pc, op, stack.to_vec())
}

/// ABI word `index` of the call data, after the selector.
pub fn argument(test: &TestCase, index: usize) -> U256 {
    let start = 4 + 32 * index;
    test.transaction
        .data
        .get(start..start + 32)
        .and_then(U256::try_from_be_slice)
        .unwrap_or_default()
}

/// In-memory EVM that answers each selector with a hand written trace.
pub struct ScriptedEvm {
    storage: Storage,
    snapshot: Storage,
    handlers: HashMap<[u8; 4], Handler>,
    pub transactions: Vec<TestCase>,
    pub restores: usize,
}

impl ScriptedEvm {
    pub fn new() -> Self {
        Self {
            storage: Storage::new(),
            snapshot: Storage::new(),
            handlers: HashMap::new(),
            transactions: Vec::new(),
            restores: 0,
        }
    }

    pub fn on<F>(mut self, signature: &str, handler: F) -> Self
    where
        F: Fn(&TestCase, &mut Storage) -> Vec<Instruction> + 'static,
    {
        if let Some(selector) = FunctionId::from_signature(signature).selector() {
            self.handlers.insert(selector, Box::new(handler));
        }
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

impl EvmEngine for ScriptedEvm {
    fn deploy_transaction(&mut self, test: &TestCase) -> Result<ExecutionResult> {
        self.transactions.push(test.clone());
        let trace = match &test.transaction.to {
            TxTarget::Create => vec![op(0, Opcode::Stop, &[])],
            TxTarget::Call(_) => {
                let selector: [u8; 4] = test
                    .transaction
                    .data
                    .get(..4)
                    .and_then(|bytes| bytes.try_into().ok())
                    .ok_or_else(|| FuzzerError::Execution("call data too short".to_string()))?;
                let handler = self
                    .handlers
                    .get(&selector)
                    .ok_or_else(|| FuzzerError::Execution("unknown selector".to_string()))?;
                handler(test, &mut self.storage)
            }
            TxTarget::Unresolved => {
                return Err(FuzzerError::Execution("no destination".to_string()));
            }
        };
        let is_error = trace.last().is_some_and(|i| i.op.is_failure());
        Ok(ExecutionResult {
            is_error,
            storage_address: CONTRACT,
            children: Vec::new(),
            trace,
        })
    }

    fn create_snapshot(&mut self) {
        self.snapshot = self.storage.clone();
    }

    fn restore_from_snapshot(&mut self) {
        self.storage = self.snapshot.clone();
        self.restores += 1;
    }

    fn get_balance(&self, _address: Address) -> U256 {
        U256::from(100u64) * U256::from(10u64).pow(U256::from(18u64))
    }

    fn has_account(&self, _address: Address) -> bool {
        true
    }

    fn create_fake_account(&mut self, _address: Address) {}

    fn block_number(&self) -> U256 {
        word(1)
    }

    fn timestamp(&self) -> U256 {
        word(1_600_000_000)
    }
}

/// Solver answering every check with the same model, recording what it
/// was asked.
#[derive(Clone, Default)]
pub struct ScriptedSolver {
    pub model: Option<Model>,
    pub asked: Rc<RefCell<Vec<Vec<BranchPredicate>>>>,
}

impl ScriptedSolver {
    pub fn answering(model: Model) -> Self {
        Self {
            model: Some(model),
            asked: Rc::default(),
        }
    }
}

impl ConstraintSolver for ScriptedSolver {
    fn check(&mut self, assertions: &[BranchPredicate]) -> SolverOutcome {
        self.asked.borrow_mut().push(assertions.to_vec());
        match &self.model {
            Some(model) => SolverOutcome::Sat(model.clone()),
            None => SolverOutcome::Unknown,
        }
    }

    fn optimize(
        &mut self,
        assertions: &[BranchPredicate],
        _variable: &SymbolicVariable,
        _objective: Objective,
    ) -> SolverOutcome {
        self.check(assertions)
    }
}

pub fn accounts() -> Accounts {
    Accounts {
        funded: vec![OWNER, ATTACKER],
        attackers: BTreeSet::from([ATTACKER]),
    }
}

/// Call of `signature` on the contract under test.
pub fn call(from: Address, signature: &str, arguments: Vec<Value>, amount: u64) -> Gene {
    Gene {
        account: from,
        contract: Some(Target::Call(CONTRACT)),
        amount: word(amount),
        function: FunctionId::from_signature(signature),
        arguments,
        gaslimit: 4_500_000,
        blocknumber: Field::Default,
        timestamp: Field::Default,
        balance: Field::Default,
        call_return: Some(AddressValues::new()),
        extcodesize: Some(AddressValues::new()),
        returndatasize: Some(AddressValues::new()),
    }
}

pub fn individual(genes: Vec<Gene>) -> Individual {
    Individual::new(GeneratorSet::MAIN, genes)
}

pub fn target(signatures: &[&str], runtime_code: &[u8]) -> FuzzingTarget {
    FuzzingTarget::new(generators(signatures), accounts(), runtime_code)
}

pub fn generators(signatures: &[&str]) -> GeneratorSet {
    let spec = ContractSpec::from_signatures("Vault", signatures.iter().copied(), Vec::new())
        .expect("valid signatures")
        .with_address(CONTRACT);
    let main = Generator::new(spec, vec![OWNER, ATTACKER], GeneratorSettings::default()).expect("generator");
    GeneratorSet::new(main, Vec::new())
}

// Runtime code of the `Vault` contract the traces below walk through.
//
//  0 CALLDATALOAD  1 PUSH1 00  3 SSTORE  4 STOP                       set(uint256)
//  5 PUSH1 00  7 SLOAD  8 PUSH1 0e  10 JUMPI  11 REVERT              pay()
// 14 JUMPDEST 15 CALLER 16 CALL 17 STOP
// 18 PUSH1 04 20 CALLDATALOAD 21 PUSH1 2a 23 EQ 24 PUSH1 1e 26 JUMPI check(uint256)
// 27 REVERT 30 JUMPDEST 31 STOP
pub const VAULT_RUNTIME: [u8; 32] = [
    0x35, 0x60, 0x00, 0x55, 0x00, 0x60, 0x00, 0x54, 0x60, 0x0e, 0x57, 0xfd, 0x00, 0x00, 0x5b, 0x33,
    0xf1, 0x00, 0x60, 0x04, 0x35, 0x60, 0x2a, 0x14, 0x60, 0x1e, 0x57, 0xfd, 0x00, 0x00, 0x5b, 0x00,
];

pub const VAULT_SIGNATURES: [&str; 3] = ["set(uint256)", "pay()", "check(uint256)"];

pub fn set_trace(test: &TestCase, storage: &mut Storage) -> Vec<Instruction> {
    let x = argument(test, 0);
    storage.insert(U256::ZERO, x);
    vec![
        op(0, Opcode::CallDataLoad, &[word(4)]),
        op(1, Opcode::Push1, &[x]),
        op(3, Opcode::SStore, &[x, U256::ZERO]),
        op(4, Opcode::Stop, &[]),
    ]
}

pub fn pay_trace(test: &TestCase, storage: &mut Storage) -> Vec<Instruction> {
    let balance = storage.get(&U256::ZERO).copied().unwrap_or_default();
    let mut trace = vec![
        op(5, Opcode::Push1, &[]),
        op(7, Opcode::SLoad, &[U256::ZERO]),
        op(8, Opcode::Push1, &[balance]),
        op(10, Opcode::JumpI, &[balance, word(14)]),
    ];
    if balance.is_zero() {
        trace.push(op(11, Opcode::Revert, &[U256::ZERO, U256::ZERO]));
    } else {
        let caller = crossfuzz::types::address_to_word(test.transaction.from);
        trace.extend([
            op(14, Opcode::JumpDest, &[]),
            op(15, Opcode::Caller, &[]),
            op(
                16,
                Opcode::Call,
                &[U256::ZERO, U256::ZERO, U256::ZERO, U256::ZERO, word(1), caller, word(30_000)],
            ),
            op(17, Opcode::Stop, &[word(1)]),
        ]);
    }
    trace
}

pub fn check_trace(test: &TestCase, _storage: &mut Storage) -> Vec<Instruction> {
    let x = argument(test, 0);
    let equal = if x == word(42) { word(1) } else { U256::ZERO };
    let mut trace = vec![
        op(18, Opcode::Push1, &[]),
        op(20, Opcode::CallDataLoad, &[word(4)]),
        op(21, Opcode::Push1, &[x]),
        op(23, Opcode::Eq, &[x, word(42)]),
        op(24, Opcode::Push1, &[equal]),
        op(26, Opcode::JumpI, &[equal, word(30)]),
    ];
    if equal.is_zero() {
        trace.push(op(27, Opcode::Revert, &[U256::ZERO, U256::ZERO]));
    } else {
        trace.extend([op(30, Opcode::JumpDest, &[]), op(31, Opcode::Stop, &[])]);
    }
    trace
}

pub fn vault_evm() -> ScriptedEvm {
    ScriptedEvm::new()
        .on("set(uint256)", set_trace)
        .on("pay()", pay_trace)
        .on("check(uint256)", check_trace)
}
