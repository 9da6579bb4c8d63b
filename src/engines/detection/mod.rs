//! Instruction-level vulnerability detectors.
//!
//! Every detector is a small state machine fed one instruction at a time
//! while an individual is replayed. Detectors share nothing with each other
//! and are reset before every individual.

pub mod arbitrary_memory_access;
pub mod assertion_failure;
pub mod block_dependency;
pub mod executor;
pub mod integer_overflow;
pub mod leaking_ether;
pub mod locking_ether;
pub mod reentrancy;
pub mod transaction_order_dependency;
pub mod unchecked_return_value;
pub mod unprotected_selfdestruct;
pub mod unsafe_delegatecall;

pub use executor::DetectorExecutor;

use crate::engines::execution::evm::Instruction;
use crate::engines::execution::expr::{BranchPredicate, Expr};
use crate::engines::execution::symvar::SymbolicVariable;
use crate::engines::execution::taint::TaintRecord;
use crate::engines::generation::individual::Individual;
use crate::types::{Accounts, Gene, Interface, Transaction};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        };
        write!(f, "{}", label)
    }
}

/// Raw hit reported by a detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub pc: usize,
    pub transaction_index: usize,
    pub kind: Option<&'static str>,
}

impl Detection {
    pub fn new(pc: usize, transaction_index: usize) -> Self {
        Self {
            pc,
            transaction_index,
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: &'static str) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// A recorded vulnerability, kept with enough context to replay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub swc_id: u32,
    pub detector: String,
    pub severity: Severity,
    pub program_counter: usize,
    pub transaction_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub individual: String,
    pub transactions: Vec<Transaction>,
    pub time: f64,
}

/// Everything a detector may look at for one instruction.
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    pub previous_instruction: Option<&'a Instruction>,
    pub current_instruction: &'a Instruction,
    /// Taint of the current instruction's input stack.
    pub tainted_record: Option<&'a TaintRecord>,
    /// Tainted branch decisions taken so far by the individual.
    pub previous_branch: &'a [BranchPredicate],
    pub individual: &'a Individual,
    pub transaction_index: usize,
    pub interface: &'a Interface,
    pub accounts: &'a Accounts,
    pub can_send_ether: bool,
}

impl<'a> DetectionContext<'a> {
    /// Concrete word `n` positions below the top of the current stack.
    pub fn word(&self, n: usize) -> Option<U256> {
        self.current_instruction.stack_top(n)
    }

    pub fn taint(&self, n: usize) -> Option<&'a Arc<Expr>> {
        self.tainted_record.and_then(|record| record.stack_top(n))
    }

    pub fn is_tainted(&self, n: usize) -> bool {
        self.taint(n).is_some()
    }

    pub fn transaction(&self, index: usize) -> Option<&'a Transaction> {
        self.individual
            .solution()
            .get(index)
            .and_then(|decoded| decoded.as_ref().ok())
            .map(|test| &test.transaction)
    }

    pub fn current_transaction(&self) -> Option<&'a Transaction> {
        self.transaction(self.transaction_index)
    }

    pub fn gene(&self, index: usize) -> Option<&'a Gene> {
        self.individual.chromosome().get(index)
    }
}

/// One vulnerability class.
pub trait Detector: Send {
    fn name(&self) -> &'static str;

    fn swc_id(&self) -> u32;

    fn severity(&self) -> Severity;

    /// Forget everything seen for the previous individual.
    fn reset(&mut self);

    fn detect(&mut self, ctx: &DetectionContext<'_>) -> Option<Detection>;

    /// Variable the detector wants written into the running taint stack.
    fn take_taint_request(&mut self) -> Option<SymbolicVariable> {
        None
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::engines::execution::opcode::Opcode;
    use crate::engines::generation::generator_set::GeneratorId;
    use crate::types::{FunctionId, Value};
    use alloy_primitives::Address;
    use std::collections::BTreeSet;

    pub fn word(v: u64) -> U256 {
        U256::from(v)
    }

    pub fn instruction(pc: usize, op: Opcode, stack: &[u64]) -> Instruction {
        Instruction::new(pc, op, stack.iter().map(|v| word(*v)).collect())
    }

    pub fn gene(account: Address, function: &str, arguments: Vec<Value>, amount: u64) -> Gene {
        Gene {
            account,
            contract: None,
            amount: word(amount),
            function: FunctionId::from_signature(function),
            arguments,
            gaslimit: 4_500_000,
            blocknumber: Default::default(),
            timestamp: Default::default(),
            balance: Default::default(),
            call_return: None,
            extcodesize: None,
            returndatasize: None,
        }
    }

    pub fn individual(genes: Vec<Gene>) -> Individual {
        Individual::new(GeneratorId(0), genes)
    }

    pub fn accounts(attackers: &[Address], trusted: &[Address]) -> Accounts {
        Accounts {
            funded: attackers.iter().chain(trusted).copied().collect(),
            attackers: attackers.iter().copied().collect::<BTreeSet<_>>(),
        }
    }

    pub fn record(stack: Vec<Option<Arc<Expr>>>) -> TaintRecord {
        TaintRecord { stack }
    }

    /// Builds contexts over fixed collaborators for a detector unit test.
    pub struct Harness {
        pub individual: Individual,
        pub interface: Interface,
        pub accounts: Accounts,
        pub can_send_ether: bool,
        pub branches: Vec<BranchPredicate>,
    }

    impl Harness {
        pub fn new(individual: Individual, accounts: Accounts) -> Self {
            Self {
                individual,
                interface: Interface::new(),
                accounts,
                can_send_ether: true,
                branches: Vec::new(),
            }
        }

        pub fn context<'a>(
            &'a self,
            previous: Option<&'a Instruction>,
            current: &'a Instruction,
            taint: Option<&'a TaintRecord>,
            transaction_index: usize,
        ) -> DetectionContext<'a> {
            DetectionContext {
                previous_instruction: previous,
                current_instruction: current,
                tainted_record: taint,
                previous_branch: &self.branches,
                individual: &self.individual,
                transaction_index,
                interface: &self.interface,
                accounts: &self.accounts,
                can_send_ether: self.can_send_ether,
            }
        }
    }
}
