use super::opcode::Opcode;
use crate::error::Result;
use crate::types::TestCase;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// One executed instruction. `stack` and `memory` hold the machine state
/// before the instruction runs; the stack's last element is the top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub pc: usize,
    pub op: Opcode,
    #[serde(default)]
    pub depth: usize,
    #[serde(default)]
    pub stack: Vec<U256>,
    #[serde(default)]
    pub memory: Vec<u8>,
}

impl Instruction {
    pub fn new(pc: usize, op: Opcode, stack: Vec<U256>) -> Self {
        Self {
            pc,
            op,
            depth: 0,
            stack,
            memory: Vec::new(),
        }
    }

    pub fn with_memory(mut self, memory: Vec<u8>) -> Self {
        self.memory = memory;
        self
    }

    /// Word `n` positions below the top of the stack.
    pub fn stack_top(&self, n: usize) -> Option<U256> {
        let len = self.stack.len();
        if n < len {
            Some(self.stack[len - 1 - n])
        } else {
            None
        }
    }

    pub fn memory_slice(&self, offset: usize, size: usize) -> Vec<u8> {
        let start = offset.min(self.memory.len());
        let end = offset.saturating_add(size).min(self.memory.len());
        self.memory[start..end].to_vec()
    }
}

/// Trace of a nested call into another contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildExecution {
    pub to: Address,
    pub trace: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub is_error: bool,
    /// Address of the created contract for deployments.
    pub storage_address: Address,
    #[serde(default)]
    pub children: Vec<ChildExecution>,
    pub trace: Vec<Instruction>,
}

/// The EVM the fuzzer drives. Implementations execute one transaction at a
/// time and support a single saved snapshot.
pub trait EvmEngine {
    /// Run a transaction. An `Err` marks the transaction as invalid for the
    /// EVM and it is skipped.
    fn deploy_transaction(&mut self, test: &TestCase) -> Result<ExecutionResult>;
    fn create_snapshot(&mut self);
    fn restore_from_snapshot(&mut self);
    fn get_balance(&self, address: Address) -> U256;
    fn has_account(&self, address: Address) -> bool;
    fn create_fake_account(&mut self, address: Address);
    fn block_number(&self) -> U256;
    fn timestamp(&self) -> U256;
}

/// Restores the EVM snapshot when created and again when dropped, so every
/// individual starts and leaves from the same state.
pub struct Rollback<'a, E: EvmEngine + ?Sized> {
    evm: &'a mut E,
}

impl<'a, E: EvmEngine + ?Sized> Rollback<'a, E> {
    pub fn new(evm: &'a mut E) -> Self {
        evm.restore_from_snapshot();
        Self { evm }
    }
}

impl<E: EvmEngine + ?Sized> Deref for Rollback<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.evm
    }
}

impl<E: EvmEngine + ?Sized> DerefMut for Rollback<'_, E> {
    fn deref_mut(&mut self) -> &mut E {
        self.evm
    }
}

impl<E: EvmEngine + ?Sized> Drop for Rollback<'_, E> {
    fn drop(&mut self) {
        self.evm.restore_from_snapshot();
    }
}
