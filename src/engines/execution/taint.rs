use super::evm::Instruction;
use super::expr::{BinaryOp, Expr, UnaryOp};
use super::opcode::Opcode;
use super::symvar::SymbolicVariable;
use crate::types::word_to_usize;
use alloy_primitives::U256;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub type Taint = Option<Arc<Expr>>;

const WORD: usize = 32;
/// Upper bound on memory words tainted or cleared by one copy.
const MAX_COPY_WORDS: usize = 1024;

/// Taint of the stack as seen by one instruction, top last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaintRecord {
    pub stack: Vec<Taint>,
}

impl TaintRecord {
    pub fn stack_top(&self, n: usize) -> Option<&Arc<Expr>> {
        let len = self.stack.len();
        if n < len {
            self.stack[len - 1 - n].as_ref()
        } else {
            None
        }
    }

    pub fn is_tainted(&self, n: usize) -> bool {
        self.stack_top(n).is_some()
    }
}

/// Follows symbolic values through stack, memory and storage while a trace
/// is replayed.
///
/// Stack and memory taint belong to one transaction; storage taint lives
/// for the whole individual.
#[derive(Debug, Default)]
pub struct SymbolicTaintAnalyzer {
    stack: Vec<Taint>,
    memory: BTreeMap<usize, Arc<Expr>>,
    storage: HashMap<U256, Arc<Expr>>,
    input: TaintRecord,
}

impl SymbolicTaintAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `instruction` and return the taint of its input stack.
    pub fn propagate_taint(&mut self, instruction: &Instruction) -> &TaintRecord {
        self.align(instruction.stack.len());
        self.input = TaintRecord {
            stack: self.stack.clone(),
        };

        let op = instruction.op;
        if let Some(n) = op.dup_depth() {
            let copied = self.input.stack_top(n - 1).cloned();
            self.stack.push(copied);
            return &self.input;
        }
        if let Some(n) = op.swap_depth() {
            let len = self.stack.len();
            if n < len {
                self.stack.swap(len - 1, len - 1 - n);
            }
            return &self.input;
        }

        let (pops, pushes) = op.stack_io();
        let args: Vec<Taint> = (0..pops).map(|_| self.stack.pop().flatten()).collect();
        let operand = |i: usize| -> Arc<Expr> {
            args.get(i)
                .cloned()
                .flatten()
                .unwrap_or_else(|| Expr::constant(instruction.stack_top(i).unwrap_or_default()))
        };
        let any_tainted = args.iter().any(Option::is_some);
        let word = |i: usize| word_to_usize(instruction.stack_top(i).unwrap_or_default());

        let result: Taint = match op {
            Opcode::Not => args[0].clone().map(|a| Expr::unary(UnaryOp::Not, a)),
            Opcode::IsZero => args[0].clone().map(|a| Expr::unary(UnaryOp::IsZero, a)),
            Opcode::AddMod | Opcode::MulMod if any_tainted => {
                let inner = if op == Opcode::AddMod {
                    BinaryOp::Add
                } else {
                    BinaryOp::Mul
                };
                Some(Expr::binary(
                    BinaryOp::Mod,
                    Expr::binary(inner, operand(0), operand(1)),
                    operand(2),
                ))
            }
            Opcode::Sha3 => {
                let words: Vec<Arc<Expr>> = self
                    .memory
                    .range(word(0)..word(0).saturating_add(word(1)))
                    .map(|(_, expr)| expr.clone())
                    .collect();
                if words.is_empty() {
                    None
                } else {
                    Some(Arc::new(Expr::Keccak(words)))
                }
            }
            Opcode::MLoad => self.memory_word(word(0)),
            Opcode::MStore | Opcode::MStore8 => {
                let offset = word(0);
                self.clear_memory(offset, if op == Opcode::MStore { WORD } else { 1 });
                if let Some(value) = args[1].clone() {
                    self.memory.insert(offset, value);
                }
                None
            }
            Opcode::SLoad => self.storage.get(&instruction.stack_top(0).unwrap_or_default()).cloned(),
            Opcode::SStore => {
                let key = instruction.stack_top(0).unwrap_or_default();
                match args[1].clone() {
                    Some(value) => {
                        self.storage.insert(key, value);
                    }
                    None => {
                        self.storage.remove(&key);
                    }
                }
                None
            }
            Opcode::CallDataCopy | Opcode::CodeCopy | Opcode::ReturnDataCopy => {
                self.clear_memory(word(0), word(2));
                None
            }
            Opcode::ExtCodeCopy => {
                self.clear_memory(word(1), word(3));
                None
            }
            Opcode::Call | Opcode::CallCode => {
                self.clear_memory(word(5), word(6));
                None
            }
            Opcode::DelegateCall | Opcode::StaticCall => {
                self.clear_memory(word(4), word(5));
                None
            }
            _ => match BinaryOp::from_opcode(op) {
                Some(binary) if any_tainted => Some(Expr::binary(binary, operand(0), operand(1))),
                _ => None,
            },
        };

        for _ in 0..pushes {
            self.stack.push(None);
        }
        if pushes == 1 {
            if let Some(top) = self.stack.last_mut() {
                *top = result;
            }
        }
        &self.input
    }

    /// Taint of the input stack of the last propagated instruction.
    pub fn check_taint(&self) -> &TaintRecord {
        &self.input
    }

    /// Mark the value produced by the instruction just propagated as
    /// `variable`. CALLDATACOPY taints the copied memory instead.
    pub fn introduce_taint(&mut self, variable: SymbolicVariable, instruction: &Instruction) {
        let expr = Expr::var(variable);
        if instruction.op == Opcode::CallDataCopy {
            let dest = word_to_usize(instruction.stack_top(0).unwrap_or_default());
            let len = word_to_usize(instruction.stack_top(2).unwrap_or_default());
            let words = len.div_ceil(WORD).min(MAX_COPY_WORDS);
            for i in 0..words {
                self.memory.insert(dest.saturating_add(i * WORD), expr.clone());
            }
        } else if let Some(top) = self.stack.last_mut() {
            *top = Some(expr);
        }
    }

    /// Overwrite the taint `depth` words below the current top.
    pub fn taint_stack_slot(&mut self, depth: usize, variable: SymbolicVariable) {
        let len = self.stack.len();
        if depth < len {
            self.stack[len - 1 - depth] = Some(Expr::var(variable));
        }
    }

    /// Current taint of the stack, top last.
    pub fn stack(&self) -> &[Taint] {
        &self.stack
    }

    /// End of a transaction.
    pub fn clear_callstack(&mut self) {
        self.stack.clear();
        self.memory.clear();
        self.input = TaintRecord::default();
    }

    /// End of an individual.
    pub fn clear_storage(&mut self) {
        self.storage.clear();
    }

    fn align(&mut self, depth: usize) {
        let len = self.stack.len();
        if len > depth {
            self.stack.drain(..len - depth);
        } else if len < depth {
            self.stack
                .splice(0..0, std::iter::repeat(None).take(depth - len));
        }
    }

    fn memory_word(&self, offset: usize) -> Taint {
        if let Some(expr) = self.memory.get(&offset) {
            return Some(expr.clone());
        }
        self.memory
            .range(offset.saturating_sub(WORD - 1)..offset.saturating_add(WORD))
            .next()
            .map(|(_, expr)| expr.clone())
    }

    fn clear_memory(&mut self, offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        let end = offset.saturating_add(len.min(MAX_COPY_WORDS * WORD));
        let stale: Vec<usize> = self
            .memory
            .range(offset.saturating_sub(WORD - 1)..end)
            .map(|(k, _)| *k)
            .collect();
        for key in stale {
            self.memory.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn calldataload_taint_flows_through_add() {
        let mut taint = SymbolicTaintAnalyzer::new();
        let load = Instruction::new(0, Opcode::CallDataLoad, vec![word(4)]);
        taint.propagate_taint(&load);
        taint.introduce_taint(SymbolicVariable::CallDataLoad { tx: 0, param: 0 }, &load);

        taint.propagate_taint(&Instruction::new(1, Opcode::Push1, vec![word(7)]));
        let add = Instruction::new(3, Opcode::Add, vec![word(7), word(1)]);
        let record = taint.propagate_taint(&add).clone();
        assert!(record.is_tainted(1));
        assert!(!record.is_tainted(0));

        let lt = Instruction::new(4, Opcode::IsZero, vec![word(8)]);
        let record = taint.propagate_taint(&lt);
        let expr = record.stack_top(0).unwrap();
        assert_eq!(expr.to_string(), "(bvadd 0x1 calldataload_0_0)");
    }

    #[test]
    fn storage_taint_survives_transactions() {
        let mut taint = SymbolicTaintAnalyzer::new();
        let caller = Instruction::new(0, Opcode::Caller, vec![]);
        taint.propagate_taint(&caller);
        taint.introduce_taint(SymbolicVariable::Caller { tx: 0 }, &caller);
        taint.propagate_taint(&Instruction::new(1, Opcode::Push1, vec![word(9)]));
        taint.propagate_taint(&Instruction::new(3, Opcode::SStore, vec![word(9), word(0)]));
        taint.clear_callstack();

        taint.propagate_taint(&Instruction::new(0, Opcode::SLoad, vec![word(0)]));
        let after = taint.propagate_taint(&Instruction::new(1, Opcode::Pop, vec![word(9)]));
        assert!(after.is_tainted(0));

        taint.clear_storage();
        taint.clear_callstack();
        taint.propagate_taint(&Instruction::new(0, Opcode::SLoad, vec![word(0)]));
        let after = taint.propagate_taint(&Instruction::new(1, Opcode::Pop, vec![word(9)]));
        assert!(!after.is_tainted(0));
    }

    #[test]
    fn calldatacopy_taints_memory() {
        let mut taint = SymbolicTaintAnalyzer::new();
        let copy = Instruction::new(0, Opcode::CallDataCopy, vec![word(64), word(68), word(0x80)]);
        taint.propagate_taint(&copy);
        taint.introduce_taint(SymbolicVariable::CallDataCopy { tx: 1, param: 0 }, &copy);
        taint.propagate_taint(&Instruction::new(1, Opcode::MLoad, vec![word(0x80)]));
        let record = taint.propagate_taint(&Instruction::new(2, Opcode::Pop, vec![word(5)]));
        assert!(record.is_tainted(0));
    }

    #[test]
    fn dup_and_swap_move_taint() {
        let mut taint = SymbolicTaintAnalyzer::new();
        let gas = Instruction::new(0, Opcode::Gas, vec![]);
        taint.propagate_taint(&gas);
        taint.introduce_taint(SymbolicVariable::Gas { tx: 0 }, &gas);
        taint.propagate_taint(&Instruction::new(1, Opcode::Push1, vec![word(1)]));
        taint.propagate_taint(&Instruction::new(3, Opcode::Swap1, vec![word(1), word(2)]));
        let record = taint.propagate_taint(&Instruction::new(4, Opcode::Dup2, vec![word(2), word(1)]));
        assert!(record.is_tainted(0));
        assert!(!record.is_tainted(1));
        assert_eq!(taint.stack().len(), 3);
        assert!(taint.stack()[0].is_none());
        assert!(taint.stack()[2].is_none());
    }
}
