use super::{DetectionContext, Detection, Detector, Severity};
use crate::engines::execution::expr::Expr;
use crate::engines::execution::opcode::Opcode;
use crate::types::FunctionId;
use alloy_primitives::{Address, U256};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct StorageWrite {
    value: Arc<Expr>,
    function: FunctionId,
    pc: usize,
}

#[derive(Debug, Clone)]
struct StorageRead {
    value: Arc<Expr>,
    function: FunctionId,
    store_pc: usize,
    transaction_index: usize,
}

/// Outcome of a transfer depends on which of two transactions touching the
/// same storage is mined first.
#[derive(Debug, Default)]
pub struct TransactionOrderDependencyDetector {
    sstores: BTreeMap<U256, StorageWrite>,
    first_sstore_pc: Option<usize>,
    sloads: BTreeMap<U256, StorageRead>,
}

impl TransactionOrderDependencyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_function(ctx: &DetectionContext<'_>) -> Option<FunctionId> {
        ctx.gene(ctx.transaction_index).map(|gene| gene.function)
    }

    fn sender(ctx: &DetectionContext<'_>, index: usize) -> Option<Address> {
        ctx.transaction(index).map(|tx| tx.from)
    }

    /// A later transaction repeats this one's call from another sender.
    fn replayed_by_other_sender(ctx: &DetectionContext<'_>) -> bool {
        let index = ctx.transaction_index;
        let (Some(gene), Some(sender)) = (ctx.gene(index), Self::sender(ctx, index)) else {
            return false;
        };
        (index + 1..ctx.individual.len()).any(|i| {
            ctx.gene(i).is_some_and(|other| {
                other.function == gene.function && other.arguments == gene.arguments
            }) && Self::sender(ctx, i).is_some_and(|other| other != sender)
        })
    }
}

impl Detector for TransactionOrderDependencyDetector {
    fn name(&self) -> &'static str {
        "Transaction Order Dependency"
    }

    fn swc_id(&self) -> u32 {
        114
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn reset(&mut self) {
        self.sstores.clear();
        self.first_sstore_pc = None;
        self.sloads.clear();
    }

    fn detect(&mut self, ctx: &DetectionContext<'_>) -> Option<Detection> {
        let current = ctx.current_instruction;
        match current.op {
            Opcode::SStore => {
                let value = ctx.taint(1)?;
                let slot = ctx.word(0)?;
                let function = Self::current_function(ctx)?;
                if !self.sstores.contains_key(&slot) {
                    self.sstores.insert(
                        slot,
                        StorageWrite {
                            value: value.clone(),
                            function,
                            pc: current.pc,
                        },
                    );
                    self.first_sstore_pc.get_or_insert(current.pc);
                }
            }
            Opcode::SLoad => {
                let slot = ctx.word(0)?;
                let function = Self::current_function(ctx)?;
                if let Some(write) = self.sstores.get(&slot) {
                    if write.function != function {
                        self.sloads.insert(
                            slot,
                            StorageRead {
                                value: write.value.clone(),
                                function,
                                store_pc: write.pc,
                                transaction_index: ctx.transaction_index,
                            },
                        );
                    }
                }
            }
            Opcode::Call => {
                let function = Self::current_function(ctx)?;
                if let Some(value) = ctx.taint(2) {
                    let matching = self.sloads.iter().find(|(slot, read)| {
                        self.sstores.contains_key(*slot)
                            && &read.value == value
                            && read.function == function
                    });
                    if let Some((_, read)) = matching {
                        return Some(Detection::new(read.store_pc, read.transaction_index));
                    }
                }
                if ctx.is_tainted(1) {
                    let sends_value =
                        ctx.word(2).is_some_and(|v| !v.is_zero()) || ctx.is_tainted(2);
                    if sends_value && Self::replayed_by_other_sender(ctx) {
                        if let Some(pc) = self.first_sstore_pc {
                            return Some(Detection::new(pc, ctx.transaction_index));
                        }
                    }
                }
            }
            _ => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::detection::test_support::*;
    use crate::engines::execution::symvar::SymbolicVariable;
    use crate::types::Value;

    fn reward() -> Arc<Expr> {
        Expr::var(SymbolicVariable::CallDataLoad { tx: 0, param: 0 })
    }

    #[test]
    fn stored_reward_paid_by_another_function() {
        let owner = Address::repeat_byte(0x01);
        let solver = Address::repeat_byte(0xaa);
        let harness = Harness::new(
            individual(vec![
                gene(owner, "setReward(uint256)", vec![Value::uint(256, 10)], 0),
                gene(solver, "claim()", vec![], 0),
            ]),
            accounts(&[solver], &[owner]),
        );
        let mut detector = TransactionOrderDependencyDetector::new();

        let store_taint = record(vec![Some(reward()), None]);
        let sstore = instruction(15, Opcode::SStore, &[10, 2]);
        detector.detect(&harness.context(None, &sstore, Some(&store_taint), 0));

        let sload = instruction(50, Opcode::SLoad, &[2]);
        detector.detect(&harness.context(None, &sload, None, 1));

        let mut stack = vec![None; 7];
        stack[4] = Some(reward());
        let call_taint = record(stack);
        let call = instruction(70, Opcode::Call, &[0, 0, 0, 0, 10, 0xaa, 9000]);
        assert_eq!(
            detector.detect(&harness.context(None, &call, Some(&call_taint), 1)),
            Some(Detection::new(15, 1))
        );
    }

    #[test]
    fn same_call_from_two_senders() {
        let first = Address::repeat_byte(0x01);
        let second = Address::repeat_byte(0x02);
        let args = vec![Value::uint(256, 3)];
        let harness = Harness::new(
            individual(vec![
                gene(first, "buy(uint256)", args.clone(), 0),
                gene(second, "buy(uint256)", args, 0),
            ]),
            accounts(&[], &[first, second]),
        );
        let mut detector = TransactionOrderDependencyDetector::new();

        let store_taint = record(vec![Some(Expr::var(SymbolicVariable::Caller { tx: 0 })), None]);
        let sstore = instruction(15, Opcode::SStore, &[1, 0]);
        detector.detect(&harness.context(None, &sstore, Some(&store_taint), 0));

        let mut stack = vec![None; 7];
        stack[5] = Some(Expr::var(SymbolicVariable::Caller { tx: 0 }));
        let call_taint = record(stack);
        let call = instruction(70, Opcode::Call, &[0, 0, 0, 0, 1, 0x01, 9000]);
        assert_eq!(
            detector.detect(&harness.context(None, &call, Some(&call_taint), 0)),
            Some(Detection::new(15, 0))
        );
    }
}
