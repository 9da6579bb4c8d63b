use super::{DetectionContext, Detection, Detector, Severity};
use crate::engines::execution::opcode::Opcode;
use alloy_primitives::U256;
use std::collections::{BTreeMap, BTreeSet};

/// Gas forwarded by `transfer`/`send`; not enough to re-enter.
const STIPEND: u64 = 2300;

/// Storage read, then an external call with enough gas to re-enter, then a
/// write to the slot that was read.
#[derive(Debug, Default)]
pub struct ReentrancyDetector {
    /// Slot -> (pc, transaction) of the SLOAD.
    sloads: BTreeMap<U256, (usize, usize)>,
    calls: BTreeSet<(usize, usize)>,
}

impl ReentrancyDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Detector for ReentrancyDetector {
    fn name(&self) -> &'static str {
        "Reentrancy"
    }

    fn swc_id(&self) -> u32 {
        107
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn reset(&mut self) {
        self.sloads.clear();
        self.calls.clear();
    }

    fn detect(&mut self, ctx: &DetectionContext<'_>) -> Option<Detection> {
        let current = ctx.current_instruction;
        match current.op {
            Opcode::SLoad => {
                let slot = ctx.word(0)?;
                self.sloads.insert(slot, (current.pc, ctx.transaction_index));
            }
            Opcode::Call if !self.sloads.is_empty() => {
                let gas = ctx.word(0)?;
                if gas <= U256::from(STIPEND) {
                    return None;
                }
                let value = ctx.word(2).unwrap_or_default();
                if !value.is_zero() || ctx.is_tainted(2) {
                    self.calls.insert((current.pc, ctx.transaction_index));
                }
                if ctx.is_tainted(1) {
                    self.calls.insert((current.pc, ctx.transaction_index));
                    if let Some((_, index)) = self.sloads.values().find(|(pc, _)| *pc < current.pc) {
                        return Some(Detection::new(current.pc, *index));
                    }
                }
            }
            Opcode::SStore if !self.calls.is_empty() => {
                let slot = ctx.word(0)?;
                if self.sloads.contains_key(&slot)
                    && self.calls.iter().any(|(pc, _)| *pc < current.pc)
                {
                    return Some(Detection::new(current.pc, ctx.transaction_index));
                }
            }
            op if op.is_halting() => self.reset(),
            _ => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::detection::test_support::*;
    use crate::engines::execution::expr::Expr;
    use crate::engines::execution::symvar::SymbolicVariable;
    use crate::engines::execution::taint::TaintRecord;
    use alloy_primitives::Address;

    fn run(gas: u64) -> Option<Detection> {
        let attacker = Address::repeat_byte(0xaa);
        let harness = Harness::new(
            individual(vec![gene(attacker, "withdraw()", vec![], 0)]),
            accounts(&[attacker], &[]),
        );
        let mut detector = ReentrancyDetector::new();

        let sload = instruction(10, Opcode::SLoad, &[5]);
        assert!(detector.detect(&harness.context(None, &sload, None, 0)).is_none());

        let mut stack = vec![None; 7];
        stack[4] = Some(Expr::var(SymbolicVariable::CallValue { tx: 0 }));
        let taint = TaintRecord { stack };
        let call = instruction(20, Opcode::Call, &[0, 0, 0, 0, 0, 0xaa, gas]);
        assert!(detector.detect(&harness.context(None, &call, Some(&taint), 0)).is_none());

        let sstore = instruction(30, Opcode::SStore, &[0, 5]);
        detector.detect(&harness.context(None, &sstore, None, 0))
    }

    #[test]
    fn write_after_reentrant_call_is_flagged_at_the_store() {
        assert_eq!(run(5000), Some(Detection::new(30, 0)));
    }

    #[test]
    fn stipend_call_cannot_reenter() {
        assert_eq!(run(2100), None);
    }

    #[test]
    fn terminal_opcode_clears_state() {
        let user = Address::repeat_byte(1);
        let harness = Harness::new(individual(vec![gene(user, "f()", vec![], 0)]), accounts(&[], &[user]));
        let mut detector = ReentrancyDetector::new();
        detector.detect(&harness.context(None, &instruction(1, Opcode::SLoad, &[5]), None, 0));
        detector.detect(&harness.context(None, &instruction(2, Opcode::Stop, &[]), None, 0));
        let call = instruction(20, Opcode::Call, &[0, 0, 0, 0, 1, 0xaa, 9000]);
        detector.detect(&harness.context(None, &call, None, 0));
        let sstore = instruction(30, Opcode::SStore, &[0, 5]);
        assert!(detector.detect(&harness.context(None, &sstore, None, 0)).is_none());
    }
}
