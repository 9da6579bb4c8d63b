use super::{DetectionContext, Detection, Detector, Severity};
use crate::engines::execution::opcode::Opcode;

/// DELEGATECALL to an address the attacker controls, in a sequence sent
/// entirely by attackers.
#[derive(Debug, Default)]
pub struct UnsafeDelegatecallDetector {
    delegatecall: Option<Detection>,
}

impl UnsafeDelegatecallDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Detector for UnsafeDelegatecallDetector {
    fn name(&self) -> &'static str {
        "Unsafe Delegatecall"
    }

    fn swc_id(&self) -> u32 {
        112
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn reset(&mut self) {
        self.delegatecall = None;
    }

    fn detect(&mut self, ctx: &DetectionContext<'_>) -> Option<Detection> {
        match ctx.current_instruction.op {
            Opcode::DelegateCall if ctx.is_tainted(1) => {
                let only_attackers = (0..ctx.individual.len()).all(|i| {
                    ctx.transaction(i)
                        .map(|tx| ctx.accounts.is_attacker(&tx.from))
                        .unwrap_or(true)
                });
                if only_attackers {
                    self.delegatecall = Some(Detection::new(
                        ctx.current_instruction.pc,
                        ctx.transaction_index,
                    ));
                }
                None
            }
            Opcode::Stop => self.delegatecall.clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::detection::test_support::*;
    use crate::engines::execution::expr::Expr;
    use crate::engines::execution::symvar::SymbolicVariable;
    use alloy_primitives::Address;

    fn delegatecall_stack() -> Vec<u64> {
        // out_size out_offset in_size in_offset to gas
        vec![0, 0, 0, 0, 0xbeef, 50_000]
    }

    fn tainted_target() -> Vec<Option<std::sync::Arc<Expr>>> {
        let mut stack = vec![None; 6];
        stack[4] = Some(Expr::var(SymbolicVariable::CallDataLoad { tx: 0, param: 0 }));
        stack
    }

    #[test]
    fn attacker_only_sequence_is_reported_at_stop() {
        let attacker = Address::repeat_byte(0xaa);
        let harness = Harness::new(
            individual(vec![gene(attacker, "forward(address)", vec![], 0)]),
            accounts(&[attacker], &[]),
        );
        let mut detector = UnsafeDelegatecallDetector::new();
        let call = instruction(30, Opcode::DelegateCall, &delegatecall_stack());
        let taint = record(tainted_target());

        assert!(detector.detect(&harness.context(None, &call, Some(&taint), 0)).is_none());
        let stop = instruction(44, Opcode::Stop, &[]);
        assert_eq!(
            detector.detect(&harness.context(None, &stop, None, 0)),
            Some(Detection::new(30, 0))
        );
    }

    #[test]
    fn trusted_sender_in_sequence_suppresses() {
        let attacker = Address::repeat_byte(0xaa);
        let owner = Address::repeat_byte(0x01);
        let harness = Harness::new(
            individual(vec![
                gene(owner, "setDelegate(address)", vec![], 0),
                gene(attacker, "forward(address)", vec![], 0),
            ]),
            accounts(&[attacker], &[owner]),
        );
        let mut detector = UnsafeDelegatecallDetector::new();
        let call = instruction(30, Opcode::DelegateCall, &delegatecall_stack());
        let taint = record(tainted_target());
        detector.detect(&harness.context(None, &call, Some(&taint), 1));
        let stop = instruction(44, Opcode::Stop, &[]);
        assert!(detector.detect(&harness.context(None, &stop, None, 1)).is_none());
    }
}
