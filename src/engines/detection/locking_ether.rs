use super::{DetectionContext, Detection, Detector, Severity};
use crate::engines::execution::opcode::Opcode;

/// The contract accepts ether but has no instruction able to send it back.
#[derive(Debug, Default)]
pub struct LockingEtherDetector;

impl LockingEtherDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Detector for LockingEtherDetector {
    fn name(&self) -> &'static str {
        "Locking Ether"
    }

    fn swc_id(&self) -> u32 {
        132
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn reset(&mut self) {}

    fn detect(&mut self, ctx: &DetectionContext<'_>) -> Option<Detection> {
        if ctx.can_send_ether || ctx.current_instruction.op != Opcode::Stop {
            return None;
        }
        let paid = ctx
            .current_transaction()
            .map(|tx| tx.value > alloy_primitives::U256::ZERO)
            .unwrap_or(false);
        paid.then(|| Detection::new(ctx.current_instruction.pc, ctx.transaction_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::detection::test_support::*;
    use alloy_primitives::Address;

    #[test]
    fn paid_stop_without_exit_is_flagged() {
        let user = Address::repeat_byte(1);
        let mut harness = Harness::new(
            individual(vec![gene(user, "deposit()", vec![], 0), gene(user, "deposit()", vec![], 5)]),
            accounts(&[], &[user]),
        );
        harness.can_send_ether = false;
        let mut detector = LockingEtherDetector::new();
        let stop = instruction(40, Opcode::Stop, &[]);

        assert!(detector.detect(&harness.context(None, &stop, None, 0)).is_none());
        assert_eq!(
            detector.detect(&harness.context(None, &stop, None, 1)),
            Some(Detection::new(40, 1))
        );

        harness.can_send_ether = true;
        assert!(detector.detect(&harness.context(None, &stop, None, 1)).is_none());
    }
}
