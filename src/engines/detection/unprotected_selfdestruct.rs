use super::{DetectionContext, Detection, Detector, Severity};
use crate::engines::execution::opcode::Opcode;

/// SELFDESTRUCT executed by an attacker whose address no trusted sender
/// handed to the contract beforehand.
#[derive(Debug, Default)]
pub struct UnprotectedSelfdestructDetector {
    trusted_arguments: Vec<Vec<u8>>,
}

impl UnprotectedSelfdestructDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_trusted(&self, needle: &[u8]) -> bool {
        self.trusted_arguments
            .iter()
            .any(|data| data.windows(needle.len()).any(|window| window == needle))
    }
}

impl Detector for UnprotectedSelfdestructDetector {
    fn name(&self) -> &'static str {
        "Unprotected Selfdestruct"
    }

    fn swc_id(&self) -> u32 {
        106
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn reset(&mut self) {
        self.trusted_arguments.clear();
    }

    fn detect(&mut self, ctx: &DetectionContext<'_>) -> Option<Detection> {
        if ctx.current_instruction.op != Opcode::SelfDestruct {
            return None;
        }
        for i in 0..ctx.transaction_index {
            if let Some(tx) = ctx.transaction(i) {
                if !ctx.accounts.is_attacker(&tx.from) && !self.trusted_arguments.contains(&tx.data) {
                    self.trusted_arguments.push(tx.data.clone());
                }
            }
        }
        let sender = ctx.current_transaction()?.from;
        if ctx.accounts.is_attacker(&sender) && !self.is_trusted(sender.as_slice()) {
            return Some(Detection::new(ctx.current_instruction.pc, ctx.transaction_index));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::detection::test_support::*;
    use crate::types::Value;
    use alloy_primitives::Address;

    #[test]
    fn attacker_kill_without_prior_authorisation() {
        let attacker = Address::repeat_byte(0xaa);
        let harness = Harness::new(
            individual(vec![gene(attacker, "kill()", vec![], 0)]),
            accounts(&[attacker], &[]),
        );
        let mut detector = UnprotectedSelfdestructDetector::new();
        let kill = instruction(90, Opcode::SelfDestruct, &[0xaa]);
        assert_eq!(
            detector.detect(&harness.context(None, &kill, None, 0)),
            Some(Detection::new(90, 0))
        );
    }

    #[test]
    fn owner_naming_the_attacker_first_suppresses() {
        let attacker = Address::repeat_byte(0xaa);
        let owner = Address::repeat_byte(0x01);
        let harness = Harness::new(
            individual(vec![
                gene(owner, "setOwner(address)", vec![Value::Address(attacker)], 0),
                gene(attacker, "kill()", vec![], 0),
            ]),
            accounts(&[attacker], &[owner]),
        );
        let mut detector = UnprotectedSelfdestructDetector::new();
        let kill = instruction(90, Opcode::SelfDestruct, &[0xaa]);
        assert!(detector.detect(&harness.context(None, &kill, None, 1)).is_none());
    }
}
