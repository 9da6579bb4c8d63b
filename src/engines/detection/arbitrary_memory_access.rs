use super::{DetectionContext, Detection, Detector, Severity};
use crate::engines::execution::opcode::Opcode;
use crate::engines::execution::symvar::SymbolicVariable;
use alloy_primitives::U256;

/// SSTORE where both slot and value come from call data and the slot
/// argument is large enough to reach arbitrary storage.
#[derive(Debug, Default)]
pub struct ArbitraryMemoryAccessDetector;

impl ArbitraryMemoryAccessDetector {
    pub fn new() -> Self {
        Self
    }
}

fn first_calldataload(variables: impl IntoIterator<Item = SymbolicVariable>) -> Option<(usize, usize)> {
    variables.into_iter().find_map(|v| match v {
        SymbolicVariable::CallDataLoad { tx, param } => Some((tx, param)),
        _ => None,
    })
}

impl Detector for ArbitraryMemoryAccessDetector {
    fn name(&self) -> &'static str {
        "Arbitrary Memory Access"
    }

    fn swc_id(&self) -> u32 {
        124
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn reset(&mut self) {}

    fn detect(&mut self, ctx: &DetectionContext<'_>) -> Option<Detection> {
        if ctx.current_instruction.op != Opcode::SStore {
            return None;
        }
        let index = ctx.taint(0)?;
        let value = ctx.taint(1)?;
        if index == value {
            return None;
        }
        let (tx, param) = first_calldataload(index.variables())?;
        first_calldataload(value.variables())?;

        let argument = ctx.gene(tx)?.arguments.get(param)?;
        let threshold = U256::from(u128::MAX);
        match argument.as_integer() {
            Some(raw) if raw > threshold => Some(Detection::new(ctx.current_instruction.pc, tx)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::detection::test_support::*;
    use crate::engines::execution::expr::{BinaryOp, Expr};
    use crate::types::Value;
    use alloy_primitives::Address;

    fn sstore_taint() -> crate::engines::execution::taint::TaintRecord {
        let slot = Expr::binary(
            BinaryOp::Add,
            Expr::var(SymbolicVariable::CallDataLoad { tx: 0, param: 0 }),
            Expr::constant(U256::from(3u8)),
        );
        let value = Expr::var(SymbolicVariable::CallDataLoad { tx: 0, param: 1 });
        record(vec![Some(value), Some(slot)])
    }

    fn harness(slot_argument: U256) -> Harness {
        let user = Address::repeat_byte(1);
        Harness::new(
            individual(vec![gene(
                user,
                "write(uint256,uint256)",
                vec![
                    Value::Uint { bits: 256, value: slot_argument },
                    Value::uint(256, 7),
                ],
                0,
            )]),
            accounts(&[], &[user]),
        )
    }

    #[test]
    fn huge_slot_argument_is_flagged() {
        let harness = harness(U256::MAX - U256::from(5u8));
        let taint = sstore_taint();
        let sstore = instruction(61, Opcode::SStore, &[7, 3]);
        let mut detector = ArbitraryMemoryAccessDetector::new();
        assert_eq!(
            detector.detect(&harness.context(None, &sstore, Some(&taint), 0)),
            Some(Detection::new(61, 0))
        );
    }

    #[test]
    fn small_slot_argument_is_ignored() {
        let harness = harness(U256::from(2u8));
        let taint = sstore_taint();
        let sstore = instruction(61, Opcode::SStore, &[7, 5]);
        let mut detector = ArbitraryMemoryAccessDetector::new();
        assert!(detector.detect(&harness.context(None, &sstore, Some(&taint), 0)).is_none());
    }
}
