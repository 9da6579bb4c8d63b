use super::{DetectionContext, Detection, Detector, Severity};
use crate::engines::execution::expr::Expr;
use crate::engines::execution::opcode::Opcode;
use crate::engines::execution::symvar::SymbolicVariable;
use crate::types::AbiType;
use std::collections::HashMap;
use std::sync::Arc;

const OVERFLOW: &str = "overflow";
const UNDERFLOW: &str = "underflow";

/// Arithmetic whose concrete result wrapped around, on a value that later
/// reaches storage, an ether transfer or a comparison.
#[derive(Debug, Default)]
pub struct IntegerOverflowDetector {
    overflows: HashMap<Arc<Expr>, Detection>,
    underflows: HashMap<Arc<Expr>, Detection>,
    /// Set by `NOT; ADD`, the codegen for unary minus; exempts that ADD.
    compiler_value_negation: bool,
    taint_request: Option<SymbolicVariable>,
}

impl IntegerOverflowDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, expr: &Arc<Expr>) -> Option<Detection> {
        if let Some(hit) = self.overflows.get(expr) {
            return Some(hit.clone().with_kind(OVERFLOW));
        }
        self.underflows
            .get(expr)
            .map(|hit| hit.clone().with_kind(UNDERFLOW))
    }

    /// String arguments are hashed or copied, never meaningfully added.
    fn reads_string_argument(ctx: &DetectionContext<'_>, expr: &Expr) -> bool {
        let Some(gene) = ctx.gene(ctx.transaction_index) else {
            return false;
        };
        let Some(types) = ctx.interface.get(&gene.function) else {
            return false;
        };
        expr.variables().iter().any(|variable| match variable {
            SymbolicVariable::CallDataLoad { tx, param } if *tx == ctx.transaction_index => {
                types.get(*param) == Some(&AbiType::String)
            }
            _ => false,
        })
    }

    fn record_arithmetic(&mut self, ctx: &DetectionContext<'_>) {
        let Some(previous) = ctx.previous_instruction else {
            return;
        };
        let current = ctx.current_instruction;
        if previous.op == Opcode::Not && current.op == Opcode::Add {
            self.compiler_value_negation = true;
            return;
        }

        let (Some(a), Some(b), Some(result)) =
            (previous.stack_top(0), previous.stack_top(1), current.stack_top(0))
        else {
            return;
        };
        let user_input = |expr: &Expr| {
            expr.mentions(|v| {
                matches!(v, SymbolicVariable::CallDataLoad { .. } | SymbolicVariable::CallValue { .. })
            })
        };
        let hit = Detection::new(previous.pc, ctx.transaction_index);

        match previous.op {
            Opcode::Add => {
                let negation = std::mem::take(&mut self.compiler_value_negation);
                if a.checked_add(b) == Some(result) || negation {
                    return;
                }
                if let Some(expr) = ctx.taint(0) {
                    if user_input(expr) && !Self::reads_string_argument(ctx, expr) {
                        self.overflows.insert(expr.clone(), hit);
                    }
                }
            }
            Opcode::Mul => {
                if a.checked_mul(b) == Some(result) {
                    return;
                }
                if let Some(expr) = ctx.taint(0) {
                    if user_input(expr) {
                        self.overflows.insert(expr.clone(), hit);
                    }
                }
            }
            Opcode::Sub => {
                if a.checked_sub(b) == Some(result) {
                    return;
                }
                match ctx.taint(0) {
                    Some(expr) => {
                        self.underflows.insert(expr.clone(), hit);
                    }
                    None => {
                        let variable = SymbolicVariable::Underflow { pc: previous.pc };
                        self.underflows.insert(Expr::var(variable.clone()), hit);
                        self.taint_request = Some(variable);
                    }
                }
            }
            _ => {}
        }
    }
}

impl Detector for IntegerOverflowDetector {
    fn name(&self) -> &'static str {
        "Integer Overflow"
    }

    fn swc_id(&self) -> u32 {
        101
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn reset(&mut self) {
        self.overflows.clear();
        self.underflows.clear();
        self.compiler_value_negation = false;
        self.taint_request = None;
    }

    fn detect(&mut self, ctx: &DetectionContext<'_>) -> Option<Detection> {
        self.record_arithmetic(ctx);

        let operands: &[usize] = match ctx.current_instruction.op {
            Opcode::SStore => &[1],
            Opcode::Call => &[2],
            op if op.is_comparison() => &[0, 1],
            _ => &[],
        };
        operands
            .iter()
            .filter_map(|n| ctx.taint(*n))
            .find_map(|expr| self.lookup(expr))
    }

    fn take_taint_request(&mut self) -> Option<SymbolicVariable> {
        self.taint_request.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::detection::test_support::*;
    use crate::engines::execution::evm::Instruction;
    use crate::engines::execution::expr::BinaryOp;
    use crate::types::FunctionId;
    use alloy_primitives::{Address, U256};

    fn harness() -> Harness {
        let user = Address::repeat_byte(1);
        Harness::new(
            individual(vec![gene(user, "add(uint256)", vec![], 0)]),
            accounts(&[], &[user]),
        )
    }

    fn tainted_sum() -> Arc<Expr> {
        Expr::binary(
            BinaryOp::Add,
            Expr::var(SymbolicVariable::CallDataLoad { tx: 0, param: 0 }),
            Expr::constant(U256::from(1u8) << 255),
        )
    }

    #[test]
    fn wrapped_add_reaching_storage() {
        let harness = harness();
        let mut detector = IntegerOverflowDetector::new();
        let half = U256::from(1u8) << 255;
        let add = Instruction::new(14, Opcode::Add, vec![half, half]);
        let push = Instruction::new(15, Opcode::Push1, vec![U256::ZERO]);
        let after = record(vec![Some(tainted_sum())]);
        assert!(detector
            .detect(&harness.context(Some(&add), &push, Some(&after), 0))
            .is_none());

        let sstore = Instruction::new(17, Opcode::SStore, vec![U256::ZERO, U256::ZERO]);
        let store_taint = record(vec![Some(tainted_sum()), None]);
        assert_eq!(
            detector.detect(&harness.context(Some(&push), &sstore, Some(&store_taint), 0)),
            Some(Detection::new(14, 0).with_kind("overflow"))
        );
    }

    #[test]
    fn negation_idiom_is_exempt() {
        let harness = harness();
        let mut detector = IntegerOverflowDetector::new();
        let not = instruction(1, Opcode::Not, &[5]);
        let add = Instruction::new(2, Opcode::Add, vec![U256::from(9u8), U256::MAX - U256::from(4u8)]);
        detector.detect(&harness.context(Some(&not), &add, None, 0));

        let next = instruction(3, Opcode::Dup1, &[4]);
        let taint = record(vec![Some(tainted_sum())]);
        detector.detect(&harness.context(Some(&add), &next, Some(&taint), 0));

        let lt = instruction(4, Opcode::Lt, &[4, 4]);
        let cmp_taint = record(vec![None, Some(tainted_sum())]);
        assert!(detector.detect(&harness.context(Some(&next), &lt, Some(&cmp_taint), 0)).is_none());
    }

    #[test]
    fn string_arguments_are_skipped() {
        let mut harness = harness();
        harness
            .interface
            .insert(FunctionId::from_signature("add(uint256)"), vec![AbiType::String]);
        let mut detector = IntegerOverflowDetector::new();
        let half = U256::from(1u8) << 255;
        let add = Instruction::new(14, Opcode::Add, vec![half, half]);
        let push = Instruction::new(15, Opcode::Push1, vec![U256::ZERO]);
        let after = record(vec![Some(tainted_sum())]);
        detector.detect(&harness.context(Some(&add), &push, Some(&after), 0));
        let sstore = Instruction::new(17, Opcode::SStore, vec![U256::ZERO, U256::ZERO]);
        let store_taint = record(vec![Some(tainted_sum()), None]);
        assert!(detector
            .detect(&harness.context(Some(&push), &sstore, Some(&store_taint), 0))
            .is_none());
    }

    #[test]
    fn untainted_underflow_requests_a_taint() {
        let harness = harness();
        let mut detector = IntegerOverflowDetector::new();
        // 1 - 2
        let sub = instruction(40, Opcode::Sub, &[2, 1]);
        let next = Instruction::new(41, Opcode::Dup1, vec![U256::MAX]);
        detector.detect(&harness.context(Some(&sub), &next, None, 0));
        let requested = detector.take_taint_request();
        assert_eq!(requested, Some(SymbolicVariable::Underflow { pc: 40 }));
        assert!(detector.take_taint_request().is_none());

        let call_taint = record(vec![
            None,
            None,
            None,
            None,
            Some(Expr::var(SymbolicVariable::Underflow { pc: 40 })),
            None,
            None,
        ]);
        let call = instruction(60, Opcode::Call, &[0, 0, 0, 0, 0, 0xaa, 9000]);
        assert_eq!(
            detector.detect(&harness.context(Some(&next), &call, Some(&call_taint), 0)),
            Some(Detection::new(40, 0).with_kind("underflow"))
        );
    }
}
