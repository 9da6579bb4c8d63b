use super::{DetectionContext, Detection, Detector, Severity};
use crate::engines::execution::expr::Expr;
use crate::engines::execution::opcode::Opcode;
use crate::engines::execution::symvar::SymbolicVariable;
use alloy_primitives::U256;
use std::collections::BTreeMap;

/// Result of an external call, or the data it returned, never inspected
/// before the transaction ends.
#[derive(Debug, Default)]
pub struct UncheckedReturnValueDetector {
    /// Call-result variables not yet consumed by a JUMPI.
    exceptions: BTreeMap<SymbolicVariable, Detection>,
    /// Return-data offset of calls with input, by offset.
    external_function_calls: BTreeMap<U256, Detection>,
}

impl UncheckedReturnValueDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Detector for UncheckedReturnValueDetector {
    fn name(&self) -> &'static str {
        "Unchecked Return Value"
    }

    fn swc_id(&self) -> u32 {
        104
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn reset(&mut self) {
        self.exceptions.clear();
        self.external_function_calls.clear();
    }

    fn detect(&mut self, ctx: &DetectionContext<'_>) -> Option<Detection> {
        let current = ctx.current_instruction;
        let terminal = matches!(current.op, Opcode::Return | Opcode::Stop | Opcode::SelfDestruct);

        let after_call = ctx
            .previous_instruction
            .filter(|previous| previous.op.is_call());
        if let Some(previous) = after_call {
            if ctx.word(0) == Some(U256::from(1u8)) {
                if let Some(Expr::Var(variable)) = ctx.taint(0).map(|expr| expr.as_ref()) {
                    self.exceptions.insert(
                        variable.clone(),
                        Detection::new(previous.pc, ctx.transaction_index),
                    );
                }
            }
        } else if current.op == Opcode::JumpI && !self.exceptions.is_empty() {
            if let Some(condition) = ctx.taint(1) {
                for variable in condition.variables() {
                    self.exceptions.remove(&variable);
                }
            }
        } else if terminal {
            if let Some(detection) = self.exceptions.values().next() {
                return Some(detection.clone());
            }
        }

        if current.op == Opcode::Call {
            if ctx.word(4).is_some_and(|size| !size.is_zero()) {
                if let Some(offset) = ctx.word(5) {
                    self.external_function_calls
                        .insert(offset, Detection::new(current.pc, ctx.transaction_index));
                }
            }
        } else if current.op == Opcode::MLoad {
            if let Some(offset) = ctx.word(0) {
                self.external_function_calls.remove(&offset);
            }
        } else if terminal {
            if let Some(detection) = self.external_function_calls.values().next() {
                return Some(detection.clone());
            }
        }
        None
    }
}
