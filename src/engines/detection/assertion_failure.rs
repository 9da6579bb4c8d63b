use super::{DetectionContext, Detection, Detector, Severity};
use crate::engines::execution::opcode::Opcode;

/// Reached a designated invalid instruction, i.e. a failed `assert`.
#[derive(Debug, Default)]
pub struct AssertionFailureDetector;

impl AssertionFailureDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Detector for AssertionFailureDetector {
    fn name(&self) -> &'static str {
        "Assertion Failure"
    }

    fn swc_id(&self) -> u32 {
        110
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn reset(&mut self) {}

    fn detect(&mut self, ctx: &DetectionContext<'_>) -> Option<Detection> {
        match ctx.current_instruction.op {
            Opcode::AssertFail | Opcode::Invalid => {
                Some(Detection::new(ctx.current_instruction.pc, ctx.transaction_index))
            }
            _ => None,
        }
    }
}
