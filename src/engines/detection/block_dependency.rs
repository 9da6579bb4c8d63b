use super::{DetectionContext, Detection, Detector, Severity};
use crate::engines::execution::expr::Expr;
use crate::engines::execution::opcode::Opcode;
use crate::engines::execution::symvar::SymbolicVariable;

/// Ether transfer or a sensitive operation guarded by block context values.
#[derive(Debug, Default)]
pub struct BlockDependencyDetector {
    block_instruction: Option<Detection>,
    block_dependency: bool,
}

impl BlockDependencyDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

fn depends_on_block(expr: &Expr) -> bool {
    expr.mentions(SymbolicVariable::is_block_context)
}

impl Detector for BlockDependencyDetector {
    fn name(&self) -> &'static str {
        "Block Dependency"
    }

    fn swc_id(&self) -> u32 {
        120
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn reset(&mut self) {
        self.block_instruction = None;
        self.block_dependency = false;
    }

    fn detect(&mut self, ctx: &DetectionContext<'_>) -> Option<Detection> {
        let op = ctx.current_instruction.op;
        let sends_value = op == Opcode::Call
            && (ctx.word(2).map(|v| !v.is_zero()).unwrap_or(false) || ctx.is_tainted(2));
        let sensitive = matches!(
            op,
            Opcode::StaticCall | Opcode::SelfDestruct | Opcode::Create | Opcode::DelegateCall
        );

        if sends_value || sensitive {
            if ctx
                .previous_branch
                .iter()
                .any(|predicate| depends_on_block(&predicate.condition))
            {
                self.block_dependency = true;
            }
        } else if op.is_comparison() {
            if [0, 1]
                .iter()
                .filter_map(|n| ctx.taint(*n))
                .any(|expr| depends_on_block(expr))
            {
                self.block_dependency = true;
            }
        } else if op.is_block_context() {
            self.block_instruction = Some(Detection::new(
                ctx.current_instruction.pc,
                ctx.transaction_index,
            ));
        }

        if self.block_dependency && matches!(op, Opcode::Stop | Opcode::SelfDestruct | Opcode::Return) {
            return self.block_instruction.clone();
        }
        None
    }
}
