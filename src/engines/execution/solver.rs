use super::expr::BranchPredicate;
use super::symvar::SymbolicVariable;
use alloy_primitives::U256;
use std::collections::BTreeMap;

/// Satisfying assignment keyed by symbolic variable name.
pub type Model = BTreeMap<String, U256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolverOutcome {
    Sat(Model),
    Unsat,
    Unknown,
}

impl SolverOutcome {
    pub fn model(self) -> Option<Model> {
        match self {
            SolverOutcome::Sat(model) => Some(model),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    Minimize,
    Maximize,
}

/// Bit-vector constraint solver over 256-bit words.
pub trait ConstraintSolver {
    fn check(&mut self, assertions: &[BranchPredicate]) -> SolverOutcome;

    fn optimize(
        &mut self,
        assertions: &[BranchPredicate],
        variable: &SymbolicVariable,
        objective: Objective,
    ) -> SolverOutcome;
}

/// Solver that never finds a model. Used when constraint solving is off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSolver;

impl ConstraintSolver for NullSolver {
    fn check(&mut self, _assertions: &[BranchPredicate]) -> SolverOutcome {
        SolverOutcome::Unknown
    }

    fn optimize(
        &mut self,
        _assertions: &[BranchPredicate],
        _variable: &SymbolicVariable,
        _objective: Objective,
    ) -> SolverOutcome {
        SolverOutcome::Unknown
    }
}
