//! EVM-facing half of the fuzzer: trace replay, taint tracking and branch
//! solving.

pub mod analyzer;
pub mod cfg;
pub mod environment;
pub mod evm;
pub mod expr;
pub mod opcode;
pub mod solver;
pub mod symbolic;
pub mod symvar;
pub mod taint;
#[cfg(feature = "z3")]
pub mod z3_solver;

pub use analyzer::{AnalyzerSettings, ExecutionTraceAnalyzer, StepOutcome};
pub use cfg::ControlFlowGraph;
pub use environment::FuzzingEnvironment;
pub use evm::{ChildExecution, EvmEngine, ExecutionResult, Instruction};
pub use opcode::Opcode;
pub use solver::{ConstraintSolver, Model, NullSolver, Objective, SolverOutcome};
pub use symvar::SymbolicVariable;
#[cfg(feature = "z3")]
pub use z3_solver::Z3Solver;
