// src/engines/metrics/coverage.rs
use crate::engines::execution::environment::FuzzingEnvironment;
use serde::{Deserialize, Serialize};

/// Coverage counters of the contract under test at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageMetrics {
    pub covered_pcs: usize,
    pub total_pcs: usize,
    pub code_coverage: f64,
    pub covered_branches: usize,
    pub total_branches: usize,
    pub branch_coverage: f64,
    pub covered_pcs_with_children: usize,
    pub total_pcs_with_children: usize,
    pub code_coverage_with_children: f64,
}

impl CoverageMetrics {
    pub fn calculate(env: &FuzzingEnvironment) -> Self {
        let covered_pcs = env.code_coverage.len();
        let total_pcs = env.cfg.instruction_count();

        // Both sides of every JUMPI are a branch.
        let covered_branches = env.visited_branches.values().map(|sides| sides.len()).sum();
        let total_branches = env.cfg.jumpis().len() * 2;

        let covered_pcs_with_children = covered_pcs
            + env
                .children_code_coverage
                .values()
                .map(|pcs| pcs.len())
                .sum::<usize>();
        let total_pcs_with_children = env.overall_pcs_with_children;

        Self {
            covered_pcs,
            total_pcs,
            code_coverage: percentage(covered_pcs, total_pcs),
            covered_branches,
            total_branches,
            branch_coverage: percentage(covered_branches, total_branches),
            covered_pcs_with_children,
            total_pcs_with_children,
            code_coverage_with_children: percentage(covered_pcs_with_children, total_pcs_with_children),
        }
    }
}

pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64) * 100.0
}
