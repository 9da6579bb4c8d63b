use super::arbitrary_memory_access::ArbitraryMemoryAccessDetector;
use super::assertion_failure::AssertionFailureDetector;
use super::block_dependency::BlockDependencyDetector;
use super::integer_overflow::IntegerOverflowDetector;
use super::leaking_ether::LeakingEtherDetector;
use super::locking_ether::LockingEtherDetector;
use super::reentrancy::ReentrancyDetector;
use super::transaction_order_dependency::TransactionOrderDependencyDetector;
use super::unchecked_return_value::UncheckedReturnValueDetector;
use super::unprotected_selfdestruct::UnprotectedSelfdestructDetector;
use super::unsafe_delegatecall::UnsafeDelegatecallDetector;
use super::{DetectionContext, Detector, Finding};
use crate::engines::execution::symvar::SymbolicVariable;

/// Output of one instruction's pass over every detector.
#[derive(Debug, Default)]
pub struct DetectorOutput {
    pub findings: Vec<Finding>,
    pub taint_requests: Vec<SymbolicVariable>,
}

/// Owns the detector bank and fans each instruction out to it.
pub struct DetectorExecutor {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorExecutor {
    pub fn new() -> Self {
        Self::with_detectors(vec![
            Box::new(IntegerOverflowDetector::new()),
            Box::new(AssertionFailureDetector::new()),
            Box::new(ArbitraryMemoryAccessDetector::new()),
            Box::new(ReentrancyDetector::new()),
            Box::new(TransactionOrderDependencyDetector::new()),
            Box::new(BlockDependencyDetector::new()),
            Box::new(UncheckedReturnValueDetector::new()),
            Box::new(UnprotectedSelfdestructDetector::new()),
            Box::new(UnsafeDelegatecallDetector::new()),
            Box::new(LeakingEtherDetector::new()),
            Box::new(LockingEtherDetector::new()),
        ])
    }

    pub fn with_detectors(detectors: Vec<Box<dyn Detector>>) -> Self {
        Self { detectors }
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Reset every detector before replaying a new individual.
    pub fn initialize_detectors(&mut self) {
        for detector in &mut self.detectors {
            detector.reset();
        }
    }

    pub fn run_detectors(&mut self, ctx: &DetectionContext<'_>, elapsed_secs: f64) -> DetectorOutput {
        let mut output = DetectorOutput::default();
        for detector in &mut self.detectors {
            if let Some(detection) = detector.detect(ctx) {
                output.findings.push(Finding {
                    swc_id: detector.swc_id(),
                    detector: detector.name().to_string(),
                    severity: detector.severity(),
                    program_counter: detection.pc,
                    transaction_index: detection.transaction_index,
                    kind: detection.kind.map(str::to_string),
                    individual: ctx.individual.hash().to_string(),
                    transactions: ctx
                        .individual
                        .solution()
                        .iter()
                        .filter_map(|decoded| decoded.as_ref().ok())
                        .map(|test| test.transaction.clone())
                        .collect(),
                    time: elapsed_secs,
                });
            }
            if let Some(variable) = detector.take_taint_request() {
                output.taint_requests.push(variable);
            }
        }
        output
    }
}

impl Default for DetectorExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::detection::test_support::*;
    use crate::engines::execution::opcode::Opcode;
    use alloy_primitives::Address;

    #[test]
    fn registers_the_full_bank() {
        let executor = DetectorExecutor::new();
        assert_eq!(executor.len(), 11);
        assert!(executor.names().contains(&"Reentrancy"));
    }

    #[test]
    fn findings_carry_the_replayable_sequence() {
        let user = Address::repeat_byte(1);
        let harness = Harness::new(
            individual(vec![gene(user, "f()", vec![], 0), gene(user, "g()", vec![], 0)]),
            accounts(&[], &[user]),
        );
        let mut executor = DetectorExecutor::new();
        executor.initialize_detectors();
        let assert_fail = instruction(7, Opcode::AssertFail, &[]);
        let output = executor.run_detectors(&harness.context(None, &assert_fail, None, 1), 1.5);
        assert_eq!(output.findings.len(), 1);
        let finding = &output.findings[0];
        assert_eq!(finding.swc_id, 110);
        assert_eq!(finding.transaction_index, 1);
        assert_eq!(finding.transactions.len(), 2);
        assert_eq!(finding.individual, harness.individual.hash());
    }
}
