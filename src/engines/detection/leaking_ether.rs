use super::{DetectionContext, Detection, Detector, Severity};
use crate::engines::execution::opcode::Opcode;
use crate::engines::execution::symvar::SymbolicVariable;
use crate::types::word_to_address;
use alloy_primitives::Address;
use std::collections::{BTreeMap, BTreeSet};

/// Ether sent to the attacker calling the contract, who never paid in and
/// was never registered by a trusted account.
#[derive(Debug, Default)]
pub struct LeakingEtherDetector {
    leaks: BTreeMap<usize, Detection>,
    spenders: BTreeSet<Address>,
}

impl LeakingEtherDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Some trusted sender earlier in the sequence passed an attacker
    /// address as an argument.
    fn attacker_registered(ctx: &DetectionContext<'_>) -> bool {
        (0..ctx.transaction_index).any(|i| {
            let trusted_sender = ctx
                .transaction(i)
                .map(|tx| !ctx.accounts.is_attacker(&tx.from))
                .unwrap_or(false);
            trusted_sender
                && ctx.gene(i).is_some_and(|gene| {
                    gene.arguments.iter().any(|argument| {
                        ctx.accounts
                            .attackers
                            .iter()
                            .any(|attacker| argument.contains_address(attacker))
                    })
                })
        })
    }
}

impl Detector for LeakingEtherDetector {
    fn name(&self) -> &'static str {
        "Leaking Ether"
    }

    fn swc_id(&self) -> u32 {
        105
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn reset(&mut self) {
        self.leaks.clear();
        self.spenders.clear();
    }

    fn detect(&mut self, ctx: &DetectionContext<'_>) -> Option<Detection> {
        let tx = ctx.current_transaction()?;
        match ctx.current_instruction.op {
            Opcode::Stop => {
                if !tx.value.is_zero() {
                    self.spenders.insert(tx.from);
                }
                if let Some(leak) = self.leaks.get(&ctx.transaction_index) {
                    if !self.spenders.contains(&tx.from) {
                        return Some(leak.clone());
                    }
                }
            }
            Opcode::Call => {
                let to = word_to_address(ctx.word(1)?);
                if !ctx.accounts.is_attacker(&to) || to != tx.from {
                    return None;
                }
                let sends_value = ctx.word(2).is_some_and(|v| !v.is_zero())
                    || ctx
                        .taint(2)
                        .is_some_and(|expr| expr.mentions(|v| matches!(v, SymbolicVariable::Balance { .. })));
                if sends_value && !self.spenders.contains(&to) && !Self::attacker_registered(ctx) {
                    self.leaks.insert(
                        ctx.transaction_index,
                        Detection::new(ctx.current_instruction.pc, ctx.transaction_index),
                    );
                }
            }
            _ => {}
        }
        None
    }
}
