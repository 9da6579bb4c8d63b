//! Guided symbolic execution: flip branches that were only ever seen going
//! one way and feed the solved inputs back into the generator pools.

use super::environment::{BranchVisit, FuzzingEnvironment};
use super::evm::EvmEngine;
use super::expr::BranchPredicate;
use super::solver::{ConstraintSolver, Model, Objective, SolverOutcome};
use super::symvar::SymbolicVariable;
use crate::engines::generation::generator::Generator;
use crate::engines::generation::generator_set::{GeneratorId, GeneratorSet};
use crate::types::{mask_bits, sign_extend, word_to_address, word_to_usize, AbiType, Field, Gene, Target, Transaction, Value};
use alloy_primitives::{Address, I256, U256};

/// Callers below this value are precompiles or the zero address.
const MIN_CALLER: u64 = 8;

/// Solve the negation of every single-sided tainted branch once.
/// Returns how many branches produced a model.
pub fn symbolic_execution<E, S>(
    env: &mut FuzzingEnvironment,
    generators: &mut GeneratorSet,
    evm: &mut E,
    solver: &mut S,
    account_balance: U256,
) -> usize
where
    E: EvmEngine + ?Sized,
    S: ConstraintSolver + ?Sized,
{
    let candidates: Vec<(usize, BranchVisit)> = env
        .visited_branches
        .iter()
        .filter(|(_, sides)| sides.len() == 1)
        .filter_map(|(pc, sides)| sides.values().next().map(|visit| (*pc, visit.clone())))
        .collect();

    let mut solved = 0;
    for (pc, visit) in candidates {
        let Some(path) = visit.path.as_deref().filter(|path| !path.is_empty()) else {
            log::debug!("No expression for branch at pc {:#x}", pc);
            continue;
        };
        let negated = path[path.len() - 1].negate();
        if env.memoized_symbolic_execution.contains(&negated) {
            continue;
        }

        let mut assertions: Vec<BranchPredicate> = path[..path.len() - 1].to_vec();
        assertions.push(negated.clone());

        match solver.check(&assertions) {
            SolverOutcome::Sat(model) => {
                log::debug!(
                    "({}) Symbolic solution to branch {:#x}: {}",
                    visit.individual_hash,
                    pc,
                    model
                        .iter()
                        .map(|(name, value)| format!("{} ({})", name, value))
                        .collect::<Vec<_>>()
                        .join("; ")
                );
                solved += 1;
                for (name, value) in &model {
                    let variable = match name.parse::<SymbolicVariable>() {
                        Ok(variable) => variable,
                        Err(e) => {
                            log::warn!("{}", e);
                            continue;
                        }
                    };
                    let mut feedback = ModelFeedback {
                        generators: &mut *generators,
                        evm: &mut *evm,
                        solver: &mut *solver,
                        visit: &visit,
                        assertions: &assertions,
                        account_balance,
                    };
                    feedback.apply(&variable, *value);
                }
            }
            SolverOutcome::Unsat => log::debug!("Branch at pc {:#x} is infeasible", pc),
            SolverOutcome::Unknown => log::debug!("Solver gave up on branch at pc {:#x}", pc),
        }
        env.memoized_symbolic_execution.insert(negated);
    }
    solved
}

/// Writes one solved variable back into the pools of the generator owning
/// the transaction it came from.
struct ModelFeedback<'a, E: ?Sized, S: ?Sized> {
    generators: &'a mut GeneratorSet,
    evm: &'a mut E,
    solver: &'a mut S,
    visit: &'a BranchVisit,
    assertions: &'a [BranchPredicate],
    account_balance: U256,
}

impl<E, S> ModelFeedback<'_, E, S>
where
    E: EvmEngine + ?Sized,
    S: ConstraintSolver + ?Sized,
{
    fn apply(&mut self, variable: &SymbolicVariable, value: U256) {
        let Some(tx) = variable.transaction_index() else {
            return;
        };
        let visit = self.visit;
        let Some(gene) = visit.chromosome.get(tx) else {
            log::debug!("{} refers to a transaction the individual does not have", variable);
            return;
        };
        let function = gene.function;
        let owner = self.generators.owner_of(&function, visit.generator);

        use SymbolicVariable::*;
        match variable {
            Balance { .. } => {
                let Some(balance) = self.extremal(variable) else {
                    return;
                };
                if let Some(Target::Call(address)) = &gene.contract {
                    let current = self.evm.get_balance(*address);
                    self.generator(owner).add_balance_to_pool(function, current);
                }
                self.generator(owner).add_balance_to_pool(function, balance);
            }
            BlockNumber { .. } => {
                let current = self.evm.block_number();
                let generator = self.generator(owner);
                generator.add_blocknumber_to_pool(function, current);
                generator.add_blocknumber_to_pool(function, value);
            }
            Timestamp { .. } => {
                let current = self.evm.timestamp();
                let generator = self.generator(owner);
                generator.add_timestamp_to_pool(function, current);
                generator.add_timestamp_to_pool(function, value);
            }
            Call {
                address, result, ..
            } => {
                let generator = self.generator(owner);
                if let Some(old) = result {
                    generator.add_callresult_to_pool(function, *address, *old);
                }
                let flipped = if value.is_zero() { U256::ZERO } else { U256::from(1u8) };
                generator.add_callresult_to_pool(function, *address, flipped);
            }
            Caller { .. } => {
                if value <= U256::from(MIN_CALLER) || value >= (U256::from(1u8) << 160) {
                    return;
                }
                let account = word_to_address(value);
                self.ensure_account(account);
                let generator = self.generator(owner);
                generator.add_account_to_pool(function, gene.account);
                generator.add_account_to_pool(function, account);
            }
            CallDataLoad { param, .. } | CallDataCopy { param, .. } => {
                self.inject_argument(owner, gene, *param, value, matches!(variable, CallDataCopy { .. }));
            }
            CallValue { .. } => {
                let amount = value.min(self.account_balance);
                let generator = self.generator(owner);
                generator.remove_amount_from_pool(function, U256::ZERO);
                generator.remove_amount_from_pool(function, U256::from(1u8));
                generator.add_amount_to_pool(function, gene.amount);
                generator.add_amount_to_pool(function, amount);
            }
            Gas { .. } => {
                let generator = self.generator(owner);
                generator.add_gaslimit_to_pool(function, gene.gaslimit);
                generator.add_gaslimit_to_pool(function, value.saturating_to::<u64>());
            }
            InputArraySize { param, .. } => {
                let Some(size) = self.extremal(variable) else {
                    return;
                };
                let previous = gene.arguments.get(*param).and_then(Value::array_len);
                let generator = self.generator(owner);
                if let Some(previous) = previous {
                    generator.add_parameter_array_size(function, *param, previous);
                }
                generator.add_parameter_array_size(function, *param, word_to_usize(size));
            }
            ExtCodeSize { address, .. } => {
                self.generator(owner)
                    .add_extcodesize_to_pool(function, *address, value);
            }
            ReturnDataSize { address, .. } => {
                self.generator(owner)
                    .add_returndatasize_to_pool(function, *address, value);
            }
            CallDataSize { .. } | BlockHash { .. } | Coinbase { .. } | Difficulty { .. } | GasLimit { .. } => {}
            Underflow { .. } => {}
        }
    }

    fn generator(&mut self, owner: GeneratorId) -> &mut Generator {
        self.generators.get_mut(owner)
    }

    /// Second solve minimizing `variable` under the same assertions.
    fn extremal(&mut self, variable: &SymbolicVariable) -> Option<U256> {
        let model: Model = self
            .solver
            .optimize(self.assertions, variable, Objective::Minimize)
            .model()?;
        model.get(&variable.to_string()).copied()
    }

    fn ensure_account(&mut self, address: Address) {
        ensure_account(&mut *self.evm, address);
    }

    fn inject_argument(
        &mut self,
        owner: GeneratorId,
        gene: &Gene,
        param: usize,
        raw: U256,
        copied: bool,
    ) {
        let function = gene.function;
        let Some(ty) = self
            .generators
            .get(owner)
            .argument_types(&function)
            .and_then(|types| types.get(param))
            .cloned()
        else {
            log::debug!("No parameter {} for function {}", param, function);
            return;
        };
        if copied && !ty.is_array() {
            return;
        }
        let element = match &ty {
            AbiType::Array { .. } => ty.array_dimensions().0.clone(),
            other => other.clone(),
        };
        let old = gene.arguments.get(param).cloned();
        let new = match element {
            AbiType::String => old.clone(),
            _ => value_for_type(&element, raw),
        };
        let Some(new) = new else {
            return;
        };
        if let Value::Address(address) = &new {
            self.ensure_account(*address);
        }

        let generator = self.generators.get_mut(owner);
        if let Some(old) = old {
            generator.add_argument_to_pool(function, param, old);
        }
        generator.add_argument_to_pool(function, param, new);
    }
}

/// Make `address` a funded account of the EVM's base state.
pub fn ensure_account<E: EvmEngine + ?Sized>(evm: &mut E, address: Address) {
    if !evm.has_account(address) {
        evm.restore_from_snapshot();
        evm.create_fake_account(address);
        evm.create_snapshot();
    }
}

/// Interpret a solved 256-bit word as a value of a scalar ABI type.
pub fn value_for_type(ty: &AbiType, raw: U256) -> Option<Value> {
    match ty {
        AbiType::Bool => Some(Value::Bool(!raw.is_zero())),
        AbiType::Uint(bits) => Some(Value::Uint {
            bits: *bits,
            value: mask_bits(raw, *bits),
        }),
        AbiType::Int(bits) => Some(Value::Int {
            bits: *bits,
            value: I256::from_raw(sign_extend(raw, *bits)),
        }),
        AbiType::Address => Some(Value::Address(word_to_address(raw))),
        AbiType::FixedBytes(size) => {
            let word = raw.to_be_bytes::<32>();
            Some(Value::FixedBytes {
                size: *size,
                bytes: word[..(*size).min(32)].to_vec(),
            })
        }
        AbiType::String | AbiType::Bytes | AbiType::Array { .. } => None,
    }
}

/// Negative feedback after a revert: the only input the last branch
/// depended on is dropped from its pool.
pub fn retract_value(
    generators: &mut GeneratorSet,
    individual_generator: GeneratorId,
    chromosome: &[Gene],
    transaction_index: usize,
    transaction: &Transaction,
    variable: &SymbolicVariable,
) {
    let Some(gene) = chromosome.get(transaction_index) else {
        return;
    };
    let function = gene.function;
    let owner = generators.owner_of(&function, individual_generator);

    use SymbolicVariable::*;
    match variable {
        CallDataLoad { tx, param } | CallDataCopy { tx, param } => {
            let Some(source) = chromosome.get(*tx) else {
                return;
            };
            let Some(argument) = source.arguments.get(*param) else {
                return;
            };
            let source_owner = generators.owner_of(&source.function, individual_generator);
            generators
                .get_mut(source_owner)
                .remove_argument_from_pool(source.function, *param, argument);
        }
        CallValue { .. } => {
            if transaction.value <= U256::from(1u8) {
                generators
                    .get_mut(owner)
                    .remove_amount_from_pool(function, transaction.value);
            }
        }
        Caller { .. } => generators
            .get_mut(owner)
            .remove_account_from_pool(function, transaction.from),
        Gas { .. } => generators
            .get_mut(owner)
            .remove_gaslimit_from_pool(function, gene.gaslimit),
        BlockNumber { .. } => {
            if let Field::Value(blocknumber) = gene.blocknumber {
                generators
                    .get_mut(owner)
                    .remove_blocknumber_from_pool(function, blocknumber);
            }
        }
        Balance { .. } => {
            if let Field::Value(balance) = gene.balance {
                generators
                    .get_mut(owner)
                    .remove_balance_from_pool(function, balance);
            }
        }
        Timestamp { .. } => {
            if let Field::Value(timestamp) = gene.timestamp {
                generators
                    .get_mut(owner)
                    .remove_timestamp_from_pool(function, timestamp);
            }
        }
        Call {
            address,
            result: Some(result),
            ..
        } => generators
            .get_mut(owner)
            .remove_callresult_from_pool(function, *address, *result),
        ExtCodeSize {
            address,
            result: Some(size),
            ..
        } => generators
            .get_mut(owner)
            .remove_extcodesize_from_pool(function, *address, *size),
        ReturnDataSize { address, size, .. } => generators
            .get_mut(owner)
            .remove_returndatasize_from_pool(function, *address, *size),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::generation::generator::{ContractSpec, GeneratorSettings};
    use crate::types::{FunctionId, TxTarget};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn reverted_balance_is_retracted_from_its_pool() {
        let spec = ContractSpec::from_signatures("Vault", ["pay()"], Vec::new()).unwrap();
        let main = Generator::new(spec, vec![Address::repeat_byte(0x11)], GeneratorSettings::default()).unwrap();
        let mut generators = GeneratorSet::new(main, Vec::new());
        let pay = FunctionId::from_signature("pay()");
        let mut rng = StdRng::seed_from_u64(2);
        let mut gene = generators.main_mut().generate_individual(pay, &[], &mut rng).remove(0);
        gene.balance = Field::Value(U256::from(5u8));
        generators.main_mut().add_balance_to_pool(pay, U256::from(5u8));

        let transaction = Transaction {
            from: gene.account,
            to: TxTarget::Call(Address::repeat_byte(0xc0)),
            value: U256::ZERO,
            gas_limit: gene.gaslimit,
            data: Vec::new(),
        };
        retract_value(
            &mut generators,
            GeneratorSet::MAIN,
            &[gene],
            0,
            &transaction,
            &SymbolicVariable::Balance { tx: 0 },
        );
        assert_eq!(generators.main_mut().get_random_balance(pay), None);
    }

    #[test]
    fn solved_words_follow_the_parameter_type() {
        let raw = U256::MAX;
        assert_eq!(
            value_for_type(&AbiType::Uint(8), raw),
            Some(Value::Uint {
                bits: 8,
                value: U256::from(255u8)
            })
        );
        assert_eq!(
            value_for_type(&AbiType::Int(16), raw),
            Some(Value::Int {
                bits: 16,
                value: I256::MINUS_ONE
            })
        );
        assert_eq!(value_for_type(&AbiType::Bool, U256::ZERO), Some(Value::Bool(false)));
        assert_eq!(value_for_type(&AbiType::String, raw), None);
    }

    #[test]
    fn fixed_bytes_take_the_high_order_bytes() {
        let raw = U256::from(0xabu8) << 248;
        assert_eq!(
            value_for_type(&AbiType::FixedBytes(2), raw),
            Some(Value::FixedBytes {
                size: 2,
                bytes: vec![0xab, 0x00]
            })
        );
    }
}
