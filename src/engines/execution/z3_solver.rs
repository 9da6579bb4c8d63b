use super::expr::{BinaryOp, BranchPredicate, Expr, UnaryOp};
use super::solver::{ConstraintSolver, Model, Objective, SolverOutcome};
use super::symvar::SymbolicVariable;
use crate::config::FuzzingConfig;
use alloy_primitives::U256;
use std::collections::BTreeMap;
use z3::ast::{Ast, Bool, BV};
use z3::{Config, Context, Model as Z3Model, Optimize, Params, SatResult, Solver};

const WIDTH: u32 = 256;

/// [`ConstraintSolver`] backed by Z3's bit-vector theory.
#[derive(Debug, Clone)]
pub struct Z3Solver {
    timeout_ms: u64,
}

impl Z3Solver {
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout_ms }
    }

    fn params<'ctx>(&self, ctx: &'ctx Context) -> Params<'ctx> {
        let mut params = Params::new(ctx);
        params.set_u32("timeout", self.timeout_ms.min(u32::MAX as u64) as u32);
        params
    }
}

impl Default for Z3Solver {
    fn default() -> Self {
        Self::from(&FuzzingConfig::default())
    }
}

impl From<&FuzzingConfig> for Z3Solver {
    fn from(config: &FuzzingConfig) -> Self {
        Self::new(config.solver_timeout_ms)
    }
}

impl ConstraintSolver for Z3Solver {
    fn check(&mut self, assertions: &[BranchPredicate]) -> SolverOutcome {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let solver = Solver::new(&ctx);
        solver.set_params(&self.params(&ctx));

        let mut vars = BTreeMap::new();
        for assertion in assertions {
            solver.assert(&predicate_to_bool(&ctx, assertion, &mut vars));
        }

        match solver.check() {
            SatResult::Sat => match solver.get_model() {
                Some(model) => SolverOutcome::Sat(extract_model(&model, &vars)),
                None => SolverOutcome::Unknown,
            },
            SatResult::Unsat => SolverOutcome::Unsat,
            SatResult::Unknown => SolverOutcome::Unknown,
        }
    }

    fn optimize(
        &mut self,
        assertions: &[BranchPredicate],
        variable: &SymbolicVariable,
        objective: Objective,
    ) -> SolverOutcome {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let optimizer = Optimize::new(&ctx);
        optimizer.set_params(&self.params(&ctx));

        let mut vars = BTreeMap::new();
        for assertion in assertions {
            optimizer.assert(&predicate_to_bool(&ctx, assertion, &mut vars));
        }
        let target = variable_bv(&ctx, variable, &mut vars);
        match objective {
            Objective::Minimize => optimizer.minimize(&target),
            Objective::Maximize => optimizer.maximize(&target),
        }

        match optimizer.check(&[]) {
            SatResult::Sat => match optimizer.get_model() {
                Some(model) => SolverOutcome::Sat(extract_model(&model, &vars)),
                None => SolverOutcome::Unknown,
            },
            SatResult::Unsat => SolverOutcome::Unsat,
            SatResult::Unknown => SolverOutcome::Unknown,
        }
    }
}

fn variable_bv<'ctx>(
    ctx: &'ctx Context,
    variable: &SymbolicVariable,
    vars: &mut BTreeMap<String, BV<'ctx>>,
) -> BV<'ctx> {
    let name = variable.to_string();
    vars.entry(name.clone())
        .or_insert_with(|| BV::new_const(ctx, name, WIDTH))
        .clone()
}

fn predicate_to_bool<'ctx>(
    ctx: &'ctx Context,
    predicate: &BranchPredicate,
    vars: &mut BTreeMap<String, BV<'ctx>>,
) -> Bool<'ctx> {
    let condition = expr_to_bv(ctx, &predicate.condition, vars);
    let is_zero = condition._eq(&zero(ctx));
    if predicate.nonzero {
        is_zero.not()
    } else {
        is_zero
    }
}

fn zero(ctx: &Context) -> BV<'_> {
    BV::from_u64(ctx, 0, WIDTH)
}

fn one(ctx: &Context) -> BV<'_> {
    BV::from_u64(ctx, 1, WIDTH)
}

fn flag<'ctx>(ctx: &'ctx Context, condition: Bool<'ctx>) -> BV<'ctx> {
    condition.ite(&one(ctx), &zero(ctx))
}

pub fn bv_from_u256(ctx: &Context, value: U256) -> BV<'_> {
    let limbs = value.as_limbs();
    BV::from_u64(ctx, limbs[3], 64)
        .concat(&BV::from_u64(ctx, limbs[2], 64))
        .concat(&BV::from_u64(ctx, limbs[1], 64))
        .concat(&BV::from_u64(ctx, limbs[0], 64))
}

fn expr_to_bv<'ctx>(ctx: &'ctx Context, expr: &Expr, vars: &mut BTreeMap<String, BV<'ctx>>) -> BV<'ctx> {
    match expr {
        Expr::Var(variable) => variable_bv(ctx, variable, vars),
        Expr::Const(value) => bv_from_u256(ctx, *value),
        Expr::Unary(UnaryOp::Not, e) => expr_to_bv(ctx, e, vars).bvnot(),
        Expr::Unary(UnaryOp::IsZero, e) => {
            let inner = expr_to_bv(ctx, e, vars);
            flag(ctx, inner._eq(&zero(ctx)))
        }
        Expr::Binary(op, a, b) => {
            let a = expr_to_bv(ctx, a, vars);
            let b = expr_to_bv(ctx, b, vars);
            let b_is_zero = b._eq(&zero(ctx));
            match op {
                BinaryOp::Add => a.bvadd(&b),
                BinaryOp::Sub => a.bvsub(&b),
                BinaryOp::Mul => a.bvmul(&b),
                BinaryOp::Div => b_is_zero.ite(&zero(ctx), &a.bvudiv(&b)),
                BinaryOp::SDiv => b_is_zero.ite(&zero(ctx), &a.bvsdiv(&b)),
                BinaryOp::Mod => b_is_zero.ite(&zero(ctx), &a.bvurem(&b)),
                BinaryOp::SMod => b_is_zero.ite(&zero(ctx), &a.bvsrem(&b)),
                BinaryOp::Lt => flag(ctx, a.bvult(&b)),
                BinaryOp::Gt => flag(ctx, a.bvugt(&b)),
                BinaryOp::Slt => flag(ctx, a.bvslt(&b)),
                BinaryOp::Sgt => flag(ctx, a.bvsgt(&b)),
                BinaryOp::Eq => flag(ctx, a._eq(&b)),
                BinaryOp::And => a.bvand(&b),
                BinaryOp::Or => a.bvor(&b),
                BinaryOp::Xor => a.bvxor(&b),
                BinaryOp::Shl => b.bvshl(&a),
                BinaryOp::Shr => b.bvlshr(&a),
                BinaryOp::Sar => b.bvashr(&a),
                // No bit-vector counterpart; left unconstrained.
                BinaryOp::Exp | BinaryOp::SignExtend | BinaryOp::Byte => {
                    BV::fresh_const(ctx, "opaque", WIDTH)
                }
            }
        }
        Expr::Keccak(_) => BV::fresh_const(ctx, "keccak", WIDTH),
    }
}

fn extract_model(model: &Z3Model<'_>, vars: &BTreeMap<String, BV<'_>>) -> Model {
    vars.iter()
        .filter_map(|(name, bv)| {
            let value = model.eval(bv, true)?;
            u256_from_bv(&value).map(|v| (name.clone(), v))
        })
        .collect()
}

fn u256_from_bv(bv: &BV<'_>) -> Option<U256> {
    let simplified = bv.simplify();
    if let Some(value) = simplified.as_u64() {
        return Some(U256::from(value));
    }
    let text = simplified.to_string();
    if let Some(hex) = text.strip_prefix("#x") {
        return U256::from_str_radix(hex, 16).ok();
    }
    if let Some(bin) = text.strip_prefix("#b") {
        return U256::from_str_radix(bin, 2).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_negated_comparison() {
        let x = Expr::var(SymbolicVariable::CallDataLoad { tx: 1, param: 0 });
        let guard = Expr::binary(BinaryOp::Gt, Expr::constant(U256::from(100u64)), x);
        // 100 > x was true; ask for the other side.
        let predicate = BranchPredicate::new(guard, false);
        let model = Z3Solver::default().check(&[predicate]).model().unwrap();
        assert!(model["calldataload_1_0"] >= U256::from(100u64));
    }
}
