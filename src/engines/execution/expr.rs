use super::opcode::Opcode;
use super::symvar::SymbolicVariable;
use alloy_primitives::U256;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    IsZero,
}

/// Binary EVM operators. The left operand is the word on top of the stack,
/// which for shifts is the shift amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    SDiv,
    Mod,
    SMod,
    Exp,
    SignExtend,
    Lt,
    Gt,
    Slt,
    Sgt,
    Eq,
    And,
    Or,
    Xor,
    Byte,
    Shl,
    Shr,
    Sar,
}

impl BinaryOp {
    pub fn from_opcode(op: Opcode) -> Option<Self> {
        Some(match op {
            Opcode::Add => BinaryOp::Add,
            Opcode::Sub => BinaryOp::Sub,
            Opcode::Mul => BinaryOp::Mul,
            Opcode::Div => BinaryOp::Div,
            Opcode::SDiv => BinaryOp::SDiv,
            Opcode::Mod => BinaryOp::Mod,
            Opcode::SMod => BinaryOp::SMod,
            Opcode::Exp => BinaryOp::Exp,
            Opcode::SignExtend => BinaryOp::SignExtend,
            Opcode::Lt => BinaryOp::Lt,
            Opcode::Gt => BinaryOp::Gt,
            Opcode::Slt => BinaryOp::Slt,
            Opcode::Sgt => BinaryOp::Sgt,
            Opcode::Eq => BinaryOp::Eq,
            Opcode::And => BinaryOp::And,
            Opcode::Or => BinaryOp::Or,
            Opcode::Xor => BinaryOp::Xor,
            Opcode::Byte => BinaryOp::Byte,
            Opcode::Shl => BinaryOp::Shl,
            Opcode::Shr => BinaryOp::Shr,
            Opcode::Sar => BinaryOp::Sar,
            _ => return None,
        })
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "bvadd",
            BinaryOp::Sub => "bvsub",
            BinaryOp::Mul => "bvmul",
            BinaryOp::Div => "bvudiv",
            BinaryOp::SDiv => "bvsdiv",
            BinaryOp::Mod => "bvurem",
            BinaryOp::SMod => "bvsrem",
            BinaryOp::Exp => "exp",
            BinaryOp::SignExtend => "signextend",
            BinaryOp::Lt => "bvult",
            BinaryOp::Gt => "bvugt",
            BinaryOp::Slt => "bvslt",
            BinaryOp::Sgt => "bvsgt",
            BinaryOp::Eq => "=",
            BinaryOp::And => "bvand",
            BinaryOp::Or => "bvor",
            BinaryOp::Xor => "bvxor",
            BinaryOp::Byte => "byte",
            BinaryOp::Shl => "bvshl",
            BinaryOp::Shr => "bvlshr",
            BinaryOp::Sar => "bvashr",
        }
    }
}

/// 256-bit symbolic word built while following tainted values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Var(SymbolicVariable),
    Const(U256),
    Unary(UnaryOp, Arc<Expr>),
    Binary(BinaryOp, Arc<Expr>, Arc<Expr>),
    /// Hash of the listed memory words; opaque to the solver.
    Keccak(Vec<Arc<Expr>>),
}

impl Expr {
    pub fn var(variable: SymbolicVariable) -> Arc<Expr> {
        Arc::new(Expr::Var(variable))
    }

    pub fn constant(value: U256) -> Arc<Expr> {
        Arc::new(Expr::Const(value))
    }

    pub fn binary(op: BinaryOp, lhs: Arc<Expr>, rhs: Arc<Expr>) -> Arc<Expr> {
        Arc::new(Expr::Binary(op, lhs, rhs))
    }

    pub fn unary(op: UnaryOp, operand: Arc<Expr>) -> Arc<Expr> {
        Arc::new(Expr::Unary(op, operand))
    }

    /// Every symbolic variable the expression depends on.
    pub fn variables(&self) -> BTreeSet<SymbolicVariable> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<SymbolicVariable>) {
        match self {
            Expr::Var(v) => {
                out.insert(v.clone());
            }
            Expr::Const(_) => {}
            Expr::Unary(_, e) => e.collect_variables(out),
            Expr::Binary(_, a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
            Expr::Keccak(words) => words.iter().for_each(|w| w.collect_variables(out)),
        }
    }

    pub fn mentions<F>(&self, predicate: F) -> bool
    where
        F: Fn(&SymbolicVariable) -> bool,
    {
        self.variables().iter().any(predicate)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(v) => write!(f, "{}", v),
            Expr::Const(c) => write!(f, "{:#x}", c),
            Expr::Unary(UnaryOp::Not, e) => write!(f, "(bvnot {})", e),
            Expr::Unary(UnaryOp::IsZero, e) => write!(f, "(iszero {})", e),
            Expr::Binary(op, a, b) => write!(f, "({} {} {})", op.symbol(), a, b),
            Expr::Keccak(words) => {
                write!(f, "(keccak")?;
                for word in words {
                    write!(f, " {}", word)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// One branch decision along a path: `condition != 0` or `condition == 0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchPredicate {
    pub condition: Arc<Expr>,
    pub nonzero: bool,
}

impl BranchPredicate {
    pub fn new(condition: Arc<Expr>, nonzero: bool) -> Self {
        Self { condition, nonzero }
    }

    pub fn negate(&self) -> Self {
        Self {
            condition: self.condition.clone(),
            nonzero: !self.nonzero,
        }
    }

    pub fn variables(&self) -> BTreeSet<SymbolicVariable> {
        self.condition.variables()
    }
}

impl fmt::Display for BranchPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let relation = if self.nonzero { "!=" } else { "==" };
        write!(f, "{} {} 0", self.condition, relation)
    }
}
