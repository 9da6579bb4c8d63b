use alloy_primitives::{hex, Address, U256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallKind {
    Call,
    StaticCall,
}

/// Origin of a symbolic input.
///
/// The textual form is what solvers see as constant names, e.g.
/// `calldataload_2_0` for parameter 0 of transaction 2. [`fmt::Display`] and
/// [`FromStr`] are exact inverses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymbolicVariable {
    CallDataLoad { tx: usize, param: usize },
    CallDataCopy { tx: usize, param: usize },
    InputArraySize { tx: usize, param: usize },
    CallDataSize { tx: usize },
    CallValue { tx: usize },
    Caller { tx: usize },
    Gas { tx: usize },
    Balance { tx: usize },
    BlockHash { tx: usize },
    Coinbase { tx: usize },
    Timestamp { tx: usize },
    BlockNumber { tx: usize },
    Difficulty { tx: usize },
    GasLimit { tx: usize },
    Call {
        kind: CallKind,
        tx: usize,
        address: Address,
        result: Option<U256>,
        pc: usize,
    },
    ExtCodeSize {
        tx: usize,
        address: Address,
        result: Option<U256>,
    },
    ReturnDataSize {
        tx: usize,
        address: Address,
        size: U256,
    },
    /// Untainted subtraction that wrapped, named after its program counter.
    Underflow { pc: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown symbolic variable `{0}`")]
pub struct UnknownVariable(pub String);

impl SymbolicVariable {
    pub fn transaction_index(&self) -> Option<usize> {
        use SymbolicVariable::*;
        match self {
            CallDataLoad { tx, .. }
            | CallDataCopy { tx, .. }
            | InputArraySize { tx, .. }
            | CallDataSize { tx }
            | CallValue { tx }
            | Caller { tx }
            | Gas { tx }
            | Balance { tx }
            | BlockHash { tx }
            | Coinbase { tx }
            | Timestamp { tx }
            | BlockNumber { tx }
            | Difficulty { tx }
            | GasLimit { tx }
            | Call { tx, .. }
            | ExtCodeSize { tx, .. }
            | ReturnDataSize { tx, .. } => Some(*tx),
            Underflow { .. } => None,
        }
    }

    pub fn is_block_context(&self) -> bool {
        matches!(
            self,
            SymbolicVariable::BlockHash { .. }
                | SymbolicVariable::Coinbase { .. }
                | SymbolicVariable::Timestamp { .. }
                | SymbolicVariable::BlockNumber { .. }
                | SymbolicVariable::Difficulty { .. }
                | SymbolicVariable::GasLimit { .. }
        )
    }

    pub fn is_calldata(&self) -> bool {
        matches!(
            self,
            SymbolicVariable::CallDataLoad { .. } | SymbolicVariable::CallDataCopy { .. }
        )
    }
}

fn format_word(value: &Option<U256>) -> String {
    value.map(|v| format!("{:#x}", v)).unwrap_or_default()
}

fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address))
}

impl fmt::Display for SymbolicVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SymbolicVariable::*;
        match self {
            CallDataLoad { tx, param } => write!(f, "calldataload_{}_{}", tx, param),
            CallDataCopy { tx, param } => write!(f, "calldatacopy_{}_{}", tx, param),
            InputArraySize { tx, param } => write!(f, "inputarraysize_{}_{}", tx, param),
            CallDataSize { tx } => write!(f, "calldatasize_{}", tx),
            CallValue { tx } => write!(f, "callvalue_{}", tx),
            Caller { tx } => write!(f, "caller_{}", tx),
            Gas { tx } => write!(f, "gas_{}", tx),
            Balance { tx } => write!(f, "balance_{}", tx),
            BlockHash { tx } => write!(f, "blockhash_{}", tx),
            Coinbase { tx } => write!(f, "coinbase_{}", tx),
            Timestamp { tx } => write!(f, "timestamp_{}", tx),
            BlockNumber { tx } => write!(f, "blocknumber_{}", tx),
            Difficulty { tx } => write!(f, "difficulty_{}", tx),
            GasLimit { tx } => write!(f, "gaslimit_{}", tx),
            Call {
                kind,
                tx,
                address,
                result,
                pc,
            } => {
                let prefix = match kind {
                    CallKind::Call => "call",
                    CallKind::StaticCall => "staticcall",
                };
                write!(
                    f,
                    "{}_{}_{}_{}_{}",
                    prefix,
                    tx,
                    format_address(address),
                    format_word(result),
                    pc
                )
            }
            ExtCodeSize {
                tx,
                address,
                result,
            } => write!(
                f,
                "extcodesize_{}_{}_{}",
                tx,
                format_address(address),
                format_word(result)
            ),
            ReturnDataSize { tx, address, size } => write!(
                f,
                "returndatasize_{}_{}_{:#x}",
                tx,
                format_address(address),
                size
            ),
            Underflow { pc } => write!(f, "underflow_{:#x}", pc),
        }
    }
}

impl FromStr for SymbolicVariable {
    type Err = UnknownVariable;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownVariable(s.to_string());
        let parts: Vec<&str> = s.split('_').collect();

        let index = |i: usize| -> Result<usize, UnknownVariable> {
            parts.get(i).and_then(|p| p.parse().ok()).ok_or_else(unknown)
        };
        let address = |i: usize| -> Result<Address, UnknownVariable> {
            parts.get(i).and_then(|p| p.parse().ok()).ok_or_else(unknown)
        };
        let word = |i: usize| -> Result<Option<U256>, UnknownVariable> {
            match parts.get(i) {
                Some(p) if p.is_empty() => Ok(None),
                Some(p) => p.parse::<U256>().map(Some).map_err(|_| unknown()),
                None => Err(unknown()),
            }
        };
        let expect_len = |n: usize| -> Result<(), UnknownVariable> {
            if parts.len() == n {
                Ok(())
            } else {
                Err(unknown())
            }
        };

        use SymbolicVariable::*;
        let variable = match parts[0] {
            "calldataload" | "calldatacopy" | "inputarraysize" => {
                expect_len(3)?;
                let (tx, param) = (index(1)?, index(2)?);
                match parts[0] {
                    "calldataload" => CallDataLoad { tx, param },
                    "calldatacopy" => CallDataCopy { tx, param },
                    _ => InputArraySize { tx, param },
                }
            }
            "balance" if parts.len() == 1 => Balance { tx: 0 },
            "calldatasize" | "callvalue" | "caller" | "gas" | "balance" | "blockhash"
            | "coinbase" | "timestamp" | "blocknumber" | "difficulty" | "gaslimit" => {
                expect_len(2)?;
                let tx = index(1)?;
                match parts[0] {
                    "calldatasize" => CallDataSize { tx },
                    "callvalue" => CallValue { tx },
                    "caller" => Caller { tx },
                    "gas" => Gas { tx },
                    "balance" => Balance { tx },
                    "blockhash" => BlockHash { tx },
                    "coinbase" => Coinbase { tx },
                    "timestamp" => Timestamp { tx },
                    "blocknumber" => BlockNumber { tx },
                    "difficulty" => Difficulty { tx },
                    _ => GasLimit { tx },
                }
            }
            "call" | "staticcall" => {
                expect_len(5)?;
                Call {
                    kind: if parts[0] == "call" {
                        CallKind::Call
                    } else {
                        CallKind::StaticCall
                    },
                    tx: index(1)?,
                    address: address(2)?,
                    result: word(3)?,
                    pc: index(4)?,
                }
            }
            "extcodesize" => {
                expect_len(4)?;
                ExtCodeSize {
                    tx: index(1)?,
                    address: address(2)?,
                    result: word(3)?,
                }
            }
            "returndatasize" => {
                expect_len(4)?;
                ReturnDataSize {
                    tx: index(1)?,
                    address: address(2)?,
                    size: word(3)?.ok_or_else(unknown)?,
                }
            }
            "underflow" => {
                expect_len(2)?;
                let raw = parts[1].strip_prefix("0x").ok_or_else(unknown)?;
                Underflow {
                    pc: usize::from_str_radix(raw, 16).map_err(|_| unknown())?,
                }
            }
            _ => return Err(unknown()),
        };
        Ok(variable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(variable: SymbolicVariable) {
        let name = variable.to_string();
        assert_eq!(name.parse::<SymbolicVariable>().unwrap(), variable, "{}", name);
    }

    #[test]
    fn names_are_lossless() {
        let address = Address::repeat_byte(0xab);
        round_trip(SymbolicVariable::CallDataLoad { tx: 2, param: 0 });
        round_trip(SymbolicVariable::InputArraySize { tx: 0, param: 3 });
        round_trip(SymbolicVariable::GasLimit { tx: 4 });
        round_trip(SymbolicVariable::Call {
            kind: CallKind::StaticCall,
            tx: 1,
            address,
            result: None,
            pc: 77,
        });
        round_trip(SymbolicVariable::Call {
            kind: CallKind::Call,
            tx: 1,
            address,
            result: Some(U256::from(1u8)),
            pc: 12,
        });
        round_trip(SymbolicVariable::ExtCodeSize {
            tx: 0,
            address,
            result: Some(U256::ZERO),
        });
        round_trip(SymbolicVariable::ReturnDataSize {
            tx: 3,
            address,
            size: U256::from(32u8),
        });
        round_trip(SymbolicVariable::Underflow { pc: 0x1a2 });
    }

    #[test]
    fn calldataload_spelling() {
        assert_eq!(
            SymbolicVariable::CallDataLoad { tx: 2, param: 0 }.to_string(),
            "calldataload_2_0"
        );
    }

    #[test]
    fn rejects_unknown_names() {
        assert!("storage_1".parse::<SymbolicVariable>().is_err());
        assert!("calldataload_x_0".parse::<SymbolicVariable>().is_err());
        assert!("caller_1_2".parse::<SymbolicVariable>().is_err());
    }
}
