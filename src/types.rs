use crate::error::{EncodeError, FuzzerError};
use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{keccak256, Address, B256, I256, U256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Solidity parameter type, parsed once from its canonical spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbiType {
    Bool,
    Uint(usize),
    Int(usize),
    Address,
    String,
    Bytes,
    FixedBytes(usize),
    Array {
        element: Box<AbiType>,
        size: Option<usize>,
    },
}

impl AbiType {
    pub fn is_array(&self) -> bool {
        matches!(self, AbiType::Array { .. })
    }

    /// Innermost element type together with every array dimension, innermost
    /// first, so `uint8[2][]` yields `(uint8, [Some(2), None])`.
    pub fn array_dimensions(&self) -> (&AbiType, Vec<Option<usize>>) {
        let mut dims = Vec::new();
        let mut current = self;
        while let AbiType::Array { element, size } = current {
            dims.push(*size);
            current = element;
        }
        dims.reverse();
        (current, dims)
    }

    pub fn is_bytes_like(&self) -> bool {
        matches!(self, AbiType::Bytes | AbiType::FixedBytes(_))
    }
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiType::Bool => write!(f, "bool"),
            AbiType::Uint(bits) => write!(f, "uint{}", bits),
            AbiType::Int(bits) => write!(f, "int{}", bits),
            AbiType::Address => write!(f, "address"),
            AbiType::String => write!(f, "string"),
            AbiType::Bytes => write!(f, "bytes"),
            AbiType::FixedBytes(size) => write!(f, "bytes{}", size),
            AbiType::Array { element, size } => match size {
                Some(n) => write!(f, "{}[{}]", element, n),
                None => write!(f, "{}[]", element),
            },
        }
    }
}

fn parse_bits(raw: &str, spelling: &str) -> Result<usize, FuzzerError> {
    if raw.is_empty() {
        return Ok(256);
    }
    let bits: usize = raw
        .parse()
        .map_err(|_| FuzzerError::UnsupportedType(spelling.to_string()))?;
    if bits == 0 || bits > 256 || bits % 8 != 0 {
        return Err(FuzzerError::UnsupportedType(spelling.to_string()));
    }
    Ok(bits)
}

impl FromStr for AbiType {
    type Err = FuzzerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (base, mut rest) = match s.find('[') {
            Some(idx) => (&s[..idx], &s[idx..]),
            None => (s, ""),
        };

        let mut ty = match base {
            "bool" => AbiType::Bool,
            "address" | "address payable" => AbiType::Address,
            "string" => AbiType::String,
            "bytes" => AbiType::Bytes,
            _ if base.starts_with("uint") => AbiType::Uint(parse_bits(&base[4..], s)?),
            _ if base.starts_with("int") => AbiType::Int(parse_bits(&base[3..], s)?),
            _ if base.starts_with("bytes") => {
                let size: usize = base[5..]
                    .parse()
                    .map_err(|_| FuzzerError::UnsupportedType(s.to_string()))?;
                if size == 0 || size > 32 {
                    return Err(FuzzerError::UnsupportedType(s.to_string()));
                }
                AbiType::FixedBytes(size)
            }
            _ => return Err(FuzzerError::UnsupportedType(s.to_string())),
        };

        while !rest.is_empty() {
            let close = rest
                .find(']')
                .ok_or_else(|| FuzzerError::UnsupportedType(s.to_string()))?;
            let inner = &rest[1..close];
            let size = if inner.is_empty() {
                None
            } else {
                Some(
                    inner
                        .parse()
                        .map_err(|_| FuzzerError::UnsupportedType(s.to_string()))?,
                )
            };
            ty = AbiType::Array {
                element: Box::new(ty),
                size,
            };
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(FuzzerError::UnsupportedType(s.to_string()));
            }
        }

        Ok(ty)
    }
}

/// Concrete argument value carried by a gene.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Uint { bits: usize, value: U256 },
    Int { bits: usize, value: I256 },
    Address(Address),
    String(String),
    Bytes(Vec<u8>),
    FixedBytes { size: usize, bytes: Vec<u8> },
    Array { fixed: bool, elements: Vec<Value> },
}

impl Value {
    pub fn uint(bits: usize, value: u64) -> Self {
        Value::Uint {
            bits,
            value: U256::from(value),
        }
    }

    pub fn to_sol(&self) -> Result<DynSolValue, EncodeError> {
        Ok(match self {
            Value::Bool(b) => DynSolValue::Bool(*b),
            Value::Uint { bits, value } => {
                if *bits < 256 && value.bit_len() > *bits {
                    return Err(EncodeError::OutOfRange {
                        ty: format!("uint{}", bits),
                        value: value.to_string(),
                    });
                }
                DynSolValue::Uint(*value, *bits)
            }
            Value::Int { bits, value } => {
                if !fits_signed(*value, *bits) {
                    return Err(EncodeError::OutOfRange {
                        ty: format!("int{}", bits),
                        value: value.to_string(),
                    });
                }
                DynSolValue::Int(*value, *bits)
            }
            Value::Address(address) => DynSolValue::Address(*address),
            Value::String(s) => DynSolValue::String(s.clone()),
            Value::Bytes(bytes) => DynSolValue::Bytes(bytes.clone()),
            Value::FixedBytes { size, bytes } => {
                if *size == 0 || *size > 32 || bytes.len() > *size {
                    return Err(EncodeError::InvalidWidth {
                        width: *size,
                        len: bytes.len(),
                    });
                }
                DynSolValue::FixedBytes(B256::right_padding_from(bytes), *size)
            }
            Value::Array { fixed, elements } => {
                let items = elements
                    .iter()
                    .map(Value::to_sol)
                    .collect::<Result<Vec<_>, _>>()?;
                if *fixed {
                    DynSolValue::FixedArray(items)
                } else {
                    DynSolValue::Array(items)
                }
            }
        })
    }

    /// Magnitude of a non-negative integer argument.
    pub fn as_integer(&self) -> Option<U256> {
        match self {
            Value::Uint { value, .. } => Some(*value),
            Value::Int { value, .. } if !value.is_negative() => Some(value.into_raw()),
            _ => None,
        }
    }

    pub fn contains_address(&self, address: &Address) -> bool {
        match self {
            Value::Address(a) => a == address,
            Value::Array { elements, .. } => elements.iter().any(|e| e.contains_address(address)),
            _ => false,
        }
    }

    pub fn array_len(&self) -> Option<usize> {
        match self {
            Value::Array { elements, .. } => Some(elements.len()),
            _ => None,
        }
    }
}

/// ABI-encode a full argument list as a parameter tuple.
pub fn encode_arguments(arguments: &[Value]) -> Result<Vec<u8>, EncodeError> {
    let items = arguments
        .iter()
        .map(Value::to_sol)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DynSolValue::Tuple(items).abi_encode_params())
}

/// Identifies the function a gene invokes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum FunctionId {
    Constructor,
    Fallback,
    Selector([u8; 4]),
}

impl FunctionId {
    pub fn from_signature(signature: &str) -> Self {
        let hash = keccak256(signature.as_bytes());
        FunctionId::Selector([hash[0], hash[1], hash[2], hash[3]])
    }

    pub fn selector(&self) -> Option<[u8; 4]> {
        match self {
            FunctionId::Selector(selector) => Some(*selector),
            _ => None,
        }
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionId::Constructor => write!(f, "constructor"),
            FunctionId::Fallback => write!(f, "fallback"),
            FunctionId::Selector(s) => {
                write!(f, "0x{:02x}{:02x}{:02x}{:02x}", s[0], s[1], s[2], s[3])
            }
        }
    }
}

impl FromStr for FunctionId {
    type Err = FuzzerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "constructor" => Ok(FunctionId::Constructor),
            "fallback" => Ok(FunctionId::Fallback),
            _ => {
                let invalid = || FuzzerError::Configuration(format!("invalid function selector `{}`", s));
                let digits = s.strip_prefix("0x").unwrap_or(s);
                let bytes = alloy_primitives::hex::decode(digits).map_err(|_| invalid())?;
                let selector: [u8; 4] = bytes.try_into().map_err(|_| invalid())?;
                Ok(FunctionId::Selector(selector))
            }
        }
    }
}

/// Parameter types per function of one contract.
pub type Interface = BTreeMap<FunctionId, Vec<AbiType>>;

/// Full signature (`transfer(address,uint256)`) to function id.
pub type InterfaceMapper = BTreeMap<String, FunctionId>;

/// Optional environment field of a gene.
///
/// `Absent` means the field was never generated; the next mutation
/// unconditionally fills it. `Default` means generated without a pool value,
/// so the transaction uses the EVM's own value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Field<T> {
    #[default]
    Absent,
    Default,
    Value(T),
}

impl<T> Field<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Field::Absent)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Field::Value(v),
            None => Field::Default,
        }
    }
}

/// Where a gene sends its transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    /// Contract creation with the given init code.
    Deploy(Vec<u8>),
    Call(Address),
}

/// Per-transaction stub maps keyed by the queried address.
pub type AddressValues = BTreeMap<Address, U256>;

/// One transaction of a chromosome.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gene {
    pub account: Address,
    /// `None` targets whatever contract the individual deployed last.
    pub contract: Option<Target>,
    pub amount: U256,
    pub function: FunctionId,
    pub arguments: Vec<Value>,
    pub gaslimit: u64,
    pub blocknumber: Field<U256>,
    pub timestamp: Field<U256>,
    pub balance: Field<U256>,
    pub call_return: Option<AddressValues>,
    pub extcodesize: Option<AddressValues>,
    pub returndatasize: Option<AddressValues>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxTarget {
    Create,
    Call(Address),
    /// Resolved during replay to the last contract deployed by the sequence.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Address,
    pub to: TxTarget,
    pub value: U256,
    pub gas_limit: u64,
    pub data: Vec<u8>,
}

/// Environment overrides applied by the EVM while running one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxEnvironment {
    pub block_number: Option<U256>,
    pub timestamp: Option<U256>,
    pub balance: Option<U256>,
    pub call_return: AddressValues,
    pub extcodesize: AddressValues,
    pub returndatasize: AddressValues,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub transaction: Transaction,
    pub environment: TxEnvironment,
}

/// Funded accounts available as senders, and the subset treated as attackers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Accounts {
    pub funded: Vec<Address>,
    pub attackers: BTreeSet<Address>,
}

impl Accounts {
    pub fn is_attacker(&self, address: &Address) -> bool {
        self.attackers.contains(address)
    }
}

/// Sign-extend the low `bits` bits of a word to 256 bits.
pub fn sign_extend(raw: U256, bits: usize) -> U256 {
    if bits == 0 || bits >= 256 {
        return raw;
    }
    let mask = (U256::from(1u8) << bits) - U256::from(1u8);
    let low = raw & mask;
    if low.bit(bits - 1) {
        low | !mask
    } else {
        low
    }
}

pub fn mask_bits(raw: U256, bits: usize) -> U256 {
    if bits >= 256 {
        return raw;
    }
    raw & ((U256::from(1u8) << bits) - U256::from(1u8))
}

pub fn fits_signed(value: I256, bits: usize) -> bool {
    let raw = value.into_raw();
    sign_extend(raw, bits) == raw
}

/// Low 20 bytes of a stack word.
pub fn word_to_address(word: U256) -> Address {
    Address::from_slice(&word.to_be_bytes::<32>()[12..])
}

pub fn address_to_word(address: Address) -> U256 {
    U256::from_be_slice(address.as_slice())
}

/// Saturating conversion for offsets and sizes read off the stack.
pub fn word_to_usize(word: U256) -> usize {
    word.saturating_to::<usize>()
}
