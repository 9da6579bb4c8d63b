use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! opcodes {
    ($($(#[$meta:meta])* $name:ident = $byte:literal, $pops:literal, $pushes:literal;)*) => {
        /// EVM instruction as it appears in execution traces.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "UPPERCASE")]
        pub enum Opcode {
            $($(#[$meta])* $name,)*
            /// Any undefined byte.
            Invalid,
        }

        impl Opcode {
            pub fn from_byte(byte: u8) -> Self {
                match byte {
                    $($byte => Opcode::$name,)*
                    _ => Opcode::Invalid,
                }
            }

            pub fn byte(self) -> Option<u8> {
                match self {
                    $(Opcode::$name => Some($byte),)*
                    Opcode::Invalid => None,
                }
            }

            /// Number of stack words consumed and produced.
            pub fn stack_io(self) -> (usize, usize) {
                match self {
                    $(Opcode::$name => ($pops, $pushes),)*
                    Opcode::Invalid => (0, 0),
                }
            }
        }
    };
}

opcodes! {
    Stop = 0x00, 0, 0;
    Add = 0x01, 2, 1;
    Mul = 0x02, 2, 1;
    Sub = 0x03, 2, 1;
    Div = 0x04, 2, 1;
    SDiv = 0x05, 2, 1;
    Mod = 0x06, 2, 1;
    SMod = 0x07, 2, 1;
    AddMod = 0x08, 3, 1;
    MulMod = 0x09, 3, 1;
    Exp = 0x0a, 2, 1;
    SignExtend = 0x0b, 2, 1;
    Lt = 0x10, 2, 1;
    Gt = 0x11, 2, 1;
    Slt = 0x12, 2, 1;
    Sgt = 0x13, 2, 1;
    Eq = 0x14, 2, 1;
    IsZero = 0x15, 1, 1;
    And = 0x16, 2, 1;
    Or = 0x17, 2, 1;
    Xor = 0x18, 2, 1;
    Not = 0x19, 1, 1;
    Byte = 0x1a, 2, 1;
    Shl = 0x1b, 2, 1;
    Shr = 0x1c, 2, 1;
    Sar = 0x1d, 2, 1;
    #[serde(alias = "KECCAK256")]
    Sha3 = 0x20, 2, 1;
    Address = 0x30, 0, 1;
    Balance = 0x31, 1, 1;
    Origin = 0x32, 0, 1;
    Caller = 0x33, 0, 1;
    CallValue = 0x34, 0, 1;
    CallDataLoad = 0x35, 1, 1;
    CallDataSize = 0x36, 0, 1;
    CallDataCopy = 0x37, 3, 0;
    CodeSize = 0x38, 0, 1;
    CodeCopy = 0x39, 3, 0;
    GasPrice = 0x3a, 0, 1;
    ExtCodeSize = 0x3b, 1, 1;
    ExtCodeCopy = 0x3c, 4, 0;
    ReturnDataSize = 0x3d, 0, 1;
    ReturnDataCopy = 0x3e, 3, 0;
    ExtCodeHash = 0x3f, 1, 1;
    BlockHash = 0x40, 1, 1;
    Coinbase = 0x41, 0, 1;
    Timestamp = 0x42, 0, 1;
    Number = 0x43, 0, 1;
    #[serde(alias = "PREVRANDAO")]
    Difficulty = 0x44, 0, 1;
    GasLimit = 0x45, 0, 1;
    ChainId = 0x46, 0, 1;
    SelfBalance = 0x47, 0, 1;
    BaseFee = 0x48, 0, 1;
    Pop = 0x50, 1, 0;
    MLoad = 0x51, 1, 1;
    MStore = 0x52, 2, 0;
    MStore8 = 0x53, 2, 0;
    SLoad = 0x54, 1, 1;
    SStore = 0x55, 2, 0;
    Jump = 0x56, 1, 0;
    JumpI = 0x57, 2, 0;
    Pc = 0x58, 0, 1;
    MSize = 0x59, 0, 1;
    Gas = 0x5a, 0, 1;
    JumpDest = 0x5b, 0, 0;
    Push0 = 0x5f, 0, 1;
    Push1 = 0x60, 0, 1;
    Push2 = 0x61, 0, 1;
    Push3 = 0x62, 0, 1;
    Push4 = 0x63, 0, 1;
    Push5 = 0x64, 0, 1;
    Push6 = 0x65, 0, 1;
    Push7 = 0x66, 0, 1;
    Push8 = 0x67, 0, 1;
    Push9 = 0x68, 0, 1;
    Push10 = 0x69, 0, 1;
    Push11 = 0x6a, 0, 1;
    Push12 = 0x6b, 0, 1;
    Push13 = 0x6c, 0, 1;
    Push14 = 0x6d, 0, 1;
    Push15 = 0x6e, 0, 1;
    Push16 = 0x6f, 0, 1;
    Push17 = 0x70, 0, 1;
    Push18 = 0x71, 0, 1;
    Push19 = 0x72, 0, 1;
    Push20 = 0x73, 0, 1;
    Push21 = 0x74, 0, 1;
    Push22 = 0x75, 0, 1;
    Push23 = 0x76, 0, 1;
    Push24 = 0x77, 0, 1;
    Push25 = 0x78, 0, 1;
    Push26 = 0x79, 0, 1;
    Push27 = 0x7a, 0, 1;
    Push28 = 0x7b, 0, 1;
    Push29 = 0x7c, 0, 1;
    Push30 = 0x7d, 0, 1;
    Push31 = 0x7e, 0, 1;
    Push32 = 0x7f, 0, 1;
    Dup1 = 0x80, 1, 2;
    Dup2 = 0x81, 2, 3;
    Dup3 = 0x82, 3, 4;
    Dup4 = 0x83, 4, 5;
    Dup5 = 0x84, 5, 6;
    Dup6 = 0x85, 6, 7;
    Dup7 = 0x86, 7, 8;
    Dup8 = 0x87, 8, 9;
    Dup9 = 0x88, 9, 10;
    Dup10 = 0x89, 10, 11;
    Dup11 = 0x8a, 11, 12;
    Dup12 = 0x8b, 12, 13;
    Dup13 = 0x8c, 13, 14;
    Dup14 = 0x8d, 14, 15;
    Dup15 = 0x8e, 15, 16;
    Dup16 = 0x8f, 16, 17;
    Swap1 = 0x90, 2, 2;
    Swap2 = 0x91, 3, 3;
    Swap3 = 0x92, 4, 4;
    Swap4 = 0x93, 5, 5;
    Swap5 = 0x94, 6, 6;
    Swap6 = 0x95, 7, 7;
    Swap7 = 0x96, 8, 8;
    Swap8 = 0x97, 9, 9;
    Swap9 = 0x98, 10, 10;
    Swap10 = 0x99, 11, 11;
    Swap11 = 0x9a, 12, 12;
    Swap12 = 0x9b, 13, 13;
    Swap13 = 0x9c, 14, 14;
    Swap14 = 0x9d, 15, 15;
    Swap15 = 0x9e, 16, 16;
    Swap16 = 0x9f, 17, 17;
    Log0 = 0xa0, 2, 0;
    Log1 = 0xa1, 3, 0;
    Log2 = 0xa2, 4, 0;
    Log3 = 0xa3, 5, 0;
    Log4 = 0xa4, 6, 0;
    Create = 0xf0, 3, 1;
    Call = 0xf1, 7, 1;
    CallCode = 0xf2, 7, 1;
    Return = 0xf3, 2, 0;
    DelegateCall = 0xf4, 6, 1;
    Create2 = 0xf5, 4, 1;
    StaticCall = 0xfa, 6, 1;
    Revert = 0xfd, 2, 0;
    /// Designated invalid instruction `0xfe`, emitted by failed `assert`.
    AssertFail = 0xfe, 0, 0;
    #[serde(alias = "SUICIDE")]
    SelfDestruct = 0xff, 1, 0;
}

impl Opcode {
    /// Immediate bytes following a PUSH.
    pub fn push_size(self) -> usize {
        match self.byte() {
            Some(byte @ 0x60..=0x7f) => (byte - 0x5f) as usize,
            _ => 0,
        }
    }

    pub fn dup_depth(self) -> Option<usize> {
        match self.byte() {
            Some(byte @ 0x80..=0x8f) => Some((byte - 0x7f) as usize),
            _ => None,
        }
    }

    pub fn swap_depth(self) -> Option<usize> {
        match self.byte() {
            Some(byte @ 0x90..=0x9f) => Some((byte - 0x8f) as usize),
            _ => None,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, Opcode::Lt | Opcode::Gt | Opcode::Slt | Opcode::Sgt | Opcode::Eq)
    }

    pub fn is_block_context(self) -> bool {
        matches!(
            self,
            Opcode::BlockHash
                | Opcode::Coinbase
                | Opcode::Timestamp
                | Opcode::Number
                | Opcode::Difficulty
                | Opcode::GasLimit
        )
    }

    /// Instructions after which a transaction's execution frame is gone.
    pub fn is_halting(self) -> bool {
        matches!(
            self,
            Opcode::Stop
                | Opcode::Return
                | Opcode::Revert
                | Opcode::AssertFail
                | Opcode::Invalid
                | Opcode::SelfDestruct
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Opcode::Revert | Opcode::AssertFail | Opcode::Invalid)
    }

    pub fn is_call(self) -> bool {
        matches!(
            self,
            Opcode::Call | Opcode::CallCode | Opcode::DelegateCall | Opcode::StaticCall
        )
    }

    /// Instructions through which a contract can move ether out.
    pub fn can_send_ether(self) -> bool {
        matches!(
            self,
            Opcode::Call
                | Opcode::CallCode
                | Opcode::DelegateCall
                | Opcode::SelfDestruct
                | Opcode::Create
                | Opcode::Create2
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format!("{:?}", self).to_uppercase())
    }
}

impl FromStr for Opcode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_uppercase();
        match name.as_str() {
            "SUICIDE" => return Ok(Opcode::SelfDestruct),
            "KECCAK256" => return Ok(Opcode::Sha3),
            "PREVRANDAO" => return Ok(Opcode::Difficulty),
            "INVALID" => return Ok(Opcode::Invalid),
            _ => {}
        }
        (0..=u8::MAX)
            .map(Opcode::from_byte)
            .find(|op| *op != Opcode::Invalid && op.to_string() == name)
            .ok_or_else(|| format!("unknown opcode `{}`", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_table_round_trips() {
        for byte in 0..=u8::MAX {
            let op = Opcode::from_byte(byte);
            if op != Opcode::Invalid {
                assert_eq!(op.byte(), Some(byte));
            }
        }
        assert_eq!(Opcode::from_byte(0x0c), Opcode::Invalid);
    }

    #[test]
    fn names_match_trace_spelling() {
        assert_eq!(Opcode::CallDataLoad.to_string(), "CALLDATALOAD");
        assert_eq!("suicide".parse::<Opcode>().unwrap(), Opcode::SelfDestruct);
        assert_eq!("ASSERTFAIL".parse::<Opcode>().unwrap(), Opcode::AssertFail);
        let parsed: Opcode = serde_json::from_str("\"JUMPI\"").unwrap();
        assert_eq!(parsed, Opcode::JumpI);
    }

    #[test]
    fn push_and_dup_widths() {
        assert_eq!(Opcode::Push32.push_size(), 32);
        assert_eq!(Opcode::Push0.push_size(), 0);
        assert_eq!(Opcode::Dup3.dup_depth(), Some(3));
        assert_eq!(Opcode::Swap16.swap_depth(), Some(16));
    }
}
