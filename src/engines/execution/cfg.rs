use super::opcode::Opcode;
use std::collections::{BTreeMap, BTreeSet};

/// Static view of a contract's runtime bytecode.
#[derive(Debug, Clone, Default)]
pub struct ControlFlowGraph {
    instructions: BTreeMap<usize, Opcode>,
    jumpis: BTreeSet<usize>,
    can_send_ether: bool,
}

impl ControlFlowGraph {
    pub fn from_bytecode(code: &[u8]) -> Self {
        let mut instructions = BTreeMap::new();
        let mut jumpis = BTreeSet::new();
        let mut can_send_ether = false;

        let mut pc = 0;
        while pc < code.len() {
            let op = Opcode::from_byte(code[pc]);
            instructions.insert(pc, op);
            if op == Opcode::JumpI {
                jumpis.insert(pc);
            }
            can_send_ether |= op.can_send_ether();
            pc += 1 + op.push_size();
        }

        Self {
            instructions,
            jumpis,
            can_send_ether,
        }
    }

    pub fn pcs(&self) -> impl Iterator<Item = &usize> {
        self.instructions.keys()
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn jumpis(&self) -> &BTreeSet<usize> {
        &self.jumpis
    }

    pub fn opcode_at(&self, pc: usize) -> Option<Opcode> {
        self.instructions.get(&pc).copied()
    }

    pub fn can_send_ether(&self) -> bool {
        self.can_send_ether
    }
}
