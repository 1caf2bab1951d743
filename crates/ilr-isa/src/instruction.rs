//! Decoded instruction.

use std::fmt;

use crate::{Arch, Mnemonic, Operand};

/// Maximum operand count carried by a decoded instruction.
pub const MAX_OPERANDS: usize = 4;

/// A decoded native instruction as handed over by the disassembler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    /// Virtual address of the instruction.
    pub address: u64,
    /// Encoded length in bytes.
    pub size: u8,
    /// Modeled mnemonic.
    pub mnemonic: Mnemonic,
    /// Mnemonic as printed by the disassembler (kept for diagnostics).
    pub text: String,
    /// Operands in Intel / ARM order (destination first).
    pub operands: Vec<Operand>,
    /// Operation width in bytes (0 when not meaningful).
    pub width: u8,
}

impl Instruction {
    /// Create a new instruction. Stack-pointer based memory operands are
    /// normalized into [`Operand::StackSlot`].
    #[must_use]
    pub fn new(
        arch: Arch,
        address: u64,
        size: u8,
        mnemonic: &str,
        operands: Vec<Operand>,
        width: u8,
    ) -> Self {
        let sp = arch.calling_convention().stack_pointer;
        Self {
            address,
            size,
            mnemonic: Mnemonic::parse(arch, mnemonic),
            text: mnemonic.trim().to_ascii_lowercase(),
            operands: operands.into_iter().map(|op| op.normalize(sp)).collect(),
            width,
        }
    }

    /// Address of the next instruction.
    #[must_use]
    pub const fn next_address(&self) -> u64 {
        self.address + self.size as u64
    }

    /// Number of operands.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.operands.len()
    }

    /// Get an operand by position.
    #[must_use]
    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }

    /// Static target of a direct branch or call, if any.
    ///
    /// The target is the last immediate operand (ARM64 `cbz x0, #target` and
    /// `tbz x0, #bit, #target` keep it last).
    #[must_use]
    pub fn branch_target(&self) -> Option<u64> {
        if !(self.mnemonic.is_branch() || self.mnemonic.is_call()) {
            return None;
        }
        match self.operands.last()? {
            Operand::Immediate(target) => Some(*target as u64),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_call(&self) -> bool {
        self.mnemonic.is_call()
    }

    #[must_use]
    pub const fn is_return(&self) -> bool {
        matches!(self.mnemonic, Mnemonic::Ret)
    }

    /// Check if this is an unconditional jump (direct or indirect).
    #[must_use]
    pub const fn is_jump(&self) -> bool {
        matches!(self.mnemonic, Mnemonic::Jmp)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}", self.address, self.text)?;
        for (i, op) in self.operands.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            write!(f, "{op}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryOperand, RAX, RSP};

    #[test]
    fn test_new_normalizes_stack_slots() {
        let instr = Instruction::new(
            Arch::X86_64,
            0x1000,
            5,
            "mov",
            vec![
                Operand::Register(RAX),
                Operand::Memory(MemoryOperand::based(RSP, 0x20)),
            ],
            8,
        );
        assert_eq!(instr.operands[1], Operand::StackSlot(0x20));
        assert_eq!(instr.next_address(), 0x1005);
        assert_eq!(instr.mnemonic, Mnemonic::Mov);
    }

    #[test]
    fn test_branch_target() {
        let jmp = Instruction::new(Arch::X86_64, 0x10, 2, "jne", vec![Operand::Immediate(0x40)], 0);
        assert_eq!(jmp.branch_target(), Some(0x40));

        let mov = Instruction::new(Arch::X86_64, 0x10, 2, "mov", vec![Operand::Immediate(0x40)], 0);
        assert_eq!(mov.branch_target(), None);
    }

    #[test]
    fn test_display() {
        let instr = Instruction::new(
            Arch::X86_64,
            0x10,
            3,
            "mov",
            vec![Operand::Register(RAX), Operand::Immediate(1)],
            8,
        );
        assert_eq!(instr.to_string(), "0x10: mov rax, 0x1");
    }
}
