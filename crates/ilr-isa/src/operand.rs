//! Architecture-neutral operand model.

use std::fmt;

use crate::Register;

/// Memory operand: `[base + index * scale + displacement]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemoryOperand {
    pub base: Option<Register>,
    pub index: Option<Register>,
    pub scale: u8,
    pub displacement: i64,
}

impl MemoryOperand {
    /// Create a base + displacement memory operand.
    #[must_use]
    pub const fn based(base: Register, displacement: i64) -> Self {
        Self {
            base: Some(base),
            index: None,
            scale: 1,
            displacement,
        }
    }

    /// Create an absolute memory operand.
    #[must_use]
    pub const fn absolute(address: u64) -> Self {
        Self {
            base: None,
            index: None,
            scale: 1,
            displacement: address as i64,
        }
    }

    /// Check if the address is relative to the instruction pointer.
    #[must_use]
    pub fn is_ip_relative(&self) -> bool {
        self.base == Some(Register::Rip)
    }

    /// Resolve the effective address if it does not depend on any register.
    ///
    /// `next_address` is the address of the following instruction, which is
    /// what RIP-relative displacements are relative to.
    #[must_use]
    pub fn absolute_address(&self, next_address: u64) -> Option<u64> {
        if self.index.is_some() {
            return None;
        }
        match self.base {
            None => Some(self.displacement as u64),
            Some(Register::Rip) => Some(next_address.wrapping_add_signed(self.displacement)),
            Some(_) => None,
        }
    }
}

impl fmt::Display for MemoryOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        let mut first = true;
        if let Some(base) = self.base {
            write!(f, "{base}")?;
            first = false;
        }
        if let Some(index) = self.index {
            if !first {
                f.write_str(" + ")?;
            }
            write!(f, "{index}*{}", self.scale)?;
            first = false;
        }
        if first {
            write!(f, "{:#x}", self.displacement)?;
        } else if self.displacement < 0 {
            write!(f, " - {:#x}", self.displacement.unsigned_abs())?;
        } else if self.displacement > 0 {
            write!(f, " + {:#x}", self.displacement)?;
        }
        f.write_str("]")
    }
}

/// An operand of a decoded instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
    Register(Register),
    Immediate(i64),
    /// Stack-pointer relative slot without an index register.
    StackSlot(i64),
    Memory(MemoryOperand),
}

impl Operand {
    /// Get the register if this is a register operand.
    #[must_use]
    pub const fn register(&self) -> Option<Register> {
        match self {
            Self::Register(reg) => Some(*reg),
            _ => None,
        }
    }

    /// Get the immediate if this is an immediate operand.
    #[must_use]
    pub const fn immediate(&self) -> Option<i64> {
        match self {
            Self::Immediate(imm) => Some(*imm),
            _ => None,
        }
    }

    /// Get the memory descriptor if this is a memory operand.
    #[must_use]
    pub const fn memory(&self) -> Option<&MemoryOperand> {
        match self {
            Self::Memory(mem) => Some(mem),
            _ => None,
        }
    }

    /// Get the stack offset if this is a stack slot.
    #[must_use]
    pub const fn stack_slot(&self) -> Option<i64> {
        match self {
            Self::StackSlot(offset) => Some(*offset),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_register(&self) -> bool {
        matches!(self, Self::Register(_))
    }

    #[must_use]
    pub const fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate(_))
    }

    /// Check if this operand reads or writes memory (including stack slots).
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_) | Self::StackSlot(_))
    }

    /// Normalize a memory operand based on the stack pointer into a stack slot.
    #[must_use]
    pub fn normalize(self, stack_pointer: Register) -> Self {
        match self {
            Self::Memory(MemoryOperand {
                base: Some(base),
                index: None,
                displacement,
                ..
            }) if base == stack_pointer => Self::StackSlot(displacement),
            other => other,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(reg) => write!(f, "{reg}"),
            Self::Immediate(imm) if *imm < 0 => write!(f, "-{:#x}", imm.unsigned_abs()),
            Self::Immediate(imm) => write!(f, "{imm:#x}"),
            Self::StackSlot(offset) if *offset < 0 => write!(f, "[sp - {:#x}]", offset.unsigned_abs()),
            Self::StackSlot(offset) => write!(f, "[sp + {offset:#x}]"),
            Self::Memory(mem) => write!(f, "{mem}"),
        }
    }
}
