//! Canonical register naming.
//!
//! Sub-registers are folded onto their full-width parent (`eax`, `ax` and
//! `al` all name `rax`; `w3` names `x3`; `s0` names `v0`) because the lifter
//! tracks one value per architectural register, not per view of it.

use std::fmt;

use crate::Arch;

/// A canonical architectural register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    /// x86 general purpose register in encoding order (rax = 0 .. r15 = 15).
    Gpr(u8),
    /// x86 SSE register.
    Xmm(u8),
    /// x87 stack register `st(i)`.
    St(u8),
    /// x86 instruction pointer (RIP-relative addressing base).
    Rip,
    /// ARM64 general purpose register x0..x30.
    X(u8),
    /// ARM64 stack pointer.
    Sp,
    /// ARM64 zero register.
    Zr,
    /// ARM64 SIMD/FP register v0..v31.
    V(u8),
}

// x86 encoding numbers
pub const RAX: Register = Register::Gpr(0);
pub const RCX: Register = Register::Gpr(1);
pub const RDX: Register = Register::Gpr(2);
pub const RBX: Register = Register::Gpr(3);
pub const RSP: Register = Register::Gpr(4);
pub const RBP: Register = Register::Gpr(5);
pub const RSI: Register = Register::Gpr(6);
pub const RDI: Register = Register::Gpr(7);
pub const R8: Register = Register::Gpr(8);
pub const R9: Register = Register::Gpr(9);
pub const R10: Register = Register::Gpr(10);
pub const R11: Register = Register::Gpr(11);

// ARM64 aliases
pub const FP: Register = Register::X(29);
pub const LR: Register = Register::X(30);

const GPR64: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];
const GPR32: [&str; 8] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];
const GPR16: [&str; 8] = ["ax", "cx", "dx", "bx", "sp", "bp", "si", "di"];
const GPR8: [&str; 8] = ["al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil"];
const GPR8_HIGH: [&str; 4] = ["ah", "ch", "dh", "bh"];

impl Register {
    /// Parse a register name as printed by a disassembler.
    ///
    /// Returns the canonical register and the width in bytes of the view named.
    #[must_use]
    pub fn parse(arch: Arch, name: &str) -> Option<(Self, u8)> {
        let name = name.trim().to_ascii_lowercase();
        if arch.is_x86() {
            parse_x86(&name)
        } else {
            parse_arm64(&name)
        }
    }

    /// Check if this is a floating point / vector register.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Xmm(_) | Self::St(_) | Self::V(_))
    }

    /// Check if this register always reads as zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        matches!(self, Self::Zr)
    }

    /// Register name as it would be spelled for the given architecture.
    #[must_use]
    pub fn name_for(self, arch: Arch) -> String {
        match (arch, self) {
            (Arch::X86, Self::Gpr(n)) if (n as usize) < GPR32.len() => GPR32[n as usize].to_string(),
            (Arch::X86, Self::Rip) => "eip".to_string(),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Gpr(n) => f.write_str(GPR64.get(n as usize).copied().unwrap_or("r??")),
            Self::Xmm(n) => write!(f, "xmm{n}"),
            Self::St(n) => write!(f, "st({n})"),
            Self::Rip => f.write_str("rip"),
            Self::X(29) => f.write_str("fp"),
            Self::X(30) => f.write_str("lr"),
            Self::X(n) => write!(f, "x{n}"),
            Self::Sp => f.write_str("sp"),
            Self::Zr => f.write_str("xzr"),
            Self::V(n) => write!(f, "v{n}"),
        }
    }
}

fn index_of(table: &[&str], name: &str) -> Option<u8> {
    table.iter().position(|n| *n == name).and_then(|i| u8::try_from(i).ok())
}

fn parse_x86(name: &str) -> Option<(Register, u8)> {
    if let Some(i) = index_of(&GPR64, name) {
        return Some((Register::Gpr(i), 8));
    }
    if let Some(i) = index_of(&GPR32, name) {
        return Some((Register::Gpr(i), 4));
    }
    if let Some(i) = index_of(&GPR16, name) {
        return Some((Register::Gpr(i), 2));
    }
    if let Some(i) = index_of(&GPR8, name) {
        return Some((Register::Gpr(i), 1));
    }
    if let Some(i) = index_of(&GPR8_HIGH, name) {
        return Some((Register::Gpr(i), 1));
    }
    match name {
        "rip" | "eip" => return Some((Register::Rip, 8)),
        "st" => return Some((Register::St(0), 10)),
        _ => {}
    }
    if let Some(rest) = name.strip_prefix("xmm") {
        let n: u8 = rest.parse().ok()?;
        return (n < 32).then_some((Register::Xmm(n), 16));
    }
    if let Some(rest) = name.strip_prefix("st(").and_then(|r| r.strip_suffix(')')) {
        let n: u8 = rest.parse().ok()?;
        return (n < 8).then_some((Register::St(n), 10));
    }
    // r8..r15 with d/w/b/l suffixes
    let rest = name.strip_prefix('r')?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    let n: u8 = digits.parse().ok()?;
    if !(8..16).contains(&n) {
        return None;
    }
    let width = match &rest[digits.len()..] {
        "" => 8,
        "d" => 4,
        "w" => 2,
        "b" | "l" => 1,
        _ => return None,
    };
    Some((Register::Gpr(n), width))
}

fn parse_arm64(name: &str) -> Option<(Register, u8)> {
    match name {
        "sp" => return Some((Register::Sp, 8)),
        "wsp" => return Some((Register::Sp, 4)),
        "xzr" => return Some((Register::Zr, 8)),
        "wzr" => return Some((Register::Zr, 4)),
        "fp" => return Some((FP, 8)),
        "lr" => return Some((LR, 8)),
        _ => {}
    }
    if name.len() < 2 || !name.is_char_boundary(1) {
        return None;
    }
    let (prefix, rest) = name.split_at(1);
    let n: u8 = rest.parse().ok()?;
    match prefix {
        "x" if n <= 30 => Some((Register::X(n), 8)),
        "w" if n <= 30 => Some((Register::X(n), 4)),
        "v" | "q" if n < 32 => Some((Register::V(n), 16)),
        "d" if n < 32 => Some((Register::V(n), 8)),
        "s" if n < 32 => Some((Register::V(n), 4)),
        "h" if n < 32 => Some((Register::V(n), 2)),
        "b" if n < 32 => Some((Register::V(n), 1)),
        _ => None,
    }
}
