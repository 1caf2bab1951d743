//! Modeled mnemonics and condition codes.
//!
//! Both instruction sets map onto one closed mnemonic set. Spellings that
//! only differ in operand class (`addss` vs `add`, `ldur` vs `ldr`, `movzx`
//! vs `mov`) collapse onto one variant; the operands carry the difference.

use std::fmt;

use crate::Arch;

/// Branch / set / select condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Condition {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Below,
    BelowEqual,
    Above,
    AboveEqual,
    Sign,
    NotSign,
    Overflow,
    NotOverflow,
    Parity,
    NotParity,
}

impl Condition {
    /// Parse an x86 condition suffix (`e`, `nz`, `ge`, ...).
    #[must_use]
    pub fn from_x86(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "e" | "z" => Self::Equal,
            "ne" | "nz" => Self::NotEqual,
            "l" | "nge" => Self::Less,
            "le" | "ng" => Self::LessEqual,
            "g" | "nle" => Self::Greater,
            "ge" | "nl" => Self::GreaterEqual,
            "b" | "c" | "nae" => Self::Below,
            "be" | "na" => Self::BelowEqual,
            "a" | "nbe" => Self::Above,
            "ae" | "nb" | "nc" => Self::AboveEqual,
            "s" => Self::Sign,
            "ns" => Self::NotSign,
            "o" => Self::Overflow,
            "no" => Self::NotOverflow,
            "p" | "pe" => Self::Parity,
            "np" | "po" => Self::NotParity,
            _ => return None,
        })
    }

    /// Parse an ARM64 condition code (`eq`, `lo`, `hi`, ...).
    #[must_use]
    pub fn from_arm64(code: &str) -> Option<Self> {
        Some(match code {
            "eq" => Self::Equal,
            "ne" => Self::NotEqual,
            "lt" => Self::Less,
            "le" => Self::LessEqual,
            "gt" => Self::Greater,
            "ge" => Self::GreaterEqual,
            "lo" | "cc" => Self::Below,
            "ls" => Self::BelowEqual,
            "hi" => Self::Above,
            "hs" | "cs" => Self::AboveEqual,
            "mi" => Self::Sign,
            "pl" => Self::NotSign,
            "vs" => Self::Overflow,
            "vc" => Self::NotOverflow,
            _ => return None,
        })
    }

    /// The condition that holds exactly when this one does not.
    #[must_use]
    pub const fn negate(self) -> Self {
        match self {
            Self::Equal => Self::NotEqual,
            Self::NotEqual => Self::Equal,
            Self::Less => Self::GreaterEqual,
            Self::LessEqual => Self::Greater,
            Self::Greater => Self::LessEqual,
            Self::GreaterEqual => Self::Less,
            Self::Below => Self::AboveEqual,
            Self::BelowEqual => Self::Above,
            Self::Above => Self::BelowEqual,
            Self::AboveEqual => Self::Below,
            Self::Sign => Self::NotSign,
            Self::NotSign => Self::Sign,
            Self::Overflow => Self::NotOverflow,
            Self::NotOverflow => Self::Overflow,
            Self::Parity => Self::NotParity,
            Self::NotParity => Self::Parity,
        }
    }

    /// Check if this condition compares as unsigned.
    #[must_use]
    pub const fn is_unsigned(self) -> bool {
        matches!(
            self,
            Self::Below | Self::BelowEqual | Self::Above | Self::AboveEqual
        )
    }

    /// Operator spelling used in pseudocode.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less | Self::Below => "<",
            Self::LessEqual | Self::BelowEqual => "<=",
            Self::Greater | Self::Above => ">",
            Self::GreaterEqual | Self::AboveEqual => ">=",
            Self::Sign => "< 0 /*sign*/",
            Self::NotSign => ">= 0 /*sign*/",
            Self::Overflow => "/*overflow*/",
            Self::NotOverflow => "/*no overflow*/",
            Self::Parity => "/*unordered*/",
            Self::NotParity => "/*ordered*/",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Modeled instruction mnemonics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    // Data movement
    Mov,
    Movz,
    Movk,
    Movn,
    Lea,
    Push,
    Pop,
    Xchg,
    Ldr,
    Ldp,
    Str,
    Stp,
    Adrp,
    Adr,
    // Arithmetic / logic
    Add,
    Sub,
    Mul,
    Imul,
    MulHigh,
    MulLong,
    Madd,
    Div,
    Idiv,
    Inc,
    Dec,
    Neg,
    Not,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    Convert,
    SignExtendAccumulator,
    // Comparison
    Cmp,
    Cmn,
    Test,
    FloatCmp,
    Setcc(Condition),
    Cmovcc(Condition),
    Csel(Condition),
    // Control flow
    Jmp,
    Jcc(Condition),
    Cbz,
    Cbnz,
    Tbz,
    Tbnz,
    Call,
    Ret,
    // Legacy x87
    Fld,
    Fild,
    Fst,
    Fstp,
    Nop,
    Other,
}

impl Mnemonic {
    /// Parse a disassembler mnemonic for the given architecture.
    ///
    /// Unknown spellings map to [`Mnemonic::Other`].
    #[must_use]
    pub fn parse(arch: Arch, text: &str) -> Self {
        let text = text.trim().to_ascii_lowercase();
        if arch.is_x86() {
            parse_x86(&text)
        } else {
            parse_arm64(&text)
        }
    }

    /// Check if this mnemonic transfers control to a callee.
    #[must_use]
    pub const fn is_call(self) -> bool {
        matches!(self, Self::Call)
    }

    /// Check if this mnemonic is a conditional branch.
    #[must_use]
    pub const fn is_conditional_branch(self) -> bool {
        matches!(
            self,
            Self::Jcc(_) | Self::Cbz | Self::Cbnz | Self::Tbz | Self::Tbnz
        )
    }

    /// Check if this mnemonic is a branch of any kind (not a call).
    #[must_use]
    pub const fn is_branch(self) -> bool {
        matches!(self, Self::Jmp) || self.is_conditional_branch()
    }
}

fn parse_x86(text: &str) -> Mnemonic {
    // Strip common prefixes emitted inline by some disassemblers.
    let text = text
        .strip_prefix("lock ")
        .or_else(|| text.strip_prefix("rep "))
        .or_else(|| text.strip_prefix("bnd "))
        .unwrap_or(text);
    match text {
        "mov" | "movabs" | "movzx" | "movsx" | "movsxd" | "movss" | "movsd" | "movaps"
        | "movups" | "movapd" | "movupd" | "movd" | "movq" | "movdqa" | "movdqu" | "cdqe"
        | "cwde" => Mnemonic::Mov,
        "lea" => Mnemonic::Lea,
        "push" => Mnemonic::Push,
        "pop" => Mnemonic::Pop,
        "xchg" => Mnemonic::Xchg,
        "add" | "addss" | "addsd" => Mnemonic::Add,
        "sub" | "subss" | "subsd" => Mnemonic::Sub,
        "mul" | "mulss" | "mulsd" => Mnemonic::Mul,
        "imul" => Mnemonic::Imul,
        "div" | "divss" | "divsd" => Mnemonic::Div,
        "idiv" => Mnemonic::Idiv,
        "inc" => Mnemonic::Inc,
        "dec" => Mnemonic::Dec,
        "neg" => Mnemonic::Neg,
        "not" => Mnemonic::Not,
        "and" | "andps" | "andpd" => Mnemonic::And,
        "or" | "orps" | "orpd" => Mnemonic::Or,
        "xor" | "xorps" | "xorpd" | "pxor" => Mnemonic::Xor,
        "shl" | "sal" => Mnemonic::Shl,
        "shr" => Mnemonic::Shr,
        "sar" => Mnemonic::Sar,
        "cvtsi2ss" | "cvtsi2sd" | "cvttss2si" | "cvttsd2si" | "cvtss2sd" | "cvtsd2ss" => {
            Mnemonic::Convert
        }
        "cdq" | "cqo" | "cwd" => Mnemonic::SignExtendAccumulator,
        "cmp" => Mnemonic::Cmp,
        "test" => Mnemonic::Test,
        "ucomiss" | "ucomisd" | "comiss" | "comisd" => Mnemonic::FloatCmp,
        "jmp" => Mnemonic::Jmp,
        "call" => Mnemonic::Call,
        "ret" | "retn" => Mnemonic::Ret,
        "fld" => Mnemonic::Fld,
        "fild" => Mnemonic::Fild,
        "fst" => Mnemonic::Fst,
        "fstp" => Mnemonic::Fstp,
        "nop" | "int3" | "endbr64" | "endbr32" | "pause" | "ud2" => Mnemonic::Nop,
        other => {
            if let Some(cond) = other.strip_prefix("set").and_then(Condition::from_x86) {
                Mnemonic::Setcc(cond)
            } else if let Some(cond) = other.strip_prefix("cmov").and_then(Condition::from_x86) {
                Mnemonic::Cmovcc(cond)
            } else if let Some(cond) = other.strip_prefix('j').and_then(Condition::from_x86) {
                Mnemonic::Jcc(cond)
            } else {
                Mnemonic::Other
            }
        }
    }
}

fn parse_arm64(text: &str) -> Mnemonic {
    match text {
        "mov" | "fmov" | "sxtw" | "uxtw" | "sxtb" | "uxtb" | "sxth" | "uxth" => Mnemonic::Mov,
        "movz" => Mnemonic::Movz,
        "movk" => Mnemonic::Movk,
        "movn" => Mnemonic::Movn,
        "ldr" | "ldrb" | "ldrh" | "ldrsb" | "ldrsh" | "ldrsw" | "ldur" | "ldurb" | "ldurh"
        | "ldursw" | "ldar" => Mnemonic::Ldr,
        "ldp" => Mnemonic::Ldp,
        "str" | "strb" | "strh" | "stur" | "sturb" | "sturh" | "stlr" => Mnemonic::Str,
        "stp" => Mnemonic::Stp,
        "adrp" => Mnemonic::Adrp,
        "adr" => Mnemonic::Adr,
        "add" | "fadd" => Mnemonic::Add,
        "sub" | "fsub" => Mnemonic::Sub,
        "mul" | "fmul" => Mnemonic::Mul,
        "smulh" | "umulh" => Mnemonic::MulHigh,
        "smull" | "umull" => Mnemonic::MulLong,
        "madd" => Mnemonic::Madd,
        "udiv" | "fdiv" => Mnemonic::Div,
        "sdiv" => Mnemonic::Idiv,
        "neg" | "fneg" => Mnemonic::Neg,
        "mvn" => Mnemonic::Not,
        "and" => Mnemonic::And,
        "orr" => Mnemonic::Or,
        "eor" => Mnemonic::Xor,
        "lsl" => Mnemonic::Shl,
        "lsr" => Mnemonic::Shr,
        "asr" => Mnemonic::Sar,
        "scvtf" | "ucvtf" | "fcvtzs" | "fcvtzu" | "fcvt" => Mnemonic::Convert,
        "cmp" => Mnemonic::Cmp,
        "cmn" => Mnemonic::Cmn,
        "tst" => Mnemonic::Test,
        "fcmp" | "fcmpe" => Mnemonic::FloatCmp,
        "b" | "br" => Mnemonic::Jmp,
        "bl" | "blr" => Mnemonic::Call,
        "cbz" => Mnemonic::Cbz,
        "cbnz" => Mnemonic::Cbnz,
        "tbz" => Mnemonic::Tbz,
        "tbnz" => Mnemonic::Tbnz,
        "ret" => Mnemonic::Ret,
        "nop" | "brk" | "hint" | "bti" => Mnemonic::Nop,
        other => {
            if let Some(cond) = other.strip_prefix("b.").and_then(Condition::from_arm64) {
                Mnemonic::Jcc(cond)
            } else if let Some(cond) = other.strip_prefix("b").and_then(Condition::from_arm64) {
                // `beq` spelling without the dot
                Mnemonic::Jcc(cond)
            } else {
                Mnemonic::Other
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x86_conditional_forms() {
        assert_eq!(Mnemonic::parse(Arch::X86_64, "je"), Mnemonic::Jcc(Condition::Equal));
        assert_eq!(Mnemonic::parse(Arch::X86_64, "JNZ"), Mnemonic::Jcc(Condition::NotEqual));
        assert_eq!(Mnemonic::parse(Arch::X86_64, "setg"), Mnemonic::Setcc(Condition::Greater));
        assert_eq!(Mnemonic::parse(Arch::X86_64, "cmovae"), Mnemonic::Cmovcc(Condition::AboveEqual));
        assert_eq!(Mnemonic::parse(Arch::X86_64, "jmp"), Mnemonic::Jmp);
        assert_eq!(Mnemonic::parse(Arch::X86_64, "vfmadd231ps"), Mnemonic::Other);
    }

    #[test]
    fn test_arm64_forms() {
        assert_eq!(Mnemonic::parse(Arch::Arm64, "b.ne"), Mnemonic::Jcc(Condition::NotEqual));
        assert_eq!(Mnemonic::parse(Arch::Arm64, "ldur"), Mnemonic::Ldr);
        assert_eq!(Mnemonic::parse(Arch::Arm64, "blr"), Mnemonic::Call);
        assert_eq!(Mnemonic::parse(Arch::Arm64, "b"), Mnemonic::Jmp);
        assert_eq!(Mnemonic::parse(Arch::Arm64, "bl"), Mnemonic::Call);
    }

    #[test]
    fn test_condition_negate() {
        assert_eq!(Condition::Less.negate(), Condition::GreaterEqual);
        assert_eq!(Condition::Above.negate().negate(), Condition::Above);
        assert!(Condition::BelowEqual.is_unsigned());
        assert!(!Condition::Less.is_unsigned());
    }
}
