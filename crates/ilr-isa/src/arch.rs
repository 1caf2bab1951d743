//! Supported target architectures.

use std::fmt;

use crate::CallingConvention;

/// Architecture of the native code being lifted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arch {
    /// 32-bit x86 (cdecl, arguments pushed on the stack).
    X86,
    /// x86-64 with the Windows x64 calling convention.
    X86_64,
    /// AArch64 with the AAPCS64 calling convention.
    Arm64,
}

impl Arch {
    /// Size of a native pointer in bytes.
    #[must_use]
    pub const fn pointer_size(self) -> u8 {
        match self {
            Self::X86 => 4,
            Self::X86_64 | Self::Arm64 => 8,
        }
    }

    /// Check if this is one of the x86 family architectures.
    #[must_use]
    pub const fn is_x86(self) -> bool {
        matches!(self, Self::X86 | Self::X86_64)
    }

    /// Calling convention used by AOT-compiled managed methods.
    #[must_use]
    pub fn calling_convention(self) -> CallingConvention {
        CallingConvention::for_arch(self)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::X86 => "x86",
            Self::X86_64 => "x86-64",
            Self::Arm64 => "arm64",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_sizes() {
        assert_eq!(Arch::X86.pointer_size(), 4);
        assert_eq!(Arch::X86_64.pointer_size(), 8);
        assert_eq!(Arch::Arm64.pointer_size(), 8);
        assert!(Arch::X86.is_x86());
        assert!(!Arch::Arm64.is_x86());
    }
}
