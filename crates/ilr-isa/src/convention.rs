//! Calling conventions used by AOT-compiled method bodies.

use crate::{Arch, R8, R9, R10, R11, RAX, RBP, RCX, RDX, RSP, Register};

/// Where a given argument lives at a call site or on method entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgumentLocation {
    Register(Register),
    /// Byte offset relative to the stack pointer at method entry.
    Stack(i64),
    /// Position on the explicit push stack (0 = first pushed argument).
    Pushed(usize),
}

/// Register and stack assignment rules for one architecture.
#[derive(Clone, Debug)]
pub struct CallingConvention {
    pub arch: Arch,
    /// Integer / pointer argument registers in order.
    pub integer_args: Vec<Register>,
    /// Floating point argument registers in order.
    pub float_args: Vec<Register>,
    /// Whether integer and float arguments consume one shared position counter
    /// (Windows x64) or independent counters (AAPCS64).
    pub shared_positions: bool,
    pub return_reg: Register,
    pub float_return_reg: Register,
    pub stack_pointer: Register,
    pub frame_pointer: Register,
    /// Registers a call may clobber.
    pub volatile: Vec<Register>,
    /// Entry-relative stack offset of the first stack-passed argument.
    pub stack_arg_base: i64,
    /// Arguments are pushed before the call and cleaned up by the caller.
    pub pushes_args: bool,
}

impl CallingConvention {
    /// Calling convention for the given architecture.
    #[must_use]
    pub fn for_arch(arch: Arch) -> Self {
        match arch {
            Arch::X86 => Self {
                arch,
                integer_args: Vec::new(),
                float_args: Vec::new(),
                shared_positions: true,
                return_reg: RAX,
                float_return_reg: Register::St(0),
                stack_pointer: RSP,
                frame_pointer: RBP,
                volatile: vec![RAX, RCX, RDX],
                stack_arg_base: 4,
                pushes_args: true,
            },
            Arch::X86_64 => Self {
                arch,
                integer_args: vec![RCX, RDX, R8, R9],
                float_args: (0..4).map(Register::Xmm).collect(),
                shared_positions: true,
                return_reg: RAX,
                float_return_reg: Register::Xmm(0),
                stack_pointer: RSP,
                frame_pointer: RBP,
                volatile: [RAX, RCX, RDX, R8, R9, R10, R11]
                    .into_iter()
                    .chain((0..6).map(Register::Xmm))
                    .collect(),
                // return address + 32 bytes of home space
                stack_arg_base: 0x28,
                pushes_args: false,
            },
            Arch::Arm64 => Self {
                arch,
                integer_args: (0..8).map(Register::X).collect(),
                float_args: (0..8).map(Register::V).collect(),
                shared_positions: false,
                return_reg: Register::X(0),
                float_return_reg: Register::V(0),
                stack_pointer: Register::Sp,
                frame_pointer: Register::X(29),
                volatile: (0..18)
                    .map(Register::X)
                    .chain((0..8).map(Register::V))
                    .chain((16..32).map(Register::V))
                    .collect(),
                stack_arg_base: 0,
                pushes_args: false,
            },
        }
    }

    /// Assign locations to a sequence of arguments.
    ///
    /// `is_float` gives the class of each argument in order (including any
    /// leading `this`).
    #[must_use]
    pub fn assign(&self, is_float: &[bool]) -> Vec<ArgumentLocation> {
        let ptr = i64::from(self.arch.pointer_size());
        let mut next_int = 0usize;
        let mut next_float = 0usize;
        let mut next_stack = 0i64;
        let mut locations = Vec::with_capacity(is_float.len());

        for (position, &float) in is_float.iter().enumerate() {
            if self.pushes_args {
                locations.push(ArgumentLocation::Pushed(position));
                continue;
            }
            let reg = if self.shared_positions {
                let table = if float { &self.float_args } else { &self.integer_args };
                table.get(position).copied()
            } else if float {
                let reg = self.float_args.get(next_float).copied();
                next_float += 1;
                reg
            } else {
                let reg = self.integer_args.get(next_int).copied();
                next_int += 1;
                reg
            };
            match reg {
                Some(reg) => locations.push(ArgumentLocation::Register(reg)),
                None => {
                    locations.push(ArgumentLocation::Stack(self.stack_arg_base + next_stack * ptr));
                    next_stack += 1;
                }
            }
        }
        locations
    }

    /// Locations of the incoming arguments as seen on method entry.
    ///
    /// Identical to [`Self::assign`] except that pushed arguments are found
    /// above the return address rather than on the caller's push stack.
    #[must_use]
    pub fn entry_locations(&self, is_float: &[bool]) -> Vec<ArgumentLocation> {
        if !self.pushes_args {
            return self.assign(is_float);
        }
        let ptr = i64::from(self.arch.pointer_size());
        (0..is_float.len())
            .map(|i| ArgumentLocation::Stack(self.stack_arg_base + i as i64 * ptr))
            .collect()
    }

    /// Check if a call clobbers the register.
    #[must_use]
    pub fn is_volatile(&self, reg: Register) -> bool {
        self.volatile.contains(&reg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x64_shared_positions() {
        let cc = CallingConvention::for_arch(Arch::X86_64);
        let locs = cc.assign(&[false, true, false, false, false]);
        assert_eq!(locs[0], ArgumentLocation::Register(RCX));
        assert_eq!(locs[1], ArgumentLocation::Register(Register::Xmm(1)));
        assert_eq!(locs[2], ArgumentLocation::Register(R8));
        assert_eq!(locs[3], ArgumentLocation::Register(R9));
        assert_eq!(locs[4], ArgumentLocation::Stack(0x28));
    }

    #[test]
    fn test_arm64_independent_counters() {
        let cc = CallingConvention::for_arch(Arch::Arm64);
        let locs = cc.assign(&[false, true, false]);
        assert_eq!(locs[0], ArgumentLocation::Register(Register::X(0)));
        assert_eq!(locs[1], ArgumentLocation::Register(Register::V(0)));
        assert_eq!(locs[2], ArgumentLocation::Register(Register::X(1)));
    }

    #[test]
    fn test_x86_pushes() {
        let cc = CallingConvention::for_arch(Arch::X86);
        let locs = cc.assign(&[false, false]);
        assert_eq!(locs, vec![ArgumentLocation::Pushed(0), ArgumentLocation::Pushed(1)]);
        let entry = cc.entry_locations(&[false, false]);
        assert_eq!(entry, vec![ArgumentLocation::Stack(4), ArgumentLocation::Stack(8)]);
        assert!(cc.is_volatile(RCX));
        assert!(!cc.is_volatile(Register::Gpr(3)));
    }
}
