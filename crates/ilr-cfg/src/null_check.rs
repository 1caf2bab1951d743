//! Implicit null-check detection.
//!
//! Compiled code checks for null by branching to a landing pad that calls a
//! helper throwing `NullReferenceException`. The pad is recognized by looking
//! a few instructions past the branch target.

use ilr_isa::{Instruction, Operand};
use ilr_meta::MetadataBridge;
use rustc_hash::FxHashMap;

/// Full name of the exception thrown by null-check landing pads.
pub const NULL_REFERENCE_EXCEPTION: &str = "System.NullReferenceException";

/// Looks ahead from branch targets for null-reference throw helpers.
pub struct NullCheckDetector<'a> {
    instructions: &'a [Instruction],
    index: FxHashMap<u64, usize>,
    bridge: &'a MetadataBridge,
    lookahead: usize,
}

impl<'a> NullCheckDetector<'a> {
    #[must_use]
    pub fn new(instructions: &'a [Instruction], bridge: &'a MetadataBridge, lookahead: usize) -> Self {
        let index = instructions
            .iter()
            .enumerate()
            .map(|(i, instr)| (instr.address, i))
            .collect();
        Self {
            instructions,
            index,
            bridge,
            lookahead,
        }
    }

    /// Check if the code at `target` throws `NullReferenceException` within the
    /// lookahead window. One direct jump inside the method is followed.
    #[must_use]
    pub fn is_null_check(&self, target: u64) -> bool {
        let Some(mut idx) = self.index.get(&target).copied() else {
            return false;
        };
        let mut followed = false;
        let mut remaining = self.lookahead;
        while remaining > 0 {
            let Some(instr) = self.instructions.get(idx) else {
                return false;
            };
            remaining -= 1;
            if instr.is_return() {
                return false;
            }
            if instr.is_call() || instr.is_jump() {
                let Some(callee) = self.transfer_target(instr) else {
                    return false;
                };
                if self.bridge.keys().thrown_exception(callee) == Some(NULL_REFERENCE_EXCEPTION) {
                    return true;
                }
                match self.index.get(&callee) {
                    Some(&next) if instr.is_jump() && !followed => {
                        followed = true;
                        idx = next;
                        continue;
                    }
                    _ => return false,
                }
            }
            idx += 1;
        }
        false
    }

    /// Direct target, or the pointer loaded by an indirect `[absolute]` transfer.
    fn transfer_target(&self, instr: &Instruction) -> Option<u64> {
        if let Some(target) = instr.branch_target() {
            return Some(target);
        }
        match instr.operands.first()? {
            Operand::Memory(mem) => {
                let slot = mem.absolute_address(instr.next_address())?;
                self.bridge.read_pointer(slot)
            }
            _ => None,
        }
    }
}
