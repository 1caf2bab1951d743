//! Pre-scan of a method's branches.

use std::collections::{BTreeMap, BTreeSet};

use ilr_isa::Instruction;
use rustc_hash::FxHashSet;

/// Jump destinations and loops of one method, found before lifting.
#[derive(Clone, Debug, Default)]
pub struct ControlFlowScan {
    start: u64,
    end: u64,
    jump_destinations: BTreeSet<u64>,
    /// Loop start -> end (exclusive) of its last back edge.
    loops: BTreeMap<u64, u64>,
    back_edges: FxHashSet<u64>,
}

impl ControlFlowScan {
    /// Scan instructions in address order; bounds come from the first and
    /// last instruction.
    #[must_use]
    pub fn new(instructions: &[Instruction]) -> Self {
        let start = instructions.first().map_or(0, |i| i.address);
        let end = instructions.last().map_or(start, Instruction::next_address);
        Self::with_bounds(instructions, start, end)
    }

    /// Scan with explicit method bounds (`end` exclusive).
    #[must_use]
    pub fn with_bounds(instructions: &[Instruction], start: u64, end: u64) -> Self {
        let mut scan = Self {
            start,
            end,
            ..Self::default()
        };
        for instr in instructions {
            if !instr.mnemonic.is_branch() {
                continue;
            }
            let Some(target) = instr.branch_target() else {
                continue;
            };
            if target < start || target >= end {
                continue;
            }
            scan.jump_destinations.insert(target);
            if target <= instr.address {
                scan.back_edges.insert(instr.address);
                let loop_end = scan.loops.entry(target).or_insert(0);
                *loop_end = (*loop_end).max(instr.next_address());
            }
        }
        scan
    }

    #[must_use]
    pub const fn start(&self) -> u64 {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> u64 {
        self.end
    }

    /// Check if `address` lies inside the method.
    #[must_use]
    pub const fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }

    #[must_use]
    pub fn is_jump_destination(&self, address: u64) -> bool {
        self.jump_destinations.contains(&address)
    }

    pub fn jump_destinations(&self) -> impl Iterator<Item = u64> + '_ {
        self.jump_destinations.iter().copied()
    }

    pub fn loop_starts(&self) -> impl Iterator<Item = u64> + '_ {
        self.loops.keys().copied()
    }

    #[must_use]
    pub fn is_loop_start(&self, address: u64) -> bool {
        self.loops.contains_key(&address)
    }

    /// End (exclusive) of the loop starting at `address`.
    #[must_use]
    pub fn loop_end(&self, address: u64) -> Option<u64> {
        self.loops.get(&address).copied()
    }

    /// Check if the branch at `address` jumps backwards.
    #[must_use]
    pub fn is_back_edge(&self, address: u64) -> bool {
        self.back_edges.contains(&address)
    }

    /// Check if `address` lies inside any loop body.
    #[must_use]
    pub fn is_in_loop(&self, address: u64) -> bool {
        self.loops
            .range(..=address)
            .any(|(_, &end)| address < end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilr_isa::{Arch, parse_listing};

    #[test]
    fn test_loop_and_destinations() {
        let listing = "
            0x10 xor eax, eax
            0x12 cmp eax, ecx
            0x14 jge 0x20
            0x16 inc eax
            0x18 jmp 0x12
            0x20 ret
        ";
        let instrs = parse_listing(Arch::X86_64, listing).unwrap();
        let scan = ControlFlowScan::new(&instrs);
        assert_eq!(scan.start(), 0x10);
        assert_eq!(scan.end(), 0x21);
        assert!(scan.is_jump_destination(0x20));
        assert!(scan.is_jump_destination(0x12));
        assert!(scan.is_loop_start(0x12));
        assert_eq!(scan.loop_end(0x12), Some(0x20));
        assert!(scan.is_back_edge(0x18));
        assert!(!scan.is_back_edge(0x14));
        assert!(scan.is_in_loop(0x16));
        assert!(!scan.is_in_loop(0x10));
        assert!(!scan.is_in_loop(0x20));
    }

    #[test]
    fn test_targets_outside_method_ignored() {
        let instrs = parse_listing(Arch::X86_64, "0x10 jmp 0x400\n0x15 ret").unwrap();
        let scan = ControlFlowScan::new(&instrs);
        assert_eq!(scan.jump_destinations().count(), 0);
        assert_eq!(scan.loop_starts().count(), 0);
    }
}
