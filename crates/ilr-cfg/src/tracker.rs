//! Region state machine driven by the instruction walk.

use std::fmt;

use ilr_ir::ActionId;
use tracing::warn;

use crate::ControlFlowScan;

/// Kind of a structured region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegionKind {
    If,
    Else,
    Loop,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::If => "if",
            Self::Else => "else",
            Self::Loop => "loop",
        })
    }
}

/// Innermost region the walk is currently in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionState {
    NoRegion,
    InIf,
    InElse,
    InLoop,
}

/// A recovered region covering `[start, end)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub kind: RegionKind,
    pub start: u64,
    pub end: u64,
    /// Conditional branch that opened the region (`if` and `else`).
    pub branch: Option<ActionId>,
    /// Nesting depth, 0 for outermost.
    pub depth: usize,
}

/// A region still open when the method ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionWarning {
    pub kind: RegionKind,
    pub start: u64,
    pub end: u64,
}

impl fmt::Display for RegionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} region {:#x}..{:#x} left open at method end",
            self.kind, self.start, self.end
        )
    }
}

/// Role of a conditional branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchRole {
    LoopBackEdge,
    OpensIf,
    /// Forward exit that does not nest (e.g. `break`, early return).
    Exit,
}

/// Role of an unconditional jump.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JumpRole {
    /// The jump ends an `if` body and skips the `else` body that follows.
    OpensElse,
    LoopBackEdge,
    /// Unstructured jump inside the method.
    Internal,
    /// Jump out of the method (tail call).
    Exit,
}

/// Tracks if/else/loop regions while the walk visits instructions.
#[derive(Clone, Debug)]
pub struct BoundaryTracker {
    scan: ControlFlowScan,
    open: Vec<Region>,
    regions: Vec<Region>,
    warnings: Vec<RegionWarning>,
}

impl BoundaryTracker {
    #[must_use]
    pub const fn new(scan: ControlFlowScan) -> Self {
        Self {
            scan,
            open: Vec::new(),
            regions: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub const fn scan(&self) -> &ControlFlowScan {
        &self.scan
    }

    #[must_use]
    pub fn state(&self) -> RegionState {
        match self.open.last().map(|r| r.kind) {
            None => RegionState::NoRegion,
            Some(RegionKind::If) => RegionState::InIf,
            Some(RegionKind::Else) => RegionState::InElse,
            Some(RegionKind::Loop) => RegionState::InLoop,
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Called before the instruction at `address` is lifted.
    pub fn enter(&mut self, address: u64) {
        while self.open.last().is_some_and(|r| r.end <= address) {
            self.close_top();
        }
        match self.scan.loop_end(address) {
            Some(end) if self.fits(end) => self.push(RegionKind::Loop, address, end, None),
            _ => {}
        }
    }

    /// Classify a conditional branch and open an `if` region if it nests.
    pub fn on_conditional_branch(
        &mut self,
        address: u64,
        next: u64,
        target: u64,
        action: ActionId,
    ) -> BranchRole {
        if self.scan.is_back_edge(address) {
            return BranchRole::LoopBackEdge;
        }
        if target > address && target <= self.scan.end() && self.fits(target) {
            self.push(RegionKind::If, next, target, Some(action));
            return BranchRole::OpensIf;
        }
        BranchRole::Exit
    }

    /// Classify an unconditional jump; a jump that ends an `if` body turns the
    /// region into `if` + `else`.
    pub fn on_jump(&mut self, address: u64, next: u64, target: u64) -> JumpRole {
        if !self.scan.contains(target) && target != self.scan.end() {
            return JumpRole::Exit;
        }
        if self.scan.is_back_edge(address) {
            return JumpRole::LoopBackEdge;
        }
        let closes_if = self
            .open
            .last()
            .is_some_and(|r| r.kind == RegionKind::If && r.end == next);
        if closes_if && target > next {
            let branch = self.open.last().and_then(|r| r.branch);
            let Some(region) = self.open.pop() else {
                return JumpRole::Internal;
            };
            if self.fits(target) {
                self.regions.push(region);
                self.push(RegionKind::Else, next, target, branch);
                return JumpRole::OpensElse;
            }
            self.open.push(region);
        }
        JumpRole::Internal
    }

    /// Close everything once the walk stops. `walked_end` is the end of the
    /// last lifted instruction; regions extending past it are reported as
    /// warnings.
    pub fn finish(&mut self, walked_end: u64) {
        while let Some(region) = self.open.last() {
            if region.end > walked_end {
                let warning = RegionWarning {
                    kind: region.kind,
                    start: region.start,
                    end: region.end,
                };
                warn!(%warning, "unclosed region");
                self.warnings.push(warning);
            }
            self.close_top();
        }
    }

    /// Closed regions ordered by start address, outer regions first.
    #[must_use]
    pub fn regions(&self) -> Vec<Region> {
        let mut regions = self.regions.clone();
        regions.sort_by(|a, b| a.start.cmp(&b.start).then(a.depth.cmp(&b.depth)));
        regions
    }

    #[must_use]
    pub fn warnings(&self) -> &[RegionWarning] {
        &self.warnings
    }

    fn fits(&self, end: u64) -> bool {
        self.open.last().is_none_or(|r| end <= r.end)
    }

    fn push(&mut self, kind: RegionKind, start: u64, end: u64, branch: Option<ActionId>) {
        let depth = self.open.len();
        self.open.push(Region {
            kind,
            start,
            end,
            branch,
            depth,
        });
    }

    fn close_top(&mut self) {
        if let Some(region) = self.open.pop() {
            self.regions.push(region);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilr_isa::{Arch, Instruction, parse_listing};

    fn walk(listing: &str) -> (BoundaryTracker, Vec<Instruction>) {
        let instrs = parse_listing(Arch::X86_64, listing).unwrap();
        let tracker = BoundaryTracker::new(ControlFlowScan::new(&instrs));
        (tracker, instrs)
    }

    #[test]
    fn test_if_else() {
        let (mut tracker, instrs) = walk(
            "0x10 cmp ecx, 0x1
             0x13 jne 0x1a
             0x15 mov eax, 0x1
             0x18 jmp 0x1f
             0x1a mov eax, 0x2
             0x1f ret",
        );
        for (i, instr) in instrs.iter().enumerate() {
            tracker.enter(instr.address);
            match instr.address {
                0x13 => {
                    let role = tracker.on_conditional_branch(0x13, 0x15, 0x1a, ActionId(i as u32));
                    assert_eq!(role, BranchRole::OpensIf);
                    assert_eq!(tracker.state(), RegionState::InIf);
                }
                0x18 => {
                    assert_eq!(tracker.on_jump(0x18, 0x1a, 0x1f), JumpRole::OpensElse);
                    assert_eq!(tracker.state(), RegionState::InElse);
                }
                0x1f => assert_eq!(tracker.state(), RegionState::NoRegion),
                _ => {}
            }
        }
        tracker.finish(0x20);
        let regions = tracker.regions();
        assert_eq!(regions.len(), 2);
        assert_eq!((regions[0].kind, regions[0].start, regions[0].end), (RegionKind::If, 0x15, 0x1a));
        assert_eq!((regions[1].kind, regions[1].start, regions[1].end), (RegionKind::Else, 0x1a, 0x1f));
        assert_eq!(regions[1].branch, Some(ActionId(1)));
        assert!(tracker.warnings().is_empty());
    }

    #[test]
    fn test_loop_back_edge() {
        let (mut tracker, _) = walk(
            "0x10 xor eax, eax
             0x12 inc eax
             0x14 cmp eax, ecx
             0x16 jl 0x12
             0x18 ret",
        );
        tracker.enter(0x10);
        tracker.enter(0x12);
        assert_eq!(tracker.state(), RegionState::InLoop);
        tracker.enter(0x16);
        assert_eq!(
            tracker.on_conditional_branch(0x16, 0x18, 0x12, ActionId(0)),
            BranchRole::LoopBackEdge
        );
        tracker.enter(0x18);
        assert_eq!(tracker.state(), RegionState::NoRegion);
        tracker.finish(0x19);
        assert_eq!(tracker.regions()[0].kind, RegionKind::Loop);
    }

    #[test]
    fn test_unclosed_region_warns() {
        let (mut tracker, _) = walk("0x10 test ecx, ecx\n0x12 je 0x15\n0x14 ret");
        tracker.enter(0x12);
        assert_eq!(tracker.on_conditional_branch(0x12, 0x14, 0x15, ActionId(0)), BranchRole::OpensIf);
        tracker.finish(0x15);
        assert!(tracker.warnings().is_empty());

        // The walk stopped before the region's end.
        let instrs = parse_listing(Arch::X86_64, "0x10 je 0x40\n0x12 ret").unwrap();
        let mut tracker = BoundaryTracker::new(ControlFlowScan::with_bounds(&instrs, 0x10, 0x50));
        tracker.enter(0x10);
        assert_eq!(tracker.on_conditional_branch(0x10, 0x12, 0x40, ActionId(0)), BranchRole::OpensIf);
        tracker.finish(0x13);
        assert_eq!(tracker.warnings().len(), 1);
        assert_eq!(tracker.warnings()[0].to_string(), "if region 0x12..0x40 left open at method end");
        assert_eq!(tracker.state(), RegionState::NoRegion);

        // A target past the method end never opens a region.
        let mut short = BoundaryTracker::new(ControlFlowScan::with_bounds(&instrs, 0x10, 0x13));
        short.enter(0x10);
        assert_eq!(short.on_conditional_branch(0x10, 0x12, 0x40, ActionId(0)), BranchRole::Exit);
    }

    #[test]
    fn test_jump_out_of_method() {
        let (mut tracker, _) = walk("0x10 jmp 0x1000\n0x15 ret");
        tracker.enter(0x10);
        assert_eq!(tracker.on_jump(0x10, 0x15, 0x1000), JumpRole::Exit);
    }
}
