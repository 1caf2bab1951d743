//! Instruction selector trait and rule tables.

use ilr_isa::{Arch, Instruction};
use tracing::trace;

use crate::{Arm64Selector, LiftContext, Result, X86Selector};

/// Predicate deciding whether a rule applies to an instruction in the current state.
pub type Matcher = fn(&Instruction, &LiftContext<'_>) -> bool;

/// Rule body: update state and append actions.
pub type Applier = fn(&Instruction, &mut LiftContext<'_>) -> Result<()>;

/// One `(predicate, constructor)` pair of a selector table.
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub matches: Matcher,
    pub apply: Applier,
}

impl Rule {
    #[must_use]
    pub const fn new(name: &'static str, matches: Matcher, apply: Applier) -> Self {
        Self { name, matches, apply }
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Architecture-specific instruction selector.
///
/// Rules are grouped by operand count and tried in table order; the first
/// rule whose predicate holds is applied. Instructions no rule matches leave
/// the state unchanged.
pub trait InstructionSelector: Send + Sync {
    /// Architectures this selector handles.
    fn supports(&self, arch: Arch) -> bool;

    /// Rules for instructions with `arity` operands, most specific first.
    fn rules(&self, arity: usize) -> &[Rule];

    /// First rule that applies to `instr`.
    fn select(&self, instr: &Instruction, ctx: &LiftContext<'_>) -> Option<&Rule> {
        self.rules(instr.arity())
            .iter()
            .find(|rule| (rule.matches)(instr, ctx))
    }

    /// Lift one instruction.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::Taint`] when the state became too inconsistent to continue.
    fn lift(&self, instr: &Instruction, ctx: &mut LiftContext<'_>) -> Result<()> {
        match self.select(instr, ctx) {
            Some(rule) => {
                trace!(address = instr.address, rule = rule.name, "rule");
                (rule.apply)(instr, ctx)
            }
            None => {
                trace!(%instr, "no rule");
                Ok(())
            }
        }
    }
}

/// Selector for the given architecture.
#[must_use]
pub fn selector_for(arch: Arch) -> &'static dyn InstructionSelector {
    match arch {
        Arch::X86 | Arch::X86_64 => &X86Selector,
        Arch::Arm64 => &Arm64Selector,
    }
}
