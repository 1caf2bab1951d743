//! Per-method analysis result.

use ilr_cfg::{Region, RegionWarning};
use ilr_ir::{Action, ActionId, Value, ValueId, ValueTable};
use ilr_isa::{Arch, ArgumentLocation};
use ilr_meta::{MethodRef, TypeRef};

use crate::Taint;

/// Outcome of a method lift.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LiftStatus {
    Complete,
    /// The walk stopped early; actions before the fault are kept.
    Tainted(Taint),
}

/// An incoming argument as bound on method entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub ty: Option<TypeRef>,
    pub location: ArgumentLocation,
    pub value: ValueId,
    pub is_this: bool,
}

/// Everything known about one lifted method.
///
/// Built by [`crate::lift_method`] and read-only afterwards.
#[derive(Clone, Debug)]
pub struct MethodAnalysisSession {
    pub(crate) arch: Arch,
    pub(crate) method: Option<MethodRef>,
    pub(crate) start: u64,
    pub(crate) end: u64,
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) return_type: Option<TypeRef>,
    pub(crate) actions: Vec<Action>,
    pub(crate) values: ValueTable,
    pub(crate) jump_destinations: Vec<u64>,
    pub(crate) loop_starts: Vec<u64>,
    pub(crate) regions: Vec<Region>,
    pub(crate) warnings: Vec<RegionWarning>,
    pub(crate) status: LiftStatus,
    pub(crate) instructions_lifted: usize,
}

impl MethodAnalysisSession {
    #[must_use]
    pub const fn arch(&self) -> Arch {
        self.arch
    }

    /// Method being lifted, when the start address is a known method.
    #[must_use]
    pub const fn method(&self) -> Option<&MethodRef> {
        self.method.as_ref()
    }

    /// Address of the first lifted instruction.
    #[must_use]
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// End of the lifted range (exclusive).
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.end
    }

    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    #[must_use]
    pub const fn return_type(&self) -> Option<&TypeRef> {
        self.return_type.as_ref()
    }

    /// All actions in walk order.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    #[must_use]
    pub fn action(&self, id: ActionId) -> Option<&Action> {
        self.actions.get(id.index())
    }

    /// Actions that contribute to emitted output.
    pub fn important_actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| a.is_important())
    }

    #[must_use]
    pub const fn values(&self) -> &ValueTable {
        &self.values
    }

    #[must_use]
    pub fn value(&self, id: ValueId) -> Option<&Value> {
        self.values.get(id)
    }

    /// In-method branch targets, ascending.
    #[must_use]
    pub fn jump_destinations(&self) -> &[u64] {
        &self.jump_destinations
    }

    /// Loop heads, ascending.
    #[must_use]
    pub fn loop_starts(&self) -> &[u64] {
        &self.loop_starts
    }

    /// Recovered regions ordered by start address, outer first.
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    #[must_use]
    pub fn warnings(&self) -> &[RegionWarning] {
        &self.warnings
    }

    #[must_use]
    pub const fn status(&self) -> &LiftStatus {
        &self.status
    }

    #[must_use]
    pub const fn taint(&self) -> Option<&Taint> {
        match &self.status {
            LiftStatus::Tainted(taint) => Some(taint),
            LiftStatus::Complete => None,
        }
    }

    #[must_use]
    pub const fn is_tainted(&self) -> bool {
        matches!(self.status, LiftStatus::Tainted(_))
    }

    #[must_use]
    pub const fn instructions_lifted(&self) -> usize {
        self.instructions_lifted
    }

    /// Number of unresolved markers among the actions.
    #[must_use]
    pub fn unresolved_count(&self) -> usize {
        self.actions.iter().filter(|a| a.is_unresolved()).count()
    }
}
