//! The action catalog.
//!
//! An action is one recognized semantic unit of a method. Actions refer to
//! values through [`ValueId`] and to each other through [`ActionId`]; neither
//! owns the other.

use std::fmt;

use ilr_isa::Condition;
use ilr_meta::{FieldAccessChain, FieldRef, MethodRef, TypeRef};

use crate::{Location, ValueId};

/// Position of an action in its session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub u32);

impl ActionId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// An operand consumed by an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Value(ValueId),
    Immediate(i64),
    /// The operand could not be resolved.
    Unknown,
}

impl Source {
    #[must_use]
    pub const fn value(self) -> Option<ValueId> {
        match self {
            Self::Value(id) => Some(id),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl From<Option<ValueId>> for Source {
    fn from(value: Option<ValueId>) -> Self {
        value.map_or(Self::Unknown, Self::Value)
    }
}

/// Binary and unary arithmetic operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Neg,
    Not,
    Convert,
}

impl ArithOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub | Self::Neg => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Not => "~",
            Self::Convert => "(conv)",
        }
    }

    #[must_use]
    pub const fn is_unary(self) -> bool {
        matches!(self, Self::Neg | Self::Not | Self::Convert)
    }
}

/// Element index of an array access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayIndex {
    Constant(i64),
    Value(ValueId),
    Unknown,
}

/// A managed call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub method: MethodRef,
    pub this: Option<ValueId>,
    /// Arguments in declaration order; `None` for arguments that were not found.
    pub args: Vec<Option<ValueId>>,
    pub result: Option<ValueId>,
    /// Instance call to an implementation inherited from a base class.
    pub superclass_call: bool,
}

/// Condition of a conditional branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchCondition {
    /// Flags-based condition set by the referenced comparison.
    Flags(Condition),
    /// `cbz` / `cbnz`: compare a register against zero.
    Zero { value: Source, negated: bool },
    /// `tbz` / `tbnz`: test a single bit.
    Bit { value: Source, bit: u8, negated: bool },
}

/// Action-specific data.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionKind {
    /// Register or stack copy that only relabels a value.
    Copy { dest: Location, value: ValueId },
    /// Overwrite of a loop-carried local.
    Reassign { target: ValueId, value: Source },
    LoadNumber { dest: Location, value: i64, result: ValueId },
    /// Load of a resolved metadata constant (type, method, field, string or float).
    LoadConstant { dest: Location, result: ValueId },
    /// Load of a string literal read directly from the binary.
    LoadRawString { dest: Location, text: String, result: ValueId },
    UnresolvedGlobal { dest: Location, address: u64, result: ValueId },
    LoadStackAddress { dest: Location, offset: i64, result: ValueId },
    StackStore { offset: i64, value: Source },
    StackLoad { dest: Location, offset: i64, value: ValueId },
    LoadClassIdentifier { dest: Location, object: ValueId, result: ValueId },
    LoadStaticFieldsPointer { dest: Location, class: TypeRef, result: ValueId },
    FieldRead { dest: Location, object: ValueId, chain: FieldAccessChain, result: ValueId },
    FieldWrite { object: ValueId, chain: FieldAccessChain, value: Source },
    FieldAddress { dest: Location, object: ValueId, chain: FieldAccessChain, result: ValueId },
    StaticFieldRead { dest: Location, field: FieldRef, result: ValueId },
    StaticFieldWrite { field: FieldRef, value: Source },
    ArrayLength { dest: Location, array: ValueId, result: ValueId },
    ArrayElementRead { dest: Location, array: ValueId, index: ArrayIndex, result: ValueId },
    ArrayElementWrite { array: ValueId, index: ArrayIndex, value: Source },
    LoadVirtualFunctionPointer { dest: Location, class: TypeRef, slot: u16, method: Option<MethodRef> },
    LoadInterfaceMethod { dest: Location, interface: TypeRef, slot: u16, method: Option<MethodRef> },
    CallManaged(Call),
    CallVirtual(Call),
    /// Call whose target could not be mapped to a method.
    CallUnresolved { target: Option<u64>, result: Option<ValueId> },
    ClassInit { class: Option<TypeRef> },
    InitializeMethodMetadata { usage: Option<u64> },
    AllocateInstance { class: Option<TypeRef>, result: ValueId },
    AllocateArray { array_type: Option<TypeRef>, length: Source, result: ValueId },
    Box { value: Source, ty: Option<TypeRef>, result: ValueId },
    Unbox { object: Source, ty: Option<TypeRef>, result: ValueId },
    /// `isinst` (`throws == false`) or `castclass` (`throws == true`).
    SafeCast { object: Source, ty: Option<TypeRef>, throws: bool, result: ValueId },
    /// Throw of an exception object, or of a fixed type by a typed helper.
    Throw { exception: Source, exception_type: Option<String> },
    ResolveInternalCall { name: Option<String>, method: Option<MethodRef>, result: ValueId },
    TypeToObject { ty: Option<TypeRef>, result: ValueId },
    Arithmetic { op: ArithOp, dest: Location, left: Source, right: Source, result: ValueId },
    /// Division by a constant recovered from a multiply/shift sequence.
    IntegerDivision {
        dest: Location,
        dividend: Source,
        divisor: i64,
        /// The recovered divisor was not close enough to an integer.
        potentially_wrong: bool,
        result: ValueId,
    },
    Compare { left: Source, right: Source, float: bool },
    SetFromComparison { dest: Location, condition: Condition, comparison: Option<ActionId>, result: ValueId },
    ConditionalBranch {
        condition: BranchCondition,
        target: u64,
        comparison: Option<ActionId>,
        is_loop_back_edge: bool,
        implicit_null_check: bool,
    },
    Jump { target: u64, structural: bool },
    TailCall(Call),
    Return { value: Option<Source> },
    FpuLoad { value: Source },
    FpuStore { dest: Location, value: Source },
    /// Recognized shape whose semantics could not be determined.
    Unresolved { comment: String },
}

/// One semantic unit derived from one or more instructions.
#[derive(Clone, Debug, PartialEq)]
pub struct Action {
    pub id: ActionId,
    /// Addresses of the source instructions, first is the primary one.
    pub sources: Vec<u64>,
    pub kind: ActionKind,
}

impl Action {
    #[must_use]
    pub fn new(id: ActionId, address: u64, kind: ActionKind) -> Self {
        Self {
            id,
            sources: vec![address],
            kind,
        }
    }

    /// Address of the primary source instruction.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.sources.first().copied().unwrap_or_default()
    }

    /// Check if the action is observable, as opposed to bookkeeping that only
    /// moves values around.
    #[must_use]
    pub const fn is_important(&self) -> bool {
        match &self.kind {
            ActionKind::Copy { .. }
            | ActionKind::LoadNumber { .. }
            | ActionKind::LoadConstant { .. }
            | ActionKind::LoadRawString { .. }
            | ActionKind::LoadStackAddress { .. }
            | ActionKind::StackStore { .. }
            | ActionKind::StackLoad { .. }
            | ActionKind::LoadClassIdentifier { .. }
            | ActionKind::LoadStaticFieldsPointer { .. }
            | ActionKind::FieldAddress { .. }
            | ActionKind::LoadVirtualFunctionPointer { .. }
            | ActionKind::LoadInterfaceMethod { .. }
            | ActionKind::ClassInit { .. }
            | ActionKind::InitializeMethodMetadata { .. }
            | ActionKind::Compare { .. }
            | ActionKind::FpuLoad { .. }
            | ActionKind::FpuStore { .. } => false,
            ActionKind::Jump { structural, .. } => !*structural,
            _ => true,
        }
    }

    /// Check if the action marks something that could not be resolved.
    #[must_use]
    pub const fn is_unresolved(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::Unresolved { .. }
                | ActionKind::UnresolvedGlobal { .. }
                | ActionKind::CallUnresolved { .. }
        )
    }

    /// Value produced by the action, if any.
    #[must_use]
    pub const fn result(&self) -> Option<ValueId> {
        match &self.kind {
            ActionKind::LoadNumber { result, .. }
            | ActionKind::LoadConstant { result, .. }
            | ActionKind::LoadRawString { result, .. }
            | ActionKind::UnresolvedGlobal { result, .. }
            | ActionKind::LoadStackAddress { result, .. }
            | ActionKind::LoadClassIdentifier { result, .. }
            | ActionKind::LoadStaticFieldsPointer { result, .. }
            | ActionKind::FieldRead { result, .. }
            | ActionKind::FieldAddress { result, .. }
            | ActionKind::StaticFieldRead { result, .. }
            | ActionKind::ArrayLength { result, .. }
            | ActionKind::ArrayElementRead { result, .. }
            | ActionKind::AllocateInstance { result, .. }
            | ActionKind::AllocateArray { result, .. }
            | ActionKind::Box { result, .. }
            | ActionKind::Unbox { result, .. }
            | ActionKind::SafeCast { result, .. }
            | ActionKind::ResolveInternalCall { result, .. }
            | ActionKind::TypeToObject { result, .. }
            | ActionKind::Arithmetic { result, .. }
            | ActionKind::IntegerDivision { result, .. }
            | ActionKind::SetFromComparison { result, .. } => Some(*result),
            ActionKind::StackLoad { value, .. } | ActionKind::Copy { value, .. } => Some(*value),
            ActionKind::CallManaged(call) | ActionKind::CallVirtual(call) | ActionKind::TailCall(call) => {
                call.result
            }
            ActionKind::CallUnresolved { result, .. } => *result,
            _ => None,
        }
    }

    /// Short action name used in diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match &self.kind {
            ActionKind::Copy { .. } => "copy",
            ActionKind::Reassign { .. } => "reassign",
            ActionKind::LoadNumber { .. } => "load-number",
            ActionKind::LoadConstant { .. } => "load-constant",
            ActionKind::LoadRawString { .. } => "load-raw-string",
            ActionKind::UnresolvedGlobal { .. } => "unresolved-global",
            ActionKind::LoadStackAddress { .. } => "load-stack-address",
            ActionKind::StackStore { .. } => "stack-store",
            ActionKind::StackLoad { .. } => "stack-load",
            ActionKind::LoadClassIdentifier { .. } => "load-class-identifier",
            ActionKind::LoadStaticFieldsPointer { .. } => "load-static-fields-pointer",
            ActionKind::FieldRead { .. } => "field-read",
            ActionKind::FieldWrite { .. } => "field-write",
            ActionKind::FieldAddress { .. } => "field-address",
            ActionKind::StaticFieldRead { .. } => "static-field-read",
            ActionKind::StaticFieldWrite { .. } => "static-field-write",
            ActionKind::ArrayLength { .. } => "array-length",
            ActionKind::ArrayElementRead { .. } => "array-element-read",
            ActionKind::ArrayElementWrite { .. } => "array-element-write",
            ActionKind::LoadVirtualFunctionPointer { .. } => "load-virtual-function-pointer",
            ActionKind::LoadInterfaceMethod { .. } => "load-interface-method",
            ActionKind::CallManaged(_) => "call-managed",
            ActionKind::CallVirtual(_) => "call-virtual",
            ActionKind::CallUnresolved { .. } => "call-unresolved",
            ActionKind::ClassInit { .. } => "class-init",
            ActionKind::InitializeMethodMetadata { .. } => "initialize-method-metadata",
            ActionKind::AllocateInstance { .. } => "allocate-instance",
            ActionKind::AllocateArray { .. } => "allocate-array",
            ActionKind::Box { .. } => "box",
            ActionKind::Unbox { .. } => "unbox",
            ActionKind::SafeCast { .. } => "safe-cast",
            ActionKind::Throw { .. } => "throw",
            ActionKind::ResolveInternalCall { .. } => "resolve-internal-call",
            ActionKind::TypeToObject { .. } => "type-to-object",
            ActionKind::Arithmetic { .. } => "arithmetic",
            ActionKind::IntegerDivision { .. } => "integer-division",
            ActionKind::Compare { .. } => "compare",
            ActionKind::SetFromComparison { .. } => "set-from-comparison",
            ActionKind::ConditionalBranch { .. } => "conditional-branch",
            ActionKind::Jump { .. } => "jump",
            ActionKind::TailCall(_) => "tail-call",
            ActionKind::Return { .. } => "return",
            ActionKind::FpuLoad { .. } => "fpu-load",
            ActionKind::FpuStore { .. } => "fpu-store",
            ActionKind::Unresolved { .. } => "unresolved",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} {}", self.address(), self.name())
    }
}
