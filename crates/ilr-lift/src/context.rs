//! Mutable state threaded through the rules while one method is walked.

use ilr_cfg::{BoundaryTracker, ControlFlowScan, NullCheckDetector};
use ilr_ir::{Action, ActionId, ActionKind, ConstantPayload, Location, MachineState, Source, Value, ValueId};
use ilr_isa::{Arch, ArgumentLocation, CallingConvention, Instruction, Operand, Register};
use ilr_meta::{FieldAccessChain, MetadataBridge, MethodRef, RuntimeLayout, TypeRef};
use rustc_hash::FxHashSet;
use tracing::trace;

use crate::{LiftConfig, LiftStatus, MethodAnalysisSession, Parameter};

/// Lift context for one method.
///
/// Rules read the machine state and metadata through it and append actions to
/// it. It becomes a [`MethodAnalysisSession`] once the walk ends.
pub struct LiftContext<'a> {
    bridge: &'a MetadataBridge,
    config: &'a LiftConfig,
    arch: Arch,
    convention: CallingConvention,
    state: MachineState,
    actions: Vec<Action>,
    tracker: BoundaryTracker,
    null_checks: NullCheckDetector<'a>,
    method: Option<MethodRef>,
    this_type: Option<TypeRef>,
    return_type: Option<TypeRef>,
    parameters: Vec<Parameter>,
    last_comparison: Option<ActionId>,
    /// Values loaded out of a virtual table.
    virtual_pointers: FxHashSet<ValueId>,
}

impl<'a> LiftContext<'a> {
    pub(crate) fn new(
        bridge: &'a MetadataBridge,
        config: &'a LiftConfig,
        arch: Arch,
        instructions: &'a [Instruction],
        scan: ControlFlowScan,
        method: Option<MethodRef>,
    ) -> Self {
        Self {
            bridge,
            config,
            arch,
            convention: arch.calling_convention(),
            state: MachineState::new(arch.pointer_size()),
            actions: Vec::new(),
            tracker: BoundaryTracker::new(scan),
            null_checks: NullCheckDetector::new(instructions, bridge, config.null_check_lookahead),
            method,
            this_type: None,
            return_type: None,
            parameters: Vec::new(),
            last_comparison: None,
            virtual_pointers: FxHashSet::default(),
        }
    }

    #[must_use]
    pub const fn arch(&self) -> Arch {
        self.arch
    }

    #[must_use]
    pub const fn bridge(&self) -> &'a MetadataBridge {
        self.bridge
    }

    #[must_use]
    pub const fn config(&self) -> &LiftConfig {
        self.config
    }

    #[must_use]
    pub const fn convention(&self) -> &CallingConvention {
        &self.convention
    }

    #[must_use]
    pub const fn state(&self) -> &MachineState {
        &self.state
    }

    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    #[must_use]
    pub const fn tracker(&self) -> &BoundaryTracker {
        &self.tracker
    }

    #[must_use]
    pub const fn method(&self) -> Option<&MethodRef> {
        self.method.as_ref()
    }

    pub(crate) const fn state_mut(&mut self) -> &mut MachineState {
        &mut self.state
    }

    pub(crate) const fn tracker_mut(&mut self) -> &mut BoundaryTracker {
        &mut self.tracker
    }

    pub(crate) const fn layout(&self) -> &'a RuntimeLayout {
        self.bridge.layout()
    }

    pub(crate) fn pointer_size(&self) -> i64 {
        i64::from(self.arch.pointer_size())
    }

    pub(crate) const fn return_type(&self) -> Option<&TypeRef> {
        self.return_type.as_ref()
    }

    /// Forget everything a call may have overwritten.
    pub(crate) fn clobber_volatile(&mut self) {
        self.state.clobber(&self.convention.volatile);
        self.last_comparison = None;
    }

    pub(crate) fn is_null_check(&self, target: u64) -> bool {
        self.null_checks.is_null_check(target)
    }

    // ---- actions ----

    pub(crate) fn next_action_id(&self) -> ActionId {
        ActionId(u32::try_from(self.actions.len()).expect("action ids fit in u32"))
    }

    /// Append an action derived from `instr`.
    pub(crate) fn emit(&mut self, instr: &Instruction, kind: ActionKind) -> ActionId {
        let id = self.next_action_id();
        self.actions.push(Action::new(id, instr.address, kind));
        id
    }

    /// Append an unresolved marker.
    pub(crate) fn unresolved(&mut self, instr: &Instruction, comment: impl Into<String>) -> ActionId {
        let comment = comment.into();
        trace!(address = instr.address, %comment, "unresolved");
        self.emit(instr, ActionKind::Unresolved { comment })
    }

    pub(crate) const fn last_comparison(&self) -> Option<ActionId> {
        self.last_comparison
    }

    pub(crate) const fn set_last_comparison(&mut self, comparison: Option<ActionId>) {
        self.last_comparison = comparison;
    }

    // ---- values ----

    pub(crate) fn value(&self, id: ValueId) -> Option<&Value> {
        self.state.value(id)
    }

    pub(crate) fn payload(&self, id: ValueId) -> Option<&ConstantPayload> {
        self.value(id).and_then(Value::as_constant)
    }

    /// Managed type of a local.
    pub(crate) fn type_of(&self, id: ValueId) -> Option<TypeRef> {
        self.value(id).and_then(Value::ty).cloned()
    }

    pub(crate) fn register(&self, reg: Register) -> Option<ValueId> {
        self.state.get_register(reg)
    }

    pub(crate) fn register_payload(&self, reg: Register) -> Option<&ConstantPayload> {
        self.register(reg).and_then(|id| self.payload(id))
    }

    /// Number held by a constant, ignoring locals with a known initial value.
    pub(crate) fn constant_number(&self, source: Source) -> Option<i64> {
        match source {
            Source::Immediate(n) => Some(n),
            Source::Value(id) => match self.payload(id)? {
                ConstantPayload::Number(n) => Some(*n),
                _ => None,
            },
            Source::Unknown => None,
        }
    }

    pub(crate) fn mark_virtual(&mut self, id: ValueId) {
        self.virtual_pointers.insert(id);
    }

    pub(crate) fn is_virtual_pointer(&self, id: ValueId) -> bool {
        self.virtual_pointers.contains(&id)
    }

    /// `method` with generic instances routed through the bridge, so every
    /// reference to one closed instance is the same value.
    pub(crate) fn closed_method(&self, method: &MethodRef) -> MethodRef {
        if !method.is_generic_instance() {
            return method.clone();
        }
        self.bridge
            .resolve_generic_method_ref(method.method, method.declaring_type.generic_args(), &method.method_args)
            .unwrap_or_else(|| method.clone())
    }

    /// Full `System.*` type by short name.
    pub(crate) fn system_type(&self, name: &str) -> Option<TypeRef> {
        self.bridge
            .type_by_full_name(&format!("System.{name}"))
            .map(TypeRef::Definition)
    }

    /// Resolve an instance field access on `object`. The `this` of a value-type
    /// method points at unboxed data, so its offsets are shifted by the header.
    pub(crate) fn field_chain(&self, object: ValueId, displacement: i64) -> Option<FieldAccessChain> {
        let value = self.value(object)?;
        let ty = value.ty()?;
        let unboxed = value.as_local().is_some_and(|l| l.is_this) && self.bridge.is_value_type(ty);
        let offset = if unboxed {
            displacement + self.layout().object_header_size
        } else {
            displacement
        };
        self.bridge.resolve_field_chain(ty, offset)
    }

    // ---- operands ----

    /// Entry-relative frame offset addressed by a memory operand.
    pub(crate) fn frame_address(&self, op: &Operand) -> Option<i64> {
        match op {
            Operand::StackSlot(rel) => Some(self.state.frame_offset(*rel)),
            Operand::Memory(mem) if mem.index.is_none() => match mem.base.and_then(|b| self.register_payload(b)) {
                Some(ConstantPayload::StackPointer(base)) => Some(base + mem.displacement),
                _ => None,
            },
            _ => None,
        }
    }

    /// Storage location named by a register or frame operand.
    pub(crate) fn location(&self, op: &Operand) -> Option<Location> {
        match op {
            Operand::Register(reg) => Some(Location::Register(*reg)),
            _ => self.frame_address(op).map(Location::Stack),
        }
    }

    /// Value currently stored at a register or frame operand.
    pub(crate) fn read(&self, op: &Operand) -> Option<ValueId> {
        self.read_location(self.location(op)?)
    }

    pub(crate) fn read_location(&self, location: Location) -> Option<ValueId> {
        match location {
            Location::Register(reg) => self.state.get_register(reg),
            Location::Stack(offset) => self.state.get_stack_offset(offset),
        }
    }

    /// Operand as an action input.
    pub(crate) fn source(&self, op: &Operand) -> Source {
        match op {
            Operand::Immediate(n) => Source::Immediate(*n),
            Operand::Register(reg) if reg.is_zero() => Source::Immediate(0),
            _ => self.read(op).into(),
        }
    }

    pub(crate) fn bind(&mut self, location: Location, id: ValueId) {
        match location {
            Location::Register(reg) => self.state.set_register(reg, id),
            Location::Stack(offset) => self.state.set_stack_offset(offset, id),
        }
    }

    pub(crate) fn clear(&mut self, location: Location) {
        match location {
            Location::Register(reg) => self.state.clear_register(reg),
            Location::Stack(offset) => self.state.clear_stack_offset(offset),
        }
    }

    pub(crate) fn new_local(&mut self, ty: Option<TypeRef>, dest: Location) -> ValueId {
        self.state.make_local(ty, Some(dest), None)
    }

    pub(crate) fn new_constant(&mut self, payload: ConstantPayload, dest: Location) -> ValueId {
        match dest {
            Location::Register(reg) => self.state.make_constant(payload, Some(reg)),
            Location::Stack(offset) => {
                let id = self.state.make_constant(payload, None);
                self.state.set_stack_offset(offset, id);
                id
            }
        }
    }

    // ---- entry ----

    /// Bind `this` and the declared parameters to their entry locations.
    pub(crate) fn bind_parameters(&mut self) {
        let Some(method) = self.method.clone() else {
            return;
        };
        let Some(signature) = self.bridge.method_signature(&method) else {
            return;
        };
        self.this_type.clone_from(&signature.this_type);
        self.return_type.clone_from(&signature.return_type);

        let has_this = signature.this_type.is_some();
        let arguments = signature.arguments();
        let floats: Vec<bool> = arguments.iter().map(|ty| self.bridge.is_float_type(ty)).collect();
        let locations = self.convention.entry_locations(&floats);
        let declared = self.bridge.method_def(method.method).map(|def| def.params.as_slice()).unwrap_or_default();

        for (position, (ty, location)) in arguments.into_iter().zip(locations).enumerate() {
            let bound = match location {
                ArgumentLocation::Register(reg) => Location::Register(reg),
                ArgumentLocation::Stack(offset) => Location::Stack(offset),
                ArgumentLocation::Pushed(_) => continue,
            };
            let is_this = has_this && position == 0;
            let (name, parameter) = if is_this {
                ("this".to_string(), None)
            } else {
                let index = position - usize::from(has_this);
                let name = declared
                    .get(index)
                    .map_or_else(|| format!("arg{index}"), |p| p.name.clone());
                (name, u16::try_from(index).ok())
            };
            let value = self
                .state
                .make_parameter(&name, Some(ty.clone()), Some(bound), parameter);
            self.parameters.push(Parameter {
                name,
                ty: Some(ty.clone()),
                location,
                value,
                is_this,
            });
        }
    }

    /// Type of `this` for instance methods.
    pub(crate) const fn this_type(&self) -> Option<&TypeRef> {
        self.this_type.as_ref()
    }

    pub(crate) fn into_session(
        self,
        start: u64,
        end: u64,
        status: LiftStatus,
        instructions_lifted: usize,
    ) -> MethodAnalysisSession {
        let scan = self.tracker.scan();
        let jump_destinations = scan.jump_destinations().collect();
        let loop_starts = scan.loop_starts().collect();
        let regions = self.tracker.regions();
        let warnings = self.tracker.warnings().to_vec();
        MethodAnalysisSession {
            arch: self.arch,
            method: self.method,
            start,
            end,
            parameters: self.parameters,
            return_type: self.return_type,
            actions: self.actions,
            values: self.state.values().clone(),
            jump_destinations,
            loop_starts,
            regions,
            warnings,
            status,
            instructions_lifted,
        }
    }
}
