//! Calls: runtime helpers, managed calls, virtual and interface dispatch.

use ilr_ir::{ActionKind, Call, ConstantPayload, Location, Source, ValueId};
use ilr_isa::{ArgumentLocation, Instruction, Operand, Register};
use ilr_meta::{KeyFunction, MethodRef, TypeRef};
use tracing::{debug, trace};

use crate::{LiftContext, Result, Taint, TaintReason};

/// How a managed call is dispatched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Direct,
    Virtual,
    Tail,
}

/// Call to a fixed address.
pub(crate) fn call_direct(ctx: &mut LiftContext<'_>, instr: &Instruction, target: u64) -> Result<()> {
    let bridge = ctx.bridge();
    if let Some(exception) = bridge.keys().thrown_exception(target) {
        ctx.clobber_volatile();
        ctx.emit(
            instr,
            ActionKind::Throw {
                exception: Source::Unknown,
                exception_type: Some(exception.to_string()),
            },
        );
        return Ok(());
    }
    if let Some(kind) = bridge.keys().classify(target) {
        helper(ctx, instr, kind);
        return Ok(());
    }
    if let Some(method) = bridge.method_at(target) {
        let method = ctx.closed_method(method);
        return managed_call(ctx, instr, method, Dispatch::Direct);
    }
    unresolved_call(ctx, instr, Some(target));
    Ok(())
}

/// `call reg` / `blr reg`.
pub(crate) fn call_register(ctx: &mut LiftContext<'_>, instr: &Instruction, reg: Register) -> Result<()> {
    let Some(value) = ctx.register(reg) else {
        unresolved_call(ctx, instr, None);
        return Ok(());
    };
    call_through(ctx, instr, value)
}

/// Call through a value holding a function pointer.
fn call_through(ctx: &mut LiftContext<'_>, instr: &Instruction, value: ValueId) -> Result<()> {
    match ctx.payload(value).cloned() {
        Some(ConstantPayload::InterfaceMethod(method)) => managed_call(ctx, instr, method, Dispatch::Virtual),
        Some(ConstantPayload::Method(method)) => {
            let dispatch = if ctx.is_virtual_pointer(value) {
                Dispatch::Virtual
            } else {
                Dispatch::Direct
            };
            managed_call(ctx, instr, method, dispatch)
        }
        Some(ConstantPayload::Number(address)) => call_direct(ctx, instr, address as u64),
        _ => {
            unresolved_call(ctx, instr, None);
            Ok(())
        }
    }
}

/// `call [mem]`.
pub(crate) fn call_memory(ctx: &mut LiftContext<'_>, instr: &Instruction, op: &Operand) -> Result<()> {
    let mem = match op {
        Operand::Memory(mem) => *mem,
        _ => {
            match ctx.read(op) {
                Some(value) => return call_through(ctx, instr, value),
                None => unresolved_call(ctx, instr, None),
            }
            return Ok(());
        }
    };
    if let Some(address) = mem.absolute_address(instr.next_address()) {
        return match ctx.bridge().read_pointer(address).filter(|&target| target != 0) {
            Some(target) => call_direct(ctx, instr, target),
            None => {
                unresolved_call(ctx, instr, Some(address));
                Ok(())
            }
        };
    }
    let Some(base) = mem.base.and_then(|b| ctx.register(b)) else {
        unresolved_call(ctx, instr, None);
        return Ok(());
    };
    match ctx.payload(base).cloned() {
        Some(ConstantPayload::ClassIdentifier(class) | ConstantPayload::Type(class)) if mem.index.is_none() => {
            let method = ctx
                .layout()
                .vtable_slot(mem.displacement)
                .and_then(|slot| ctx.bridge().resolve_virtual_slot(&class, slot));
            match method {
                Some(method) => managed_call(ctx, instr, method, Dispatch::Virtual),
                None => {
                    unresolved_call(ctx, instr, None);
                    Ok(())
                }
            }
        }
        Some(_) if mem.displacement == 0 && mem.index.is_none() => call_through(ctx, instr, base),
        _ => {
            unresolved_call(ctx, instr, None);
            Ok(())
        }
    }
}

/// Unconditional jump out of the method.
pub(crate) fn tail_jump(ctx: &mut LiftContext<'_>, instr: &Instruction, target: u64) -> Result<()> {
    let bridge = ctx.bridge();
    if bridge.keys().thrown_exception(target).is_some() || bridge.keys().classify(target).is_some() {
        return call_direct(ctx, instr, target);
    }
    match bridge.method_at(target) {
        Some(method) => {
            let method = ctx.closed_method(method);
            managed_call(ctx, instr, method, Dispatch::Tail)
        }
        None => {
            ctx.emit(
                instr,
                ActionKind::Jump {
                    target,
                    structural: false,
                },
            );
            Ok(())
        }
    }
}

/// `jmp reg` / `jmp [mem]` / `br reg`: a tail call when the target is known.
pub(crate) fn jump_indirect(ctx: &mut LiftContext<'_>, instr: &Instruction, op: &Operand) -> Result<()> {
    let held = match op {
        Operand::Memory(mem) => mem
            .absolute_address(instr.next_address())
            .and_then(|address| ctx.bridge().read_pointer(address))
            .and_then(|target| ctx.bridge().method_at(target).cloned()),
        _ => match ctx.read(op).and_then(|v| ctx.payload(v)) {
            Some(ConstantPayload::Method(m) | ConstantPayload::InterfaceMethod(m)) => Some(m.clone()),
            _ => None,
        },
    };
    match held {
        Some(method) => managed_call(ctx, instr, method, Dispatch::Tail),
        None => {
            ctx.unresolved(instr, format!("indirect jump through {op}"));
            Ok(())
        }
    }
}

/// Call of a managed method: collect arguments per the calling convention,
/// clobber volatile registers and bind the result.
pub(crate) fn managed_call(
    ctx: &mut LiftContext<'_>,
    instr: &Instruction,
    method: MethodRef,
    dispatch: Dispatch,
) -> Result<()> {
    let bridge = ctx.bridge();
    let signature = bridge.method_signature(&method);
    let (this_type, return_type, floats): (_, _, Vec<bool>) = match &signature {
        Some(sig) => (
            sig.this_type.clone(),
            sig.return_type.clone(),
            sig.arguments().into_iter().map(|ty| bridge.is_float_type(ty)).collect(),
        ),
        None => (None, None, Vec::new()),
    };

    let locations = ctx.convention().assign(&floats);
    let mut args: Vec<Option<ValueId>> = locations.iter().map(|&loc| argument(ctx, loc)).collect();
    let this = if this_type.is_some() && !args.is_empty() {
        args.remove(0)
    } else {
        None
    };
    if this_type.is_some() && this.is_none() && ctx.config().taint_on_missing_this {
        return Err(Taint::new(
            instr.address,
            TaintReason::MissingThis(bridge.method_name(&method)),
        ));
    }

    let runtime_type = this.and_then(|v| ctx.type_of(v));
    let superclass_call = match (&runtime_type, &this_type) {
        (Some(runtime), Some(declaring)) => runtime != declaring && bridge.is_subclass_of(runtime, declaring),
        _ => false,
    };

    ctx.clobber_volatile();
    let result = return_type.map(|ty| bind_result(ctx, ty));
    trace!(method = %bridge.method_name(&method), ?dispatch, superclass_call, "managed call");

    let call = Call {
        method,
        this,
        args,
        result,
        superclass_call,
    };
    let kind = match dispatch {
        Dispatch::Direct => ActionKind::CallManaged(call),
        Dispatch::Virtual => ActionKind::CallVirtual(call),
        Dispatch::Tail => ActionKind::TailCall(call),
    };
    ctx.emit(instr, kind);
    Ok(())
}

/// Value passed at `location` at the call site.
fn argument(ctx: &LiftContext<'_>, location: ArgumentLocation) -> Option<ValueId> {
    match location {
        ArgumentLocation::Register(reg) => ctx.register(reg),
        ArgumentLocation::Stack(offset) => {
            // Entry offsets include the return address the call pushes.
            let at_call = if ctx.arch().is_x86() {
                offset - ctx.pointer_size()
            } else {
                offset
            };
            let state = ctx.state();
            state.get_stack_offset(state.frame_offset(at_call))
        }
        ArgumentLocation::Pushed(position) => ctx.state().peek_pushed(position),
    }
}

/// Fresh local for a call result in the return register of its class.
fn bind_result(ctx: &mut LiftContext<'_>, ty: TypeRef) -> ValueId {
    let convention = ctx.convention();
    let reg = if ctx.bridge().is_float_type(&ty) {
        convention.float_return_reg
    } else {
        convention.return_reg
    };
    if let Register::St(_) = reg {
        let id = ctx.state_mut().make_local(Some(ty), None, None);
        ctx.state_mut().fpu_push(Some(id));
        return id;
    }
    ctx.new_local(Some(ty), Location::Register(reg))
}

/// Call whose target is not a known method.
fn unresolved_call(ctx: &mut LiftContext<'_>, instr: &Instruction, target: Option<u64>) {
    ctx.clobber_volatile();
    let ret = Location::Register(ctx.convention().return_reg);
    let result = ctx.new_local(None, ret);
    ctx.emit(
        instr,
        ActionKind::CallUnresolved {
            target,
            result: Some(result),
        },
    );
}

/// First `count` integer-class arguments of a helper call.
fn helper_args(ctx: &LiftContext<'_>, count: usize) -> Vec<Option<ValueId>> {
    ctx.convention()
        .assign(&vec![false; count])
        .into_iter()
        .map(|loc| argument(ctx, loc))
        .collect()
}

/// Type carried by a type or class-pointer constant.
fn type_operand(ctx: &LiftContext<'_>, value: Option<ValueId>) -> Option<TypeRef> {
    match ctx.payload(value?)? {
        ConstantPayload::Type(ty) | ConstantPayload::ClassIdentifier(ty) => Some(ty.clone()),
        _ => None,
    }
}

/// Raw address held by an unresolved global or a literal.
fn address_operand(ctx: &LiftContext<'_>, value: Option<ValueId>) -> Option<u64> {
    match ctx.payload(value?)? {
        ConstantPayload::UnresolvedGlobal(address) => Some(*address),
        ConstantPayload::Number(n) => Some(*n as u64),
        _ => None,
    }
}

/// Text passed as a C string argument.
fn string_operand(ctx: &LiftContext<'_>, value: Option<ValueId>) -> Option<String> {
    if let Some(ConstantPayload::String(text)) = value.and_then(|v| ctx.payload(v)) {
        return Some(text.clone());
    }
    let address = address_operand(ctx, value)?;
    ctx.bridge().read_c_string(address)
}

/// Runtime helper calls with dedicated semantics.
fn helper(ctx: &mut LiftContext<'_>, instr: &Instruction, kind: KeyFunction) {
    let args = helper_args(ctx, 3);
    let arg = |i: usize| args.get(i).copied().flatten();
    let ret = Location::Register(ctx.convention().return_reg);
    trace!(?kind, "runtime helper");

    let action = match kind {
        KeyFunction::InitializeMethodMetadata | KeyFunction::Bailout => {
            let usage = address_operand(ctx, arg(0));
            ctx.clobber_volatile();
            ActionKind::InitializeMethodMetadata { usage }
        }
        KeyFunction::ClassInit => {
            let class = type_operand(ctx, arg(0));
            ctx.clobber_volatile();
            ActionKind::ClassInit { class }
        }
        KeyFunction::ObjectNew => {
            let class = type_operand(ctx, arg(0));
            ctx.clobber_volatile();
            let result = ctx.new_local(class.clone(), ret);
            ActionKind::AllocateInstance { class, result }
        }
        KeyFunction::ArrayNew => {
            let array_type = type_operand(ctx, arg(0)).map(|ty| if ty.is_array() { ty } else { TypeRef::array_of(ty) });
            let length = match arg(1) {
                Some(v) => ctx.constant_number(Source::Value(v)).map_or(Source::Value(v), Source::Immediate),
                None => Source::Unknown,
            };
            ctx.clobber_volatile();
            let result = ctx.new_local(array_type.clone(), ret);
            ActionKind::AllocateArray {
                array_type,
                length,
                result,
            }
        }
        KeyFunction::ValueBox => {
            let ty = type_operand(ctx, arg(0));
            // The boxed value is passed by address, usually a frame slot.
            let value = match arg(1).and_then(|v| ctx.payload(v)) {
                Some(ConstantPayload::StackPointer(offset)) => ctx.state().get_stack_offset(*offset).into(),
                _ => Source::from(arg(1)),
            };
            ctx.clobber_volatile();
            let result = ctx.new_local(ty.clone(), ret);
            ActionKind::Box { value, ty, result }
        }
        KeyFunction::ObjectUnbox => {
            let object = arg(0);
            let ty = type_operand(ctx, arg(1)).or_else(|| object.and_then(|v| ctx.type_of(v)));
            ctx.clobber_volatile();
            let result = ctx.new_local(ty.clone(), ret);
            ActionKind::Unbox {
                object: object.into(),
                ty,
                result,
            }
        }
        KeyFunction::IsInstance | KeyFunction::CastClass => {
            let object = arg(0);
            let ty = type_operand(ctx, arg(1));
            ctx.clobber_volatile();
            let result = ctx.new_local(ty.clone(), ret);
            ActionKind::SafeCast {
                object: object.into(),
                ty,
                throws: kind == KeyFunction::CastClass,
                result,
            }
        }
        KeyFunction::RaiseException => {
            let exception = arg(0);
            let exception_type = exception
                .and_then(|v| ctx.type_of(v))
                .map(|ty| ctx.bridge().type_name(&ty));
            ctx.clobber_volatile();
            ActionKind::Throw {
                exception: exception.into(),
                exception_type,
            }
        }
        KeyFunction::ResolveInternalCall => {
            let name = string_operand(ctx, arg(0));
            let method = name
                .as_deref()
                .and_then(|n| ctx.bridge().resolve_runtime_call_identifier(n));
            if method.is_none() {
                debug!(name = name.as_deref().unwrap_or("?"), "internal call not resolved");
            }
            ctx.clobber_volatile();
            let result = match &method {
                Some(m) => ctx.new_constant(ConstantPayload::Method(m.clone()), ret),
                None => ctx.new_local(None, ret),
            };
            ActionKind::ResolveInternalCall { name, method, result }
        }
        KeyFunction::StringNew => {
            let text = string_operand(ctx, arg(0));
            ctx.clobber_volatile();
            match text {
                Some(text) => {
                    let result = ctx.new_constant(ConstantPayload::String(text.clone()), ret);
                    ActionKind::LoadRawString { dest: ret, text, result }
                }
                None => {
                    let ty = ctx.system_type("String");
                    ctx.new_local(ty, ret);
                    ActionKind::Unresolved {
                        comment: "string created from unknown text".into(),
                    }
                }
            }
        }
        KeyFunction::TypeGetObject => {
            let ty = type_operand(ctx, arg(0));
            ctx.clobber_volatile();
            let system_type = ctx.system_type("Type");
            let result = ctx.new_local(system_type, ret);
            ActionKind::TypeToObject { ty, result }
        }
        KeyFunction::InterfaceInvokeData => interface_invoke_data(ctx, arg(0), arg(1), arg(2), ret),
    };
    ctx.emit(instr, action);
}

/// `(slot, object, interface)` resolved against the object's runtime type.
fn interface_invoke_data(
    ctx: &mut LiftContext<'_>,
    slot: Option<ValueId>,
    object: Option<ValueId>,
    interface: Option<ValueId>,
    ret: Location,
) -> ActionKind {
    let slot = slot
        .and_then(|v| ctx.constant_number(Source::Value(v)))
        .and_then(|n| u16::try_from(n).ok());
    let class = object.and_then(|v| ctx.type_of(v));
    let interface = type_operand(ctx, interface);
    ctx.clobber_volatile();
    let (Some(slot), Some(interface)) = (slot, interface) else {
        ctx.new_local(None, ret);
        return ActionKind::Unresolved {
            comment: "interface invoke data with unknown slot or interface".into(),
        };
    };
    let method = class.and_then(|class| ctx.bridge().resolve_interface_slot(&class, &interface, slot));
    match &method {
        Some(m) => {
            ctx.new_constant(ConstantPayload::InterfaceMethod(m.clone()), ret);
        }
        None => ctx.clear(ret),
    }
    ActionKind::LoadInterfaceMethod {
        dest: ret,
        interface,
        slot,
        method,
    }
}
