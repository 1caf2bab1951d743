//! Memory reads and writes: globals, objects, arrays, classes, statics.

use ilr_ir::{ActionKind, ArrayIndex, ConstantPayload, Location, Source, Value, ValueId};
use ilr_isa::{Instruction, MemoryOperand, Operand};
use ilr_meta::{FieldAccessChain, MetadataUsage, TypeRef};
use tracing::trace;

use super::moves;
use crate::LiftContext;

/// How a global address is used by the instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GlobalAccess {
    /// The value stored at the address is loaded.
    Load,
    /// Only the address itself is taken.
    Address,
}

/// Load from (or take the address of) a global.
///
/// Metadata usages become typed constants. Loads that miss the usage table
/// fall back to float literals for float destinations and to string literals
/// behind a pointer; anything else is an unresolved global.
pub(crate) fn load_global(
    ctx: &mut LiftContext<'_>,
    instr: &Instruction,
    dest: Location,
    address: u64,
    access: GlobalAccess,
) {
    let bridge = ctx.bridge();
    if access == GlobalAccess::Load {
        if let Some(usage) = bridge.resolve_global_usage(address) {
            let payload = match usage {
                MetadataUsage::TypeInfo(ty) | MetadataUsage::Type(ty) => ConstantPayload::Type(ty),
                MetadataUsage::Method(m) => ConstantPayload::Method(m),
                MetadataUsage::MethodRef(m) => ConstantPayload::Method(ctx.closed_method(&m)),
                MetadataUsage::Field(f) => ConstantPayload::Field(f),
                MetadataUsage::StringLiteral(s) => ConstantPayload::String(s),
            };
            let result = ctx.new_constant(payload, dest);
            ctx.emit(instr, ActionKind::LoadConstant { dest, result });
            return;
        }
        if let Location::Register(reg) = dest {
            if reg.is_float() {
                let value = if instr.width == 8 {
                    bridge.read_f64(address)
                } else {
                    bridge.read_f32(address).map(f64::from)
                };
                if let Some(value) = value {
                    let result = ctx.new_constant(ConstantPayload::Float(value), dest);
                    ctx.emit(instr, ActionKind::LoadConstant { dest, result });
                    return;
                }
            }
        }
        if let Some(text) = bridge.read_pointer(address).and_then(|p| bridge.read_c_string(p)) {
            let result = ctx.new_constant(ConstantPayload::String(text.clone()), dest);
            ctx.emit(instr, ActionKind::LoadRawString { dest, text, result });
            return;
        }
    }
    trace!(address, "unresolved global");
    let result = ctx.new_constant(ConstantPayload::UnresolvedGlobal(address), dest);
    ctx.emit(instr, ActionKind::UnresolvedGlobal { dest, address, result });
}

/// `dest = [op]`.
pub(crate) fn read(ctx: &mut LiftContext<'_>, instr: &Instruction, dest: Location, op: &Operand) {
    if let Some(offset) = ctx.frame_address(op) {
        moves::load_stack(ctx, instr, dest, offset);
        return;
    }
    let Operand::Memory(mem) = op else {
        ctx.clear(dest);
        return;
    };
    if let Some(address) = mem.absolute_address(instr.next_address()) {
        load_global(ctx, instr, dest, address, GlobalAccess::Load);
        return;
    }
    let Some(base) = mem.base.and_then(|b| ctx.register(b)) else {
        ctx.clear(dest);
        ctx.unresolved(instr, format!("read of {mem} through an unknown pointer"));
        return;
    };
    let displacement = mem.displacement;
    let Some(value) = ctx.value(base).cloned() else {
        ctx.clear(dest);
        return;
    };
    match value {
        Value::Local(_) => read_object(ctx, instr, dest, base, mem),
        Value::Constant(constant) => match constant.payload {
            ConstantPayload::ClassIdentifier(class) | ConstantPayload::Type(class) => {
                read_class(ctx, instr, dest, class, displacement);
            }
            ConstantPayload::StaticFieldsPointer(class) => {
                match ctx.bridge().resolve_static_field(&class, displacement) {
                    Some(field) => {
                        let ty = ctx.bridge().field_type(&field);
                        let result = ctx.new_local(ty, dest);
                        ctx.emit(instr, ActionKind::StaticFieldRead { dest, field, result });
                    }
                    None => {
                        ctx.clear(dest);
                        let name = ctx.bridge().type_name(&class);
                        ctx.unresolved(instr, format!("no static field at {displacement:#x} on {name}"));
                    }
                }
            }
            ConstantPayload::UnresolvedGlobal(address) if mem.index.is_none() => {
                let address = address.wrapping_add_signed(displacement);
                load_global(ctx, instr, dest, address, GlobalAccess::Load);
            }
            ConstantPayload::FieldPointer { object, chain } if displacement == 0 && mem.index.is_none() => {
                read_field(ctx, instr, dest, object, chain);
            }
            ConstantPayload::ArrayOffsetPointer { array, index } if displacement == 0 && mem.index.is_none() => {
                let index = index.map_or(ArrayIndex::Unknown, ArrayIndex::Constant);
                read_element(ctx, instr, dest, array, index);
            }
            // Invoke data and vtable entries: the code pointer stands for the method.
            ConstantPayload::Method(_) | ConstantPayload::InterfaceMethod(_) => ctx.bind(dest, base),
            other => {
                ctx.clear(dest);
                ctx.unresolved(instr, format!("read of {mem} through a {} constant", other.kind()));
            }
        },
    }
}

fn read_object(ctx: &mut LiftContext<'_>, instr: &Instruction, dest: Location, object: ValueId, mem: &MemoryOperand) {
    let Some(ty) = ctx.type_of(object) else {
        ctx.clear(dest);
        ctx.unresolved(instr, format!("read of {mem} on a value of unknown type"));
        return;
    };
    let displacement = mem.displacement;
    let unboxed_this = ctx.value(object).and_then(Value::as_local).is_some_and(|l| l.is_this)
        && ctx.bridge().is_value_type(&ty);
    if displacement == 0 && mem.index.is_none() && !unboxed_this {
        let result = ctx.new_constant(ConstantPayload::ClassIdentifier(ty), dest);
        ctx.emit(instr, ActionKind::LoadClassIdentifier { dest, object, result });
        return;
    }
    if let Some(element) = ty.element_type().cloned() {
        if mem.index.is_none() && displacement == ctx.layout().array_length_offset {
            let int = ctx.system_type("Int32");
            let result = ctx.new_local(int, dest);
            ctx.emit(instr, ActionKind::ArrayLength { dest, array: object, result });
            return;
        }
        if let Some(index) = element_index(ctx, mem, &element) {
            read_element(ctx, instr, dest, object, index);
            return;
        }
    }
    let chain = if mem.index.is_none() {
        ctx.field_chain(object, displacement)
    } else {
        None
    };
    match chain {
        Some(chain) => read_field(ctx, instr, dest, object, chain),
        None => {
            ctx.clear(dest);
            let name = ctx.bridge().type_name(&ty);
            ctx.unresolved(instr, format!("no field at {displacement:#x} on {name}"));
        }
    }
}

fn read_field(ctx: &mut LiftContext<'_>, instr: &Instruction, dest: Location, object: ValueId, chain: FieldAccessChain) {
    let ty = ctx.bridge().field_type(chain.final_field());
    let result = ctx.new_local(ty, dest);
    ctx.emit(
        instr,
        ActionKind::FieldRead {
            dest,
            object,
            chain,
            result,
        },
    );
}

fn read_element(ctx: &mut LiftContext<'_>, instr: &Instruction, dest: Location, array: ValueId, index: ArrayIndex) {
    let ty = ctx.type_of(array).and_then(|t| t.element_type().cloned());
    let result = ctx.new_local(ty, dest);
    ctx.emit(
        instr,
        ActionKind::ArrayElementRead {
            dest,
            array,
            index,
            result,
        },
    );
}

/// Element index addressed by `mem` on an array of `element`.
fn element_index(ctx: &LiftContext<'_>, mem: &MemoryOperand, element: &TypeRef) -> Option<ArrayIndex> {
    let layout = ctx.layout();
    match mem.index {
        Some(reg) if mem.displacement == layout.array_data_offset => {
            Some(ctx.register(reg).map_or(ArrayIndex::Unknown, ArrayIndex::Value))
        }
        Some(_) => None,
        None => {
            let size = ctx.bridge().value_size(element);
            layout.array_index(mem.displacement, size).map(ArrayIndex::Constant)
        }
    }
}

/// Reads relative to a runtime class pointer: static field block or vtable.
fn read_class(ctx: &mut LiftContext<'_>, instr: &Instruction, dest: Location, class: TypeRef, displacement: i64) {
    let layout = ctx.layout();
    if displacement == layout.class_static_fields_offset {
        let result = ctx.new_constant(ConstantPayload::StaticFieldsPointer(class.clone()), dest);
        ctx.emit(instr, ActionKind::LoadStaticFieldsPointer { dest, class, result });
        return;
    }
    let Some(slot) = layout.vtable_slot(displacement) else {
        ctx.clear(dest);
        let name = ctx.bridge().type_name(&class);
        ctx.unresolved(instr, format!("read of class data at {displacement:#x} on {name}"));
        return;
    };
    let method = ctx.bridge().resolve_virtual_slot(&class, slot);
    match &method {
        Some(method) => {
            let id = ctx.new_constant(ConstantPayload::Method(method.clone()), dest);
            ctx.mark_virtual(id);
        }
        None => {
            trace!(slot, "empty virtual slot");
            ctx.clear(dest);
        }
    }
    ctx.emit(
        instr,
        ActionKind::LoadVirtualFunctionPointer {
            dest,
            class,
            slot,
            method,
        },
    );
}

/// `[op] = value`.
pub(crate) fn write(ctx: &mut LiftContext<'_>, instr: &Instruction, op: &Operand, value: Source) {
    if let Some(offset) = ctx.frame_address(op) {
        moves::store_stack(ctx, instr, offset, value);
        return;
    }
    let Operand::Memory(mem) = op else {
        return;
    };
    if let Some(address) = mem.absolute_address(instr.next_address()) {
        ctx.unresolved(instr, format!("write to global {address:#x}"));
        return;
    }
    let Some(base) = mem.base.and_then(|b| ctx.register(b)) else {
        ctx.unresolved(instr, format!("write to {mem} through an unknown pointer"));
        return;
    };
    let displacement = mem.displacement;
    let Some(target) = ctx.value(base).cloned() else {
        return;
    };
    match target {
        Value::Local(_) => write_object(ctx, instr, base, mem, value),
        Value::Constant(constant) => match constant.payload {
            ConstantPayload::StaticFieldsPointer(class) => {
                match ctx.bridge().resolve_static_field(&class, displacement) {
                    Some(field) => {
                        ctx.emit(instr, ActionKind::StaticFieldWrite { field, value });
                    }
                    None => {
                        let name = ctx.bridge().type_name(&class);
                        ctx.unresolved(instr, format!("no static field at {displacement:#x} on {name}"));
                    }
                }
            }
            ConstantPayload::FieldPointer { object, chain } if displacement == 0 && mem.index.is_none() => {
                ctx.emit(instr, ActionKind::FieldWrite { object, chain, value });
            }
            ConstantPayload::ArrayOffsetPointer { array, index } if displacement == 0 && mem.index.is_none() => {
                let index = index.map_or(ArrayIndex::Unknown, ArrayIndex::Constant);
                ctx.emit(instr, ActionKind::ArrayElementWrite { array, index, value });
            }
            other => {
                ctx.unresolved(instr, format!("write to {mem} through a {} constant", other.kind()));
            }
        },
    }
}

fn write_object(ctx: &mut LiftContext<'_>, instr: &Instruction, object: ValueId, mem: &MemoryOperand, value: Source) {
    let Some(ty) = ctx.type_of(object) else {
        ctx.unresolved(instr, format!("write to {mem} on a value of unknown type"));
        return;
    };
    if let Some(element) = ty.element_type().cloned() {
        if let Some(index) = element_index(ctx, mem, &element) {
            ctx.emit(instr, ActionKind::ArrayElementWrite { array: object, index, value });
            return;
        }
    }
    let chain = if mem.index.is_none() {
        ctx.field_chain(object, mem.displacement)
    } else {
        None
    };
    match chain {
        Some(chain) => {
            ctx.emit(instr, ActionKind::FieldWrite { object, chain, value });
        }
        None => {
            let name = ctx.bridge().type_name(&ty);
            ctx.unresolved(instr, format!("no field at {:#x} on {name}", mem.displacement));
        }
    }
}

/// `dest = &[op]`.
pub(crate) fn address_of(ctx: &mut LiftContext<'_>, instr: &Instruction, dest: Location, op: &Operand) {
    if let Some(offset) = ctx.frame_address(op) {
        moves::load_stack_address(ctx, instr, dest, offset);
        return;
    }
    let Operand::Memory(mem) = op else {
        ctx.clear(dest);
        return;
    };
    if let Some(address) = mem.absolute_address(instr.next_address()) {
        load_global(ctx, instr, dest, address, GlobalAccess::Address);
        return;
    }
    let Some(base) = mem.base.and_then(|b| ctx.register(b)) else {
        ctx.clear(dest);
        return;
    };
    let ty = ctx.type_of(base);
    if let Some(element) = ty.as_ref().and_then(TypeRef::element_type) {
        if mem.displacement >= ctx.layout().array_data_offset {
            let index = match mem.index {
                None => ctx.layout().array_index(mem.displacement, ctx.bridge().value_size(element)),
                Some(_) => None,
            };
            ctx.new_constant(ConstantPayload::ArrayOffsetPointer { array: base, index }, dest);
            return;
        }
    }
    if mem.index.is_none() && ty.as_ref().is_some_and(|t| ctx.bridge().primitive_size(t).is_none()) {
        if let Some(chain) = ctx.field_chain(base, mem.displacement) {
            let result = ctx.new_constant(
                ConstantPayload::FieldPointer {
                    object: base,
                    chain: chain.clone(),
                },
                dest,
            );
            ctx.emit(
                instr,
                ActionKind::FieldAddress {
                    dest,
                    object: base,
                    chain,
                    result,
                },
            );
            return;
        }
    }
    // Plain arithmetic written as an address computation.
    let right = match mem.index {
        None => Source::Immediate(mem.displacement),
        Some(index) if mem.displacement == 0 && mem.scale == 1 => ctx.register(index).into(),
        Some(_) => {
            ctx.clear(dest);
            return;
        }
    };
    super::arith::binary(ctx, instr, ilr_ir::ArithOp::Add, dest, Source::Value(base), right);
}

#[cfg(test)]
mod tests {
    use ilr_ir::{ActionKind, ArrayIndex, ConstantPayload, Source, Value};
    use ilr_isa::Arch;
    use ilr_meta::TypeRef;

    use super::super::tests::{Fixture, lift_listing};
    use crate::MethodAnalysisSession;

    /// Payload of the first `LoadConstant`.
    fn first_constant(session: &MethodAnalysisSession) -> Option<ConstantPayload> {
        session
            .actions()
            .iter()
            .find_map(|a| match a.kind {
                ActionKind::LoadConstant { result, .. } => Some(result),
                _ => None,
            })
            .and_then(|id| session.value(id))
            .and_then(Value::as_constant)
            .cloned()
    }

    #[test]
    fn test_array_length_and_elements() {
        let fixture = Fixture::new();
        // static int Pick(int[] values, int index)
        let session = lift_listing(
            &fixture,
            Arch::X86_64,
            "0x3100 mov eax, dword ptr [rcx + 0x18]\n\
             0x3103 mov eax, dword ptr [rcx + 0x28]\n\
             0x3106 mov eax, dword ptr [rcx + rdx*4 + 0x20]\n\
             0x310a mov dword ptr [rcx + 0x24], eax\n\
             0x310d mov dword ptr [rcx + rdx*4 + 0x20], 7\n\
             0x3114 ret",
        );
        assert!(!session.is_tainted());
        let values = session.parameters()[0].value;
        let index = session.parameters()[1].value;
        let kinds: Vec<&ActionKind> = session
            .actions()
            .iter()
            .map(|a| &a.kind)
            .filter(|k| {
                matches!(
                    k,
                    ActionKind::ArrayLength { .. }
                        | ActionKind::ArrayElementRead { .. }
                        | ActionKind::ArrayElementWrite { .. }
                )
            })
            .collect();
        assert_eq!(kinds.len(), 5);

        assert!(matches!(kinds[0], ActionKind::ArrayLength { array, .. } if *array == values));
        assert!(matches!(
            kinds[1],
            ActionKind::ArrayElementRead { array, index: ArrayIndex::Constant(2), .. } if *array == values
        ));
        let ActionKind::ArrayElementRead { index: by_register, result, .. } = kinds[2] else {
            panic!("expected an element read, got {:?}", kinds[2]);
        };
        assert_eq!(*by_register, ArrayIndex::Value(index));
        let int32 = TypeRef::Definition(fixture.int32);
        assert_eq!(session.value(*result).and_then(Value::ty), Some(&int32));

        assert_eq!(
            kinds[3],
            &ActionKind::ArrayElementWrite {
                array: values,
                index: ArrayIndex::Constant(1),
                value: Source::Value(*result),
            }
        );
        assert_eq!(
            kinds[4],
            &ActionKind::ArrayElementWrite {
                array: values,
                index: ArrayIndex::Value(index),
                value: Source::Immediate(7),
            }
        );
    }

    #[test]
    fn test_static_field_through_class_pointer() {
        let fixture = Fixture::new();
        let bridge = fixture.bridge(Arch::X86_64);
        // Player class -> static block -> Unit.count
        let session = lift_listing(
            &fixture,
            Arch::X86_64,
            "0x1000 mov rax, qword ptr [rip + 0x4eff9]\n\
             0x1007 mov rax, qword ptr [rax + 0xb8]\n\
             0x100e mov ecx, dword ptr [rax]\n\
             0x1010 mov dword ptr [rax], 5\n\
             0x1016 ret",
        );
        let player = TypeRef::Definition(fixture.player);
        assert!(session.actions().iter().any(|a| matches!(
            &a.kind,
            ActionKind::LoadStaticFieldsPointer { class, .. } if *class == player
        )));
        let read = session
            .actions()
            .iter()
            .find_map(|a| match &a.kind {
                ActionKind::StaticFieldRead { field, .. } => Some(field.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(bridge.field_name(&read), "count");
        let (written, value) = session
            .actions()
            .iter()
            .find_map(|a| match &a.kind {
                ActionKind::StaticFieldWrite { field, value } => Some((field.clone(), *value)),
                _ => None,
            })
            .unwrap();
        assert_eq!(written, read);
        assert_eq!(value, Source::Immediate(5));
    }

    #[test]
    fn test_string_literal_usage_and_raw_string() {
        let fixture = Fixture::new();
        // rcx: the "hello" literal usage; rdx: a pointer to plain bytes
        let session = lift_listing(
            &fixture,
            Arch::X86_64,
            "0x1000 mov rcx, qword ptr [rip + 0x4f001]\n\
             0x1007 mov rdx, qword ptr [rip + 0x5f03a]\n\
             0x100e ret",
        );
        assert_eq!(first_constant(&session), Some(ConstantPayload::String("hello".into())));
        let raw = session
            .actions()
            .iter()
            .find_map(|a| match &a.kind {
                ActionKind::LoadRawString { text, .. } => Some(text.as_str()),
                _ => None,
            });
        assert_eq!(raw, Some("raw text"));
        assert_eq!(
            session
                .actions()
                .iter()
                .filter(|a| matches!(a.kind, ActionKind::LoadConstant { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn test_float_literal_for_float_register() {
        let fixture = Fixture::new();
        let session = lift_listing(
            &fixture,
            Arch::X86_64,
            "0x1000 movss xmm0, dword ptr [rip + 0x5f038]\n0x1008 ret",
        );
        assert_eq!(first_constant(&session), Some(ConstantPayload::Float(0.5)));
    }

    #[test]
    fn test_missing_global_is_unresolved() {
        let fixture = Fixture::new();
        let session = lift_listing(&fixture, Arch::X86_64, "0x1000 mov rcx, qword ptr [rip + 0x6eff9]\n0x1007 ret");
        assert!(session.actions().iter().any(|a| matches!(
            a.kind,
            ActionKind::UnresolvedGlobal { address: 0x70000, .. }
        )));
    }

    #[test]
    fn test_field_address_on_this() {
        let fixture = Fixture::new();
        // Unit.Heal: &this.position
        let session = lift_listing(&fixture, Arch::X86_64, "0x3000 lea rax, [rcx + 0x20]\n0x3004 ret");
        let this = session.parameters()[0].value;
        let (object, chain, result) = session
            .actions()
            .iter()
            .find_map(|a| match &a.kind {
                ActionKind::FieldAddress { object, chain, result, .. } => Some((*object, chain.clone(), *result)),
                _ => None,
            })
            .unwrap();
        assert_eq!(object, this);
        assert_eq!(fixture.bridge(Arch::X86_64).chain_name(&chain), "position");
        assert!(matches!(
            session.value(result).and_then(Value::as_constant),
            Some(ConstantPayload::FieldPointer { .. })
        ));
    }

    #[test]
    fn test_generic_method_usage_is_closed() {
        let fixture = Fixture::new();
        let session = lift_listing(&fixture, Arch::X86_64, "0x1000 mov rcx, qword ptr [rip + 0x4f011]\n0x1007 ret");
        let Some(ConstantPayload::Method(method)) = first_constant(&session) else {
            panic!("expected a method constant");
        };
        assert_eq!(method, fixture.find_int);
        assert_eq!(method.method_args, [TypeRef::Definition(fixture.int32)]);
    }
}
