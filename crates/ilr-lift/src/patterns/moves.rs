//! Data movement: register copies, literals, stack traffic.

use ilr_ir::{ActionKind, ConstantPayload, Location, Source, Value};
use ilr_isa::{Instruction, Operand, Register};

use crate::{LiftContext, Result, Taint};

/// `dest = src` between registers.
///
/// An unbound source only forgets `dest`. Inside a loop, overwriting a local
/// is recorded as a reassignment of that local.
pub(crate) fn copy_register(ctx: &mut LiftContext<'_>, instr: &Instruction, dest: Register, src: Register) {
    if dest == src {
        return;
    }
    let sp = ctx.convention().stack_pointer;
    if dest == sp {
        return;
    }
    if src == sp {
        let offset = ctx.state().stack_pointer_delta();
        ctx.new_constant(ConstantPayload::StackPointer(offset), Location::Register(dest));
        return;
    }
    if src.is_zero() {
        load_number(ctx, instr, Location::Register(dest), 0);
        return;
    }
    let Some(value) = ctx.register(src) else {
        ctx.state_mut().clear_register(dest);
        return;
    };
    let carried = ctx
        .register(dest)
        .filter(|&old| old != value && ctx.value(old).is_some_and(Value::is_local));
    match carried {
        Some(target) if ctx.tracker().scan().is_in_loop(instr.address) => {
            ctx.emit(
                instr,
                ActionKind::Reassign {
                    target,
                    value: Source::Value(value),
                },
            );
        }
        _ => {
            ctx.state_mut().set_register(dest, value);
            ctx.emit(
                instr,
                ActionKind::Copy {
                    dest: Location::Register(dest),
                    value,
                },
            );
        }
    }
}

/// Load an integer literal.
pub(crate) fn load_number(ctx: &mut LiftContext<'_>, instr: &Instruction, dest: Location, value: i64) {
    let result = ctx.new_constant(ConstantPayload::Number(value), dest);
    ctx.emit(instr, ActionKind::LoadNumber { dest, value, result });
}

/// Store into an entry-relative frame slot.
///
/// Literal stores create a frame local with a known initial value.
pub(crate) fn store_stack(ctx: &mut LiftContext<'_>, instr: &Instruction, offset: i64, value: Source) {
    match value {
        Source::Value(id) => ctx.state_mut().set_stack_offset(offset, id),
        Source::Immediate(n) => {
            let ty = ctx.system_type("Int32");
            ctx.state_mut().make_local(ty, Some(Location::Stack(offset)), Some(n));
        }
        Source::Unknown => ctx.state_mut().clear_stack_offset(offset),
    }
    ctx.emit(instr, ActionKind::StackStore { offset, value });
}

/// Load from an entry-relative frame slot. An empty slot yields a fresh local
/// bound to it.
pub(crate) fn load_stack(ctx: &mut LiftContext<'_>, instr: &Instruction, dest: Location, offset: i64) {
    let value = match ctx.state().get_stack_offset(offset) {
        Some(value) => value,
        None => ctx.state_mut().make_local(None, Some(Location::Stack(offset)), None),
    };
    ctx.bind(dest, value);
    ctx.emit(instr, ActionKind::StackLoad { dest, offset, value });
}

/// Address of a frame slot.
pub(crate) fn load_stack_address(ctx: &mut LiftContext<'_>, instr: &Instruction, dest: Location, offset: i64) {
    let result = ctx.new_constant(ConstantPayload::StackPointer(offset), dest);
    ctx.emit(instr, ActionKind::LoadStackAddress { dest, offset, result });
}

pub(crate) fn push(ctx: &mut LiftContext<'_>, instr: &Instruction, src: &Operand) {
    let value = match src {
        Operand::Immediate(n) => Some(ctx.state_mut().make_constant(ConstantPayload::Number(*n), None)),
        Operand::Register(reg) if *reg == ctx.convention().stack_pointer => {
            let offset = ctx.state().stack_pointer_delta();
            Some(ctx.state_mut().make_constant(ConstantPayload::StackPointer(offset), None))
        }
        Operand::Memory(mem) => match mem.absolute_address(instr.next_address()) {
            Some(address) => {
                let slot = Location::Stack(ctx.state().stack_pointer_delta() - ctx.pointer_size());
                super::memory::load_global(ctx, instr, slot, address, super::memory::GlobalAccess::Load);
                ctx.read_location(slot)
            }
            None => None,
        },
        _ => ctx.read(src),
    };
    match value {
        Some(value) => ctx.state_mut().push(Some(value)),
        None => ctx.state_mut().push_unknown(1),
    }
}

pub(crate) fn pop(ctx: &mut LiftContext<'_>, dest: &Operand) {
    let value = ctx.state_mut().pop();
    let Some(location) = ctx.location(dest) else {
        return;
    };
    match value {
        Some(value) => ctx.bind(location, value),
        None => ctx.clear(location),
    }
}

/// Move the stack pointer by `delta` bytes.
///
/// Under the push-stack convention a positive adjustment releases pushed
/// entries, and releasing more than were pushed taints the method.
pub(crate) fn adjust_stack(ctx: &mut LiftContext<'_>, instr: &Instruction, delta: i64) -> Result<()> {
    if !ctx.convention().pushes_args {
        ctx.state_mut().adjust_stack_pointer(delta);
        return Ok(());
    }
    let ptr = ctx.pointer_size();
    let count = (delta.unsigned_abs() / ptr.unsigned_abs()) as usize;
    if delta > 0 {
        ctx.state_mut()
            .release_pushed(count)
            .map_err(|err| Taint::new(instr.address, err))?;
    } else {
        ctx.state_mut().push_unknown(count);
    }
    Ok(())
}

/// `xchg a, b` between registers.
pub(crate) fn exchange(ctx: &mut LiftContext<'_>, a: Register, b: Register) {
    let left = ctx.register(a);
    let right = ctx.register(b);
    for (reg, value) in [(a, right), (b, left)] {
        match value {
            Some(value) => ctx.state_mut().set_register(reg, value),
            None => ctx.state_mut().clear_register(reg),
        }
    }
}
