//! ARM64 instruction selector.

use ilr_ir::{ArithOp, BranchCondition, ConstantPayload, Location, Source};
use ilr_isa::{Arch, Instruction, MemoryOperand, Mnemonic, Operand, Register};

use crate::patterns::memory::{self, GlobalAccess};
use crate::patterns::{arith, calls, flow, moves};
use crate::{InstructionSelector, LiftContext, Result, Rule};

/// Selector for AArch64.
#[derive(Clone, Copy, Debug, Default)]
pub struct Arm64Selector;

impl InstructionSelector for Arm64Selector {
    fn supports(&self, arch: Arch) -> bool {
        arch == Arch::Arm64
    }

    fn rules(&self, arity: usize) -> &[Rule] {
        match arity {
            0 => NULLARY,
            1 => UNARY,
            2 => BINARY,
            3 => TERNARY,
            4 => QUATERNARY,
            _ => &[],
        }
    }
}

static NULLARY: &[Rule] = &[Rule::new("ret", |i, _| i.is_return(), |i, ctx| {
    flow::ret(ctx, i);
    Ok(())
})];

static UNARY: &[Rule] = &[
    Rule::new("ret-reg", |i, _| i.is_return(), |i, ctx| {
        flow::ret(ctx, i);
        Ok(())
    }),
    Rule::new("bl", |i, _| i.is_call() && i.operands[0].is_immediate(), |i, ctx| {
        calls::call_direct(ctx, i, target(i))
    }),
    Rule::new("blr", |i, _| i.is_call() && i.operands[0].is_register(), |i, ctx| {
        calls::call_register(ctx, i, register(i, 0))
    }),
    Rule::new("b", |i, _| i.is_jump() && i.operands[0].is_immediate(), |i, ctx| flow::jump(ctx, i, target(i))),
    Rule::new("br", |i, _| i.is_jump(), |i, ctx| calls::jump_indirect(ctx, i, &i.operands[0])),
    Rule::new("b.cond", |i, _| matches!(i.mnemonic, Mnemonic::Jcc(_)), |i, ctx| {
        if let Mnemonic::Jcc(condition) = i.mnemonic {
            flow::conditional_branch(ctx, i, BranchCondition::Flags(condition), target(i));
        }
        Ok(())
    }),
];

static BINARY: &[Rule] = &[
    Rule::new("mov-reg", |i, _| is_move(i) && i.operands[1].is_register(), |i, ctx| {
        moves::copy_register(ctx, i, register(i, 0), register(i, 1));
        Ok(())
    }),
    Rule::new("mov-imm", |i, _| {
        matches!(i.mnemonic, Mnemonic::Mov | Mnemonic::Movz) && i.operands[1].is_immediate()
    }, |i, ctx| {
        moves::load_number(ctx, i, dest(i), immediate(i, 1));
        Ok(())
    }),
    Rule::new("movn", |i, _| i.mnemonic == Mnemonic::Movn && i.operands[1].is_immediate(), |i, ctx| {
        moves::load_number(ctx, i, dest(i), !immediate(i, 1));
        Ok(())
    }),
    Rule::new("movk", |i, _| i.mnemonic == Mnemonic::Movk && i.operands[1].is_immediate(), |i, ctx| {
        insert_halfword(ctx, i);
        Ok(())
    }),
    Rule::new("adrp", |i, _| i.mnemonic == Mnemonic::Adrp, |i, ctx| {
        // Page base only; the following add or load completes the address.
        ctx.new_constant(ConstantPayload::UnresolvedGlobal(immediate(i, 1) as u64), dest(i));
        Ok(())
    }),
    Rule::new("adr", |i, _| i.mnemonic == Mnemonic::Adr, |i, ctx| {
        memory::load_global(ctx, i, dest(i), immediate(i, 1) as u64, GlobalAccess::Address);
        Ok(())
    }),
    Rule::new("ldr-literal", |i, _| i.mnemonic == Mnemonic::Ldr && i.operands[1].is_immediate(), |i, ctx| {
        memory::load_global(ctx, i, dest(i), immediate(i, 1) as u64, GlobalAccess::Load);
        Ok(())
    }),
    Rule::new("ldr", |i, _| i.mnemonic == Mnemonic::Ldr, |i, ctx| {
        memory::read(ctx, i, dest(i), &i.operands[1]);
        Ok(())
    }),
    Rule::new("str", |i, _| i.mnemonic == Mnemonic::Str, |i, ctx| {
        let slot = pre_index(ctx, i, &i.operands[1])?;
        let value = ctx.source(&i.operands[0]);
        memory::write(ctx, i, &slot, value);
        Ok(())
    }),
    Rule::new("cmn", |i, _| i.mnemonic == Mnemonic::Cmn, |i, ctx| {
        let left = ctx.source(&i.operands[0]);
        let right = match ctx.source(&i.operands[1]) {
            Source::Immediate(n) => Source::Immediate(n.wrapping_neg()),
            other => other,
        };
        flow::compare(ctx, i, left, right, false);
        Ok(())
    }),
    Rule::new("compare", |i, _| matches!(i.mnemonic, Mnemonic::Cmp | Mnemonic::Test | Mnemonic::FloatCmp), |i, ctx| {
        let left = ctx.source(&i.operands[0]);
        let right = ctx.source(&i.operands[1]);
        flow::compare(ctx, i, left, right, i.mnemonic == Mnemonic::FloatCmp);
        Ok(())
    }),
    Rule::new("cbz", |i, _| matches!(i.mnemonic, Mnemonic::Cbz | Mnemonic::Cbnz), |i, ctx| {
        let condition = BranchCondition::Zero {
            value: ctx.source(&i.operands[0]),
            negated: i.mnemonic == Mnemonic::Cbnz,
        };
        flow::conditional_branch(ctx, i, condition, target(i));
        Ok(())
    }),
    Rule::new("unary", |i, _| {
        matches!(i.mnemonic, Mnemonic::Neg | Mnemonic::Not | Mnemonic::Convert) && i.operands[0].is_register()
    }, |i, ctx| {
        let op = match i.mnemonic {
            Mnemonic::Neg => ArithOp::Neg,
            Mnemonic::Not => ArithOp::Not,
            _ => ArithOp::Convert,
        };
        let operand = ctx.source(&i.operands[1]);
        arith::unary(ctx, i, op, dest(i), operand);
        Ok(())
    }),
];

static TERNARY: &[Rule] = &[
    Rule::new("tbz", |i, _| matches!(i.mnemonic, Mnemonic::Tbz | Mnemonic::Tbnz), |i, ctx| {
        let condition = BranchCondition::Bit {
            value: ctx.source(&i.operands[0]),
            bit: u8::try_from(immediate(i, 1)).unwrap_or_default(),
            negated: i.mnemonic == Mnemonic::Tbnz,
        };
        flow::conditional_branch(ctx, i, condition, target(i));
        Ok(())
    }),
    Rule::new("ldp", |i, _| i.mnemonic == Mnemonic::Ldp, |i, ctx| {
        load_pair(ctx, i);
        Ok(())
    }),
    Rule::new("stp", |i, _| i.mnemonic == Mnemonic::Stp, store_pair),
    Rule::new("ldr-post", |i, _| i.mnemonic == Mnemonic::Ldr && i.operands[2].is_immediate(), |i, ctx| {
        memory::read(ctx, i, dest(i), &i.operands[1]);
        post_index(ctx, i, &i.operands[1], immediate(i, 2))
    }),
    Rule::new("adjust-sp", is_stack_adjustment, |i, ctx| {
        let amount = immediate(i, 2);
        let delta = if i.mnemonic == Mnemonic::Sub { -amount } else { amount };
        moves::adjust_stack(ctx, i, delta)
    }),
    // x29 = sp + imm
    Rule::new("frame-address", |i, ctx| {
        matches!(i.mnemonic, Mnemonic::Add | Mnemonic::Sub)
            && i.operands[1] == Operand::Register(ctx.convention().stack_pointer)
            && i.operands[2].is_immediate()
    }, |i, ctx| {
        let amount = immediate(i, 2);
        let delta = if i.mnemonic == Mnemonic::Sub { -amount } else { amount };
        let offset = ctx.state().stack_pointer_delta() + delta;
        moves::load_stack_address(ctx, i, dest(i), offset);
        Ok(())
    }),
    Rule::new("write-sp", |i, ctx| i.operands[0] == Operand::Register(ctx.convention().stack_pointer), |_, _| Ok(())),
    Rule::new("mul", |i, _| i.mnemonic == Mnemonic::Mul || i.mnemonic == Mnemonic::MulLong, |i, ctx| {
        let left = ctx.source(&i.operands[1]);
        let right = ctx.source(&i.operands[2]);
        arith::multiply(ctx, i, dest(i), left, right, 0);
        Ok(())
    }),
    Rule::new("mulh", |i, _| i.mnemonic == Mnemonic::MulHigh, |i, ctx| {
        let left = ctx.source(&i.operands[1]);
        let right = ctx.source(&i.operands[2]);
        arith::multiply(ctx, i, dest(i), left, right, 64);
        Ok(())
    }),
    Rule::new("shift-right", |i, _| matches!(i.mnemonic, Mnemonic::Shr | Mnemonic::Sar), |i, ctx| {
        let src = ctx.read(&i.operands[1]);
        let amount = ctx.source(&i.operands[2]);
        arith::shift_right(ctx, i, dest(i), src, amount);
        Ok(())
    }),
    Rule::new("divide", |i, _| matches!(i.mnemonic, Mnemonic::Div | Mnemonic::Idiv), |i, ctx| {
        let dividend = ctx.source(&i.operands[1]);
        let divisor = ctx.source(&i.operands[2]);
        arith::divide(ctx, i, dest(i), None, dividend, divisor);
        Ok(())
    }),
    Rule::new("arith", |i, _| arith_op(i.mnemonic).is_some() && i.operands[0].is_register(), |i, ctx| {
        if let Some(op) = arith_op(i.mnemonic) {
            let left = ctx.source(&i.operands[1]);
            let right = ctx.source(&i.operands[2]);
            arith::binary(ctx, i, op, dest(i), left, right);
        }
        Ok(())
    }),
];

static QUATERNARY: &[Rule] = &[
    Rule::new("ldp-post", |i, _| i.mnemonic == Mnemonic::Ldp && i.operands[3].is_immediate(), |i, ctx| {
        load_pair(ctx, i);
        post_index(ctx, i, &i.operands[2], immediate(i, 3))
    }),
    Rule::new("stp-post", |i, _| i.mnemonic == Mnemonic::Stp && i.operands[3].is_immediate(), |i, ctx| {
        store_pair(i, ctx)?;
        post_index(ctx, i, &i.operands[2], immediate(i, 3))
    }),
    // dest = a * b + c
    Rule::new("madd", |i, _| i.mnemonic == Mnemonic::Madd, |i, ctx| {
        let left = ctx.source(&i.operands[1]);
        let right = ctx.source(&i.operands[2]);
        let dest = dest(i);
        arith::binary(ctx, i, ArithOp::Mul, dest, left, right);
        let product = ctx.read_location(dest).into();
        let addend = ctx.source(&i.operands[3]);
        arith::binary(ctx, i, ArithOp::Add, dest, product, addend);
        Ok(())
    }),
];

fn target(instr: &Instruction) -> u64 {
    instr.branch_target().unwrap_or_default()
}

/// Register operand at `index`; callers match on `is_register` first.
fn register(instr: &Instruction, index: usize) -> Register {
    instr.operands[index].register().unwrap_or(Register::Zr)
}

fn immediate(instr: &Instruction, index: usize) -> i64 {
    instr.operands[index].immediate().unwrap_or_default()
}

fn dest(instr: &Instruction) -> Location {
    Location::Register(register(instr, 0))
}

fn is_move(instr: &Instruction) -> bool {
    instr.mnemonic == Mnemonic::Mov && instr.operands[0].is_register()
}

fn is_stack_adjustment(instr: &Instruction, ctx: &LiftContext<'_>) -> bool {
    let sp = Operand::Register(ctx.convention().stack_pointer);
    matches!(instr.mnemonic, Mnemonic::Add | Mnemonic::Sub)
        && instr.operands[0] == sp
        && instr.operands[1] == sp
        && instr.operands[2].is_immediate()
}

const fn arith_op(mnemonic: Mnemonic) -> Option<ArithOp> {
    Some(match mnemonic {
        Mnemonic::Add => ArithOp::Add,
        Mnemonic::Sub => ArithOp::Sub,
        Mnemonic::And => ArithOp::And,
        Mnemonic::Or => ArithOp::Or,
        Mnemonic::Xor => ArithOp::Xor,
        Mnemonic::Shl => ArithOp::Shl,
        _ => return None,
    })
}

/// `movk`: replace one 16-bit halfword of a known literal.
fn insert_halfword(ctx: &mut LiftContext<'_>, instr: &Instruction) {
    let dest = dest(instr);
    let halfword = immediate(instr, 1) & 0xFFFF;
    let shift = instr
        .operands
        .get(2)
        .and_then(Operand::immediate)
        .map_or(Some(0), |s| u32::try_from(s).ok().filter(|s| *s < 64));
    let current = ctx
        .read_location(dest)
        .and_then(|v| ctx.constant_number(Source::Value(v)));
    match (current, shift) {
        (Some(current), Some(shift)) => {
            let mask = 0xFFFF_i64 << shift;
            moves::load_number(ctx, instr, dest, (current & !mask) | (halfword << shift));
        }
        _ => ctx.clear(dest),
    }
}

/// A store below the stack pointer is a pre-indexed push: move the stack
/// pointer first and store at the new top.
fn pre_index(ctx: &mut LiftContext<'_>, instr: &Instruction, op: &Operand) -> Result<Operand> {
    match *op {
        Operand::StackSlot(offset) if offset < 0 => {
            moves::adjust_stack(ctx, instr, offset)?;
            Ok(Operand::StackSlot(0))
        }
        other => Ok(other),
    }
}

/// `[sp], #imm` post-indexed access: the stack pointer moves afterwards.
fn post_index(ctx: &mut LiftContext<'_>, instr: &Instruction, op: &Operand, amount: i64) -> Result<()> {
    if op.stack_slot().is_some() {
        moves::adjust_stack(ctx, instr, amount)?;
    }
    Ok(())
}

/// Second slot of a pair access.
fn next_slot(op: &Operand, pointer_size: i64) -> Operand {
    match *op {
        Operand::StackSlot(offset) => Operand::StackSlot(offset + pointer_size),
        Operand::Memory(mem) => Operand::Memory(MemoryOperand {
            displacement: mem.displacement + pointer_size,
            ..mem
        }),
        other => other,
    }
}

fn pair_stride(ctx: &LiftContext<'_>, instr: &Instruction) -> i64 {
    if instr.width == 4 { 4 } else { ctx.pointer_size() }
}

fn load_pair(ctx: &mut LiftContext<'_>, instr: &Instruction) {
    let first = instr.operands[2];
    let second = next_slot(&first, pair_stride(ctx, instr));
    memory::read(ctx, instr, dest(instr), &first);
    memory::read(ctx, instr, Location::Register(register(instr, 1)), &second);
}

fn store_pair(instr: &Instruction, ctx: &mut LiftContext<'_>) -> Result<()> {
    let first = pre_index(ctx, instr, &instr.operands[2])?;
    let second = next_slot(&first, pair_stride(ctx, instr));
    let a = ctx.source(&instr.operands[0]);
    let b = ctx.source(&instr.operands[1]);
    memory::write(ctx, instr, &first, a);
    memory::write(ctx, instr, &second, b);
    Ok(())
}

#[cfg(test)]
mod tests {
    use ilr_ir::ActionKind;

    use super::*;
    use crate::patterns::tests::{Fixture, lift_listing};

    #[test]
    fn test_selector_supports() {
        assert!(Arm64Selector.supports(Arch::Arm64));
        assert!(!Arm64Selector.supports(Arch::X86_64));
    }

    #[test]
    fn test_adrp_add_resolves_usage() {
        let fixture = Fixture::new();
        // x0 = "hello" through a page + offset pair
        let session = lift_listing(
            &fixture,
            Arch::Arm64,
            "0x1000 adrp x8, 0x50000\n0x1004 ldr x0, [x8, #8]\n0x1008 ret",
        );
        let constant = session
            .actions()
            .iter()
            .find_map(|a| match a.kind {
                ActionKind::LoadConstant { result, .. } => Some(result),
                _ => None,
            })
            .and_then(|id| session.value(id))
            .and_then(ilr_ir::Value::as_constant)
            .cloned();
        assert_eq!(constant, Some(ConstantPayload::String("hello".into())));
    }

    #[test]
    fn test_frame_pair_round_trip() {
        let fixture = Fixture::new();
        let session = lift_listing(
            &fixture,
            Arch::Arm64,
            "0x1000 stp x29, x30, [sp, #-0x20]!\n\
             0x1004 mov x29, sp\n\
             0x1008 mov w8, #5\n\
             0x100c str w8, [x29, #0x18]\n\
             0x1010 ldr w0, [sp, #0x18]\n\
             0x1014 ldp x29, x30, [sp], #0x20\n\
             0x1018 ret",
        );
        assert!(!session.is_tainted());
        let (offset, value) = session
            .actions()
            .iter()
            .find_map(|a| match a.kind {
                ActionKind::StackLoad { offset, value, .. } => Some((offset, value)),
                _ => None,
            })
            .unwrap();
        assert_eq!(offset, -0x8);
        assert_eq!(session.value(value).and_then(ilr_ir::Value::known_number), Some(5));
    }

    /// Literal loaded by the action just before the return.
    fn last_literal(session: &crate::MethodAnalysisSession) -> Option<i64> {
        match session.actions().iter().rev().nth(1).map(|a| &a.kind) {
            Some(ActionKind::LoadNumber { value, .. }) => Some(*value),
            _ => None,
        }
    }

    #[test]
    fn test_movk_merges_shifted_halfword() {
        let fixture = Fixture::new();
        let session = lift_listing(
            &fixture,
            Arch::Arm64,
            "0x1000 mov x0, #0x1234\n0x1004 movk x0, #0x5678, lsl #16\n0x1008 ret",
        );
        assert_eq!(last_literal(&session), Some(0x5678_1234));

        // a zero halfword clears only its own position
        let session = lift_listing(
            &fixture,
            Arch::Arm64,
            "0x1000 mov x0, #0x1234\n\
             0x1004 movk x0, #0x5678, lsl #16\n\
             0x1008 movk x0, #0, lsl #32\n\
             0x100c movk x0, #0\n\
             0x1010 ret",
        );
        assert_eq!(last_literal(&session), Some(0x5678_0000));
    }

    #[test]
    fn test_static_field_read() {
        let fixture = Fixture::new();
        // Player class -> static block -> Unit.count (inherited static at 0)
        let session = lift_listing(
            &fixture,
            Arch::Arm64,
            "0x1000 adrp x8, 0x50000\n\
             0x1004 ldr x8, [x8]\n\
             0x1008 ldr x8, [x8, #0xb8]\n\
             0x100c ldr w0, [x8]\n\
             0x1010 ret",
        );
        assert!(session.actions().iter().any(|a| matches!(a.kind, ActionKind::LoadStaticFieldsPointer { .. })));
    }
}
