//! x86 and x86-64 instruction selector.

use ilr_ir::{ArithOp, BranchCondition, Location, Source};
use ilr_isa::{Arch, Instruction, Mnemonic, Operand, RAX, RDX, Register};

use crate::patterns::{arith, calls, flow, memory, moves};
use crate::{InstructionSelector, LiftContext, Result, Rule};

/// Selector for 32- and 64-bit x86.
#[derive(Clone, Copy, Debug, Default)]
pub struct X86Selector;

impl InstructionSelector for X86Selector {
    fn supports(&self, arch: Arch) -> bool {
        arch.is_x86()
    }

    fn rules(&self, arity: usize) -> &[Rule] {
        match arity {
            0 => NULLARY,
            1 => UNARY,
            2 => BINARY,
            3 => TERNARY,
            _ => &[],
        }
    }
}

static NULLARY: &[Rule] = &[
    Rule::new("ret", |i, _| i.is_return(), |i, ctx| {
        flow::ret(ctx, i);
        Ok(())
    }),
    Rule::new("sign-extend-accumulator", |i, _| i.mnemonic == Mnemonic::SignExtendAccumulator, |_, ctx| {
        ctx.clear(Location::Register(RDX));
        Ok(())
    }),
];

static UNARY: &[Rule] = &[
    Rule::new("ret-imm", |i, _| i.is_return(), |i, ctx| {
        flow::ret(ctx, i);
        Ok(())
    }),
    Rule::new("push", |i, _| i.mnemonic == Mnemonic::Push, |i, ctx| {
        moves::push(ctx, i, &i.operands[0]);
        Ok(())
    }),
    Rule::new("pop", |i, _| i.mnemonic == Mnemonic::Pop, |i, ctx| {
        moves::pop(ctx, &i.operands[0]);
        Ok(())
    }),
    Rule::new("call-direct", |i, _| i.is_call() && i.operands[0].is_immediate(), |i, ctx| {
        calls::call_direct(ctx, i, target(i))
    }),
    Rule::new("call-register", |i, _| i.is_call() && i.operands[0].is_register(), |i, ctx| {
        calls::call_register(ctx, i, register(i, 0))
    }),
    Rule::new("call-memory", |i, _| i.is_call(), |i, ctx| calls::call_memory(ctx, i, &i.operands[0])),
    Rule::new("jmp-direct", |i, _| i.is_jump() && i.operands[0].is_immediate(), |i, ctx| {
        flow::jump(ctx, i, target(i))
    }),
    Rule::new("jmp-indirect", |i, _| i.is_jump(), |i, ctx| calls::jump_indirect(ctx, i, &i.operands[0])),
    Rule::new("jcc", |i, _| matches!(i.mnemonic, Mnemonic::Jcc(_)), |i, ctx| {
        if let Mnemonic::Jcc(condition) = i.mnemonic {
            flow::conditional_branch(ctx, i, BranchCondition::Flags(condition), target(i));
        }
        Ok(())
    }),
    Rule::new("inc-dec", |i, _| matches!(i.mnemonic, Mnemonic::Inc | Mnemonic::Dec), |i, ctx| {
        let op = if i.mnemonic == Mnemonic::Inc { ArithOp::Add } else { ArithOp::Sub };
        in_place(ctx, i, op, Source::Immediate(1));
        Ok(())
    }),
    Rule::new("neg-not", |i, _| matches!(i.mnemonic, Mnemonic::Neg | Mnemonic::Not), |i, ctx| {
        let op = if i.mnemonic == Mnemonic::Neg { ArithOp::Neg } else { ArithOp::Not };
        match ctx.location(&i.operands[0]) {
            Some(dest) => {
                let operand = ctx.source(&i.operands[0]);
                arith::unary(ctx, i, op, dest, operand);
            }
            None => {
                ctx.unresolved(i, format!("{} on memory", i.text));
            }
        }
        ctx.set_last_comparison(None);
        Ok(())
    }),
    Rule::new("setcc", |i, _| matches!(i.mnemonic, Mnemonic::Setcc(_)), |i, ctx| {
        if let (Mnemonic::Setcc(condition), Some(dest)) = (i.mnemonic, ctx.location(&i.operands[0])) {
            flow::set_from_comparison(ctx, i, dest, condition);
        }
        Ok(())
    }),
    // rdx:rax = rax * src
    Rule::new("mul-wide", |i, _| matches!(i.mnemonic, Mnemonic::Mul | Mnemonic::Imul), |i, ctx| {
        let left = ctx.source(&Operand::Register(RAX));
        let right = ctx.source(&i.operands[0]);
        let base_shift = u32::from(i.width) * 8;
        arith::multiply(ctx, i, Location::Register(RDX), left, right, base_shift);
        ctx.clear(Location::Register(RAX));
        Ok(())
    }),
    Rule::new("div-wide", |i, _| matches!(i.mnemonic, Mnemonic::Div | Mnemonic::Idiv), |i, ctx| {
        let dividend = ctx.source(&Operand::Register(RAX));
        let divisor = ctx.source(&i.operands[0]);
        arith::divide(
            ctx,
            i,
            Location::Register(RAX),
            Some(Location::Register(RDX)),
            dividend,
            divisor,
        );
        Ok(())
    }),
    Rule::new("fld", |i, _| matches!(i.mnemonic, Mnemonic::Fld | Mnemonic::Fild), |i, ctx| {
        fpu_load(ctx, i);
        Ok(())
    }),
    Rule::new("fst", |i, _| matches!(i.mnemonic, Mnemonic::Fst | Mnemonic::Fstp), |i, ctx| {
        fpu_store(ctx, i);
        Ok(())
    }),
];

static BINARY: &[Rule] = &[
    Rule::new("adjust-sp", is_stack_adjustment, |i, ctx| {
        let amount = i.operands[1].immediate().unwrap_or_default();
        let delta = if i.mnemonic == Mnemonic::Sub { -amount } else { amount };
        moves::adjust_stack(ctx, i, delta)
    }),
    // alignment, frame teardown and dynamic allocation
    Rule::new("write-sp", writes_stack_pointer, |_, _| Ok(())),
    Rule::new("zero-idiom", |i, _| {
        i.mnemonic == Mnemonic::Xor && i.operands[0].is_register() && i.operands[0] == i.operands[1]
    }, |i, ctx| {
        moves::load_number(ctx, i, Location::Register(register(i, 0)), 0);
        ctx.set_last_comparison(None);
        Ok(())
    }),
    Rule::new("mov-reg-reg", |i, _| {
        i.mnemonic == Mnemonic::Mov && i.operands[0].is_register() && i.operands[1].is_register()
    }, |i, ctx| {
        moves::copy_register(ctx, i, register(i, 0), register(i, 1));
        Ok(())
    }),
    Rule::new("mov-reg-imm", |i, _| {
        i.mnemonic == Mnemonic::Mov && i.operands[0].is_register() && i.operands[1].is_immediate()
    }, |i, ctx| {
        let value = i.operands[1].immediate().unwrap_or_default();
        moves::load_number(ctx, i, Location::Register(register(i, 0)), value);
        Ok(())
    }),
    Rule::new("mov-store", |i, _| i.mnemonic == Mnemonic::Mov && i.operands[0].is_memory(), |i, ctx| {
        let value = ctx.source(&i.operands[1]);
        memory::write(ctx, i, &i.operands[0], value);
        Ok(())
    }),
    Rule::new("mov-load", |i, _| i.mnemonic == Mnemonic::Mov && i.operands[0].is_register(), |i, ctx| {
        memory::read(ctx, i, Location::Register(register(i, 0)), &i.operands[1]);
        Ok(())
    }),
    Rule::new("lea", |i, _| i.mnemonic == Mnemonic::Lea && i.operands[0].is_register(), |i, ctx| {
        memory::address_of(ctx, i, Location::Register(register(i, 0)), &i.operands[1]);
        Ok(())
    }),
    Rule::new("xchg", |i, _| {
        i.mnemonic == Mnemonic::Xchg && i.operands[0].is_register() && i.operands[1].is_register()
    }, |i, ctx| {
        moves::exchange(ctx, register(i, 0), register(i, 1));
        Ok(())
    }),
    Rule::new("test-self", |i, _| i.mnemonic == Mnemonic::Test && i.operands[0] == i.operands[1], |i, ctx| {
        let left = ctx.source(&i.operands[0]);
        flow::compare(ctx, i, left, Source::Immediate(0), false);
        Ok(())
    }),
    Rule::new("compare", |i, _| matches!(i.mnemonic, Mnemonic::Cmp | Mnemonic::Test | Mnemonic::FloatCmp), |i, ctx| {
        let left = ctx.source(&i.operands[0]);
        let right = ctx.source(&i.operands[1]);
        flow::compare(ctx, i, left, right, i.mnemonic == Mnemonic::FloatCmp);
        Ok(())
    }),
    Rule::new("imul", |i, _| i.mnemonic == Mnemonic::Imul && i.operands[0].is_register(), |i, ctx| {
        let left = ctx.source(&i.operands[0]);
        let right = ctx.source(&i.operands[1]);
        arith::multiply(ctx, i, Location::Register(register(i, 0)), left, right, 0);
        ctx.set_last_comparison(None);
        Ok(())
    }),
    Rule::new("shift-right", |i, _| {
        matches!(i.mnemonic, Mnemonic::Shr | Mnemonic::Sar) && i.operands[0].is_register()
    }, |i, ctx| {
        let dest = register(i, 0);
        let src = ctx.register(dest);
        let amount = ctx.source(&i.operands[1]);
        arith::shift_right(ctx, i, Location::Register(dest), src, amount);
        ctx.set_last_comparison(None);
        Ok(())
    }),
    Rule::new("convert", |i, _| i.mnemonic == Mnemonic::Convert && i.operands[0].is_register(), |i, ctx| {
        let operand = ctx.source(&i.operands[1]);
        arith::unary(ctx, i, ArithOp::Convert, Location::Register(register(i, 0)), operand);
        Ok(())
    }),
    Rule::new("cmov", |i, _| matches!(i.mnemonic, Mnemonic::Cmovcc(_)), |i, ctx| {
        if let (Mnemonic::Cmovcc(condition), Some(dest)) = (i.mnemonic, ctx.location(&i.operands[0])) {
            flow::conditional_select(ctx, i, dest, condition);
        }
        Ok(())
    }),
    Rule::new("arith", |i, _| arith_op(i.mnemonic).is_some(), |i, ctx| {
        if let Some(op) = arith_op(i.mnemonic) {
            let right = ctx.source(&i.operands[1]);
            in_place(ctx, i, op, right);
        }
        Ok(())
    }),
];

static TERNARY: &[Rule] = &[Rule::new("imul-imm", |i, _| {
    i.mnemonic == Mnemonic::Imul && i.operands[0].is_register() && i.operands[2].is_immediate()
}, |i, ctx| {
    let left = ctx.source(&i.operands[1]);
    let right = ctx.source(&i.operands[2]);
    arith::multiply(ctx, i, Location::Register(register(i, 0)), left, right, 0);
    ctx.set_last_comparison(None);
    Ok(())
})];

fn target(instr: &Instruction) -> u64 {
    instr.branch_target().unwrap_or_default()
}

/// Register operand at `index`; callers match on `is_register` first.
fn register(instr: &Instruction, index: usize) -> Register {
    instr.operands[index].register().unwrap_or(Register::Rip)
}

fn is_stack_adjustment(instr: &Instruction, ctx: &LiftContext<'_>) -> bool {
    matches!(instr.mnemonic, Mnemonic::Add | Mnemonic::Sub)
        && instr.operands[0] == Operand::Register(ctx.convention().stack_pointer)
        && instr.operands[1].is_immediate()
}

fn writes_stack_pointer(instr: &Instruction, ctx: &LiftContext<'_>) -> bool {
    instr.mnemonic != Mnemonic::Mov
        && instr.mnemonic != Mnemonic::Cmp
        && instr.operands[0] == Operand::Register(ctx.convention().stack_pointer)
}

const fn arith_op(mnemonic: Mnemonic) -> Option<ArithOp> {
    Some(match mnemonic {
        Mnemonic::Add => ArithOp::Add,
        Mnemonic::Sub => ArithOp::Sub,
        Mnemonic::Mul | Mnemonic::Imul => ArithOp::Mul,
        Mnemonic::Div | Mnemonic::Idiv => ArithOp::Div,
        Mnemonic::And => ArithOp::And,
        Mnemonic::Or => ArithOp::Or,
        Mnemonic::Xor => ArithOp::Xor,
        Mnemonic::Shl => ArithOp::Shl,
        Mnemonic::Shr | Mnemonic::Sar => ArithOp::Shr,
        _ => return None,
    })
}

/// Two-operand arithmetic `dst op= right`; flags no longer describe a comparison.
fn in_place(ctx: &mut LiftContext<'_>, instr: &Instruction, op: ArithOp, right: Source) {
    let dst = &instr.operands[0];
    match ctx.location(dst) {
        Some(dest) => {
            let left = ctx.source(dst);
            arith::binary(ctx, instr, op, dest, left, right);
        }
        None => {
            ctx.unresolved(instr, format!("{} on memory", instr.text));
        }
    }
    ctx.set_last_comparison(None);
}

/// `fld` / `fild`: push a frame value or a float literal onto the x87 stack.
fn fpu_load(ctx: &mut LiftContext<'_>, instr: &Instruction) {
    let src = &instr.operands[0];
    let value = match src.memory().and_then(|m| m.absolute_address(instr.next_address())) {
        Some(address) => {
            let bridge = ctx.bridge();
            let literal = if instr.width == 8 {
                bridge.read_f64(address)
            } else {
                bridge.read_f32(address).map(f64::from)
            };
            literal.map(|v| {
                ctx.state_mut()
                    .make_constant(ilr_ir::ConstantPayload::Float(v), None)
            })
        }
        None => match src {
            Operand::Register(Register::St(_)) => ctx.state().fpu_top(),
            _ => ctx.read(src),
        },
    };
    ctx.state_mut().fpu_push(value);
    ctx.emit(instr, ilr_ir::ActionKind::FpuLoad { value: value.into() });
}

/// `fst` / `fstp`: store the x87 top into a frame slot or memory.
fn fpu_store(ctx: &mut LiftContext<'_>, instr: &Instruction) {
    let value = if instr.mnemonic == Mnemonic::Fstp {
        ctx.state_mut().fpu_pop()
    } else {
        ctx.state().fpu_top()
    };
    let dst = &instr.operands[0];
    match ctx.location(dst) {
        Some(dest) => {
            match value {
                Some(value) => ctx.bind(dest, value),
                None => ctx.clear(dest),
            }
            ctx.emit(
                instr,
                ilr_ir::ActionKind::FpuStore {
                    dest,
                    value: value.into(),
                },
            );
        }
        None => memory::write(ctx, instr, dst, value.into()),
    }
}
