//! Arithmetic, including division-by-constant recovery.

use ilr_ir::{ActionKind, ArithOp, ConstantPayload, DivisionInProgress, Location, Source, ValueId};
use ilr_isa::Instruction;
use tracing::{debug, trace};

use super::memory::{self, GlobalAccess};
use crate::LiftContext;

/// `dest = left op right`.
///
/// Literal operands are folded, an offset added to an unresolved global
/// address is re-resolved, and offsets from a frame address stay frame
/// addresses.
pub(crate) fn binary(
    ctx: &mut LiftContext<'_>,
    instr: &Instruction,
    op: ArithOp,
    dest: Location,
    left: Source,
    right: Source,
) {
    if let (Some(a), Some(b)) = (ctx.constant_number(left), ctx.constant_number(right)) {
        if let Some(value) = fold(op, a, b) {
            super::moves::load_number(ctx, instr, dest, value);
            return;
        }
    }
    if let (Some(base), Some(offset)) = (left.value(), ctx.constant_number(right)) {
        let delta = match op {
            ArithOp::Add => Some(offset),
            ArithOp::Sub => offset.checked_neg(),
            _ => None,
        };
        match (ctx.payload(base), delta) {
            (Some(ConstantPayload::UnresolvedGlobal(address)), Some(delta)) => {
                let address = address.wrapping_add_signed(delta);
                memory::load_global(ctx, instr, dest, address, GlobalAccess::Address);
                return;
            }
            (Some(ConstantPayload::StackPointer(frame)), Some(delta)) => {
                let offset = frame + delta;
                super::moves::load_stack_address(ctx, instr, dest, offset);
                return;
            }
            _ => {}
        }
    }
    let ty = left
        .value()
        .and_then(|v| ctx.type_of(v))
        .or_else(|| right.value().and_then(|v| ctx.type_of(v)));
    let result = ctx.new_local(ty, dest);
    ctx.emit(
        instr,
        ActionKind::Arithmetic {
            op,
            dest,
            left,
            right,
            result,
        },
    );
}

/// `dest = op operand` for negation, complement and conversions.
pub(crate) fn unary(ctx: &mut LiftContext<'_>, instr: &Instruction, op: ArithOp, dest: Location, operand: Source) {
    let ty = match op {
        ArithOp::Convert => None,
        _ => operand.value().and_then(|v| ctx.type_of(v)),
    };
    let result = ctx.new_local(ty, dest);
    ctx.emit(
        instr,
        ActionKind::Arithmetic {
            op,
            dest,
            left: operand,
            right: Source::Unknown,
            result,
        },
    );
}

fn fold(op: ArithOp, a: i64, b: i64) -> Option<i64> {
    match op {
        ArithOp::Add => a.checked_add(b),
        ArithOp::Sub => a.checked_sub(b),
        ArithOp::Mul => a.checked_mul(b),
        ArithOp::And => Some(a & b),
        ArithOp::Or => Some(a | b),
        ArithOp::Xor => Some(a ^ b),
        ArithOp::Shl => u32::try_from(b).ok().and_then(|s| a.checked_shl(s)),
        ArithOp::Shr => u32::try_from(b).ok().and_then(|s| a.checked_shr(s)),
        _ => None,
    }
}

/// `dest = left * right`.
///
/// A product with a large literal starts a division-by-constant idiom that a
/// following right shift completes. `base_shift` is the implicit shift of a
/// high-half multiply.
pub(crate) fn multiply(
    ctx: &mut LiftContext<'_>,
    instr: &Instruction,
    dest: Location,
    left: Source,
    right: Source,
    base_shift: u32,
) {
    let min = ctx.config().min_division_multiplier;
    let magic = match (ctx.constant_number(left), ctx.constant_number(right)) {
        (_, Some(m)) if m.unsigned_abs() >= min.unsigned_abs() => Some((m, left.value())),
        (Some(m), _) if m.unsigned_abs() >= min.unsigned_abs() => Some((m, right.value())),
        _ => None,
    };
    match magic {
        Some((multiplier, dividend)) => {
            trace!(multiplier, base_shift, "division in progress");
            ctx.new_constant(
                ConstantPayload::IntegerDivision(DivisionInProgress {
                    multiplier,
                    base_shift,
                    dividend,
                }),
                dest,
            );
        }
        None => binary(ctx, instr, ArithOp::Mul, dest, left, right),
    }
}

/// `dest = src >> amount`, completing a pending division when `src` holds one.
pub(crate) fn shift_right(
    ctx: &mut LiftContext<'_>,
    instr: &Instruction,
    dest: Location,
    src: Option<ValueId>,
    amount: Source,
) {
    let pending = src.and_then(|id| match ctx.payload(id) {
        Some(ConstantPayload::IntegerDivision(division)) => Some(*division),
        _ => None,
    });
    let shift = ctx.constant_number(amount).and_then(|n| u32::try_from(n).ok());
    match (pending, shift) {
        (Some(division), Some(shift)) => complete_division(ctx, instr, dest, division, shift),
        _ => binary(ctx, instr, ArithOp::Shr, dest, src.into(), amount),
    }
}

/// Recover `d` from `x * m >> (base + k)`: `d = 2^(base + k) / m`, rounded.
fn complete_division(
    ctx: &mut LiftContext<'_>,
    instr: &Instruction,
    dest: Location,
    division: DivisionInProgress,
    shift: u32,
) {
    let total = division.base_shift.saturating_add(shift);
    let exact = 2f64.powi(total.min(i32::MAX as u32) as i32) / division.multiplier.unsigned_abs() as f64;
    let divisor = exact.round();
    let potentially_wrong = (exact - divisor).abs() > ctx.config().division_tolerance;
    if potentially_wrong {
        debug!(exact, multiplier = division.multiplier, shift = total, "inexact divisor");
    }
    let ty = division.dividend.and_then(|v| ctx.type_of(v));
    let result = ctx.new_local(ty, dest);
    ctx.emit(
        instr,
        ActionKind::IntegerDivision {
            dest,
            dividend: division.dividend.into(),
            divisor: divisor as i64,
            potentially_wrong,
            result,
        },
    );
}

/// Native `div`/`idiv`: quotient into `quotient`, the remainder register forgotten.
pub(crate) fn divide(
    ctx: &mut LiftContext<'_>,
    instr: &Instruction,
    quotient: Location,
    remainder: Option<Location>,
    dividend: Source,
    divisor: Source,
) {
    binary(ctx, instr, ArithOp::Div, quotient, dividend, divisor);
    if let Some(remainder) = remainder {
        ctx.clear(remainder);
    }
}

#[cfg(test)]
mod tests {
    use ilr_ir::ActionKind;
    use ilr_isa::Arch;

    use crate::patterns::tests::{Fixture, lift_listing};

    fn division(listing: &str, arch: Arch) -> (i64, bool) {
        let fixture = Fixture::new();
        let session = lift_listing(&fixture, arch, listing);
        session
            .actions()
            .iter()
            .find_map(|a| match a.kind {
                ActionKind::IntegerDivision {
                    divisor,
                    potentially_wrong,
                    ..
                } => Some((divisor, potentially_wrong)),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_exact_divisor() {
        let (divisor, wrong) = division("0x1000 imul eax, 0x10000\n0x1006 shr eax, 20\n0x1009 ret", Arch::X86_64);
        assert_eq!(divisor, 16);
        assert!(!wrong);
    }

    #[test]
    fn test_magic_number_divisor() {
        // 2^34 / 0x66666667 = 9.9999999...
        let (divisor, wrong) = division(
            "0x1000 mov eax, 0x66666667\n0x1005 imul ecx\n0x1007 sar edx, 2\n0x100a ret",
            Arch::X86_64,
        );
        assert_eq!(divisor, 10);
        assert!(!wrong);
    }

    #[test]
    fn test_inexact_divisor_is_flagged() {
        // 2^20 / 0x12345 = 14.06
        let (divisor, wrong) = division("0x1000 imul eax, 0x12345\n0x1006 shr eax, 20\n0x1009 ret", Arch::X86_64);
        assert_eq!(divisor, 14);
        assert!(wrong);
    }

    #[test]
    fn test_arm64_high_multiply() {
        // smulh keeps the high 64 bits: 2^(64 + 2) / 0x6666666666666667 = 10
        let (divisor, wrong) = division(
            "0x1000 movz x9, #0x6667\n\
             0x1004 movk x9, #0x6666, lsl #16\n\
             0x1008 movk x9, #0x6666, lsl #32\n\
             0x100c movk x9, #0x6666, lsl #48\n\
             0x1010 smulh x8, x0, x9\n\
             0x1014 asr x8, x8, #2\n\
             0x1018 ret",
            Arch::Arm64,
        );
        assert_eq!(divisor, 10);
        assert!(!wrong);
    }

    #[test]
    fn test_small_multiply_is_arithmetic() {
        let fixture = Fixture::new();
        let session = lift_listing(&fixture, Arch::X86_64, "0x1000 imul eax, ecx, 3\n0x1003 ret");
        assert!(session.actions().iter().any(|a| matches!(
            a.kind,
            ActionKind::Arithmetic {
                op: ilr_ir::ArithOp::Mul,
                ..
            }
        )));
    }
}
