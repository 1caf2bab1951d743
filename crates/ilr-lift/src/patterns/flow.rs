//! Comparisons, branches and returns.

use ilr_cfg::{BranchRole, JumpRole};
use ilr_ir::{ActionKind, BranchCondition, Location, Source};
use ilr_isa::{Condition, Instruction, Register};

use super::calls;
use crate::{LiftContext, Result};

/// Flag-setting comparison; later branches and `setcc` refer back to it.
pub(crate) fn compare(ctx: &mut LiftContext<'_>, instr: &Instruction, left: Source, right: Source, float: bool) {
    let id = ctx.emit(instr, ActionKind::Compare { left, right, float });
    ctx.set_last_comparison(Some(id));
}

pub(crate) fn conditional_branch(
    ctx: &mut LiftContext<'_>,
    instr: &Instruction,
    condition: BranchCondition,
    target: u64,
) {
    let id = ctx.next_action_id();
    let role = ctx
        .tracker_mut()
        .on_conditional_branch(instr.address, instr.next_address(), target, id);
    let comparison = match condition {
        BranchCondition::Flags(_) => ctx.last_comparison(),
        BranchCondition::Zero { .. } | BranchCondition::Bit { .. } => None,
    };
    let implicit_null_check = ctx.is_null_check(target);
    ctx.emit(
        instr,
        ActionKind::ConditionalBranch {
            condition,
            target,
            comparison,
            is_loop_back_edge: role == BranchRole::LoopBackEdge,
            implicit_null_check,
        },
    );
}

/// Unconditional direct jump: structure inside the method, tail call out of it.
pub(crate) fn jump(ctx: &mut LiftContext<'_>, instr: &Instruction, target: u64) -> Result<()> {
    let role = ctx
        .tracker_mut()
        .on_jump(instr.address, instr.next_address(), target);
    let structural = match role {
        JumpRole::Exit => return calls::tail_jump(ctx, instr, target),
        JumpRole::OpensElse | JumpRole::LoopBackEdge => true,
        JumpRole::Internal => false,
    };
    ctx.emit(instr, ActionKind::Jump { target, structural });
    Ok(())
}

pub(crate) fn ret(ctx: &mut LiftContext<'_>, instr: &Instruction) {
    let value = ctx.return_type().cloned().map(|ty| {
        let convention = ctx.convention();
        let reg = if ctx.bridge().is_float_type(&ty) {
            convention.float_return_reg
        } else {
            convention.return_reg
        };
        match reg {
            Register::St(_) => ctx.state().fpu_top().into(),
            _ => ctx.register(reg).into(),
        }
    });
    ctx.emit(instr, ActionKind::Return { value });
}

/// `setcc` / `cset`: a boolean from the last comparison.
pub(crate) fn set_from_comparison(ctx: &mut LiftContext<'_>, instr: &Instruction, dest: Location, condition: Condition) {
    let comparison = ctx.last_comparison();
    let ty = ctx.system_type("Boolean");
    let result = ctx.new_local(ty, dest);
    ctx.emit(
        instr,
        ActionKind::SetFromComparison {
            dest,
            condition,
            comparison,
            result,
        },
    );
}

/// `cmov` / `csel`: the selected value is not tracked.
pub(crate) fn conditional_select(ctx: &mut LiftContext<'_>, instr: &Instruction, dest: Location, condition: Condition) {
    ctx.new_local(None, dest);
    ctx.unresolved(instr, format!("conditional select on {condition}"));
}
