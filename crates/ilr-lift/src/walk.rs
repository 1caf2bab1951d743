//! The per-method instruction walk.

use ilr_cfg::ControlFlowScan;
use ilr_isa::{Arch, Instruction};
use ilr_meta::{MetadataBridge, MethodRef};
use tracing::{debug, debug_span, warn};

use crate::{LiftConfig, LiftContext, LiftStatus, MethodAnalysisSession, Taint, TaintReason, selector_for};

/// Lift the method whose body starts at the first instruction.
///
/// The method identity is looked up by address; see [`lift_method_as`].
#[must_use]
pub fn lift_method(
    bridge: &MetadataBridge,
    arch: Arch,
    instructions: &[Instruction],
    config: &LiftConfig,
) -> MethodAnalysisSession {
    let method = instructions
        .first()
        .and_then(|instr| bridge.method_at(instr.address))
        .cloned();
    lift_method_as(bridge, arch, instructions, method, config)
}

/// Lift `instructions` as the body of `method`.
///
/// Instructions must be in address order. The body is cut where the next
/// known method starts. Every instruction is visited once; a taint stops the
/// walk and keeps the actions produced so far.
#[must_use]
pub fn lift_method_as(
    bridge: &MetadataBridge,
    arch: Arch,
    instructions: &[Instruction],
    method: Option<MethodRef>,
    config: &LiftConfig,
) -> MethodAnalysisSession {
    let start = instructions.first().map_or(0, |instr| instr.address);
    let len = bridge
        .next_method_start_after(start)
        .map_or(instructions.len(), |next| {
            instructions.partition_point(|instr| instr.address < next)
        });
    let body = &instructions[..len];
    let end = body.last().map_or(start, Instruction::next_address);

    let _span = debug_span!("lift_method", start = format_args!("{start:#x}")).entered();

    let scan = ControlFlowScan::with_bounds(body, start, end);
    let mut ctx = LiftContext::new(bridge, config, arch, body, scan, method);
    ctx.bind_parameters();

    let selector = selector_for(arch);
    let mut status = LiftStatus::Complete;
    let mut lifted = 0usize;
    let mut walked_end = start;
    for instr in body {
        if let Some(max) = config.max_instructions.filter(|&max| lifted >= max) {
            status = LiftStatus::Tainted(Taint::new(instr.address, TaintReason::InstructionLimit(max)));
            break;
        }
        ctx.tracker_mut().enter(instr.address);
        if let Err(taint) = selector.lift(instr, &mut ctx) {
            warn!(%taint, "method tainted");
            status = LiftStatus::Tainted(taint);
            break;
        }
        lifted += 1;
        walked_end = instr.next_address();
    }
    ctx.tracker_mut().finish(walked_end);

    debug!(
        actions = ctx.actions().len(),
        important = ctx.actions().iter().filter(|a| a.is_important()).count(),
        lifted,
        tainted = matches!(status, LiftStatus::Tainted(_)),
        "method lifted"
    );
    ctx.into_session(start, end, status, lifted)
}

#[cfg(test)]
mod tests {
    use ilr_isa::{Arch, parse_listing};

    use super::*;
    use crate::patterns::tests::{Fixture, lift_listing};

    const LOOP: &str = "0x1000 mov w8, #0\n\
                        0x1004 cmp w8, #10\n\
                        0x1008 b.ge 0x1018\n\
                        0x100c add w8, w8, #1\n\
                        0x1010 b 0x1004\n\
                        0x1014 nop\n\
                        0x1018 ret";

    #[test]
    fn test_walk_is_deterministic() {
        let fixture = Fixture::new();
        let a = lift_listing(&fixture, Arch::Arm64, LOOP);
        let b = lift_listing(&fixture, Arch::Arm64, LOOP);
        assert_eq!(a.actions(), b.actions());
        assert_eq!(a.regions(), b.regions());
        assert_eq!(a.instructions_lifted(), 7);
    }

    #[test]
    fn test_body_stops_at_next_method() {
        let fixture = Fixture::new();
        // Unit.GetHealth at 0x2000, Unit.Run at 0x2100
        let session = lift_listing(
            &fixture,
            Arch::X86_64,
            "0x2000 mov eax, dword ptr [rcx + 0x10]\n0x2003 ret\n0x2100 ret",
        );
        // the listing derives the size of the last kept instruction from the gap
        assert_eq!(session.end(), 0x2100);
        assert_eq!(session.instructions_lifted(), 2);
        assert_eq!(session.method(), Some(&fixture.method("Game.Unit::GetHealth")));
    }

    #[test]
    fn test_instruction_limit_taints() {
        let fixture = Fixture::new();
        let instructions = parse_listing(Arch::Arm64, LOOP).unwrap();
        let config = LiftConfig::new().with_max_instructions(3);
        let session = lift_method(fixture.bridge(Arch::Arm64), Arch::Arm64, &instructions, &config);
        assert!(matches!(
            session.taint().map(|t| &t.reason),
            Some(TaintReason::InstructionLimit(3))
        ));
        assert_eq!(session.instructions_lifted(), 3);
    }

    #[test]
    fn test_explicit_method_binds_parameters() {
        let fixture = Fixture::new();
        let instructions = parse_listing(Arch::X86_64, "0x8000 mov eax, edx\n0x8002 ret").unwrap();
        let heal = fixture.method("Game.Unit::Heal");
        let session = lift_method_as(
            fixture.bridge(Arch::X86_64),
            Arch::X86_64,
            &instructions,
            Some(heal),
            &LiftConfig::default(),
        );
        let names: Vec<&str> = session.parameters().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["this", "amount"]);
        assert!(session.parameters()[0].is_this);
    }
}
