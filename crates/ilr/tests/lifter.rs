//! End-to-end lifting through the facade: metadata, listings, batch reports,
//! metrics and both emitters.

use std::sync::Arc;

use ilr::metrics::{ACTIONS_EMITTED, CounterRecorder, METHODS_FAILED, METHODS_LIFTED, METHODS_TAINTED};
use ilr::{
    ActionKind, Arch, BridgeConfig, EmitConfig, Error, IlOp, InMemoryMetadata, KeyFunction, KeyFunctions,
    LiftConfig, Lifter, MetadataBridge, MethodId, MethodRef, TaintReason, TextListing, TypeRef, parse_listing,
};
use ilr_meta::{FieldDef, MethodDef, ParamDef, Segment, TypeDef, TypeKind};

const GET_HEALTH: &str = "0x2000 mov eax, dword ptr [rcx + 0x10]\n0x2003 ret";
const HEAL: &str = "0x2100 mov eax, dword ptr [rcx + 0x10]\n\
                    0x2103 add eax, edx\n\
                    0x2105 mov dword ptr [rcx + 0x10], eax\n\
                    0x2108 ret";

/// `Game.Unit` with three compiled methods in one code segment and one
/// method without a body.
fn bridge(pointer_size: u8) -> Arc<MetadataBridge> {
    let mut meta = InMemoryMetadata::new(pointer_size);
    let object = TypeRef::Definition(meta.add_type(TypeDef::class("System", "Object")));
    let value_type = meta.add_type(TypeDef::class("System", "ValueType").with_parent(object.clone()));
    let int32 = TypeRef::Definition(
        meta.add_type(TypeDef::of_kind("System", "Int32", TypeKind::ValueType).with_parent(TypeRef::Definition(value_type))),
    );
    let unit = meta.add_type(TypeDef::class("Game", "Unit").with_parent(object));

    meta.add_field(FieldDef {
        name: "health".into(),
        declaring_type: unit,
        field_type: int32.clone(),
        offset: 0x10,
        is_static: false,
        is_literal: false,
    })
    .unwrap();

    let method = |name: &str, address: Option<u64>| MethodDef {
        name: name.into(),
        declaring_type: unit,
        address,
        ..MethodDef::default()
    };
    meta.add_method(MethodDef {
        return_type: Some(int32.clone()),
        ..method("GetHealth", Some(0x2000))
    })
    .unwrap();
    meta.add_method(MethodDef {
        params: vec![ParamDef::new("amount", int32.clone())],
        return_type: Some(int32),
        ..method("Heal", Some(0x2100))
    })
    .unwrap();
    meta.add_method(method("Reset", Some(0x2200))).unwrap();
    meta.add_method(method("Abstract", None)).unwrap();

    meta.add_segment(Segment::new(0x2000, 0x1000, vec![0; 0x300])).unwrap();

    let keys = KeyFunctions::new().with(KeyFunction::ObjectNew, 0x9020);
    Arc::new(MetadataBridge::new(Arc::new(meta), keys, BridgeConfig::new()))
}

fn listings() -> TextListing {
    TextListing::new().with(0x2000, GET_HEALTH).with(0x2100, HEAL)
}

fn method(lifter: &Lifter, name: &str) -> MethodRef {
    lifter.bridge().resolve_runtime_call_identifier(name).unwrap()
}

#[test]
fn test_compiled_methods_skip_bodiless() {
    let lifter = Lifter::new(bridge(8), Arch::X86_64);
    let names: Vec<String> = lifter
        .compiled_methods()
        .iter()
        .map(|m| lifter.bridge().method_name(m))
        .collect();
    assert_eq!(names, ["Game.Unit::GetHealth", "Game.Unit::Heal", "Game.Unit::Reset"]);
}

#[test]
fn test_lift_method_binds_identity_and_parameters() {
    let lifter = Lifter::new(bridge(8), Arch::X86_64);
    let heal = method(&lifter, "Game.Unit::Heal");
    let session = lifter.lift_method(&heal, &listings()).unwrap();

    assert_eq!(session.method(), Some(&heal));
    assert_eq!((session.start(), session.end()), (0x2100, 0x2109));
    assert!(!session.is_tainted());
    let names: Vec<&str> = session.parameters().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["this", "amount"]);
    assert!(
        session
            .important_actions()
            .any(|a| matches!(a.kind, ActionKind::FieldWrite { .. }))
    );
}

#[test]
fn test_batch_report_counts() {
    let lifter = Lifter::new(bridge(8), Arch::X86_64).with_config(LiftConfig::new().with_max_instructions(2));
    let methods = lifter.compiled_methods();
    let report = lifter.lift_batch(&methods, &listings());

    assert_eq!(report.len(), 3);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.tainted(), 1);
    assert_eq!(report.failed(), 1);

    // outcomes keep the input order
    let order: Vec<&MethodRef> = report.outcomes.iter().map(|o| &o.method).collect();
    assert_eq!(order, methods.iter().collect::<Vec<_>>());

    let heal = report.outcomes[1].result.as_ref().unwrap();
    assert!(matches!(
        heal.taint().map(|t| &t.reason),
        Some(TaintReason::InstructionLimit(2))
    ));
    let (failed, err) = report.failures().next().unwrap();
    assert_eq!(lifter.bridge().method_name(failed), "Game.Unit::Reset");
    assert!(matches!(err, Error::Disassembly { address: 0x2200, .. }));
}

#[test]
fn test_batch_is_deterministic() {
    let lifter = Lifter::new(bridge(8), Arch::X86_64);
    let methods = lifter.compiled_methods();
    let a = lifter.lift_batch(&methods, &listings());
    let b = lifter.lift_batch(&methods, &listings());
    for (x, y) in a.sessions().zip(b.sessions()) {
        assert_eq!(x.actions(), y.actions());
        assert_eq!(x.regions(), y.regions());
    }
    assert_eq!(a.sessions().count(), 2);
}

#[test]
fn test_method_without_body() {
    let lifter = Lifter::new(bridge(8), Arch::X86_64);
    let bodiless = MethodRef::new(MethodId(3), ilr::TypeId(3));
    let err = lifter.lift_method(&bodiless, &listings()).unwrap_err();
    assert_eq!(err, Error::NoMethodBody(MethodId(3)));
}

#[test]
fn test_narrow_stack_underflow_taints() {
    let lifter = Lifter::new(bridge(4), Arch::X86);
    let listing = TextListing::new().with(0x2000, "0x2000 add esp, 8\n0x2003 ret");
    let session = lifter
        .lift_method(&method(&lifter, "Game.Unit::GetHealth"), &listing)
        .unwrap();
    assert!(matches!(
        session.taint().map(|t| &t.reason),
        Some(TaintReason::Stack(_))
    ));
    assert_eq!(session.taint().map(|t| t.address), Some(0x2000));
}

#[test]
fn test_metrics_follow_outcomes() {
    let recorder = CounterRecorder::new();
    let handle = recorder.handle();
    let lifter = Lifter::new(bridge(8), Arch::X86_64);
    ::metrics::with_local_recorder(&recorder, || {
        for name in ["Game.Unit::GetHealth", "Game.Unit::Heal", "Game.Unit::Reset"] {
            let _ = lifter.lift_method(&method(&lifter, name), &listings());
        }
    });
    assert_eq!(handle.total(METHODS_LIFTED), 2);
    assert_eq!(handle.total(METHODS_FAILED), 1);
    assert_eq!(handle.total(METHODS_TAINTED), 0);
    assert_eq!(handle.get("ilr_methods_lifted_total{arch=x86-64}"), Some(2));
    assert!(handle.total(ACTIONS_EMITTED) >= 6);
}

#[test]
fn test_pseudocode_and_bytecode() {
    let lifter = Lifter::new(bridge(8), Arch::X86_64);
    let session = lifter
        .lift_method(&method(&lifter, "Game.Unit::GetHealth"), &listings())
        .unwrap();

    let text = lifter.pseudocode(&session, &EmitConfig::default());
    assert!(text.starts_with("System.Int32 Game.Unit::GetHealth()\n{\n"));
    assert!(text.contains("    System.Int32 local0 = this.health;\n"));
    assert!(text.ends_with("    return local0;\n}\n"));

    let ops = lifter.bytecode(&session).unwrap();
    assert_eq!(ops.first(), Some(&IlOp::LdArg(0)));
    assert!(matches!(ops.get(1), Some(IlOp::LdFld(_))));
    assert_eq!(ops.last(), Some(&IlOp::Ret));
}

#[test]
fn test_strict_bytecode_reports_first_failure() {
    let lifter = Lifter::new(bridge(8), Arch::X86_64);
    let instructions =
        parse_listing(Arch::X86_64, "0x2000 mov dword ptr [rcx + 0x10], r9d\n0x2004 ret").unwrap();
    let session = lifter.lift_instructions(&instructions);
    let err = lifter.bytecode(&session).unwrap_err();
    assert!(matches!(err, Error::Emit(_)));
}
