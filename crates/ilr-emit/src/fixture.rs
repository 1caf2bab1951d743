//! Metadata and lifting helpers shared by the emitter tests.

use std::sync::Arc;

use ilr_isa::{Arch, parse_listing};
use ilr_lift::{LiftConfig, MethodAnalysisSession, lift_method};
use ilr_meta::{
    BridgeConfig, FieldDef, GlobalUsage, InMemoryMetadata, KeyFunction, KeyFunctions, MetadataBridge, MetadataUsage,
    MethodDef, ParamDef, TypeDef, TypeId, TypeKind, TypeRef,
};

pub const OBJECT_NEW: u64 = 0x9020;
pub const THROW_NULL: u64 = 0x9100;
pub const UNIT_INFO: u64 = 0x50000;

/// `Game.Unit` with an `Int32 health` field and a handful of methods.
pub struct Fixture {
    wide: MetadataBridge,
    narrow: MetadataBridge,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            wide: build(8),
            narrow: build(4),
        }
    }

    /// Bridge for 64-bit targets.
    pub const fn bridge(&self) -> &MetadataBridge {
        &self.wide
    }

    /// Bridge for 32-bit x86.
    pub const fn narrow_bridge(&self) -> &MetadataBridge {
        &self.narrow
    }
}

fn method(name: &str, ty: TypeId, address: u64) -> MethodDef {
    MethodDef {
        name: name.into(),
        declaring_type: ty,
        address: Some(address),
        ..MethodDef::default()
    }
}

fn build(pointer_size: u8) -> MetadataBridge {
    let mut meta = InMemoryMetadata::new(pointer_size);
    let object = TypeRef::Definition(meta.add_type(TypeDef::class("System", "Object")));
    let value_type =
        TypeRef::Definition(meta.add_type(TypeDef::class("System", "ValueType").with_parent(object.clone())));
    let int32 = meta.add_type(TypeDef::of_kind("System", "Int32", TypeKind::ValueType).with_parent(value_type.clone()));
    meta.add_type(TypeDef::of_kind("System", "Boolean", TypeKind::ValueType).with_parent(value_type));
    let string = meta.add_type(TypeDef::class("System", "String").with_parent(object.clone()));
    let exception = meta.add_type(TypeDef::class("System", "Exception").with_parent(object.clone()));
    meta.add_type(TypeDef::class("System", "NullReferenceException").with_parent(TypeRef::Definition(exception)));
    let unit = meta.add_type(TypeDef::class("Game", "Unit").with_parent(object));

    meta.add_field(FieldDef {
        name: "health".into(),
        declaring_type: unit,
        field_type: TypeRef::Definition(int32),
        offset: 0x10,
        is_static: false,
        is_literal: false,
    })
    .unwrap();

    let int = Some(TypeRef::Definition(int32));
    meta.add_method(MethodDef {
        return_type: int.clone(),
        ..method("GetHealth", unit, 0x2000)
    })
    .unwrap();
    let run = meta
        .add_method(MethodDef {
            is_virtual: true,
            slot: Some(4),
            ..method("Run", unit, 0x2100)
        })
        .unwrap();
    meta.add_method(MethodDef {
        is_static: true,
        params: vec![ParamDef::new("name", TypeRef::Definition(string))],
        return_type: Some(TypeRef::Definition(unit)),
        ..method("Create", unit, 0x2400)
    })
    .unwrap();
    meta.add_method(MethodDef {
        params: vec![ParamDef::new("amount", TypeRef::Definition(int32))],
        return_type: int,
        ..method("Heal", unit, 0x3000)
    })
    .unwrap();
    meta.set_vtable(unit, vec![None, None, None, None, Some(run)]);

    meta.add_usage(GlobalUsage::new(UNIT_INFO, MetadataUsage::TypeInfo(TypeRef::Definition(unit))));

    let keys = KeyFunctions::new()
        .with(KeyFunction::ObjectNew, OBJECT_NEW)
        .with_throw_helper(THROW_NULL, "System.NullReferenceException");
    MetadataBridge::new(Arc::new(meta), keys, BridgeConfig::new())
}

/// Lift a textual listing against the bridge matching `arch`.
pub fn lift_listing(fixture: &Fixture, arch: Arch, listing: &str) -> MethodAnalysisSession {
    let bridge = if arch.pointer_size() == 4 {
        fixture.narrow_bridge()
    } else {
        fixture.bridge()
    };
    let instructions = parse_listing(arch, listing).unwrap();
    lift_method(bridge, arch, &instructions, &LiftConfig::default())
}
