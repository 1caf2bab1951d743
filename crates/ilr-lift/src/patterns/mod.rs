//! Rule bodies shared by the architecture selectors.
//!
//! Each function implements one semantic pattern (a field read, a managed
//! call, a division idiom) in terms of [`crate::LiftContext`]; the selectors
//! only decode operands and pick the pattern.

pub(crate) mod arith;
pub(crate) mod calls;
pub(crate) mod flow;
pub(crate) mod memory;
pub(crate) mod moves;

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use ilr_isa::{Arch, parse_listing};
    use ilr_meta::{
        BridgeConfig, FieldDef, GlobalUsage, InMemoryMetadata, InterfaceOffset, KeyFunction, KeyFunctions,
        MetadataBridge, MetadataUsage, MethodDef, MethodRef, ParamDef, Segment, TypeDef, TypeId, TypeKind,
        TypeRef,
    };

    use crate::{LiftConfig, MethodAnalysisSession, lift_method};

    pub(crate) const OBJECT_NEW: u64 = 0x9020;
    pub(crate) const ARRAY_NEW: u64 = 0x9030;
    pub(crate) const RESOLVE_ICALL: u64 = 0x9040;
    pub(crate) const RAISE: u64 = 0x9050;
    pub(crate) const INVOKE_DATA: u64 = 0x9060;
    pub(crate) const VALUE_BOX: u64 = 0x9070;
    pub(crate) const UNBOX: u64 = 0x9080;
    pub(crate) const IS_INSTANCE: u64 = 0x9090;
    pub(crate) const CAST_CLASS: u64 = 0x90A0;
    pub(crate) const THROW_NULL: u64 = 0x9100;

    pub(crate) const PLAYER_INFO: u64 = 0x50000;
    pub(crate) const HELLO: u64 = 0x50008;
    pub(crate) const INT32_INFO: u64 = 0x50010;
    pub(crate) const FIND_INT: u64 = 0x50018;
    pub(crate) const RUNNER_INFO: u64 = 0x50020;
    pub(crate) const PING_NAME: u64 = 0x60000;
    pub(crate) const HALF: u64 = 0x60040;
    pub(crate) const FIND_INT_CODE: u64 = 0x3200;

    /// Small managed universe: a `Game.Unit` / `Game.Player` hierarchy
    /// implementing `Game.IRunner`, a value type, one generic method and a few
    /// runtime helpers.
    pub(crate) struct Fixture {
        wide: MetadataBridge,
        narrow: MetadataBridge,
        pub(crate) unit: TypeId,
        pub(crate) player: TypeId,
        pub(crate) int32: TypeId,
        pub(crate) runner: TypeId,
        /// `Game.Unit::Find<System.Int32>`, compiled at [`FIND_INT_CODE`].
        pub(crate) find_int: MethodRef,
    }

    impl Fixture {
        pub(crate) fn new() -> Self {
            let wide = build(8);
            let narrow = build(4);
            Self {
                unit: wide.unit,
                player: wide.player,
                int32: wide.int32,
                runner: wide.runner,
                find_int: wide.find_int,
                wide: wide.bridge,
                narrow: narrow.bridge,
            }
        }

        pub(crate) fn bridge(&self, arch: Arch) -> &MetadataBridge {
            if arch.pointer_size() == 4 { &self.narrow } else { &self.wide }
        }

        /// Method by `Namespace.Type::Name`.
        pub(crate) fn method(&self, name: &str) -> MethodRef {
            self.wide.resolve_runtime_call_identifier(name).unwrap()
        }
    }

    fn method(name: &str, ty: TypeId) -> MethodDef {
        MethodDef {
            name: name.into(),
            declaring_type: ty,
            ..MethodDef::default()
        }
    }

    fn field(name: &str, ty: TypeId, field_type: TypeId, offset: i64) -> FieldDef {
        FieldDef {
            name: name.into(),
            declaring_type: ty,
            field_type: TypeRef::Definition(field_type),
            offset,
            is_static: false,
            is_literal: false,
        }
    }

    struct Built {
        bridge: MetadataBridge,
        unit: TypeId,
        player: TypeId,
        int32: TypeId,
        runner: TypeId,
        find_int: MethodRef,
    }

    fn build(pointer_size: u8) -> Built {
        let mut meta = InMemoryMetadata::new(pointer_size);
        let object = meta.add_type(TypeDef::class("System", "Object"));
        let value_type = TypeRef::Definition(meta.add_type(
            TypeDef::class("System", "ValueType").with_parent(TypeRef::Definition(object)),
        ));
        let primitive = |meta: &mut InMemoryMetadata, name: &str| {
            meta.add_type(TypeDef::of_kind("System", name, TypeKind::ValueType).with_parent(value_type.clone()))
        };
        let int32 = primitive(&mut meta, "Int32");
        let single = primitive(&mut meta, "Single");
        primitive(&mut meta, "Boolean");
        let string = meta.add_type(TypeDef::class("System", "String").with_parent(TypeRef::Definition(object)));
        meta.add_type(TypeDef::class("System", "Type").with_parent(TypeRef::Definition(object)));
        let exception = meta.add_type(TypeDef::class("System", "Exception").with_parent(TypeRef::Definition(object)));
        meta.add_type(
            TypeDef::class("System", "NullReferenceException").with_parent(TypeRef::Definition(exception)),
        );

        let runner = meta.add_type(TypeDef::of_kind("Game", "IRunner", TypeKind::Interface));
        let vector = meta.add_type(TypeDef::of_kind("Game", "Vector2", TypeKind::ValueType).with_parent(value_type));
        let unit = meta.add_type(TypeDef::class("Game", "Unit").with_parent(TypeRef::Definition(object)));
        let player = meta.add_type(TypeDef::class("Game", "Player").with_parent(TypeRef::Definition(unit)));
        let native = meta.add_type(TypeDef::class("Game", "Native").with_parent(TypeRef::Definition(object)));

        meta.add_field(field("x", vector, single, 0x10)).unwrap();
        meta.add_field(field("y", vector, single, 0x14)).unwrap();
        meta.add_field(field("health", unit, int32, 0x10)).unwrap();
        meta.add_field(field("name", unit, string, 0x18)).unwrap();
        meta.add_field(field("position", unit, vector, 0x20)).unwrap();
        meta.add_field(FieldDef {
            is_static: true,
            ..field("count", unit, int32, 0x0)
        })
        .unwrap();

        let int = || Some(TypeRef::Definition(int32));
        meta.add_method(MethodDef {
            return_type: int(),
            address: Some(0x2000),
            ..method("GetHealth", unit)
        })
        .unwrap();
        let run_unit = meta
            .add_method(MethodDef {
                is_virtual: true,
                slot: Some(4),
                address: Some(0x2100),
                ..method("Run", unit)
            })
            .unwrap();
        let run_player = meta
            .add_method(MethodDef {
                is_virtual: true,
                slot: Some(4),
                address: Some(0x2200),
                ..method("Run", player)
            })
            .unwrap();
        let stop_unit = meta
            .add_method(MethodDef {
                is_virtual: true,
                slot: Some(5),
                address: Some(0x2300),
                ..method("Stop", unit)
            })
            .unwrap();
        meta.add_method(MethodDef {
            is_static: true,
            params: vec![ParamDef::new("name", TypeRef::Definition(string))],
            return_type: Some(TypeRef::Definition(unit)),
            address: Some(0x2400),
            ..method("Create", unit)
        })
        .unwrap();
        meta.add_method(MethodDef {
            return_type: Some(TypeRef::Definition(single)),
            address: Some(0x2500),
            ..method("Length", vector)
        })
        .unwrap();
        meta.add_method(MethodDef {
            params: vec![ParamDef::new("amount", TypeRef::Definition(int32))],
            return_type: int(),
            address: Some(0x3000),
            ..method("Heal", unit)
        })
        .unwrap();
        meta.add_method(MethodDef {
            is_static: true,
            return_type: int(),
            ..method("Ping", native)
        })
        .unwrap();
        meta.add_method(MethodDef {
            is_static: true,
            params: vec![
                ParamDef::new("values", TypeRef::array_of(TypeRef::Definition(int32))),
                ParamDef::new("index", TypeRef::Definition(int32)),
            ],
            return_type: int(),
            address: Some(0x3100),
            ..method("Pick", unit)
        })
        .unwrap();
        let find = meta
            .add_method(MethodDef {
                is_static: true,
                generic_params: vec!["T".into()],
                return_type: Some(TypeRef::MethodParam(0)),
                ..method("Find", unit)
            })
            .unwrap();
        let find_int = MethodRef {
            method: find,
            declaring_type: TypeRef::Definition(unit),
            method_args: vec![TypeRef::Definition(int32)],
        };
        meta.add_generic_instance(FIND_INT_CODE, find_int.clone());

        meta.set_vtable(unit, vec![None, None, None, None, Some(run_unit), Some(stop_unit)]);
        meta.set_vtable(player, vec![None, None, None, None, Some(run_player), Some(stop_unit)]);
        for ty in [unit, player] {
            meta.add_interface_offset(
                ty,
                InterfaceOffset {
                    interface: TypeRef::Definition(runner),
                    offset: 4,
                },
            );
        }

        meta.add_usage(GlobalUsage::new(PLAYER_INFO, MetadataUsage::TypeInfo(TypeRef::Definition(player))));
        meta.add_usage(GlobalUsage::new(HELLO, MetadataUsage::StringLiteral("hello".into())));
        meta.add_usage(GlobalUsage::new(RUNNER_INFO, MetadataUsage::TypeInfo(TypeRef::Definition(runner))));
        meta.add_usage(GlobalUsage::new(INT32_INFO, MetadataUsage::TypeInfo(TypeRef::Definition(int32))));
        meta.add_usage(GlobalUsage::new(FIND_INT, MetadataUsage::MethodRef(find_int.clone())));

        let mut data = vec![0u8; 0x80];
        data[..17].copy_from_slice(b"Game.Native::Ping");
        data[0x40..0x44].copy_from_slice(&0.5f32.to_le_bytes());
        // pointer slot at 0x60048 to a plain C string
        data[0x48..0x50].copy_from_slice(&0x60050u64.to_le_bytes());
        data[0x50..0x58].copy_from_slice(b"raw text");
        meta.add_segment(Segment::new(PING_NAME, 0x1000, data)).unwrap();

        let keys = KeyFunctions::new()
            .with(KeyFunction::InitializeMethodMetadata, 0x9000)
            .with(KeyFunction::ClassInit, 0x9010)
            .with(KeyFunction::ObjectNew, OBJECT_NEW)
            .with(KeyFunction::ArrayNew, ARRAY_NEW)
            .with(KeyFunction::ResolveInternalCall, RESOLVE_ICALL)
            .with(KeyFunction::RaiseException, RAISE)
            .with(KeyFunction::InterfaceInvokeData, INVOKE_DATA)
            .with(KeyFunction::ValueBox, VALUE_BOX)
            .with(KeyFunction::ObjectUnbox, UNBOX)
            .with(KeyFunction::IsInstance, IS_INSTANCE)
            .with(KeyFunction::CastClass, CAST_CLASS)
            .with_throw_helper(THROW_NULL, "System.NullReferenceException");
        Built {
            bridge: MetadataBridge::new(Arc::new(meta), keys, BridgeConfig::new()),
            unit,
            player,
            int32,
            runner,
            find_int,
        }
    }

    /// Lift a textual listing with the default configuration.
    pub(crate) fn lift_listing(fixture: &Fixture, arch: Arch, listing: &str) -> MethodAnalysisSession {
        let instructions = parse_listing(arch, listing).unwrap();
        lift_method(fixture.bridge(arch), arch, &instructions, &LiftConfig::default())
    }
}
