//! Metadata resolution bridge.
//!
//! The bridge is built once per binary, before any method is lifted, and is
//! shared read-only by every lift. The only mutable state are the memo caches
//! for generic instantiations and closed signatures, which are monotonic.

use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info_span, trace};

use crate::{
    FieldAccessChain, FieldDef, FieldId, FieldRef, KeyFunctions, MetadataSource, MetadataUsage, MethodDef,
    MethodId, MethodRef, RuntimeLayout, TypeDef, TypeId, TypeKind, TypeRef,
};

/// Upper bound on parent-chain walks and nested struct recursion.
const MAX_DEPTH: usize = 64;

/// Longest string literal read from the binary.
const MAX_STRING_LEN: usize = 1024;

/// Which entry to use when a type implements the same interface more than once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InterfaceSlotPolicy {
    /// Last matching entry of the flattened interface offset table.
    #[default]
    LastMatch,
    /// Entry introduced by the most-derived type in the hierarchy.
    MostDerived,
}

/// Bridge configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct BridgeConfig {
    /// Runtime layout; derived from the source's pointer size when unset.
    pub layout: Option<RuntimeLayout>,
    pub interface_policy: InterfaceSlotPolicy,
}

impl BridgeConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            layout: None,
            interface_policy: InterfaceSlotPolicy::LastMatch,
        }
    }

    #[must_use]
    pub const fn with_layout(mut self, layout: RuntimeLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    #[must_use]
    pub const fn with_interface_policy(mut self, policy: InterfaceSlotPolicy) -> Self {
        self.interface_policy = policy;
        self
    }
}

/// Signature of a method after generic substitution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSignature {
    /// Declaring type for instance methods.
    pub this_type: Option<TypeRef>,
    pub params: Vec<TypeRef>,
    /// `None` for `void`.
    pub return_type: Option<TypeRef>,
}

impl MethodSignature {
    /// Argument types in passing order, `this` first.
    #[must_use]
    pub fn arguments(&self) -> Vec<&TypeRef> {
        self.this_type.iter().chain(self.params.iter()).collect()
    }
}

type GenericKey = (MethodId, Vec<TypeRef>, Vec<TypeRef>);

/// Read-mostly index over a [`MetadataSource`].
pub struct MetadataBridge {
    source: Arc<dyn MetadataSource>,
    keys: KeyFunctions,
    layout: RuntimeLayout,
    policy: InterfaceSlotPolicy,
    types_by_name: FxHashMap<String, TypeId>,
    methods_by_address: FxHashMap<u64, MethodRef>,
    /// Sorted, deduplicated method start addresses.
    method_starts: Vec<u64>,
    generic_cache: RwLock<FxHashMap<GenericKey, MethodRef>>,
    signature_cache: RwLock<FxHashMap<MethodRef, Arc<MethodSignature>>>,
}

impl MetadataBridge {
    /// Build the bridge and its indexes.
    #[must_use]
    pub fn new(source: Arc<dyn MetadataSource>, keys: KeyFunctions, config: BridgeConfig) -> Self {
        let _span = info_span!("build_bridge").entered();

        let layout = config
            .layout
            .unwrap_or_else(|| RuntimeLayout::for_pointer_size(source.pointer_size()));

        let mut bridge = Self {
            source,
            keys,
            layout,
            policy: config.interface_policy,
            types_by_name: FxHashMap::default(),
            methods_by_address: FxHashMap::default(),
            method_starts: Vec::new(),
            generic_cache: RwLock::new(FxHashMap::default()),
            signature_cache: RwLock::new(FxHashMap::default()),
        };

        let type_count = bridge.source.type_definitions().len();
        let mut types_by_name = FxHashMap::default();
        for index in 0..type_count {
            let id = TypeId(index as u32);
            types_by_name.entry(bridge.full_type_name(id)).or_insert(id);
        }
        bridge.types_by_name = types_by_name;

        let mut methods_by_address = FxHashMap::default();
        for (index, def) in bridge.source.method_definitions().iter().enumerate() {
            if let Some(address) = def.address {
                methods_by_address
                    .entry(address)
                    .or_insert_with(|| MethodRef::new(MethodId(index as u32), def.declaring_type));
            }
        }
        for (address, method) in bridge.source.generic_method_instances() {
            methods_by_address.entry(*address).or_insert_with(|| method.clone());
        }
        let mut starts: Vec<u64> = methods_by_address.keys().copied().collect();
        starts.sort_unstable();
        bridge.methods_by_address = methods_by_address;
        bridge.method_starts = starts;

        debug!(
            types = type_count,
            methods = bridge.method_starts.len(),
            pointer_size = bridge.layout.pointer_size,
            "metadata bridge ready"
        );
        bridge
    }

    #[must_use]
    pub fn source(&self) -> &dyn MetadataSource {
        self.source.as_ref()
    }

    #[must_use]
    pub const fn keys(&self) -> &KeyFunctions {
        &self.keys
    }

    #[must_use]
    pub const fn layout(&self) -> &RuntimeLayout {
        &self.layout
    }

    #[must_use]
    pub const fn pointer_size(&self) -> u8 {
        self.layout.pointer_size
    }

    #[must_use]
    pub const fn interface_policy(&self) -> InterfaceSlotPolicy {
        self.policy
    }

    #[must_use]
    pub fn type_def(&self, id: TypeId) -> Option<&TypeDef> {
        self.source.type_definitions().get(id.index())
    }

    #[must_use]
    pub fn method_def(&self, id: MethodId) -> Option<&MethodDef> {
        self.source.method_definitions().get(id.index())
    }

    #[must_use]
    pub fn field_def(&self, id: FieldId) -> Option<&FieldDef> {
        self.source.field_definitions().get(id.index())
    }

    // ---- names ----

    /// Full name of a definition: `Namespace.Name`, nested types as `Outer/Inner`.
    #[must_use]
    pub fn full_type_name(&self, id: TypeId) -> String {
        let Some(def) = self.type_def(id) else {
            return format!("<type {}>", id.0);
        };
        if let Some(outer) = def.declaring_type.filter(|&outer| outer != id) {
            return format!("{}/{}", self.full_type_name(outer), def.name);
        }
        if def.namespace.is_empty() {
            def.name.clone()
        } else {
            format!("{}.{}", def.namespace, def.name)
        }
    }

    /// Look up a definition by its full name.
    #[must_use]
    pub fn type_by_full_name(&self, name: &str) -> Option<TypeId> {
        self.types_by_name.get(name).copied()
    }

    /// Display name of a type reference.
    #[must_use]
    pub fn type_name(&self, ty: &TypeRef) -> String {
        match ty {
            TypeRef::Definition(id) => self.full_type_name(*id),
            TypeRef::GenericInstance { base, args } => {
                let base = self.full_type_name(*base);
                let base = base.split('`').next().unwrap_or(&base).to_string();
                let args: Vec<String> = args.iter().map(|a| self.type_name(a)).collect();
                format!("{base}<{}>", args.join(", "))
            }
            TypeRef::Array { element, rank } => {
                let commas = ",".repeat(usize::from(rank.saturating_sub(1)));
                format!("{}[{commas}]", self.type_name(element))
            }
            TypeRef::Pointer(inner) => format!("{}*", self.type_name(inner)),
            TypeRef::ByRef(inner) => format!("{}&", self.type_name(inner)),
            TypeRef::TypeParam(i) => format!("!{i}"),
            TypeRef::MethodParam(i) => format!("!!{i}"),
        }
    }

    /// Display name of a method: `Namespace.Type::Name`.
    #[must_use]
    pub fn method_name(&self, method: &MethodRef) -> String {
        let name = self
            .method_def(method.method)
            .map_or_else(|| format!("<method {}>", method.method.0), |def| def.name.clone());
        let mut out = format!("{}::{name}", self.type_name(&method.declaring_type));
        if !method.method_args.is_empty() {
            let args: Vec<String> = method.method_args.iter().map(|a| self.type_name(a)).collect();
            let _ = write!(out, "<{}>", args.join(", "));
        }
        out
    }

    #[must_use]
    pub fn field_name(&self, field: &FieldRef) -> String {
        self.field_def(field.field)
            .map_or_else(|| format!("<field {}>", field.field.0), |def| def.name.clone())
    }

    /// Dotted path of a field chain, e.g. `position.x`.
    #[must_use]
    pub fn chain_name(&self, chain: &FieldAccessChain) -> String {
        chain
            .links()
            .into_iter()
            .map(|f| self.field_name(f))
            .collect::<Vec<_>>()
            .join(".")
    }

    // ---- method index ----

    /// Method whose compiled body starts at `address`.
    #[must_use]
    pub fn method_at(&self, address: u64) -> Option<&MethodRef> {
        self.methods_by_address.get(&address)
    }

    /// First method start strictly after `address`.
    #[must_use]
    pub fn next_method_start_after(&self, address: u64) -> Option<u64> {
        let idx = self.method_starts.partition_point(|&start| start <= address);
        self.method_starts.get(idx).copied()
    }

    // ---- resolution ----

    /// Resolve a global usage embedded in code.
    ///
    /// When no record starts exactly at `address`, the address is treated as a
    /// pointer to the record: it is dereferenced once and looked up again.
    #[must_use]
    pub fn resolve_global_usage(&self, address: u64) -> Option<MetadataUsage> {
        match self.source.global_usage(address) {
            Some(found) if found.address == address => return Some(found.usage.clone()),
            _ => {}
        }
        let target = self.read_pointer(address)?;
        trace!(address, target, "dereferencing global usage");
        let found = self.source.global_usage(target)?;
        (found.address == target).then(|| found.usage.clone())
    }

    /// Method in virtual table `slot` of `class`.
    #[must_use]
    pub fn resolve_virtual_slot(&self, class: &TypeRef, slot: u16) -> Option<MethodRef> {
        let class_def = class.definition()?;
        let method = (*self
            .source
            .virtual_dispatch_table(class_def)
            .get(usize::from(slot))?)?;
        let declaring = self.method_def(method)?.declaring_type;
        let declaring_type = self
            .ancestry(class)
            .into_iter()
            .find(|t| t.definition() == Some(declaring))
            .unwrap_or(TypeRef::Definition(declaring));
        Some(MethodRef {
            method,
            declaring_type,
            method_args: Vec::new(),
        })
    }

    /// Method implementing `slot` of `interface` on `class`.
    #[must_use]
    pub fn resolve_interface_slot(
        &self,
        class: &TypeRef,
        interface: &TypeRef,
        slot: u16,
    ) -> Option<MethodRef> {
        let class_def = class.definition()?;
        let interface_def = interface.definition()?;
        let base = match self.policy {
            InterfaceSlotPolicy::LastMatch => self
                .source
                .interface_offsets(class_def)
                .iter()
                .rev()
                .find(|e| e.interface.definition() == Some(interface_def))
                .map(|e| e.offset)?,
            InterfaceSlotPolicy::MostDerived => self.most_derived_offset(class_def, interface_def)?,
        };
        self.resolve_virtual_slot(class, base.checked_add(slot)?)
    }

    fn most_derived_offset(&self, class: TypeId, interface: TypeId) -> Option<u16> {
        let mut current = Some(class);
        for _ in 0..MAX_DEPTH {
            let ty = current?;
            let parent = self
                .type_def(ty)
                .and_then(|def| def.parent.as_ref())
                .and_then(TypeRef::definition);
            let inherited = parent.map_or(&[][..], |p| self.source.interface_offsets(p));
            let introduced = self
                .source
                .interface_offsets(ty)
                .iter()
                .find(|e| e.interface.definition() == Some(interface) && !inherited.contains(e));
            if let Some(entry) = introduced {
                return Some(entry.offset);
            }
            current = parent;
        }
        None
    }

    /// Closed reference to a generic method instance.
    #[must_use]
    pub fn resolve_generic_method_ref(
        &self,
        base: MethodId,
        type_args: &[TypeRef],
        method_args: &[TypeRef],
    ) -> Option<MethodRef> {
        let key: GenericKey = (base, type_args.to_vec(), method_args.to_vec());
        if let Some(found) = self.generic_cache.read().get(&key) {
            return Some(found.clone());
        }
        let declaring = self.method_def(base)?.declaring_type;
        let declaring_type = if type_args.is_empty() {
            TypeRef::Definition(declaring)
        } else {
            TypeRef::GenericInstance {
                base: declaring,
                args: type_args.to_vec(),
            }
        };
        let method = MethodRef {
            method: base,
            declaring_type,
            method_args: method_args.to_vec(),
        };
        self.generic_cache
            .write()
            .entry(key)
            .or_insert_with(|| method.clone());
        Some(method)
    }

    /// Resolve a `Namespace.Type::MethodName(...)` runtime lookup string.
    ///
    /// Overloads are not disambiguated: the first exact name match wins, then
    /// the first prefix match.
    #[must_use]
    pub fn resolve_runtime_call_identifier(&self, identifier: &str) -> Option<MethodRef> {
        let (type_name, method_part) = identifier.split_once("::")?;
        let method_name = method_part.split('(').next().unwrap_or(method_part).trim();
        if method_name.is_empty() {
            return None;
        }
        let ty = self.type_by_full_name(type_name.trim())?;
        let def = self.type_def(ty)?;
        let name_of = |id: &MethodId| self.method_def(*id).map(|m| m.name.as_str());
        let method = def
            .methods
            .iter()
            .find(|id| name_of(id) == Some(method_name))
            .or_else(|| {
                def.methods
                    .iter()
                    .find(|id| name_of(id).is_some_and(|n| n.starts_with(method_name)))
            })?;
        Some(MethodRef::new(*method, ty))
    }

    /// Signature of `method` with generic parameters substituted.
    #[must_use]
    pub fn method_signature(&self, method: &MethodRef) -> Option<Arc<MethodSignature>> {
        if let Some(sig) = self.signature_cache.read().get(method) {
            return Some(Arc::clone(sig));
        }
        let def = self.method_def(method.method)?;
        let type_args = method.declaring_type.generic_args();
        let method_args = method.method_args.as_slice();
        let sig = Arc::new(MethodSignature {
            this_type: (!def.is_static).then(|| method.declaring_type.clone()),
            params: def
                .params
                .iter()
                .map(|p| p.param_type.substitute(type_args, method_args))
                .collect(),
            return_type: def
                .return_type
                .as_ref()
                .map(|t| t.substitute(type_args, method_args)),
        });
        Some(Arc::clone(
            self.signature_cache
                .write()
                .entry(method.clone())
                .or_insert(sig),
        ))
    }

    /// Type of a field, substituted with its declaring type's arguments.
    #[must_use]
    pub fn field_type(&self, field: &FieldRef) -> Option<TypeRef> {
        let def = self.field_def(field.field)?;
        Some(def.field_type.substitute(field.declaring_type.generic_args(), &[]))
    }

    // ---- hierarchy ----

    /// Parent of a type, with generic arguments substituted.
    #[must_use]
    pub fn parent_of(&self, ty: &TypeRef) -> Option<TypeRef> {
        match ty {
            TypeRef::Array { .. } => self.type_by_full_name("System.Array").map(TypeRef::Definition),
            _ => {
                let def = self.type_def(ty.definition()?)?;
                Some(def.parent.as_ref()?.substitute(ty.generic_args(), &[]))
            }
        }
    }

    /// `ty` followed by its ancestors.
    fn ancestry(&self, ty: &TypeRef) -> Vec<TypeRef> {
        let mut chain = vec![ty.clone()];
        while chain.len() < MAX_DEPTH {
            let Some(parent) = chain.last().and_then(|t| self.parent_of(t)) else {
                break;
            };
            chain.push(parent);
        }
        chain
    }

    /// Check if `ty` strictly derives from `ancestor`.
    #[must_use]
    pub fn is_subclass_of(&self, ty: &TypeRef, ancestor: &TypeRef) -> bool {
        let target = ancestor.definition();
        self.ancestry(ty)
            .iter()
            .skip(1)
            .any(|t| t == ancestor || (target.is_some() && t.definition() == target))
    }

    // ---- type properties ----

    fn system_name(&self, ty: &TypeRef) -> Option<&str> {
        let def = self.type_def(ty.definition()?)?;
        (def.namespace == "System").then_some(def.name.as_str())
    }

    /// Check if a type is passed in floating point registers.
    #[must_use]
    pub fn is_float_type(&self, ty: &TypeRef) -> bool {
        matches!(self.system_name(ty), Some("Single" | "Double"))
    }

    #[must_use]
    pub fn is_string_type(&self, ty: &TypeRef) -> bool {
        matches!(self.system_name(ty), Some("String"))
    }

    /// Size of a built-in primitive, if `ty` is one.
    #[must_use]
    pub fn primitive_size(&self, ty: &TypeRef) -> Option<i64> {
        let size = match self.system_name(ty)? {
            "Boolean" | "Byte" | "SByte" => 1,
            "Char" | "Int16" | "UInt16" => 2,
            "Int32" | "UInt32" | "Single" => 4,
            "Int64" | "UInt64" | "Double" => 8,
            "IntPtr" | "UIntPtr" => i64::from(self.pointer_size()),
            _ => return None,
        };
        Some(size)
    }

    #[must_use]
    pub fn is_value_type(&self, ty: &TypeRef) -> bool {
        ty.definition()
            .and_then(|id| self.type_def(id))
            .is_some_and(TypeDef::is_value_type)
    }

    /// Check if a type is a user struct whose fields get flattened into
    /// enclosing offsets.
    fn is_struct(&self, ty: &TypeRef) -> bool {
        let Some(def) = ty.definition().and_then(|id| self.type_def(id)) else {
            return false;
        };
        def.kind == TypeKind::ValueType && self.primitive_size(ty).is_none()
    }

    /// In-memory size of a value of `ty` (references are pointer sized).
    #[must_use]
    pub fn value_size(&self, ty: &TypeRef) -> i64 {
        self.value_size_at(ty, 0)
    }

    fn value_size_at(&self, ty: &TypeRef, depth: usize) -> i64 {
        let ptr = i64::from(self.pointer_size());
        if let Some(size) = self.primitive_size(ty) {
            return size;
        }
        let Some(def) = ty.definition().and_then(|id| self.type_def(id)) else {
            return ptr;
        };
        if !def.is_value_type() || depth >= MAX_DEPTH {
            return ptr;
        }
        let header = self.layout.object_header_size;
        let end = self
            .instance_fields(ty)
            .iter()
            .filter_map(|f| {
                let offset = self.field_def(f.field)?.offset;
                let field_ty = self.field_type(f)?;
                Some(offset - header + self.value_size_at(&field_ty, depth + 1))
            })
            .max();
        // Enums without a recorded value field default to Int32.
        end.unwrap_or(if def.kind == TypeKind::Enum { 4 } else { 1 })
    }

    // ---- fields ----

    /// Instance fields of a type, inherited ones first.
    #[must_use]
    pub fn instance_fields(&self, ty: &TypeRef) -> Vec<FieldRef> {
        let mut chain = self.ancestry(ty);
        chain.reverse();
        let mut fields = Vec::new();
        for t in &chain {
            let Some(def) = t.definition().and_then(|id| self.type_def(id)) else {
                continue;
            };
            for &field in &def.fields {
                if self.field_def(field).is_some_and(|f| !f.is_static && !f.is_literal) {
                    fields.push(FieldRef {
                        field,
                        declaring_type: t.clone(),
                    });
                }
            }
        }
        fields
    }

    /// Resolve an instance field access at `offset` on an object of type `on`.
    #[must_use]
    pub fn resolve_field_chain(&self, on: &TypeRef, offset: i64) -> Option<FieldAccessChain> {
        self.field_chain_at(on, offset, 0)
    }

    fn field_chain_at(&self, on: &TypeRef, offset: i64, depth: usize) -> Option<FieldAccessChain> {
        if depth >= MAX_DEPTH {
            return None;
        }
        let fields = self.instance_fields(on);
        // Greatest field offset not past the target; first declared wins ties.
        let mut best: Option<(i64, &FieldRef)> = None;
        for field in &fields {
            let Some(def) = self.field_def(field.field) else {
                continue;
            };
            if def.offset <= offset && best.is_none_or(|(o, _)| def.offset > o) {
                best = Some((def.offset, field));
            }
        }
        let (field_offset, field) = best?;
        let field_ty = self.field_type(field)?;

        if self.is_struct(&field_ty) {
            let inner = offset - field_offset + self.layout.object_header_size;
            if let Some(next) = self.field_chain_at(&field_ty, inner, depth + 1) {
                return Some(FieldAccessChain::Nested {
                    implied: field.clone(),
                    next: Box::new(next),
                });
            }
        }
        (field_offset == offset).then(|| FieldAccessChain::Final(field.clone()))
    }

    /// Static field of `on` stored at `offset` in its static field block.
    #[must_use]
    pub fn resolve_static_field(&self, on: &TypeRef, offset: i64) -> Option<FieldRef> {
        let def = self.type_def(on.definition()?)?;
        def.fields
            .iter()
            .find(|&&id| {
                self.field_def(id)
                    .is_some_and(|f| f.is_static && !f.is_literal && f.offset == offset)
            })
            .map(|&field| FieldRef {
                field,
                declaring_type: on.clone(),
            })
    }

    // ---- raw reads ----

    /// Read a pointer-sized little-endian value.
    #[must_use]
    pub fn read_pointer(&self, address: u64) -> Option<u64> {
        if self.pointer_size() == 4 {
            self.read_u32(address).map(u64::from)
        } else {
            self.read_u64(address)
        }
    }

    #[must_use]
    pub fn read_u32(&self, address: u64) -> Option<u32> {
        let bytes = self.source.read_bytes(address, 4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    #[must_use]
    pub fn read_u64(&self, address: u64) -> Option<u64> {
        let bytes = self.source.read_bytes(address, 8)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    #[must_use]
    pub fn read_f32(&self, address: u64) -> Option<f32> {
        self.read_u32(address).map(f32::from_bits)
    }

    #[must_use]
    pub fn read_f64(&self, address: u64) -> Option<f64> {
        self.read_u64(address).map(f64::from_bits)
    }

    /// Read a NUL-terminated printable string.
    #[must_use]
    pub fn read_c_string(&self, address: u64) -> Option<String> {
        let bytes = self.source.read_bytes(address, MAX_STRING_LEN)?;
        let end = bytes.iter().position(|&b| b == 0)?;
        let text = std::str::from_utf8(&bytes[..end]).ok()?;
        let printable = !text.is_empty()
            && text
                .chars()
                .all(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'));
        printable.then(|| text.to_string())
    }
}

impl std::fmt::Debug for MetadataBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataBridge")
            .field("layout", &self.layout)
            .field("policy", &self.policy)
            .field("types", &self.types_by_name.len())
            .field("methods", &self.method_starts.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        GlobalUsage, InMemoryMetadata, InterfaceOffset, ParamDef, Segment,
    };

    struct Fixture {
        meta: InMemoryMetadata,
        int32: TypeId,
        base: TypeId,
        derived: TypeId,
        iface: TypeId,
        vector: TypeId,
        holder: TypeId,
        list: TypeId,
    }

    fn method(name: &str, ty: TypeId) -> MethodDef {
        MethodDef {
            name: name.into(),
            declaring_type: ty,
            ..MethodDef::default()
        }
    }

    fn field(name: &str, ty: TypeId, field_type: TypeRef, offset: i64) -> FieldDef {
        FieldDef {
            name: name.into(),
            declaring_type: ty,
            field_type,
            offset,
            is_static: false,
            is_literal: false,
        }
    }

    fn fixture() -> Fixture {
        let mut meta = InMemoryMetadata::new(8);
        let object = meta.add_type(TypeDef::class("System", "Object"));
        let value_type = meta.add_type(
            TypeDef::class("System", "ValueType").with_parent(TypeRef::Definition(object)),
        );
        let int32 = meta.add_type(
            TypeDef::of_kind("System", "Int32", TypeKind::ValueType)
                .with_parent(TypeRef::Definition(value_type)),
        );
        let single = meta.add_type(
            TypeDef::of_kind("System", "Single", TypeKind::ValueType)
                .with_parent(TypeRef::Definition(value_type)),
        );
        let iface = meta.add_type(TypeDef::of_kind("Game", "IRunner", TypeKind::Interface));
        let base = meta.add_type(TypeDef::class("Game", "Base").with_parent(TypeRef::Definition(object)));
        let derived =
            meta.add_type(TypeDef::class("Game", "Derived").with_parent(TypeRef::Definition(base)));
        let vector = meta.add_type(
            TypeDef::of_kind("Game", "Vector2", TypeKind::ValueType)
                .with_parent(TypeRef::Definition(value_type)),
        );
        let holder = meta.add_type(TypeDef::class("Game", "Holder").with_parent(TypeRef::Definition(object)));
        let mut list_def = TypeDef::class("System.Collections.Generic", "List`1")
            .with_parent(TypeRef::Definition(object));
        list_def.generic_params = vec!["T".into()];
        let list = meta.add_type(list_def);

        let run_base = meta.add_method(MethodDef { is_virtual: true, slot: Some(4), ..method("Run", base) }).unwrap();
        let run_derived =
            meta.add_method(MethodDef { is_virtual: true, slot: Some(4), ..method("Run", derived) }).unwrap();
        let stop_base = meta.add_method(MethodDef { is_virtual: true, slot: Some(5), ..method("Stop", base) }).unwrap();
        meta.add_method(MethodDef {
            is_static: true,
            params: vec![ParamDef::new("value", TypeRef::Definition(single))],
            return_type: Some(TypeRef::Definition(int32)),
            ..method("Round", base)
        })
        .unwrap();
        meta.add_method(MethodDef {
            params: vec![ParamDef::new("item", TypeRef::TypeParam(0))],
            ..method("Add", list)
        })
        .unwrap();

        meta.set_vtable(base, vec![None, None, None, None, Some(run_base), Some(stop_base)]);
        meta.set_vtable(derived, vec![None, None, None, None, Some(run_derived), Some(stop_base)]);
        meta.add_interface_offset(base, InterfaceOffset { interface: TypeRef::Definition(iface), offset: 4 });
        meta.add_interface_offset(derived, InterfaceOffset { interface: TypeRef::Definition(iface), offset: 4 });

        meta.add_field(field("x", vector, TypeRef::Definition(single), 0x10)).unwrap();
        meta.add_field(field("y", vector, TypeRef::Definition(single), 0x14)).unwrap();
        meta.add_field(field("count", holder, TypeRef::Definition(int32), 0x10)).unwrap();
        meta.add_field(field("position", holder, TypeRef::Definition(vector), 0x18)).unwrap();
        meta.add_field(FieldDef {
            is_static: true,
            ..field("instance", holder, TypeRef::Definition(holder), 0x8)
        })
        .unwrap();

        Fixture { meta, int32, base, derived, iface, vector, holder, list }
    }

    fn bridge(meta: InMemoryMetadata) -> MetadataBridge {
        MetadataBridge::new(Arc::new(meta), KeyFunctions::new(), BridgeConfig::new())
    }

    #[test]
    fn test_names() {
        let fx = fixture();
        let (derived, list, int32) = (fx.derived, fx.list, fx.int32);
        let b = bridge(fx.meta);
        assert_eq!(b.full_type_name(derived), "Game.Derived");
        assert_eq!(b.type_by_full_name("Game.Derived"), Some(derived));
        let inst = TypeRef::GenericInstance { base: list, args: vec![TypeRef::Definition(int32)] };
        assert_eq!(b.type_name(&inst), "System.Collections.Generic.List<System.Int32>");
        assert_eq!(b.type_name(&TypeRef::array_of(TypeRef::Definition(int32))), "System.Int32[]");
    }

    #[test]
    fn test_virtual_and_interface_slots_agree() {
        let fx = fixture();
        let (derived, iface) = (fx.derived, fx.iface);
        let b = bridge(fx.meta);
        let class = TypeRef::Definition(derived);
        let via_vtable = b.resolve_virtual_slot(&class, 4).unwrap();
        let via_iface = b.resolve_interface_slot(&class, &TypeRef::Definition(iface), 0).unwrap();
        assert_eq!(via_vtable, via_iface);
        assert_eq!(b.method_name(&via_vtable), "Game.Derived::Run");

        // Inherited slot resolves to the base implementation.
        let stop = b.resolve_interface_slot(&class, &TypeRef::Definition(iface), 1).unwrap();
        assert_eq!(b.method_name(&stop), "Game.Base::Stop");
        assert!(b.is_subclass_of(&class, &stop.declaring_type));
    }

    #[test]
    fn test_interface_policy() {
        let mut fx = fixture();
        let (derived, iface) = (fx.derived, fx.iface);
        let defs = fx.meta.method_definitions();
        let find = |name: &str, ty: TypeId| {
            MethodId(defs.iter().position(|m| m.name == name && m.declaring_type == ty).unwrap() as u32)
        };
        let (run_base, run_derived, stop_base) =
            (find("Run", fx.base), find("Run", derived), find("Stop", fx.base));

        // Derived re-implements the interface at slot 6; its own entry is listed first.
        fx.meta.set_vtable(
            derived,
            vec![None, None, None, None, Some(run_base), Some(stop_base), Some(run_derived)],
        );
        fx.meta.set_interface_offsets(
            derived,
            vec![
                InterfaceOffset { interface: TypeRef::Definition(iface), offset: 6 },
                InterfaceOffset { interface: TypeRef::Definition(iface), offset: 4 },
            ],
        );
        let class = TypeRef::Definition(derived);
        let iface_ref = TypeRef::Definition(iface);

        let last = bridge(fx.meta.clone());
        assert_eq!(last.interface_policy(), InterfaceSlotPolicy::LastMatch);
        assert_eq!(last.resolve_interface_slot(&class, &iface_ref, 0).map(|m| m.method), Some(run_base));

        let most_derived = MetadataBridge::new(
            Arc::new(fx.meta),
            KeyFunctions::new(),
            BridgeConfig::new().with_interface_policy(InterfaceSlotPolicy::MostDerived),
        );
        assert_eq!(
            most_derived.resolve_interface_slot(&class, &iface_ref, 0).map(|m| m.method),
            Some(run_derived)
        );
    }

    #[test]
    fn test_field_chain_nested_struct() {
        let fx = fixture();
        let holder = TypeRef::Definition(fx.holder);
        let b = bridge(fx.meta);

        let count = b.resolve_field_chain(&holder, 0x10).unwrap();
        assert_eq!(b.chain_name(&count), "count");

        // position at 0x18, y at boxed offset 0x14 -> 0x18 + 0x4
        let y = b.resolve_field_chain(&holder, 0x1C).unwrap();
        assert_eq!(b.chain_name(&y), "position.y");
        assert!(matches!(y, FieldAccessChain::Nested { .. }));

        let x = b.resolve_field_chain(&holder, 0x18).unwrap();
        assert_eq!(b.chain_name(&x), "position.x");

        assert!(b.resolve_field_chain(&holder, 0x12).is_none());
        assert!(b.resolve_field_chain(&holder, 0x8).is_none());
    }

    #[test]
    fn test_static_field_and_sizes() {
        let fx = fixture();
        let (holder, vector, int32) = (fx.holder, fx.vector, fx.int32);
        let b = bridge(fx.meta);
        let instance = b.resolve_static_field(&TypeRef::Definition(holder), 0x8).unwrap();
        assert_eq!(b.field_name(&instance), "instance");
        assert!(b.resolve_static_field(&TypeRef::Definition(holder), 0x10).is_none());
        assert_eq!(b.value_size(&TypeRef::Definition(vector)), 8);
        assert_eq!(b.value_size(&TypeRef::Definition(int32)), 4);
        assert_eq!(b.value_size(&TypeRef::Definition(holder)), 8);
    }

    #[test]
    fn test_generic_signature() {
        let fx = fixture();
        let (list, int32) = (fx.list, fx.int32);
        let b = bridge(fx.meta);
        let add = b.resolve_runtime_call_identifier("System.Collections.Generic.List`1::Add").unwrap();
        let closed = b
            .resolve_generic_method_ref(add.method, &[TypeRef::Definition(int32)], &[])
            .unwrap();
        assert_eq!(closed.declaring_type.definition(), Some(list));
        let sig = b.method_signature(&closed).unwrap();
        assert_eq!(sig.params, vec![TypeRef::Definition(int32)]);
        assert_eq!(sig.arguments().len(), 2);
        // memoized
        let again = b
            .resolve_generic_method_ref(add.method, &[TypeRef::Definition(int32)], &[])
            .unwrap();
        assert_eq!(closed, again);
    }

    #[test]
    fn test_runtime_call_identifier() {
        let fx = fixture();
        let b = bridge(fx.meta);
        let round = b.resolve_runtime_call_identifier("Game.Base::Round(System.Single)").unwrap();
        assert_eq!(b.method_name(&round), "Game.Base::Round");
        let prefix = b.resolve_runtime_call_identifier("Game.Base::Ro").unwrap();
        assert_eq!(prefix, round);
        assert!(b.resolve_runtime_call_identifier("Game.Missing::Round").is_none());
        assert!(b.resolve_runtime_call_identifier("no separator").is_none());
    }

    #[test]
    fn test_global_usage_dereference() {
        let mut fx = fixture();
        let base = fx.base;
        fx.meta
            .add_usage(GlobalUsage::new(0x9000, MetadataUsage::TypeInfo(TypeRef::Definition(base))));
        let mut data = vec![0u8; 0x20];
        data[0x10..0x18].copy_from_slice(&0x9000u64.to_le_bytes());
        data[0x18..0x1D].copy_from_slice(b"abc\0\0");
        fx.meta.add_segment(Segment::new(0x8000, 0, data)).unwrap();
        let b = bridge(fx.meta);

        assert_eq!(
            b.resolve_global_usage(0x9000),
            Some(MetadataUsage::TypeInfo(TypeRef::Definition(base)))
        );
        // 0x8010 holds a pointer to the record
        assert_eq!(
            b.resolve_global_usage(0x8010),
            Some(MetadataUsage::TypeInfo(TypeRef::Definition(base)))
        );
        assert_eq!(b.resolve_global_usage(0x8000), None);
        assert_eq!(b.read_c_string(0x8018).as_deref(), Some("abc"));
        assert_eq!(b.read_c_string(0x8000), None);
    }

    #[test]
    fn test_method_index() {
        let mut meta = InMemoryMetadata::new(8);
        let ty = meta.add_type(TypeDef::class("Game", "A"));
        meta.add_method(MethodDef { address: Some(0x100), ..method("F", ty) }).unwrap();
        meta.add_method(MethodDef { address: Some(0x180), ..method("G", ty) }).unwrap();
        let b = bridge(meta);
        assert_eq!(b.next_method_start_after(0x100), Some(0x180));
        assert_eq!(b.next_method_start_after(0x0), Some(0x100));
        assert_eq!(b.next_method_start_after(0x180), None);
        assert_eq!(b.method_at(0x180).map(|m| b.method_name(m)).as_deref(), Some("Game.A::G"));
    }
}
