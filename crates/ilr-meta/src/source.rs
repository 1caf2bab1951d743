//! The loader-facing metadata interface and an in-memory implementation.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::{
    FieldDef, FieldId, GlobalUsage, InterfaceOffset, MetaError, MethodDef, MethodId, MethodRef,
    Result, TypeDef, TypeId,
};

/// Tables and mapped bytes produced by a binary/metadata loader.
///
/// Implementations are shared by every method lift of a batch and must be
/// immutable once constructed.
pub trait MetadataSource: Send + Sync {
    /// Pointer size of the native binary (4 or 8).
    fn pointer_size(&self) -> u8;

    /// Start address and code bytes of a compiled method.
    fn method_byte_range(&self, method: MethodId) -> Option<(u64, &[u8])>;

    fn map_virtual_address_to_raw(&self, address: u64) -> Option<u64>;

    fn map_raw_address_to_virtual(&self, offset: u64) -> Option<u64>;

    /// Up to `len` mapped bytes starting at `address`.
    fn read_bytes(&self, address: u64, len: usize) -> Option<&[u8]>;

    /// Usage record covering `address`. The record's own address may differ
    /// from the queried one.
    fn global_usage(&self, address: u64) -> Option<&GlobalUsage>;

    fn type_definitions(&self) -> &[TypeDef];

    fn method_definitions(&self) -> &[MethodDef];

    fn field_definitions(&self) -> &[FieldDef];

    /// Virtual table of a type, indexed by slot.
    fn virtual_dispatch_table(&self, ty: TypeId) -> &[Option<MethodId>];

    /// Flattened interface offset table of a type (inherited entries included).
    fn interface_offsets(&self, ty: TypeId) -> &[InterfaceOffset];

    /// Compiled generic method instances and their code addresses.
    fn generic_method_instances(&self) -> &[(u64, MethodRef)] {
        &[]
    }
}

/// A mapped region of the native binary.
#[derive(Clone, Debug)]
pub struct Segment {
    pub virtual_address: u64,
    pub raw_offset: u64,
    pub data: Vec<u8>,
}

impl Segment {
    #[must_use]
    pub const fn new(virtual_address: u64, raw_offset: u64, data: Vec<u8>) -> Self {
        Self {
            virtual_address,
            raw_offset,
            data,
        }
    }

    #[must_use]
    pub const fn end(&self) -> u64 {
        self.virtual_address + self.data.len() as u64
    }

    #[must_use]
    pub const fn contains(&self, address: u64) -> bool {
        address >= self.virtual_address && address < self.end()
    }

    #[must_use]
    pub const fn contains_raw(&self, offset: u64) -> bool {
        offset >= self.raw_offset && offset < self.raw_offset + self.data.len() as u64
    }
}

/// Metadata held entirely in memory.
#[derive(Clone, Debug)]
pub struct InMemoryMetadata {
    pointer_size: u8,
    types: Vec<TypeDef>,
    methods: Vec<MethodDef>,
    fields: Vec<FieldDef>,
    vtables: FxHashMap<TypeId, Vec<Option<MethodId>>>,
    interface_offsets: FxHashMap<TypeId, Vec<InterfaceOffset>>,
    usages: BTreeMap<u64, GlobalUsage>,
    segments: Vec<Segment>,
    generic_instances: Vec<(u64, MethodRef)>,
}

impl InMemoryMetadata {
    #[must_use]
    pub fn new(pointer_size: u8) -> Self {
        Self {
            pointer_size,
            types: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            vtables: FxHashMap::default(),
            interface_offsets: FxHashMap::default(),
            usages: BTreeMap::new(),
            segments: Vec::new(),
            generic_instances: Vec::new(),
        }
    }

    /// Add a type definition.
    pub fn add_type(&mut self, def: TypeDef) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(def);
        id
    }

    /// Add a method and link it to its declaring type.
    pub fn add_method(&mut self, def: MethodDef) -> Result<MethodId> {
        let id = MethodId(self.methods.len() as u32);
        let owner = self
            .types
            .get_mut(def.declaring_type.index())
            .ok_or(MetaError::UnknownType(def.declaring_type))?;
        owner.methods.push(id);
        self.methods.push(def);
        Ok(id)
    }

    /// Add a field and link it to its declaring type.
    pub fn add_field(&mut self, def: FieldDef) -> Result<FieldId> {
        let id = FieldId(self.fields.len() as u32);
        let owner = self
            .types
            .get_mut(def.declaring_type.index())
            .ok_or(MetaError::UnknownType(def.declaring_type))?;
        owner.fields.push(id);
        self.fields.push(def);
        Ok(id)
    }

    pub fn set_vtable(&mut self, ty: TypeId, slots: Vec<Option<MethodId>>) {
        self.vtables.insert(ty, slots);
    }

    pub fn add_interface_offset(&mut self, ty: TypeId, entry: InterfaceOffset) {
        self.interface_offsets.entry(ty).or_default().push(entry);
    }

    pub fn set_interface_offsets(&mut self, ty: TypeId, entries: Vec<InterfaceOffset>) {
        self.interface_offsets.insert(ty, entries);
    }

    pub fn add_usage(&mut self, usage: GlobalUsage) {
        self.usages.insert(usage.address, usage);
    }

    /// Map a segment. Overlapping segments are rejected.
    pub fn add_segment(&mut self, segment: Segment) -> Result<()> {
        if self
            .segments
            .iter()
            .any(|s| segment.virtual_address < s.end() && s.virtual_address < segment.end())
        {
            return Err(MetaError::OverlappingSegment(segment.virtual_address));
        }
        self.segments.push(segment);
        self.segments.sort_by_key(|s| s.virtual_address);
        Ok(())
    }

    pub fn add_generic_instance(&mut self, address: u64, method: MethodRef) {
        self.generic_instances.push((address, method));
    }

    /// Mutable access to a type, e.g. to set its parent after creation.
    pub fn type_mut(&mut self, ty: TypeId) -> Option<&mut TypeDef> {
        self.types.get_mut(ty.index())
    }

    fn segment_at(&self, address: u64) -> Option<&Segment> {
        let idx = self.segments.partition_point(|s| s.virtual_address <= address);
        let segment = self.segments.get(idx.checked_sub(1)?)?;
        segment.contains(address).then_some(segment)
    }

    /// End of the code belonging to the method starting at `start`.
    fn body_end(&self, start: u64, segment_end: u64) -> u64 {
        self.methods
            .iter()
            .filter_map(|m| m.address)
            .chain(self.generic_instances.iter().map(|(addr, _)| *addr))
            .filter(|&addr| addr > start)
            .min()
            .map_or(segment_end, |next| next.min(segment_end))
    }
}

impl MetadataSource for InMemoryMetadata {
    fn pointer_size(&self) -> u8 {
        self.pointer_size
    }

    fn method_byte_range(&self, method: MethodId) -> Option<(u64, &[u8])> {
        let start = self.methods.get(method.index())?.address?;
        let segment = self.segment_at(start)?;
        let end = self.body_end(start, segment.end());
        let from = usize::try_from(start - segment.virtual_address).ok()?;
        let to = usize::try_from(end - segment.virtual_address).ok()?;
        Some((start, segment.data.get(from..to)?))
    }

    fn map_virtual_address_to_raw(&self, address: u64) -> Option<u64> {
        let segment = self.segment_at(address)?;
        Some(segment.raw_offset + (address - segment.virtual_address))
    }

    fn map_raw_address_to_virtual(&self, offset: u64) -> Option<u64> {
        let segment = self.segments.iter().find(|s| s.contains_raw(offset))?;
        Some(segment.virtual_address + (offset - segment.raw_offset))
    }

    fn read_bytes(&self, address: u64, len: usize) -> Option<&[u8]> {
        let segment = self.segment_at(address)?;
        let from = usize::try_from(address - segment.virtual_address).ok()?;
        let to = from.saturating_add(len).min(segment.data.len());
        segment.data.get(from..to)
    }

    fn global_usage(&self, address: u64) -> Option<&GlobalUsage> {
        let (_, usage) = self.usages.range(..=address).next_back()?;
        let end = usage.address.checked_add(u64::from(self.pointer_size))?;
        (address < end).then_some(usage)
    }

    fn type_definitions(&self) -> &[TypeDef] {
        &self.types
    }

    fn method_definitions(&self) -> &[MethodDef] {
        &self.methods
    }

    fn field_definitions(&self) -> &[FieldDef] {
        &self.fields
    }

    fn virtual_dispatch_table(&self, ty: TypeId) -> &[Option<MethodId>] {
        self.vtables.get(&ty).map_or(&[], Vec::as_slice)
    }

    fn interface_offsets(&self, ty: TypeId) -> &[InterfaceOffset] {
        self.interface_offsets.get(&ty).map_or(&[], Vec::as_slice)
    }

    fn generic_method_instances(&self) -> &[(u64, MethodRef)] {
        &self.generic_instances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MetadataUsage, TypeRef};

    fn fixture() -> InMemoryMetadata {
        let mut meta = InMemoryMetadata::new(8);
        let ty = meta.add_type(TypeDef::class("Game", "Player"));
        meta.add_method(MethodDef {
            name: "Update".into(),
            declaring_type: ty,
            address: Some(0x1000),
            ..MethodDef::default()
        })
        .unwrap();
        meta.add_method(MethodDef {
            name: "Jump".into(),
            declaring_type: ty,
            address: Some(0x1010),
            ..MethodDef::default()
        })
        .unwrap();
        meta.add_segment(Segment::new(0x1000, 0x400, vec![0x90; 0x20])).unwrap();
        meta.add_usage(GlobalUsage::new(
            0x5000,
            MetadataUsage::TypeInfo(TypeRef::Definition(ty)),
        ));
        meta
    }

    #[test]
    fn test_method_byte_range() {
        let meta = fixture();
        let (start, bytes) = meta.method_byte_range(MethodId(0)).unwrap();
        assert_eq!(start, 0x1000);
        assert_eq!(bytes.len(), 0x10);
        let (start, bytes) = meta.method_byte_range(MethodId(1)).unwrap();
        assert_eq!(start, 0x1010);
        assert_eq!(bytes.len(), 0x10);
    }

    #[test]
    fn test_address_mapping() {
        let meta = fixture();
        assert_eq!(meta.map_virtual_address_to_raw(0x1004), Some(0x404));
        assert_eq!(meta.map_raw_address_to_virtual(0x404), Some(0x1004));
        assert_eq!(meta.map_virtual_address_to_raw(0x2000), None);
        assert_eq!(meta.read_bytes(0x101E, 8).map(<[u8]>::len), Some(2));
    }

    #[test]
    fn test_usage_lookup_covers_slot() {
        let meta = fixture();
        assert_eq!(meta.global_usage(0x5000).unwrap().address, 0x5000);
        assert_eq!(meta.global_usage(0x5004).unwrap().address, 0x5000);
        assert!(meta.global_usage(0x5008).is_none());
        assert!(meta.global_usage(0x4FFF).is_none());
    }

    #[test]
    fn test_usage_at_top_of_address_space() {
        let mut meta = fixture();
        meta.add_usage(GlobalUsage::new(u64::MAX - 3, MetadataUsage::StringLiteral("edge".into())));
        assert!(meta.global_usage(u64::MAX).is_none());
        assert!(meta.global_usage(u64::MAX - 3).is_none());
        assert_eq!(meta.global_usage(0x5004).unwrap().address, 0x5000);
    }

    #[test]
    fn test_overlapping_segment_rejected() {
        let mut meta = fixture();
        let err = meta.add_segment(Segment::new(0x1010, 0, vec![0; 4])).unwrap_err();
        assert!(matches!(err, MetaError::OverlappingSegment(0x1010)));
    }
}
