//! Global usages: addresses embedded in code that refer to metadata items.

use crate::{FieldRef, MethodRef, TypeRef};

/// Metadata item referred to by a global usage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataUsage {
    /// Runtime class pointer of a type.
    TypeInfo(TypeRef),
    /// Type handle.
    Type(TypeRef),
    /// Method definition.
    Method(MethodRef),
    /// Generic method instance.
    MethodRef(MethodRef),
    Field(FieldRef),
    StringLiteral(String),
}

impl MetadataUsage {
    /// Short tag used in diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TypeInfo(_) => "type-info",
            Self::Type(_) => "type",
            Self::Method(_) => "method",
            Self::MethodRef(_) => "method-ref",
            Self::Field(_) => "field",
            Self::StringLiteral(_) => "string",
        }
    }

    /// Type carried by type-info and type usages.
    #[must_use]
    pub const fn as_type(&self) -> Option<&TypeRef> {
        match self {
            Self::TypeInfo(ty) | Self::Type(ty) => Some(ty),
            _ => None,
        }
    }

    /// Method carried by method and method-ref usages.
    #[must_use]
    pub const fn as_method(&self) -> Option<&MethodRef> {
        match self {
            Self::Method(m) | Self::MethodRef(m) => Some(m),
            _ => None,
        }
    }
}

/// A usage recorded at a virtual address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalUsage {
    pub address: u64,
    pub usage: MetadataUsage,
}

impl GlobalUsage {
    #[must_use]
    pub const fn new(address: u64, usage: MetadataUsage) -> Self {
        Self { address, usage }
    }
}
