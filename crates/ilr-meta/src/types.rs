//! Type, method and field definitions.

/// Index into the type definition table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Index into the method definition table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

/// Index into the field definition table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

impl TypeId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl MethodId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl FieldId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A reference to a (possibly constructed) type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeRef {
    Definition(TypeId),
    GenericInstance { base: TypeId, args: Vec<TypeRef> },
    /// Array with the given rank (1 for single-dimensional arrays).
    Array { element: Box<TypeRef>, rank: u8 },
    Pointer(Box<TypeRef>),
    ByRef(Box<TypeRef>),
    /// Generic parameter of the declaring type.
    TypeParam(u16),
    /// Generic parameter of the method.
    MethodParam(u16),
}

impl TypeRef {
    /// Single-dimensional array of `element`.
    #[must_use]
    pub fn array_of(element: Self) -> Self {
        Self::Array {
            element: Box::new(element),
            rank: 1,
        }
    }

    /// Definition this reference is built on (generic base for instances).
    #[must_use]
    pub const fn definition(&self) -> Option<TypeId> {
        match self {
            Self::Definition(id) | Self::GenericInstance { base: id, .. } => Some(*id),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_array(&self) -> bool {
        matches!(self, Self::Array { .. })
    }

    /// Element type of an array reference.
    #[must_use]
    pub fn element_type(&self) -> Option<&Self> {
        match self {
            Self::Array { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Generic arguments of an instance, empty otherwise.
    #[must_use]
    pub fn generic_args(&self) -> &[Self] {
        match self {
            Self::GenericInstance { args, .. } => args,
            _ => &[],
        }
    }

    /// Check if the reference still mentions an unbound generic parameter.
    #[must_use]
    pub fn is_open(&self) -> bool {
        match self {
            Self::TypeParam(_) | Self::MethodParam(_) => true,
            Self::Definition(_) => false,
            Self::GenericInstance { args, .. } => args.iter().any(Self::is_open),
            Self::Array { element, .. } => element.is_open(),
            Self::Pointer(inner) | Self::ByRef(inner) => inner.is_open(),
        }
    }

    /// Replace generic parameters positionally.
    ///
    /// Parameters without a corresponding argument are left in place.
    #[must_use]
    pub fn substitute(&self, type_args: &[Self], method_args: &[Self]) -> Self {
        match self {
            Self::TypeParam(i) => type_args.get(*i as usize).cloned().unwrap_or_else(|| self.clone()),
            Self::MethodParam(i) => method_args.get(*i as usize).cloned().unwrap_or_else(|| self.clone()),
            Self::Definition(_) => self.clone(),
            Self::GenericInstance { base, args } => Self::GenericInstance {
                base: *base,
                args: args.iter().map(|a| a.substitute(type_args, method_args)).collect(),
            },
            Self::Array { element, rank } => Self::Array {
                element: Box::new(element.substitute(type_args, method_args)),
                rank: *rank,
            },
            Self::Pointer(inner) => Self::Pointer(Box::new(inner.substitute(type_args, method_args))),
            Self::ByRef(inner) => Self::ByRef(Box::new(inner.substitute(type_args, method_args))),
        }
    }
}

/// Reference to a method, closed over its declaring type and method arguments.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub method: MethodId,
    pub declaring_type: TypeRef,
    pub method_args: Vec<TypeRef>,
}

impl MethodRef {
    /// Reference a non-generic method on its declaring definition.
    #[must_use]
    pub const fn new(method: MethodId, declaring: TypeId) -> Self {
        Self {
            method,
            declaring_type: TypeRef::Definition(declaring),
            method_args: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_generic_instance(&self) -> bool {
        !self.method_args.is_empty() || !self.declaring_type.generic_args().is_empty()
    }
}

/// Reference to a field on a (possibly constructed) declaring type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub field: FieldId,
    pub declaring_type: TypeRef,
}

/// Kind of a type definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TypeKind {
    #[default]
    Class,
    ValueType,
    Enum,
    Interface,
}

/// A type definition.
#[derive(Clone, Debug, Default)]
pub struct TypeDef {
    pub namespace: String,
    pub name: String,
    pub kind: TypeKind,
    pub parent: Option<TypeRef>,
    /// Enclosing type for nested types.
    pub declaring_type: Option<TypeId>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
    pub interfaces: Vec<TypeRef>,
    pub generic_params: Vec<String>,
}

impl TypeDef {
    /// Create a class definition.
    #[must_use]
    pub fn class(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Create a definition of the given kind.
    #[must_use]
    pub fn of_kind(namespace: &str, name: &str, kind: TypeKind) -> Self {
        Self {
            kind,
            ..Self::class(namespace, name)
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: TypeRef) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub const fn is_value_type(&self) -> bool {
        matches!(self.kind, TypeKind::ValueType | TypeKind::Enum)
    }

    #[must_use]
    pub const fn is_interface(&self) -> bool {
        matches!(self.kind, TypeKind::Interface)
    }
}

/// A field definition.
#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub declaring_type: TypeId,
    pub field_type: TypeRef,
    /// Instance fields: offset inside a boxed object (header included, also
    /// for value types). Static fields: offset inside the static field block.
    pub offset: i64,
    pub is_static: bool,
    /// Compile-time constant with no storage.
    pub is_literal: bool,
}

/// A method parameter.
#[derive(Clone, Debug)]
pub struct ParamDef {
    pub name: String,
    pub param_type: TypeRef,
}

impl ParamDef {
    #[must_use]
    pub fn new(name: &str, param_type: TypeRef) -> Self {
        Self {
            name: name.to_string(),
            param_type,
        }
    }
}

/// A method definition.
#[derive(Clone, Debug, Default)]
pub struct MethodDef {
    pub name: String,
    pub declaring_type: TypeId,
    pub params: Vec<ParamDef>,
    /// `None` for `void`.
    pub return_type: Option<TypeRef>,
    pub is_static: bool,
    pub is_virtual: bool,
    /// Virtual table slot for virtual methods.
    pub slot: Option<u16>,
    pub generic_params: Vec<String>,
    /// Native code address, if the method body was compiled.
    pub address: Option<u64>,
}

/// Interface implementation entry of a type: the interface's methods
/// start at `offset` in the implementing type's virtual table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceOffset {
    pub interface: TypeRef,
    pub offset: u16,
}
