//! Addresses of runtime helper functions called from compiled code.

use rustc_hash::FxHashMap;

/// A runtime helper with dedicated lifting semantics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyFunction {
    InitializeMethodMetadata,
    /// Bail-out path taken when method metadata is not yet initialized.
    Bailout,
    ClassInit,
    ObjectNew,
    ArrayNew,
    ValueBox,
    ObjectUnbox,
    IsInstance,
    CastClass,
    RaiseException,
    ResolveInternalCall,
    StringNew,
    TypeGetObject,
    InterfaceInvokeData,
}

impl KeyFunction {
    /// Classify a runtime export or helper symbol name.
    #[must_use]
    pub fn from_symbol(name: &str) -> Option<Self> {
        let kind = match name.trim_start_matches('_') {
            "il2cpp_codegen_initialize_method"
            | "il2cpp_codegen_initialize_runtime_metadata"
            | "InitializeMethodMetadata" => Self::InitializeMethodMetadata,
            "il2cpp_codegen_initialize_runtime_metadata_inline" => Self::Bailout,
            "il2cpp_runtime_class_init" | "il2cpp_codegen_runtime_class_init" => Self::ClassInit,
            "il2cpp_object_new" | "il2cpp_codegen_object_new" => Self::ObjectNew,
            "il2cpp_array_new_specific" | "SZArrayNew" => Self::ArrayNew,
            "il2cpp_value_box" | "Box" => Self::ValueBox,
            "il2cpp_object_unbox" | "UnBox" => Self::ObjectUnbox,
            "IsInstClass" | "IsInstSealed" | "il2cpp_codegen_isinst" => Self::IsInstance,
            "CastclassClass" | "CastclassSealed" | "il2cpp_codegen_castclass" => Self::CastClass,
            "il2cpp_raise_exception" | "il2cpp_codegen_raise_exception" => Self::RaiseException,
            "il2cpp_resolve_icall" | "il2cpp_codegen_resolve_icall" => Self::ResolveInternalCall,
            "il2cpp_string_new" | "il2cpp_string_new_wrapper" => Self::StringNew,
            "il2cpp_type_get_object" => Self::TypeGetObject,
            "il2cpp_codegen_get_interface_invoke_data" | "GetInterfaceInvokeDataFromVTable" => {
                Self::InterfaceInvokeData
            }
            _ => return None,
        };
        Some(kind)
    }
}

/// Known helper addresses and typed throw helpers.
#[derive(Clone, Debug, Default)]
pub struct KeyFunctions {
    by_address: FxHashMap<u64, KeyFunction>,
    throw_helpers: FxHashMap<u64, String>,
}

impl KeyFunctions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(symbol, address)` pairs; unknown symbols are ignored.
    #[must_use]
    pub fn from_symbols<'a>(symbols: impl IntoIterator<Item = (&'a str, u64)>) -> Self {
        let mut keys = Self::new();
        for (name, address) in symbols {
            if let Some(kind) = KeyFunction::from_symbol(name) {
                keys.by_address.insert(address, kind);
            }
        }
        keys
    }

    /// Register a helper address.
    #[must_use]
    pub fn with(mut self, kind: KeyFunction, address: u64) -> Self {
        self.by_address.insert(address, kind);
        self
    }

    /// Register a helper that throws a fixed exception type (full name).
    #[must_use]
    pub fn with_throw_helper(mut self, address: u64, exception: &str) -> Self {
        self.throw_helpers.insert(address, exception.to_string());
        self
    }

    #[must_use]
    pub fn classify(&self, address: u64) -> Option<KeyFunction> {
        self.by_address.get(&address).copied()
    }

    /// Exception type thrown by the helper at `address`.
    #[must_use]
    pub fn thrown_exception(&self, address: u64) -> Option<&str> {
        self.throw_helpers.get(&address).map(String::as_str)
    }

    /// Address of a helper, if registered.
    #[must_use]
    pub fn address_of(&self, kind: KeyFunction) -> Option<u64> {
        // Several addresses may share a kind; pick the lowest for stability.
        self.by_address
            .iter()
            .filter(|&(_, k)| *k == kind)
            .map(|(&addr, _)| addr)
            .min()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty() && self.throw_helpers.is_empty()
    }
}
