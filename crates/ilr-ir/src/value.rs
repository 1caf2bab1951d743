//! Symbolic values.

use ilr_isa::Register;
use ilr_meta::{FieldAccessChain, FieldRef, MethodRef, TypeRef};

/// Index of a value in its [`ValueTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a local currently lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Location {
    Register(Register),
    /// Entry-relative frame offset.
    Stack(i64),
}

/// Partially recovered `x / d` compiled as a multiply-high followed by a shift.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DivisionInProgress {
    /// The magic multiplier.
    pub multiplier: i64,
    /// Implicit shift already applied by a high-half multiply (32 or 64), 0 otherwise.
    pub base_shift: u32,
    /// The dividend, if it was known.
    pub dividend: Option<ValueId>,
}

/// Payload of a [`Constant`].
#[derive(Clone, Debug, PartialEq)]
pub enum ConstantPayload {
    Type(TypeRef),
    Method(MethodRef),
    Field(FieldRef),
    String(String),
    Number(i64),
    Float(f64),
    /// Runtime class pointer of an object of the given type.
    ClassIdentifier(TypeRef),
    /// Pointer to the static field block of a type.
    StaticFieldsPointer(TypeRef),
    /// Address of an entry-relative frame offset.
    StackPointer(i64),
    /// Address of an array element.
    ArrayOffsetPointer { array: ValueId, index: Option<i64> },
    /// Address of a field inside an object.
    FieldPointer { object: ValueId, chain: FieldAccessChain },
    /// Address of a global that no metadata usage covers.
    UnresolvedGlobal(u64),
    IntegerDivision(DivisionInProgress),
    /// Invoke data resolved for an interface slot.
    InterfaceMethod(MethodRef),
}

impl ConstantPayload {
    /// Short tag used in diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Type(_) => "type",
            Self::Method(_) => "method",
            Self::Field(_) => "field",
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::Float(_) => "float",
            Self::ClassIdentifier(_) => "class-identifier",
            Self::StaticFieldsPointer(_) => "static-fields-pointer",
            Self::StackPointer(_) => "stack-pointer",
            Self::ArrayOffsetPointer { .. } => "array-offset-pointer",
            Self::FieldPointer { .. } => "field-pointer",
            Self::UnresolvedGlobal(_) => "unresolved-global",
            Self::IntegerDivision(_) => "integer-division",
            Self::InterfaceMethod(_) => "interface-method",
        }
    }
}

/// A value that stands for a managed variable.
#[derive(Clone, Debug, PartialEq)]
pub struct Local {
    pub name: String,
    /// Inferred managed type; `None` when unknown.
    pub ty: Option<TypeRef>,
    /// Literal this local was initialized with, for folding compiler temporaries.
    pub known_initial: Option<i64>,
    pub location: Option<Location>,
    /// Parameter position (excluding `this`) for incoming arguments.
    pub parameter: Option<u16>,
    pub is_this: bool,
}

/// A value whose meaning is fully known.
#[derive(Clone, Debug, PartialEq)]
pub struct Constant {
    pub payload: ConstantPayload,
    /// Register the constant was produced into.
    pub register: Option<Register>,
}

/// A symbolic value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Local(Local),
    Constant(Constant),
}

impl Value {
    #[must_use]
    pub const fn as_local(&self) -> Option<&Local> {
        match self {
            Self::Local(local) => Some(local),
            Self::Constant(_) => None,
        }
    }

    #[must_use]
    pub const fn as_constant(&self) -> Option<&ConstantPayload> {
        match self {
            Self::Constant(constant) => Some(&constant.payload),
            Self::Local(_) => None,
        }
    }

    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Managed type of the value, if known.
    #[must_use]
    pub const fn ty(&self) -> Option<&TypeRef> {
        match self {
            Self::Local(local) => local.ty.as_ref(),
            Self::Constant(_) => None,
        }
    }

    /// Integer the value is known to hold.
    #[must_use]
    pub const fn known_number(&self) -> Option<i64> {
        match self {
            Self::Constant(Constant {
                payload: ConstantPayload::Number(n),
                ..
            }) => Some(*n),
            Self::Local(Local {
                known_initial: Some(n),
                ..
            }) => Some(*n),
            _ => None,
        }
    }
}

/// Append-only arena of values.
///
/// Values are never changed after insertion; rebinding a register points it
/// at a new entry.
#[derive(Clone, Debug, Default)]
pub struct ValueTable {
    values: Vec<Value>,
    next_local: u32,
}

impl ValueTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Panics if the table already holds `u32::MAX` values.
    pub fn push(&mut self, value: Value) -> ValueId {
        let id = ValueId(u32::try_from(self.values.len()).expect("value ids fit in u32"));
        self.values.push(value);
        id
    }

    /// Fresh name for a compiler-introduced local.
    pub fn next_local_name(&mut self) -> String {
        let name = format!("local{}", self.next_local);
        self.next_local += 1;
        name
    }

    #[must_use]
    pub fn get(&self, id: ValueId) -> Option<&Value> {
        self.values.get(id.index())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValueId, &Value)> {
        (0..).map(ValueId).zip(&self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_append_only() {
        let mut table = ValueTable::new();
        let a = table.push(Value::Constant(Constant {
            payload: ConstantPayload::Number(7),
            register: None,
        }));
        let b = table.push(Value::Constant(Constant {
            payload: ConstantPayload::Number(8),
            register: None,
        }));
        assert_ne!(a, b);
        assert_eq!(table.get(a).and_then(Value::known_number), Some(7));
        assert_eq!(table.len(), 2);
        assert_eq!(table.next_local_name(), "local0");
        assert_eq!(table.next_local_name(), "local1");
    }

    #[test]
    fn test_iter_ids_match_push() {
        let mut table = ValueTable::new();
        let ids: Vec<ValueId> = (0..3)
            .map(|n| {
                table.push(Value::Constant(Constant {
                    payload: ConstantPayload::Number(n),
                    register: None,
                }))
            })
            .collect();
        let listed: Vec<ValueId> = table.iter().map(|(id, _)| id).collect();
        assert_eq!(listed, ids);
        assert_eq!(table.iter().last().and_then(|(_, v)| v.known_number()), Some(2));
    }

    #[test]
    fn test_payload_kind() {
        let payload = ConstantPayload::IntegerDivision(DivisionInProgress {
            multiplier: 0x6666_6667,
            base_shift: 32,
            dividend: None,
        });
        assert_eq!(payload.kind(), "integer-division");
    }
}
