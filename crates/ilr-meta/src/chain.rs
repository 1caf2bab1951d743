//! Field access chains.

use crate::FieldRef;

/// Path from a byte offset on a type to the field it addresses.
///
/// Nested value-type fields are flattened into one displacement by the AOT
/// compiler; `Nested` recovers the implied outer field and continues inside
/// its struct.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldAccessChain {
    Final(FieldRef),
    Nested {
        implied: FieldRef,
        next: Box<FieldAccessChain>,
    },
}

impl FieldAccessChain {
    /// The innermost field actually read or written.
    #[must_use]
    pub fn final_field(&self) -> &FieldRef {
        match self {
            Self::Final(field) => field,
            Self::Nested { next, .. } => next.final_field(),
        }
    }

    /// The outermost field of the chain.
    #[must_use]
    pub const fn first_field(&self) -> &FieldRef {
        match self {
            Self::Final(field) | Self::Nested { implied: field, .. } => field,
        }
    }

    /// All fields from outermost to innermost.
    #[must_use]
    pub fn links(&self) -> Vec<&FieldRef> {
        let mut links = Vec::new();
        let mut current = self;
        loop {
            match current {
                Self::Final(field) => {
                    links.push(field);
                    return links;
                }
                Self::Nested { implied, next } => {
                    links.push(implied);
                    current = next;
                }
            }
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            Self::Final(_) => 1,
            Self::Nested { next, .. } => 1 + next.depth(),
        }
    }
}
