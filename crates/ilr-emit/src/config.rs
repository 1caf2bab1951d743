//! Emit configuration.

/// Pseudocode rendering options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmitConfig {
    /// Render unresolved actions and null checks as `//` comments.
    pub emit_comments: bool,
    /// Also render bookkeeping actions (copies, constant loads, compares).
    pub include_unimportant: bool,
    /// Append the source address to every rendered action.
    pub emit_addresses: bool,
    /// Spaces per nesting level.
    pub indent: usize,
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            emit_comments: true,
            include_unimportant: false,
            emit_addresses: false,
            indent: 4,
        }
    }
}

impl EmitConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_comments(mut self, enabled: bool) -> Self {
        self.emit_comments = enabled;
        self
    }

    #[must_use]
    pub const fn with_unimportant(mut self, enabled: bool) -> Self {
        self.include_unimportant = enabled;
        self
    }

    #[must_use]
    pub const fn with_addresses(mut self, enabled: bool) -> Self {
        self.emit_addresses = enabled;
        self
    }

    #[must_use]
    pub const fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }
}
