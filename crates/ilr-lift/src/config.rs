//! Lifting configuration.

/// Default number of instructions inspected past a branch target when
/// looking for a null-reference throw helper.
pub const DEFAULT_NULL_CHECK_LOOKAHEAD: usize = 4;

/// Default distance from an integer below which a recovered divisor is
/// trusted.
pub const DEFAULT_DIVISION_TOLERANCE: f64 = 0.001;

/// Smallest multiplier treated as the start of a division-by-constant idiom.
pub const DEFAULT_MIN_DIVISION_MULTIPLIER: i64 = 0x1_0000;

/// Configuration for lifting methods.
#[derive(Clone, Debug)]
pub struct LiftConfig {
    /// Instructions inspected past a branch target for null checks.
    pub null_check_lookahead: usize,
    /// Tolerance for divisor recovery.
    pub division_tolerance: f64,
    /// Smallest multiplier that starts a division idiom.
    pub min_division_multiplier: i64,
    /// Taint the method when an instance call finds no `this`.
    pub taint_on_missing_this: bool,
    /// Stop (tainted) after this many instructions.
    pub max_instructions: Option<usize>,
}

impl Default for LiftConfig {
    fn default() -> Self {
        Self {
            null_check_lookahead: DEFAULT_NULL_CHECK_LOOKAHEAD,
            division_tolerance: DEFAULT_DIVISION_TOLERANCE,
            min_division_multiplier: DEFAULT_MIN_DIVISION_MULTIPLIER,
            taint_on_missing_this: true,
            max_instructions: None,
        }
    }
}

impl LiftConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_null_check_lookahead(mut self, lookahead: usize) -> Self {
        self.null_check_lookahead = lookahead;
        self
    }

    #[must_use]
    pub const fn with_division_tolerance(mut self, tolerance: f64) -> Self {
        self.division_tolerance = tolerance;
        self
    }

    #[must_use]
    pub const fn with_min_division_multiplier(mut self, multiplier: i64) -> Self {
        self.min_division_multiplier = multiplier;
        self
    }

    #[must_use]
    pub const fn with_taint_on_missing_this(mut self, enabled: bool) -> Self {
        self.taint_on_missing_this = enabled;
        self
    }

    #[must_use]
    pub const fn with_max_instructions(mut self, limit: usize) -> Self {
        self.max_instructions = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_builders() {
        let config = LiftConfig::default();
        assert_eq!(config.null_check_lookahead, 4);
        assert!(config.taint_on_missing_this);
        assert!(config.max_instructions.is_none());

        let config = LiftConfig::new()
            .with_null_check_lookahead(8)
            .with_taint_on_missing_this(false)
            .with_max_instructions(100);
        assert_eq!(config.null_check_lookahead, 8);
        assert!(!config.taint_on_missing_this);
        assert_eq!(config.max_instructions, Some(100));
    }
}
