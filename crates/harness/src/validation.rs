use serde::{Deserialize, Serialize};

/// Outcome of a validation pass: errors make it invalid, warnings do not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.valid = false;
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Folds `other` into `self`, prefixing its messages with `source`.
    pub fn merge(&mut self, source: &str, other: ValidationResult) {
        self.errors
            .extend(other.errors.into_iter().map(|e| format!("[{source}] {e}")));
        self.warnings
            .extend(other.warnings.into_iter().map(|w| format!("[{source}] {w}")));
        self.valid = self.valid && other.valid && self.errors.is_empty();
    }
}
