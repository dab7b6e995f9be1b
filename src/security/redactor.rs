//! Secret masking for text that leaves the process.

use super::SecretDetector;

/// Placeholder written in place of a detected credential.
pub const REDACTION_PLACEHOLDER: &str = "[REDACTED]";

/// How detected credentials are replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedactionMode {
    /// Replace with `[REDACTED]`.
    #[default]
    Mask,
    /// Replace with a kind-specific placeholder such as `[REDACTED:OPENAI_KEY]`.
    TypedMask,
}

/// Masks credentials in raw responses before they are logged.
#[derive(Debug, Clone, Default)]
pub struct ContentRedactor {
    detector: SecretDetector,
    mode: RedactionMode,
}

impl ContentRedactor {
    /// Creates a redactor in [`RedactionMode::Mask`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            detector: SecretDetector::new(),
            mode: RedactionMode::Mask,
        }
    }

    /// Sets the redaction mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: RedactionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns `text` with every detected credential replaced.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        let matches = self.detector.detect(text);
        if matches.is_empty() {
            return text.to_string();
        }

        let mut result = String::with_capacity(text.len());
        let mut cursor = 0;
        for m in matches {
            result.push_str(&text[cursor..m.start]);
            match self.mode {
                RedactionMode::Mask => result.push_str(REDACTION_PLACEHOLDER),
                RedactionMode::TypedMask => {
                    result.push_str("[REDACTED:");
                    result.push_str(&m.kind.to_ascii_uppercase());
                    result.push(']');
                },
            }
            cursor = m.end;
        }
        result.push_str(&text[cursor..]);
        result
    }

    /// Returns the redacted text and whether anything was replaced.
    #[must_use]
    pub fn redact_with_flag(&self, text: &str) -> (String, bool) {
        let redacted = self.redact(text);
        let changed = redacted != text;
        (redacted, changed)
    }
}
