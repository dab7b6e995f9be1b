//! Security features.
//!
//! Credential detection, redaction, and the completion-call audit log.

mod audit;
mod redactor;
mod secrets;

pub use audit::{
    AuditConfig, CallAuditEntry, CallAuditLog, CallOutcome, GENESIS_HMAC, verify_file,
};
pub use redactor::{ContentRedactor, REDACTION_PLACEHOLDER, RedactionMode};
pub use secrets::{SecretDetector, SecretMatch};
