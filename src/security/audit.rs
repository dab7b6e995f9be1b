//! Side-channel audit log for completion calls.
//!
//! Every call made through the resilient caller leaves one entry here: who
//! called, under which run and idempotency key, what it cost, how it ended and
//! a redacted copy of the raw response. Entries are appended to a JSON-lines
//! file when a path is configured and kept in memory for the process lifetime.
//!
//! # HMAC Chain Integrity
//!
//! With an HMAC key configured, each entry is signed over its own fields and
//! the previous entry's signature, starting from [`GENESIS_HMAC`]. Deleting,
//! reordering or editing an entry breaks the chain, which
//! [`CallAuditLog::verify_chain`] and [`verify_file`] detect.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

type HmacSha256 = Hmac<Sha256>;

/// Previous-signature value of the first entry in a chain.
pub const GENESIS_HMAC: &str = "genesis";

/// How an audited call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    /// A response was received, screened and parsed.
    Success,
    /// The call failed (transport, safety, schema or retries exhausted).
    Failure,
}

/// One audited completion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallAuditEntry {
    /// Unique entry ID.
    pub id: String,
    /// When the call finished.
    pub timestamp: DateTime<Utc>,
    /// Pipeline component that made the call.
    pub component: String,
    /// Run the call belongs to.
    pub run_id: String,
    /// Idempotency key of the unit of work.
    pub idempotency_key: String,
    /// Model name.
    pub model: String,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Prompt tokens of the successful attempt.
    pub tokens_in: u64,
    /// Completion tokens of the successful attempt.
    pub tokens_out: u64,
    /// Wall-clock time across all attempts.
    pub wall_ms: u64,
    /// How the call ended.
    pub outcome: CallOutcome,
    /// Error kind for failed calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Raw response body with credentials masked (empty when none was received).
    #[serde(default)]
    pub response: String,
    /// HMAC-SHA256 of this entry (hex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac_signature: Option<String>,
    /// Signature of the previous entry (hex), or [`GENESIS_HMAC`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hmac: Option<String>,
}

impl CallAuditEntry {
    /// Creates a successful entry stamped with the current time.
    #[must_use]
    pub fn new(
        component: impl Into<String>,
        run_id: impl Into<String>,
        idempotency_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.into(),
            run_id: run_id.into(),
            idempotency_key: idempotency_key.into(),
            model: model.into(),
            attempts: 1,
            tokens_in: 0,
            tokens_out: 0,
            wall_ms: 0,
            outcome: CallOutcome::Success,
            error_kind: None,
            response: String::new(),
            hmac_signature: None,
            previous_hmac: None,
        }
    }

    /// Marks the entry as failed with the given error kind.
    #[must_use]
    pub fn failed(mut self, error_kind: impl Into<String>) -> Self {
        self.outcome = CallOutcome::Failure;
        self.error_kind = Some(error_kind.into());
        self
    }

    /// Canonical form covered by the signature.
    ///
    /// The response is included through its SHA-256 so the canonical string
    /// stays short.
    #[must_use]
    pub fn canonical_string(&self, previous_hmac: &str) -> String {
        let response_hash = hex::encode(Sha256::digest(self.response.as_bytes()));
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{:?}|{}|{}|{}",
            self.id,
            self.timestamp.to_rfc3339(),
            self.component,
            self.run_id,
            self.idempotency_key,
            self.model,
            self.attempts,
            self.tokens_in,
            self.tokens_out,
            self.wall_ms,
            self.outcome,
            self.error_kind.as_deref().unwrap_or(""),
            response_hash,
            previous_hmac
        )
    }

    /// Computes the signature of this entry chained to `previous_hmac`.
    #[must_use]
    pub fn compute_hmac(&self, key: &[u8], previous_hmac: &str) -> Option<String> {
        let mut mac = HmacSha256::new_from_slice(key).ok()?;
        mac.update(self.canonical_string(previous_hmac).as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    /// Signs the entry. Returns `false` if the key is unusable.
    pub fn sign(&mut self, key: &[u8], previous_hmac: &str) -> bool {
        let Some(signature) = self.compute_hmac(key, previous_hmac) else {
            return false;
        };
        self.previous_hmac = Some(previous_hmac.to_string());
        self.hmac_signature = Some(signature);
        true
    }

    /// Whether the stored signature matches the entry's contents.
    #[must_use]
    pub fn verify(&self, key: &[u8]) -> bool {
        let (Some(signature), Some(previous)) = (&self.hmac_signature, &self.previous_hmac) else {
            return false;
        };
        self.compute_hmac(key, previous)
            .is_some_and(|computed| computed == *signature)
    }
}

/// Audit log configuration.
#[derive(Debug, Clone, Default)]
pub struct AuditConfig {
    /// JSON-lines file to append to.
    pub log_path: Option<PathBuf>,
    /// HMAC key; entries are unsigned when `None`.
    pub hmac_key: Option<Vec<u8>>,
}

impl AuditConfig {
    /// Creates an in-memory, unsigned configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log path.
    #[must_use]
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the HMAC key.
    #[must_use]
    pub fn with_hmac_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.hmac_key = Some(key.into());
        self
    }
}

/// Append-only audit log of completion calls.
#[derive(Debug)]
pub struct CallAuditLog {
    config: AuditConfig,
    entries: Mutex<Vec<CallAuditEntry>>,
    chain_start: String,
    last_hmac: Mutex<String>,
}

impl CallAuditLog {
    /// Creates a log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log file's parent directory cannot be created.
    pub fn new(config: AuditConfig) -> Result<Self> {
        if let Some(parent) = config.log_path.as_deref().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io("init_audit_log", e))?;
            }
        }
        // Appending to an existing file continues its chain.
        let last_hmac = config
            .log_path
            .as_deref()
            .and_then(last_signature_in)
            .unwrap_or_else(|| GENESIS_HMAC.to_string());
        Ok(Self {
            config,
            entries: Mutex::new(Vec::new()),
            chain_start: last_hmac.clone(),
            last_hmac: Mutex::new(last_hmac),
        })
    }

    /// An unsigned log that only keeps entries in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            config: AuditConfig::default(),
            entries: Mutex::new(Vec::new()),
            chain_start: GENESIS_HMAC.to_string(),
            last_hmac: Mutex::new(GENESIS_HMAC.to_string()),
        }
    }

    /// Whether entries are signed.
    #[must_use]
    pub const fn is_signing_enabled(&self) -> bool {
        self.config.hmac_key.is_some()
    }

    /// Signs, stores and (if configured) appends an entry to the log file.
    ///
    /// Audit failures never fail the call being audited; file errors are logged.
    pub fn record(&self, mut entry: CallAuditEntry) {
        // The chain lock is held until the entry is stored so that file order
        // matches signing order.
        let mut last = match self.last_hmac.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(key) = &self.config.hmac_key {
            if entry.sign(key, &last) {
                if let Some(signature) = &entry.hmac_signature {
                    last.clone_from(signature);
                }
            }
        }

        if let Some(path) = &self.config.log_path {
            if let Err(e) = append_line(path, &entry) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to append audit entry");
            }
        }

        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
        drop(last);
    }

    /// All entries recorded by this process, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<CallAuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Verifies the chain of entries recorded by this process.
    ///
    /// # Errors
    ///
    /// Returns an error if no key is configured or the chain is broken.
    pub fn verify_chain(&self) -> Result<()> {
        let key = self.config.hmac_key.as_deref().ok_or_else(|| Error::OperationFailed {
            operation: "verify_chain".to_string(),
            cause: "no HMAC key configured".to_string(),
        })?;
        verify_entries(&self.entries(), key, &self.chain_start)
    }
}

/// Verifies a JSON-lines audit file, returning the number of entries checked.
///
/// # Errors
///
/// Returns an error if the file cannot be read, a line does not parse, or the
/// chain is broken.
pub fn verify_file(path: &Path, key: &[u8]) -> Result<usize> {
    let file = std::fs::File::open(path).map_err(|e| Error::io("verify_audit_file", e))?;
    let mut entries = Vec::new();
    for (i, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::io("verify_audit_file", e))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: CallAuditEntry = serde_json::from_str(&line).map_err(|e| {
            Error::io("verify_audit_file", format!("line {}: {e}", i + 1))
        })?;
        entries.push(entry);
    }
    verify_entries(&entries, key, GENESIS_HMAC)?;
    Ok(entries.len())
}

fn verify_entries(entries: &[CallAuditEntry], key: &[u8], start: &str) -> Result<()> {
    let broken = |cause: String| Error::OperationFailed {
        operation: "verify_chain".to_string(),
        cause,
    };

    let mut expected_previous = start.to_string();
    for (i, entry) in entries.iter().enumerate() {
        let (Some(signature), Some(previous)) = (&entry.hmac_signature, &entry.previous_hmac)
        else {
            return Err(broken(format!("entry {i} is unsigned")));
        };
        if *previous != expected_previous {
            return Err(broken(format!(
                "entry {i} chain broken: expected previous '{expected_previous}', got '{previous}'"
            )));
        }
        if !entry.verify(key) {
            return Err(broken(format!("entry {i} has invalid signature")));
        }
        expected_previous.clone_from(signature);
    }
    Ok(())
}

fn last_signature_in(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let line = content.lines().rev().find(|line| !line.trim().is_empty())?;
    serde_json::from_str::<CallAuditEntry>(line).ok()?.hmac_signature
}

fn append_line(path: &Path, entry: &CallAuditEntry) -> std::io::Result<()> {
    use std::fs::OpenOptions;

    #[cfg(unix)]
    let mut file = {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(path)?
    };

    #[cfg(not(unix))]
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    let json = serde_json::to_string(entry)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writeln!(file, "{json}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str) -> CallAuditEntry {
        let mut entry = CallAuditEntry::new("chunk_summarizer", "run-1", key, "gpt-5-mini");
        entry.tokens_in = 120;
        entry.tokens_out = 40;
        entry.response = r#"{"summary":"ok"}"#.to_string();
        entry
    }

    #[test]
    fn test_sign_and_verify() {
        let mut e = entry("ep#0");
        assert!(e.sign(b"k", GENESIS_HMAC));
        assert!(e.verify(b"k"));
        assert!(!e.verify(b"other"));

        e.response.push('!');
        assert!(!e.verify(b"k"));
    }

    #[test]
    fn test_unsigned_log() {
        let log = CallAuditLog::in_memory();
        log.record(entry("ep#0"));
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].hmac_signature.is_none());
        assert!(log.verify_chain().is_err());
    }

    #[test]
    fn test_chain_links_entries() {
        let log = CallAuditLog::new(AuditConfig::new().with_hmac_key(b"secret".to_vec())).unwrap();
        log.record(entry("ep#0"));
        log.record(entry("ep#1").failed("retry_exhausted"));
        log.record(entry("ep#2"));

        let entries = log.entries();
        assert_eq!(entries[0].previous_hmac.as_deref(), Some(GENESIS_HMAC));
        assert_eq!(entries[1].previous_hmac, entries[0].hmac_signature);
        assert_eq!(entries[1].outcome, CallOutcome::Failure);
        assert!(log.verify_chain().is_ok());
    }

    #[test]
    fn test_file_round_trip_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit/calls.jsonl");
        let log = CallAuditLog::new(
            AuditConfig::new()
                .with_log_path(&path)
                .with_hmac_key(b"secret".to_vec()),
        )
        .unwrap();
        log.record(entry("ep#0"));
        log.record(entry("ep#1"));
        assert_eq!(verify_file(&path, b"secret").unwrap(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        std::fs::write(&path, format!("{}\n", lines[1])).unwrap();
        assert!(verify_file(&path, b"secret").is_err());
    }

    #[test]
    fn test_reopened_file_continues_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.jsonl");
        let config = AuditConfig::new()
            .with_log_path(&path)
            .with_hmac_key(b"secret".to_vec());

        CallAuditLog::new(config.clone()).unwrap().record(entry("ep#0"));
        CallAuditLog::new(config).unwrap().record(entry("ep#1"));

        assert_eq!(verify_file(&path, b"secret").unwrap(), 2);
    }
}
