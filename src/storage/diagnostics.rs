//! Diagnostic artifacts for failed topic runs.

use crate::models::DiagnosticArtifact;
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Writes one JSON file per failed run into a directory.
///
/// Files are named `<topic-slug>-<run_id>.json` and written through a
/// temporary file plus rename, so a reader never sees a half-written artifact.
#[derive(Debug, Clone)]
pub struct DiagnosticsWriter {
    dir: PathBuf,
}

impl DiagnosticsWriter {
    /// Creates a writer for `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists an artifact and returns the path written.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn write(&self, artifact: &DiagnosticArtifact) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::io("create_diagnostics_dir", e))?;

        let file_name = format!("{}-{}.json", slugify(&artifact.topic), artifact.run_id);
        let path = self.dir.join(file_name);
        let tmp = path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(artifact)
            .map_err(|e| Error::io("encode_diagnostic", e))?;
        fs::write(&tmp, body).map_err(|e| Error::io("write_diagnostic", e))?;
        fs::rename(&tmp, &path).map_err(|e| Error::io("write_diagnostic", e))?;

        tracing::info!(
            path = %path.display(),
            topic = %artifact.topic,
            run_id = %artifact.run_id,
            "Wrote diagnostic artifact"
        );
        Ok(path)
    }

    /// Reads an artifact back.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or not a valid artifact.
    pub fn read(path: &Path) -> Result<DiagnosticArtifact> {
        let raw = fs::read(path).map_err(|e| Error::io("read_diagnostic", e))?;
        serde_json::from_slice(&raw).map_err(|e| Error::io("decode_diagnostic", e))
    }
}

/// Lowercase ASCII slug: alphanumerics kept, every other run collapsed to `-`.
///
/// Returns `topic` for input with no alphanumerics.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "topic".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("AI News", "ai-news")]
    #[test_case("  Tech & Policy!  ", "tech-policy")]
    #[test_case("Crypto/Web3 -- Weekly", "crypto-web3-weekly")]
    #[test_case("日本", "topic")]
    #[test_case("", "topic")]
    fn test_slugify(input: &str, expected: &str) {
        assert_eq!(slugify(input), expected);
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DiagnosticsWriter::new(dir.path().join("diagnostics"));
        let artifact = DiagnosticArtifact {
            run_id: "0192-run".to_string(),
            topic: "AI News".to_string(),
            reason: "retries exhausted after 4 attempts".to_string(),
            estimated_tokens: 4100,
            included_episode_ids: vec!["ep-a".to_string(), "ep-b".to_string()],
            excluded_episode_ids: vec!["ep-c".to_string()],
            created_at: 1_700_000_000,
        };

        let path = writer.write(&artifact).unwrap();
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("ai-news-0192-run.json")
        );
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(DiagnosticsWriter::read(&path).unwrap(), artifact);
    }
}
