//! Transcript manifests.
//!
//! A manifest is a JSON array of episodes. Each entry carries the transcript
//! inline (`text`) or points at a UTF-8 file (`text_path`, relative to the
//! manifest's directory).
//!
//! ```json
//! [
//!   {"episode_id": "ep-1", "title": "Chips", "source": "Hard Fork",
//!    "published_at": 1760000000, "text_path": "ep-1.txt",
//!    "scores": {"AI News": 0.9}}
//! ]
//! ```

use crate::models::Transcript;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// One manifest entry as written on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestEntry {
    /// Opaque episode identifier.
    pub episode_id: String,
    /// Episode title.
    #[serde(default)]
    pub title: String,
    /// Show or feed name.
    #[serde(default)]
    pub source: String,
    /// Publication time (Unix epoch seconds).
    #[serde(default)]
    pub published_at: u64,
    /// Inline transcript.
    #[serde(default)]
    pub text: Option<String>,
    /// Transcript file.
    #[serde(default)]
    pub text_path: Option<PathBuf>,
    /// Topic relevance scores.
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
}

impl ManifestEntry {
    /// Resolves the entry into a transcript, reading `text_path` relative to
    /// `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for malformed entries and an I/O error
    /// if the transcript file cannot be read.
    pub fn into_transcript(self, base_dir: &Path) -> Result<Transcript> {
        let id = self.episode_id.trim();
        if id.is_empty() {
            return Err(Error::InvalidInput("episode_id must not be empty".to_string()));
        }
        for (topic, score) in &self.scores {
            if !(0.0..=1.0).contains(score) {
                return Err(Error::InvalidInput(format!(
                    "{id}: score {score} for '{topic}' is outside 0..=1"
                )));
            }
        }
        let text = match (self.text, self.text_path) {
            (Some(text), None) => text,
            (None, Some(path)) => {
                let path = base_dir.join(path);
                std::fs::read_to_string(&path).map_err(|e| Error::OperationFailed {
                    operation: "read_transcript".to_string(),
                    cause: format!("{}: {e}", path.display()),
                })?
            },
            (Some(_), Some(_)) => {
                return Err(Error::InvalidInput(format!(
                    "{id}: set either text or text_path, not both"
                )));
            },
            (None, None) => {
                return Err(Error::InvalidInput(format!("{id}: missing text or text_path")));
            },
        };

        Ok(Transcript {
            episode_id: id.to_string(),
            title: self.title,
            source: self.source,
            published_at: self.published_at,
            text,
            scores: self.scores,
        })
    }
}

/// Parses a manifest document.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the document is not a valid manifest or
/// repeats an episode id.
pub fn parse_manifest(contents: &str, base_dir: &Path) -> Result<Vec<Transcript>> {
    let entries: Vec<ManifestEntry> = serde_json::from_str(contents)
        .map_err(|e| Error::InvalidInput(format!("invalid manifest: {e}")))?;

    let mut seen = HashSet::new();
    let mut transcripts = Vec::with_capacity(entries.len());
    for entry in entries {
        let transcript = entry.into_transcript(base_dir)?;
        if !seen.insert(transcript.episode_id.clone()) {
            return Err(Error::InvalidInput(format!(
                "duplicate episode_id '{}'",
                transcript.episode_id
            )));
        }
        transcripts.push(transcript);
    }
    Ok(transcripts)
}

/// Loads a manifest file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid manifest.
pub fn load_manifest(path: &Path) -> Result<Vec<Transcript>> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
        operation: "read_manifest".to_string(),
        cause: format!("{}: {e}", path.display()),
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let transcripts = parse_manifest(&contents, base_dir)?;
    tracing::info!(path = %path.display(), episodes = transcripts.len(), "Loaded manifest");
    Ok(transcripts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    #[test]
    fn test_inline_and_file_text() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ep-2.txt"), "From a file.").unwrap();
        let manifest = r#"[
            {"episode_id": "ep-1", "title": "One", "text": "Inline.", "scores": {"AI News": 0.9}},
            {"episode_id": "ep-2", "text_path": "ep-2.txt", "published_at": 7}
        ]"#;
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, manifest).unwrap();

        let transcripts = load_manifest(&path).unwrap();
        assert_eq!(transcripts.len(), 2);
        assert_eq!(transcripts[0].text, "Inline.");
        assert!((transcripts[0].score_for("AI News") - 0.9).abs() < f64::EPSILON);
        assert_eq!(transcripts[1].text, "From a file.");
        assert_eq!(transcripts[1].published_at, 7);
    }

    #[test_case(r#"[{"episode_id": "", "text": "x"}]"# ; "empty id")]
    #[test_case(r#"[{"episode_id": "a"}]"# ; "no text")]
    #[test_case(r#"[{"episode_id": "a", "text": "x", "text_path": "y"}]"# ; "both texts")]
    #[test_case(r#"[{"episode_id": "a", "text": "x", "scores": {"t": 1.5}}]"# ; "score out of range")]
    #[test_case(r#"[{"episode_id": "a", "text": "x"}, {"episode_id": "a", "text": "y"}]"# ; "duplicate id")]
    #[test_case(r#"[{"episode_id": "a", "text": "x", "rating": 5}]"# ; "unknown field")]
    #[test_case(r#"{"episode_id": "a"}"# ; "not an array")]
    fn test_invalid_manifests(manifest: &str) {
        let err = parse_manifest(manifest, Path::new(".")).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{err}");
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = parse_manifest(r#"[{"episode_id": "a", "text_path": "gone.txt"}]"#, dir.path())
            .unwrap_err();
        assert!(err.to_string().contains("gone.txt"));
    }
}
