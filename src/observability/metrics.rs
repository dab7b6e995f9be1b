//! Prometheus metrics.

use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::{Path, PathBuf};

/// Installed Prometheus recorder plus the file its snapshot goes to.
#[derive(Debug)]
pub struct MetricsHandle {
    prometheus: PrometheusHandle,
    snapshot_path: PathBuf,
}

impl MetricsHandle {
    /// Renders every metric in the Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus.render()
    }

    /// Where the snapshot is written.
    #[must_use]
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Writes the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_snapshot(&self) -> Result<()> {
        write_snapshot(&self.snapshot_path, &self.render())
    }
}

/// Installs the global Prometheus recorder.
///
/// # Errors
///
/// Returns an error if a recorder is already installed.
pub fn install_prometheus(snapshot_path: &Path) -> Result<MetricsHandle> {
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::OperationFailed {
            operation: "metrics_recorder_install".to_string(),
            cause: e.to_string(),
        })?;
    Ok(MetricsHandle {
        prometheus,
        snapshot_path: snapshot_path.to_path_buf(),
    })
}

fn write_snapshot(path: &Path, payload: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io("create_metrics_dir", e))?;
        }
    }
    let mut payload = payload.to_string();
    if !payload.ends_with('\n') {
        payload.push('\n');
    }
    std::fs::write(path, payload).map_err(|e| Error::io("write_metrics_snapshot", e))?;
    tracing::debug!(path = %path.display(), "Wrote metrics snapshot");
    Ok(())
}
