//! Subprocess-backed checkpoint exporter.
//!
//! Runs the deployed `export_graph.py` in the managed venv, streams its JSON
//! progress lines, and returns the traced graph path. Export failures
//! originate inside the training framework and are reported verbatim.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::scripts;
use super::{CheckpointExporter, ScriptProgressLine};
use crate::config::ToolkitConfig;
use crate::error::{ForgeError, Result};
use crate::registry::Geometry;

/// [`CheckpointExporter`] backed by the embedded trace script.
pub struct TorchExporter {
    root: PathBuf,
}

impl TorchExporter {
    /// `root` is the directory owning the deployed scripts and venv.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path the traced graph is written to: a uuid-suffixed sibling of the
    /// checkpoint, so concurrent jobs over the same upload never collide.
    fn graph_path_for(checkpoint: &Path) -> PathBuf {
        let stem = checkpoint
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "model".to_string());
        let id = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{stem}_trace_{}.torchscript", &id[..8]);
        checkpoint.with_file_name(name)
    }
}

#[async_trait]
impl CheckpointExporter for TorchExporter {
    async fn export(&self, checkpoint: &Path, geometry: Geometry) -> Result<PathBuf> {
        if !checkpoint.exists() {
            return Err(ForgeError::FileNotFound(checkpoint.to_path_buf()));
        }
        scripts::ensure_scripts_deployed(&self.root)?;

        let script = scripts::scripts_dir(&self.root).join("export_graph.py");
        let python = scripts::venv_python(&self.root);
        let output_path = Self::graph_path_for(checkpoint);

        let mut child = Command::new(&python)
            .arg(&script)
            .arg("--checkpoint")
            .arg(checkpoint)
            .arg("--output")
            .arg(&output_path)
            .arg("--height")
            .arg(geometry.height.to_string())
            .arg("--width")
            .arg(geometry.width.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ForgeError::Export {
                message: format!("failed to spawn export process: {e}"),
            })?;

        // Drain stderr in the background so the child never blocks on a full
        // pipe; the trace stack noise only matters at debug level.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!("export stderr: {line}");
                }
            });
        }

        let stdout = child.stdout.take().expect("stdout was piped");
        let mut reader = BufReader::new(stdout).lines();

        let mut reported_path: Option<PathBuf> = None;
        let mut error_message: Option<String> = None;

        let read_result = tokio::time::timeout(ToolkitConfig::EXPORT_TIMEOUT, async {
            while let Ok(Some(line)) = reader.next_line().await {
                let Ok(progress) = serde_json::from_str::<ScriptProgressLine>(&line) else {
                    debug!("Non-JSON export output: {line}");
                    continue;
                };
                match progress.stage.as_str() {
                    "complete" => {
                        reported_path = progress.output_path.map(PathBuf::from);
                    }
                    "error" => {
                        error_message = progress.message;
                    }
                    stage => {
                        debug!(stage, "export: {}", progress.message.unwrap_or_default());
                    }
                }
            }
        })
        .await;

        if read_result.is_err() {
            child.start_kill().ok();
            return Err(ForgeError::Export {
                message: format!(
                    "export timed out after {:?}",
                    ToolkitConfig::EXPORT_TIMEOUT
                ),
            });
        }

        let status = child.wait().await.map_err(|e| ForgeError::Export {
            message: format!("export process error: {e}"),
        })?;

        if !status.success() {
            // The script's own error line carries the framework's reason;
            // surface it unmodified.
            return Err(ForgeError::Export {
                message: error_message.unwrap_or_else(|| {
                    format!(
                        "export process exited with status {}",
                        status.code().unwrap_or(-1)
                    )
                }),
            });
        }

        let graph = reported_path.unwrap_or(output_path);
        if !graph.exists() {
            warn!("export reported success but no graph at {}", graph.display());
            return Err(ForgeError::Export {
                message: "export produced no intermediate graph file".to_string(),
            });
        }
        Ok(graph)
    }
}
