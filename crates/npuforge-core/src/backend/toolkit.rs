//! Subprocess-backed accelerator SDK.
//!
//! [`ToolkitSdk`] spawns the deployed `toolkit_driver.py` as one persistent
//! child per session and drives it with a line protocol: one JSON command on
//! stdin, one JSON response on stdout, per compile stage. Keeping the driver
//! alive across stages is what lets configure / load / build / export fail
//! individually instead of as one opaque subprocess run.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use super::scripts;
use super::{AcceleratorSdk, CompilerSession, DriverResponse};
use crate::config::{DeviceProfile, ToolkitConfig};
use crate::error::{CompileStage, ForgeError, Result};
use crate::registry::Normalization;

/// Commands understood by the driver script.
#[derive(Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum DriverCommand<'a> {
    Configure {
        mean: [f32; 3],
        std: [f32; 3],
        target: &'a str,
        optimization_level: u8,
    },
    Load {
        model: &'a str,
        format: &'a str,
        input_size: [u32; 4],
    },
    Build {
        do_quantization: bool,
        dataset: Option<&'a str>,
    },
    Export {
        output: &'a str,
    },
    Release,
}

/// [`AcceleratorSdk`] backed by the embedded driver script.
pub struct ToolkitSdk {
    root: PathBuf,
}

impl ToolkitSdk {
    /// `root` is the directory owning the deployed scripts and venv.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AcceleratorSdk for ToolkitSdk {
    async fn open_session(&self) -> Result<Box<dyn CompilerSession>> {
        scripts::ensure_scripts_deployed(&self.root)?;

        let script = scripts::scripts_dir(&self.root).join("toolkit_driver.py");
        let python = scripts::venv_python(&self.root);

        let mut child = Command::new(&python)
            .arg(&script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ForgeError::Config {
                message: format!("failed to spawn toolkit driver: {e}"),
            })?;

        // The toolkit logs copiously on stderr; drain it so the child never
        // stalls on a full pipe.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!("toolkit stderr: {line}");
                }
            });
        }

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");

        Ok(Box::new(ToolkitSession {
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout).lines(),
            released: false,
        }))
    }
}

/// One live driver child; not reentrant, one conversion job at a time.
pub struct ToolkitSession {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: Lines<BufReader<ChildStdout>>,
    released: bool,
}

impl ToolkitSession {
    /// Send one command and wait for the matching response line.
    async fn roundtrip(&mut self, stage: CompileStage, command: &DriverCommand<'_>) -> Result<()> {
        let stage_err = |message: String| ForgeError::CompilerStage { stage, message };

        let mut line = serde_json::to_string(command)?;
        line.push('\n');

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| stage_err("driver session already released".to_string()))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| stage_err(format!("driver not accepting commands: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| stage_err(format!("driver not accepting commands: {e}")))?;

        let response = tokio::time::timeout(ToolkitConfig::STAGE_TIMEOUT, self.reader.next_line())
            .await
            .map_err(|_| stage_err(format!("timed out after {:?}", ToolkitConfig::STAGE_TIMEOUT)))?
            .map_err(|e| stage_err(format!("driver output unreadable: {e}")))?
            .ok_or_else(|| stage_err("driver exited before responding".to_string()))?;

        let response: DriverResponse = serde_json::from_str(&response)
            .map_err(|e| stage_err(format!("malformed driver response: {e}")))?;

        if response.ok {
            Ok(())
        } else {
            Err(stage_err(
                response.error.unwrap_or_else(|| "unspecified failure".to_string()),
            ))
        }
    }

    fn graph_format(graph: &Path) -> &'static str {
        match graph.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("onnx") => "onnx",
            _ => "pytorch",
        }
    }
}

#[async_trait]
impl CompilerSession for ToolkitSession {
    async fn configure(
        &mut self,
        normalization: &Normalization,
        device: DeviceProfile,
    ) -> Result<()> {
        self.roundtrip(
            CompileStage::Configure,
            &DriverCommand::Configure {
                mean: normalization.mean,
                std: normalization.std,
                target: device.as_str(),
                optimization_level: ToolkitConfig::DEFAULT_OPTIMIZATION_LEVEL,
            },
        )
        .await
    }

    async fn load(&mut self, graph: &Path, input_shape: [u32; 4]) -> Result<()> {
        let model = graph.to_string_lossy();
        self.roundtrip(
            CompileStage::Load,
            &DriverCommand::Load {
                model: &model,
                format: Self::graph_format(graph),
                input_size: input_shape,
            },
        )
        .await
    }

    async fn build(&mut self, quantize: bool, manifest: Option<&Path>) -> Result<()> {
        let dataset = manifest.map(|p| p.to_string_lossy().to_string());
        self.roundtrip(
            CompileStage::Build,
            &DriverCommand::Build {
                do_quantization: quantize,
                dataset: dataset.as_deref(),
            },
        )
        .await
    }

    async fn export(&mut self, output: &Path) -> Result<()> {
        let output = output.to_string_lossy();
        self.roundtrip(CompileStage::Export, &DriverCommand::Export { output: &output })
            .await
    }

    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // Ask the driver to shut down cleanly; closing stdin unblocks its
        // read loop if the command never arrives.
        if let Some(mut stdin) = self.stdin.take() {
            if let Ok(mut line) = serde_json::to_string(&DriverCommand::Release) {
                line.push('\n');
                stdin.write_all(line.as_bytes()).await.ok();
                stdin.flush().await.ok();
            }
            drop(stdin);
        }

        match tokio::time::timeout(std::time::Duration::from_secs(10), self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("toolkit driver exited with {status}");
            }
            _ => {
                warn!("toolkit driver did not exit cleanly, killing");
                self.child.start_kill().ok();
                self.child.wait().await.ok();
            }
        }
    }
}
