//! External collaborator seams.
//!
//! The core never performs graph tracing or operator lowering itself; it
//! delegates to two collaborators behind object-safe traits so the pipeline
//! can be exercised with in-memory fakes:
//!
//! - [`CheckpointExporter`] turns a native training checkpoint into an
//!   intermediate graph the compiler can load.
//! - [`AcceleratorSdk`] opens a [`CompilerSession`], a non-reentrant,
//!   per-job handle driven through configure / load / build / export and
//!   released on every exit path.
//!
//! The production implementations spawn the vendor toolchain out of process
//! (see [`exporter`] and [`toolkit`]); the scripts they run are embedded in
//! [`scripts`] and deployed on first use.

pub mod exporter;
pub mod scripts;
pub mod toolkit;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::DeviceProfile;
use crate::error::Result;
use crate::registry::{Geometry, Normalization};

pub use exporter::TorchExporter;
pub use toolkit::{ToolkitSdk, ToolkitSession};

/// Exports a native checkpoint to an intermediate graph.
///
/// May fail for checkpoint-internal reasons outside this system's control;
/// the failure message is passed through to the caller unmodified.
#[async_trait]
pub trait CheckpointExporter: Send + Sync {
    /// Trace `checkpoint` at `geometry` and return the path of the produced
    /// intermediate graph. The file is owned by the calling job and removed
    /// by it once the job reaches a terminal state.
    async fn export(&self, checkpoint: &Path, geometry: Geometry) -> Result<PathBuf>;
}

/// One compile session against the accelerator toolchain.
///
/// Sessions are not reentrant: drive the stages in order, once, and always
/// call [`CompilerSession::release`] when done, success or not.
#[async_trait]
pub trait CompilerSession: Send {
    async fn configure(
        &mut self,
        normalization: &Normalization,
        device: DeviceProfile,
    ) -> Result<()>;

    async fn load(&mut self, graph: &Path, input_shape: [u32; 4]) -> Result<()>;

    /// Build the device binary. `manifest` is the calibration sample list and
    /// must be `Some` when `quantize` is true.
    async fn build(&mut self, quantize: bool, manifest: Option<&Path>) -> Result<()>;

    /// Write the final artifact. This is the only writer of the destination
    /// path, and the last stage to run.
    async fn export(&mut self, output: &Path) -> Result<()>;

    /// Release toolchain resources. Best-effort, never fails.
    async fn release(&mut self);
}

/// Factory for [`CompilerSession`]s, one per conversion job.
#[async_trait]
pub trait AcceleratorSdk: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn CompilerSession>>;
}

/// JSON progress line emitted by the export script on stdout.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptProgressLine {
    pub stage: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub output_size: Option<u64>,
}

/// JSON response line emitted by the toolkit driver for each command.
#[derive(Debug, Clone, Deserialize)]
pub struct DriverResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}
