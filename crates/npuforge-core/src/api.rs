//! Caller-facing facade.
//!
//! `ForgeApi` owns the on-disk layout (`uploads/`, `output/`,
//! `calibration_data/`) and wires the default collaborators into a
//! [`ConversionPipeline`]. Frontends hand it validated paths and
//! configuration and get back plain result types; no HTTP or RPC concerns
//! live in this crate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::backend::{self, AcceleratorSdk, CheckpointExporter, ToolkitSdk, TorchExporter};
use crate::config::{CalibrationConfig, DeviceProfile, PathsConfig};
use crate::dataset::{self, CalibrationBuild, CalibrationStatus, DatasetFormat};
use crate::error::{ForgeError, Result};
use crate::pipeline::{ConversionOutcome, ConversionPipeline, ConversionRequest};
use crate::registry::{self, FamilyInfo};

/// One emitted artifact in the output directory.
#[derive(Debug, Clone, Serialize)]
pub struct OutputArtifact {
    pub filename: String,
    pub size_bytes: u64,
    pub modified: chrono::DateTime<chrono::Utc>,
}

/// Main entry point for programmatic access to the conversion core.
pub struct ForgeApi {
    root: PathBuf,
    pipeline: ConversionPipeline,
}

impl ForgeApi {
    /// Create an API instance rooted at `root`, bootstrapping the working
    /// directories and wiring the subprocess-backed collaborators.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let exporter: Arc<dyn CheckpointExporter> = Arc::new(TorchExporter::new(&root));
        let sdk: Arc<dyn AcceleratorSdk> = Arc::new(ToolkitSdk::new(&root));
        Self::with_collaborators(root, exporter, sdk)
    }

    /// Create an API instance with caller-supplied collaborators. This is
    /// the seam integration tests use to run the pipeline without a vendor
    /// toolchain installed.
    pub fn with_collaborators(
        root: impl Into<PathBuf>,
        exporter: Arc<dyn CheckpointExporter>,
        sdk: Arc<dyn AcceleratorSdk>,
    ) -> Result<Self> {
        let root = root.into();
        for dir in [
            root.join(PathsConfig::UPLOADS_DIR_NAME),
            root.join(PathsConfig::OUTPUT_DIR_NAME),
            root.join(PathsConfig::CALIBRATION_DIR_NAME),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| ForgeError::io_with_path(e, &dir))?;
        }

        let pipeline = ConversionPipeline::new(
            exporter,
            sdk,
            root.join(PathsConfig::CALIBRATION_DIR_NAME),
            root.join(PathsConfig::OUTPUT_DIR_NAME),
        );
        info!("forge api initialized at {}", root.display());
        Ok(Self { root, pipeline })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(PathsConfig::UPLOADS_DIR_NAME)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(PathsConfig::OUTPUT_DIR_NAME)
    }

    pub fn calibration_dir(&self) -> PathBuf {
        self.root.join(PathsConfig::CALIBRATION_DIR_NAME)
    }

    /// Run one conversion job to a terminal state.
    pub async fn convert(&self, request: ConversionRequest) -> ConversionOutcome {
        self.pipeline.convert(request).await
    }

    /// Build (or rebuild) the calibration dataset for a family from an
    /// arbitrary user-supplied image directory.
    ///
    /// Do not run two builds for the same family concurrently; the manifest
    /// write is last-writer-wins.
    pub fn prepare_calibration(
        &self,
        dataset_path: &Path,
        family_id: &str,
        max_images: Option<usize>,
    ) -> Result<CalibrationBuild> {
        let spec = registry::lookup(family_id)?;
        let output_dir = self.calibration_dir().join(spec.calibration_subdir);
        dataset::build_calibration_dataset(
            dataset_path,
            &output_dir,
            family_id,
            max_images.unwrap_or(CalibrationConfig::DEFAULT_MAX_IMAGES),
        )
    }

    /// Calibration readiness for a family.
    pub fn calibration_status(&self, family_id: &str) -> Result<CalibrationStatus> {
        let spec = registry::lookup(family_id)?;
        Ok(dataset::calibration_status(
            &self.calibration_dir(),
            spec.calibration_subdir,
        ))
    }

    /// Classify the layout of an arbitrary dataset directory.
    pub fn detect_dataset(&self, path: &Path) -> DatasetFormat {
        dataset::detect(path)
    }

    /// Supported model families.
    pub fn families() -> Vec<FamilyInfo> {
        registry::family_catalog()
    }

    /// Supported target device profiles.
    pub fn device_profiles() -> &'static [DeviceProfile] {
        DeviceProfile::all()
    }

    /// Emitted artifacts in the output directory, newest first.
    pub fn list_outputs(&self) -> Result<Vec<OutputArtifact>> {
        let dir = self.output_dir();
        let mut artifacts = Vec::new();

        for entry in std::fs::read_dir(&dir).map_err(|e| ForgeError::io_with_path(e, &dir))? {
            let entry = entry.map_err(|e| ForgeError::io_with_path(e, &dir))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(&format!(".{}", PathsConfig::ARTIFACT_EXT)) {
                continue;
            }
            let meta = entry
                .metadata()
                .map_err(|e| ForgeError::io_with_path(e, entry.path()))?;
            let modified = meta
                .modified()
                .map(chrono::DateTime::<chrono::Utc>::from)
                .unwrap_or_else(|_| chrono::Utc::now());
            artifacts.push(OutputArtifact {
                filename: name,
                size_bytes: meta.len(),
                modified,
            });
        }

        artifacts.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(artifacts)
    }

    /// Check if the toolchain environment (scripts + venv) is ready.
    pub fn is_environment_ready(&self) -> bool {
        backend::scripts::is_environment_ready(&self.root)
    }

    /// Deploy the toolchain scripts and set up the venv if needed.
    pub async fn ensure_environment(&self) -> Result<()> {
        backend::scripts::ensure_environment(&self.root).await
    }
}
