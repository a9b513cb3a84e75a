//! Conversion engine.
//!
//! Orchestrates one job at a time: validate the input against the family
//! registry, export native checkpoints to an intermediate graph, resolve the
//! calibration manifest, drive the compiler session through its four stages,
//! and clean up job-scoped files on both terminal paths.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use super::types::{
    ConversionJob, ConversionOutcome, ConversionRequest, ConversionStage, QuantFallback,
};
use crate::backend::{AcceleratorSdk, CheckpointExporter, CompilerSession};
use crate::checkpoint::{self, TaskCheck};
use crate::config::{CalibrationConfig, DeviceProfile, PathsConfig};
use crate::dataset::{build_calibration_dataset, calibration_status};
use crate::error::{ForgeError, Result};
use crate::registry::{self, ModelFamilySpec, SourceRouting};

/// The staged conversion pipeline. One instance serves many jobs; each job
/// gets its own compiler session.
pub struct ConversionPipeline {
    exporter: Arc<dyn CheckpointExporter>,
    sdk: Arc<dyn AcceleratorSdk>,
    calibration_root: PathBuf,
    output_root: PathBuf,
}

impl ConversionPipeline {
    pub fn new(
        exporter: Arc<dyn CheckpointExporter>,
        sdk: Arc<dyn AcceleratorSdk>,
        calibration_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            exporter,
            sdk,
            calibration_root: calibration_root.into(),
            output_root: output_root.into(),
        }
    }

    /// Run one conversion job to a terminal state.
    ///
    /// Never panics and never leaves job-scoped files behind: the
    /// intermediate graph produced for this job is removed on success and
    /// failure alike, and the compiler session is always released.
    pub async fn convert(&self, request: ConversionRequest) -> ConversionOutcome {
        info!(
            family = %request.family_id,
            input = %request.input_path.display(),
            device = %request.device,
            quantize = request.quantize,
            "starting conversion"
        );

        let mut notes: Vec<String> = Vec::new();
        let mut temp_graph: Option<PathBuf> = None;
        let mut quantized = request.quantize;

        let result = self
            .run(&request, &mut notes, &mut temp_graph, &mut quantized)
            .await;

        // Job-scoped intermediate graphs must not outlive the job.
        if let Some(tmp) = temp_graph {
            if tmp.exists() {
                if let Err(e) = std::fs::remove_file(&tmp) {
                    warn!("failed to remove intermediate graph {}: {e}", tmp.display());
                }
            }
        }

        match result {
            Ok(output_path) => {
                let size_mb = std::fs::metadata(&output_path)
                    .map(|m| m.len() as f64 / 1024.0 / 1024.0)
                    .unwrap_or(0.0);
                notes.push(format!(
                    "Conversion succeeded: {} ({size_mb:.2} MB)",
                    output_path.display()
                ));
                info!(output = %output_path.display(), quantized, "conversion finished");
                ConversionOutcome {
                    success: true,
                    message: notes.join("\n"),
                    output_path: Some(output_path),
                    quantized,
                }
            }
            Err(e) => {
                warn!(family = %request.family_id, "conversion failed: {e}");
                notes.push(e.to_string());
                ConversionOutcome {
                    success: false,
                    message: notes.join("\n"),
                    output_path: None,
                    quantized: false,
                }
            }
        }
    }

    async fn run(
        &self,
        request: &ConversionRequest,
        notes: &mut Vec<String>,
        temp_graph: &mut Option<PathBuf>,
        quantized: &mut bool,
    ) -> Result<PathBuf> {
        let spec = registry::lookup(&request.family_id)?;

        if !request.input_path.is_file() {
            return Err(ForgeError::FileNotFound(request.input_path.clone()));
        }
        let filename = request
            .input_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        registry::validate_extension(spec.id, &filename)?;

        let geometry = request.geometry.unwrap_or(spec.default_geometry);

        let mut job = ConversionJob {
            stage: ConversionStage::Validating,
            family_id: spec.id.to_string(),
            device: request.device,
            geometry,
            quantize: request.quantize,
            input_path: request.input_path.clone(),
            // Resolved after the quantization decision so a derived name
            // carries the precision that was actually built.
            output_path: PathBuf::new(),
        };

        // Route by the file's actual form, not just its extension: a traced
        // graph and a native checkpoint can share the .pt suffix.
        let form = checkpoint::classify_source(&request.input_path)?;
        let graph_path = if form.is_intermediate() {
            notes.push("Input already in intermediate graph form, skipping export".to_string());
            request.input_path.clone()
        } else {
            if spec.routing == SourceRouting::GraphOnly {
                // Pre-flight detectable user error: no export path exists for
                // this family, so fail before delegating anywhere.
                return Err(ForgeError::Validation {
                    field: "model_file".to_string(),
                    message: format!(
                        "{} must be supplied as an intermediate graph; this file is a native checkpoint with no supported export path",
                        spec.short
                    ),
                });
            }

            match checkpoint::validate_task_identity(spec, &request.input_path)? {
                TaskCheck::Confirmed { task } => {
                    notes.push(format!("Checkpoint task verified ({task})"));
                }
                check @ TaskCheck::Inconclusive { .. } => {
                    if let Some(warning) = check.warning() {
                        warn!(family = spec.id, "{warning}");
                        notes.push(format!("Warning: {warning}"));
                    }
                }
                TaskCheck::NotRequired => {}
            }

            job.advance(ConversionStage::Exporting);
            let graph = self.exporter.export(&request.input_path, geometry).await?;
            *temp_graph = Some(graph.clone());
            notes.push(format!("Exported intermediate graph at {geometry}"));
            graph
        };

        let mut manifest: Option<PathBuf> = None;
        if request.quantize {
            job.advance(ConversionStage::ResolvingCalibration);
            manifest = self.resolve_manifest(spec, notes)?;
            if manifest.is_none() {
                match request.fallback {
                    QuantFallback::FloatFallback => {
                        *quantized = false;
                        job.quantize = false;
                        let warning = format!(
                            "Warning: no calibration dataset available for '{}', continuing without quantization (reduced-precision output)",
                            spec.id
                        );
                        warn!(family = spec.id, "quantization demoted: no calibration data");
                        notes.push(warning);
                    }
                    QuantFallback::Strict => {
                        return Err(ForgeError::Validation {
                            field: "calibration".to_string(),
                            message: format!(
                                "quantization requested but no calibration dataset is available for '{}'",
                                spec.id
                            ),
                        });
                    }
                }
            }
        }

        let output_path = request.output_path.clone().unwrap_or_else(|| {
            self.default_output_path(&request.input_path, request.device, *quantized)
        });
        job.output_path = output_path.clone();

        job.advance(ConversionStage::Compiling);
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ForgeError::io_with_path(e, parent))?;
        }

        let mut session = self.sdk.open_session().await?;
        let compile_result = Self::drive_compiler(
            session.as_mut(),
            spec,
            &job,
            &graph_path,
            *quantized,
            manifest.as_deref(),
        )
        .await;
        // Release on every exit path; the toolkit handle is not reentrant
        // and must not leak into the next job.
        session.release().await;
        compile_result?;

        if !output_path.exists() {
            return Err(ForgeError::Other(
                "compiler reported success but produced no artifact".to_string(),
            ));
        }
        job.advance(ConversionStage::Completed);
        Ok(output_path)
    }

    /// Drive the compiler session through its four stages in order.
    async fn drive_compiler(
        session: &mut dyn CompilerSession,
        spec: &ModelFamilySpec,
        job: &ConversionJob,
        graph: &Path,
        quantize: bool,
        manifest: Option<&Path>,
    ) -> Result<()> {
        session.configure(&spec.normalization, job.device).await?;
        session.load(graph, job.geometry.input_shape()).await?;
        session.build(quantize, manifest).await?;
        session.export(&job.output_path).await?;
        Ok(())
    }

    /// Resolve a usable calibration manifest for the family, or `None`.
    ///
    /// A manifest whose entries have all gone stale is rebuilt in place from
    /// the images that are still physically present; if even that fails the
    /// caller applies the fallback policy. Calibration unavailability is
    /// never an error here.
    fn resolve_manifest(
        &self,
        spec: &ModelFamilySpec,
        notes: &mut Vec<String>,
    ) -> Result<Option<PathBuf>> {
        let status = calibration_status(&self.calibration_root, spec.calibration_subdir);
        if !status.ready {
            return Ok(None);
        }

        if let Some(manifest) = &status.manifest_path {
            if manifest_has_live_entry(manifest) {
                notes.push(format!(
                    "Calibration manifest resolved ({} samples)",
                    status.count
                ));
                return Ok(Some(manifest.clone()));
            }
        }

        // Images exist but the manifest is missing or stale: regenerate it
        // from the canonical images directory.
        let base = self.calibration_root.join(spec.calibration_subdir);
        match build_calibration_dataset(
            &base,
            &base,
            spec.id,
            CalibrationConfig::DEFAULT_MAX_IMAGES,
        ) {
            Ok(build) => {
                notes.push(format!(
                    "Rebuilt calibration manifest ({} samples)",
                    build.count
                ));
                Ok(Some(build.manifest_path))
            }
            Err(e) => {
                warn!(family = spec.id, "calibration manifest rebuild failed: {e}");
                Ok(None)
            }
        }
    }

    fn default_output_path(
        &self,
        input: &Path,
        device: DeviceProfile,
        quantize: bool,
    ) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "model".to_string());
        let precision = if quantize { "i8" } else { "fp" };
        let timestamp = chrono::Utc::now().timestamp();
        self.output_root.join(format!(
            "{stem}_{device}_{precision}_{timestamp}.{}",
            PathsConfig::ARTIFACT_EXT
        ))
    }
}

/// Whether the manifest lists at least one path that still exists.
fn manifest_has_live_entry(manifest: &Path) -> bool {
    std::fs::read_to_string(manifest)
        .map(|content| {
            content
                .lines()
                .map(str::trim)
                .any(|line| !line.is_empty() && Path::new(line).exists())
        })
        .unwrap_or(false)
}
