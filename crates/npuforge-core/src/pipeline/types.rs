//! Types for conversion jobs.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::DeviceProfile;
use crate::registry::Geometry;

/// Policy applied when quantization is requested but no calibration manifest
/// can be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantFallback {
    /// Demote to reduced-precision compilation and append a warning to the
    /// result message. A missing calibration set degrades output quality but
    /// must not block delivery of a usable binary.
    #[default]
    FloatFallback,
    /// Fail the job instead of silently downgrading.
    Strict,
}

/// Stage of a conversion job.
///
/// Transitions:
///
/// ```text
/// Validating -> Exporting -> ResolvingCalibration -> Compiling -> Completed
///      |            |                                   ^
///      |            +-----------------------------------+   (export done,
///      +------------------------------------------------+    no quantization
///                                                            or graph input)
/// ```
///
/// `Failed` is reachable from every non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStage {
    /// Family lookup, extension and task-identity checks.
    Validating,
    /// Delegating to the checkpoint exporter for an intermediate graph.
    Exporting,
    /// Resolving the calibration manifest (quantized jobs only).
    ResolvingCalibration,
    /// Driving the accelerator compiler through its four stages.
    Compiling,
    /// Terminal: artifact written.
    Completed,
    /// Terminal: job aborted.
    Failed,
}

impl ConversionStage {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: ConversionStage) -> bool {
        use ConversionStage::*;
        if matches!(self, Completed | Failed) {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Validating, Exporting)
                | (Validating, ResolvingCalibration)
                | (Validating, Compiling)
                | (Exporting, ResolvingCalibration)
                | (Exporting, Compiling)
                | (ResolvingCalibration, Compiling)
                | (Compiling, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConversionStage::Completed | ConversionStage::Failed)
    }
}

/// A conversion request as supplied by the external caller.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub family_id: String,
    /// Validated path of the uploaded checkpoint or graph.
    pub input_path: PathBuf,
    pub device: DeviceProfile,
    /// Request fixed-point quantization (requires calibration data).
    pub quantize: bool,
    pub fallback: QuantFallback,
    /// Input geometry override; the family default applies when omitted.
    pub geometry: Option<Geometry>,
    /// Explicit destination; derived from the input name, device profile and
    /// timestamp when omitted.
    pub output_path: Option<PathBuf>,
}

impl ConversionRequest {
    pub fn new(
        family_id: impl Into<String>,
        input_path: impl Into<PathBuf>,
        device: DeviceProfile,
    ) -> Self {
        Self {
            family_id: family_id.into(),
            input_path: input_path.into(),
            device,
            quantize: true,
            fallback: QuantFallback::default(),
            geometry: None,
            output_path: None,
        }
    }
}

/// Per-call job state. Owned exclusively by the call stack executing the
/// conversion; no job history is retained.
#[derive(Debug)]
pub struct ConversionJob {
    pub stage: ConversionStage,
    pub family_id: String,
    pub device: DeviceProfile,
    pub geometry: Geometry,
    pub quantize: bool,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

impl ConversionJob {
    /// Move to `next`, asserting the transition is defined.
    pub fn advance(&mut self, next: ConversionStage) {
        debug_assert!(
            self.stage.can_transition_to(next),
            "illegal stage transition {:?} -> {:?}",
            self.stage,
            next
        );
        tracing::debug!(family = %self.family_id, from = ?self.stage, to = ?next, "stage");
        self.stage = next;
    }
}

/// Caller-facing result of one conversion request.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutcome {
    pub success: bool,
    /// Multi-line: per-stage notes and warnings in order, failure reason last.
    pub message: String,
    /// Path of the emitted artifact; `None` on failure.
    pub output_path: Option<PathBuf>,
    /// Whether the artifact was actually quantized. False when the fallback
    /// policy demoted a quantization request.
    pub quantized: bool,
}
