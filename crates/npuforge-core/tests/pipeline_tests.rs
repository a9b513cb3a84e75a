//! Integration tests for the conversion pipeline.
//!
//! The vendor toolchain is replaced by recording fakes so every routing and
//! failure-recovery decision is observable: which collaborators were called,
//! in what order, with which flags, and whether the session and job-scoped
//! files were cleaned up on each terminal path.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use npuforge_core::{
    AcceleratorSdk, CheckpointExporter, CompilerSession, CompileStage, ConversionRequest,
    DeviceProfile, ForgeApi, ForgeError, Geometry, Normalization, QuantFallback,
};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (name, data) in entries {
        writer
            .start_file(name.to_string(), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

/// A traced graph: ZIP archive with a constants.pkl entry.
fn write_torchscript(path: &Path) {
    write_zip(
        path,
        &[
            ("model/data.pkl", b"\x80\x02}q\x00."),
            ("model/constants.pkl", b"\x80\x02]q\x00."),
        ],
    );
}

/// A native checkpoint carrying the given task label.
fn write_checkpoint(path: &Path, task: &[u8]) {
    let mut payload = b"\x8c\x04task\x94\x8c\x06".to_vec();
    payload.extend_from_slice(task);
    payload.push(0x94);
    write_zip(path, &[("ckpt/data.pkl", &payload)]);
}

fn write_onnx(path: &Path) {
    std::fs::write(path, [0x08, 0x07, 0x12, 0x04, 0x74, 0x65, 0x73, 0x74]).unwrap();
}

// ---------------------------------------------------------------------------
// Recording fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    sessions_opened: AtomicUsize,
    sessions_released: AtomicUsize,
}

impl Recorder {
    fn log(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

struct FakeExporter {
    recorder: Arc<Recorder>,
    fail_with: Option<String>,
}

#[async_trait]
impl CheckpointExporter for FakeExporter {
    async fn export(&self, checkpoint: &Path, geometry: Geometry) -> npuforge_core::Result<PathBuf> {
        self.recorder
            .log(format!("export:{}:{}", checkpoint.display(), geometry));
        if let Some(message) = &self.fail_with {
            return Err(ForgeError::Export {
                message: message.clone(),
            });
        }
        let graph = checkpoint.with_extension("traced.torchscript");
        std::fs::write(&graph, b"traced graph").unwrap();
        Ok(graph)
    }
}

struct FakeSdk {
    recorder: Arc<Recorder>,
    fail_stage: Option<CompileStage>,
}

#[async_trait]
impl AcceleratorSdk for FakeSdk {
    async fn open_session(&self) -> npuforge_core::Result<Box<dyn CompilerSession>> {
        self.recorder.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            recorder: self.recorder.clone(),
            fail_stage: self.fail_stage,
        }))
    }
}

struct FakeSession {
    recorder: Arc<Recorder>,
    fail_stage: Option<CompileStage>,
}

impl FakeSession {
    fn check(&self, stage: CompileStage) -> npuforge_core::Result<()> {
        if self.fail_stage == Some(stage) {
            return Err(ForgeError::CompilerStage {
                stage,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CompilerSession for FakeSession {
    async fn configure(
        &mut self,
        _normalization: &Normalization,
        device: DeviceProfile,
    ) -> npuforge_core::Result<()> {
        self.recorder.log(format!("configure:{device}"));
        self.check(CompileStage::Configure)
    }

    async fn load(&mut self, graph: &Path, input_shape: [u32; 4]) -> npuforge_core::Result<()> {
        self.recorder.log(format!(
            "load:{}:{}x{}",
            graph.display(),
            input_shape[2],
            input_shape[3]
        ));
        self.check(CompileStage::Load)
    }

    async fn build(&mut self, quantize: bool, manifest: Option<&Path>) -> npuforge_core::Result<()> {
        self.recorder.log(format!(
            "build:quant={quantize}:manifest={}",
            manifest.map(|m| m.display().to_string()).unwrap_or_default()
        ));
        self.check(CompileStage::Build)
    }

    async fn export(&mut self, output: &Path) -> npuforge_core::Result<()> {
        self.check(CompileStage::Export)?;
        std::fs::write(output, b"RKNN artifact").unwrap();
        self.recorder.log(format!("artifact:{}", output.display()));
        Ok(())
    }

    async fn release(&mut self) {
        self.recorder
            .sessions_released
            .fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    _root: TempDir,
    api: ForgeApi,
    recorder: Arc<Recorder>,
    uploads: PathBuf,
}

impl Harness {
    fn new() -> Self {
        Self::with_failures(None, None)
    }

    fn with_failures(export_error: Option<&str>, fail_stage: Option<CompileStage>) -> Self {
        let root = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let api = ForgeApi::with_collaborators(
            root.path(),
            Arc::new(FakeExporter {
                recorder: recorder.clone(),
                fail_with: export_error.map(String::from),
            }),
            Arc::new(FakeSdk {
                recorder: recorder.clone(),
                fail_stage,
            }),
        )
        .unwrap();
        let uploads = api.uploads_dir();
        Self {
            _root: root,
            api,
            recorder,
            uploads,
        }
    }

    fn event_count(&self, prefix: &str) -> usize {
        self.recorder
            .events()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_graph_input_skips_export() {
    let h = Harness::new();
    let input = h.uploads.join("resnet50.onnx");
    write_onnx(&input);

    let mut request = ConversionRequest::new("resnet", &input, DeviceProfile::Rk3588);
    request.quantize = false;
    let outcome = h.api.convert(request).await;

    assert!(outcome.success, "{}", outcome.message);
    assert!(outcome.message.contains("skipping export"));
    assert_eq!(h.event_count("export:"), 0);
    // The compiler loads the uploaded graph itself.
    let events = h.recorder.events();
    assert!(events.iter().any(|e| e.starts_with("load:") && e.contains("resnet50.onnx")));
    assert!(events.iter().any(|e| e == "build:quant=false:manifest="));
    let output = outcome.output_path.unwrap();
    assert!(output.exists());
    assert!(output.to_string_lossy().ends_with(".rknn"));
}

#[tokio::test]
async fn test_native_checkpoint_exports_then_compiles() {
    let h = Harness::new();
    let input = h.uploads.join("best.pt");
    write_checkpoint(&input, b"detect");

    let mut request = ConversionRequest::new("yolov8_det", &input, DeviceProfile::Rk3576);
    request.quantize = false;
    let outcome = h.api.convert(request).await;

    assert!(outcome.success, "{}", outcome.message);
    assert!(outcome.message.contains("Checkpoint task verified"));
    assert_eq!(h.event_count("export:"), 1);

    // The exporter traced at the family's default geometry.
    let events = h.recorder.events();
    assert!(events.iter().any(|e| e.starts_with("export:") && e.ends_with("640x640")));
    // The compiler loaded the traced graph, not the checkpoint.
    assert!(events.iter().any(|e| e.starts_with("load:") && e.contains("traced.torchscript")));
}

#[tokio::test]
async fn test_graph_only_family_rejects_native_checkpoint_preflight() {
    let h = Harness::new();
    // Right extension, wrong content: a native checkpoint posing as a graph.
    let input = h.uploads.join("resnet.onnx");
    write_zip(&input, &[("ckpt/data.pkl", b"\x80\x02}q\x00.")]);

    let outcome = h
        .api
        .convert(ConversionRequest::new("resnet", &input, DeviceProfile::Rk3576))
        .await;

    assert!(!outcome.success);
    assert!(outcome.message.contains("native checkpoint"));
    // Failed before any delegation: no export, no session.
    assert_eq!(h.event_count("export:"), 0);
    assert_eq!(h.recorder.sessions_opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rejected_extension_fails_before_anything() {
    let h = Harness::new();
    let input = h.uploads.join("model.pt");
    write_torchscript(&input);

    let outcome = h
        .api
        .convert(ConversionRequest::new("resnet", &input, DeviceProfile::Rk3576))
        .await;

    assert!(!outcome.success);
    assert!(outcome.message.contains(".onnx"));
    assert_eq!(h.recorder.events().len(), 0);
}

#[tokio::test]
async fn test_unknown_family_fails() {
    let h = Harness::new();
    let input = h.uploads.join("model.pt");
    write_torchscript(&input);

    let outcome = h
        .api
        .convert(ConversionRequest::new("yolo_v99", &input, DeviceProfile::Rk3576))
        .await;

    assert!(!outcome.success);
    assert!(outcome.message.contains("Unknown model family"));
}

#[tokio::test]
async fn test_task_mismatch_fails_before_export() {
    let h = Harness::new();
    let input = h.uploads.join("actually_segmentation.pt");
    write_checkpoint(&input, b"segment");

    let mut request = ConversionRequest::new("yolov8_det", &input, DeviceProfile::Rk3576);
    request.quantize = false;
    let outcome = h.api.convert(request).await;

    assert!(!outcome.success);
    assert!(outcome.message.contains("task mismatch"));
    assert_eq!(h.event_count("export:"), 0);
    assert_eq!(h.recorder.sessions_opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unreadable_task_soft_passes_with_warning() {
    let h = Harness::new();
    let input = h.uploads.join("opaque.pt");
    // A checkpoint the probe cannot read a task from.
    write_zip(&input, &[("ckpt/data.pkl", b"\x80\x02}q\x00.")]);

    let mut request = ConversionRequest::new("yolov8_det", &input, DeviceProfile::Rk3576);
    request.quantize = false;
    let outcome = h.api.convert(request).await;

    assert!(outcome.success, "{}", outcome.message);
    assert!(outcome.message.contains("could not verify checkpoint task"));
}

// ---------------------------------------------------------------------------
// Quantization and fallback policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_calibration_demotes_quantization_with_warning() {
    let h = Harness::new();
    let input = h.uploads.join("traced.pt");
    write_torchscript(&input);

    let outcome = h
        .api
        .convert(ConversionRequest::new(
            "yolov8_det",
            &input,
            DeviceProfile::Rk3576,
        ))
        .await;

    // The job succeeds in reduced precision, with an explicit warning.
    assert!(outcome.success, "{}", outcome.message);
    assert!(!outcome.quantized);
    assert!(outcome.message.contains("without quantization"));
    let events = h.recorder.events();
    assert!(events.iter().any(|e| e == "build:quant=false:manifest="));
    let output = outcome.output_path.unwrap();
    assert!(output.exists());
    // The derived name reflects the precision actually built, not requested.
    assert!(output.to_string_lossy().contains("_fp_"));
}

#[tokio::test]
async fn test_strict_fallback_fails_instead_of_demoting() {
    let h = Harness::new();
    let input = h.uploads.join("traced.pt");
    write_torchscript(&input);

    let mut request = ConversionRequest::new("yolov8_det", &input, DeviceProfile::Rk3576);
    request.fallback = QuantFallback::Strict;
    let outcome = h.api.convert(request).await;

    assert!(!outcome.success);
    assert!(outcome.message.contains("no calibration dataset"));
    // Failed before the compiler was ever involved.
    assert_eq!(h.recorder.sessions_opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_quantized_build_uses_resolved_manifest() {
    let h = Harness::new();

    // Prepare calibration data for the family's subdirectory.
    let dataset = TempDir::new().unwrap();
    for i in 0..5 {
        std::fs::write(dataset.path().join(format!("img_{i}.jpg")), b"img").unwrap();
    }
    let build = h
        .api
        .prepare_calibration(dataset.path(), "yolov8_det", Some(4))
        .unwrap();
    assert_eq!(build.count, 4);

    let input = h.uploads.join("traced.pt");
    write_torchscript(&input);
    let outcome = h
        .api
        .convert(ConversionRequest::new(
            "yolov8_det",
            &input,
            DeviceProfile::Rk3576,
        ))
        .await;

    assert!(outcome.success, "{}", outcome.message);
    assert!(outcome.quantized);
    assert!(outcome.output_path.unwrap().to_string_lossy().contains("_i8_"));
    let events = h.recorder.events();
    assert!(
        events
            .iter()
            .any(|e| e.starts_with("build:quant=true:manifest=") && e.contains("dataset.txt")),
        "build should receive the manifest: {events:?}"
    );
}

#[tokio::test]
async fn test_stale_manifest_is_rebuilt_from_images() {
    let h = Harness::new();

    // Images physically present, manifest pointing at moved paths.
    let base = h.api.calibration_dir().join("coco");
    let images = base.join("images");
    std::fs::create_dir_all(&images).unwrap();
    std::fs::write(images.join("kept.jpg"), b"img").unwrap();
    std::fs::write(base.join("dataset.txt"), "/moved/away/gone.jpg\n").unwrap();

    let input = h.uploads.join("traced.pt");
    write_torchscript(&input);
    let outcome = h
        .api
        .convert(ConversionRequest::new(
            "yolov8_det",
            &input,
            DeviceProfile::Rk3576,
        ))
        .await;

    assert!(outcome.success, "{}", outcome.message);
    assert!(outcome.quantized);
    assert!(outcome.message.contains("Rebuilt calibration manifest"));
}

// ---------------------------------------------------------------------------
// Failure recovery and cleanup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_export_failure_surfaces_collaborator_message() {
    let h = Harness::with_failures(Some("trace diverged on dynamic control flow"), None);
    let input = h.uploads.join("best.pt");
    write_checkpoint(&input, b"detect");

    let mut request = ConversionRequest::new("yolov8_det", &input, DeviceProfile::Rk3576);
    request.quantize = false;
    let outcome = h.api.convert(request).await;

    assert!(!outcome.success);
    // Collaborator failure reported verbatim, never swallowed.
    assert!(outcome.message.contains("trace diverged on dynamic control flow"));
    assert_eq!(h.recorder.sessions_opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_compiler_stage_failure_names_stage_and_releases_session() {
    let h = Harness::with_failures(None, Some(CompileStage::Build));
    let input = h.uploads.join("traced.pt");
    write_torchscript(&input);

    let mut request = ConversionRequest::new("yolov8_det", &input, DeviceProfile::Rk3576);
    request.quantize = false;
    let outcome = h.api.convert(request).await;

    assert!(!outcome.success);
    assert!(outcome.message.contains("build stage failed"));
    assert!(outcome.output_path.is_none());
    assert_eq!(h.recorder.sessions_opened.load(Ordering::SeqCst), 1);
    assert_eq!(h.recorder.sessions_released.load(Ordering::SeqCst), 1);
    // No partial artifact at the destination.
    assert_eq!(h.api.list_outputs().unwrap().len(), 0);
}

#[tokio::test]
async fn test_intermediate_graph_removed_on_success_and_failure() {
    // Success path.
    let h = Harness::new();
    let input = h.uploads.join("best.pt");
    write_checkpoint(&input, b"detect");
    let mut request = ConversionRequest::new("yolov8_det", &input, DeviceProfile::Rk3576);
    request.quantize = false;
    let outcome = h.api.convert(request).await;
    assert!(outcome.success, "{}", outcome.message);
    let traced = input.with_extension("traced.torchscript");
    assert!(!traced.exists(), "temp graph should be removed on success");

    // Failure path: compiler dies at load, after the export happened.
    let h = Harness::with_failures(None, Some(CompileStage::Load));
    let input = h.uploads.join("best.pt");
    write_checkpoint(&input, b"detect");
    let mut request = ConversionRequest::new("yolov8_det", &input, DeviceProfile::Rk3576);
    request.quantize = false;
    let outcome = h.api.convert(request).await;
    assert!(!outcome.success);
    assert_eq!(h.event_count("export:"), 1);
    let traced = input.with_extension("traced.torchscript");
    assert!(!traced.exists(), "temp graph should be removed on failure");
    assert_eq!(h.recorder.sessions_released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_explicit_output_path_and_geometry_are_honored() {
    let h = Harness::new();
    let input = h.uploads.join("resnet50.onnx");
    write_onnx(&input);

    let custom_out = h.api.output_dir().join("custom_name.rknn");
    let mut request = ConversionRequest::new("resnet", &input, DeviceProfile::Rk3562);
    request.quantize = false;
    request.output_path = Some(custom_out.clone());
    request.geometry = Some(Geometry::new(256, 320));
    let outcome = h.api.convert(request).await;

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.output_path.as_deref(), Some(custom_out.as_path()));
    let events = h.recorder.events();
    assert!(events.iter().any(|e| e == "configure:rk3562"));
    assert!(events.iter().any(|e| e.starts_with("load:") && e.ends_with("256x320")));
}
