//! npuforge core - headless library for converting model checkpoints into
//! NPU device binaries.
//!
//! The crate covers the conversion pipeline and the calibration-dataset
//! subsystem: a static model-family registry, a dataset layout detector, a
//! calibration dataset builder, and a staged conversion engine that moves a
//! checkpoint through zero, one, or two format transformations
//! (checkpoint -> intermediate graph -> accelerator binary). Quantization
//! arithmetic and graph tracing are delegated to external toolchain
//! collaborators behind traits.
//!
//! # Example
//!
//! ```rust,ignore
//! use npuforge_core::{ConversionRequest, DeviceProfile, ForgeApi};
//!
//! #[tokio::main]
//! async fn main() -> npuforge_core::Result<()> {
//!     let api = ForgeApi::new("./forge-data")?;
//!
//!     api.prepare_calibration("./my-dataset".as_ref(), "yolov8_det", None)?;
//!
//!     let request = ConversionRequest::new(
//!         "yolov8_det",
//!         "./forge-data/uploads/best.pt",
//!         DeviceProfile::Rk3576,
//!     );
//!     let outcome = api.convert(request).await;
//!     println!("{}", outcome.message);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod pipeline;
pub mod registry;

mod api;

// Re-export commonly used types
pub use api::{ForgeApi, OutputArtifact};
pub use backend::{AcceleratorSdk, CheckpointExporter, CompilerSession, ToolkitSdk, TorchExporter};
pub use checkpoint::{SourceForm, TaskCheck};
pub use config::{CalibrationConfig, DeviceProfile, PathsConfig};
pub use dataset::{
    build_calibration_dataset, calibration_status, detect, CalibrationBuild, CalibrationStatus,
    DatasetFormat, DatasetKind,
};
pub use error::{CompileStage, ForgeError, Result};
pub use pipeline::{
    ConversionOutcome, ConversionPipeline, ConversionRequest, ConversionStage, QuantFallback,
};
pub use registry::{
    family_catalog, lookup, validate_extension, FamilyInfo, Geometry, ModelFamilySpec,
    Normalization, SourceRouting, TaskTag,
};
