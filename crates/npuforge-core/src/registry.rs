//! Model family registry.
//!
//! A static, data-driven capability table: one record per supported model
//! family describing what inputs it accepts, how its source is routed into
//! the toolchain, and which preprocessing constants the compiler must be
//! configured with. Adding a family is adding one record — validation and
//! path selection are free functions over the record, not a class hierarchy.

use serde::Serialize;

use crate::error::{ForgeError, Result};

/// Input geometry (height, width) fed to the graph tracer and compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    pub height: u32,
    pub width: u32,
}

impl Geometry {
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    /// NCHW input shape with a fixed batch of one.
    pub fn input_shape(&self) -> [u32; 4] {
        [1, 3, self.height, self.width]
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// Per-channel normalization constants passed to the compiler's configure
/// stage. Values are in pixel space (0-255); the toolchain applies
/// `(x - mean) / std` per channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

/// Task identity expected of a checkpoint, for families where the training
/// framework records one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskTag {
    Detect,
    Segment,
    Pose,
    Obb,
    Classify,
}

impl TaskTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskTag::Detect => "detect",
            TaskTag::Segment => "segment",
            TaskTag::Pose => "pose",
            TaskTag::Obb => "obb",
            TaskTag::Classify => "classify",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "detect" => Some(TaskTag::Detect),
            "segment" => Some(TaskTag::Segment),
            "pose" => Some(TaskTag::Pose),
            "obb" => Some(TaskTag::Obb),
            "classify" => Some(TaskTag::Classify),
            _ => None,
        }
    }

    /// Human-readable name used in mismatch messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskTag::Detect => "object detection",
            TaskTag::Segment => "instance segmentation",
            TaskTag::Pose => "pose estimation",
            TaskTag::Obb => "oriented bounding boxes",
            TaskTag::Classify => "classification",
        }
    }
}

impl std::fmt::Display for TaskTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a family's source file reaches the accelerator compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRouting {
    /// Native training-framework checkpoints are accepted and exported to an
    /// intermediate graph before compilation; intermediate input is also fine.
    NativeOrGraph,
    /// Only the intermediate graph form is accepted (no in-house export path
    /// exists for these architectures).
    GraphOnly,
}

/// Immutable capability record for one model family.
#[derive(Debug, Clone)]
pub struct ModelFamilySpec {
    pub id: &'static str,
    pub name: &'static str,
    pub short: &'static str,
    pub description: &'static str,
    /// Lowercase extensions accepted as input, without the dot.
    pub accepted_exts: &'static [&'static str],
    pub routing: SourceRouting,
    /// Expected task label recorded in native checkpoints, when the training
    /// framework stores one.
    pub task: Option<TaskTag>,
    pub default_geometry: Geometry,
    pub normalization: Normalization,
    /// Subdirectory under the calibration root holding this family's samples.
    pub calibration_subdir: &'static str,
    /// Upload hint shown by caller frontends.
    pub hint: &'static str,
}

const YOLO_NORM: Normalization = Normalization {
    mean: [0.0, 0.0, 0.0],
    std: [255.0, 255.0, 255.0],
};

/// The registry. Defined at compile time, never mutated.
pub const FAMILIES: &[ModelFamilySpec] = &[
    ModelFamilySpec {
        id: "yolov8_det",
        name: "YOLOv8 Detection",
        short: "YOLOv8-Det",
        description: "General object detection, outputs boxes and classes",
        accepted_exts: &["pt", "pth", "onnx"],
        routing: SourceRouting::NativeOrGraph,
        task: Some(TaskTag::Detect),
        default_geometry: Geometry::new(640, 640),
        normalization: YOLO_NORM,
        calibration_subdir: "coco",
        hint: "Upload a YOLOv8/YOLOv5 detection .pt or an exported .onnx",
    },
    ModelFamilySpec {
        id: "yolov8_seg",
        name: "YOLOv8 Segmentation",
        short: "YOLOv8-Seg",
        description: "Instance segmentation, outputs boxes and masks",
        accepted_exts: &["pt", "pth", "onnx"],
        routing: SourceRouting::NativeOrGraph,
        task: Some(TaskTag::Segment),
        default_geometry: Geometry::new(640, 640),
        normalization: YOLO_NORM,
        calibration_subdir: "coco",
        hint: "Upload yolov8n-seg.pt / yolov8m-seg.pt or the matching .onnx",
    },
    ModelFamilySpec {
        id: "yolov8_pose",
        name: "YOLOv8 Pose",
        short: "YOLOv8-Pose",
        description: "Keypoint detection, outputs skeleton joint coordinates",
        accepted_exts: &["pt", "pth", "onnx"],
        routing: SourceRouting::NativeOrGraph,
        task: Some(TaskTag::Pose),
        default_geometry: Geometry::new(640, 640),
        normalization: YOLO_NORM,
        calibration_subdir: "coco",
        hint: "Upload yolov8n-pose.pt / yolov8m-pose.pt or the matching .onnx",
    },
    ModelFamilySpec {
        id: "yolov8_obb",
        name: "YOLOv8 Oriented Detection",
        short: "YOLOv8-OBB",
        description: "Rotated-box detection for aerial and remote-sensing scenes",
        accepted_exts: &["pt", "pth", "onnx"],
        routing: SourceRouting::NativeOrGraph,
        task: Some(TaskTag::Obb),
        default_geometry: Geometry::new(1024, 1024),
        normalization: YOLO_NORM,
        calibration_subdir: "coco",
        hint: "Upload yolov8n-obb.pt (DOTA-trained) or the matching .onnx",
    },
    ModelFamilySpec {
        id: "resnet",
        name: "ResNet Classification",
        short: "ResNet",
        description: "ImageNet classification, outputs 1000-class probabilities",
        accepted_exts: &["onnx"],
        routing: SourceRouting::GraphOnly,
        task: None,
        default_geometry: Geometry::new(224, 224),
        // Standard ImageNet normalization in 0-255 pixel space.
        normalization: Normalization {
            mean: [123.675, 116.28, 103.53],
            std: [58.395, 57.12, 57.375],
        },
        calibration_subdir: "imagenet",
        hint: "Upload resnet50-v2-7.onnx or a self-trained classification .onnx",
    },
    ModelFamilySpec {
        id: "retinaface",
        name: "RetinaFace Detection",
        short: "RetinaFace",
        description: "Multi-task face detection, outputs face boxes and landmarks",
        accepted_exts: &["onnx"],
        routing: SourceRouting::GraphOnly,
        task: None,
        // BGR channel means used by the reference preprocessing.
        normalization: Normalization {
            mean: [104.0, 117.0, 123.0],
            std: [1.0, 1.0, 1.0],
        },
        default_geometry: Geometry::new(640, 640),
        calibration_subdir: "face",
        hint: "Upload RetinaFace.onnx exported from the reference PyTorch weights",
    },
];

/// Look up a family record by identifier.
pub fn lookup(family_id: &str) -> Result<&'static ModelFamilySpec> {
    FAMILIES
        .iter()
        .find(|f| f.id == family_id)
        .ok_or_else(|| ForgeError::UnknownFamily {
            family_id: family_id.to_string(),
        })
}

/// Lowercase extension of a filename, without the dot. Empty if none.
pub fn file_extension(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

/// Check that `filename`'s extension is accepted by the family.
///
/// The rejection message names the accepted formats and what was received,
/// so it can be surfaced to the uploader unchanged.
pub fn validate_extension(family_id: &str, filename: &str) -> Result<()> {
    let spec = lookup(family_id)?;
    let ext = file_extension(filename);
    if spec.accepted_exts.contains(&ext.as_str()) {
        return Ok(());
    }
    let accepted = spec
        .accepted_exts
        .iter()
        .map(|e| format!(".{e}"))
        .collect::<Vec<_>>()
        .join(", ");
    Err(ForgeError::Validation {
        field: "model_file".to_string(),
        message: format!(
            "{} only accepts {accepted} files, received .{ext}",
            spec.short
        ),
    })
}

/// Serializable family summary for caller frontends. Does not expose the
/// compiler-internal normalization constants.
#[derive(Debug, Clone, Serialize)]
pub struct FamilyInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub short: &'static str,
    pub description: &'static str,
    pub accepted_exts: &'static [&'static str],
    pub routing: SourceRouting,
    pub default_geometry: Geometry,
    pub calibration_subdir: &'static str,
    pub hint: &'static str,
}

/// Summaries of every registered family, in registry order.
pub fn family_catalog() -> Vec<FamilyInfo> {
    FAMILIES
        .iter()
        .map(|f| FamilyInfo {
            id: f.id,
            name: f.name,
            short: f.short,
            description: f.description,
            accepted_exts: f.accepted_exts,
            routing: f.routing,
            default_geometry: f.default_geometry,
            calibration_subdir: f.calibration_subdir,
            hint: f.hint,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_and_unknown() {
        assert!(lookup("yolov8_det").is_ok());
        assert!(matches!(
            lookup("mobilenet"),
            Err(ForgeError::UnknownFamily { .. })
        ));
    }

    #[test]
    fn test_every_family_accepts_its_own_extensions() {
        for family in FAMILIES {
            for ext in family.accepted_exts {
                let filename = format!("model.{ext}");
                validate_extension(family.id, &filename)
                    .unwrap_or_else(|e| panic!("{} should accept .{ext}: {e}", family.id));
                // Upper-case variants are normalized before matching.
                let upper = format!("model.{}", ext.to_uppercase());
                assert!(validate_extension(family.id, &upper).is_ok());
            }
        }
    }

    #[test]
    fn test_every_family_rejects_foreign_extensions() {
        for family in FAMILIES {
            for ext in ["gguf", "safetensors", "txt", "tflite"] {
                let filename = format!("model.{ext}");
                assert!(
                    validate_extension(family.id, &filename).is_err(),
                    "{} should reject .{ext}",
                    family.id
                );
            }
        }
    }

    #[test]
    fn test_rejection_message_names_accepted_formats() {
        let err = validate_extension("resnet", "model.pt").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains(".onnx"));
        assert!(msg.contains(".pt"));
    }

    #[test]
    fn test_extension_of_extensionless_name() {
        assert_eq!(file_extension("model"), "");
        let err = validate_extension("resnet", "model").unwrap_err();
        assert!(matches!(err, ForgeError::Validation { .. }));
    }

    #[test]
    fn test_graph_only_families_have_no_task() {
        for family in FAMILIES {
            if family.routing == SourceRouting::GraphOnly {
                assert!(family.task.is_none(), "{} is graph-only", family.id);
            }
        }
    }

    #[test]
    fn test_input_shape_is_nchw() {
        let spec = lookup("resnet").unwrap();
        assert_eq!(spec.default_geometry.input_shape(), [1, 3, 224, 224]);
    }
}
