//! Checkpoint introspection.
//!
//! Analyzes source files by content to determine:
//! - Source form (native pickle checkpoint, traced TorchScript graph, ONNX graph)
//! - The task label a native checkpoint was trained for, when recoverable
//!
//! Task recovery is deliberately shallow: it reads archive entry names and a
//! bounded slice of the embedded pickle, never deserializing the checkpoint.
//! An unreadable task is reported as inconclusive, not as a failure —
//! blocking a conversion because a checkpoint could not be introspected is
//! worse than letting an ambiguous model through.

use std::io::Read;
use std::path::Path;

use crate::error::{ForgeError, Result};
use crate::registry::{ModelFamilySpec, TaskTag};

/// Magic bytes for source format detection.
mod magic {
    /// ZIP header (modern PyTorch .pt archives and TorchScript files)
    pub const ZIP: &[u8; 4] = &[0x50, 0x4B, 0x03, 0x04];
    /// Pickle protocol markers (legacy bare-pickle checkpoints)
    pub const PICKLE_V2: u8 = 0x80;
    pub const PICKLE_PROTO_MIN: u8 = 2;
    pub const PICKLE_PROTO_MAX: u8 = 5;
    /// ONNX files are protobuf; the first field of a ModelProto is the
    /// ir_version varint tagged 0x08.
    pub const ONNX_IR_TAG: u8 = 0x08;
}

/// How far into the embedded pickle the task scan will read.
const TASK_SCAN_LIMIT: usize = 4 * 1024 * 1024;

/// Classified form of a conversion source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceForm {
    /// Native training-framework checkpoint; needs a graph export before the
    /// compiler can consume it.
    NativeCheckpoint,
    /// Traced TorchScript archive — already in intermediate-graph form.
    TorchScriptGraph,
    /// ONNX graph — already in intermediate-graph form.
    OnnxGraph,
    Unknown,
}

impl SourceForm {
    /// True when the compiler can load this file directly, with no export.
    pub fn is_intermediate(&self) -> bool {
        matches!(self, SourceForm::TorchScriptGraph | SourceForm::OnnxGraph)
    }
}

/// Outcome of the task-identity check for a checkpoint.
///
/// A confirmed mismatch is returned as `ForgeError::TaskMismatch` by
/// [`validate_task_identity`]; this type only covers the non-failing cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskCheck {
    /// The family declares no expected task.
    NotRequired,
    /// Checkpoint task label matched the family's expectation.
    Confirmed { task: TaskTag },
    /// The task could not be determined; conversion proceeds with a warning.
    Inconclusive { reason: String },
}

impl TaskCheck {
    /// Warning text to append to the conversion result, if any.
    pub fn warning(&self) -> Option<String> {
        match self {
            TaskCheck::Inconclusive { reason } => Some(format!(
                "could not verify checkpoint task ({reason}), continuing with conversion"
            )),
            _ => None,
        }
    }
}

/// Classify a source file by magic bytes and archive contents.
pub fn classify_source(path: &Path) -> Result<SourceForm> {
    let mut file =
        std::fs::File::open(path).map_err(|e| ForgeError::io_with_path(e, path))?;

    let mut header = [0u8; 8];
    let bytes_read = file
        .read(&mut header)
        .map_err(|e| ForgeError::io_with_path(e, path))?;
    if bytes_read < 4 {
        return Ok(SourceForm::Unknown);
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    if &header[..4] == magic::ZIP {
        // Both plain checkpoints and TorchScript traces are ZIP archives; a
        // trace is distinguished by its constants.pkl entry.
        return Ok(if zip_has_constants_entry(path)? {
            SourceForm::TorchScriptGraph
        } else {
            SourceForm::NativeCheckpoint
        });
    }

    if header[0] == magic::PICKLE_V2
        && header[1] >= magic::PICKLE_PROTO_MIN
        && header[1] <= magic::PICKLE_PROTO_MAX
    {
        return Ok(SourceForm::NativeCheckpoint);
    }

    if extension == "onnx" || header[0] == magic::ONNX_IR_TAG {
        return Ok(SourceForm::OnnxGraph);
    }

    // Extension fallback for files whose header we do not recognize.
    Ok(match extension.as_str() {
        "pt" | "pth" | "ckpt" => SourceForm::NativeCheckpoint,
        _ => SourceForm::Unknown,
    })
}

/// Whether the ZIP archive at `path` contains a TorchScript constants entry.
fn zip_has_constants_entry(path: &Path) -> Result<bool> {
    let file = std::fs::File::open(path).map_err(|e| ForgeError::io_with_path(e, path))?;
    let archive = match zip::ZipArchive::new(file) {
        Ok(a) => a,
        // Truncated or exotic archives are not graphs; let the export path
        // report the real problem.
        Err(_) => return Ok(false),
    };
    let has_constants = archive
        .file_names()
        .any(|name| name == "constants.pkl" || name.ends_with("/constants.pkl"));
    Ok(has_constants)
}

/// Recover the training-task label embedded in a native checkpoint.
///
/// Scans the archive's pickle payload for a `task` marker followed by a known
/// label. Returns `None` when no label can be found; errors only on I/O.
pub fn probe_task_tag(path: &Path) -> Result<Option<TaskTag>> {
    let file = std::fs::File::open(path).map_err(|e| ForgeError::io_with_path(e, path))?;
    let mut archive = match zip::ZipArchive::new(file) {
        Ok(a) => a,
        Err(_) => return Ok(None),
    };

    // The training args live in the main data.pkl payload.
    let pickle_name = archive
        .file_names()
        .find(|name| *name == "data.pkl" || name.ends_with("/data.pkl"))
        .map(str::to_string);
    let Some(pickle_name) = pickle_name else {
        return Ok(None);
    };

    let mut entry = archive
        .by_name(&pickle_name)
        .map_err(|e| ForgeError::Other(format!("reading checkpoint archive: {e}")))?;
    let mut buf = Vec::new();
    entry
        .by_ref()
        .take(TASK_SCAN_LIMIT as u64)
        .read_to_end(&mut buf)
        .map_err(|e| ForgeError::io_with_path(e, path))?;

    Ok(scan_for_task_label(&buf))
}

/// Find a task label near a `task` key in raw pickle bytes.
fn scan_for_task_label(buf: &[u8]) -> Option<TaskTag> {
    const KEY: &[u8] = b"task";
    const WINDOW: usize = 32;
    // Longest label first so "detect" cannot shadow nothing and "obb" cannot
    // match inside a longer word before it is tried.
    const LABELS: [(&[u8], TaskTag); 5] = [
        (b"classify", TaskTag::Classify),
        (b"segment", TaskTag::Segment),
        (b"detect", TaskTag::Detect),
        (b"pose", TaskTag::Pose),
        (b"obb", TaskTag::Obb),
    ];

    let mut offset = 0;
    while let Some(pos) = find_subslice(&buf[offset..], KEY) {
        let key_end = offset + pos + KEY.len();
        // Skip composite keys such as "multitasking" or "task_map".
        let window_end = (key_end + WINDOW).min(buf.len());
        let window = &buf[key_end..window_end];
        for (label, tag) in LABELS {
            if let Some(label_pos) = find_subslice(window, label) {
                // A label directly glued to the key is part of another word.
                if label_pos > 0 {
                    return Some(tag);
                }
            }
        }
        offset = key_end;
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Verify a checkpoint's task identity against its family's expectation.
///
/// Hard-fails only on a *confirmed* mismatch. A checkpoint whose task cannot
/// be determined soft-passes with a warning; failing to introspect a
/// checkpoint must not block conversion.
pub fn validate_task_identity(spec: &ModelFamilySpec, path: &Path) -> Result<TaskCheck> {
    let Some(expected) = spec.task else {
        return Ok(TaskCheck::NotRequired);
    };

    let actual = match probe_task_tag(path) {
        Ok(Some(tag)) => tag,
        Ok(None) => {
            return Ok(TaskCheck::Inconclusive {
                reason: "no task label found in checkpoint".to_string(),
            })
        }
        Err(e) => {
            return Ok(TaskCheck::Inconclusive {
                reason: e.to_string(),
            })
        }
    };

    if actual != expected {
        return Err(ForgeError::TaskMismatch {
            expected: format!("{} ({})", expected.display_name(), expected),
            actual: format!("{} ({})", actual.display_name(), actual),
        });
    }
    Ok(TaskCheck::Confirmed { task: actual })
}
