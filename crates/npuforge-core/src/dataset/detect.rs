//! Dataset layout detection.
//!
//! Classifies an arbitrary user-supplied directory into one of a fixed set
//! of known dataset shapes. More specific layouts are checked before generic
//! ones, first match wins:
//!
//! 1. not a directory            -> `Invalid`
//! 2. `images/` subdirectory     -> `Yolo`
//! 3. train/val subdirectory     -> `Coco`
//! 4. >=2 class subdirectories   -> `Imagenet`
//! 5. images at the top level    -> `Plain`
//! 6. images somewhere below     -> `RecursiveFallback`
//! 7. nothing found              -> `Empty`
//!
//! Classification is pure: [`classify`] consumes a pre-enumerated listing
//! plus a [`TreeScanner`], so unit tests can exercise every branch against
//! synthetic trees. [`detect`] is the filesystem-backed entry point.

use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use super::walk;
use crate::config::CalibrationConfig;

/// Tagged classification of a dataset directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Plain,
    Yolo,
    Coco,
    Imagenet,
    RecursiveFallback,
    Empty,
    Invalid,
}

impl DatasetKind {
    /// Kinds the calibration builder can extract samples from.
    pub fn is_usable(&self) -> bool {
        !matches!(self, DatasetKind::Empty | DatasetKind::Invalid)
    }
}

/// Detection result: the classified kind, a human-readable description, the
/// total image count seen, and the directory the builder should scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetFormat {
    pub kind: DatasetKind,
    pub description: String,
    pub image_count: usize,
    /// Format-specific root for sample collection; `None` for unusable kinds.
    pub scan_root: Option<PathBuf>,
}

/// One top-level entry of the directory under classification.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_dir: bool,
}

/// Read-only view of a tree used by the classifier. Kept behind a trait so
/// classification runs against synthetic trees in tests.
pub trait TreeScanner {
    /// Recursive image count under `path`.
    fn count_images(&self, path: &Path) -> usize;
    /// Whether at least one image exists under `path` (bounded probe).
    fn contains_image(&self, path: &Path) -> bool;
}

/// [`TreeScanner`] backed by the real filesystem.
pub struct FsScanner;

impl TreeScanner for FsScanner {
    fn count_images(&self, path: &Path) -> usize {
        walk::count_images(path)
    }

    fn contains_image(&self, path: &Path) -> bool {
        // Shallow probe: class directories keep their samples near the top,
        // so a bounded walk is enough to tell "has images" from "does not".
        WalkDir::new(path)
            .max_depth(CalibrationConfig::CLASS_DIR_PROBE_DEPTH)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .any(|e| walk::is_image_file(&e.file_name().to_string_lossy()))
    }
}

/// Classify a directory from its listing. `root` is only used to build the
/// paths handed to the scanner and recorded as the scan root.
pub fn classify(
    root: &Path,
    entries: &[DirEntryInfo],
    scanner: &dyn TreeScanner,
) -> DatasetFormat {
    // YOLO layout keeps samples in a literal images/ subdirectory.
    if entries.iter().any(|e| e.is_dir && e.name == "images") {
        let images_dir = root.join("images");
        let count = scanner.count_images(&images_dir);
        return DatasetFormat {
            kind: DatasetKind::Yolo,
            description: format!("YOLO layout - images/ subdirectory, {count} images"),
            image_count: count,
            scan_root: Some(images_dir),
        };
    }

    // COCO-style trees name their split directories train2017/, val2017/ etc.
    for entry in entries.iter().filter(|e| e.is_dir) {
        let lower = entry.name.to_lowercase();
        if !(lower.contains("train") || lower.contains("val")) {
            continue;
        }
        let split_dir = root.join(&entry.name);
        let count = scanner.count_images(&split_dir);
        if count > 0 {
            return DatasetFormat {
                kind: DatasetKind::Coco,
                description: format!("COCO layout - {}/ directory, {count} images", entry.name),
                image_count: count,
                scan_root: Some(split_dir),
            };
        }
    }

    // ImageNet-style: one subdirectory per class. Probe a handful of the
    // leading subdirectories; enough hits means class-per-folder.
    let subdirs: Vec<&DirEntryInfo> = entries.iter().filter(|e| e.is_dir).collect();
    if subdirs.len() >= 2 {
        let hits = subdirs
            .iter()
            .take(CalibrationConfig::CLASS_DIR_SAMPLE)
            .filter(|d| scanner.contains_image(&root.join(&d.name)))
            .count();
        if hits >= CalibrationConfig::CLASS_DIR_MIN_HITS {
            let total = scanner.count_images(root);
            return DatasetFormat {
                kind: DatasetKind::Imagenet,
                description: format!(
                    "ImageNet layout - {} class directories, {total} images total",
                    subdirs.len()
                ),
                image_count: total,
                scan_root: Some(root.to_path_buf()),
            };
        }
    }

    // Plain: images sitting directly at the top level.
    let direct = entries
        .iter()
        .filter(|e| !e.is_dir && walk::is_image_file(&e.name))
        .count();
    if direct > 0 {
        return DatasetFormat {
            kind: DatasetKind::Plain,
            description: format!("Flat image directory - {direct} images"),
            image_count: direct,
            scan_root: Some(root.to_path_buf()),
        };
    }

    // Last resort: anything anywhere below.
    let total = scanner.count_images(root);
    if total > 0 {
        return DatasetFormat {
            kind: DatasetKind::RecursiveFallback,
            description: format!("Recursive scan - {total} images found"),
            image_count: total,
            scan_root: Some(root.to_path_buf()),
        };
    }

    DatasetFormat {
        kind: DatasetKind::Empty,
        description: "No image files found in directory".to_string(),
        image_count: 0,
        scan_root: None,
    }
}

/// Detect the layout of the directory at `path` on the real filesystem.
pub fn detect(path: &Path) -> DatasetFormat {
    if !path.is_dir() {
        return DatasetFormat {
            kind: DatasetKind::Invalid,
            description: "Path does not exist or is not a directory".to_string(),
            image_count: 0,
            scan_root: None,
        };
    }

    let mut entries: Vec<DirEntryInfo> = match std::fs::read_dir(path) {
        Ok(iter) => iter
            .filter_map(|e| e.ok())
            .map(|e| DirEntryInfo {
                name: e.file_name().to_string_lossy().to_string(),
                is_dir: e.path().is_dir(),
            })
            .collect(),
        Err(_) => {
            return DatasetFormat {
                kind: DatasetKind::Invalid,
                description: "Directory could not be read".to_string(),
                image_count: 0,
                scan_root: None,
            }
        }
    };
    // Sort so classification does not depend on readdir order.
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    classify(path, &entries, &FsScanner)
}
