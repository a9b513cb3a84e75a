//! Calibration dataset builder.
//!
//! Extracts a bounded, shuffled sample of images from a detected dataset
//! directory into the canonical calibration layout and rewrites the manifest
//! the quantizer reads. The manifest is regenerated wholesale on every build;
//! nothing is appended incrementally.
//!
//! Concurrent builds for the same family are a caller responsibility to
//! avoid: the manifest write is last-writer-wins with no locking.

use std::path::{Path, PathBuf};

use tracing::info;

use super::detect::{detect, DatasetKind};
use super::walk;
use crate::config::PathsConfig;
use crate::error::{ForgeError, Result};
use crate::registry;

/// Result of a successful calibration build.
#[derive(Debug, Clone)]
pub struct CalibrationBuild {
    pub message: String,
    pub count: usize,
    pub manifest_path: PathBuf,
}

/// Readiness snapshot for one family's calibration directory.
#[derive(Debug, Clone)]
pub struct CalibrationStatus {
    pub ready: bool,
    pub count: usize,
    /// Present only when the manifest file exists on disk.
    pub manifest_path: Option<PathBuf>,
    pub images_dir: PathBuf,
}

/// Whether two paths resolve to the identical file on disk.
fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}

/// Build a calibration dataset for `family_id` from `dataset_path`.
///
/// Detects the directory layout, collects up to `max_images` samples from
/// the layout's scan root, copies them into `output_dir/images/`, and
/// rewrites `output_dir/dataset.txt` with the absolute destination paths.
///
/// A basename collision with a different source file gets a numeric suffix;
/// a source that already is its own destination is left in place, so
/// re-running over a prepared directory is idempotent.
pub fn build_calibration_dataset(
    dataset_path: &Path,
    output_dir: &Path,
    family_id: &str,
    max_images: usize,
) -> Result<CalibrationBuild> {
    registry::lookup(family_id)?;

    let format = detect(dataset_path);
    if !format.kind.is_usable() {
        return Err(ForgeError::Validation {
            field: "dataset_path".to_string(),
            message: format!(
                "cannot extract calibration images from {}: {}",
                dataset_path.display(),
                format.description
            ),
        });
    }

    info!(
        family = family_id,
        kind = ?format.kind,
        "calibration source detected: {}",
        format.description
    );

    // The detector records where samples actually live (images/ for YOLO,
    // the split directory for COCO, the directory itself otherwise).
    let scan_root = format
        .scan_root
        .clone()
        .unwrap_or_else(|| dataset_path.to_path_buf());

    let images = walk::collect_images(&scan_root, Some(max_images));
    if images.is_empty() {
        return Err(ForgeError::Validation {
            field: "dataset_path".to_string(),
            message: "no image files found in dataset".to_string(),
        });
    }

    let images_out = output_dir.join(PathsConfig::IMAGES_DIR_NAME);
    std::fs::create_dir_all(&images_out)
        .map_err(|e| ForgeError::io_with_path(e, &images_out))?;

    let mut copied: Vec<PathBuf> = Vec::new();
    for src in &images {
        let file_name = src
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());
        let mut dest = images_out.join(&file_name);

        if dest.exists() && !same_file(src, &dest) {
            // Same basename, different file: disambiguate before the extension,
            // counting up until a free name (an occupied one must not be
            // overwritten by a later sample).
            let (stem, ext) = match file_name.rsplit_once('.') {
                Some((s, e)) => (s.to_string(), format!(".{e}")),
                None => (file_name.clone(), String::new()),
            };
            let mut n = 1;
            dest = loop {
                let candidate = images_out.join(format!("{stem}_{n}{ext}"));
                if !candidate.exists() || same_file(src, &candidate) {
                    break candidate;
                }
                n += 1;
            };
        }

        if !same_file(src, &dest) {
            std::fs::copy(src, &dest).map_err(|e| ForgeError::io_with_path(e, &dest))?;
        }

        let absolute = std::fs::canonicalize(&dest)
            .map_err(|e| ForgeError::io_with_path(e, &dest))?;
        copied.push(absolute);
    }

    let manifest_path = output_dir.join(PathsConfig::MANIFEST_FILENAME);
    let mut manifest = String::new();
    for path in &copied {
        manifest.push_str(&path.to_string_lossy());
        manifest.push('\n');
    }
    std::fs::write(&manifest_path, manifest)
        .map_err(|e| ForgeError::io_with_path(e, &manifest_path))?;

    let message = format!(
        "Extracted {} calibration images ({}), wrote {}",
        copied.len(),
        format.description,
        PathsConfig::MANIFEST_FILENAME
    );
    info!(family = family_id, count = copied.len(), "{message}");

    Ok(CalibrationBuild {
        message,
        count: copied.len(),
        manifest_path,
    })
}

/// Report calibration readiness for `<calibration_root>/<subdir>`.
///
/// Ready when the manifest lists at least one currently-existing path, or
/// the images directory physically holds at least one image. The second leg
/// tolerates a manifest written against paths that were later reorganized.
pub fn calibration_status(calibration_root: &Path, subdir: &str) -> CalibrationStatus {
    let base = calibration_root.join(subdir);
    let manifest = base.join(PathsConfig::MANIFEST_FILENAME);
    let images_dir = base.join(PathsConfig::IMAGES_DIR_NAME);

    let mut manifest_count = 0;
    let manifest_exists = manifest.exists();
    if manifest_exists {
        if let Ok(content) = std::fs::read_to_string(&manifest) {
            manifest_count = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && Path::new(line).exists())
                .count();
        }
    }

    let image_count = if images_dir.is_dir() {
        std::fs::read_dir(&images_dir)
            .map(|iter| {
                iter.filter_map(|e| e.ok())
                    .filter(|e| walk::is_image_file(&e.file_name().to_string_lossy()))
                    .count()
            })
            .unwrap_or(0)
    } else {
        0
    };

    CalibrationStatus {
        ready: manifest_count > 0 || image_count > 0,
        count: manifest_count.max(image_count),
        manifest_path: manifest_exists.then_some(manifest),
        images_dir,
    }
}
