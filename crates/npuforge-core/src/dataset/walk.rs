//! Recursive image collection.
//!
//! All scans deduplicate by path and shuffle before any truncation, so a
//! bounded sample is representative of the whole tree rather than biased
//! toward whatever the directory listing returns first.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use walkdir::WalkDir;

/// Image extensions accepted as calibration samples.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

/// Whether a file name carries an accepted image extension.
/// Matching is case-insensitive, so `photo.JPEG` and `photo.jpeg` both pass.
pub fn is_image_file(name: &str) -> bool {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    IMAGE_EXTENSIONS.contains(&ext.as_str())
}

/// Recursively collect image paths under `root`, shuffled, capped at `max`
/// when one is given. Unreadable entries are skipped rather than failing the
/// whole scan.
pub fn collect_images(root: &Path, max: Option<usize>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut found: Vec<PathBuf> = Vec::new();

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !is_image_file(&name) {
            continue;
        }
        let path = entry.path().to_path_buf();
        if seen.insert(path.clone()) {
            found.push(path);
        }
    }

    found.shuffle(&mut rand::rng());
    if let Some(max) = max {
        found.truncate(max);
    }
    found
}

/// Total number of images under `root`, without materializing a sample.
pub fn count_images(root: &Path) -> usize {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| is_image_file(&e.file_name().to_string_lossy()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"img").unwrap();
    }

    #[test]
    fn test_is_image_file_variants() {
        assert!(is_image_file("a.jpg"));
        assert!(is_image_file("a.JPEG"));
        assert!(is_image_file("a.Png"));
        assert!(!is_image_file("a.txt"));
        assert!(!is_image_file("jpg"));
        assert!(!is_image_file("labels.json"));
    }

    #[test]
    fn test_collect_respects_cap() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10 {
            touch(&dir.path().join(format!("img_{i}.jpg")));
        }
        let all = collect_images(dir.path(), None);
        assert_eq!(all.len(), 10);
        let capped = collect_images(dir.path(), Some(4));
        assert_eq!(capped.len(), 4);
        for p in &capped {
            assert!(p.exists());
        }
    }

    #[test]
    fn test_collect_recurses_and_skips_non_images() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a/b/c/deep.png"));
        touch(&dir.path().join("top.bmp"));
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        assert_eq!(count_images(dir.path()), 2);
        assert_eq!(collect_images(dir.path(), None).len(), 2);
    }

    #[test]
    fn test_count_of_missing_dir_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(count_images(&dir.path().join("absent")), 0);
    }
}
