//! Calibration dataset subsystem.
//!
//! [`walk`] owns the recursive image collection, [`detect`] classifies a
//! directory's layout into one of the known dataset shapes, and [`builder`]
//! turns a classified directory into the canonical calibration layout the
//! quantizer consumes (`<root>/<family_subdir>/images/` plus `dataset.txt`).

pub mod builder;
pub mod detect;
pub mod walk;

pub use builder::{
    build_calibration_dataset, calibration_status, CalibrationBuild, CalibrationStatus,
};
pub use detect::{detect, DatasetFormat, DatasetKind, FsScanner, TreeScanner};
pub use walk::{collect_images, count_images, is_image_file, IMAGE_EXTENSIONS};
