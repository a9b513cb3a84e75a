//! Centralized configuration for the npuforge core.
//!
//! Directory names, calibration tunables, and the supported NPU device
//! profiles live here so every subsystem agrees on the on-disk layout.

use std::time::Duration;

/// Shared directory and file name configuration.
pub struct PathsConfig;

impl PathsConfig {
    pub const UPLOADS_DIR_NAME: &'static str = "uploads";
    pub const OUTPUT_DIR_NAME: &'static str = "output";
    pub const CALIBRATION_DIR_NAME: &'static str = "calibration_data";
    pub const IMAGES_DIR_NAME: &'static str = "images";
    pub const MANIFEST_FILENAME: &'static str = "dataset.txt";
    pub const SCRIPTS_DIR_NAME: &'static str = "toolkit-scripts";
    pub const VENV_DIR_NAME: &'static str = "toolkit-venv";
    /// Extension of the compiled accelerator binary.
    pub const ARTIFACT_EXT: &'static str = "rknn";
}

/// Calibration dataset tunables.
pub struct CalibrationConfig;

impl CalibrationConfig {
    /// Images extracted per build unless the caller asks for fewer.
    pub const DEFAULT_MAX_IMAGES: usize = 50;
    /// How many subdirectories to probe when testing for a class-per-folder
    /// layout, and how many of them must contain images.
    pub const CLASS_DIR_SAMPLE: usize = 5;
    pub const CLASS_DIR_MIN_HITS: usize = 2;
    /// Directory depth of the per-subdirectory probe during layout detection.
    pub const CLASS_DIR_PROBE_DEPTH: usize = 2;
}

/// Collaborator subprocess tunables.
pub struct ToolkitConfig;

impl ToolkitConfig {
    /// Graph export is a one-shot trace; builds can take far longer on
    /// large calibration sets.
    pub const EXPORT_TIMEOUT: Duration = Duration::from_secs(600);
    pub const STAGE_TIMEOUT: Duration = Duration::from_secs(1800);
    pub const VENV_CREATION_TIMEOUT: Duration = Duration::from_secs(120);
    pub const DEFAULT_OPTIMIZATION_LEVEL: u8 = 3;
}

/// Target NPU device profiles supported by the toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceProfile {
    Rk3562,
    Rk3566,
    Rk3568,
    Rk3576,
    Rk3588,
}

impl DeviceProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceProfile::Rk3562 => "rk3562",
            DeviceProfile::Rk3566 => "rk3566",
            DeviceProfile::Rk3568 => "rk3568",
            DeviceProfile::Rk3576 => "rk3576",
            DeviceProfile::Rk3588 => "rk3588",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rk3562" => Some(DeviceProfile::Rk3562),
            "rk3566" => Some(DeviceProfile::Rk3566),
            "rk3568" => Some(DeviceProfile::Rk3568),
            "rk3576" => Some(DeviceProfile::Rk3576),
            "rk3588" => Some(DeviceProfile::Rk3588),
            _ => None,
        }
    }

    pub fn all() -> &'static [DeviceProfile] {
        &[
            DeviceProfile::Rk3562,
            DeviceProfile::Rk3566,
            DeviceProfile::Rk3568,
            DeviceProfile::Rk3576,
            DeviceProfile::Rk3588,
        ]
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        DeviceProfile::Rk3576
    }
}

impl std::fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_profile_roundtrip() {
        for profile in DeviceProfile::all() {
            let s = profile.as_str();
            let parsed = DeviceProfile::from_str(s).expect("Should parse");
            assert_eq!(*profile, parsed);
        }
    }

    #[test]
    fn test_device_profile_rejects_unknown() {
        assert!(DeviceProfile::from_str("rk9999").is_none());
        assert!(DeviceProfile::from_str("").is_none());
    }

    #[test]
    fn test_device_profile_case_insensitive() {
        assert_eq!(
            DeviceProfile::from_str("RK3588"),
            Some(DeviceProfile::Rk3588)
        );
    }

    #[test]
    fn test_tunables_are_reasonable() {
        assert!(CalibrationConfig::DEFAULT_MAX_IMAGES > 0);
        assert!(CalibrationConfig::CLASS_DIR_MIN_HITS <= CalibrationConfig::CLASS_DIR_SAMPLE);
        assert!(ToolkitConfig::STAGE_TIMEOUT > Duration::from_secs(60));
    }
}
