//! Export configuration
//!
//! Fixed facts about the rig and the lab that end up in every exported file.
//! The defaults describe the two-photon setup the pipeline was built for; a
//! JSON file can override any subset of them:
//!
//! ```json
//! {
//!   "institution": "Janelia Research Campus",
//!   "imaging_plane": { "indicator": "GCaMP6f", "location": "vS1" }
//! }
//! ```

use crate::nwb::mask::{grid_len, MAX_PIXELS};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default directory for exported session files
pub const DEFAULT_OUTPUT_DIR: &str = "/data/NWB 2.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub institution: String,
    pub session_description: String,
    pub device: DeviceConfig,
    pub optical_channel: OpticalChannelConfig,
    pub imaging_plane: ImagingPlaneConfig,
    /// Rows and columns of the scan grid that ROI pixel indices address
    pub mask_shape: [usize; 2],
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            institution: "Janelia Research Campus".to_string(),
            session_description: "Imaging session".to_string(),
            device: DeviceConfig::default(),
            optical_channel: OpticalChannelConfig::default(),
            imaging_plane: ImagingPlaneConfig::default(),
            mask_shape: [512, 512],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "two-photon microscope with Thorlabs resonant galvo scannner".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalChannelConfig {
    pub name: String,
    pub description: String,
    /// (nm)
    pub emission_lambda: f64,
}

impl Default for OpticalChannelConfig {
    fn default() -> Self {
        Self {
            name: "green".to_string(),
            description: "green channel".to_string(),
            emission_lambda: 500.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagingPlaneConfig {
    pub name: String,
    pub description: String,
    /// (nm)
    pub excitation_lambda: f64,
    /// (Hz)
    pub imaging_rate: f64,
    pub indicator: String,
    pub location: String,
    /// Scale from grid units to `unit`
    pub conversion: f64,
    pub unit: String,
}

impl Default for ImagingPlaneConfig {
    fn default() -> Self {
        Self {
            name: "Imaging plane".to_string(),
            description: "Imaging session for PT and IT neurons during audio delay task".to_string(),
            excitation_lambda: 940.0,
            imaging_rate: 300.0,
            indicator: "GCaMP6s".to_string(),
            location: "ALM".to_string(),
            conversion: 1e-6,
            unit: "micrometers".to_string(),
        }
    }
}

/// Error loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config {path}: mask_shape must be non-zero, got {rows}x{cols}")]
    EmptyMask { path: String, rows: usize, cols: usize },
    #[error("invalid config {path}: mask_shape {rows}x{cols} exceeds {max} pixels")]
    MaskTooLarge {
        path: String,
        rows: usize,
        cols: usize,
        max: usize,
    },
}

impl ExportConfig {
    /// Load a JSON config file; fields missing from the file keep their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let config: ExportConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: display.clone(),
                source,
            })?;

        let [rows, cols] = config.mask_shape;
        if rows == 0 || cols == 0 {
            return Err(ConfigError::EmptyMask {
                path: display,
                rows,
                cols,
            });
        }
        if grid_len(rows, cols).is_none() {
            return Err(ConfigError::MaskTooLarge {
                path: display,
                rows,
                cols,
                max: MAX_PIXELS,
            });
        }
        Ok(config)
    }
}
