//! NWB-structured session document
//!
//! An in-memory, self-describing representation of one session laid out the
//! way Neurodata Without Borders 2.0 organizes an ophys + behavior file:
//!
//! ```text
//! NwbFile
//! ├── subject, virus
//! ├── acquisition
//! │   ├── Images "images"            (structural images)
//! │   ├── TimeSeries "Frame Time"
//! │   └── BehavioralEvents           (one TimeSeries per event type)
//! ├── devices, imaging_planes
//! ├── processing "Ophys"
//! │   └── ImageSegmentation → PlaneSegmentation (one row per ROI)
//! └── trials                         (optional dynamic table)
//! ```
//!
//! The document is independent of how it is stored; see [`io`] for the
//! on-disk encoding.

pub mod io;
pub mod mask;
pub mod samples;

pub use mask::ImageMask;

use crate::error::MalformedField;
use crate::model::{CellType, SessionIdentity};
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NwbFile {
    pub identifier: String,
    pub session_description: String,
    /// Date-only precision: upstream records carry no time of day
    pub session_start_time: NaiveDateTime,
    pub file_create_date: DateTime<FixedOffset>,
    pub experimenter: String,
    pub institution: String,
    pub subject: Subject,
    /// JSON list of virus injection records
    pub virus: String,
    pub acquisition: Vec<Acquisition>,
    pub devices: Vec<Device>,
    pub imaging_planes: Vec<ImagingPlane>,
    pub processing: Vec<ProcessingModule>,
    pub trials: Option<TrialTable>,
}

impl NwbFile {
    /// Session identity encoded in the identifier
    pub fn identity(&self) -> Result<SessionIdentity, crate::model::ParseIdentityError> {
        self.identifier.parse()
    }

    pub fn add_acquisition(&mut self, object: impl Into<Acquisition>) {
        self.acquisition.push(object.into());
    }

    pub fn images(&self) -> Option<&Images> {
        self.acquisition.iter().find_map(|a| match a {
            Acquisition::Images(images) => Some(images),
            _ => None,
        })
    }

    /// Acquired time series by name
    pub fn time_series(&self, name: &str) -> Option<&TimeSeries> {
        self.acquisition.iter().find_map(|a| match a {
            Acquisition::TimeSeries(ts) if ts.name == name => Some(ts),
            _ => None,
        })
    }

    pub fn behavioral_events(&self) -> Option<&BehavioralEvents> {
        self.acquisition.iter().find_map(|a| match a {
            Acquisition::BehavioralEvents(events) => Some(events),
            _ => None,
        })
    }

    pub fn processing_module(&self, name: &str) -> Option<&ProcessingModule> {
        self.processing.iter().find(|m| m.name == name)
    }

    /// First plane segmentation found in any processing module
    pub fn plane_segmentation(&self) -> Option<&PlaneSegmentation> {
        self.processing
            .iter()
            .flat_map(|m| &m.data_interfaces)
            .find_map(|d| match d {
                DataInterface::ImageSegmentation(seg) => seg.plane_segmentations.first(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub subject_id: String,
    /// Gene modifications joined with `" x "`
    pub genotype: String,
    pub sex: String,
    pub species: String,
    pub date_of_birth: Option<NaiveDateTime>,
}

/// Objects stored under `acquisition`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "neurodata_type")]
pub enum Acquisition {
    Images(Images),
    TimeSeries(TimeSeries),
    BehavioralEvents(BehavioralEvents),
}

impl From<Images> for Acquisition {
    fn from(images: Images) -> Self {
        Acquisition::Images(images)
    }
}

impl From<TimeSeries> for Acquisition {
    fn from(ts: TimeSeries) -> Self {
        Acquisition::TimeSeries(ts)
    }
}

impl From<BehavioralEvents> for Acquisition {
    fn from(events: BehavioralEvents) -> Self {
        Acquisition::BehavioralEvents(events)
    }
}

// ============================================================================
// Images
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Images {
    pub name: String,
    pub images: Vec<Image>,
}

impl Images {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            images: Vec::new(),
        }
    }

    pub fn add_image(&mut self, image: Image) {
        self.images.push(image);
    }

    pub fn get(&self, name: &str) -> Option<&Image> {
        self.images.iter().find(|i| i.name == name)
    }
}

/// 2-D grayscale image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub name: String,
    pub data: Vec<Vec<f64>>,
}

impl Image {
    pub fn shape(&self) -> [usize; 2] {
        [self.data.len(), self.data.first().map_or(0, Vec::len)]
    }
}

// ============================================================================
// Imaging metadata
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpticalChannel {
    pub name: String,
    pub description: String,
    pub emission_lambda: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagingPlane {
    pub name: String,
    pub description: String,
    pub optical_channel: OpticalChannel,
    /// Name of a device in [`NwbFile::devices`]
    pub device: String,
    pub excitation_lambda: f64,
    pub imaging_rate: f64,
    pub indicator: String,
    pub location: String,
    pub conversion: f64,
    pub unit: String,
}

// ============================================================================
// Time series
// ============================================================================

/// Samples of a time series: frame indices or measured values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesData {
    Index(Vec<u64>),
    Sample(#[serde(with = "samples")] Vec<f64>),
}

impl SeriesData {
    pub fn len(&self) -> usize {
        match self {
            SeriesData::Index(v) => v.len(),
            SeriesData::Sample(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub name: String,
    pub unit: String,
    pub conversion: f64,
    pub data: SeriesData,
    #[serde(with = "samples")]
    pub timestamps: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralEvents {
    pub name: String,
    pub time_series: Vec<TimeSeries>,
}

impl BehavioralEvents {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            time_series: Vec::new(),
        }
    }

    /// Add an event series whose samples mark presence (all 1.0) at `timestamps`
    pub fn create_timeseries(&mut self, name: impl Into<String>, timestamps: Vec<f64>) {
        self.time_series.push(TimeSeries {
            name: name.into(),
            unit: "a.u.".to_string(),
            conversion: 1.0,
            data: SeriesData::Sample(vec![1.0; timestamps.len()]),
            timestamps,
        });
    }

    pub fn get(&self, name: &str) -> Option<&TimeSeries> {
        self.time_series.iter().find(|ts| ts.name == name)
    }
}

// ============================================================================
// Segmentation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingModule {
    pub name: String,
    pub description: String,
    pub data_interfaces: Vec<DataInterface>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "neurodata_type")]
pub enum DataInterface {
    ImageSegmentation(ImageSegmentation),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSegmentation {
    pub name: String,
    pub plane_segmentations: Vec<PlaneSegmentation>,
}

/// Column of a dynamic table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub description: String,
}

impl Column {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// ROI table for one imaging plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaneSegmentation {
    pub name: String,
    pub description: String,
    /// Name of an imaging plane in [`NwbFile::imaging_planes`]
    pub imaging_plane: String,
    pub columns: Vec<Column>,
    pub rois: Vec<Roi>,
}

impl PlaneSegmentation {
    pub fn add_column(&mut self, name: impl Into<String>, description: impl Into<String>) {
        self.columns.push(Column::new(name, description));
    }

    pub fn add_roi(&mut self, roi: Roi) {
        self.rois.push(roi);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub roi_id: i32,
    pub image_mask: ImageMask,
    pub neuropil_mask: ImageMask,
    pub cell_type: CellType,
    #[serde(with = "samples")]
    pub roi_trace: Vec<f64>,
    #[serde(with = "samples")]
    pub neuropil_trace: Vec<f64>,
    pub included: bool,
}

// ============================================================================
// Trials
// ============================================================================

/// Trial table: mandatory start/stop columns plus declared extra columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialTable {
    pub columns: Vec<Column>,
    pub rows: Vec<Trial>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub start_time: f64,
    pub stop_time: f64,
    pub values: BTreeMap<String, Value>,
}

impl TrialTable {
    pub fn add_column(&mut self, name: impl Into<String>, description: impl Into<String>) {
        self.columns.push(Column::new(name, description));
    }

    /// Append a trial; `values` must cover exactly the declared columns
    pub fn add_trial(
        &mut self,
        start_time: f64,
        stop_time: f64,
        values: BTreeMap<String, Value>,
    ) -> Result<(), MalformedField> {
        if let Some(extra) = values.keys().find(|k| !self.columns.iter().any(|c| &c.name == *k)) {
            return Err(MalformedField::new(extra.as_str(), "not a declared trial column"));
        }
        if let Some(missing) = self.columns.iter().find(|c| !values.contains_key(&c.name)) {
            return Err(MalformedField::new(missing.name.as_str(), "missing from trial row"));
        }
        self.rows.push(Trial {
            start_time,
            stop_time,
            values,
        });
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trial_table_rejects_undeclared_columns() {
        let mut table = TrialTable::default();
        table.add_column("outcome", "trial outcome");

        let mut values = BTreeMap::new();
        values.insert("outcome".to_string(), json!("hit"));
        table.add_trial(0.0, 5.0, values.clone()).unwrap();

        values.insert("bitcode".to_string(), json!(3));
        let err = table.add_trial(0.0, 5.0, values).unwrap_err();
        assert_eq!(err.field, "bitcode");

        let err = table.add_trial(0.0, 5.0, BTreeMap::new()).unwrap_err();
        assert_eq!(err.field, "outcome");
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_behavioral_event_series_are_presence_markers() {
        let mut events = BehavioralEvents::new("BehavioralEvents");
        events.create_timeseries("go", vec![1.5, 9.25]);
        let go = events.get("go").unwrap();
        assert_eq!(go.data, SeriesData::Sample(vec![1.0, 1.0]));
        assert_eq!(go.timestamps, vec![1.5, 9.25]);
        assert_eq!(go.unit, "a.u.");
        assert!(events.get("delay").is_none());
    }

    #[test]
    fn test_series_data_untagged_decoding() {
        let idx: SeriesData = serde_json::from_value(json!([0, 1, 2])).unwrap();
        assert_eq!(idx, SeriesData::Index(vec![0, 1, 2]));
        let samples: SeriesData = serde_json::from_value(json!([1.0, 0.5])).unwrap();
        assert_eq!(samples, SeriesData::Sample(vec![1.0, 0.5]));
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn test_acquisition_is_tagged_by_neurodata_type() {
        let images = Acquisition::from(Images::new("images"));
        let value = serde_json::to_value(&images).unwrap();
        assert_eq!(value["neurodata_type"], "Images");
        assert_eq!(value["name"], "images");
    }

    #[test]
    fn test_image_shape() {
        let image = Image {
            name: "GCaMP at 940nm".to_string(),
            data: vec![vec![0.0; 3]; 2],
        };
        assert_eq!(image.shape(), [2, 3]);
    }
}
