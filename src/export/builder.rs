//! Document assembly
//!
//! Turns a [`ResolvedSession`] into an [`NwbFile`]. Pure: no I/O, no clock;
//! the creation timestamp is passed in.

use super::resolver::ResolvedSession;
use crate::config::ExportConfig;
use crate::error::{MalformedField, Result};
use crate::model::{
    Blob, RoiRow, SessionTrialRow, SubjectRow, TrialEventRow, TrialEventType, TrialRow,
    VirusInjectionRow, SESSION_PRIMARY_KEY,
};
use crate::nwb::{
    Acquisition, BehavioralEvents, DataInterface, Device, Image, ImageMask, ImageSegmentation,
    Images, ImagingPlane, NwbFile, OpticalChannel, PlaneSegmentation, ProcessingModule, Roi,
    SeriesData, Subject, TimeSeries, TrialTable,
};
use chrono::{DateTime, FixedOffset, NaiveTime};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Stop time given to trials whose stop was never determined
pub const TRUNCATED_TRIAL_STOP: f64 = 5.0;

pub const IMAGES: &str = "images";
pub const GCAMP_IMAGE: &str = "GCaMP at 940nm";
pub const CTB_IMAGE: &str = "CTB-647 IT";
pub const BEADS_IMAGE: &str = "Beads PT";
pub const FRAME_TIME: &str = "Frame Time";
pub const OPHYS: &str = "Ophys";
pub const BEHAVIORAL_EVENTS: &str = "BehavioralEvents";

/// Segmentation columns with their descriptions, in table order
const ROI_COLUMNS: &[(&str, &str)] = &[
    ("roi_id", "roi id"),
    ("cell_type", "PT, IT, or unknown"),
    ("neuropil_mask", "mask of neurophil surrounding this roi"),
    ("roi_trace", "Trace on this session of this roi"),
    ("neuropil_trace", "Trace on this session of the neurophil"),
    ("included", "whether to include this roi into later analyses"),
];

/// Trial attributes that never become trial-table columns, besides the
/// session primary key
const NON_COLUMN_TRIAL_ATTRIBUTES: &[&str] = &["trial_uid", "start_time", "stop_time"];

/// Gene modification labels joined into one genotype string
pub fn genotype(modifications: &[String]) -> String {
    modifications.join(" x ")
}

/// Start and stop of a trial as stored in the trial table.
///
/// Total over its domain: a missing stop becomes [`TRUNCATED_TRIAL_STOP`],
/// anything else passes through unchanged.
pub fn trial_interval(start_time: f64, stop_time: Option<f64>) -> (f64, f64) {
    (start_time, stop_time.unwrap_or(TRUNCATED_TRIAL_STOP))
}

/// Beads are recorded only for some scans; anything but a non-empty array
/// means "no beads image"
pub fn has_beads(blob: &Blob) -> bool {
    matches!(blob, Value::Array(items) if !items.is_empty())
}

/// Decode a 2-D numeric array into a named grayscale image
fn image_from_blob(name: &str, field: &str, blob: &Blob) -> std::result::Result<Image, MalformedField> {
    let data: Vec<Vec<f64>> = serde_json::from_value(blob.clone())
        .map_err(|e| MalformedField::new(field, format!("expected a 2-D numeric array: {}", e)))?;
    if let Some(width) = data.first().map(Vec::len) {
        if let Some(row) = data.iter().position(|r| r.len() != width) {
            return Err(MalformedField::new(
                field,
                format!("row {} has {} pixels, expected {}", row, data[row].len(), width),
            ));
        }
    }
    Ok(Image {
        name: name.to_string(),
        data,
    })
}

/// Virus injection records without the fields already on the subject,
/// encoded as a JSON list
fn virus_summary(injections: &[VirusInjectionRow]) -> serde_json::Result<String> {
    let records: Vec<Map<String, Value>> = injections
        .iter()
        .map(|row| {
            row.attributes()
                .into_iter()
                .filter(|(name, _)| !SubjectRow::ATTRIBUTES.contains(name))
                .map(|(name, value)| (name.to_string(), value))
                .collect()
        })
        .collect();
    serde_json::to_string(&records)
}

fn structural_images(resolved: &ResolvedSession) -> Result<Images> {
    let scan = &resolved.scan;
    let mut images = Images::new(IMAGES);
    images.add_image(image_from_blob(GCAMP_IMAGE, "image_gcamp", &scan.image_gcamp)?);
    images.add_image(image_from_blob(CTB_IMAGE, "image_ctb", &scan.image_ctb)?);
    if has_beads(&scan.image_beads) {
        images.add_image(image_from_blob(BEADS_IMAGE, "image_beads", &scan.image_beads)?);
    } else {
        tracing::debug!(key = %resolved.key(), "scan has no beads image");
    }
    Ok(images)
}

fn frame_time(frame_times: &[f64]) -> TimeSeries {
    TimeSeries {
        name: FRAME_TIME.to_string(),
        unit: "a.u".to_string(),
        conversion: 1.0,
        data: SeriesData::Index((0..frame_times.len() as u64).collect()),
        timestamps: frame_times.to_vec(),
    }
}

fn imaging_plane(config: &ExportConfig) -> ImagingPlane {
    let plane = &config.imaging_plane;
    let channel = &config.optical_channel;
    ImagingPlane {
        name: plane.name.clone(),
        description: plane.description.clone(),
        optical_channel: OpticalChannel {
            name: channel.name.clone(),
            description: channel.description.clone(),
            emission_lambda: channel.emission_lambda,
        },
        device: config.device.name.clone(),
        excitation_lambda: plane.excitation_lambda,
        imaging_rate: plane.imaging_rate,
        indicator: plane.indicator.clone(),
        location: plane.location.clone(),
        conversion: plane.conversion,
        unit: plane.unit.clone(),
    }
}

fn roi(row: &RoiRow, [rows, cols]: [usize; 2]) -> std::result::Result<Roi, MalformedField> {
    Ok(Roi {
        roi_id: row.roi_idx,
        image_mask: ImageMask::from_pixel_list("roi_pixel_list", rows, cols, &row.roi_pixel_list)?,
        neuropil_mask: ImageMask::from_pixel_list(
            "neuropil_pixel_list",
            rows,
            cols,
            &row.neuropil_pixel_list,
        )?,
        cell_type: row.cell_type,
        roi_trace: row.roi_trace.clone(),
        neuropil_trace: row.neuropil_trace.clone(),
        included: row.included,
    })
}

fn plane_segmentation(
    rois: &[RoiRow],
    plane: &str,
    mask_shape: [usize; 2],
) -> std::result::Result<PlaneSegmentation, MalformedField> {
    let mut seg = PlaneSegmentation {
        name: "Plane Segmentation".to_string(),
        description: "plane segmentation".to_string(),
        imaging_plane: plane.to_string(),
        columns: Vec::new(),
        rois: Vec::with_capacity(rois.len()),
    };
    for (name, description) in ROI_COLUMNS {
        seg.add_column(*name, *description);
    }
    for row in rois {
        seg.add_roi(roi(row, mask_shape)?);
    }
    Ok(seg)
}

/// Trial table with one column per non-key trial attribute, or `None` when
/// the session has no trials at all
fn trial_table(resolved: &ResolvedSession) -> std::result::Result<Option<TrialTable>, MalformedField> {
    if resolved.session_trials.is_empty() {
        return Ok(None);
    }

    let is_column = |name: &str| {
        !SESSION_PRIMARY_KEY
            .iter()
            .chain(NON_COLUMN_TRIAL_ATTRIBUTES)
            .any(|skip| *skip == name)
    };

    let mut table = TrialTable::default();
    for attr in resolved.trial_heading.iter().filter(|a| is_column(a.name)) {
        table.add_column(attr.name, attr.description);
    }

    for trial in &resolved.trials {
        let (start, stop) = trial_interval(trial.session_trial.start_time, trial.session_trial.stop_time);
        table.add_trial(start, stop, trial_values(trial, &is_column))?;
    }
    Ok(Some(table))
}

fn trial_values(trial: &TrialRow, is_column: &dyn Fn(&str) -> bool) -> BTreeMap<String, Value> {
    trial
        .attributes()
        .into_iter()
        .filter(|(name, _)| is_column(name))
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// One presence-marker series per event type that occurs in the session,
/// ordered by label as the lookup table's primary key orders them.
///
/// Event offsets are relative to their trial's start; series timestamps are
/// relative to the session start.
fn behavioral_events(
    session_trials: &[SessionTrialRow],
    events: &[TrialEventRow],
) -> BehavioralEvents {
    let starts: BTreeMap<i32, f64> = session_trials.iter().map(|t| (t.trial, t.start_time)).collect();

    let mut types = TrialEventType::ALL.to_vec();
    types.sort_by_key(|ty| ty.label());

    let mut behavior = BehavioralEvents::new(BEHAVIORAL_EVENTS);
    for ty in &types {
        let timestamps: Vec<f64> = events
            .iter()
            .filter(|e| e.trial_event_type == *ty)
            .filter_map(|e| match starts.get(&e.trial) {
                Some(start) => Some(start + e.trial_event_time),
                None => {
                    tracing::debug!(trial = e.trial, event = e.trial_event_id, "event without session trial");
                    None
                }
            })
            .collect();
        if !timestamps.is_empty() {
            behavior.create_timeseries(ty.label(), timestamps);
        }
    }
    behavior
}

/// Assemble the full document for a resolved session
pub fn build_document(
    resolved: &ResolvedSession,
    config: &ExportConfig,
    created_at: DateTime<FixedOffset>,
) -> Result<NwbFile> {
    let session = &resolved.session;
    let subject = &resolved.subject;

    let mut nwb = NwbFile {
        identifier: session.identity().to_string(),
        session_description: config.session_description.clone(),
        session_start_time: session.session_date.and_time(NaiveTime::MIN),
        file_create_date: created_at,
        experimenter: session.username.clone(),
        institution: config.institution.clone(),
        subject: Subject {
            subject_id: session.subject_id.to_string(),
            genotype: genotype(&resolved.gene_modifications),
            sex: subject.sex.clone(),
            species: subject.species.clone(),
            date_of_birth: subject.date_of_birth.map(|d| d.and_time(NaiveTime::MIN)),
        },
        virus: virus_summary(&resolved.virus_injections)?,
        acquisition: Vec::new(),
        devices: Vec::new(),
        imaging_planes: Vec::new(),
        processing: Vec::new(),
        trials: None,
    };

    nwb.add_acquisition(structural_images(resolved)?);

    let plane = imaging_plane(config);
    nwb.devices.push(Device {
        name: config.device.name.clone(),
    });

    nwb.add_acquisition(frame_time(&resolved.scan.frame_time));

    let segmentation = plane_segmentation(&resolved.rois, &plane.name, config.mask_shape)?;
    nwb.imaging_planes.push(plane);
    nwb.processing.push(ProcessingModule {
        name: OPHYS.to_string(),
        description: "Processing result of imaging".to_string(),
        data_interfaces: vec![DataInterface::ImageSegmentation(ImageSegmentation {
            name: "ImageSegmentation".to_string(),
            plane_segmentations: vec![segmentation],
        })],
    });

    nwb.trials = trial_table(resolved)?;

    nwb.add_acquisition(Acquisition::BehavioralEvents(behavioral_events(
        &resolved.session_trials,
        &resolved.trial_events,
    )));

    Ok(nwb)
}
