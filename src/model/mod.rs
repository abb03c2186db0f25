//! Records of the experiment pipeline
//!
//! Plain data declarations for every entity the exporter reads. Rows are
//! write-once upstream; nothing in this crate mutates them after ingestion.
//!
//! ```text
//! Subject ─┬─ Session ─┬─ ImagingDepth
//!          │           ├─ VirusInjection × Virus
//!          │           ├─ Scan ── Roi ── TrialTrace
//!          │           └─ SessionTrial ── BehaviorTrial ── TrialEvent
//!          └─ GeneModification
//! ```

pub mod heading;
pub mod lookup;

pub use heading::{Attribute, SESSION_PRIMARY_KEY, TRIAL_HEADING};
pub use lookup::{CellType, EarlyLick, Outcome, Task, TaskProtocol, TrialEventType, TrialInstruction};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Array-valued field as stored upstream. Usually a (nested) JSON array, but
/// nullable fields may hold `null` or a scalar marker instead.
pub type Blob = Value;

/// Primary key of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub subject_id: i32,
    pub session: i32,
}

impl SessionKey {
    pub fn new(subject_id: i32, session: i32) -> Self {
        Self { subject_id, session }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subject {} session {}", self.subject_id, self.session)
    }
}

/// Animal metadata
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectRow {
    pub subject_id: i32,
    pub username: String,
    pub cage_number: Option<i32>,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: String,
    pub species: String,
    pub animal_source: Option<String>,
}

impl SubjectRow {
    /// Attribute names of a subject, used to keep joined records free of
    /// duplicated subject fields
    pub const ATTRIBUTES: &'static [&'static str] = &[
        "subject_id",
        "username",
        "cage_number",
        "date_of_birth",
        "sex",
        "species",
        "animal_source",
    ];
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    pub subject_id: i32,
    pub session: i32,
    pub session_date: NaiveDate,
    /// Field of view number
    pub fov: i32,
    /// Person who ran the session
    pub username: String,
    pub rig: Option<String>,
}

impl SessionRow {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.subject_id, self.session)
    }

    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            subject_id: self.subject_id,
            session_date: self.session_date,
            session: self.session,
        }
    }
}

/// Depth of one imaging plane, in µm
#[derive(Debug, Clone, PartialEq)]
pub struct ImagingDepthRow {
    pub key: SessionKey,
    pub imaging_depth: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VirusRow {
    pub virus_id: i32,
    pub virus_name: String,
    pub virus_source: Option<String>,
    pub virus_lot: Option<String>,
    pub titer: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VirusInjection {
    pub key: SessionKey,
    pub injection_id: i32,
    pub virus_id: i32,
    pub brain_area: String,
    pub hemisphere: String,
    /// (nl)
    pub injection_volume: f64,
    pub ap_location: Option<f64>,
    pub ml_location: Option<f64>,
    pub dv_location: Option<f64>,
    pub username: Option<String>,
}

/// VirusInjection × Virus
#[derive(Debug, Clone, PartialEq)]
pub struct VirusInjectionRow {
    pub injection: VirusInjection,
    pub virus: VirusRow,
}

impl VirusInjectionRow {
    /// Flatten the joined row into `(attribute, value)` pairs, with every
    /// present value rendered as text and absent values as `null`.
    ///
    /// Numbers use Rust's `Display`, so a volume of 30 reads `"30"` rather
    /// than `"30.0"`, and an absent field is JSON `null` rather than `"None"`.
    pub fn attributes(&self) -> Vec<(&'static str, Value)> {
        fn text<T: ToString>(v: &T) -> Value {
            Value::String(v.to_string())
        }
        fn opt<T: ToString>(v: &Option<T>) -> Value {
            v.as_ref().map(text).unwrap_or(Value::Null)
        }

        let i = &self.injection;
        let v = &self.virus;
        vec![
            ("subject_id", text(&i.key.subject_id)),
            ("session", text(&i.key.session)),
            ("injection_id", text(&i.injection_id)),
            ("virus_id", text(&i.virus_id)),
            ("brain_area", text(&i.brain_area)),
            ("hemisphere", text(&i.hemisphere)),
            ("injection_volume", text(&i.injection_volume)),
            ("ap_location", opt(&i.ap_location)),
            ("ml_location", opt(&i.ml_location)),
            ("dv_location", opt(&i.dv_location)),
            ("username", opt(&i.username)),
            ("virus_name", text(&v.virus_name)),
            ("virus_source", opt(&v.virus_source)),
            ("virus_lot", opt(&v.virus_lot)),
            ("titer", opt(&v.titer)),
        ]
    }
}

/// Two-photon scan of a session: summary images and frame timing
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRow {
    pub key: SessionKey,
    /// 512 x 512 summary image of GCaMP at 940nm
    pub image_gcamp: Blob,
    /// 512 x 512 summary image of CTB-647
    pub image_ctb: Blob,
    /// 512 x 512 summary image of beads; absent for some scans
    pub image_beads: Blob,
    pub recording_depth: f64,
    /// Per-frame capture times, aligned to the first trial start
    pub frame_time: Vec<f64>,
}

/// Segmented region of interest within a scan
#[derive(Debug, Clone, PartialEq)]
pub struct RoiRow {
    pub key: SessionKey,
    pub roi_idx: i32,
    pub cell_type: CellType,
    /// 1-based, column-major indices into the scan grid
    pub roi_pixel_list: Vec<i64>,
    /// 1-based, column-major indices into the scan grid
    pub neuropil_pixel_list: Vec<i64>,
    /// Average fluorescence of the ROI
    pub roi_trace: Vec<f64>,
    /// Average fluorescence of the surrounding neuropil
    pub neuropil_trace: Vec<f64>,
    pub included: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionTrialRow {
    pub key: SessionKey,
    pub trial: i32,
    pub trial_uid: Option<i32>,
    /// (s) relative to session beginning
    pub start_time: f64,
    /// (s) relative to session beginning; `None` when the trial was truncated
    pub stop_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorTrialRow {
    pub key: SessionKey,
    pub trial: i32,
    pub task: Task,
    pub task_protocol: i32,
    pub trial_instruction: TrialInstruction,
    pub early_lick: EarlyLick,
    pub outcome: Outcome,
}

/// SessionTrial × BehaviorTrial
#[derive(Debug, Clone, PartialEq)]
pub struct TrialRow {
    pub session_trial: SessionTrialRow,
    pub behavior: BehaviorTrialRow,
}

impl TrialRow {
    /// Values of every attribute in [`TRIAL_HEADING`], in heading order
    pub fn attributes(&self) -> Vec<(&'static str, Value)> {
        let t = &self.session_trial;
        let b = &self.behavior;
        vec![
            ("subject_id", Value::from(t.key.subject_id)),
            ("session", Value::from(t.key.session)),
            ("trial", Value::from(t.trial)),
            ("trial_uid", t.trial_uid.map(Value::from).unwrap_or(Value::Null)),
            ("start_time", Value::from(t.start_time)),
            ("stop_time", t.stop_time.map(Value::from).unwrap_or(Value::Null)),
            ("task", Value::from(b.task.label())),
            ("task_protocol", Value::from(b.task_protocol)),
            ("trial_instruction", Value::from(b.trial_instruction.label())),
            ("early_lick", Value::from(b.early_lick.label())),
            ("outcome", Value::from(b.outcome.label())),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialEventRow {
    pub key: SessionKey,
    pub trial: i32,
    pub trial_event_id: i32,
    pub trial_event_type: TrialEventType,
    /// (s) from trial start, not session start
    pub trial_event_time: f64,
    pub duration: Option<f64>,
}

/// Fluorescence of one ROI cut to one trial
#[derive(Debug, Clone, PartialEq)]
pub struct TrialTraceRow {
    pub key: SessionKey,
    pub roi_idx: i32,
    pub trial: i32,
    pub trial_calcium_trace: Vec<f64>,
}

// ============================================================================
// Session identity
// ============================================================================

/// Human-readable session identifier, `<subject_id>_<YYYY-MM-DD>_<session>`.
///
/// Also the base name of the exported artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    pub subject_id: i32,
    pub session_date: NaiveDate,
    pub session: i32,
}

impl SessionIdentity {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.subject_id, self.session)
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.subject_id,
            self.session_date.format("%Y-%m-%d"),
            self.session
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid session identifier {0:?}")]
pub struct ParseIdentityError(pub String);

impl FromStr for SessionIdentity {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseIdentityError(s.to_string());
        let mut parts = s.rsplitn(3, '_');
        let session: i32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let session_date = parts
            .next()
            .and_then(|p| NaiveDate::parse_from_str(p, "%Y-%m-%d").ok())
            .ok_or_else(invalid)?;
        let subject_id: i32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        Ok(Self {
            subject_id,
            session_date,
            session,
        })
    }
}
