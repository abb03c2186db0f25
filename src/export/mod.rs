//! Session export
//!
//! One session goes through three stages:
//!
//! 1. [`resolve_session`] pulls every related row from a [`SessionSource`]
//! 2. [`build_document`] assembles the in-memory [`NwbFile`]
//! 3. [`write_artifact`] optionally persists it as `<identifier>.nwb.json`
//!
//! [`export_session`] runs all three.

mod builder;
mod resolver;

pub use builder::{
    build_document, genotype, has_beads, trial_interval, BEADS_IMAGE, BEHAVIORAL_EVENTS,
    CTB_IMAGE, FRAME_TIME, GCAMP_IMAGE, IMAGES, OPHYS, TRUNCATED_TRIAL_STOP,
};
pub use resolver::{resolve_session, ResolvedSession};

use crate::config::{ExportConfig, DEFAULT_OUTPUT_DIR};
use crate::error::{ExportError, Result};
use crate::model::SessionKey;
use crate::nwb::{io, NwbFile};
use crate::source::SessionSource;
use chrono::Local;
use std::path::{Path, PathBuf};

/// Where and whether to write the exported document
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    pub output_dir: PathBuf,
    /// Persist the document; when false only the in-memory document is returned
    pub save: bool,
    /// Replace an existing file instead of skipping the session
    pub overwrite: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            save: false,
            overwrite: false,
        }
    }
}

impl ExportOptions {
    /// Persist into `output_dir`, skipping files that already exist
    pub fn save_to(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            save: true,
            overwrite: false,
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// What happened to the artifact of an exported session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    Written(PathBuf),
    /// A file already existed and overwrite was off; it was left untouched
    Skipped(PathBuf),
    NotRequested,
}

impl WriteStatus {
    pub fn path(&self) -> Option<&Path> {
        match self {
            WriteStatus::Written(p) | WriteStatus::Skipped(p) => Some(p),
            WriteStatus::NotRequested => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOutcome {
    /// Always fully built, even when the write was skipped
    pub document: NwbFile,
    pub status: WriteStatus,
}

/// Export one session, optionally writing it to `options.output_dir`
pub fn export_session<S: SessionSource>(
    source: &S,
    key: &SessionKey,
    config: &ExportConfig,
    options: &ExportOptions,
) -> Result<ExportOutcome> {
    tracing::info!(%key, "exporting session");

    let resolved = resolve_session(source, key)?;
    let document = build_document(&resolved, config, Local::now().fixed_offset())?;

    let status = if options.save {
        write_artifact(&document, options)?
    } else {
        WriteStatus::NotRequested
    };

    Ok(ExportOutcome { document, status })
}

/// Persist `document` under its identifier, honouring skip-if-exists
pub fn write_artifact(document: &NwbFile, options: &ExportOptions) -> Result<WriteStatus> {
    let dir = &options.output_dir;
    std::fs::create_dir_all(dir).map_err(|e| ExportError::io(dir, e))?;

    let path = dir.join(io::file_name(&document.identifier));
    if !options.overwrite && path.exists() {
        tracing::info!(path = %path.display(), "file exists, skipping");
        return Ok(WriteStatus::Skipped(path));
    }

    io::write(&path, document).map_err(|e| ExportError::io(&path, e))?;
    tracing::info!(path = %path.display(), "wrote session file");
    Ok(WriteStatus::Written(path))
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! A small but complete session shared by the export tests

    use crate::model::{
        BehaviorTrialRow, CellType, EarlyLick, Outcome, RoiRow, ScanRow, SessionKey, SessionRow,
        SessionTrialRow, SubjectRow, Task, TrialEventRow, TrialEventType, TrialInstruction,
        VirusInjection, VirusRow,
    };
    use crate::source::MemorySource;
    use chrono::NaiveDate;
    use serde_json::json;

    pub const KEY: SessionKey = SessionKey {
        subject_id: 431301,
        session: 2,
    };

    pub fn subject() -> SubjectRow {
        SubjectRow {
            subject_id: KEY.subject_id,
            username: "husbandry".to_string(),
            cage_number: Some(154522),
            date_of_birth: None,
            sex: "F".to_string(),
            species: "Mus musculus".to_string(),
            animal_source: Some("Jackson labs".to_string()),
        }
    }

    pub fn session() -> SessionRow {
        SessionRow {
            subject_id: KEY.subject_id,
            session: KEY.session,
            session_date: NaiveDate::from_ymd_opt(2018, 9, 4).unwrap(),
            fov: 1,
            username: "rig_operator".to_string(),
            rig: Some("2P1".to_string()),
        }
    }

    pub fn scan() -> ScanRow {
        ScanRow {
            key: KEY,
            image_gcamp: json!([[0.0, 1.0, 2.0], [3.0, 4.0, 5.0]]),
            image_ctb: json!([[5.0, 4.0, 3.0], [2.0, 1.0, 0.0]]),
            image_beads: json!([[1.0, 1.0, 1.0], [0.0, 0.0, 0.0]]),
            recording_depth: 350.0,
            frame_time: vec![0.0, 0.5, 1.0, 1.5],
        }
    }

    fn trial(trial: i32, start_time: f64, stop_time: Option<f64>, outcome: Outcome) -> (SessionTrialRow, BehaviorTrialRow) {
        (
            SessionTrialRow {
                key: KEY,
                trial,
                trial_uid: Some(9000 + trial),
                start_time,
                stop_time,
            },
            BehaviorTrialRow {
                key: KEY,
                trial,
                task: Task::AudioDelay,
                task_protocol: 1,
                trial_instruction: TrialInstruction::Right,
                early_lick: EarlyLick::NoEarly,
                outcome,
            },
        )
    }

    fn event(trial: i32, id: i32, ty: TrialEventType, time: f64) -> TrialEventRow {
        TrialEventRow {
            key: KEY,
            trial,
            trial_event_id: id,
            trial_event_type: ty,
            trial_event_time: time,
            duration: None,
        }
    }

    pub fn source() -> MemorySource {
        let mut source = MemorySource::new();
        source.add_subject(subject());
        source.add_gene_modification(KEY.subject_id, "Cre-B").unwrap();
        source.add_gene_modification(KEY.subject_id, "Cre-A").unwrap();
        source.add_session(session()).unwrap();

        source.add_virus(VirusRow {
            virus_id: 1,
            virus_name: "AAV2/1-hSyn-GCaMP6s".to_string(),
            virus_source: Some("UPenn".to_string()),
            virus_lot: None,
            titer: Some(1.0e13),
        });
        source
            .add_virus_injection(VirusInjection {
                key: KEY,
                injection_id: 1,
                virus_id: 1,
                brain_area: "ALM".to_string(),
                hemisphere: "left".to_string(),
                injection_volume: 30.0,
                ap_location: Some(2500.0),
                ml_location: Some(1500.0),
                dv_location: None,
                username: Some("surgeon".to_string()),
            })
            .unwrap();

        source.add_scan(scan()).unwrap();
        source
            .add_roi(RoiRow {
                key: KEY,
                roi_idx: 1,
                cell_type: CellType::Pt,
                roi_pixel_list: vec![1, 2, 513, 513],
                neuropil_pixel_list: vec![3, 4, 5],
                roi_trace: vec![1.0, 2.0, 3.0],
                neuropil_trace: vec![0.1, 0.2, 0.3],
                included: true,
            })
            .unwrap();
        source
            .add_roi(RoiRow {
                key: KEY,
                roi_idx: 2,
                cell_type: CellType::It,
                roi_pixel_list: vec![1024, 262144],
                neuropil_pixel_list: vec![1023],
                roi_trace: vec![4.0, 5.0, 6.0],
                neuropil_trace: vec![0.4, 0.5, 0.6],
                included: false,
            })
            .unwrap();

        for (session_trial, behavior) in [
            trial(1, 0.0, Some(4.25), Outcome::Hit),
            trial(2, 10.0, None, Outcome::Miss),
        ] {
            source.add_session_trial(session_trial).unwrap();
            source.add_behavior_trial(behavior).unwrap();
        }

        for e in [
            event(1, 1, TrialEventType::Sample, 0.5),
            event(1, 2, TrialEventType::Go, 3.0),
            event(2, 1, TrialEventType::Presample, 0.1),
            event(2, 2, TrialEventType::Go, 2.0),
        ] {
            source.add_trial_event(e).unwrap();
        }
        source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellType, RoiRow, ScanRow};
    use crate::source::MemorySource;

    // ==========================================================================
    // WRITE SEMANTICS
    // ==========================================================================
    //
    // Skip-if-exists is a successful no-op, not an error, and the document is
    // built regardless of whether it gets written.
    // ==========================================================================

    #[test]
    fn test_without_save_nothing_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let options = ExportOptions {
            output_dir: dir.path().join("out"),
            ..ExportOptions::default()
        };
        let outcome =
            export_session(&fixtures::source(), &fixtures::KEY, &ExportConfig::default(), &options)
                .unwrap();
        assert_eq!(outcome.status, WriteStatus::NotRequested);
        assert_eq!(outcome.document.identifier, "431301_2018-09-04_2");
        assert!(!options.output_dir.exists());
    }

    #[test]
    fn test_save_creates_directory_and_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("NWB 2.0");
        let options = ExportOptions::save_to(&out);

        let outcome =
            export_session(&fixtures::source(), &fixtures::KEY, &ExportConfig::default(), &options)
                .unwrap();
        let expected = out.join("431301_2018-09-04_2.nwb.json");
        assert_eq!(outcome.status, WriteStatus::Written(expected.clone()));
        assert!(expected.is_file());
        assert_eq!(outcome.status.path(), Some(expected.as_path()));
    }

    #[test]
    fn test_second_export_is_skipped_and_file_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let options = ExportOptions::save_to(dir.path());
        let source = fixtures::source();
        let config = ExportConfig::default();

        let first = export_session(&source, &fixtures::KEY, &config, &options).unwrap();
        let path = first.status.path().unwrap().to_path_buf();
        let before = std::fs::read(&path).unwrap();

        let second = export_session(&source, &fixtures::KEY, &config, &options).unwrap();
        assert_eq!(second.status, WriteStatus::Skipped(path.clone()));
        // Built anyway, with its own creation time
        assert_eq!(second.document.identifier, first.document.identifier);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_overwrite_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("431301_2018-09-04_2.nwb.json");
        std::fs::write(&path, "placeholder").unwrap();

        let options = ExportOptions::save_to(dir.path()).with_overwrite(true);
        let outcome =
            export_session(&fixtures::source(), &fixtures::KEY, &ExportConfig::default(), &options)
                .unwrap();
        assert_eq!(outcome.status, WriteStatus::Written(path.clone()));

        let back = io::read(&path).unwrap();
        assert_eq!(back, outcome.document);
    }

    #[test]
    fn test_identity_round_trips_through_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let options = ExportOptions::save_to(dir.path());
        let outcome =
            export_session(&fixtures::source(), &fixtures::KEY, &ExportConfig::default(), &options)
                .unwrap();

        let back = io::read(outcome.status.path().unwrap()).unwrap();
        let identity = back.identity().unwrap();
        let session = fixtures::session();
        assert_eq!(identity.subject_id, session.subject_id);
        assert_eq!(identity.session_date, session.session_date);
        assert_eq!(identity.session, session.session);
    }

    #[test]
    fn test_non_finite_samples_survive_artifact() {
        let mut source = fixtures::source();
        source
            .add_scan(ScanRow {
                frame_time: vec![0.0, f64::NAN, 1.0, 1.5],
                ..fixtures::scan()
            })
            .unwrap();
        source
            .add_roi(RoiRow {
                key: fixtures::KEY,
                roi_idx: 1,
                cell_type: CellType::Pt,
                roi_pixel_list: vec![1],
                neuropil_pixel_list: vec![2],
                roi_trace: vec![f64::NAN, 1.0, f64::INFINITY],
                neuropil_trace: vec![0.1, f64::NEG_INFINITY, 0.3],
                included: true,
            })
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let outcome = export_session(
            &source,
            &fixtures::KEY,
            &ExportConfig::default(),
            &ExportOptions::save_to(dir.path()),
        )
        .unwrap();

        let back = io::read(outcome.status.path().unwrap()).unwrap();
        let roi = &back.plane_segmentation().unwrap().rois[0];
        assert!(roi.roi_trace[0].is_nan());
        assert_eq!(&roi.roi_trace[1..], &[1.0, f64::INFINITY]);
        assert_eq!(roi.neuropil_trace[1], f64::NEG_INFINITY);
        assert!(back.time_series(FRAME_TIME).unwrap().timestamps[1].is_nan());
    }

    #[test]
    fn test_unwritable_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let options = ExportOptions::save_to(blocker.join("out"));
        let err =
            export_session(&fixtures::source(), &fixtures::KEY, &ExportConfig::default(), &options)
                .unwrap_err();
        assert!(matches!(err, ExportError::Io { .. }));
    }

    #[test]
    fn test_unknown_session_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let options = ExportOptions::save_to(dir.path());
        let err = export_session(
            &MemorySource::new(),
            &fixtures::KEY,
            &ExportConfig::default(),
            &options,
        )
        .unwrap_err();
        assert!(matches!(err, ExportError::NotFound { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
