//! End-to-end export from a SQLite pipeline database

use chrono::NaiveDate;
use pipeline_nwb::batch::{export_all, FailurePolicy};
use pipeline_nwb::model::{
    BehaviorTrialRow, CellType, EarlyLick, Outcome, RoiRow, ScanRow, SessionRow, SessionTrialRow,
    SubjectRow, Task, TrialEventRow, TrialEventType, TrialInstruction, TrialRow,
};
use pipeline_nwb::nwb::{io, SeriesData};
use pipeline_nwb::{
    export_session, Database, ExportConfig, ExportOptions, SessionIdentity, SessionKey, WriteStatus,
};
use serde_json::json;
use tempfile::TempDir;

const SUBJECT: i32 = 440956;

fn key(session: i32) -> SessionKey {
    SessionKey::new(SUBJECT, session)
}

fn session_row(session: i32) -> SessionRow {
    SessionRow {
        subject_id: SUBJECT,
        session,
        session_date: NaiveDate::from_ymd_opt(2019, 2, session as u32).unwrap(),
        fov: 1,
        username: "rig_operator".to_string(),
        rig: Some("2P1".to_string()),
    }
}

fn trial(key: SessionKey, trial: i32, start: f64, stop: Option<f64>) -> TrialRow {
    TrialRow {
        session_trial: SessionTrialRow {
            key,
            trial,
            trial_uid: Some(trial * 100),
            start_time: start,
            stop_time: stop,
        },
        behavior: BehaviorTrialRow {
            key,
            trial,
            task: Task::S1Stim,
            task_protocol: 4,
            trial_instruction: TrialInstruction::Left,
            early_lick: EarlyLick::NoEarly,
            outcome: Outcome::Hit,
        },
    }
}

/// Session 1 carries trials and events, session 2 has a scan but no trials
fn populated_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_at(dir.path().join("pipeline.db")).unwrap();

    db.insert_subject(&SubjectRow {
        subject_id: SUBJECT,
        username: "husbandry".to_string(),
        cage_number: None,
        date_of_birth: NaiveDate::from_ymd_opt(2018, 10, 1),
        sex: "M".to_string(),
        species: "Mus musculus".to_string(),
        animal_source: None,
    })
    .unwrap();
    db.insert_gene_modification(SUBJECT, "Cre-B").unwrap();
    db.insert_gene_modification(SUBJECT, "Cre-A").unwrap();

    for session in [1, 2] {
        db.insert_session(&session_row(session)).unwrap();
        db.insert_scan(&ScanRow {
            key: key(session),
            image_gcamp: json!([[0.5, 1.5], [2.5, 3.5]]),
            image_ctb: json!([[1.0, 0.0], [0.0, 1.0]]),
            image_beads: json!(null),
            recording_depth: 400.0,
            frame_time: vec![0.0, 0.25, 0.5],
        })
        .unwrap();
        db.insert_roi(&RoiRow {
            key: key(session),
            roi_idx: 1,
            cell_type: CellType::It,
            roi_pixel_list: vec![1, 1, 2, 512, 262144],
            neuropil_pixel_list: vec![1024],
            roi_trace: vec![0.1, 0.2, 0.3],
            neuropil_trace: vec![0.01, 0.02, 0.03],
            included: true,
        })
        .unwrap();
    }

    db.insert_trial(&trial(key(1), 1, 0.0, Some(3.5))).unwrap();
    db.insert_trial(&trial(key(1), 2, 20.0, None)).unwrap();
    for (trial, id, ty, time) in [
        (1, 1, TrialEventType::Sample, 0.5),
        (1, 2, TrialEventType::Go, 2.0),
        (2, 1, TrialEventType::Go, 1.75),
    ] {
        db.insert_trial_event(&TrialEventRow {
            key: key(1),
            trial,
            trial_event_id: id,
            trial_event_type: ty,
            trial_event_time: time,
            duration: None,
        })
        .unwrap();
    }

    (dir, db)
}

#[test]
fn test_export_writes_named_file_and_skips_rerun() {
    let (_db_dir, db) = populated_db();
    let out = tempfile::tempdir().unwrap();
    let options = ExportOptions::save_to(out.path());
    let config = ExportConfig::default();

    let first = export_session(&db, &key(1), &config, &options).unwrap();
    let path = out.path().join("440956_2019-02-01_1.nwb.json");
    assert_eq!(first.status, WriteStatus::Written(path.clone()));
    let bytes = std::fs::read(&path).unwrap();

    let second = export_session(&db, &key(1), &config, &options).unwrap();
    assert_eq!(second.status, WriteStatus::Skipped(path.clone()));
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
}

#[test]
fn test_artifact_round_trips_session_identity() {
    let (_db_dir, db) = populated_db();
    let out = tempfile::tempdir().unwrap();
    let outcome = export_session(
        &db,
        &key(1),
        &ExportConfig::default(),
        &ExportOptions::save_to(out.path()),
    )
    .unwrap();

    let back = io::read(outcome.status.path().unwrap()).unwrap();
    assert_eq!(back, outcome.document);
    let identity: SessionIdentity = back.identity().unwrap();
    assert_eq!(identity, session_row(1).identity());
}

#[test]
fn test_document_contents_from_database() {
    let (_db_dir, db) = populated_db();
    let nwb = export_session(&db, &key(1), &ExportConfig::default(), &ExportOptions::default())
        .unwrap()
        .document;

    assert_eq!(nwb.subject.genotype, "Cre-A x Cre-B");
    assert_eq!(
        nwb.subject.date_of_birth,
        NaiveDate::from_ymd_opt(2018, 10, 1).unwrap().and_hms_opt(0, 0, 0)
    );
    assert_eq!(nwb.virus, "[]");

    // Null beads leave only the two required images
    assert_eq!(nwb.images().unwrap().images.len(), 2);

    let seg = nwb.plane_segmentation().unwrap();
    let mask = &seg.rois[0].image_mask;
    // Five indices, one repeated
    assert_eq!(mask.count(), 4);
    assert!(mask.get(511, 0));
    assert!(mask.get(511, 511));
    assert_eq!(seg.rois[0].neuropil_mask.pixels(), vec![[511, 1]]);
    assert_eq!(seg.rois[0].neuropil_trace, vec![0.01, 0.02, 0.03]);

    let trials = nwb.trials.as_ref().unwrap();
    let stops: Vec<f64> = trials.rows.iter().map(|t| t.stop_time).collect();
    assert_eq!(stops, vec![3.5, 5.0]);
    assert_eq!(trials.rows[0].values["task"], json!("s1 stim"));

    let events = nwb.behavioral_events().unwrap();
    let go = events.get("go").unwrap();
    assert_eq!(go.timestamps, vec![2.0, 21.75]);
    assert_eq!(go.data, SeriesData::Sample(vec![1.0, 1.0]));
    assert_eq!(events.get("sample").unwrap().timestamps, vec![0.5]);
    assert!(events.get("trialend").is_none());
}

#[test]
fn test_session_without_trials_has_no_trial_table() {
    let (_db_dir, db) = populated_db();
    let nwb = export_session(&db, &key(2), &ExportConfig::default(), &ExportOptions::default())
        .unwrap()
        .document;
    assert!(nwb.trials.is_none());
    assert!(nwb.behavioral_events().unwrap().time_series.is_empty());
}

#[test]
fn test_batch_exports_all_sessions() {
    let (_db_dir, db) = populated_db();
    let out = tempfile::tempdir().unwrap();
    let report = export_all(
        &db,
        &ExportConfig::default(),
        &ExportOptions::save_to(out.path()),
        FailurePolicy::Abort,
    )
    .unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.written.len(), 2);
    let mut names: Vec<String> = std::fs::read_dir(out.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["440956_2019-02-01_1.nwb.json", "440956_2019-02-02_2.nwb.json"]);
}
