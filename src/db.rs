//! SQLite database with Diesel ORM
//!
//! Hosts the experiment pipeline schema: subjects, sessions, scans and their
//! ROIs, behavioral trials and events, plus the closed lookup tables. Tables
//! are created on open and lookup contents are seeded idempotently.
//!
//! Upstream ingestion writes through the `insert_*` methods; the exporter
//! reads through the [`SessionSource`] implementation only.

use crate::error::MalformedField;
use crate::model::lookup::{
    CellType, EarlyLick, Outcome, Task, TrialEventType, TrialInstruction, TASK_PROTOCOLS,
};
use crate::model::{
    BehaviorTrialRow, ImagingDepthRow, RoiRow, ScanRow, SessionKey, SessionRow, SessionTrialRow,
    SubjectRow, TrialEventRow, TrialRow, TrialTraceRow, VirusInjection, VirusInjectionRow,
    VirusRow,
};
use crate::nwb::samples::{Decoded, Encoded};
use crate::schema::*;
use crate::source::SessionSource;
use chrono::NaiveDate;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sql_types::{Integer, Text};
use diesel::sqlite::SqliteConnection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

const DEFAULT_DB_PATH: &str = "pipeline.db";

const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Diesel Models
// ============================================================================

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = subjects)]
struct SubjectRecord {
    subject_id: i32,
    username: String,
    cage_number: Option<i32>,
    date_of_birth: Option<String>,
    sex: String,
    species: String,
    animal_source: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = subject_gene_modifications)]
struct GeneModificationRecord<'a> {
    subject_id: i32,
    gene_modification: &'a str,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = sessions)]
struct SessionRecord {
    subject_id: i32,
    session: i32,
    session_date: String,
    fov: i32,
    username: String,
    rig: Option<String>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = session_imaging_depths)]
struct ImagingDepthRecord {
    subject_id: i32,
    session: i32,
    imaging_depth: i32,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = viruses)]
struct VirusRecord {
    virus_id: i32,
    virus_name: String,
    virus_source: Option<String>,
    virus_lot: Option<String>,
    titer: Option<f64>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = virus_injections)]
struct VirusInjectionRecord {
    subject_id: i32,
    session: i32,
    injection_id: i32,
    virus_id: i32,
    brain_area: String,
    hemisphere: String,
    injection_volume: f64,
    ap_location: Option<f64>,
    ml_location: Option<f64>,
    dv_location: Option<f64>,
    username: Option<String>,
}

/// Array-valued columns hold JSON text
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = scans)]
struct ScanRecord {
    subject_id: i32,
    session: i32,
    image_gcamp: String,
    image_ctb: String,
    image_beads: Option<String>,
    recording_depth: f64,
    frame_time: String,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = scan_rois)]
struct RoiRecord {
    subject_id: i32,
    session: i32,
    roi_idx: i32,
    cell_type: String,
    roi_pixel_list: String,
    neuropil_pixel_list: String,
    roi_trace: String,
    neuropil_trace: String,
    inc: i32,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = session_trials)]
struct SessionTrialRecord {
    subject_id: i32,
    session: i32,
    trial: i32,
    trial_uid: Option<i32>,
    start_time: f64,
    stop_time: Option<f64>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = behavior_trials)]
struct BehaviorTrialRecord {
    subject_id: i32,
    session: i32,
    trial: i32,
    task: String,
    task_protocol: i32,
    trial_instruction: String,
    early_lick: String,
    outcome: String,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = trial_events)]
struct TrialEventRecord {
    subject_id: i32,
    session: i32,
    trial: i32,
    trial_event_id: i32,
    trial_event_type: String,
    trial_event_time: f64,
    duration: Option<f64>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = trial_traces)]
struct TrialTraceRecord {
    subject_id: i32,
    session: i32,
    roi_idx: i32,
    trial: i32,
    trial_calcium_trace: String,
}

// ============================================================================
// Record <-> row conversion
// ============================================================================

fn parse_date(field: &str, text: &str) -> std::result::Result<NaiveDate, MalformedField> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| MalformedField::new(field, format!("{:?} is not a date: {}", text, e)))
}

fn parse_json<T: DeserializeOwned>(field: &str, text: &str) -> std::result::Result<T, MalformedField> {
    serde_json::from_str(text).map_err(|e| MalformedField::new(field, e.to_string()))
}

fn to_json<T: Serialize + ?Sized>(field: &str, value: &T) -> std::result::Result<String, MalformedField> {
    serde_json::to_string(value).map_err(|e| MalformedField::new(field, e.to_string()))
}

fn key_of(subject_id: i32, session: i32) -> SessionKey {
    SessionKey::new(subject_id, session)
}

impl TryFrom<SubjectRecord> for SubjectRow {
    type Error = MalformedField;

    fn try_from(r: SubjectRecord) -> std::result::Result<Self, Self::Error> {
        Ok(SubjectRow {
            subject_id: r.subject_id,
            username: r.username,
            cage_number: r.cage_number,
            date_of_birth: r
                .date_of_birth
                .as_deref()
                .map(|d| parse_date("date_of_birth", d))
                .transpose()?,
            sex: r.sex,
            species: r.species,
            animal_source: r.animal_source,
        })
    }
}

impl From<&SubjectRow> for SubjectRecord {
    fn from(s: &SubjectRow) -> Self {
        SubjectRecord {
            subject_id: s.subject_id,
            username: s.username.clone(),
            cage_number: s.cage_number,
            date_of_birth: s.date_of_birth.map(|d| d.format(DATE_FORMAT).to_string()),
            sex: s.sex.clone(),
            species: s.species.clone(),
            animal_source: s.animal_source.clone(),
        }
    }
}

impl TryFrom<SessionRecord> for SessionRow {
    type Error = MalformedField;

    fn try_from(r: SessionRecord) -> std::result::Result<Self, Self::Error> {
        Ok(SessionRow {
            subject_id: r.subject_id,
            session: r.session,
            session_date: parse_date("session_date", &r.session_date)?,
            fov: r.fov,
            username: r.username,
            rig: r.rig,
        })
    }
}

impl From<&SessionRow> for SessionRecord {
    fn from(s: &SessionRow) -> Self {
        SessionRecord {
            subject_id: s.subject_id,
            session: s.session,
            session_date: s.session_date.format(DATE_FORMAT).to_string(),
            fov: s.fov,
            username: s.username.clone(),
            rig: s.rig.clone(),
        }
    }
}

impl From<VirusRecord> for VirusRow {
    fn from(r: VirusRecord) -> Self {
        VirusRow {
            virus_id: r.virus_id,
            virus_name: r.virus_name,
            virus_source: r.virus_source,
            virus_lot: r.virus_lot,
            titer: r.titer,
        }
    }
}

impl From<VirusInjectionRecord> for VirusInjection {
    fn from(r: VirusInjectionRecord) -> Self {
        VirusInjection {
            key: key_of(r.subject_id, r.session),
            injection_id: r.injection_id,
            virus_id: r.virus_id,
            brain_area: r.brain_area,
            hemisphere: r.hemisphere,
            injection_volume: r.injection_volume,
            ap_location: r.ap_location,
            ml_location: r.ml_location,
            dv_location: r.dv_location,
            username: r.username,
        }
    }
}

impl TryFrom<ScanRecord> for ScanRow {
    type Error = MalformedField;

    fn try_from(r: ScanRecord) -> std::result::Result<Self, Self::Error> {
        Ok(ScanRow {
            key: key_of(r.subject_id, r.session),
            image_gcamp: parse_json("image_gcamp", &r.image_gcamp)?,
            image_ctb: parse_json("image_ctb", &r.image_ctb)?,
            image_beads: match r.image_beads {
                Some(text) => parse_json("image_beads", &text)?,
                None => Value::Null,
            },
            recording_depth: r.recording_depth,
            frame_time: parse_json::<Decoded>("frame_time", &r.frame_time)?.0,
        })
    }
}

impl TryFrom<&ScanRow> for ScanRecord {
    type Error = MalformedField;

    fn try_from(s: &ScanRow) -> std::result::Result<Self, Self::Error> {
        Ok(ScanRecord {
            subject_id: s.key.subject_id,
            session: s.key.session,
            image_gcamp: to_json("image_gcamp", &s.image_gcamp)?,
            image_ctb: to_json("image_ctb", &s.image_ctb)?,
            image_beads: match &s.image_beads {
                Value::Null => None,
                beads => Some(to_json("image_beads", beads)?),
            },
            recording_depth: s.recording_depth,
            frame_time: to_json("frame_time", &Encoded(&s.frame_time))?,
        })
    }
}

impl TryFrom<RoiRecord> for RoiRow {
    type Error = MalformedField;

    fn try_from(r: RoiRecord) -> std::result::Result<Self, Self::Error> {
        Ok(RoiRow {
            key: key_of(r.subject_id, r.session),
            roi_idx: r.roi_idx,
            cell_type: r.cell_type.parse()?,
            roi_pixel_list: parse_json("roi_pixel_list", &r.roi_pixel_list)?,
            neuropil_pixel_list: parse_json("neuropil_pixel_list", &r.neuropil_pixel_list)?,
            roi_trace: parse_json::<Decoded>("roi_trace", &r.roi_trace)?.0,
            neuropil_trace: parse_json::<Decoded>("neuropil_trace", &r.neuropil_trace)?.0,
            included: r.inc != 0,
        })
    }
}

impl TryFrom<&RoiRow> for RoiRecord {
    type Error = MalformedField;

    fn try_from(r: &RoiRow) -> std::result::Result<Self, Self::Error> {
        Ok(RoiRecord {
            subject_id: r.key.subject_id,
            session: r.key.session,
            roi_idx: r.roi_idx,
            cell_type: r.cell_type.label().to_string(),
            roi_pixel_list: to_json("roi_pixel_list", &r.roi_pixel_list)?,
            neuropil_pixel_list: to_json("neuropil_pixel_list", &r.neuropil_pixel_list)?,
            roi_trace: to_json("roi_trace", &Encoded(&r.roi_trace))?,
            neuropil_trace: to_json("neuropil_trace", &Encoded(&r.neuropil_trace))?,
            inc: i32::from(r.included),
        })
    }
}

impl From<SessionTrialRecord> for SessionTrialRow {
    fn from(r: SessionTrialRecord) -> Self {
        SessionTrialRow {
            key: key_of(r.subject_id, r.session),
            trial: r.trial,
            trial_uid: r.trial_uid,
            start_time: r.start_time,
            stop_time: r.stop_time,
        }
    }
}

impl TryFrom<BehaviorTrialRecord> for BehaviorTrialRow {
    type Error = MalformedField;

    fn try_from(r: BehaviorTrialRecord) -> std::result::Result<Self, Self::Error> {
        Ok(BehaviorTrialRow {
            key: key_of(r.subject_id, r.session),
            trial: r.trial,
            task: r.task.parse()?,
            task_protocol: r.task_protocol,
            trial_instruction: r.trial_instruction.parse()?,
            early_lick: r.early_lick.parse()?,
            outcome: r.outcome.parse()?,
        })
    }
}

impl TryFrom<TrialEventRecord> for TrialEventRow {
    type Error = MalformedField;

    fn try_from(r: TrialEventRecord) -> std::result::Result<Self, Self::Error> {
        Ok(TrialEventRow {
            key: key_of(r.subject_id, r.session),
            trial: r.trial,
            trial_event_id: r.trial_event_id,
            trial_event_type: r.trial_event_type.parse()?,
            trial_event_time: r.trial_event_time,
            duration: r.duration,
        })
    }
}

impl TryFrom<TrialTraceRecord> for TrialTraceRow {
    type Error = MalformedField;

    fn try_from(r: TrialTraceRecord) -> std::result::Result<Self, Self::Error> {
        Ok(TrialTraceRow {
            key: key_of(r.subject_id, r.session),
            roi_idx: r.roi_idx,
            trial: r.trial,
            trial_calcium_trace: parse_json::<Decoded>("trial_calcium_trace", &r.trial_calcium_trace)?.0,
        })
    }
}

fn convert<R, T>(records: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = MalformedField>,
{
    records
        .into_iter()
        .map(|r| T::try_from(r).map_err(DbError::from))
        .collect()
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

/// Error type for database operations
#[derive(Debug)]
pub enum DbError {
    Connection(String),
    Query(diesel::result::Error),
    Pool(diesel::r2d2::Error),
    Malformed(MalformedField),
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::Connection(msg) => write!(f, "Connection error: {}", msg),
            DbError::Query(e) => write!(f, "Query error: {}", e),
            DbError::Pool(e) => write!(f, "Pool error: {}", e),
            DbError::Malformed(e) => write!(f, "Stored row is malformed: {}", e),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DbError::Connection(_) => None,
            DbError::Query(e) => Some(e),
            DbError::Pool(e) => Some(e),
            DbError::Malformed(e) => Some(e),
        }
    }
}

impl From<diesel::result::Error> for DbError {
    fn from(e: diesel::result::Error) -> Self {
        DbError::Query(e)
    }
}

impl From<diesel::r2d2::Error> for DbError {
    fn from(e: diesel::r2d2::Error) -> Self {
        DbError::Pool(e)
    }
}

impl From<MalformedField> for DbError {
    fn from(e: MalformedField) -> Self {
        DbError::Malformed(e)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// SQLite only enforces REFERENCES clauses when asked to, per connection
#[derive(Debug)]
struct EnforceForeignKeys;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for EnforceForeignKeys {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        diesel::sql_query("PRAGMA foreign_keys = ON")
            .execute(conn)
            .map(|_| ())
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

const SCHEMA_DDL: &[&str] = &[
    // Lookup tables
    r#"CREATE TABLE IF NOT EXISTS tasks (
        task TEXT PRIMARY KEY NOT NULL,
        task_description TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS task_protocols (
        task TEXT NOT NULL REFERENCES tasks(task),
        task_protocol INTEGER NOT NULL,
        task_protocol_description TEXT NOT NULL,
        PRIMARY KEY (task, task_protocol)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS trial_instructions (
        trial_instruction TEXT PRIMARY KEY NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS early_licks (
        early_lick TEXT PRIMARY KEY NOT NULL,
        early_lick_description TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS outcomes (
        outcome TEXT PRIMARY KEY NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS trial_event_types (
        trial_event_type TEXT PRIMARY KEY NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS cell_types (
        cell_type TEXT PRIMARY KEY NOT NULL,
        cell_type_description TEXT NOT NULL
    )"#,
    // Subjects and sessions
    r#"CREATE TABLE IF NOT EXISTS subjects (
        subject_id INTEGER PRIMARY KEY NOT NULL,
        username TEXT NOT NULL,
        cage_number INTEGER,
        date_of_birth TEXT,
        sex TEXT NOT NULL,
        species TEXT NOT NULL,
        animal_source TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS subject_gene_modifications (
        subject_id INTEGER NOT NULL REFERENCES subjects(subject_id),
        gene_modification TEXT NOT NULL,
        PRIMARY KEY (subject_id, gene_modification)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sessions (
        subject_id INTEGER NOT NULL REFERENCES subjects(subject_id),
        session INTEGER NOT NULL,
        session_date TEXT NOT NULL,
        fov INTEGER NOT NULL DEFAULT 1,
        username TEXT NOT NULL,
        rig TEXT,
        PRIMARY KEY (subject_id, session)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS session_imaging_depths (
        subject_id INTEGER NOT NULL,
        session INTEGER NOT NULL,
        imaging_depth INTEGER NOT NULL,
        PRIMARY KEY (subject_id, session, imaging_depth),
        FOREIGN KEY (subject_id, session) REFERENCES sessions(subject_id, session)
    )"#,
    // Viruses
    r#"CREATE TABLE IF NOT EXISTS viruses (
        virus_id INTEGER PRIMARY KEY NOT NULL,
        virus_name TEXT NOT NULL,
        virus_source TEXT,
        virus_lot TEXT,
        titer REAL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS virus_injections (
        subject_id INTEGER NOT NULL,
        session INTEGER NOT NULL,
        injection_id INTEGER NOT NULL,
        virus_id INTEGER NOT NULL REFERENCES viruses(virus_id),
        brain_area TEXT NOT NULL,
        hemisphere TEXT NOT NULL,
        injection_volume REAL NOT NULL,
        ap_location REAL,
        ml_location REAL,
        dv_location REAL,
        username TEXT,
        PRIMARY KEY (subject_id, session, injection_id),
        FOREIGN KEY (subject_id, session) REFERENCES sessions(subject_id, session)
    )"#,
    // Imaging
    r#"CREATE TABLE IF NOT EXISTS scans (
        subject_id INTEGER NOT NULL,
        session INTEGER NOT NULL,
        image_gcamp TEXT NOT NULL,
        image_ctb TEXT NOT NULL,
        image_beads TEXT,
        recording_depth REAL NOT NULL,
        frame_time TEXT NOT NULL,
        PRIMARY KEY (subject_id, session),
        FOREIGN KEY (subject_id, session) REFERENCES sessions(subject_id, session)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS scan_rois (
        subject_id INTEGER NOT NULL,
        session INTEGER NOT NULL,
        roi_idx INTEGER NOT NULL,
        cell_type TEXT NOT NULL REFERENCES cell_types(cell_type),
        roi_pixel_list TEXT NOT NULL,
        neuropil_pixel_list TEXT NOT NULL,
        roi_trace TEXT NOT NULL,
        neuropil_trace TEXT NOT NULL,
        inc INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (subject_id, session, roi_idx),
        FOREIGN KEY (subject_id, session) REFERENCES scans(subject_id, session)
    )"#,
    // Trials
    r#"CREATE TABLE IF NOT EXISTS session_trials (
        subject_id INTEGER NOT NULL,
        session INTEGER NOT NULL,
        trial INTEGER NOT NULL,
        trial_uid INTEGER,
        start_time REAL NOT NULL,
        stop_time REAL,
        PRIMARY KEY (subject_id, session, trial),
        FOREIGN KEY (subject_id, session) REFERENCES sessions(subject_id, session)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS behavior_trials (
        subject_id INTEGER NOT NULL,
        session INTEGER NOT NULL,
        trial INTEGER NOT NULL,
        task TEXT NOT NULL,
        task_protocol INTEGER NOT NULL,
        trial_instruction TEXT NOT NULL REFERENCES trial_instructions(trial_instruction),
        early_lick TEXT NOT NULL REFERENCES early_licks(early_lick),
        outcome TEXT NOT NULL REFERENCES outcomes(outcome),
        PRIMARY KEY (subject_id, session, trial),
        FOREIGN KEY (subject_id, session, trial)
            REFERENCES session_trials(subject_id, session, trial),
        FOREIGN KEY (task, task_protocol) REFERENCES task_protocols(task, task_protocol)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS trial_events (
        subject_id INTEGER NOT NULL,
        session INTEGER NOT NULL,
        trial INTEGER NOT NULL,
        trial_event_id INTEGER NOT NULL,
        trial_event_type TEXT NOT NULL REFERENCES trial_event_types(trial_event_type),
        trial_event_time REAL NOT NULL,
        duration REAL,
        PRIMARY KEY (subject_id, session, trial, trial_event_id),
        FOREIGN KEY (subject_id, session, trial)
            REFERENCES behavior_trials(subject_id, session, trial)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS trial_traces (
        subject_id INTEGER NOT NULL,
        session INTEGER NOT NULL,
        roi_idx INTEGER NOT NULL,
        trial INTEGER NOT NULL,
        trial_calcium_trace TEXT NOT NULL,
        PRIMARY KEY (subject_id, session, roi_idx, trial),
        FOREIGN KEY (subject_id, session, roi_idx)
            REFERENCES scan_rois(subject_id, session, roi_idx),
        FOREIGN KEY (subject_id, session, trial)
            REFERENCES session_trials(subject_id, session, trial)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_trial_events_type ON trial_events(trial_event_type)",
];

impl Database {
    /// Get the default database path
    pub fn db_path() -> std::path::PathBuf {
        std::path::PathBuf::from(DEFAULT_DB_PATH)
    }

    /// Open database at default path
    pub fn open() -> Result<Self> {
        Self::open_at(DEFAULT_DB_PATH)
    }

    /// Open database at specified path, creating the schema if needed
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .connection_customizer(Box::new(EnforceForeignKeys))
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| DbError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        for ddl in SCHEMA_DDL {
            diesel::sql_query(*ddl).execute(&mut conn)?;
        }

        self.seed_lookups(&mut conn)
    }

    /// Insert the fixed lookup contents; existing rows are left untouched
    fn seed_lookups(&self, conn: &mut SqliteConnection) -> Result<()> {
        for task in Task::ALL {
            diesel::sql_query("INSERT OR IGNORE INTO tasks (task, task_description) VALUES (?, ?)")
                .bind::<Text, _>(task.label())
                .bind::<Text, _>(task.description())
                .execute(conn)?;
        }

        for p in TASK_PROTOCOLS {
            diesel::sql_query(
                "INSERT OR IGNORE INTO task_protocols (task, task_protocol, task_protocol_description) VALUES (?, ?, ?)",
            )
            .bind::<Text, _>(p.task.label())
            .bind::<Integer, _>(p.protocol)
            .bind::<Text, _>(p.description)
            .execute(conn)?;
        }

        for instruction in TrialInstruction::ALL {
            diesel::sql_query("INSERT OR IGNORE INTO trial_instructions (trial_instruction) VALUES (?)")
                .bind::<Text, _>(instruction.label())
                .execute(conn)?;
        }

        for lick in EarlyLick::ALL {
            diesel::sql_query(
                "INSERT OR IGNORE INTO early_licks (early_lick, early_lick_description) VALUES (?, ?)",
            )
            .bind::<Text, _>(lick.label())
            .bind::<Text, _>(lick.description())
            .execute(conn)?;
        }

        for outcome in Outcome::ALL {
            diesel::sql_query("INSERT OR IGNORE INTO outcomes (outcome) VALUES (?)")
                .bind::<Text, _>(outcome.label())
                .execute(conn)?;
        }

        for ty in TrialEventType::ALL {
            diesel::sql_query("INSERT OR IGNORE INTO trial_event_types (trial_event_type) VALUES (?)")
                .bind::<Text, _>(ty.label())
                .execute(conn)?;
        }

        for cell in CellType::ALL {
            diesel::sql_query(
                "INSERT OR IGNORE INTO cell_types (cell_type, cell_type_description) VALUES (?, ?)",
            )
            .bind::<Text, _>(cell.label())
            .bind::<Text, _>(cell.description())
            .execute(conn)?;
        }

        Ok(())
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    pub fn insert_subject(&self, subject: &SubjectRow) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(subjects::table)
            .values(&SubjectRecord::from(subject))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn insert_gene_modification(&self, subject_id: i32, modification: &str) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(subject_gene_modifications::table)
            .values(&GeneModificationRecord {
                subject_id,
                gene_modification: modification,
            })
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn insert_session(&self, session: &SessionRow) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(sessions::table)
            .values(&SessionRecord::from(session))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn insert_imaging_depth(&self, depth: &ImagingDepthRow) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(session_imaging_depths::table)
            .values(&ImagingDepthRecord {
                subject_id: depth.key.subject_id,
                session: depth.key.session,
                imaging_depth: depth.imaging_depth,
            })
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn insert_virus(&self, virus: &VirusRow) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(viruses::table)
            .values(&VirusRecord {
                virus_id: virus.virus_id,
                virus_name: virus.virus_name.clone(),
                virus_source: virus.virus_source.clone(),
                virus_lot: virus.virus_lot.clone(),
                titer: virus.titer,
            })
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn insert_virus_injection(&self, injection: &VirusInjection) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(virus_injections::table)
            .values(&VirusInjectionRecord {
                subject_id: injection.key.subject_id,
                session: injection.key.session,
                injection_id: injection.injection_id,
                virus_id: injection.virus_id,
                brain_area: injection.brain_area.clone(),
                hemisphere: injection.hemisphere.clone(),
                injection_volume: injection.injection_volume,
                ap_location: injection.ap_location,
                ml_location: injection.ml_location,
                dv_location: injection.dv_location,
                username: injection.username.clone(),
            })
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn insert_scan(&self, scan: &ScanRow) -> Result<()> {
        let record = ScanRecord::try_from(scan)?;
        let mut conn = self.get_conn()?;
        diesel::insert_into(scans::table)
            .values(&record)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn insert_roi(&self, roi: &RoiRow) -> Result<()> {
        let record = RoiRecord::try_from(roi)?;
        let mut conn = self.get_conn()?;
        diesel::insert_into(scan_rois::table)
            .values(&record)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn insert_session_trial(&self, trial: &SessionTrialRow) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(session_trials::table)
            .values(&SessionTrialRecord {
                subject_id: trial.key.subject_id,
                session: trial.key.session,
                trial: trial.trial,
                trial_uid: trial.trial_uid,
                start_time: trial.start_time,
                stop_time: trial.stop_time,
            })
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn insert_behavior_trial(&self, trial: &BehaviorTrialRow) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(behavior_trials::table)
            .values(&BehaviorTrialRecord {
                subject_id: trial.key.subject_id,
                session: trial.key.session,
                trial: trial.trial,
                task: trial.task.label().to_string(),
                task_protocol: trial.task_protocol,
                trial_instruction: trial.trial_instruction.label().to_string(),
                early_lick: trial.early_lick.label().to_string(),
                outcome: trial.outcome.label().to_string(),
            })
            .execute(&mut conn)?;
        Ok(())
    }

    /// Insert both halves of a behavioral trial atomically
    pub fn insert_trial(&self, trial: &TrialRow) -> Result<()> {
        let mut conn = self.get_conn()?;
        let t = &trial.session_trial;
        let b = &trial.behavior;
        conn.transaction::<_, DbError, _>(|conn| {
            diesel::insert_into(session_trials::table)
                .values(&SessionTrialRecord {
                    subject_id: t.key.subject_id,
                    session: t.key.session,
                    trial: t.trial,
                    trial_uid: t.trial_uid,
                    start_time: t.start_time,
                    stop_time: t.stop_time,
                })
                .execute(conn)?;
            diesel::insert_into(behavior_trials::table)
                .values(&BehaviorTrialRecord {
                    subject_id: b.key.subject_id,
                    session: b.key.session,
                    trial: b.trial,
                    task: b.task.label().to_string(),
                    task_protocol: b.task_protocol,
                    trial_instruction: b.trial_instruction.label().to_string(),
                    early_lick: b.early_lick.label().to_string(),
                    outcome: b.outcome.label().to_string(),
                })
                .execute(conn)?;
            Ok(())
        })
    }

    pub fn insert_trial_event(&self, event: &TrialEventRow) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(trial_events::table)
            .values(&TrialEventRecord {
                subject_id: event.key.subject_id,
                session: event.key.session,
                trial: event.trial,
                trial_event_id: event.trial_event_id,
                trial_event_type: event.trial_event_type.label().to_string(),
                trial_event_time: event.trial_event_time,
                duration: event.duration,
            })
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn insert_trial_trace(&self, trace: &TrialTraceRow) -> Result<()> {
        let record = TrialTraceRecord {
            subject_id: trace.key.subject_id,
            session: trace.key.session,
            roi_idx: trace.roi_idx,
            trial: trace.trial,
            trial_calcium_trace: to_json("trial_calcium_trace", &Encoded(&trace.trial_calcium_trace))?,
        };
        let mut conn = self.get_conn()?;
        diesel::insert_into(trial_traces::table)
            .values(&record)
            .execute(&mut conn)?;
        Ok(())
    }

    // ========================================================================
    // Queries outside the export path
    // ========================================================================

    pub fn imaging_depths(&self, key: &SessionKey) -> Result<Vec<ImagingDepthRow>> {
        let mut conn = self.get_conn()?;
        let depths = session_imaging_depths::table
            .filter(session_imaging_depths::subject_id.eq(key.subject_id))
            .filter(session_imaging_depths::session.eq(key.session))
            .order(session_imaging_depths::imaging_depth.asc())
            .select(ImagingDepthRecord::as_select())
            .load(&mut conn)?;
        Ok(depths
            .into_iter()
            .map(|d| ImagingDepthRow {
                key: key_of(d.subject_id, d.session),
                imaging_depth: d.imaging_depth,
            })
            .collect())
    }

    /// Per-trial traces of every ROI in a session
    pub fn trial_traces(&self, key: &SessionKey) -> Result<Vec<TrialTraceRow>> {
        let mut conn = self.get_conn()?;
        let records = trial_traces::table
            .filter(trial_traces::subject_id.eq(key.subject_id))
            .filter(trial_traces::session.eq(key.session))
            .order((trial_traces::roi_idx.asc(), trial_traces::trial.asc()))
            .select(TrialTraceRecord::as_select())
            .load(&mut conn)?;
        convert(records)
    }
}

// ============================================================================
// Export read path
// ============================================================================

impl SessionSource for Database {
    type Error = DbError;

    fn session_keys(&self) -> Result<Vec<SessionKey>> {
        let mut conn = self.get_conn()?;
        let keys = sessions::table
            .select((sessions::subject_id, sessions::session))
            .order((sessions::subject_id.asc(), sessions::session.asc()))
            .load::<(i32, i32)>(&mut conn)?;
        Ok(keys.into_iter().map(|(s, n)| key_of(s, n)).collect())
    }

    fn sessions(&self, key: &SessionKey) -> Result<Vec<SessionRow>> {
        let mut conn = self.get_conn()?;
        let records = sessions::table
            .filter(sessions::subject_id.eq(key.subject_id))
            .filter(sessions::session.eq(key.session))
            .select(SessionRecord::as_select())
            .load(&mut conn)?;
        convert(records)
    }

    fn subject(&self, subject_id: i32) -> Result<Option<SubjectRow>> {
        let mut conn = self.get_conn()?;
        let record = subjects::table
            .filter(subjects::subject_id.eq(subject_id))
            .select(SubjectRecord::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(record.map(SubjectRow::try_from).transpose()?)
    }

    fn gene_modifications(&self, subject_id: i32) -> Result<Vec<String>> {
        let mut conn = self.get_conn()?;
        let mods = subject_gene_modifications::table
            .filter(subject_gene_modifications::subject_id.eq(subject_id))
            .select(subject_gene_modifications::gene_modification)
            .order(subject_gene_modifications::gene_modification.asc())
            .load::<String>(&mut conn)?;
        Ok(mods)
    }

    fn virus_injections(&self, key: &SessionKey) -> Result<Vec<VirusInjectionRow>> {
        let mut conn = self.get_conn()?;
        let rows = virus_injections::table
            .inner_join(viruses::table)
            .filter(virus_injections::subject_id.eq(key.subject_id))
            .filter(virus_injections::session.eq(key.session))
            .order(virus_injections::injection_id.asc())
            .select((VirusInjectionRecord::as_select(), VirusRecord::as_select()))
            .load::<(VirusInjectionRecord, VirusRecord)>(&mut conn)?;
        Ok(rows
            .into_iter()
            .map(|(injection, virus)| VirusInjectionRow {
                injection: injection.into(),
                virus: virus.into(),
            })
            .collect())
    }

    fn scans(&self, key: &SessionKey) -> Result<Vec<ScanRow>> {
        let mut conn = self.get_conn()?;
        let records = scans::table
            .filter(scans::subject_id.eq(key.subject_id))
            .filter(scans::session.eq(key.session))
            .select(ScanRecord::as_select())
            .load(&mut conn)?;
        convert(records)
    }

    fn rois(&self, key: &SessionKey) -> Result<Vec<RoiRow>> {
        let mut conn = self.get_conn()?;
        let records = scan_rois::table
            .filter(scan_rois::subject_id.eq(key.subject_id))
            .filter(scan_rois::session.eq(key.session))
            .order(scan_rois::roi_idx.asc())
            .select(RoiRecord::as_select())
            .load(&mut conn)?;
        convert(records)
    }

    fn session_trials(&self, key: &SessionKey) -> Result<Vec<SessionTrialRow>> {
        let mut conn = self.get_conn()?;
        let records = session_trials::table
            .filter(session_trials::subject_id.eq(key.subject_id))
            .filter(session_trials::session.eq(key.session))
            .order(session_trials::trial.asc())
            .select(SessionTrialRecord::as_select())
            .load(&mut conn)?;
        Ok(records.into_iter().map(SessionTrialRow::from).collect())
    }

    fn trials(&self, key: &SessionKey) -> Result<Vec<TrialRow>> {
        let heads = self.session_trials(key)?;

        let mut conn = self.get_conn()?;
        let records = behavior_trials::table
            .filter(behavior_trials::subject_id.eq(key.subject_id))
            .filter(behavior_trials::session.eq(key.session))
            .select(BehaviorTrialRecord::as_select())
            .load(&mut conn)?;
        let mut behavior: BTreeMap<i32, BehaviorTrialRow> = convert::<_, BehaviorTrialRow>(records)?
            .into_iter()
            .map(|b| (b.trial, b))
            .collect();

        // Inner join on trial number; both sides are already scoped to the session
        Ok(heads
            .into_iter()
            .filter_map(|t| {
                behavior.remove(&t.trial).map(|b| TrialRow {
                    session_trial: t,
                    behavior: b,
                })
            })
            .collect())
    }

    fn trial_events(&self, key: &SessionKey) -> Result<Vec<TrialEventRow>> {
        let mut conn = self.get_conn()?;
        let records = trial_events::table
            .filter(trial_events::subject_id.eq(key.subject_id))
            .filter(trial_events::session.eq(key.session))
            .order((trial_events::trial.asc(), trial_events::trial_event_id.asc()))
            .select(TrialEventRecord::as_select())
            .load(&mut conn)?;
        convert(records)
    }
}
