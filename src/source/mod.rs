//! Read access to the experiment pipeline
//!
//! The exporter only ever talks to a [`SessionSource`]; it never sees how the
//! rows are stored. [`Database`](crate::db::Database) serves them from SQLite,
//! [`MemorySource`] from plain maps.

pub mod memory;

pub use memory::{MemoryError, MemorySource};

use crate::model::{
    Attribute, RoiRow, ScanRow, SessionKey, SessionRow, SessionTrialRow, SubjectRow,
    TrialEventRow, TrialRow, VirusInjectionRow, TRIAL_HEADING,
};

/// Read-only queries the exporter issues against the schema.
///
/// Multi-row queries return rows in primary-key order. Point lookups that
/// take a [`SessionKey`] return every matching row so the caller can tell
/// "missing" from "ambiguous".
pub trait SessionSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Keys of every known session
    fn session_keys(&self) -> Result<Vec<SessionKey>, Self::Error>;

    fn sessions(&self, key: &SessionKey) -> Result<Vec<SessionRow>, Self::Error>;

    fn subject(&self, subject_id: i32) -> Result<Option<SubjectRow>, Self::Error>;

    /// Gene modification labels of a subject
    fn gene_modifications(&self, subject_id: i32) -> Result<Vec<String>, Self::Error>;

    /// VirusInjection × Virus rows of a session
    fn virus_injections(&self, key: &SessionKey) -> Result<Vec<VirusInjectionRow>, Self::Error>;

    fn scans(&self, key: &SessionKey) -> Result<Vec<ScanRow>, Self::Error>;

    fn rois(&self, key: &SessionKey) -> Result<Vec<RoiRow>, Self::Error>;

    fn session_trials(&self, key: &SessionKey) -> Result<Vec<SessionTrialRow>, Self::Error>;

    /// SessionTrial × BehaviorTrial rows of a session
    fn trials(&self, key: &SessionKey) -> Result<Vec<TrialRow>, Self::Error>;

    fn trial_events(&self, key: &SessionKey) -> Result<Vec<TrialEventRow>, Self::Error>;

    /// Declared attributes of SessionTrial × BehaviorTrial with descriptions
    fn trial_heading(&self) -> &'static [Attribute] {
        TRIAL_HEADING
    }
}
