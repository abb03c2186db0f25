//! Session resolution
//!
//! Gathers every row the document builder needs for one session, checking
//! that the point lookups really are point lookups.

use crate::error::{ExportError, Result};
use crate::model::{
    Attribute, RoiRow, ScanRow, SessionKey, SessionRow, SessionTrialRow, SubjectRow,
    TrialEventRow, TrialRow, VirusInjectionRow,
};
use crate::source::SessionSource;

/// All rows belonging to one session
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSession {
    pub session: SessionRow,
    pub subject: SubjectRow,
    pub gene_modifications: Vec<String>,
    pub virus_injections: Vec<VirusInjectionRow>,
    pub scan: ScanRow,
    pub rois: Vec<RoiRow>,
    pub session_trials: Vec<SessionTrialRow>,
    pub trials: Vec<TrialRow>,
    pub trial_events: Vec<TrialEventRow>,
    pub trial_heading: &'static [Attribute],
}

impl ResolvedSession {
    pub fn key(&self) -> SessionKey {
        self.session.key()
    }
}

/// Exactly one row, or `NotFound` / `AmbiguousKey`
fn exactly_one<T>(mut rows: Vec<T>, entity: &'static str, key: SessionKey) -> Result<T> {
    match rows.len() {
        0 => Err(ExportError::NotFound { entity, key }),
        1 => Ok(rows.remove(0)),
        count => Err(ExportError::AmbiguousKey { entity, key, count }),
    }
}

/// Fetch a session and everything hanging off it.
///
/// The session and its scan must each resolve to exactly one row; the
/// subject must exist. Trials, events and virus injections may be empty.
pub fn resolve_session<S: SessionSource>(source: &S, key: &SessionKey) -> Result<ResolvedSession> {
    let key = *key;
    let session = exactly_one(
        source.sessions(&key).map_err(ExportError::from_source)?,
        "session",
        key,
    )?;

    let subject = source
        .subject(session.subject_id)
        .map_err(ExportError::from_source)?
        .ok_or(ExportError::NotFound {
            entity: "subject",
            key,
        })?;
    let gene_modifications = source
        .gene_modifications(session.subject_id)
        .map_err(ExportError::from_source)?;
    let virus_injections = source.virus_injections(&key).map_err(ExportError::from_source)?;

    let scan = exactly_one(source.scans(&key).map_err(ExportError::from_source)?, "scan", key)?;
    let rois = source.rois(&key).map_err(ExportError::from_source)?;

    let session_trials = source.session_trials(&key).map_err(ExportError::from_source)?;
    let trials = source.trials(&key).map_err(ExportError::from_source)?;
    let trial_events = source.trial_events(&key).map_err(ExportError::from_source)?;

    tracing::debug!(
        %key,
        rois = rois.len(),
        trials = trials.len(),
        events = trial_events.len(),
        "resolved session"
    );

    Ok(ResolvedSession {
        session,
        subject,
        gene_modifications,
        virus_injections,
        scan,
        rois,
        session_trials,
        trials,
        trial_events,
        trial_heading: source.trial_heading(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::fixtures;
    use crate::model::ScanRow;
    use crate::source::MemorySource;
    use serde_json::Value;

    // ==========================================================================
    // LOOKUP CARDINALITY
    // ==========================================================================
    //
    // The read interface is generic, so the resolver re-checks what the
    // schema's primary keys already guarantee.
    // ==========================================================================

    #[test]
    fn test_resolves_complete_session() {
        let source = fixtures::source();
        let resolved = resolve_session(&source, &fixtures::KEY).unwrap();
        assert_eq!(resolved.key(), fixtures::KEY);
        assert_eq!(resolved.subject.species, "Mus musculus");
        assert_eq!(resolved.gene_modifications, vec!["Cre-A", "Cre-B"]);
        assert_eq!(resolved.rois.len(), 2);
        assert_eq!(resolved.trials.len(), 2);
        assert_eq!(resolved.trial_heading.len(), 11);
    }

    #[test]
    fn test_missing_session_is_not_found() {
        let source = fixtures::source();
        let err = resolve_session(&source, &SessionKey::new(431301, 99)).unwrap_err();
        assert!(matches!(err, ExportError::NotFound { entity: "session", .. }));
    }

    #[test]
    fn test_session_without_scan_is_not_found() {
        let mut source = MemorySource::new();
        source.add_subject(fixtures::subject());
        source.add_session(fixtures::session()).unwrap();

        let err = resolve_session(&source, &fixtures::KEY).unwrap_err();
        assert!(matches!(err, ExportError::NotFound { entity: "scan", .. }));
    }

    #[test]
    fn test_duplicate_rows_are_ambiguous() {
        let rows = vec![1, 2, 3];
        let err = exactly_one(rows, "session", fixtures::KEY).unwrap_err();
        assert!(matches!(
            err,
            ExportError::AmbiguousKey { entity: "session", count: 3, .. }
        ));
        assert_eq!(exactly_one(vec![7], "scan", fixtures::KEY).unwrap(), 7);
    }

    #[test]
    fn test_trials_and_injections_may_be_empty() {
        let mut source = MemorySource::new();
        source.add_subject(fixtures::subject());
        source.add_session(fixtures::session()).unwrap();
        source
            .add_scan(ScanRow {
                image_beads: Value::Null,
                ..fixtures::scan()
            })
            .unwrap();

        let resolved = resolve_session(&source, &fixtures::KEY).unwrap();
        assert!(resolved.session_trials.is_empty());
        assert!(resolved.trials.is_empty());
        assert!(resolved.virus_injections.is_empty());
        assert!(resolved.gene_modifications.is_empty());
    }
}
