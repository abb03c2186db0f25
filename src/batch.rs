//! Batch export of every session in a source
//!
//! Sessions are exported one after another with persistence forced on. What
//! happens after a failed session depends on the [`FailurePolicy`].

use crate::config::ExportConfig;
use crate::error::ExportError;
use crate::export::{export_session, ExportOptions, WriteStatus};
use crate::model::SessionKey;
use crate::source::SessionSource;
use std::path::PathBuf;

/// Reaction to a session that fails to export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop at the first failure
    #[default]
    Abort,
    /// Log the failure and move on to the next session
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub key: SessionKey,
    pub message: String,
}

/// Summary of a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Sessions known to the source
    pub total: usize,
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<SessionFailure>,
}

impl BatchReport {
    /// Sessions that were attempted, whatever the outcome
    pub fn attempted(&self) -> usize {
        self.written.len() + self.skipped.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.attempted() == self.total
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("cannot list sessions: {0}")]
    Enumerate(#[source] ExportError),

    /// A session failed under [`FailurePolicy::Abort`]; `report` covers the
    /// sessions handled before it
    #[error("export of {key} failed, batch aborted: {source}")]
    Aborted {
        key: SessionKey,
        #[source]
        source: ExportError,
        report: BatchReport,
    },
}

/// Per-session notification handed to the progress callback
#[derive(Debug)]
pub struct SessionProgress<'a> {
    /// 1-based position in the batch
    pub position: usize,
    pub total: usize,
    pub key: SessionKey,
    pub result: Result<&'a WriteStatus, &'a ExportError>,
}

/// Export every session, writing into `options.output_dir`
pub fn export_all<S: SessionSource>(
    source: &S,
    config: &ExportConfig,
    options: &ExportOptions,
    policy: FailurePolicy,
) -> Result<BatchReport, BatchError> {
    export_all_with(source, config, options, policy, |_| {})
}

/// Like [`export_all`], calling `on_session` after each session
pub fn export_all_with<S, F>(
    source: &S,
    config: &ExportConfig,
    options: &ExportOptions,
    policy: FailurePolicy,
    mut on_session: F,
) -> Result<BatchReport, BatchError>
where
    S: SessionSource,
    F: FnMut(SessionProgress<'_>),
{
    let keys = source
        .session_keys()
        .map_err(|e| BatchError::Enumerate(ExportError::from_source(e)))?;
    let options = ExportOptions {
        save: true,
        ..options.clone()
    };

    let mut report = BatchReport {
        total: keys.len(),
        ..BatchReport::default()
    };
    tracing::info!(sessions = keys.len(), dir = %options.output_dir.display(), "starting batch export");

    for (i, key) in keys.into_iter().enumerate() {
        let result = export_session(source, &key, config, &options).map(|outcome| outcome.status);
        on_session(SessionProgress {
            position: i + 1,
            total: report.total,
            key,
            result: result.as_ref(),
        });

        match result {
            Ok(WriteStatus::Written(path)) => report.written.push(path),
            Ok(WriteStatus::Skipped(path)) => report.skipped.push(path),
            // save is forced on above
            Ok(WriteStatus::NotRequested) => {}
            Err(err) => match policy {
                FailurePolicy::Abort => {
                    tracing::error!(%key, error = %err, "session export failed, aborting batch");
                    return Err(BatchError::Aborted {
                        key,
                        source: err,
                        report,
                    });
                }
                FailurePolicy::Continue => {
                    tracing::error!(%key, error = %err, "session export failed, continuing");
                    report.failed.push(SessionFailure {
                        key,
                        message: err.to_string(),
                    });
                }
            },
        }
    }

    tracing::info!(
        written = report.written.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "batch export finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::fixtures;
    use crate::model::{SessionRow, ScanRow};
    use crate::source::MemorySource;
    use chrono::NaiveDate;
    use serde_json::json;

    /// Fixture source plus sessions 3 (no scan, fails) and 4 (exports fine)
    fn mixed_source() -> MemorySource {
        let mut source = fixtures::source();
        for session in [3, 4] {
            source
                .add_session(SessionRow {
                    session,
                    session_date: NaiveDate::from_ymd_opt(2018, 9, 4 + session as u32).unwrap(),
                    ..fixtures::session()
                })
                .unwrap();
        }
        source
            .add_scan(ScanRow {
                key: SessionKey::new(fixtures::KEY.subject_id, 4),
                image_beads: json!(null),
                ..fixtures::scan()
            })
            .unwrap();
        source
    }

    // ==========================================================================
    // FAILURE POLICY TESTS
    // ==========================================================================

    #[test]
    fn test_exports_every_session() {
        let dir = tempfile::tempdir().unwrap();
        let report = export_all(
            &fixtures::source(),
            &ExportConfig::default(),
            &ExportOptions::save_to(dir.path()),
            FailurePolicy::Abort,
        )
        .unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.written.len(), 1);
        assert!(report.is_success());
    }

    #[test]
    fn test_persistence_is_forced_on() {
        let dir = tempfile::tempdir().unwrap();
        let options = ExportOptions {
            output_dir: dir.path().to_path_buf(),
            ..ExportOptions::default()
        };
        let report =
            export_all(&fixtures::source(), &ExportConfig::default(), &options, FailurePolicy::Abort)
                .unwrap();
        assert_eq!(report.written.len(), 1);
        assert!(report.written[0].is_file());
    }

    #[test]
    fn test_abort_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = export_all(
            &mixed_source(),
            &ExportConfig::default(),
            &ExportOptions::save_to(dir.path()),
            FailurePolicy::Abort,
        )
        .unwrap_err();

        match err {
            BatchError::Aborted { key, source, report } => {
                assert_eq!(key, SessionKey::new(431301, 3));
                assert!(matches!(source, ExportError::NotFound { entity: "scan", .. }));
                assert_eq!(report.written.len(), 1);
                assert!(!report.is_success());
            }
            other => panic!("expected abort, got {:?}", other),
        }
        // Session 4 was never reached
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_continue_collects_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut seen = Vec::new();
        let report = export_all_with(
            &mixed_source(),
            &ExportConfig::default(),
            &ExportOptions::save_to(dir.path()),
            FailurePolicy::Continue,
            |p| seen.push((p.position, p.total, p.key.session, p.result.is_ok())),
        )
        .unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.written.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key.session, 3);
        assert!(report.failed[0].message.contains("scan"));
        assert!(!report.is_success());
        assert_eq!(seen, vec![(1, 3, 2, true), (2, 3, 3, false), (3, 3, 4, true)]);
    }

    #[test]
    fn test_rerun_skips_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let options = ExportOptions::save_to(dir.path());
        let source = fixtures::source();
        let config = ExportConfig::default();

        export_all(&source, &config, &options, FailurePolicy::Abort).unwrap();
        let report = export_all(&source, &config, &options, FailurePolicy::Abort).unwrap();
        assert!(report.written.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert!(report.is_success());

        let forced = export_all(&source, &config, &options.clone().with_overwrite(true), FailurePolicy::Abort)
            .unwrap();
        assert_eq!(forced.written.len(), 1);
    }

    #[test]
    fn test_empty_source() {
        let dir = tempfile::tempdir().unwrap();
        let report = export_all(
            &MemorySource::new(),
            &ExportConfig::default(),
            &ExportOptions::save_to(dir.path()),
            FailurePolicy::Abort,
        )
        .unwrap();
        assert_eq!(report, BatchReport::default());
        assert!(report.is_success());
    }
}
