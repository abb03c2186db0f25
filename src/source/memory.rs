//! In-memory session source.
//!
//! Backed by `BTreeMap`s so iteration is always in primary-key order. Inserts
//! check that the parent row exists, mirroring the foreign keys of the SQLite
//! schema.

use std::collections::BTreeMap;

use super::SessionSource;
use crate::model::{
    BehaviorTrialRow, RoiRow, ScanRow, SessionKey, SessionRow, SessionTrialRow, SubjectRow,
    TaskProtocol, TrialEventRow, TrialRow, VirusInjection, VirusInjectionRow, VirusRow,
};

/// Error type for the in-memory source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MemoryError {
    /// A row referenced a parent that was never inserted
    #[error("{child} references missing {parent}: {key}")]
    MissingParent {
        child: &'static str,
        parent: &'static str,
        key: String,
    },

    /// A behavior trial named a protocol its task does not define
    #[error("{task} has no protocol {protocol}")]
    UnknownProtocol { task: &'static str, protocol: i32 },
}

fn missing(child: &'static str, parent: &'static str, key: impl ToString) -> MemoryError {
    MemoryError::MissingParent {
        child,
        parent,
        key: key.to_string(),
    }
}

type TrialKey = (SessionKey, i32);

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    subjects: BTreeMap<i32, SubjectRow>,
    gene_modifications: BTreeMap<i32, Vec<String>>,
    sessions: BTreeMap<SessionKey, SessionRow>,
    viruses: BTreeMap<i32, VirusRow>,
    injections: BTreeMap<(SessionKey, i32), VirusInjection>,
    scans: BTreeMap<SessionKey, ScanRow>,
    rois: BTreeMap<(SessionKey, i32), RoiRow>,
    session_trials: BTreeMap<TrialKey, SessionTrialRow>,
    behavior_trials: BTreeMap<TrialKey, BehaviorTrialRow>,
    trial_events: BTreeMap<(TrialKey, i32), TrialEventRow>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subject(&mut self, subject: SubjectRow) {
        self.subjects.insert(subject.subject_id, subject);
    }

    pub fn add_gene_modification(
        &mut self,
        subject_id: i32,
        modification: impl Into<String>,
    ) -> Result<(), MemoryError> {
        if !self.subjects.contains_key(&subject_id) {
            return Err(missing("gene modification", "subject", subject_id));
        }
        let mods = self.gene_modifications.entry(subject_id).or_default();
        let modification = modification.into();
        if !mods.contains(&modification) {
            mods.push(modification);
            mods.sort();
        }
        Ok(())
    }

    pub fn add_session(&mut self, session: SessionRow) -> Result<(), MemoryError> {
        if !self.subjects.contains_key(&session.subject_id) {
            return Err(missing("session", "subject", session.subject_id));
        }
        self.sessions.insert(session.key(), session);
        Ok(())
    }

    pub fn add_virus(&mut self, virus: VirusRow) {
        self.viruses.insert(virus.virus_id, virus);
    }

    pub fn add_virus_injection(&mut self, injection: VirusInjection) -> Result<(), MemoryError> {
        self.require_session("virus injection", &injection.key)?;
        if !self.viruses.contains_key(&injection.virus_id) {
            return Err(missing("virus injection", "virus", injection.virus_id));
        }
        self.injections
            .insert((injection.key, injection.injection_id), injection);
        Ok(())
    }

    pub fn add_scan(&mut self, scan: ScanRow) -> Result<(), MemoryError> {
        self.require_session("scan", &scan.key)?;
        self.scans.insert(scan.key, scan);
        Ok(())
    }

    pub fn add_roi(&mut self, roi: RoiRow) -> Result<(), MemoryError> {
        if !self.scans.contains_key(&roi.key) {
            return Err(missing("roi", "scan", roi.key));
        }
        self.rois.insert((roi.key, roi.roi_idx), roi);
        Ok(())
    }

    pub fn add_session_trial(&mut self, trial: SessionTrialRow) -> Result<(), MemoryError> {
        self.require_session("session trial", &trial.key)?;
        self.session_trials.insert((trial.key, trial.trial), trial);
        Ok(())
    }

    pub fn add_behavior_trial(&mut self, trial: BehaviorTrialRow) -> Result<(), MemoryError> {
        let key = (trial.key, trial.trial);
        if !self.session_trials.contains_key(&key) {
            return Err(missing(
                "behavior trial",
                "session trial",
                format!("{} trial {}", trial.key, trial.trial),
            ));
        }
        if TaskProtocol::find(trial.task, trial.task_protocol).is_none() {
            return Err(MemoryError::UnknownProtocol {
                task: trial.task.label(),
                protocol: trial.task_protocol,
            });
        }
        self.behavior_trials.insert(key, trial);
        Ok(())
    }

    pub fn add_trial_event(&mut self, event: TrialEventRow) -> Result<(), MemoryError> {
        let trial_key = (event.key, event.trial);
        if !self.behavior_trials.contains_key(&trial_key) {
            return Err(missing(
                "trial event",
                "behavior trial",
                format!("{} trial {}", event.key, event.trial),
            ));
        }
        self.trial_events
            .insert((trial_key, event.trial_event_id), event);
        Ok(())
    }

    fn require_session(&self, child: &'static str, key: &SessionKey) -> Result<(), MemoryError> {
        if self.sessions.contains_key(key) {
            Ok(())
        } else {
            Err(missing(child, "session", key))
        }
    }

    /// Rows of `map` belonging to one session, in key order
    fn of_session<'a, K, V>(
        map: &'a BTreeMap<K, V>,
        key: &'a SessionKey,
        session_of: impl Fn(&K) -> &SessionKey + 'a,
    ) -> impl Iterator<Item = &'a V> + 'a {
        map.iter()
            .filter(move |(k, _)| session_of(*k) == key)
            .map(|(_, v)| v)
    }
}

impl SessionSource for MemorySource {
    type Error = MemoryError;

    fn session_keys(&self) -> Result<Vec<SessionKey>, Self::Error> {
        Ok(self.sessions.keys().copied().collect())
    }

    fn sessions(&self, key: &SessionKey) -> Result<Vec<SessionRow>, Self::Error> {
        Ok(self.sessions.get(key).cloned().into_iter().collect())
    }

    fn subject(&self, subject_id: i32) -> Result<Option<SubjectRow>, Self::Error> {
        Ok(self.subjects.get(&subject_id).cloned())
    }

    fn gene_modifications(&self, subject_id: i32) -> Result<Vec<String>, Self::Error> {
        Ok(self
            .gene_modifications
            .get(&subject_id)
            .cloned()
            .unwrap_or_default())
    }

    fn virus_injections(&self, key: &SessionKey) -> Result<Vec<VirusInjectionRow>, Self::Error> {
        Self::of_session(&self.injections, key, |(k, _)| k)
            .map(|injection| -> Result<VirusInjectionRow, MemoryError> {
                let virus = self
                    .viruses
                    .get(&injection.virus_id)
                    .cloned()
                    .ok_or_else(|| missing("virus injection", "virus", injection.virus_id))?;
                Ok(VirusInjectionRow {
                    injection: injection.clone(),
                    virus,
                })
            })
            .collect()
    }

    fn scans(&self, key: &SessionKey) -> Result<Vec<ScanRow>, Self::Error> {
        Ok(self.scans.get(key).cloned().into_iter().collect())
    }

    fn rois(&self, key: &SessionKey) -> Result<Vec<RoiRow>, Self::Error> {
        Ok(Self::of_session(&self.rois, key, |(k, _)| k).cloned().collect())
    }

    fn session_trials(&self, key: &SessionKey) -> Result<Vec<SessionTrialRow>, Self::Error> {
        Ok(Self::of_session(&self.session_trials, key, |(k, _)| k)
            .cloned()
            .collect())
    }

    fn trials(&self, key: &SessionKey) -> Result<Vec<TrialRow>, Self::Error> {
        Ok(Self::of_session(&self.session_trials, key, |(k, _)| k)
            .filter_map(|t| {
                self.behavior_trials
                    .get(&(t.key, t.trial))
                    .map(|b| TrialRow {
                        session_trial: t.clone(),
                        behavior: b.clone(),
                    })
            })
            .collect())
    }

    fn trial_events(&self, key: &SessionKey) -> Result<Vec<TrialEventRow>, Self::Error> {
        Ok(Self::of_session(&self.trial_events, key, |((k, _), _)| k)
            .cloned()
            .collect())
    }
}
