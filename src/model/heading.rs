//! Attribute headings for introspection
//!
//! The exporter discovers trial-table columns from the heading of the
//! SessionTrial × BehaviorTrial join. Each attribute carries the human-readable
//! description that ends up on the exported column.

/// A declared attribute of a table or join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    pub name: &'static str,
    pub description: &'static str,
}

const fn attr(name: &'static str, description: &'static str) -> Attribute {
    Attribute { name, description }
}

/// Primary key attributes of a session
pub const SESSION_PRIMARY_KEY: &[&str] = &["subject_id", "session"];

/// Heading of SessionTrial × BehaviorTrial, in declaration order
pub const TRIAL_HEADING: &[Attribute] = &[
    attr("subject_id", "institution animal ID"),
    attr("session", "session number"),
    attr("trial", "trial number"),
    attr("trial_uid", "unique across sessions/animals"),
    attr("start_time", "(s) relative to session beginning"),
    attr("stop_time", "(s) relative to session beginning"),
    attr("task", "task type"),
    attr("task_protocol", "task protocol"),
    attr("trial_instruction", "instruction to mouse"),
    attr("early_lick", "early lick classification"),
    attr("outcome", "trial outcome"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_heading_names_are_unique() {
        let mut names: Vec<_> = TRIAL_HEADING.iter().map(|a| a.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), TRIAL_HEADING.len());
    }

    #[test]
    fn test_every_heading_attribute_is_described() {
        assert!(TRIAL_HEADING.iter().all(|a| !a.description.trim().is_empty()));
    }
}
