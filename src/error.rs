//! Error types for session export

use crate::model::SessionKey;
use std::io;
use std::path::PathBuf;

/// A stored field did not hold the shape or value the exporter expects.
///
/// Raised for array-valued fields holding scalars, pixel indices outside the
/// mask grid, and labels outside a closed lookup table.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("malformed field `{field}`: {reason}")]
pub struct MalformedField {
    pub field: String,
    pub reason: String,
}

impl MalformedField {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while exporting a session.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The key resolved to zero rows of a required entity
    #[error("no {entity} found for {key}")]
    NotFound { entity: &'static str, key: SessionKey },

    /// The key resolved to more than one row where exactly one was required
    #[error("{key} matched {count} {entity} rows, expected exactly one")]
    AmbiguousKey {
        entity: &'static str,
        key: SessionKey,
        count: usize,
    },

    #[error(transparent)]
    MalformedField(#[from] MalformedField),

    /// Directory creation or artifact write failed
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),

    /// The data source failed to answer a query
    #[error("data source error: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ExportError {
    /// Wrap a data source error, lifting a malformed stored field anywhere in
    /// its cause chain to [`ExportError::MalformedField`]
    pub(crate) fn from_source<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(&err);
        while let Some(e) = cause {
            if let Some(malformed) = e.downcast_ref::<MalformedField>() {
                return ExportError::MalformedField(malformed.clone());
            }
            cause = e.source();
        }
        ExportError::Source(Box::new(err))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ExportError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;
