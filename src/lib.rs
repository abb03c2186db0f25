//! pipeline-nwb - Export imaging sessions to NWB-structured files
//!
//! The experiment pipeline keeps two-photon imaging and behavior data in a
//! normalized relational schema: subjects, sessions, scans with their ROIs,
//! behavioral trials and trial events. This crate projects one session at a
//! time out of that schema into a single self-describing document laid out
//! the way Neurodata Without Borders 2.0 organizes an ophys + behavior file.
//!
//! # Overview
//!
//! Export is strictly one-way:
//!
//! 1. **Resolve**: every row related to the session is read through a
//!    [`SessionSource`]. The SQLite [`Database`] is the production source;
//!    [`MemorySource`] holds rows in plain maps.
//!
//! 2. **Build**: the rows become an [`NwbFile`]: structural images, a frame
//!    time series, one segmentation row per ROI with boolean masks, an
//!    optional trial table and one event series per behavioral event type.
//!
//! 3. **Write**: the document lands at `<subject>_<YYYY-MM-DD>_<session>.nwb.json`.
//!    Existing files are skipped unless overwrite is requested.
//!
//! # Quick Start
//!
//! ```no_run
//! use pipeline_nwb::{export_session, Database, ExportConfig, ExportOptions, SessionKey, WriteStatus};
//!
//! let db = Database::open_at("pipeline.db")?;
//! let outcome = export_session(
//!     &db,
//!     &SessionKey::new(431301, 2),
//!     &ExportConfig::default(),
//!     &ExportOptions::save_to("/data/NWB 2.0"),
//! )?;
//!
//! match outcome.status {
//!     WriteStatus::Written(path) => println!("wrote {}", path.display()),
//!     WriteStatus::Skipped(path) => println!("kept existing {}", path.display()),
//!     WriteStatus::NotRequested => {}
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Modules
//!
//! - [`model`]: Records of the schema and its closed lookup tables
//! - [`source`]: The read interface the exporter consumes
//! - [`db`]: SQLite storage of the schema via Diesel
//! - [`nwb`]: The output document and its on-disk encoding
//! - [`export`]: Single-session export
//! - [`batch`]: Export of every known session

pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod model;
pub mod nwb;
pub mod schema;
pub mod source;

pub use batch::{export_all, export_all_with, BatchError, BatchReport, FailurePolicy};
pub use config::{ExportConfig, DEFAULT_OUTPUT_DIR};
pub use db::{Database, DbError};
pub use error::{ExportError, MalformedField};
pub use export::{
    build_document, export_session, resolve_session, ExportOptions, ExportOutcome, WriteStatus,
};
pub use model::{SessionIdentity, SessionKey};
pub use nwb::NwbFile;
pub use source::{MemorySource, SessionSource};
