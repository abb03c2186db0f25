//! Reading and writing session files
//!
//! A session file is the JSON encoding of an [`NwbFile`]. Writes go through a
//! temporary file in the destination directory that is renamed into place
//! once fully flushed, so a failed write never leaves a truncated artifact
//! behind and the file handle is closed on every path.

use super::NwbFile;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

/// Extension of exported session files
pub const EXTENSION: &str = "nwb.json";

/// File name for a document identifier
pub fn file_name(identifier: &str) -> String {
    format!("{}.{}", identifier, EXTENSION)
}

/// Write `file` to `path`, replacing any existing file
pub fn write<P: AsRef<Path>>(path: P, file: &NwbFile) -> io::Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer(&mut writer, file)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Read a session file back into memory
pub fn read<P: AsRef<Path>>(path: P) -> io::Result<NwbFile> {
    let reader = BufReader::new(File::open(path)?);
    let file = serde_json::from_reader(reader)?;
    Ok(file)
}
