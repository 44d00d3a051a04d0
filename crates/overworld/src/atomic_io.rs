//! Crash-safe writes for map and layout documents.
//!
//! A document is written in full to a temporary file in the destination's
//! directory, flushed, and then renamed over the destination in one step.
//! Readers see either the previous document or the new one, never a partial
//! file, and a failed write leaves the previous document in place.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::warn;

pub(crate) fn write_document(path: &Path, text: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(text.as_bytes())?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|err| {
        warn!(path = %path.display(), error = %err.error, "document_replace_failed");
        err.error
    })?;
    Ok(())
}
