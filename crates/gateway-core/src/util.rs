//! Shared atomic-write helper (temp file + rename), grounded on the
//! teacher's sidecar/session persistence idiom: write to a `.tmp` sibling,
//! then rename over the target so readers never observe a truncated file.

use std::io;
use std::path::Path;

pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    if let Err(e) = std::fs::write(&temp_path, contents) {
        cleanup_temp_file(&temp_path, &e);
        return Err(e);
    }
    if let Err(e) = std::fs::rename(&temp_path, path) {
        cleanup_temp_file(&temp_path, &e);
        return Err(e);
    }
    Ok(())
}

fn cleanup_temp_file(temp_file: &Path, original_error: &io::Error) {
    if let Err(cleanup_err) = std::fs::remove_file(temp_file) {
        tracing::warn!(
            event = "core.util.temp_file_cleanup_failed",
            temp_file = %temp_file.display(),
            original_error = %original_error,
            cleanup_error = %cleanup_err,
        );
    }
}
