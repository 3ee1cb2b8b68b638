//! Database file naming conventions.

use std::path::{Path, PathBuf};

/// File types in the database directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Write-ahead log file.
    Log,
    /// Lock file to prevent concurrent access.
    Lock,
    /// Sorted table data file.
    Table,
    /// Manifest file (version history).
    Manifest,
    /// Current file (points to current manifest).
    Current,
    /// Temporary file used for atomic renames.
    Temp,
}

/// Generate the lock file path.
pub fn lock_file_path(db_path: &Path) -> PathBuf {
    db_path.join("LOCK")
}

/// Generate the current file path.
pub fn current_file_path(db_path: &Path) -> PathBuf {
    db_path.join("CURRENT")
}

/// Generate a manifest file path.
pub fn manifest_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("MANIFEST-{:06}", number))
}

/// Generate a log (WAL) file path.
pub fn log_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{:06}.log", number))
}

/// Generate a table file path.
pub fn table_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{:06}.ldb", number))
}

/// Generate a temporary file path.
pub fn temp_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{:06}.dbtmp", number))
}

/// Parse a file name and return its type and number.
///
/// Returns `None` if the file name doesn't match any known pattern.
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    if name == "CURRENT" {
        return Some((FileType::Current, 0));
    }
    if name == "LOCK" {
        return Some((FileType::Lock, 0));
    }

    // Manifest files: MANIFEST-NNNNNN
    if let Some(suffix) = name.strip_prefix("MANIFEST-") {
        if let Ok(number) = suffix.parse::<u64>() {
            return Some((FileType::Manifest, number));
        }
    }

    // Numbered files: NNNNNN.ext
    if let Some(dot_pos) = name.rfind('.') {
        let (num_str, ext) = name.split_at(dot_pos);
        let ext = &ext[1..];

        if let Ok(number) = num_str.parse::<u64>() {
            let file_type = match ext {
                "log" => FileType::Log,
                // ".sst" is the historical table suffix; both are accepted.
                "ldb" | "sst" => FileType::Table,
                "dbtmp" => FileType::Temp,
                _ => return None,
            };
            return Some((file_type, number));
        }
    }

    None
}

/// Parse a manifest file name to extract the manifest number.
pub fn parse_manifest_file_name(name: &str) -> Option<u64> {
    match parse_file_name(name) {
        Some((FileType::Manifest, number)) => Some(number),
        _ => None,
    }
}

/// Point the CURRENT file at the given manifest.
///
/// The content is written to a temp file first and renamed into place, so
/// CURRENT is never observed in a partially written state.
pub fn set_current_file(db_path: &Path, manifest_number: u64) -> std::io::Result<()> {
    let manifest_name = format!("MANIFEST-{:06}", manifest_number);
    let current_path = current_file_path(db_path);
    let temp_path = temp_file_path(db_path, manifest_number);

    {
        let mut file = std::fs::File::create(&temp_path)?;
        use std::io::Write;
        writeln!(file, "{}", manifest_name)?;
        file.sync_all()?;
    }

    std::fs::rename(&temp_path, &current_path)
}

/// Read the current manifest file name.
pub fn read_current_file(db_path: &Path) -> std::io::Result<String> {
    let content = std::fs::read_to_string(current_file_path(db_path))?;
    Ok(content.trim().to_string())
}

/// Delete a file, ignoring "not found" errors.
pub fn delete_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Get the file size.
pub fn file_size(path: &Path) -> std::io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}
