//! Metric extraction from the recorder's storage directory.
//!
//! Each extractor answers one question about the current on-disk state.
//! Missing directories and files count as zero and malformed records are not
//! counted. Only unexpected I/O errors (e.g. permission denied) are returned.

use crate::classify::{file_is_of_type, is_csv_location_row, CARD, LOCATION, WAYPOINT};
use crate::storage_dir::{device_file_name, json_file_name, StorageDir};
use crate::walk::{
    files_matching, read_subdirectories, read_subdirectory_names, try_directory_size,
    user_device_entries,
};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Unexpected failure while scanning the storage directory.
#[derive(Debug)]
pub enum ScanError {
    /// Reading a path failed for a reason other than it being absent.
    Io { path: PathBuf, source: io::Error },
    /// The blocking scan task panicked or was cancelled.
    Task { message: String },
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanError::Io { path, source } => {
                write!(f, "failed to scan {}: {}", path.display(), source)
            }
            ScanError::Task { message } => write!(f, "scan task failed: {}", message),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScanError::Io { source, .. } => Some(source),
            ScanError::Task { .. } => None,
        }
    }
}

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> ScanError + '_ {
    move |source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Number of users with location history (`rec/<user>/`).
pub fn users_count(storage: &StorageDir) -> Result<u64, ScanError> {
    let rec = storage.rec_dir();
    let users = read_subdirectories(&rec).map_err(io_at(&rec))?;
    Ok(users.len() as u64)
}

/// Number of devices with location history (`rec/<user>/<device>/`).
pub fn devices_count(storage: &StorageDir) -> Result<u64, ScanError> {
    let rec = storage.rec_dir();
    let mut count = 0;
    for entry in user_device_entries(&rec) {
        entry.map_err(io_at(&rec))?;
        count += 1;
    }
    Ok(count)
}

/// Number of card records.
///
/// Counts `cards/<user>/<user>.json` per user, plus one card per device
/// directory: `<user>-<device>.json`, or failing that `<user>.json`.
pub fn cards_count(storage: &StorageDir) -> Result<u64, ScanError> {
    let cards = storage.cards_dir();
    let mut count = 0;

    for user in read_subdirectory_names(&cards).map_err(io_at(&cards))? {
        let path = storage.user_card(&user);
        if file_is_of_type(&path, CARD).map_err(io_at(&path))? {
            count += 1;
        }
    }

    for entry in user_device_entries(&cards) {
        let entry = entry.map_err(io_at(&cards))?;
        let candidates = [
            device_file_name(&entry.user, &entry.device),
            json_file_name(&entry.user),
        ];
        for name in candidates {
            let path = entry.path.join(name);
            if file_is_of_type(&path, CARD).map_err(io_at(&path))? {
                count += 1;
                break;
            }
        }
    }

    Ok(count)
}

/// Number of devices with a last known position (`last/<user>/<device>/<user>-<device>.json`).
pub fn last_locations_count(storage: &StorageDir) -> Result<u64, ScanError> {
    let last = storage.last_dir();
    let mut count = 0;
    for entry in user_device_entries(&last) {
        let entry = entry.map_err(io_at(&last))?;
        let path = entry.path.join(device_file_name(&entry.user, &entry.device));
        if file_is_of_type(&path, LOCATION).map_err(io_at(&path))? {
            count += 1;
        }
    }
    Ok(count)
}

/// Number of location rows across all `rec/<user>/<device>/*.rec` files.
pub fn locations_count(storage: &StorageDir) -> Result<u64, ScanError> {
    let rec = storage.rec_dir();
    let mut count = 0;
    for entry in user_device_entries(&rec) {
        let entry = entry.map_err(io_at(&rec))?;
        for rec_file in files_matching(&entry.path, "*.rec").map_err(io_at(&entry.path))? {
            count += locations_in_rec_file(&rec_file).map_err(io_at(&rec_file))?;
        }
    }
    Ok(count)
}

/// Count location rows in one `.rec` file, one line at a time. Lines that
/// are not valid UTF-8 are decoded lossily and simply fail classification.
fn locations_in_rec_file(path: &Path) -> io::Result<u64> {
    if !path.is_file() {
        return Ok(0);
    }
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    let mut count = 0;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if is_csv_location_row(&String::from_utf8_lossy(&line)) {
            count += 1;
        }
    }
    Ok(count)
}

/// Number of waypoint records across all `waypoints/<user>/<device>/*.json` files.
pub fn waypoints_count(storage: &StorageDir) -> Result<u64, ScanError> {
    let waypoints = storage.waypoints_dir();
    let mut count = 0;
    for entry in user_device_entries(&waypoints) {
        let entry = entry.map_err(io_at(&waypoints))?;
        for path in files_matching(&entry.path, "*.json").map_err(io_at(&entry.path))? {
            if file_is_of_type(&path, WAYPOINT).map_err(io_at(&path))? {
                count += 1;
            }
        }
    }
    Ok(count)
}

/// Total size in bytes of the storage directory.
pub fn storagedir_size(storage: &StorageDir) -> Result<u64, ScanError> {
    try_directory_size(storage.root()).map_err(io_at(storage.root()))
}

/// Unix timestamp of the last message the recorder received, from `monitor`.
///
/// 0 when the file is missing or its first token is not an integer.
pub fn last_received_timestamp(storage: &StorageDir) -> Result<i64, ScanError> {
    let monitor = storage.monitor();
    if !monitor.is_file() {
        return Ok(0);
    }
    let bytes = match std::fs::read(&monitor) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(io_at(&monitor)(e)),
    };
    Ok(parse_monitor(&String::from_utf8_lossy(&bytes)))
}

/// Parse the first token of the first line of `monitor` as a unix timestamp.
fn parse_monitor(contents: &str) -> i64 {
    contents
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().next())
        .and_then(|token| token.parse().ok())
        .unwrap_or(0)
}
