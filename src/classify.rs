//! Record classification for recorder JSON payloads and `.rec` lines.
//!
//! Every recorder record is a JSON object with a `_type` discriminator
//! (`location`, `card`, `waypoint`, ...). Classification never fails:
//! anything that cannot be parsed simply does not match.

use serde_json::Value;
use std::io;
use std::path::Path;

pub const LOCATION: &str = "location";
pub const CARD: &str = "card";
pub const WAYPOINT: &str = "waypoint";

/// Returns `true` iff `content` is a JSON object whose `_type` equals `type_tag`.
pub fn is_json_of_type(content: &str, type_tag: &str) -> bool {
    match serde_json::from_str::<Value>(content) {
        Ok(value) => value.get("_type").and_then(Value::as_str) == Some(type_tag),
        Err(_) => false,
    }
}

/// Returns `true` iff `path` is a regular file holding a JSON record of `type_tag`.
///
/// Read errors count as "does not match".
#[cfg(test)]
pub fn is_file_of_type(path: &Path, type_tag: &str) -> bool {
    match file_is_of_type(path, type_tag) {
        Ok(matches) => matches,
        Err(e) => {
            tracing::debug!(error = %e, path = %path.display(), "failed to classify file");
            false
        }
    }
}

/// Fallible form of [`is_file_of_type`].
///
/// Anything that does not stat as a regular file is `Ok(false)`, whatever the
/// reason (missing, directory, dangling or looping symlink). So is non-UTF-8
/// content. Only a failure to read a confirmed regular file is returned.
pub fn file_is_of_type(path: &Path, type_tag: &str) -> io::Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Ok(false),
        Err(e) => {
            tracing::debug!(error = %e, path = %path.display(), "not a regular file");
            return Ok(false);
        }
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(is_json_of_type(&contents, type_tag)),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::InvalidData) => {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Returns `true` iff `line` is a `.rec` row carrying a location payload.
///
/// A row is exactly three whitespace-separated fields: timestamp, topic and
/// the JSON payload. Any other field count does not match.
pub fn is_csv_location_row(line: &str) -> bool {
    let mut fields = line.split_whitespace();
    match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some(_), Some(_), Some(payload), None) => is_json_of_type(payload, LOCATION),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_json_of_matching_type() {
        assert!(is_json_of_type(r#"{"_type":"card","name":"Alice"}"#, CARD));
        assert!(is_json_of_type(
            r#"{"_type": "location", "lat": 52.1, "lon": 4.3, "tst": 1700000000}"#,
            LOCATION
        ));
    }

    #[test]
    fn test_json_of_other_type() {
        assert!(!is_json_of_type(r#"{"_type":"card"}"#, LOCATION));
        assert!(!is_json_of_type(r#"{"_type":"Card"}"#, CARD));
    }

    #[test]
    fn test_json_without_type_field() {
        assert!(!is_json_of_type(r#"{"lat":52.1,"lon":4.3}"#, LOCATION));
        assert!(!is_json_of_type("{}", LOCATION));
    }

    #[test]
    fn test_non_string_type_field() {
        assert!(!is_json_of_type(r#"{"_type":1}"#, "1"));
        assert!(!is_json_of_type(r#"{"_type":null}"#, LOCATION));
    }

    #[test]
    fn test_malformed_json_never_matches() {
        for content in [
            "",
            "   ",
            "{",
            r#"{"_type":"location""#,
            "not json at all",
            r#"{'_type':'location'}"#,
            "\u{feff}garbage",
        ] {
            assert!(!is_json_of_type(content, LOCATION), "matched {content:?}");
        }
    }

    #[test]
    fn test_non_object_json_never_matches() {
        assert!(!is_json_of_type(r#"["location"]"#, LOCATION));
        assert!(!is_json_of_type(r#""location""#, LOCATION));
        assert!(!is_json_of_type("42", LOCATION));
        assert!(!is_json_of_type("null", LOCATION));
    }

    #[test]
    fn test_csv_location_row() {
        assert!(is_csv_location_row(
            "2023-11-14T22:13:20Z\t*\t{\"_type\":\"location\",\"lat\":1.0,\"lon\":2.0}\n"
        ));
        assert!(is_csv_location_row(
            r#"2023-11-14T22:13:20Z * {"_type":"location"}"#
        ));
    }

    #[test]
    fn test_csv_row_with_other_payload_type() {
        assert!(!is_csv_location_row(
            r#"2023-11-14T22:13:20Z * {"_type":"transition"}"#
        ));
        assert!(!is_csv_location_row("2023-11-14T22:13:20Z lwt garbage"));
    }

    #[test]
    fn test_csv_row_with_wrong_field_count() {
        assert!(!is_csv_location_row(""));
        assert!(!is_csv_location_row(r#"{"_type":"location"}"#));
        assert!(!is_csv_location_row(r#"* {"_type":"location"}"#));
        // A payload with embedded whitespace splits into too many fields.
        assert!(!is_csv_location_row(
            r#"2023-11-14T22:13:20Z * {"_type": "location"}"#
        ));
    }

    #[test]
    fn test_file_of_type() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alice.json");
        std::fs::write(&path, r#"{"_type":"card","name":"Alice"}"#).unwrap();
        assert!(is_file_of_type(&path, CARD));
        assert!(!is_file_of_type(&path, LOCATION));
    }

    #[test]
    fn test_file_of_type_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.json");
        assert!(!is_file_of_type(&path, CARD));
        assert!(!file_is_of_type(&path, CARD).unwrap());
    }

    #[test]
    fn test_file_of_type_directory_is_not_a_match() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alice.json");
        std::fs::create_dir(&path).unwrap();
        assert!(!file_is_of_type(&path, CARD).unwrap());
    }

    #[test]
    fn test_file_of_type_non_utf8_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("binary.json");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x7b]).unwrap();
        assert!(!file_is_of_type(&path, CARD).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_of_type_looping_symlink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alice.json");
        std::os::unix::fs::symlink("alice.json", &path).unwrap();
        assert!(!file_is_of_type(&path, CARD).unwrap());
        assert!(!is_file_of_type(&path, CARD));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_of_type_dangling_symlink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alice.json");
        std::os::unix::fs::symlink("gone.json", &path).unwrap();
        assert!(!file_is_of_type(&path, CARD).unwrap());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_file_of_type_surfaces_read_errors() {
        // A regular file whose read fails with EIO at offset 0.
        let path = Path::new("/proc/self/mem");
        assert!(file_is_of_type(path, CARD).is_err());
        assert!(!is_file_of_type(path, CARD));
    }
}
