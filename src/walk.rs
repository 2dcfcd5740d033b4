//! Traversal of the recorder's `<subtree>/<user>/<device>/` layout.
//!
//! The plain functions are total: a missing path or a non-directory is an
//! empty result. The `read_*`/`try_*` variants additionally surface
//! unexpected I/O errors so a scan can tell "nothing there" from "could not
//! look".

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One `<root>/<user>/<device>` directory.
///
/// Names are kept as raw `OsString`s so paths rebuilt from them point at the
/// same files, whatever bytes the recorder used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDeviceEntry {
    pub path: PathBuf,
    pub user: OsString,
    pub device: OsString,
}

/// Immediate, non-hidden child directories of `path`.
///
/// A missing `path` or one that is not a directory yields an empty list.
pub fn read_subdirectories(path: &Path) -> io::Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(Vec::new());
    }

    let entries = match std::fs::read_dir(path) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let child = entry?.path();
        if is_hidden(&child) || !child.is_dir() {
            continue;
        }
        dirs.push(child);
    }
    Ok(dirs)
}

/// Total form of [`read_subdirectories`]; I/O errors are logged and yield an empty list.
#[cfg(test)]
pub fn list_subdirectories(path: &Path) -> Vec<PathBuf> {
    read_subdirectories(path).unwrap_or_else(|e| {
        tracing::debug!(error = %e, path = %path.display(), "failed to list subdirectories");
        Vec::new()
    })
}

/// Base names of [`read_subdirectories`].
pub fn read_subdirectory_names(path: &Path) -> io::Result<Vec<OsString>> {
    Ok(read_subdirectories(path)?
        .iter()
        .map(|p| base_name(p))
        .collect())
}

/// Base names of [`list_subdirectories`], in directory iteration order.
#[cfg(test)]
pub fn subdirectory_names(path: &Path) -> impl Iterator<Item = OsString> {
    list_subdirectories(path).into_iter().map(|p| base_name(&p))
}

/// Lazily walk `root/<user>/<device>` two levels deep.
///
/// Devices of a user are only listed once the iterator reaches that user, so
/// callers may stop early. A user directory that cannot be listed yields a
/// single `Err` item and the walk continues with the next user.
pub fn user_device_entries(root: &Path) -> UserDevices {
    match read_subdirectories(root) {
        Ok(users) => UserDevices {
            users: users.into_iter(),
            current: None,
            error: None,
        },
        Err(e) => UserDevices {
            users: Vec::new().into_iter(),
            current: None,
            error: Some(e),
        },
    }
}

/// Iterator returned by [`user_device_entries`].
pub struct UserDevices {
    users: std::vec::IntoIter<PathBuf>,
    current: Option<(OsString, std::vec::IntoIter<PathBuf>)>,
    error: Option<io::Error>,
}

impl Iterator for UserDevices {
    type Item = io::Result<UserDeviceEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.error.take() {
            return Some(Err(e));
        }

        loop {
            if let Some((user, devices)) = self.current.as_mut() {
                if let Some(path) = devices.next() {
                    return Some(Ok(UserDeviceEntry {
                        device: base_name(&path),
                        user: user.clone(),
                        path,
                    }));
                }
            }
            self.current = None;

            let user_path = self.users.next()?;
            match read_subdirectories(&user_path) {
                Ok(devices) => self.current = Some((base_name(&user_path), devices.into_iter())),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Total size in bytes of all regular files below `path`, at any depth.
///
/// Directories themselves contribute nothing. Symlinks are not followed.
/// Entries that vanish while the walk is in progress are skipped, so the
/// result is best-effort when the tree is being written to.
pub fn try_directory_size(path: &Path) -> io::Result<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(path).min_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if is_not_found(e.io_error()) => continue,
            Err(e) => return Err(e.into()),
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => total += meta.len(),
            Err(e) if is_not_found(e.io_error()) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(total)
}

/// Total form of [`try_directory_size`]; I/O errors are logged and yield 0.
#[cfg(test)]
pub fn directory_size(path: &Path) -> u64 {
    try_directory_size(path).unwrap_or_else(|e| {
        tracing::debug!(error = %e, path = %path.display(), "failed to size directory");
        0
    })
}

/// Files directly inside `dir` whose name matches `pattern` (e.g. `*.rec`).
///
/// Non-recursive. A missing `dir` yields an empty list. Only the file name is
/// matched, so `dir` itself may contain any bytes.
pub fn files_matching(dir: &Path, pattern: &str) -> io::Result<Vec<PathBuf>> {
    let pattern =
        glob::Pattern::new(pattern).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
            return Ok(Vec::new())
        }
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| pattern.matches(n)) {
            files.push(entry.path());
        }
    }
    Ok(files)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with('.'))
}

fn base_name(path: &Path) -> OsString {
    path.file_name().map(|n| n.to_os_string()).unwrap_or_default()
}

fn is_not_found(e: Option<&io::Error>) -> bool {
    e.is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::tempdir;

    fn mkdirs(root: &Path, dirs: &[&str]) {
        for d in dirs {
            fs::create_dir_all(root.join(d)).unwrap();
        }
    }

    fn names(path: &Path) -> BTreeSet<String> {
        subdirectory_names(path)
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_subdirectories_skip_hidden_and_files() {
        let tmp = tempdir().unwrap();
        mkdirs(tmp.path(), &["alice", "bob", ".tmp"]);
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let expected: BTreeSet<String> = ["alice", "bob"].iter().map(|s| s.to_string()).collect();
        assert_eq!(names(tmp.path()), expected);
        assert_eq!(list_subdirectories(tmp.path()).len(), 2);
    }

    #[test]
    fn test_subdirectories_of_missing_path() {
        let tmp = tempdir().unwrap();
        let missing = tmp.path().join("nonexistent");
        assert!(list_subdirectories(&missing).is_empty());
        assert_eq!(subdirectory_names(&missing).count(), 0);
        assert!(read_subdirectories(&missing).unwrap().is_empty());
    }

    #[test]
    fn test_subdirectories_of_file() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("monitor");
        fs::write(&file, "1700000000 owntracks/alice/phone").unwrap();
        assert!(list_subdirectories(&file).is_empty());
    }

    #[test]
    fn test_user_device_entries() {
        let tmp = tempdir().unwrap();
        mkdirs(
            tmp.path(),
            &["alice/phone", "alice/tablet", "alice/.hidden", "bob/watch", "carol", ".git/x"],
        );
        fs::write(tmp.path().join("alice/readme"), "x").unwrap();

        let entries: Vec<UserDeviceEntry> = user_device_entries(tmp.path())
            .collect::<io::Result<_>>()
            .unwrap();
        let pairs: BTreeSet<(String, String)> = entries
            .iter()
            .map(|e| {
                (
                    e.user.to_string_lossy().into_owned(),
                    e.device.to_string_lossy().into_owned(),
                )
            })
            .collect();

        let expected: BTreeSet<(String, String)> = [
            ("alice", "phone"),
            ("alice", "tablet"),
            ("bob", "watch"),
        ]
        .iter()
        .map(|(u, d)| (u.to_string(), d.to_string()))
        .collect();
        assert_eq!(pairs, expected);

        for e in &entries {
            assert_eq!(e.path, tmp.path().join(&e.user).join(&e.device));
        }
    }

    #[test]
    fn test_user_device_entries_missing_root() {
        let tmp = tempdir().unwrap();
        assert_eq!(user_device_entries(&tmp.path().join("rec")).count(), 0);
    }

    #[test]
    fn test_user_device_entries_short_circuit() {
        let tmp = tempdir().unwrap();
        mkdirs(tmp.path(), &["alice/phone", "bob/phone", "carol/phone"]);
        let first = user_device_entries(tmp.path()).next().unwrap().unwrap();
        assert_eq!(first.device, "phone");
    }

    #[test]
    fn test_directory_size_empty() {
        let tmp = tempdir().unwrap();
        assert_eq!(directory_size(tmp.path()), 0);
    }

    #[test]
    fn test_directory_size_nested() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("ten"), "0123456789").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/five"), "01234").unwrap();
        assert_eq!(directory_size(tmp.path()), 15);
    }

    #[test]
    fn test_directory_size_deep_tree() {
        let tmp = tempdir().unwrap();
        let mut dir = tmp.path().to_path_buf();
        for i in 0..64 {
            dir = dir.join(format!("d{i}"));
        }
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("leaf"), "abc").unwrap();
        fs::write(tmp.path().join("top"), "defg").unwrap();
        assert_eq!(directory_size(tmp.path()), 7);
    }

    #[test]
    fn test_directory_size_missing() {
        let tmp = tempdir().unwrap();
        assert_eq!(directory_size(&tmp.path().join("nonexistent")), 0);
        assert_eq!(try_directory_size(&tmp.path().join("nonexistent")).unwrap(), 0);
    }

    #[test]
    fn test_files_matching_is_not_recursive() {
        let tmp = tempdir().unwrap();
        mkdirs(tmp.path(), &["nested"]);
        fs::write(tmp.path().join("2023-11.rec"), "").unwrap();
        fs::write(tmp.path().join("2023-12.rec"), "").unwrap();
        fs::write(tmp.path().join("alice-phone.json"), "").unwrap();
        fs::write(tmp.path().join("nested/2024-01.rec"), "").unwrap();

        let files: BTreeSet<PathBuf> = files_matching(tmp.path(), "*.rec")
            .unwrap()
            .into_iter()
            .collect();
        let expected: BTreeSet<PathBuf> = [
            tmp.path().join("2023-11.rec"),
            tmp.path().join("2023-12.rec"),
        ]
        .into_iter()
        .collect();
        assert_eq!(files, expected);
    }

    #[test]
    fn test_files_matching_escapes_directory_name() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("we[ir]d*dev");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("a.json"), "{}").unwrap();
        assert_eq!(files_matching(&dir, "*.json").unwrap(), vec![dir.join("a.json")]);
    }

    #[test]
    fn test_files_matching_missing_dir() {
        let tmp = tempdir().unwrap();
        assert!(files_matching(&tmp.path().join("nope"), "*.json")
            .unwrap()
            .is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_user_device_entries_keep_raw_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = tempdir().unwrap();
        let user = OsStr::from_bytes(b"al\xffce");
        fs::create_dir_all(tmp.path().join(user).join("phone")).unwrap();

        let entries: Vec<UserDeviceEntry> = user_device_entries(tmp.path())
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user, user);
        assert_eq!(entries[0].path, tmp.path().join(user).join("phone"));
    }

    #[cfg(unix)]
    #[test]
    fn test_files_matching_in_non_utf8_directory() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = tempdir().unwrap();
        let dir = tmp.path().join(OsStr::from_bytes(b"ph\xffne"));
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("2023-11.rec"), "").unwrap();
        assert_eq!(files_matching(&dir, "*.rec").unwrap(), vec![dir.join("2023-11.rec")]);
    }

    #[test]
    fn test_files_matching_rejects_bad_pattern() {
        let tmp = tempdir().unwrap();
        let err = files_matching(tmp.path(), "[").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[cfg(unix)]
    #[test]
    fn test_looping_symlink_is_not_a_subdirectory() {
        let tmp = tempdir().unwrap();
        mkdirs(tmp.path(), &["alice"]);
        std::os::unix::fs::symlink("loop", tmp.path().join("loop")).unwrap();

        let dirs = read_subdirectories(tmp.path()).unwrap();
        assert_eq!(dirs, vec![tmp.path().join("alice")]);
        assert!(read_subdirectories(&tmp.path().join("loop")).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_size_of_looping_root_is_an_error() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("store");
        std::os::unix::fs::symlink("store", &root).unwrap();

        let err = try_directory_size(&root).unwrap_err();
        assert_ne!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(directory_size(&root), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_size_ignores_looping_symlink_inside() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("ten"), "0123456789").unwrap();
        std::os::unix::fs::symlink("loop", tmp.path().join("loop")).unwrap();
        assert_eq!(try_directory_size(tmp.path()).unwrap(), 10);
    }
}
