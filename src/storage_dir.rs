use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// The on-disk layout of an OwnTracks Recorder storage directory.
///
/// The exporter only ever reads from here. For the layout itself see
/// <https://github.com/owntracks/recorder/blob/master/doc/STORE.md>.
#[derive(Debug, Clone)]
pub struct StorageDir {
    root: PathBuf,
}

impl StorageDir {
    /// Create a new StorageDir referencing the given root path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The storage root (the recorder's `--storage` directory).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location history: `rec/<user>/<device>/YYYY-MM.rec`.
    pub fn rec_dir(&self) -> PathBuf {
        self.root.join("rec")
    }

    /// Cards: `cards/<user>/<user>.json` and per-device variants.
    pub fn cards_dir(&self) -> PathBuf {
        self.root.join("cards")
    }

    /// Last known positions: `last/<user>/<device>/<user>-<device>.json`.
    pub fn last_dir(&self) -> PathBuf {
        self.root.join("last")
    }

    /// Waypoints: `waypoints/<user>/<device>/*.json`.
    pub fn waypoints_dir(&self) -> PathBuf {
        self.root.join("waypoints")
    }

    /// The monitor file, rewritten by the recorder on every received message.
    pub fn monitor(&self) -> PathBuf {
        self.root.join("monitor")
    }

    /// Card file for a user: `cards/<user>/<user>.json`.
    pub fn user_card(&self, user: impl AsRef<OsStr>) -> PathBuf {
        let user = user.as_ref();
        self.cards_dir().join(user).join(json_file_name(user))
    }
}

/// File name used by the recorder for per-device records: `<user>-<device>.json`.
pub fn device_file_name(user: impl AsRef<OsStr>, device: impl AsRef<OsStr>) -> OsString {
    let mut name = user.as_ref().to_os_string();
    name.push("-");
    name.push(device);
    name.push(".json");
    name
}

/// `<name>.json`, built without requiring `name` to be UTF-8.
pub fn json_file_name(name: impl AsRef<OsStr>) -> OsString {
    let mut file = name.as_ref().to_os_string();
    file.push(".json");
    file
}
