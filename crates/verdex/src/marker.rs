//! Folder markers: the sentinel distinguishing a managed, present folder
//! from a missing or unrelated directory.
//!
//! An empty folder is indistinguishable from an unmounted one; the marker
//! file is the unambiguous "this directory is initialized and managed"
//! signal. It is zero bytes, named `.stfolder`, and hidden where the OS
//! supports hiding.

use std::fs;
use std::path::{Path, PathBuf};

use verdex_error::{ResultExt, WrappedError};

/// Name of the marker file at each folder root.
pub const MARKER_NAME: &str = ".stfolder";

/// A managed folder: its id and its expanded filesystem path.
#[derive(Debug, Clone)]
pub struct Folder {
    id: String,
    path: PathBuf,
}

impl Folder {
    /// Create a folder handle. The path has `~` expanded, is absolutized,
    /// and on Windows gains the `\\?\` long-path prefix.
    pub fn new(id: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            id: id.into(),
            path: expand_path(path.as_ref()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the marker file in the folder root.
    pub fn create_marker(&self) -> Result<(), WrappedError> {
        let marker = self.path.join(MARKER_NAME);
        fs::File::create(&marker).describe("creating folder marker")?;
        hide_file(&marker);
        Ok(())
    }

    /// Check that the marker file exists.
    pub fn check_marker(&self) -> Result<(), WrappedError> {
        fs::metadata(self.path.join(MARKER_NAME))
            .map(|_| ())
            .describe("checking folder marker")
    }
}

fn expand_path(path: &Path) -> PathBuf {
    // Attempt tilde expansion; leave unchanged when there is no home.
    let path = expand_tilde(path);

    // Attempt absolutization; leave unchanged if the working directory is
    // unavailable.
    let path = if path.is_absolute() {
        path
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path,
        }
    };

    longify(path)
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    let var = "USERPROFILE";
    #[cfg(not(windows))]
    let var = "HOME";
    std::env::var_os(var).map(PathBuf::from)
}

/// Enable long filename support on Windows. Only applicable to absolute,
/// non-UNC paths.
#[cfg(windows)]
fn longify(path: PathBuf) -> PathBuf {
    use std::ffi::OsString;
    if path.is_absolute() && !path.as_os_str().to_string_lossy().starts_with(r"\\") {
        let mut prefixed = OsString::from(r"\\?\");
        prefixed.push(path.as_os_str());
        return PathBuf::from(prefixed);
    }
    path
}

#[cfg(not(windows))]
fn longify(path: PathBuf) -> PathBuf {
    path
}

/// Apply the hidden attribute where the OS has one. The dot name already
/// hides the marker on unix-likes; on Windows this is best effort and a
/// visible marker is not an error.
#[cfg(windows)]
fn hide_file(path: &Path) {
    let _ = std::process::Command::new("attrib")
        .arg("+h")
        .arg(path)
        .status();
}

#[cfg(not(windows))]
fn hide_file(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_check_marker() {
        let dir = tempfile::tempdir().unwrap();
        let folder = Folder::new("default", dir.path());

        // An empty dir does not have a marker.
        assert!(folder.check_marker().is_err());

        // One can be created there though, and afterwards it exists.
        folder.create_marker().unwrap();
        folder.check_marker().unwrap();
        assert!(dir.path().join(MARKER_NAME).exists());

        // But not after it is removed again.
        fs::remove_file(dir.path().join(MARKER_NAME)).unwrap();
        assert!(folder.check_marker().is_err());
    }

    #[test]
    fn marker_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let folder = Folder::new("default", dir.path());
        folder.create_marker().unwrap();
        let meta = fs::metadata(dir.path().join(MARKER_NAME)).unwrap();
        assert_eq!(meta.len(), 0);
    }

    #[test]
    fn nonexistent_dir_has_no_marker_and_refuses_creation() {
        let dir = tempfile::tempdir().unwrap();
        let folder = Folder::new("default", dir.path().join("missing"));

        assert!(folder.check_marker().is_err());
        let err = folder.create_marker().unwrap_err();
        assert!(err.to_string().starts_with("creating folder marker:"));
        assert!(err.original().downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn relative_paths_are_absolutized() {
        let folder = Folder::new("default", "some/relative/dir");
        assert!(folder.path().is_absolute());
    }

    #[test]
    fn tilde_is_expanded_when_home_is_set() {
        if home_dir().is_none() {
            return;
        }
        let folder = Folder::new("default", "~/sync");
        assert!(!folder.path().starts_with("~"));
        assert!(folder.path().ends_with("sync"));
    }
}
