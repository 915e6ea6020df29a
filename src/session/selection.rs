//! Temporary selection files handed over by the editor.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Deletes a selection file when dropped, then its directory if that left it empty.
/// Runs on every exit path of the call that owns it, including unwinding.
#[derive(Debug)]
pub struct SelectionGuard {
    path: PathBuf,
}

impl SelectionGuard {
    pub fn new(path: &Path) -> Self {
        Self { path: path.to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SelectionGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not delete selection file");
        }
        // Only removes an empty directory: one created for this selection alone.
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if let Err(e) = fs::remove_dir(dir) {
                debug!(dir = %dir.display(), error = %e, "selection directory kept");
            }
        }
    }
}

/// Text to echo before running a selection: each line indented by four spaces.
pub fn echo_lines(bytes: &[u8]) -> Result<Vec<String>, std::str::Utf8Error> {
    let text = std::str::from_utf8(bytes)?;
    Ok(text.lines().map(|l| format!("    {}", l)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_removes_file_and_private_directory() {
        let parent = tempfile::tempdir().unwrap();
        let dir = parent.path().join("sel");
        fs::create_dir(&dir).unwrap();
        let file = dir.join("selection.m");
        fs::write(&file, "x = 1;\n").unwrap();

        drop(SelectionGuard::new(&file));

        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn guard_keeps_directory_with_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("selection.m");
        let other = dir.path().join("keep.m");
        fs::write(&file, "x = 1;\n").unwrap();
        fs::write(&other, "y = 2;\n").unwrap();

        drop(SelectionGuard::new(&file));

        assert!(!file.exists());
        assert!(other.exists());
    }

    #[test]
    fn guard_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        drop(SelectionGuard::new(&dir.path().join("gone.m")));
    }

    #[test]
    fn echo_indents_lines() {
        assert_eq!(echo_lines(b"x = 1;\ny = 2;\n").unwrap(), vec!["    x = 1;", "    y = 2;"]);
        assert!(echo_lines(&[0x78, 0xff, 0xfe]).is_err());
    }
}
