//! Scoped temporary script file.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::{Builder, TempPath};
use tracing::{debug, warn};

/// A script written to disk for one execution; removed when dropped.
///
/// The name carries a millisecond timestamp for readability plus a random
/// suffix from `tempfile`, so two requests in the same millisecond never collide.
#[derive(Debug)]
pub struct TempScript {
    path: Option<TempPath>,
    location: PathBuf,
}

impl TempScript {
    pub fn create(dir: &Path, source: &str) -> std::io::Result<Self> {
        let prefix = format!("robot_script_{}_", chrono::Utc::now().timestamp_millis());
        let mut file = Builder::new()
            .prefix(&prefix)
            .suffix(".py")
            .tempfile_in(dir)?;
        file.write_all(source.as_bytes())?;
        file.flush()?;

        let path = file.into_temp_path();
        let location = path.to_path_buf();
        debug!(path = %location.display(), "script written");
        Ok(Self { path: Some(path), location })
    }

    pub fn path(&self) -> &Path {
        &self.location
    }

    /// Delete now instead of at drop. Failure is logged and swallowed.
    pub fn remove(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = path.close() {
                warn!(path = %self.location.display(), error = %e, "failed to remove script file");
            }
        }
    }
}

impl Drop for TempScript {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_written_and_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let script = TempScript::create(dir.path(), "print('hi')\n").unwrap();
        let path = script.path().to_path_buf();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "print('hi')\n");
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("robot_script_"));
        drop(script);
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_tolerates_already_deleted_file() {
        let dir = tempfile::tempdir().unwrap();
        let script = TempScript::create(dir.path(), "x = 1").unwrap();
        std::fs::remove_file(script.path()).unwrap();
        script.remove();
    }

    #[test]
    fn test_same_instant_scripts_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let a = TempScript::create(dir.path(), "a").unwrap();
        let b = TempScript::create(dir.path(), "b").unwrap();
        assert_ne!(a.path(), b.path());
    }
}
