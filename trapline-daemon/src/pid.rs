//! PID file guard.
//!
//! The file is created atomically with `create_new` so a second daemon using
//! the same path fails fast, and removed when the guard drops.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;

/// Owns a PID file for the lifetime of the daemon.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create the PID file, creating parent directories as needed.
    ///
    /// Fails if the file already exists, reporting the PID found in it.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                return Err(anyhow::anyhow!(
                    "PID file {} already exists (pid {}); is another daemon running?",
                    path.display(),
                    holder.trim()
                ));
            }
            Err(e) => return Err(e.into()),
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o644))?;
        }

        let pid = std::process::id();
        writeln!(file, "{pid}")?;
        tracing::info!(pid, path = %path.display(), "PID file written");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "PID file removed"),
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove PID file"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_pid_and_removes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("trapline.pid");

        let guard = PidFile::create(&path).unwrap();
        let content = fs::read_to_string(guard.path()).unwrap();
        assert_eq!(content.trim().parse::<u32>().unwrap(), std::process::id());

        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn second_instance_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trapline.pid");
        fs::write(&path, "4242\n").unwrap();

        let err = PidFile::create(&path).unwrap_err();
        assert!(err.to_string().contains("4242"));
        // 기존 파일은 그대로 남아 있어야 함
        assert!(path.exists());
    }
}
