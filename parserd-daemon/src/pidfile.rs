use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// PID file held for the daemon's lifetime and removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Writes the current process id to `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        fs::write(path, format!("{}\n", std::process::id()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_pid_and_removes_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rteval-parserd.pid");

        let pidfile = PidFile::create(&path).unwrap();
        let contents = fs::read_to_string(pidfile.path()).unwrap();
        assert_eq!(contents.trim().parse::<u32>().unwrap(), std::process::id());

        drop(pidfile);
        assert!(!path.exists());
    }
}
