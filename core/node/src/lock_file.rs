//! Local single-node mutex + endpoint advertisement (`spec.md` §6),
//! grounded in `troup/process.py`'s `LockFile`/`ProcessInfoFile`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockFileError {
    #[error("lock file already exists at {0}")]
    AlreadyExists(PathBuf),
    #[error("lock file not found at {0}")]
    NotFound(PathBuf),
    #[error("malformed lock file at {0}")]
    Malformed(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// An exclusively-created file holding this process's advertised
/// `(name, endpoint)`. Creation fails if the file is already present,
/// refusing a double-start on the same host (`spec.md` §6).
pub struct NodeInfoFile {
    path: PathBuf,
}

impl NodeInfoFile {
    /// Creates the file with `content = "<pid>\n{\"name\":..,\"url\":..,..extra}"`,
    /// atomically (`create_new`), so two racing processes can't both
    /// succeed. `extra` carries arbitrary additional fields alongside
    /// `name`/`url`, mirroring the original `ProcessInfoFile`'s unrestricted
    /// info map.
    pub fn acquire(
        path: impl AsRef<Path>,
        pid: u32,
        name: &str,
        url: &str,
        extra: &HashMap<String, String>,
    ) -> Result<Self, LockFileError> {
        let path = path.as_ref().to_path_buf();
        let mut body = serde_json::json!({ "name": name, "url": url });
        if let Value::Object(map) = &mut body {
            for (k, v) in extra {
                map.insert(k.clone(), Value::String(v.clone()));
            }
        }
        let content = format!("{pid}\n{body}");
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut f) => {
                use io::Write;
                f.write_all(content.as_bytes())?;
                Ok(Self { path })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(LockFileError::AlreadyExists(path))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reads an existing lock file without creating or holding it,
    /// returning `(pid, name, url, extra)` — used by local clients to
    /// discover a running node's endpoint.
    pub fn read(path: impl AsRef<Path>) -> Result<(u32, String, String, HashMap<String, String>), LockFileError> {
        let path = path.as_ref().to_path_buf();
        let content = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                LockFileError::NotFound(path.clone())
            } else {
                LockFileError::Io(e)
            }
        })?;
        let mut lines = content.lines();
        let pid: u32 = lines
            .next()
            .and_then(|l| l.parse().ok())
            .ok_or_else(|| LockFileError::Malformed(path.clone()))?;
        let info: serde_json::Value = lines
            .next()
            .and_then(|l| serde_json::from_str(l).ok())
            .ok_or_else(|| LockFileError::Malformed(path.clone()))?;
        let name = info
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LockFileError::Malformed(path.clone()))?
            .to_string();
        let url = info
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LockFileError::Malformed(path.clone()))?
            .to_string();
        let extra = info
            .as_object()
            .map(|map| {
                map.iter()
                    .filter(|(k, _)| k.as_str() != "name" && k.as_str() != "url")
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Ok((pid, name, url, extra))
    }

    /// Removes the file. Idempotent: a missing file is not an error, since
    /// `Node::stop()` may run after some other process already cleaned up.
    pub fn release(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_read_round_trips_name_and_url() {
        let path = std::env::temp_dir().join(format!("cohort-test-lock-{}", std::process::id()));
        let _ = fs::remove_file(&path);
        let mut extra = HashMap::new();
        extra.insert("ssh".to_string(), "22".to_string());
        let lock = NodeInfoFile::acquire(&path, 1234, "node-a", "ws://localhost:7000", &extra).unwrap();
        let (pid, name, url, read_extra) = NodeInfoFile::read(&path).unwrap();
        assert_eq!(pid, 1234);
        assert_eq!(name, "node-a");
        assert_eq!(url, "ws://localhost:7000");
        assert_eq!(read_extra.get("ssh"), Some(&"22".to_string()));
        lock.release();
        assert!(NodeInfoFile::read(&path).is_err());
    }

    #[test]
    fn double_acquire_is_rejected() {
        let path = std::env::temp_dir().join(format!("cohort-test-lock-dup-{}", std::process::id()));
        let _ = fs::remove_file(&path);
        let lock = NodeInfoFile::acquire(&path, 1, "a", "ws://a:7000", &HashMap::new()).unwrap();
        let err = NodeInfoFile::acquire(&path, 2, "b", "ws://b:7000", &HashMap::new()).unwrap_err();
        assert!(matches!(err, LockFileError::AlreadyExists(_)));
        lock.release();
    }
}
