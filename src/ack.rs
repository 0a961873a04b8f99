// Opt-in acknowledgement path from helper to controller
//
// Without it, updates are best-effort with no delivery confirmation. When the
// controller asks for acknowledgements the helper records the outcome of the
// most recent reconfigure command here.

use crate::channel::write_atomically;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of the most recently applied reconfigure command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// Sequence number from the command header, if it had one
    pub seq: Option<u64>,
    pub ok: bool,
    /// Failure descriptions of invocations that exited non-zero
    #[serde(default)]
    pub failures: Vec<String>,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AckFile {
    path: PathBuf,
}

impl AckFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, ack: &Acknowledgement) -> Result<()> {
        let contents = serde_json::to_vec(ack).context("Failed to serialize acknowledgement")?;
        write_atomically(&self.path, &contents)
            .with_context(|| format!("Failed to write acknowledgement {:?}", self.path))
    }

    /// Latest acknowledgement; `None` when absent or unreadable
    pub fn read(&self) -> Option<Acknowledgement> {
        let contents = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(ack) => Some(ack),
            Err(e) => {
                log::warn!("Ignoring malformed acknowledgement {:?}: {}", self.path, e);
                None
            }
        }
    }

    pub fn clear(&self) -> std::io::Result<()> {
        crate::channel::remove_if_exists(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = AckFile::new(dir.path().join("netlimit-test.ack"));
        assert_eq!(file.read(), None);

        let ack = Acknowledgement {
            seq: Some(3),
            ok: false,
            failures: vec!["dnctl: bad pipe".to_string()],
            applied_at: Utc::now(),
        };
        file.write(&ack).unwrap();
        assert_eq!(file.read(), Some(ack));

        file.clear().unwrap();
        assert_eq!(file.read(), None);
    }

    #[test]
    fn test_malformed_ack_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let file = AckFile::new(dir.path().join("netlimit-test.ack"));
        fs::write(file.path(), "{not json").unwrap();
        assert_eq!(file.read(), None);
    }
}
