// File-backed single-slot mailbox (controller -> helper) and the helper's liveness marker
//
// Writes go to a sibling temp file and are renamed over the slot, so a reader
// never observes a partially written command. The reader claims the slot by
// renaming it away before reading; a write that lands after the claim creates
// a fresh slot and is picked up on the next poll instead of being erased.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(unix)]
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Atomically replace `path` with `contents` (temp file + fsync + rename)
///
/// The temp file is created exclusively, so a planted file or symlink at its
/// name makes the write fail instead of being followed.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = sibling(
        path,
        &format!(
            "{}.{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ),
    );
    replace_via(&tmp, path, contents)
}

fn replace_via(tmp: &Path, path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o644);

    let mut file = options.open(tmp)?;
    let result = (|| {
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(tmp);
    }
    result
}

/// Check that only `owner` (or root) can create files in `dir`
#[cfg(unix)]
pub fn verify_private_dir(dir: &Path, owner: u32) -> io::Result<()> {
    let meta = fs::symlink_metadata(dir)?;
    if !meta.file_type().is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{} is not a directory", dir.display()),
        ));
    }
    if meta.uid() != owner {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{} is owned by uid {}, expected {}", dir.display(), meta.uid(), owner),
        ));
    }
    if meta.mode() & 0o022 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{} is writable by other users (mode {:o})", dir.display(), meta.mode() & 0o777),
        ));
    }
    Ok(())
}

#[cfg(unix)]
fn open_no_follow(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .read(true)
        .custom_flags(nix::fcntl::OFlag::O_NOFOLLOW.bits())
        .open(path)
}

#[cfg(not(unix))]
fn open_no_follow(path: &Path) -> io::Result<fs::File> {
    fs::File::open(path)
}

/// Remove a file, treating "already gone" as success
pub(crate) fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Last-writer-wins command slot shared by one controller and one helper
#[derive(Debug, Clone)]
pub struct CommandChannel {
    path: PathBuf,
    owner: Option<u32>,
}

impl CommandChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owner: None,
        }
    }

    /// Only accept commands from files owned by `uid` (helper side)
    pub fn with_owner(mut self, uid: u32) -> Self {
        self.owner = Some(uid);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `command`, replacing any command the helper has not consumed yet
    pub fn write(&self, command: &str) -> io::Result<()> {
        write_atomically(&self.path, command.as_bytes())?;
        log::debug!("Wrote command to {:?} ({} bytes)", self.path, command.len());
        Ok(())
    }

    /// Take the pending command, if any (helper side)
    ///
    /// Anything other than a regular file, or a file not owned by the
    /// expected owner, is discarded unread.
    pub fn drain(&self) -> io::Result<Option<String>> {
        let claim = self.claim_path();

        match fs::rename(&self.path, &claim) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }

        let contents = self.read_claim(&claim);
        remove_if_exists(&claim)?;
        let Some(contents) = contents? else {
            return Ok(None);
        };

        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(contents))
    }

    fn read_claim(&self, claim: &Path) -> io::Result<Option<String>> {
        if !fs::symlink_metadata(claim)?.file_type().is_file() {
            log::warn!("Discarding command channel entry that is not a regular file");
            return Ok(None);
        }

        let mut file = open_no_follow(claim)?;

        #[cfg(unix)]
        if let Some(owner) = self.owner {
            let uid = file.metadata()?.uid();
            if uid != owner {
                log::warn!(
                    "Discarding command written by uid {} (expected {})",
                    uid,
                    owner
                );
                return Ok(None);
            }
        }

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Ok(Some(contents))
    }

    /// Remove the slot and any half-finished claim left by a crashed helper
    pub fn reset(&self) -> io::Result<()> {
        remove_if_exists(&self.claim_path())?;
        remove_if_exists(&self.path)
    }

    fn claim_path(&self) -> PathBuf {
        sibling(&self.path, "claim")
    }
}

/// Readiness signal published by the helper once initial shaping is installed
#[derive(Debug, Clone)]
pub struct LivenessMarker {
    path: PathBuf,
}

impl LivenessMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the helper PID into the marker
    pub fn publish(&self, pid: u32) -> io::Result<()> {
        write_atomically(&self.path, format!("{}\n", pid).as_bytes())
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// PID recorded by the helper; `None` when absent or unreadable
    pub fn read_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn clear(&self) -> io::Result<()> {
        remove_if_exists(&self.path)
    }
}
