// Session identity and lifecycle state

use std::io;
use std::path::{Path, PathBuf};

const FILE_PREFIX: &str = "netlimit";
const DEFAULT_SESSION_ID: &str = "default";

/// Runtime state of the privileged helper as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disabled,
    Starting,
    Active,
    Stopping,
}

/// Names the file pair (command channel + liveness marker) a shaping
/// session communicates through.
///
/// The host default is one fixed pair per user, in a directory only that user
/// can write to: the root helper executes whatever the channel holds. A
/// second controller of the same user collides with the first one. Tests and
/// embedders pick their own directory/id to stay isolated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: String,
    dir: PathBuf,
}

impl Session {
    pub fn new(dir: impl Into<PathBuf>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dir: dir.into(),
        }
    }

    /// The single per-user session (`netlimit-<uid>` under the runtime or temp directory)
    pub fn host_default() -> Self {
        Self::new(default_dir(), DEFAULT_SESSION_ID)
    }

    /// Build a session from optional overrides (config/CLI), falling back to the host default
    pub fn from_overrides(dir: Option<&Path>, id: Option<&str>) -> Self {
        Self::new(
            dir.map(Path::to_path_buf).unwrap_or_else(default_dir),
            id.unwrap_or(DEFAULT_SESSION_ID),
        )
    }

    /// Create the session directory (mode 0700) if needed and make sure no
    /// other user can plant files in it
    pub fn prepare(&self) -> io::Result<()> {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&self.dir)?;

        #[cfg(unix)]
        crate::channel::verify_private_dir(&self.dir, current_uid())?;
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Command channel backing file
    pub fn channel_path(&self) -> PathBuf {
        self.file(".cmd")
    }

    /// Liveness marker (holds the helper PID)
    pub fn marker_path(&self) -> PathBuf {
        self.file(".pid")
    }

    /// Optional acknowledgement file written by the helper
    pub fn ack_path(&self) -> PathBuf {
        self.file(".ack")
    }

    fn file(&self, suffix: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{}{}", FILE_PREFIX, self.id, suffix))
    }
}

/// Uid the session files belong to (and the helper accepts commands from)
#[cfg(unix)]
pub fn current_uid() -> u32 {
    nix::unistd::geteuid().as_raw()
}

#[cfg(unix)]
fn default_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(format!("{}-{}", FILE_PREFIX, current_uid()))
}

#[cfg(not(unix))]
fn default_dir() -> PathBuf {
    std::env::temp_dir().join(FILE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_derived_from_session_id() {
        let session = Session::new("/var/run/x", "abc");
        assert_eq!(
            session.channel_path(),
            PathBuf::from("/var/run/x/netlimit-abc.cmd")
        );
        assert_eq!(
            session.marker_path(),
            PathBuf::from("/var/run/x/netlimit-abc.pid")
        );
        assert_eq!(
            session.ack_path(),
            PathBuf::from("/var/run/x/netlimit-abc.ack")
        );
    }

    #[test]
    fn test_distinct_sessions_do_not_share_files() {
        let a = Session::new("/tmp", "a");
        let b = Session::new("/tmp", "b");
        assert_ne!(a.channel_path(), b.channel_path());
        assert_ne!(a.marker_path(), b.marker_path());
    }

    #[cfg(unix)]
    #[test]
    fn test_host_default_is_per_user_directory() {
        let session = Session::from_overrides(None, None);
        assert_eq!(session, Session::host_default());
        assert_ne!(session.dir(), std::env::temp_dir().as_path());
        assert_eq!(
            session.dir().file_name().unwrap().to_string_lossy(),
            format!("netlimit-{}", current_uid())
        );
        assert_eq!(session.id(), "default");
    }

    #[cfg(unix)]
    #[test]
    fn test_prepare_creates_private_directory() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let session = Session::new(root.path().join("netlimit-test"), "a");
        session.prepare().unwrap();

        let mode = std::fs::metadata(session.dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        // Preparing an existing private directory is fine
        session.prepare().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_prepare_rejects_shared_directory() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let shared = root.path().join("shared");
        std::fs::create_dir(&shared).unwrap();
        std::fs::set_permissions(&shared, std::fs::Permissions::from_mode(0o1777)).unwrap();

        let err = Session::new(&shared, "a").prepare().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }
}
