//! The last journal revision that made it into the module files, kept next to
//! them so a restart picks up where the previous run stopped.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use memofs::{IoResultExt, Vfs};
use serde::{Deserialize, Serialize};

use crate::error::ExportError;

pub const STATE_FILE_NAME: &str = ".autoexport-state.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorState {
    last_revision: u64,
}

pub struct RevisionCursor {
    vfs: Arc<Vfs>,
    path: PathBuf,
}

impl RevisionCursor {
    pub fn new(vfs: Arc<Vfs>, project_root: &Path) -> Self {
        Self {
            vfs,
            path: project_root.join(STATE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The committed revision, or 0 if nothing was ever committed.
    pub fn load(&self) -> Result<u64, ExportError> {
        let Some(contents) = self.vfs.read(&self.path).with_not_found()? else {
            return Ok(0);
        };

        let state: CursorState = serde_json::from_slice(&contents)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        Ok(state.last_revision)
    }

    pub fn commit(&self, revision: u64) -> Result<(), ExportError> {
        let state = CursorState {
            last_revision: revision,
        };
        let contents = serde_json::to_vec(&state)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        log::trace!("Committing revision {}", revision);
        self.vfs.write(&self.path, contents)?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cursor(dir: &Path) -> RevisionCursor {
        let vfs = Vfs::new_default();
        vfs.set_watch_enabled(false);

        RevisionCursor::new(Arc::new(vfs), dir)
    }

    #[test]
    fn missing_state_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(cursor(dir.path()).load().unwrap(), 0);
    }

    #[test]
    fn committed_revision_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        cursor(dir.path()).commit(42).unwrap();
        assert_eq!(cursor(dir.path()).load().unwrap(), 42);

        let contents = std::fs::read_to_string(dir.path().join(STATE_FILE_NAME)).unwrap();
        assert_eq!(contents, r#"{"lastRevision":42}"#);
    }

    #[test]
    fn malformed_state_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATE_FILE_NAME), "not json").unwrap();

        assert!(matches!(
            cursor(dir.path()).load(),
            Err(ExportError::Io { .. })
        ));
    }
}
