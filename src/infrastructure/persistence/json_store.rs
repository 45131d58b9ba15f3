use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::domain::error::SessionError;
use crate::domain::models::SessionState;
use crate::domain::ports::SessionStore;

/// Session state stored as one pretty-printed JSON file.
///
/// Writes go to a sibling temporary file which is synced and persisted over
/// the target, so the file on disk is always a complete snapshot.
#[derive(Debug, Clone)]
pub struct JsonSessionStore {
    path: PathBuf,
}

impl JsonSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write_err(&self, source: std::io::Error) -> SessionError {
        SessionError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

impl SessionStore for JsonSessionStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn load(&self) -> Result<SessionState, SessionError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SessionError::NotFound(self.path.clone())
            } else {
                SessionError::Read {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;

        let state: SessionState =
            serde_json::from_str(&contents).map_err(|source| SessionError::Decode {
                path: self.path.clone(),
                source,
            })?;
        debug!(session_id = %state.session_id(), iteration = state.current_iteration(), "session loaded");
        Ok(state)
    }

    fn save(&self, state: &SessionState) -> Result<(), SessionError> {
        let json = serde_json::to_string_pretty(state).map_err(SessionError::Encode)?;

        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(|e| self.write_err(e))?;
                parent
            }
            None => Path::new("."),
        };

        // Dropped unpersisted on any error, which removes it.
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.write_err(e))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| self.write_err(e))?;
        tmp.write_all(b"\n").map_err(|e| self.write_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.write_err(e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.write_err(e.error))?;

        debug!(
            path = %self.path.display(),
            iteration = state.current_iteration(),
            "session saved"
        );
        Ok(())
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn location(&self) -> &Path {
        &self.path
    }
}
