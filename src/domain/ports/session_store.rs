use std::path::Path;

use crate::domain::error::SessionError;
use crate::domain::models::SessionState;

/// Durable storage for a single session's state.
///
/// `save` returns only once the state is fully written; a concurrent reader
/// sees either the previous snapshot or the new one, never a mix.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<SessionState, SessionError>;

    fn save(&self, state: &SessionState) -> Result<(), SessionError>;

    fn exists(&self) -> bool;

    /// Human-readable location, for reporting.
    fn location(&self) -> &Path;
}
