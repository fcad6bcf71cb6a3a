//! Session persistence.
//!
//! The file store writes atomically:
//! 1. Write to a temp file with a PID suffix
//! 2. fsync so data reaches disk
//! 3. Rename over the target
//!
//! and restricts the file to the owner on Unix.

use crate::error::{CareLinkError, Result};
use crate::session::Session;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Where sessions are loaded from and written back to.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<Session>>;
    fn save(&self, session: &Session) -> Result<()>;
    fn delete(&self) -> Result<()>;
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&self.path).map_err(|e| CareLinkError::io_with_path(e, &self.path))?;
        let session = serde_json::from_str(&contents).map_err(|e| CareLinkError::Json {
            message: format!("Failed to parse {}: {}", self.path.display(), e),
            source: Some(e),
        })?;
        Ok(Some(session))
    }

    fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| CareLinkError::io_with_path(e, parent))?;
            }
        }

        let serialized = serde_json::to_string_pretty(session)?;
        let temp_path = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| CareLinkError::io_with_path(e, &temp_path))?;
            restrict_permissions(&temp_path)?;
            file.write_all(serialized.as_bytes())
                .map_err(|e| CareLinkError::io_with_path(e, &temp_path))?;
            file.sync_all()
                .map_err(|e| CareLinkError::io_with_path(e, &temp_path))?;
        }

        fs::rename(&temp_path, &self.path).map_err(|e| CareLinkError::Io {
            message: format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                self.path.display()
            ),
            path: Some(self.path.clone()),
            source: Some(e),
        })?;

        debug!("Saved session to {}", self.path.display());
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| CareLinkError::io_with_path(e, &self.path))?;
            debug!("Deleted session file {}", self.path.display());
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| CareLinkError::io_with_path(e, path))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// In-process store, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<Session>>,
}

impl MemorySessionStore {
    pub fn new(session: Option<Session>) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    /// Currently stored session.
    pub fn current(&self) -> Option<Session> {
        self.session.lock().ok().and_then(|guard| guard.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Session>>> {
        self.session
            .lock()
            .map_err(|_| CareLinkError::Other("session store lock poisoned".to_string()))
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<Session>> {
        Ok(self.lock()?.clone())
    }

    fn save(&self, session: &Session) -> Result<()> {
        *self.lock()? = Some(session.clone());
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        *self.lock()? = None;
        Ok(())
    }
}
