//! Auth token storage.

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use parking_lot::RwLock;
use tracing::debug;
use tracing::warn;

use crate::error::ApiError;
use crate::traits::TokenStore;

/// Keeps the token for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn store(&self, token: &str) -> Result<(), ApiError> {
        *self.token.write() = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) {
        self.token.write().take();
    }
}

/// Persists the token in a file so that it survives restarts.
///
/// The file is read once at open. Storing rewrites it, clearing removes it.
#[derive(Debug)]
pub struct FileTokenStore {
    path:  PathBuf,
    token: RwLock<Option<String>>,
}

impl FileTokenStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ApiError> {
        let path = path.into();
        let token = match fs::read_to_string(&path) {
            Ok(content) => Some(content.trim().to_string()).filter(|t| !t.is_empty()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(storage_error(&path, err)),
        };
        debug!(path = %path.display(), present = token.is_some(), "opened token file");
        Ok(Self {
            path,
            token: RwLock::new(token),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn store(&self, token: &str) -> Result<(), ApiError> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|err| storage_error(dir, err))?;
        }
        fs::write(&self.path, token).map_err(|err| storage_error(&self.path, err))?;
        *self.token.write() = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) {
        self.token.write().take();
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed token file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => (),
            Err(err) => warn!(path = %self.path.display(), "failed to remove token file: {err}"),
        }
    }
}

fn storage_error(path: &Path, err: io::Error) -> ApiError {
    ApiError::Storage(format!("{}: {err}", path.display()))
}
