//! Stable per-installation client id, used to list "my" datasets.
//!
//! The id is generated at most once per process and persisted so later runs
//! reuse it. When storage is unavailable the id lives only in memory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CLIENT_ID_PATH_ENV: &str = "TIDETABLE_CLIENT_ID_PATH";
const FILE_NAME: &str = "client_id";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("unable to determine a config directory")]
    NoConfigDir,
    #[error("client id storage {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    id: String,
    persisted: bool,
}

static GLOBAL: OnceCell<ClientIdentity> = OnceCell::new();

impl ClientIdentity {
    /// Process-wide identity, loaded or created on first use.
    pub fn global() -> &'static ClientIdentity {
        GLOBAL.get_or_init(|| {
            let identity = match storage_path() {
                Ok(path) => Self::load_or_create(&path),
                Err(err) => {
                    warn!(
                        target = "tidetable::identity",
                        error = %err,
                        "client id storage unavailable; using an in-memory id"
                    );
                    Self::ephemeral()
                }
            };
            debug!(
                target = "tidetable::identity",
                client_id = identity.id(),
                persisted = identity.persisted,
                "client identity ready"
            );
            identity
        })
    }

    /// Read the id stored at `path`, creating and storing one if missing.
    ///
    /// Never fails: a storage error yields an in-memory id.
    pub fn load_or_create(path: &Path) -> Self {
        match Self::try_load_or_create(path) {
            Ok(identity) => identity,
            Err(err) => {
                warn!(
                    target = "tidetable::identity",
                    error = %err,
                    "client id storage unavailable; using an in-memory id"
                );
                Self::ephemeral()
            }
        }
    }

    pub fn try_load_or_create(path: &Path) -> Result<Self, IdentityError> {
        let io_err = |source| IdentityError::Io {
            path: path.to_path_buf(),
            source,
        };
        match fs::read_to_string(path) {
            Ok(raw) if !raw.trim().is_empty() => {
                return Ok(Self {
                    id: raw.trim().to_string(),
                    persisted: true,
                });
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(err)),
        }

        let id = Uuid::new_v4().to_string();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, &id).map_err(io_err)?;
        Ok(Self {
            id,
            persisted: true,
        })
    }

    pub fn ephemeral() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            persisted: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }
}

/// `TIDETABLE_CLIENT_ID_PATH`, else `<config dir>/client_id`.
pub fn storage_path() -> Result<PathBuf, IdentityError> {
    if let Some(path) = std::env::var_os(CLIENT_ID_PATH_ENV).filter(|path| !path.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let dirs = ProjectDirs::from("dev", "tidetable", "tidetable").ok_or(IdentityError::NoConfigDir)?;
    Ok(dirs.config_dir().join(FILE_NAME))
}
