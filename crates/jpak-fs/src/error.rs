use std::io;
use thiserror::Error;

/// Terminal outcome of a failed filesystem operation.
///
/// Every handler reports exactly one of these; the bridge turns it into an
/// errno with [`FsError::errno`] (fuser) or [`FsError::status`] (negative
/// status codes).
#[derive(Debug, Error)]
pub enum FsError {
    /// The path is absent from the entry index.
    #[error("no such file or directory")]
    NotFound,

    /// The operation does not apply to this kind of entry.
    #[error("invalid operation for this entry")]
    InvalidOperation,

    /// Write-class operations are never honored.
    #[error("operation not permitted on a read-only package")]
    PermissionDenied,

    /// The archive has not finished loading.
    #[error("filesystem is not ready")]
    NotReady,

    /// The operation has no meaning for a package.
    #[error("operation not supported")]
    NotSupported,

    /// The archive reader failed to load the package.
    #[error("failed to load archive: {0}")]
    Load(#[from] jpak_format::Error),
}

impl FsError {
    /// Positive errno value for this error.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::InvalidOperation => libc::EINVAL,
            FsError::PermissionDenied => libc::EPERM,
            FsError::NotReady => libc::EAGAIN,
            FsError::NotSupported => libc::ENOTSUP,
            FsError::Load(_) => libc::EIO,
        }
    }

    /// Negative status code, as reported to path-based bridges.
    pub fn status(&self) -> i32 {
        -self.errno()
    }
}

/// Errors raised while loading a mount configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// The configuration is not valid TOML for a mount config.
    #[error("toml parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Result type for filesystem handlers.
pub type Result<T> = std::result::Result<T, FsError>;
