use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::io;

use thiserror::Error;

/// Semantic failure modes of the filesystem contract.
///
/// This is intentionally "errno-like": every backend reports the same kinds,
/// so callers can classify an error without knowing which backend (or which
/// composition of backends) produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A path component does not exist.
    #[error("entry not found")]
    NotFound,
    /// A create/mkdir/symlink destination already exists.
    #[error("file exists")]
    AlreadyExists,
    /// A non-directory was used where a directory is required.
    #[error("not a directory")]
    NotDir,
    /// Remove on a non-empty directory.
    #[error("directory not empty")]
    NotEmpty,
    /// The backend refused the operation (e.g. removing the root).
    #[error("permission denied")]
    Permission,
    /// Write attempted through a read-only handle or filesystem.
    #[error("read-only file")]
    ReadOnly,
    /// Operation on a closed handle.
    #[error("file already closed")]
    Closed,
    /// Seek or truncate outside the allowed range.
    #[error("out of range")]
    OutOfRange,
    /// Symbolic link expansion exceeded the traversal bound.
    #[error("too many links")]
    TooManyLinks,
    /// A volume prefix does not match the backend's volume.
    #[error("volume mismatch")]
    VolumeMismatch,
    /// Rename or move across backend boundaries.
    #[error("cross-device operation")]
    CrossDevice,
    /// A component is `.`, `..`, empty or reserved where a plain name is
    /// required.
    #[error("invalid name")]
    InvalidName,
    /// Malformed arguments (conflicting flags, mixing rooted and relative
    /// paths, writing to a directory handle, ...).
    #[error("invalid input")]
    InvalidInput,
    /// Delegated backend failure.
    #[error("io error")]
    Io,
}

/// Error returned by every operation of the filesystem contract.
///
/// Carries the failing operation, the client-visible path and the semantic
/// [`ErrorKind`]. Composing backends re-wrap delegate errors so `path` is
/// always the path the caller passed in, never a remapped internal one.
#[derive(Debug)]
pub struct VfsError {
    kind: ErrorKind,
    op: Cow<'static, str>,
    path: String,
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

pub type VfsResult<T> = Result<T, VfsError>;

impl VfsError {
    pub fn new(kind: ErrorKind, op: impl Into<Cow<'static, str>>, path: impl Into<String>) -> Self {
        Self {
            kind,
            op: op.into(),
            path: path.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        op: impl Into<Cow<'static, str>>,
        path: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            op: op.into(),
            path: path.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Re-attribute the error to the operation and client-visible path of an
    /// outer backend, keeping the kind.
    pub fn rewrap(mut self, op: impl Into<Cow<'static, str>>, path: impl Into<String>) -> Self {
        self.op = op.into();
        self.path = path.into();
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == ErrorKind::AlreadyExists
    }

    pub fn is_permission(&self) -> bool {
        self.kind == ErrorKind::Permission
    }

    pub fn is_not_dir(&self) -> bool {
        self.kind == ErrorKind::NotDir
    }
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.op, self.kind)
        } else {
            write!(f, "{} {}: {}", self.op, self.path, self.kind)
        }
    }
}

impl Error for VfsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn Error + 'static))
    }
}

impl From<VfsError> for io::Error {
    fn from(err: VfsError) -> Self {
        let kind = match err.kind {
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::AlreadyExists => io::ErrorKind::AlreadyExists,
            ErrorKind::Permission | ErrorKind::ReadOnly => io::ErrorKind::PermissionDenied,
            ErrorKind::OutOfRange | ErrorKind::InvalidInput | ErrorKind::InvalidName => {
                io::ErrorKind::InvalidInput
            }
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

impl From<io::Error> for VfsError {
    fn from(err: io::Error) -> Self {
        // Recover an error of ours that round-tripped through io::Error so
        // op, path and kind survive the wrapping.
        if err.get_ref().is_some_and(|inner| inner.is::<VfsError>()) {
            match err.into_inner().map(|inner| inner.downcast::<VfsError>()) {
                Some(Ok(vfs)) => return *vfs,
                _ => return VfsError::new(ErrorKind::Io, "io", ""),
            }
        }
        let kind = match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            io::ErrorKind::PermissionDenied => ErrorKind::Permission,
            io::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
            _ => ErrorKind::Io,
        };
        VfsError::with_source(kind, "io", "", err)
    }
}
