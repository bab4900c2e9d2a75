//! Error types for device-level operations.

use std::io;

use thiserror::Error;

use crate::protocol::CodecError;
use crate::rpc::ErrorReport;
use crate::transport::TransportError;

/// Generic failure class handed to the device lifecycle owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotSupported,
    NotFound,
    PermissionDenied,
    Busy,
    InvalidData,
    Internal,
}

#[derive(Error, Debug)]
pub enum DevlinkError {
    #[error("{0}")]
    NotSupported(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidData(String),

    #[error("{0}")]
    Internal(String),

    /// Failure reported by the kernel for one request.
    #[error("{0}")]
    Protocol(ErrorReport),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{prefix}: {source}")]
    Context {
        prefix: String,
        #[source]
        source: Box<DevlinkError>,
    },
}

impl DevlinkError {
    /// Prepend a description of the failed step, keeping the original error.
    pub fn context(self, prefix: impl Into<String>) -> Self {
        DevlinkError::Context {
            prefix: prefix.into(),
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DevlinkError::NotSupported(_) => ErrorKind::NotSupported,
            DevlinkError::NotFound(_) => ErrorKind::NotFound,
            DevlinkError::InvalidData(_) | DevlinkError::Codec(_) => ErrorKind::InvalidData,
            DevlinkError::Internal(_) => ErrorKind::Internal,
            DevlinkError::Protocol(report) => report.kind(),
            DevlinkError::Transport(TransportError::EventNotFound(_)) => ErrorKind::NotFound,
            DevlinkError::Transport(_) => ErrorKind::Internal,
            DevlinkError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => ErrorKind::NotFound,
                io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                _ => ErrorKind::Internal,
            },
            DevlinkError::Context { source, .. } => source.kind(),
        }
    }

    /// The kernel report behind this error, looking through any context.
    pub fn report(&self) -> Option<&ErrorReport> {
        match self {
            DevlinkError::Protocol(report) => Some(report),
            DevlinkError::Context { source, .. } => source.report(),
            _ => None,
        }
    }
}

pub(crate) trait ResultExt<T> {
    fn context(self, prefix: &str) -> Result<T, DevlinkError>;
}

impl<T, E: Into<DevlinkError>> ResultExt<T> for Result<T, E> {
    fn context(self, prefix: &str) -> Result<T, DevlinkError> {
        self.map_err(|e| DevlinkError::context(e.into(), prefix))
    }
}
