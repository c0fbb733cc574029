//! Error types for the ovfexport core library.

use std::path::PathBuf;

/// The main error type for export operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested VM does not exist on the server.
    #[error("VM {vm} does not exist")]
    NotFound { vm: String },

    /// The VM is in a state that does not allow export.
    #[error("Precondition failed: {message}")]
    Precondition { message: String },

    /// The server moved the export lease into its error state.
    #[error("Lease error: {fault}")]
    Lease { fault: String },

    /// A disk transfer failed (HTTP status or I/O mid-stream).
    #[error("Download error for '{url}'{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Download {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// The server failed to generate the OVF descriptor.
    #[error("Descriptor error: {message}")]
    Descriptor { message: String },

    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// Malformed session cookie or failed login.
    #[error("Session error: {message}")]
    Session { message: String },

    /// SOAP transport failure, server fault, or unexpected response shape.
    #[error("SOAP error: {message}")]
    Soap { message: String },
}

/// A specialized Result type for export operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a not-found error for a VM name or UUID.
    pub fn not_found(vm: impl Into<String>) -> Self {
        Self::NotFound { vm: vm.into() }
    }

    /// Create a precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Create a lease error carrying the server-reported fault.
    pub fn lease(fault: impl Into<String>) -> Self {
        Self::Lease {
            fault: fault.into(),
        }
    }

    /// Create a download error without an HTTP status.
    pub fn download(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            url: url.into(),
            status: None,
            message: message.into(),
        }
    }

    /// Create a download error for a non-success HTTP response.
    pub fn download_status(url: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Download {
            url: url.into(),
            status: Some(status),
            message: message.into(),
        }
    }

    /// Create a descriptor generation error.
    pub fn descriptor(message: impl Into<String>) -> Self {
        Self::Descriptor {
            message: message.into(),
        }
    }

    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create a session error.
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Create a SOAP error.
    pub fn soap(message: impl Into<String>) -> Self {
        Self::Soap {
            message: message.into(),
        }
    }

    /// Returns true if this error means the VM could not be found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}

impl From<reqwest::Error> for Error {
    fn from(source: reqwest::Error) -> Self {
        Self::soap(source.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(source: quick_xml::Error) -> Self {
        Self::soap(format!("malformed XML: {source}"))
    }
}
