//! Error types for the registry crate.

use appmgr_core::{CoreError, ProcessId};

/// Errors surfaced by an [`AppRegistry`](crate::AppRegistry) implementation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// No application is registered under this name.
    #[error("application <{0}> not found")]
    AppNotFound(String),

    /// The application description was rejected.
    #[error("invalid application: {0}")]
    InvalidSpec(#[from] CoreError),

    /// No test run with this identifier is known for the application.
    #[error("no test run {process} for application <{app}>")]
    ProcessNotFound { app: String, process: ProcessId },

    /// The child process could not be started.
    #[error("failed to spawn <{app}>: {source}")]
    Spawn {
        app: String,
        #[source]
        source: std::io::Error,
    },

    /// Underlying I/O error while supervising a process.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
