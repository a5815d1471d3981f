//! Registry abstraction trait.
//!
//! The HTTP gateway only ever talks to this trait, so the supervisor behind
//! it can be swapped (in-process, remote daemon, test double) without
//! touching request handling.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use appmgr_core::{ProcessId, RunTimeout};

use crate::RegistryError;

/// Owner of managed-application lifecycle and resource state.
///
/// Implementations must be `Send + Sync`; the gateway calls them from many
/// request tasks at once and relies on the implementation's own locking.
#[async_trait]
pub trait AppRegistry: Send + Sync {
    /// Register (or replace) an application from its JSON description and
    /// return the stored description.
    ///
    /// # Errors
    /// Returns [`RegistryError::InvalidSpec`] if the description is invalid.
    async fn add_app(&self, spec: Value) -> Result<Value, RegistryError>;

    /// Return the JSON description of one application.
    ///
    /// # Errors
    /// Returns [`RegistryError::AppNotFound`] for an unknown name.
    async fn app(&self, name: &str) -> Result<Value, RegistryError>;

    /// Stop and forget an application.
    ///
    /// # Errors
    /// Returns [`RegistryError::AppNotFound`] for an unknown name.
    async fn remove_app(&self, name: &str) -> Result<(), RegistryError>;

    /// Start an application's long-running process.
    ///
    /// # Errors
    /// Returns [`RegistryError::AppNotFound`] or [`RegistryError::Spawn`].
    async fn start_app(&self, name: &str) -> Result<(), RegistryError>;

    /// Stop an application's process if it is running.
    ///
    /// # Errors
    /// Returns [`RegistryError::AppNotFound`] for an unknown name.
    async fn stop_app(&self, name: &str) -> Result<(), RegistryError>;

    /// Run the application's command once, capturing its output.
    ///
    /// A detached timeout returns at once with only the process id; the
    /// output is later retrieved through [`AppRegistry::test_output`].
    ///
    /// # Errors
    /// Returns [`RegistryError::AppNotFound`] or [`RegistryError::Spawn`].
    async fn test_run(
        &self,
        name: &str,
        timeout: RunTimeout,
        env: BTreeMap<String, String>,
    ) -> Result<Value, RegistryError>;

    /// Fetch the output of a detached test run.
    ///
    /// # Errors
    /// Returns [`RegistryError::ProcessNotFound`] if the id is unknown or its
    /// output was already collected.
    async fn test_output(&self, name: &str, process: ProcessId) -> Result<Value, RegistryError>;

    /// JSON array of every registered application.
    ///
    /// # Errors
    /// Implementation-defined.
    async fn applications(&self) -> Result<Value, RegistryError>;

    /// JSON rendering of the service configuration, without secrets.
    ///
    /// # Errors
    /// Implementation-defined.
    async fn config(&self) -> Result<Value, RegistryError>;

    /// Snapshot of host and registry resource usage.
    ///
    /// # Errors
    /// Implementation-defined.
    async fn resources(&self) -> Result<Value, RegistryError>;
}
