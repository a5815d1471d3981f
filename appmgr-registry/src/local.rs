//! In-process application registry.
//!
//! Keeps application descriptions in memory and supervises their processes
//! directly with `tokio::process`. Nothing is persisted; a restart forgets
//! every registration.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::process::Child;
use tokio::sync::Mutex;

use appmgr_core::{AppSpec, ProcessId, RunTimeout};

use crate::process::{self, RunOutput};
use crate::{AppRegistry, RegistryError};

struct AppEntry {
    spec: AppSpec,
    registered_at: DateTime<Utc>,
    last_started: Option<DateTime<Utc>>,
    child: Option<Child>,
}

impl AppEntry {
    fn new(spec: AppSpec) -> Self {
        Self { spec, registered_at: Utc::now(), last_started: None, child: None }
    }

    /// Drop the child handle once the process has exited.
    fn reap(&mut self) {
        if let Some(child) = &mut self.child {
            match child.try_wait() {
                Ok(None) => {}
                Ok(Some(status)) => {
                    tracing::debug!(app = %self.spec.name, %status, "application exited");
                    self.child = None;
                }
                Err(e) => {
                    tracing::warn!(app = %self.spec.name, error = %e, "failed to poll application");
                    self.child = None;
                }
            }
        }
    }

    fn is_running(&mut self) -> bool {
        self.reap();
        self.child.is_some()
    }

    async fn stop(&mut self) {
        self.reap();
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!(app = %self.spec.name, error = %e, "failed to kill application");
            }
        }
    }

    fn to_json(&mut self) -> Result<Value, RegistryError> {
        let running = self.is_running();
        let mut value = serde_json::to_value(&self.spec)
            .map_err(|e| RegistryError::Io(std::io::Error::other(e)))?;
        if let Value::Object(fields) = &mut value {
            fields.insert("status".to_owned(), json!(if running { "running" } else { "stopped" }));
            fields.insert(
                "pid".to_owned(),
                self.child.as_ref().and_then(Child::id).map_or(Value::Null, Value::from),
            );
            fields.insert("registered_at".to_owned(), json!(self.registered_at.to_rfc3339()));
            if let Some(at) = self.last_started {
                fields.insert("last_start_time".to_owned(), json!(at.to_rfc3339()));
            }
        }
        Ok(value)
    }
}

/// How long a finished detached run waits to be collected.
pub const RUN_RETENTION: Duration = Duration::from_secs(60);

struct TestRun {
    app: String,
    output: Option<RunOutput>,
    finished_at: Option<Instant>,
}

type RunTable = Arc<Mutex<HashMap<ProcessId, TestRun>>>;

/// Drop finished runs nobody collected within `retention`.
fn evict_stale(runs: &mut HashMap<ProcessId, TestRun>, retention: Duration) {
    let before = runs.len();
    runs.retain(|_, run| run.finished_at.is_none_or(|at| at.elapsed() <= retention));
    let evicted = before - runs.len();
    if evicted > 0 {
        tracing::debug!(evicted, "expired uncollected test runs");
    }
}

/// Thread-safe, in-memory [`AppRegistry`].
pub struct LocalRegistry {
    apps: Mutex<BTreeMap<String, AppEntry>>,
    runs: RunTable,
    run_retention: Duration,
    config: Value,
    started_at: Instant,
}

impl LocalRegistry {
    /// Create an empty registry that reports `config` from
    /// [`AppRegistry::config`].
    #[must_use]
    pub fn new(config: Value) -> Self {
        Self {
            apps: Mutex::new(BTreeMap::new()),
            runs: Arc::new(Mutex::new(HashMap::new())),
            run_retention: RUN_RETENTION,
            config,
            started_at: Instant::now(),
        }
    }

    /// Keep uncollected detached output for `retention` after the run ends.
    #[must_use]
    pub fn with_run_retention(mut self, retention: Duration) -> Self {
        self.run_retention = retention;
        self
    }

    async fn spec(&self, name: &str) -> Result<AppSpec, RegistryError> {
        self.apps
            .lock()
            .await
            .get(name)
            .map(|entry| entry.spec.clone())
            .ok_or_else(|| RegistryError::AppNotFound(name.to_owned()))
    }
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::new(json!({}))
    }
}

#[async_trait]
impl AppRegistry for LocalRegistry {
    async fn add_app(&self, spec: Value) -> Result<Value, RegistryError> {
        let spec = AppSpec::from_json(spec)?;
        let name = spec.name.clone();
        let mut apps = self.apps.lock().await;
        if let Some(mut previous) = apps.remove(&name) {
            previous.stop().await;
            tracing::info!(app = %name, "replacing registered application");
        }
        let entry = apps.entry(name.clone()).or_insert(AppEntry::new(spec));
        tracing::info!(app = %name, "application registered");
        entry.to_json()
    }

    async fn app(&self, name: &str) -> Result<Value, RegistryError> {
        self.apps
            .lock()
            .await
            .get_mut(name)
            .ok_or_else(|| RegistryError::AppNotFound(name.to_owned()))?
            .to_json()
    }

    async fn remove_app(&self, name: &str) -> Result<(), RegistryError> {
        let mut entry = self
            .apps
            .lock()
            .await
            .remove(name)
            .ok_or_else(|| RegistryError::AppNotFound(name.to_owned()))?;
        entry.stop().await;
        self.runs.lock().await.retain(|_, run| run.app != name);
        tracing::info!(app = %name, "application removed");
        Ok(())
    }

    async fn start_app(&self, name: &str) -> Result<(), RegistryError> {
        let mut apps = self.apps.lock().await;
        let entry = apps
            .get_mut(name)
            .ok_or_else(|| RegistryError::AppNotFound(name.to_owned()))?;
        if entry.is_running() {
            return Ok(());
        }
        let child = process::spawn_detached(&entry.spec)?;
        tracing::info!(app = %name, pid = ?child.id(), "application started");
        entry.child = Some(child);
        entry.last_started = Some(Utc::now());
        Ok(())
    }

    async fn stop_app(&self, name: &str) -> Result<(), RegistryError> {
        let mut apps = self.apps.lock().await;
        let entry = apps
            .get_mut(name)
            .ok_or_else(|| RegistryError::AppNotFound(name.to_owned()))?;
        entry.stop().await;
        tracing::info!(app = %name, "application stopped");
        Ok(())
    }

    async fn test_run(
        &self,
        name: &str,
        timeout: RunTimeout,
        env: BTreeMap<String, String>,
    ) -> Result<Value, RegistryError> {
        let spec = self.spec(name).await?;
        let process_uuid = ProcessId::new();
        let child = process::spawn_captured(&spec, &env)?;
        tracing::debug!(app = %name, %process_uuid, %timeout, "test run started");

        if !timeout.is_detached() {
            let output = process::capture(process_uuid, child, timeout.duration()).await?;
            return serde_json::to_value(output)
                .map_err(|e| RegistryError::Io(std::io::Error::other(e)));
        }

        {
            let mut runs = self.runs.lock().await;
            evict_stale(&mut runs, self.run_retention);
            runs.insert(process_uuid, TestRun { app: name.to_owned(), output: None, finished_at: None });
        }
        let runs = Arc::clone(&self.runs);
        let limit = timeout.duration();
        tokio::spawn(async move {
            let output = match process::capture(process_uuid, child, limit).await {
                Ok(output) => output,
                Err(e) => RunOutput {
                    finished: true,
                    stderr: e.to_string(),
                    ..RunOutput::pending(process_uuid)
                },
            };
            if let Some(run) = runs.lock().await.get_mut(&process_uuid) {
                run.output = Some(output);
                run.finished_at = Some(Instant::now());
            }
        });
        Ok(json!({ "process_uuid": process_uuid }))
    }

    async fn test_output(&self, name: &str, process: ProcessId) -> Result<Value, RegistryError> {
        let mut runs = self.runs.lock().await;
        evict_stale(&mut runs, self.run_retention);
        let not_found = || RegistryError::ProcessNotFound { app: name.to_owned(), process };
        let run = runs.get(&process).ok_or_else(not_found)?;
        if run.app != name {
            return Err(not_found());
        }
        let output = if run.output.is_some() {
            runs.remove(&process).and_then(|run| run.output).ok_or_else(not_found)?
        } else {
            RunOutput::pending(process)
        };
        serde_json::to_value(output).map_err(|e| RegistryError::Io(std::io::Error::other(e)))
    }

    async fn applications(&self) -> Result<Value, RegistryError> {
        let mut apps = self.apps.lock().await;
        apps.values_mut()
            .map(AppEntry::to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }

    async fn config(&self) -> Result<Value, RegistryError> {
        Ok(self.config.clone())
    }

    async fn resources(&self) -> Result<Value, RegistryError> {
        let mut apps = self.apps.lock().await;
        let mut running = 0_usize;
        for entry in apps.values_mut() {
            if entry.is_running() {
                running += 1;
            }
        }
        let cpu_cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Ok(json!({
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "cpu_cores": cpu_cores,
            "pid": std::process::id(),
            "uptime_seconds": self.started_at.elapsed().as_secs(),
            "applications": apps.len(),
            "running_applications": running,
            "snapshot_time": Utc::now().to_rfc3339(),
        }))
    }
}
