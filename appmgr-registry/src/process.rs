//! Child process helpers shared by lifecycle and test-run operations.
//!
//! Every application command is executed through `/bin/sh -c`, the same way
//! an operator would type it.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::{Child, Command};

use appmgr_core::{AppSpec, ProcessId};

use crate::RegistryError;

const SHELL: &str = "/bin/sh";

/// Captured result of one test run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub process_uuid: ProcessId,
    pub finished: bool,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u128,
}

impl RunOutput {
    /// Placeholder reported while a detached run is still in flight.
    #[must_use]
    pub fn pending(process_uuid: ProcessId) -> Self {
        Self {
            process_uuid,
            finished: false,
            timed_out: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            execution_time_ms: 0,
        }
    }
}

/// Build the shell invocation for `spec`, layering `overrides` on top of the
/// application's own environment.
pub(crate) fn shell_command(spec: &AppSpec, overrides: &BTreeMap<String, String>) -> Command {
    let mut cmd = Command::new(SHELL);
    cmd.arg("-c").arg(&spec.command_line).envs(&spec.env).envs(overrides);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }
    cmd.kill_on_drop(true);
    cmd
}

/// Spawn a long-running application process with its output discarded.
pub(crate) fn spawn_detached(spec: &AppSpec) -> Result<Child, RegistryError> {
    shell_command(spec, &BTreeMap::new())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| RegistryError::Spawn { app: spec.name.clone(), source })
}

/// Spawn a test-run process with stdout and stderr piped.
pub(crate) fn spawn_captured(
    spec: &AppSpec,
    overrides: &BTreeMap<String, String>,
) -> Result<Child, RegistryError> {
    shell_command(spec, overrides)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| RegistryError::Spawn { app: spec.name.clone(), source })
}

/// Wait for `child` for at most `limit`, collecting everything it printed.
///
/// On timeout the child is dropped, which kills it (`kill_on_drop`).
pub(crate) async fn capture(
    process_uuid: ProcessId,
    child: Child,
    limit: Duration,
) -> Result<RunOutput, RegistryError> {
    let start = Instant::now();
    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            Ok(RunOutput {
                process_uuid,
                finished: true,
                timed_out: false,
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                execution_time_ms: start.elapsed().as_millis(),
            })
        }
        Err(_elapsed) => {
            tracing::debug!(%process_uuid, limit_s = limit.as_secs(), "test run timed out");
            Ok(RunOutput {
                finished: true,
                timed_out: true,
                execution_time_ms: start.elapsed().as_millis(),
                ..RunOutput::pending(process_uuid)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capture_collects_stdout_and_exit_code() {
        let spec = AppSpec::new("echo", "echo hello; exit 3");
        let child = match spawn_captured(&spec, &BTreeMap::new()) {
            Ok(c) => c,
            Err(e) => panic!("spawn failed: {e}"),
        };
        let out = match capture(ProcessId::new(), child, Duration::from_secs(10)).await {
            Ok(o) => o,
            Err(e) => panic!("capture failed: {e}"),
        };
        assert!(out.finished);
        assert!(!out.timed_out);
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.exit_code, Some(3));
    }

    #[tokio::test]
    async fn overrides_win_over_app_env() {
        let mut spec = AppSpec::new("env", "printf %s \"$GREETING\"");
        spec.env.insert("GREETING".to_owned(), "from-app".to_owned());
        let overrides = BTreeMap::from([("GREETING".to_owned(), "from-request".to_owned())]);
        let child = match spawn_captured(&spec, &overrides) {
            Ok(c) => c,
            Err(e) => panic!("spawn failed: {e}"),
        };
        let out = match capture(ProcessId::new(), child, Duration::from_secs(10)).await {
            Ok(o) => o,
            Err(e) => panic!("capture failed: {e}"),
        };
        assert_eq!(out.stdout, "from-request");
    }

    #[tokio::test]
    async fn capture_reports_timeout() {
        let spec = AppSpec::new("sleepy", "sleep 5");
        let child = match spawn_captured(&spec, &BTreeMap::new()) {
            Ok(c) => c,
            Err(e) => panic!("spawn failed: {e}"),
        };
        let out = match capture(ProcessId::new(), child, Duration::from_millis(100)).await {
            Ok(o) => o,
            Err(e) => panic!("capture failed: {e}"),
        };
        assert!(out.timed_out, "sleep 5 must not finish within 100ms");
        assert!(out.exit_code.is_none());
    }
}
