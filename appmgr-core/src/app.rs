use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Client-supplied description of a managed application.
///
/// Unknown fields are carried through untouched in `extra` so that the
/// registry echoes back exactly what it was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct AppSpec {
    /// Unique application name; also the `/app/{name}` path segment.
    pub name: String,
    /// Command executed through `/bin/sh -c`.
    pub command_line: String,
    /// Working directory for the process, if not the service's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Whether the application is expected to exit on its own.
    #[serde(default)]
    pub run_once: bool,
    /// Extra environment variables for the process.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppSpec {
    /// Creates a spec with the two required fields and no extras.
    pub fn new(name: impl Into<String>, command_line: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command_line: command_line.into(),
            working_dir: None,
            run_once: false,
            env: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// Parses and validates a spec from a JSON value.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidAppSpec`] if the value is not an object,
    /// a field has the wrong type, or [`AppSpec::validate`] fails.
    pub fn from_json(value: Value) -> Result<Self, CoreError> {
        if !value.is_object() {
            return Err(CoreError::InvalidAppSpec {
                field: "<root>".to_owned(),
                reason: "expected a JSON object".to_owned(),
            });
        }
        let spec: Self = serde_json::from_value(value).map_err(|e| CoreError::InvalidAppSpec {
            field: "<root>".to_owned(),
            reason: e.to_string(),
        })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Checks the invariants the registry relies on.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidAppSpec`] if the name is empty or contains
    /// `/`, or if the command line is blank.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(invalid("name", "must not be empty"));
        }
        if self.name.contains('/') {
            return Err(invalid("name", "must not contain '/'"));
        }
        if self.command_line.trim().is_empty() {
            return Err(invalid("command_line", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> CoreError {
    CoreError::InvalidAppSpec {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}
