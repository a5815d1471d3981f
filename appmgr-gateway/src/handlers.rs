//! Route bodies.
//!
//! Each handler translates request fields into one call on the registry or
//! the token service. Expected outcomes such as a missing `action` flag are
//! ordinary [`Reply`] values; only failures become [`ApiError`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    body::Bytes,
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde_json::{json, Map, Value};

use appmgr_core::{ProcessId, Role, RunTimeout};

use crate::{
    context::AppContext,
    error::ApiError,
    sanitize::{escape, sanitize},
    token::extract_bearer,
};

/// Capture pattern for an application name path segment.
pub const APP_NAME: &str = r"/app/([^/\*]+)";

/// Shell used to wrap commands registered through `PUT /app/sh`.
const SHELL_PREFIX: &str = "/bin/sh -c '";

/// Every operation the HTTP surface exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Endpoint {
    Login,
    Auth,
    GetApp,
    RunApp,
    RunOutput,
    GetApps,
    GetResources,
    GetConfig,
    RegisterApp,
    RegisterShellApp,
    ControlApp,
    DeleteApp,
}

/// The service's route table, in registration order.
#[must_use]
pub fn routes() -> Vec<(Method, &'static str, Endpoint)> {
    vec![
        (Method::POST, "/login", Endpoint::Login),
        (Method::POST, r"/auth/([^/\*]+)", Endpoint::Auth),
        (Method::GET, APP_NAME, Endpoint::GetApp),
        (Method::GET, r"/app/([^/\*]+)/run", Endpoint::RunApp),
        (Method::GET, r"/app/([^/\*]+)/run/output", Endpoint::RunOutput),
        (Method::GET, "/app-manager/applications", Endpoint::GetApps),
        (Method::GET, "/app-manager/resources", Endpoint::GetResources),
        (Method::GET, "/app-manager/config", Endpoint::GetConfig),
        (Method::PUT, APP_NAME, Endpoint::RegisterApp),
        (Method::PUT, "/app/sh", Endpoint::RegisterShellApp),
        (Method::POST, APP_NAME, Endpoint::ControlApp),
        (Method::DELETE, APP_NAME, Endpoint::DeleteApp),
    ]
}

/// A request after decoding, as handed to a handler.
#[derive(Debug, Clone, Default)]
pub struct ApiRequest {
    /// Percent-decoded, normalized path.
    pub path: String,
    /// Values captured by the route pattern.
    pub params: Vec<String>,
    /// Percent-decoded query parameters.
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiRequest {
    fn param(&self, index: usize) -> Result<&str, ApiError> {
        self.params
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| ApiError::Internal(format!("route for {} captured no parameter {index}", self.path)))
    }

    fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    fn body_text(&self) -> Result<&str, ApiError> {
        std::str::from_utf8(&self.body).map_err(|_| ApiError::invalid("request body is not valid UTF-8"))
    }

    /// Parse the body as a JSON object. Empty bodies and `null` are rejected.
    fn json_object(&self) -> Result<Map<String, Value>, ApiError> {
        match serde_json::from_str::<Value>(self.body_text()?) {
            Ok(Value::Object(fields)) => Ok(fields),
            Ok(_) | Err(_) => Err(ApiError::invalid("invalid json format")),
        }
    }
}

/// Successful handler outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `200 OK` with a pretty-printed JSON body.
    Json(Value),
    /// Plain-text body with an explicit status.
    Text(StatusCode, String),
}

impl Reply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self::Text(StatusCode::OK, message.into())
    }

    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Text(status, message.into())
    }

    /// Neutralize markup in a JSON body. Text replies are left alone.
    #[must_use]
    pub fn sanitized(self) -> Self {
        match self {
            Self::Json(value) => Self::Json(sanitize(value)),
            text @ Self::Text(..) => text,
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self {
            Reply::Json(value) => match serde_json::to_string_pretty(&value) {
                Ok(body) => (
                    StatusCode::OK,
                    [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
                    body,
                )
                    .into_response(),
                Err(e) => ApiError::Internal(format!("failed to render reply: {e}")).into_response(),
            },
            Reply::Text(status, message) => (status, message).into_response(),
        }
    }
}

impl Endpoint {
    /// Run this endpoint's handler.
    ///
    /// # Errors
    /// Returns whatever [`ApiError`] the handler raises.
    pub async fn call(self, ctx: Arc<AppContext>, req: ApiRequest) -> Result<Reply, ApiError> {
        let ctx = ctx.as_ref();
        match self {
            Endpoint::Login => login(ctx, &req),
            Endpoint::Auth => auth(ctx, &req),
            Endpoint::GetApp => Ok(Reply::Json(ctx.registry.app(req.param(0)?).await?)),
            Endpoint::RunApp => run_app(ctx, &req).await,
            Endpoint::RunOutput => run_output(ctx, &req).await,
            Endpoint::GetApps => Ok(Reply::Json(ctx.registry.applications().await?)),
            Endpoint::GetResources => Ok(Reply::Json(ctx.registry.resources().await?)),
            Endpoint::GetConfig => Ok(Reply::Json(ctx.registry.config().await?)),
            Endpoint::RegisterApp => register_app(ctx, &req).await,
            Endpoint::RegisterShellApp => register_shell_app(ctx, &req).await,
            Endpoint::ControlApp => control_app(ctx, &req).await,
            Endpoint::DeleteApp => {
                let name = req.param(0)?;
                ctx.registry.remove_app(name).await?;
                Ok(Reply::ok(format!("application <{}> removed.", escape(name))))
            }
        }
    }
}

/// `POST /login`: issue a token signed with the presented password.
fn login(ctx: &AppContext, req: &ApiRequest) -> Result<Reply, ApiError> {
    let (Some(username), Some(password)) = (req.headers.get("username"), req.headers.get("password"))
    else {
        return Ok(Reply::status(
            StatusCode::NETWORK_AUTHENTICATION_REQUIRED,
            "username or password missing",
        ));
    };
    let username = decode_credential(username)?;
    let password = decode_credential(password)?;

    let token = ctx.tokens.issue(&username, &password)?;
    match ctx.tokens.verify_any_role(&token) {
        Ok(role) => {
            tracing::debug!(user = %username, %role, "login success");
            Ok(Reply::Json(json!({
                "profile": {
                    "name": username,
                    "auth_time": Utc::now().timestamp_millis(),
                },
                "token_type": "Bearer",
                "access_token": token,
            })))
        }
        Err(e) => {
            tracing::warn!(user = %username, error = %e, "login rejected");
            Ok(Reply::status(StatusCode::UNAUTHORIZED, "Incorrect authentication info"))
        }
    }
}

fn decode_credential(value: &HeaderValue) -> Result<String, ApiError> {
    let bytes = BASE64
        .decode(value.as_bytes())
        .map_err(|_| ApiError::InvalidCredentials)?;
    match String::from_utf8(bytes) {
        Ok(text) if !text.is_empty() => Ok(text),
        _ => Err(ApiError::InvalidCredentials),
    }
}

/// `POST /auth/{role}`: check the caller's token against a role.
fn auth(ctx: &AppContext, req: &ApiRequest) -> Result<Reply, ApiError> {
    let token = extract_bearer(&req.headers);
    match req.param(0)?.parse::<Role>() {
        Ok(Role::Admin) => ctx.tokens.verify_role(Role::Admin, &token)?,
        Ok(_) => {
            ctx.tokens.verify_any_role(&token)?;
        }
        Err(_) => return Ok(Reply::status(StatusCode::UNAUTHORIZED, "No such user")),
    }
    Ok(Reply::ok("Success"))
}

async fn run_app(ctx: &AppContext, req: &ApiRequest) -> Result<Reply, ApiError> {
    let name = req.param(0)?;
    let timeout = match req.query("timeout") {
        Some(raw) => {
            let requested: i64 = raw
                .trim()
                .parse()
                .map_err(|_| ApiError::invalid(format!("invalid timeout '{}'", escape(raw))))?;
            RunTimeout::clamp(requested)
        }
        None => RunTimeout::DEFAULT,
    };
    tracing::debug!(app = name, %timeout, "test run requested");

    let env = env_overrides(req.body_text()?)?;
    Ok(Reply::Json(ctx.registry.test_run(name, timeout, env).await?))
}

/// Environment overrides from an optional `{"env": {...}}` body.
///
/// The body is sanitized before its values are used.
fn env_overrides(body: &str) -> Result<BTreeMap<String, String>, ApiError> {
    let body = body.trim();
    if body.is_empty() || body == "null" {
        return Ok(BTreeMap::new());
    }
    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| ApiError::invalid(format!("invalid json format: {e}")))?;
    let Value::Object(mut fields) = sanitize(parsed) else {
        return Err(ApiError::invalid("invalid json format"));
    };
    match fields.remove("env") {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(env) => string_map(env),
    }
}

fn string_map(value: Value) -> Result<BTreeMap<String, String>, ApiError> {
    let Value::Object(entries) = value else {
        return Err(ApiError::invalid("env must be a JSON object"));
    };
    entries
        .into_iter()
        .map(|(key, v)| match v {
            Value::String(s) => Ok((key, s)),
            _ => Err(ApiError::invalid(format!("env value for {key} must be a string"))),
        })
        .collect()
}

async fn run_output(ctx: &AppContext, req: &ApiRequest) -> Result<Reply, ApiError> {
    let name = req.param(0)?;
    let Some(raw) = req.query("process_uuid") else {
        return Err(ApiError::invalid("process_uuid is required for get run output"));
    };
    let process: ProcessId = raw.parse().map_err(|e| ApiError::invalid(format!("{e}")))?;
    tracing::debug!(app = name, %process, "test output requested");
    Ok(Reply::Json(ctx.registry.test_output(name, process).await?))
}

/// `PUT /app/{name}`: register an application from its JSON description.
async fn register_app(ctx: &AppContext, req: &ApiRequest) -> Result<Reply, ApiError> {
    let mut fields = req.json_object()?;
    if !fields.get("name").is_some_and(Value::is_string) {
        fields.insert("name".to_owned(), Value::String(req.param(0)?.to_owned()));
    }
    Ok(Reply::Json(ctx.registry.add_app(Value::Object(fields)).await?))
}

/// `PUT /app/sh`: register a run-once shell command.
async fn register_shell_app(ctx: &AppContext, req: &ApiRequest) -> Result<Reply, ApiError> {
    let mut fields = req.json_object()?;
    let command = fields
        .get("command_line")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::invalid("command_line is required"))?;
    let env = match fields.get("env") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(env) => string_map(env.clone())?,
    };

    let command_line = shell_command_line(&env, command);
    fields.insert("command_line".to_owned(), Value::String(command_line));
    fields.insert("run_once".to_owned(), Value::Bool(true));
    Ok(Reply::Json(ctx.registry.add_app(Value::Object(fields)).await?))
}

/// `/bin/sh -c 'export K=V;...<command>'`.
fn shell_command_line(env: &BTreeMap<String, String>, command: &str) -> String {
    let mut line = String::from(SHELL_PREFIX);
    for (key, value) in env {
        line.push_str(&format!("export {key}={value};"));
    }
    line.push_str(command);
    line.push('\'');
    line
}

/// `POST /app/{name}?action=start|stop`.
async fn control_app(ctx: &AppContext, req: &ApiRequest) -> Result<Reply, ApiError> {
    let name = req.param(0)?;
    let Some(action) = req.query("action") else {
        return Ok(Reply::status(StatusCode::SERVICE_UNAVAILABLE, "Require action query flag"));
    };
    match action {
        "start" => ctx.registry.start_app(name).await?,
        "stop" => ctx.registry.stop_app(name).await?,
        _ => return Ok(Reply::status(StatusCode::SERVICE_UNAVAILABLE, "No such action query flag")),
    }
    Ok(Reply::ok(format!("{action} <{}> success.", escape(name))))
}
