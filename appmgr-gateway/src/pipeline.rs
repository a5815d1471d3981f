//! The request pipeline.
//!
//! Every request goes through [`dispatch`]: log, authenticate by method
//! tier, answer the root banner, resolve the route, run the handler on its
//! own task, sanitize the reply and map failures to a response. axum only
//! supplies the transport; its own routing is not used.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use percent_encoding::percent_decode_str;
use tower_http::trace::TraceLayer;

use appmgr_core::Role;

use crate::{
    context::AppContext,
    error::ApiError,
    handlers::ApiRequest,
    router::{normalize_path, Resolution, SUPPORTED_METHODS},
    token::{extract_bearer, TokenError, TokenService},
};

/// Largest accepted request body.
pub const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Reply to the root path.
pub const BANNER: &str = "REST service";

/// Build the HTTP service.
pub fn app(ctx: Arc<AppContext>) -> axum::Router {
    axum::Router::new()
        .fallback(dispatch)
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
}

async fn dispatch(State(ctx): State<Arc<AppContext>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let remote = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|info| info.0);
    let path = normalize_path(&decode(parts.uri.path()));
    let raw_query = parts.uri.query().unwrap_or_default();
    tracing::debug!(
        method = %parts.method,
        path = %path,
        query = %decode(raw_query),
        remote = ?remote,
        "request"
    );

    if !SUPPORTED_METHODS.contains(&parts.method) {
        return (StatusCode::METHOD_NOT_ALLOWED, "method not supported").into_response();
    }

    if let Err(e) = authorize(&ctx.tokens, &parts.method, &path, &parts.headers) {
        tracing::warn!(remote = ?remote, path = %path, error = %e, "authentication failed");
        return ApiError::from(e).into_response();
    }
    tracing::debug!(remote = ?remote, "authentication success");

    let (endpoint, params) = match ctx.router.resolve(&parts.method, &path) {
        Resolution::Root => return (StatusCode::OK, BANNER).into_response(),
        Resolution::NotFound => return (StatusCode::NOT_FOUND, "Path not found").into_response(),
        Resolution::Matched(m) => (*m.route.handler(), m.params),
    };

    let body = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return ApiError::invalid(format!("failed to read request body: {e}")).into_response()
        }
    };
    let request = ApiRequest {
        path: path.clone(),
        params,
        query: parse_query(raw_query),
        headers: parts.headers,
        body,
    };

    // A dropped connection drops this future, not the spawned handler.
    let handler = tokio::spawn(endpoint.call(Arc::clone(&ctx), request));
    match handler.await {
        Ok(Ok(reply)) => reply.sanitized().into_response(),
        Ok(Err(e)) => {
            tracing::warn!(path = %path, error = %e, "request failed");
            e.into_response()
        }
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "handler aborted");
            ApiError::Internal(e.to_string()).into_response()
        }
    }
}

/// Apply the per-method trust tier.
///
/// GET accepts any valid token. POST to `/login` or `/auth/*` is open.
/// Everything else needs an admin token.
fn authorize(tokens: &TokenService, method: &Method, path: &str, headers: &HeaderMap) -> Result<(), TokenError> {
    let open_post = path == "/login" || path.starts_with("/auth/");
    match method {
        &Method::GET => tokens.verify_any_role(&extract_bearer(headers)).map(|_| ()),
        &Method::POST if open_post => Ok(()),
        _ => tokens.verify_role(Role::Admin, &extract_bearer(headers)),
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::header::AUTHORIZATION;
    use serde_json::{json, Value};
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    use appmgr_core::{ProcessId, RunTimeout};
    use appmgr_registry::{AppRegistry, RegistryError};

    use super::*;
    use crate::config::{GatewayConfig, JwtConfig, PrincipalConfig};

    /// Registry double that records every call it receives.
    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
    }

    impl Recording {
        async fn record(&self, call: String) {
            self.calls.lock().await.push(call);
        }

        async fn calls(&self) -> Vec<String> {
            self.calls.lock().await.clone()
        }
    }

    #[async_trait]
    impl AppRegistry for Recording {
        async fn add_app(&self, spec: Value) -> Result<Value, RegistryError> {
            self.record(format!("add {spec}")).await;
            Ok(spec)
        }

        async fn app(&self, name: &str) -> Result<Value, RegistryError> {
            self.record(format!("app {name}")).await;
            if name == "missing" {
                return Err(RegistryError::AppNotFound(name.to_owned()));
            }
            Ok(json!({"name": name, "command_line": "echo <b>(hi)</b>"}))
        }

        async fn remove_app(&self, name: &str) -> Result<(), RegistryError> {
            self.record(format!("remove {name}")).await;
            Ok(())
        }

        async fn start_app(&self, name: &str) -> Result<(), RegistryError> {
            self.record(format!("start {name}")).await;
            Ok(())
        }

        async fn stop_app(&self, name: &str) -> Result<(), RegistryError> {
            self.record(format!("stop {name}")).await;
            Ok(())
        }

        async fn test_run(
            &self,
            name: &str,
            timeout: RunTimeout,
            env: BTreeMap<String, String>,
        ) -> Result<Value, RegistryError> {
            self.record(format!("run {name} {} {env:?}", timeout.seconds())).await;
            Ok(json!({"finished": true}))
        }

        async fn test_output(&self, name: &str, process: ProcessId) -> Result<Value, RegistryError> {
            self.record(format!("output {name} {process}")).await;
            Ok(json!({"finished": false}))
        }

        async fn applications(&self) -> Result<Value, RegistryError> {
            Ok(json!([]))
        }

        async fn config(&self) -> Result<Value, RegistryError> {
            Ok(json!({}))
        }

        async fn resources(&self) -> Result<Value, RegistryError> {
            panic!("resource probe exploded");
        }
    }

    fn config(enabled: bool) -> GatewayConfig {
        GatewayConfig {
            jwt: JwtConfig {
                enabled,
                admin: PrincipalConfig::new("admin", "admin-secret"),
                user: PrincipalConfig::new("alice", "s3cret"),
            },
            ..GatewayConfig::default()
        }
    }

    fn context(enabled: bool) -> (Arc<AppContext>, Arc<Recording>) {
        let registry = Arc::new(Recording::default());
        match AppContext::new(&config(enabled), Arc::clone(&registry) as Arc<dyn AppRegistry>) {
            Ok(ctx) => (Arc::new(ctx), registry),
            Err(e) => panic!("route table rejected: {e}"),
        }
    }

    fn token(ctx: &AppContext, name: &str, secret: &str) -> String {
        match ctx.tokens.issue(name, secret) {
            Ok(t) => t,
            Err(e) => panic!("issue failed: {e}"),
        }
    }

    async fn send(
        ctx: &Arc<AppContext>,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: &str,
    ) -> (StatusCode, String) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match builder.body(Body::from(body.to_owned())) {
            Ok(r) => r,
            Err(e) => panic!("failed to build request: {e}"),
        };
        let resp = match app(Arc::clone(ctx)).oneshot(req).await {
            Ok(r) => r,
            Err(e) => panic!("handler error: {e}"),
        };
        let status = resp.status();
        let bytes = match axum::body::to_bytes(resp.into_body(), BODY_LIMIT).await {
            Ok(b) => b,
            Err(e) => panic!("failed to read body: {e}"),
        };
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn root_answers_banner_after_authentication() {
        let (ctx, _) = context(true);
        let user = token(&ctx, "alice", "s3cret");
        assert_eq!(send(&ctx, Method::GET, "/", Some(&user), "").await, (StatusCode::OK, BANNER.to_owned()));
        let (status, _) = send(&ctx, Method::GET, "//", None, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "tokens are checked before the banner");
    }

    #[tokio::test]
    async fn admin_tier_rejects_user_token_before_handler_runs() {
        let (ctx, registry) = context(true);
        let user = token(&ctx, "alice", "s3cret");
        let (status, body) = send(&ctx, Method::PUT, "/app/web", Some(&user), r#"{"command_line": "ls"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("Access denied"), "got {body}");
        let (status, _) = send(&ctx, Method::DELETE, "/app/web", None, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(registry.calls().await.is_empty(), "handler side effects observed");
    }

    #[tokio::test]
    async fn login_and_auth_paths_skip_token_check() {
        let (ctx, _) = context(true);
        let (status, body) = send(&ctx, Method::POST, "/login", None, "").await;
        assert_eq!(status, StatusCode::NETWORK_AUTHENTICATION_REQUIRED, "got {body}");
        let (status, body) = send(&ctx, Method::POST, "/auth/root", None, "").await;
        assert_eq!((status, body.as_str()), (StatusCode::UNAUTHORIZED, "No such user"));
    }

    #[tokio::test]
    async fn auth_endpoint_checks_requested_role() {
        let (ctx, _) = context(true);
        let user = token(&ctx, "alice", "s3cret");
        let admin = token(&ctx, "admin", "admin-secret");
        assert_eq!(send(&ctx, Method::POST, "/auth/user", Some(&user), "").await.0, StatusCode::OK);
        assert_eq!(send(&ctx, Method::POST, "/auth/user", Some(&admin), "").await.0, StatusCode::OK);
        assert_eq!(send(&ctx, Method::POST, "/auth/admin", Some(&admin), "").await.0, StatusCode::OK);
        assert_eq!(
            send(&ctx, Method::POST, "/auth/admin", Some(&user), "").await.0,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn unknown_paths_and_methods() {
        let (ctx, _) = context(false);
        assert_eq!(
            send(&ctx, Method::GET, "/nowhere", None, "").await,
            (StatusCode::NOT_FOUND, "Path not found".to_owned())
        );
        assert_eq!(send(&ctx, Method::PATCH, "/app/web", None, "").await.0, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn json_replies_are_sanitized() {
        let (ctx, registry) = context(false);
        let (status, body) = send(&ctx, Method::GET, "/app/web", None, "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("echo &lt;b&gt;&#40;hi&#41;&lt;/b&gt;"), "got {body}");
        assert!(!body.contains("<b>"));
        assert_eq!(registry.calls().await, vec!["app web".to_owned()]);
    }

    #[tokio::test]
    async fn registry_errors_become_bad_request_with_message() {
        let (ctx, _) = context(false);
        assert_eq!(
            send(&ctx, Method::GET, "/app/missing", None, "").await,
            (StatusCode::BAD_REQUEST, "application <missing> not found".to_owned())
        );
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let (ctx, _) = context(false);
        assert_eq!(
            send(&ctx, Method::GET, "/app-manager/resources", None, "").await,
            (StatusCode::BAD_REQUEST, "unknown exception".to_owned())
        );
        assert_eq!(send(&ctx, Method::GET, "/app-manager/config", None, "").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn run_app_clamps_timeout_and_forwards_env() {
        let (ctx, registry) = context(false);
        let cases = [("", 5), ("?timeout=0", 60), ("?timeout=61", 60), ("?timeout=-61", -60), ("?timeout=-5", -5)];
        for (query, _) in cases {
            let (status, body) = send(&ctx, Method::GET, &format!("/app/web/run{query}"), None, "").await;
            assert_eq!(status, StatusCode::OK, "{query}: {body}");
        }
        let expected: Vec<String> = cases.iter().map(|(_, t)| format!("run web {t} {{}}")).collect();
        assert_eq!(registry.calls().await, expected);

        let (status, _) = send(&ctx, Method::GET, "/app/web/run?timeout=soon", None, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&ctx, Method::GET, "/app/web/run", None, r#"{"env": {"A": "<x>"}}"#).await;
        assert_eq!(status, StatusCode::OK);
        let last = registry.calls().await.pop();
        assert_eq!(last.as_deref(), Some(r#"run web 5 {"A": "&lt;x&gt;"}"#));
    }

    #[tokio::test]
    async fn run_output_requires_process_uuid() {
        let (ctx, registry) = context(false);
        let (status, body) = send(&ctx, Method::GET, "/app/web/run/output", None, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("process_uuid"), "got {body}");
        let (status, _) = send(&ctx, Method::GET, "/app/web/run/output?process_uuid=nope", None, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(registry.calls().await.is_empty());

        let id = ProcessId::new();
        let uri = format!("/app/web/run/output?process_uuid={id}");
        assert_eq!(send(&ctx, Method::GET, &uri, None, "").await.0, StatusCode::OK);
        assert_eq!(registry.calls().await, vec![format!("output web {id}")]);
    }

    #[tokio::test]
    async fn put_app_sh_reaches_shell_registration() {
        let (ctx, registry) = context(false);
        let body = r#"{"name": "probe", "command_line": " env | grep B ", "env": {"A": "b"}}"#;
        let (status, reply) = send(&ctx, Method::PUT, "/app/sh", None, body).await;
        assert_eq!(status, StatusCode::OK, "got {reply}");

        let calls = registry.calls().await;
        let Some(recorded) = calls.first().and_then(|c| c.strip_prefix("add ")) else {
            panic!("add_app not called: {calls:?}");
        };
        let spec: Value = match serde_json::from_str(recorded) {
            Ok(v) => v,
            Err(e) => panic!("recorded spec is not JSON: {e}"),
        };
        assert_eq!(spec["command_line"], "/bin/sh -c 'export A=b;env | grep B'");
        assert_eq!(spec["run_once"], true);
    }

    #[tokio::test]
    async fn put_app_fills_name_and_rejects_null() {
        let (ctx, registry) = context(false);
        let (status, _) = send(&ctx, Method::PUT, "/app/web", None, r#"{"command_line": "ls"}"#).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&ctx, Method::PUT, "/app/web", None, "null").await;
        assert_eq!((status, body.as_str()), (StatusCode::BAD_REQUEST, "invalid json format"));

        let calls = registry.calls().await;
        assert_eq!(calls.len(), 1, "null body must not reach the registry: {calls:?}");
        let spec: Value = match calls[0].strip_prefix("add ").map(serde_json::from_str) {
            Some(Ok(v)) => v,
            other => panic!("unexpected call {other:?}"),
        };
        assert_eq!(spec, json!({"name": "web", "command_line": "ls"}));
    }

    #[tokio::test]
    async fn control_and_delete_reply_with_text() {
        let (ctx, registry) = context(false);
        assert_eq!(
            send(&ctx, Method::POST, "/app/web", None, "").await,
            (StatusCode::SERVICE_UNAVAILABLE, "Require action query flag".to_owned())
        );
        assert_eq!(
            send(&ctx, Method::POST, "/app/web?action=restart", None, "").await,
            (StatusCode::SERVICE_UNAVAILABLE, "No such action query flag".to_owned())
        );
        assert_eq!(
            send(&ctx, Method::POST, "/app/web?action=start", None, "").await,
            (StatusCode::OK, "start <web> success.".to_owned())
        );
        assert_eq!(
            send(&ctx, Method::DELETE, "//app/web", None, "").await,
            (StatusCode::OK, "application <web> removed.".to_owned())
        );
        assert_eq!(registry.calls().await, vec!["start web".to_owned(), "remove web".to_owned()]);
    }

    #[test]
    fn query_pairs_are_percent_decoded() {
        let query = parse_query("timeout=-5&process_uuid=a%2Db&flag&=x");
        assert_eq!(query.get("timeout").map(String::as_str), Some("-5"));
        assert_eq!(query.get("process_uuid").map(String::as_str), Some("a-b"));
        assert_eq!(query.get("flag").map(String::as_str), Some(""));
    }
}
