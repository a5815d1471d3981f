//! Gateway configuration.
//!
//! Loaded once at startup from an optional JSON file (`APPMGR_CONFIG`) and
//! then overridden field by field from `APPMGR_*` environment variables.
//! The result is immutable for the life of the process.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:6060";

const DEV_ADMIN: (&str, &str) = ("admin", "admin");
const DEV_USER: (&str, &str) = ("user", "user");

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`GatewayConfig`].
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An environment override could not be parsed.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Principal name and signing secret of one role.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrincipalConfig {
    pub name: String,
    pub secret: String,
}

impl PrincipalConfig {
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self { name: name.into(), secret: secret.into() }
    }

    /// Blank fields count as unset and take the dev default.
    fn fill_unset(&mut self, role: &str, (name, secret): (&str, &str)) {
        if self.name.trim().is_empty() {
            tracing::warn!(role, "principal name not set; using dev default");
            self.name = name.to_owned();
        }
        if self.secret.is_empty() {
            self.secret = secret.to_owned();
        }
    }
}

impl Default for PrincipalConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl fmt::Debug for PrincipalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrincipalConfig")
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Token settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// When `false`, every request is treated as authenticated.
    pub enabled: bool,
    pub admin: PrincipalConfig,
    pub user: PrincipalConfig,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            admin: PrincipalConfig::new(DEV_ADMIN.0, DEV_ADMIN.1),
            user: PrincipalConfig::new(DEV_USER.0, DEV_USER.1),
        }
    }
}

/// PEM certificate chain and private key for HTTPS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Complete gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    pub jwt: JwtConfig,
    pub tls: Option<TlsConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 6060)),
            jwt: JwtConfig::default(),
            tls: None,
        }
    }
}

impl GatewayConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    /// See [`GatewayConfig::from_lookup`].
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    ///
    /// # Errors
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] if
    /// `APPMGR_CONFIG` names an unreadable or invalid file, and
    /// [`ConfigError::InvalidValue`] for an unparsable override.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("APPMGR_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(addr) = lookup("APPMGR_LISTEN_ADDR") {
            config.listen_addr = addr.parse().map_err(|e| ConfigError::InvalidValue {
                key: "APPMGR_LISTEN_ADDR".to_owned(),
                reason: format!("{e}"),
            })?;
        }
        if let Some(enabled) = lookup("APPMGR_JWT_ENABLED") {
            config.jwt.enabled = parse_bool("APPMGR_JWT_ENABLED", &enabled)?;
        }
        override_string(&lookup, "APPMGR_JWT_ADMIN_NAME", &mut config.jwt.admin.name);
        override_string(&lookup, "APPMGR_JWT_ADMIN_KEY", &mut config.jwt.admin.secret);
        override_string(&lookup, "APPMGR_JWT_USER_NAME", &mut config.jwt.user.name);
        override_string(&lookup, "APPMGR_JWT_USER_KEY", &mut config.jwt.user.secret);

        match (lookup("APPMGR_TLS_CERT"), lookup("APPMGR_TLS_KEY")) {
            (Some(cert_path), Some(key_path)) => {
                config.tls = Some(TlsConfig { cert_path: cert_path.into(), key_path: key_path.into() });
            }
            (None, None) => {}
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "APPMGR_TLS_CERT/APPMGR_TLS_KEY".to_owned(),
                    reason: "both must be set together".to_owned(),
                })
            }
        }

        config.jwt.admin.fill_unset("admin", DEV_ADMIN);
        config.jwt.user.fill_unset("user", DEV_USER);
        config.warn_on_dev_secrets();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
        serde_json::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.to_owned(), source })
    }

    fn warn_on_dev_secrets(&self) {
        if !self.jwt.enabled {
            tracing::warn!("token authentication is disabled; every request is trusted");
            return;
        }
        if self.jwt.admin.secret == DEV_ADMIN.1 {
            tracing::warn!("APPMGR_JWT_ADMIN_KEY not set; using insecure dev default");
        }
        if self.jwt.user.secret == DEV_USER.1 {
            tracing::warn!("APPMGR_JWT_USER_KEY not set; using insecure dev default");
        }
    }

    /// Configuration as reported by `GET /app-manager/config`: secrets are
    /// never included.
    #[must_use]
    pub fn public_json(&self) -> Value {
        json!({
            "listen_addr": self.listen_addr.to_string(),
            "https": self.tls.is_some(),
            "jwt": {
                "enabled": self.jwt.enabled,
                "admin_name": self.jwt.admin.name,
                "user_name": self.jwt.user.name,
            },
        })
    }
}

fn override_string<F>(lookup: &F, key: &str, target: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
        *target = value;
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_owned(),
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<GatewayConfig, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        GatewayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = match load(&[]) {
            Ok(c) => c,
            Err(e) => panic!("load failed: {e}"),
        };
        assert_eq!(config.listen_addr.to_string(), DEFAULT_LISTEN_ADDR);
        assert!(config.jwt.enabled);
        assert_eq!(config.jwt.admin.name, "admin");
        assert!(config.tls.is_none());
    }

    #[test]
    fn environment_overrides_fields() {
        let config = match load(&[
            ("APPMGR_LISTEN_ADDR", "127.0.0.1:7070"),
            ("APPMGR_JWT_ENABLED", "false"),
            ("APPMGR_JWT_USER_NAME", "alice"),
            ("APPMGR_JWT_USER_KEY", "s3cret"),
            ("APPMGR_TLS_CERT", "/etc/appmgr/server.crt"),
            ("APPMGR_TLS_KEY", "/etc/appmgr/server.key"),
        ]) {
            Ok(c) => c,
            Err(e) => panic!("load failed: {e}"),
        };
        assert_eq!(config.listen_addr.port(), 7070);
        assert!(!config.jwt.enabled);
        assert_eq!(config.jwt.user, PrincipalConfig::new("alice", "s3cret"));
        assert_eq!(
            config.tls.map(|t| t.key_path),
            Some(PathBuf::from("/etc/appmgr/server.key"))
        );
    }

    #[test]
    fn bad_overrides_are_reported() {
        assert!(matches!(
            load(&[("APPMGR_LISTEN_ADDR", "nowhere")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            load(&[("APPMGR_JWT_ENABLED", "maybe")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            load(&[("APPMGR_TLS_CERT", "/only/cert.pem")]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn missing_config_file_is_a_read_error() {
        assert!(matches!(
            load(&[("APPMGR_CONFIG", "/definitely/not/here.json")]),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn partial_json_file_keeps_defaults() {
        let parsed: GatewayConfig =
            match serde_json::from_str(r#"{"jwt": {"user": {"name": "bob", "secret": "pw"}}}"#) {
                Ok(c) => c,
                Err(e) => panic!("parse failed: {e}"),
            };
        assert_eq!(parsed.jwt.user.name, "bob");
        assert!(parsed.jwt.enabled, "unspecified fields keep their defaults");
        assert_eq!(parsed.jwt.admin.name, "admin");
    }

    #[test]
    fn blank_environment_secrets_fall_back_to_dev_defaults() {
        let config = match load(&[("APPMGR_JWT_ADMIN_KEY", ""), ("APPMGR_JWT_USER_NAME", "  ")]) {
            Ok(c) => c,
            Err(e) => panic!("load failed: {e}"),
        };
        assert_eq!(config.jwt.admin, PrincipalConfig::new(DEV_ADMIN.0, DEV_ADMIN.1));
        assert_eq!(config.jwt.user, PrincipalConfig::new(DEV_USER.0, DEV_USER.1));
    }

    #[test]
    fn config_file_without_secret_falls_back_to_dev_default() {
        let path = std::env::temp_dir().join(format!("appmgr-config-{}.json", std::process::id()));
        if let Err(e) = std::fs::write(&path, r#"{"jwt": {"admin": {"name": "root"}}}"#) {
            panic!("write failed: {e}");
        }
        let file = path.to_string_lossy().into_owned();
        let loaded = load(&[("APPMGR_CONFIG", file.as_str())]);
        let _ = std::fs::remove_file(&path);
        let config = match loaded {
            Ok(c) => c,
            Err(e) => panic!("load failed: {e}"),
        };
        assert_eq!(config.jwt.admin, PrincipalConfig::new("root", DEV_ADMIN.1));
    }

    #[test]
    fn public_json_has_no_secrets() {
        let mut config = GatewayConfig::default();
        config.jwt.admin.secret = "top-secret".to_owned();
        let rendered = config.public_json().to_string();
        assert!(!rendered.contains("top-secret"));
        assert!(rendered.contains("admin_name"));
    }
}
