//! HTTP control plane for the appmgr application manager.
//!
//! Routes pattern-based paths to handlers, enforces the admin/user token
//! tiers, sanitizes JSON crossing the boundary and turns every failure into
//! a well-formed response. Application lifecycle itself is delegated to an
//! [`appmgr_registry::AppRegistry`].

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod listener;
pub mod pipeline;
pub mod router;
pub mod sanitize;
pub mod token;

pub use config::GatewayConfig;
pub use context::AppContext;
pub use error::{ApiError, ServeError};
pub use token::TokenService;
