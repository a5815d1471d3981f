//! Core types for the appmgr application manager.
//!
//! Defines the value types shared by the registry and the HTTP gateway:
//! caller roles, test-run timeouts, process identifiers and the JSON
//! application description.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod app;
pub mod error;
pub mod id;
pub mod role;
pub mod timeout;

pub use app::AppSpec;
pub use error::CoreError;
pub use id::ProcessId;
pub use role::Role;
pub use timeout::RunTimeout;
