//! Application registry and process supervisor for appmgr.
//!
//! Defines the [`AppRegistry`] contract consumed by the HTTP gateway and an
//! in-process implementation, [`LocalRegistry`], that runs each managed
//! application as a `/bin/sh -c` child process.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod local;
pub mod process;
pub mod registry;

pub use error::RegistryError;
pub use local::LocalRegistry;
pub use process::RunOutput;
pub use registry::AppRegistry;
