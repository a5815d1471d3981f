/// Errors produced by the `appmgr-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A role name was neither `admin` nor `user`.
    #[error("unknown role '{name}'")]
    UnknownRole { name: String },

    /// An application description failed validation.
    #[error("invalid application field '{field}': {reason}")]
    InvalidAppSpec { field: String, reason: String },

    /// A process identifier could not be parsed.
    #[error("invalid process uuid '{value}'")]
    InvalidProcessId { value: String },
}
