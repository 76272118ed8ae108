use thiserror::Error;

/// Domain errors for the provisioning workflow.
///
/// Validation errors (`Config`, `Parse`) are raised before any external
/// call is made. `RemoteCall` covers router and REST failures alike;
/// the step that failed is carried in the message.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid webhook payload: {0}")]
    Parse(String),

    #[error("no free address left in the managed ranges")]
    AllocationExhausted,

    #[error("remote call failed: {0}")]
    RemoteCall(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl BridgeError {
    pub fn remote(context: &str, err: impl std::fmt::Display) -> Self {
        Self::RemoteCall(format!("{}: {}", context, err))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        Self::RemoteCall(err.to_string())
    }
}
