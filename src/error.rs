use thiserror::Error;

use crate::common::Notice;

/// Failures of the request/response data service.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not authorized")]
    Unauthorized,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Redirect-worthy: the credential is missing or was rejected.
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// Converts the failure of `action` into something the view can show.
    pub fn to_notice(&self, action: &str) -> Notice {
        if self.is_auth() {
            Notice::auth_required(format!("{action}: please sign in again"))
        } else {
            Notice::transient(format!("{action}: {self}"))
        }
    }
}

/// Failures of the persistent push channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("push channel is not connected")]
    NotConnected,
    #[error("push channel closed")]
    Closed,
    #[error("push channel i/o: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
}
