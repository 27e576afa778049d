use thiserror::Error;

use crate::matrix::features::Requirement;
use crate::matrix::version::ApiVersion;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum MatrixError {
    /// Client and homeserver share no API version.
    #[error("no supported Matrix API versions in common with {server_url} (server offers {server_versions:?})")]
    Negotiation {
        server_url: String,
        server_versions: Vec<String>,
    },

    /// Network failure or timeout on any HTTP call.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// A response body could not be decoded into what the protocol expects.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Non-success status on a command sent with status errors enabled.
    #[error("homeserver returned HTTP {status} for {path}")]
    HttpStatus { status: u16, path: String, body: String },

    #[error("feature not implemented by this Matrix client: {0}")]
    UnsupportedFeature(Requirement),

    /// The refresh token itself was rejected. Re-authenticate out of band.
    #[error("refresh token rejected by the homeserver")]
    AuthExpired,

    #[error("Matrix API version {required} or higher is required (negotiated {actual})")]
    VersionTooLow {
        required: ApiVersion,
        actual: ApiVersion,
    },

    #[error("no access token available for an authorized command")]
    MissingAccessToken,

    #[error("malformed version catalog: {0}")]
    Catalog(String),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid user id: {0}")]
    InvalidUserId(String),
}

impl From<reqwest::Error> for MatrixError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Transport(Box::new(err))
        }
    }
}

impl From<serde_json::Error> for MatrixError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
