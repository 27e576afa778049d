use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::matrix::{command::Command, error::MatrixError};

/// Per-call send options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Surface non-2xx statuses as [`MatrixError::HttpStatus`]. Authorized
    /// commands turn this off so the client can inspect 401s itself.
    pub status_errors: bool,
    pub timeout: Option<Duration>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            status_errors: true,
            timeout: None,
        }
    }
}

/// A received HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON. Malformed bodies are a protocol error.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, MatrixError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Sends commands to a homeserver.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, command: &Command, options: SendOptions) -> Result<Response, MatrixError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, command: &Command, options: SendOptions) -> Result<Response, MatrixError> {
        let mut request = self
            .http
            .request(command.method().clone(), command.url().clone());
        for (name, value) in command.headers() {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = command.body() {
            request = request.json(body);
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        debug!("{} {} -> {status}", command.method(), command.path());

        let response = Response::new(status, body);
        if options.status_errors && !response.is_success() {
            return Err(MatrixError::HttpStatus {
                status,
                path: command.path().to_owned(),
                body: response.text(),
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Deserialize)]
    struct Whoami {
        user_id: String,
    }

    #[test]
    fn decodes_json_bodies() {
        let response = Response::new(200, r#"{"user_id":"@alice:example.org"}"#);
        let whoami: Whoami = response.json().unwrap();
        assert_eq!(whoami.user_id, "@alice:example.org");
    }

    #[test]
    fn malformed_json_is_a_protocol_error() {
        let response = Response::new(200, "<html>");
        let err = response.json::<Whoami>().unwrap_err();
        assert!(matches!(err, MatrixError::Protocol(_)));
    }

    #[test]
    fn success_range() {
        assert!(Response::new(204, "").is_success());
        assert!(!Response::new(401, "").is_success());
        assert!(!Response::new(302, "").is_success());
    }
}
