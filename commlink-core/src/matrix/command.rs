use std::collections::BTreeMap;

use reqwest::Method;
use serde_json::{Value, json};
use url::Url;

use crate::matrix::error::MatrixError;

/// One protocol operation: method, absolute URL, optional JSON body, extra
/// headers, and whether it needs a bearer token.
///
/// Commands are values. [`Command::with_bearer`] returns an authorized copy
/// and leaves the original untouched, so a command can be re-authorized and
/// replayed after a token refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    method: Method,
    url: Url,
    body: Option<Value>,
    headers: BTreeMap<String, String>,
    requires_auth: bool,
}

impl Command {
    /// Build a command against `base`, appending each path segment
    /// percent-encoded. Authorization is required by default.
    pub fn new<I, S>(method: Method, base: &Url, segments: I) -> Result<Self, MatrixError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| MatrixError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);

        Ok(Self {
            method,
            url,
            body: None,
            headers: BTreeMap::new(),
            requires_auth: true,
        })
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.url.query_pairs_mut().append_pair(key, value);
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Mark the command as not needing an access token.
    pub fn public(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    /// Authorized copy carrying `Authorization: Bearer <token>`.
    pub fn with_bearer(&self, token: &str) -> Self {
        self.clone().header("authorization", format!("Bearer {token}"))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    /// The bearer token this command carries, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get("authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

// ── Endpoint builders ─────────────────────────────────────────────────────────

fn client_v3<'a>(rest: &[&'a str]) -> Vec<&'a str> {
    let mut segments = vec!["_matrix", "client", "v3"];
    segments.extend_from_slice(rest);
    segments
}

/// `GET /_matrix/client/versions`. Unauthenticated.
pub fn versions(base: &Url) -> Result<Command, MatrixError> {
    Ok(Command::new(Method::GET, base, ["_matrix", "client", "versions"])?.public())
}

/// `POST /_matrix/client/v3/refresh`. Unauthenticated; the refresh token is
/// the credential.
pub fn refresh(base: &Url, refresh_token: &str) -> Result<Command, MatrixError> {
    Ok(Command::new(Method::POST, base, client_v3(&["refresh"]))?
        .json(json!({ "refresh_token": refresh_token }))
        .public())
}

/// `GET /_matrix/client/v3/account/whoami`.
pub fn whoami(base: &Url) -> Result<Command, MatrixError> {
    Command::new(Method::GET, base, client_v3(&["account", "whoami"]))
}

/// Options for `POST /_matrix/client/v3/createRoom`.
#[derive(Debug, Clone, Default)]
pub struct CreateRoomParams {
    pub name: String,
    pub topic: Option<String>,
    pub invite: Vec<String>,
    pub creation_content: Option<Value>,
}

impl CreateRoomParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// A space: a room of type `m.space` that does not federate.
    pub fn space(name: impl Into<String>) -> Self {
        Self {
            creation_content: Some(json!({ "m.federate": false, "type": "m.space" })),
            ..Self::new(name)
        }
    }
}

pub fn create_room(base: &Url, params: &CreateRoomParams) -> Result<Command, MatrixError> {
    let mut body = json!({
        "name": params.name,
        "visibility": "private",
        "preset": "private_chat",
        "initial_state": [],
    });
    if let Some(topic) = &params.topic {
        body["topic"] = json!(topic);
    }
    if !params.invite.is_empty() {
        body["invite"] = json!(params.invite);
    }
    if let Some(content) = &params.creation_content {
        body["creation_content"] = content.clone();
    }
    Ok(Command::new(Method::POST, base, client_v3(&["createRoom"]))?.json(body))
}

/// `GET /_matrix/client/v1/rooms/{roomId}/hierarchy`, limited to the room itself.
pub fn get_room_info(base: &Url, room_id: &str) -> Result<Command, MatrixError> {
    Ok(Command::new(
        Method::GET,
        base,
        ["_matrix", "client", "v1", "rooms", room_id, "hierarchy"],
    )?
    .query("max_depth", "0")
    .query("limit", "1"))
}

pub fn get_room_members(base: &Url, room_id: &str) -> Result<Command, MatrixError> {
    Command::new(Method::GET, base, client_v3(&["rooms", room_id, "joined_members"]))
}

pub fn update_room_topic(base: &Url, room_id: &str, topic: &str) -> Result<Command, MatrixError> {
    Ok(Command::new(
        Method::PUT,
        base,
        client_v3(&["rooms", room_id, "state", "m.room.topic"]),
    )?
    .json(json!({ "topic": topic })))
}

pub fn invite_member(base: &Url, room_id: &str, user_id: &str) -> Result<Command, MatrixError> {
    Ok(Command::new(Method::POST, base, client_v3(&["rooms", room_id, "invite"]))?
        .json(json!({ "user_id": user_id })))
}

/// `POST /_matrix/media/v1/create`: reserve a content URI for a later upload.
pub fn media_create(base: &Url) -> Result<Command, MatrixError> {
    Ok(Command::new(Method::POST, base, ["_matrix", "media", "v1", "create"])?.json(json!({})))
}
