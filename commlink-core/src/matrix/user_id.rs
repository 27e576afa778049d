use matrix_sdk::ruma::{OwnedUserId, UserId};
use url::Url;

use crate::matrix::error::MatrixError;

/// Fully qualified Matrix user id for `username` on `homeserver`.
///
/// Accepts either a full MXID (`@alice:server`), returned as-is after
/// validation, or a bare localpart, qualified with the homeserver URL's host
/// minus any leading `www.`.
pub fn qualified_user_id(username: &str, homeserver: &Url) -> Result<OwnedUserId, MatrixError> {
    let mxid = if username.starts_with('@') {
        username.to_owned()
    } else {
        let host = homeserver
            .host_str()
            .ok_or_else(|| MatrixError::InvalidUserId(format!("{homeserver} has no host")))?;
        let server = host.strip_prefix("www.").unwrap_or(host);
        match homeserver.port() {
            Some(port) => format!("@{username}:{server}:{port}"),
            None => format!("@{username}:{server}"),
        }
    };

    UserId::parse(&mxid).map_err(|e| MatrixError::InvalidUserId(format!("{mxid}: {e}")))
}
