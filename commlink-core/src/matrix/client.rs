use std::{
    collections::BTreeSet,
    sync::{Arc, OnceLock},
};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::ClientConfig,
    matrix::{
        command::{self, Command, CreateRoomParams},
        discovery::{self, MemoryVersionCache, ServerSupports, VersionCache},
        error::MatrixError,
        features::{Catalog, Feature, Requirement},
        lock::LockFactory,
        tokens::{RefreshCommandBuilder, StandardRefresh, TokenKind, TokenProvider},
        transport::{HttpTransport, Response, SendOptions, Transport},
        version::{self, ApiVersion, SupportedVersion},
    },
};

/// Versioned handle to one Matrix homeserver.
///
/// Built once per logical session via [`MatrixClient::builder`] (or
/// [`MatrixClient::instance`]), which negotiates the API version with the
/// server. The negotiated version fixes the capability set for the lifetime
/// of the client. Tokens are read through the caller's [`TokenProvider`] on
/// every call and never cached here.
pub struct MatrixClient {
    server_url: Url,
    version: SupportedVersion,
    features: BTreeSet<Feature>,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    refresh_command: Arc<dyn RefreshCommandBuilder>,
    locks: Arc<dyn LockFactory>,
    config: ClientConfig,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    /// Absent when the server keeps the old refresh token valid.
    refresh_token: Option<String>,
}

/// Discovery cache shared by every client built without an explicit one.
/// Each client applies its own `versions_cache_ttl` when reading it.
fn shared_version_cache() -> Arc<dyn VersionCache> {
    static SHARED: OnceLock<Arc<MemoryVersionCache>> = OnceLock::new();
    SHARED.get_or_init(|| Arc::new(MemoryVersionCache::new())).clone()
}

/// Configures and negotiates a [`MatrixClient`].
pub struct MatrixClientBuilder {
    server_url: String,
    tokens: Arc<dyn TokenProvider>,
    locks: Arc<dyn LockFactory>,
    refresh_command: Arc<dyn RefreshCommandBuilder>,
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Arc<dyn VersionCache>>,
    catalog: Catalog,
    config: ClientConfig,
}

impl MatrixClientBuilder {
    /// Use `builder` for refresh commands instead of [`StandardRefresh`].
    pub fn refresh_command(mut self, builder: impl RefreshCommandBuilder + 'static) -> Self {
        self.refresh_command = Arc::new(builder);
        self
    }

    /// Send through `transport` instead of a default [`HttpTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Keep discovery results in `cache` instead of the process-wide one.
    pub fn version_cache(mut self, cache: Arc<dyn VersionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Negotiate against `catalog` instead of [`Catalog::builtin`].
    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Timeouts, cache max age and lock name for the built client.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Discover what the server supports and bind to the highest common
    /// version.
    pub async fn build(self) -> Result<MatrixClient, MatrixError> {
        let server_url = Url::parse(&self.server_url)?;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::default()));
        let cache = self
            .cache
            .unwrap_or_else(shared_version_cache);

        let client_versions = self.catalog.list_supported_versions()?;
        let ServerSupports { versions, .. } = discovery::query_server_supports(
            transport.as_ref(),
            cache.as_ref(),
            &server_url,
            self.config.versions_cache_ttl,
            Some(self.config.request_timeout),
        )
        .await?;

        let version = version::negotiate(server_url.as_str(), &client_versions, &versions)?;
        let features = self.catalog.capabilities(&version.identifier)?;
        info!("using Matrix API {} against {server_url}", version.version);

        Ok(MatrixClient {
            server_url,
            version,
            features,
            transport,
            tokens: self.tokens,
            refresh_command: self.refresh_command,
            locks: self.locks,
            config: self.config,
        })
    }
}

impl MatrixClient {
    /// Start building a client for `server_url`. Refresh commands default to
    /// [`StandardRefresh`], transport to [`HttpTransport`].
    pub fn builder(
        server_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        locks: Arc<dyn LockFactory>,
    ) -> MatrixClientBuilder {
        MatrixClientBuilder {
            server_url: server_url.into(),
            tokens,
            locks,
            refresh_command: Arc::new(StandardRefresh),
            transport: None,
            cache: None,
            catalog: Catalog::builtin(),
            config: ClientConfig::default(),
        }
    }

    /// Negotiate and build a client with the default transport and the shared
    /// discovery cache.
    pub async fn instance(
        server_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        refresh_command: impl RefreshCommandBuilder + 'static,
        locks: Arc<dyn LockFactory>,
    ) -> Result<Self, MatrixError> {
        Self::builder(server_url, tokens, locks)
            .refresh_command(refresh_command)
            .build()
            .await
    }

    /// The homeserver this client is bound to.
    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    // ── Versions and features ─────────────────────────────────────────────────

    /// The negotiated API version, as `MAJOR.MINOR`.
    pub fn version(&self) -> ApiVersion {
        self.version.version
    }

    /// Catalog identifier of the negotiated version, e.g. `v1p7`.
    pub fn version_identifier(&self) -> &str {
        &self.version.identifier
    }

    /// True if the negotiated version is at least `min`.
    pub fn meets_version(&self, min: ApiVersion) -> bool {
        self.version() >= min
    }

    /// Fails with [`MatrixError::VersionTooLow`] below `min`.
    pub fn requires_version(&self, min: ApiVersion) -> Result<(), MatrixError> {
        if self.meets_version(min) {
            return Ok(());
        }
        Err(MatrixError::VersionTooLow {
            required: min,
            actual: self.version(),
        })
    }

    /// Every feature of the negotiated version, inherited ones included.
    pub fn get_supported_features(&self) -> &BTreeSet<Feature> {
        &self.features
    }

    /// True if the feature, or any feature of a group, is implemented.
    pub fn implements_feature(&self, requirement: impl Into<Requirement>) -> bool {
        requirement.into().is_met_by(&self.features)
    }

    /// Like [`MatrixClient::implements_feature`], but fails with
    /// [`MatrixError::UnsupportedFeature`] naming what is missing.
    pub fn require_feature(&self, requirement: impl Into<Requirement>) -> Result<(), MatrixError> {
        let requirement = requirement.into();
        if requirement.is_met_by(&self.features) {
            return Ok(());
        }
        Err(MatrixError::UnsupportedFeature(requirement))
    }

    /// Require every entry in order; a group entry is satisfied by any one of
    /// its features. Stops at the first unmet requirement.
    pub fn require_features<I, R>(&self, requirements: I) -> Result<(), MatrixError>
    where
        I: IntoIterator<Item = R>,
        R: Into<Requirement>,
    {
        requirements
            .into_iter()
            .try_for_each(|requirement| self.require_feature(requirement))
    }

    // ── Tokens ────────────────────────────────────────────────────────────────

    /// Current access token, read through the token provider.
    pub async fn access_token(&self) -> Option<String> {
        self.tokens.get(TokenKind::Access).await
    }

    /// Current refresh token, if the session has one.
    pub async fn refresh_token(&self) -> Option<String> {
        self.tokens.get(TokenKind::Refresh).await
    }

    /// The command that exchanges the current refresh token.
    pub async fn refresh_command(&self) -> Result<Command, MatrixError> {
        let refresh_token = self.refresh_token().await.ok_or(MatrixError::AuthExpired)?;
        self.refresh_command.build(&self.server_url, &refresh_token)
    }

    async fn supports_refresh_tokens(&self) -> bool {
        self.refresh_token().await.is_some() && self.implements_feature(Feature::RefreshTokenV3)
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    fn send_options(&self, status_errors: bool) -> SendOptions {
        SendOptions {
            status_errors,
            timeout: Some(self.config.request_timeout),
        }
    }

    /// Send `command`, authorizing it when required.
    ///
    /// Unauthenticated commands go straight to the transport. Authorized ones
    /// are sent with status errors off; a 401 triggers at most one token
    /// refresh and one replay, whose response is returned as-is.
    pub async fn execute(&self, command: &Command) -> Result<Response, MatrixError> {
        if !command.requires_auth() {
            return self.transport.send(command, self.send_options(true)).await;
        }

        let token = self.access_token().await.ok_or(MatrixError::MissingAccessToken)?;
        let response = self
            .transport
            .send(&command.with_bearer(&token), self.send_options(false))
            .await?;

        if response.status() != 401 {
            return Ok(response);
        }
        self.refresh_and_retry(command, response, &token).await
    }

    async fn refresh_and_retry(
        &self,
        command: &Command,
        response: Response,
        stale_token: &str,
    ) -> Result<Response, MatrixError> {
        if !self.supports_refresh_tokens().await {
            debug!("401 from {} and no refresh available", command.path());
            return Ok(response);
        }

        let Some(guard) = self
            .locks
            .acquire(&self.config.refresh_lock_name, self.config.lock_timeout)
            .await
        else {
            warn!("could not take the token refresh lock, returning the original 401");
            return Ok(response);
        };

        let current = self.access_token().await;
        let retry = if current.as_deref() == Some(stale_token) {
            self.refresh_tokens().await?
        } else {
            debug!("access token was refreshed while waiting for the lock");
            true
        };
        drop(guard);

        if !retry {
            return Ok(response);
        }

        let token = self.access_token().await.ok_or(MatrixError::MissingAccessToken)?;
        self.transport
            .send(&command.with_bearer(&token), self.send_options(false))
            .await
    }

    /// Exchange the refresh token for a new pair. Must run under the refresh
    /// lock. Returns whether the original command should be replayed.
    ///
    /// The refresh command is sent on the transport directly, never through
    /// `execute`, so a 401 here cannot recurse.
    async fn refresh_tokens(&self) -> Result<bool, MatrixError> {
        let refresh = self.refresh_command().await?;
        info!("refreshing Matrix access token");
        let response = self
            .transport
            .send(&refresh, self.send_options(false))
            .await?;

        match response.status() {
            200 => {
                let tokens: RefreshResponse = response.json()?;
                self.tokens.set(TokenKind::Access, tokens.access_token).await;
                if let Some(refresh_token) = tokens.refresh_token {
                    self.tokens.set(TokenKind::Refresh, refresh_token).await;
                }
                Ok(true)
            }
            401 => {
                warn!("refresh token rejected by {}", self.server_url);
                Err(MatrixError::AuthExpired)
            }
            429 => {
                warn!("token refresh rate limited by {}", self.server_url);
                Ok(false)
            }
            status => {
                warn!("unexpected HTTP {status} from token refresh");
                Ok(false)
            }
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Fails on non-2xx, for helpers that decode a success body.
    async fn execute_json(&self, command: Command) -> Result<Value, MatrixError> {
        let response = self.execute(&command).await?;
        if !response.is_success() {
            return Err(MatrixError::HttpStatus {
                status: response.status(),
                path: command.path().to_owned(),
                body: response.text(),
            });
        }
        if response.body().is_empty() {
            return Ok(Value::Null);
        }
        response.json()
    }

    /// The user id owning the current access token.
    pub async fn whoami(&self) -> Result<String, MatrixError> {
        let body = self.execute_json(command::whoami(&self.server_url)?).await?;
        body["user_id"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| MatrixError::Protocol("whoami response has no user_id".into()))
    }

    /// Create a room (or space) and return its id.
    pub async fn create_room(&self, params: &CreateRoomParams) -> Result<String, MatrixError> {
        self.require_feature(Feature::CreateRoomV3)?;
        let body = self
            .execute_json(command::create_room(&self.server_url, params)?)
            .await?;
        body["room_id"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| MatrixError::Protocol("createRoom response has no room_id".into()))
    }

    pub async fn get_room_info(&self, room_id: &str) -> Result<Value, MatrixError> {
        self.require_feature(Feature::GetRoomInfoV1)?;
        let body = self
            .execute_json(command::get_room_info(&self.server_url, room_id)?)
            .await?;
        body["rooms"]
            .get(0)
            .cloned()
            .ok_or_else(|| MatrixError::Protocol(format!("no hierarchy entry for {room_id}")))
    }

    pub async fn update_room_topic(&self, room_id: &str, topic: &str) -> Result<(), MatrixError> {
        self.require_feature(Feature::UpdateRoomTopicV3)?;
        self.execute_json(command::update_room_topic(&self.server_url, room_id, topic)?)
            .await?;
        Ok(())
    }

    pub async fn invite_member(&self, room_id: &str, user_id: &str) -> Result<(), MatrixError> {
        self.require_feature(Feature::InviteMemberV3)?;
        self.execute_json(command::invite_member(&self.server_url, room_id, user_id)?)
            .await?;
        Ok(())
    }

    /// User ids of the joined members of `room_id`.
    pub async fn get_room_members(&self, room_id: &str) -> Result<Vec<String>, MatrixError> {
        self.require_feature(Feature::GetRoomMembersV3)?;
        let body = self
            .execute_json(command::get_room_members(&self.server_url, room_id)?)
            .await?;
        let joined = body["joined"]
            .as_object()
            .ok_or_else(|| MatrixError::Protocol("joined_members response has no joined map".into()))?;
        Ok(joined.keys().cloned().collect())
    }

    /// Reserve an `mxc://` URI for a later upload. Needs API 1.7.
    pub async fn media_create(&self) -> Result<String, MatrixError> {
        self.requires_version(ApiVersion::new(1, 7))?;
        self.require_feature(Feature::MediaCreateV1)?;
        let body = self.execute_json(command::media_create(&self.server_url)?).await?;
        body["content_uri"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| MatrixError::Protocol("media create response has no content_uri".into()))
    }
}
