// Matrix protocol layer: a versioned client-server API client.
// Negotiates the API version with the homeserver, gates optional features on
// it, and executes commands with bearer auth and locked token refresh.

pub mod command;
pub mod discovery;
pub mod features;
pub mod lock;
pub mod tokens;
pub mod transport;
pub mod version;

mod client;
mod error;
mod user_id;

pub use client::{MatrixClient, MatrixClientBuilder};
pub use command::{Command, CreateRoomParams};
pub use discovery::{MemoryVersionCache, ServerSupports, VersionCache};
pub use error::MatrixError;
pub use features::{Catalog, Feature, Requirement, VersionSpec};
pub use lock::{LocalLockFactory, LockFactory, LockGuard};
pub use tokens::{MemoryTokens, RefreshCommandBuilder, StandardRefresh, TokenKind, TokenProvider};
pub use transport::{HttpTransport, Response, SendOptions, Transport};
pub use user_id::qualified_user_id;
pub use version::{ApiVersion, SupportedVersion};
