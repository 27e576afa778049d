//! Matrix communication provider core.
//!
//! A client for the Matrix client-server API that negotiates the protocol
//! version with each homeserver, gates optional features on the negotiated
//! version, and keeps bearer tokens fresh under a named lock.

pub mod config;
pub mod matrix;

pub use config::ClientConfig;
