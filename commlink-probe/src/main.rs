// commlink-probe: negotiates with a Matrix homeserver and reports what the
// client can do there. With an access token it also runs whoami through the
// authorized path, refreshing the token if it has expired.
//
// Env vars:
//   MATRIX_SERVER         http://localhost:8448
//   MATRIX_ACCESS_TOKEN   (optional)
//   MATRIX_REFRESH_TOKEN  (optional)
//   COMMLINK_*            see commlink_core::config
//   RUST_LOG              commlink_probe=info,commlink_core=info

use std::{env, sync::Arc};

use anyhow::{Context, Result};
use commlink_core::{
    ClientConfig,
    matrix::{
        LocalLockFactory, MatrixClient, MatrixError, MemoryTokens, TokenKind, TokenProvider,
        qualified_user_id,
    },
};
use serde_json::json;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            env::var("RUST_LOG")
                .unwrap_or_else(|_| "commlink_probe=info,commlink_core=info".into()),
        )
        .init();

    let server = env::var("MATRIX_SERVER").unwrap_or_else(|_| "http://localhost:8448".into());
    let access = env::var("MATRIX_ACCESS_TOKEN").ok();
    let refresh = env::var("MATRIX_REFRESH_TOKEN").ok();

    let tokens = Arc::new(match &access {
        Some(token) => MemoryTokens::new(token.clone(), refresh.clone()),
        None => MemoryTokens::default(),
    });

    let client = MatrixClient::builder(&server, tokens.clone(), Arc::new(LocalLockFactory::new()))
        .config(ClientConfig::from_env())
        .build()
        .await
        .with_context(|| format!("negotiating with {server}"))?;

    let features: Vec<&str> = client
        .get_supported_features()
        .iter()
        .map(|f| f.as_str())
        .collect();

    let mut report = json!({
        "server": client.server_url().as_str(),
        "version": client.version().to_string(),
        "identifier": client.version_identifier(),
        "features": features,
    });

    if access.is_some() {
        match client.whoami().await {
            Ok(user_id) => {
                let homeserver_user = qualified_user_id(&user_id, client.server_url())?;
                report["user_id"] = json!(homeserver_user.as_str());
            }
            Err(MatrixError::AuthExpired) => {
                warn!("refresh token rejected; log in again");
            }
            Err(e) => return Err(e).context("whoami"),
        }

        let rotated = tokens.get(TokenKind::Access).await != access;
        if rotated {
            info!("access token was refreshed during the probe");
            report["refreshed_tokens"] = json!({
                "access_token": tokens.get(TokenKind::Access).await,
                "refresh_token": tokens.get(TokenKind::Refresh).await,
            });
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
