//! Control server bootstrap
//!
//! [`ControlServer::bind`] applies the bind policy before a socket is
//! opened: a non-loopback address with no control token is refused with an
//! "Authentication required" error and nothing listens.

use std::net::SocketAddr;

use librarian_shared_config::ControlConfig;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, ApiResult};
use crate::routes::build_router;
use crate::state::AppState;

/// Refuse to expose the control plane beyond loopback without tokens
pub fn check_bind_policy(config: &ControlConfig) -> ApiResult<()> {
    if !config.is_loopback() && !config.has_tokens() {
        return Err(ApiError::AuthNotConfigured(format!(
            "refusing to bind {} without LIBRARIAN_API_TOKENS",
            config.bind_address
        )));
    }
    Ok(())
}

fn socket_address(config: &ControlConfig) -> String {
    let host = config.bind_address.trim();
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, config.port)
    } else {
        format!("{}:{}", host, config.port)
    }
}

/// Bound control server, ready to serve
pub struct ControlServer {
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
}

impl ControlServer {
    /// Check the bind policy, then bind the listener
    pub async fn bind(config: &ControlConfig, state: AppState) -> ApiResult<Self> {
        check_bind_policy(config)?;

        let address = socket_address(config);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|err| ApiError::Internal(format!("failed to bind {}: {}", address, err)))?;

        tracing::info!(
            address = %address,
            auth = ?state.auth,
            "Control server bound"
        );
        Ok(Self {
            listener,
            shutdown: state.daemon.shutdown_token(),
            state,
        })
    }

    pub fn local_addr(&self) -> ApiResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the daemon shuts down
    pub async fn serve(self) -> ApiResult<()> {
        let shutdown = self.shutdown.clone();
        let addr = self.local_addr()?;
        let app = build_router(self.state);

        tracing::info!("Listening on {}", addr);
        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        tracing::info!("Control server stopped");
        Ok(())
    }
}
