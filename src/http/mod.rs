//! HTTP surface: the tooling routes as an `axum::Router` for a host to mount.

mod errors;
mod handlers;
mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;

use crate::core::config::SHARED_SSH_SETUP_PATH;
use crate::core::errors::{Result, WstError};

pub use errors::HttpError;
pub use state::HttpState;

/// All routes, mounted below the configured base URL.
pub fn router(state: HttpState) -> Router<()> {
    let base = state.config.server.base_prefix().to_string();

    let routes = Router::new()
        .route("/tooling/ping", get(handlers::ping))
        .route("/tooling/tools", get(handlers::tools))
        .route("/tooling/tool-installers", get(handlers::tool_installers))
        .route("/tooling/token", get(handlers::token))
        .route(
            "/tooling/git/info",
            get(handlers::git_info).post(handlers::set_git_identity),
        )
        .route("/tooling/git/commit", post(handlers::git_commit))
        .route("/tooling/storage/check", get(handlers::storage_check))
        .route("/tooling/ssh/setup-script", get(handlers::ssh_setup_script))
        .route("/tooling/ssh/setup-command", get(handlers::ssh_setup_command))
        .route("/tooling/files/link", get(handlers::files_link))
        .route(SHARED_SSH_SETUP_PATH, get(handlers::shared_ssh_setup))
        .with_state(state);

    if base.is_empty() {
        routes
    } else {
        Router::new().nest(&base, routes)
    }
}

/// Serve the router on `bind` until Ctrl-C.
pub async fn serve(state: HttpState, bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|error| WstError::Runtime {
            details: format!("cannot bind {bind}: {error}"),
        })?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(|error| WstError::Runtime {
            details: format!("server failed: {error}"),
        })
}
