#![forbid(unsafe_code)]

//! Workspace tooling (wst): the request handlers a notebook-style workspace
//! server mounts for disk usage warnings, folder cleanup, shared links and SSH
//! client setup.
//!
//! Two subsystems carry the weight:
//! 1. **Storage check**: debounced, cached disk usage measurement with limit warnings
//! 2. **Cleanup**: policy-driven removal of large, inactive files with tombstones
//!
//! Shared links and the SSH setup endpoint are gated by deterministic
//! path-scoped tokens derived from the runtime's secret.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use workspace_tooling::prelude::*;
//! ```
//!
//! A host mounts the routes with [`http::router`]:
//!
//! ```rust,no_run
//! use workspace_tooling::core::config::Config;
//! use workspace_tooling::http::{HttpState, router};
//!
//! let config = Config::load(None).expect("config");
//! let app: axum::Router = router(HttpState::from_config(config, None));
//! ```

pub mod prelude;

pub mod core;
pub mod git;
#[cfg(feature = "http")]
pub mod http;
pub mod logger;
pub mod monitor;
pub mod platform;
pub mod scanner;
pub mod sharing;
pub mod tooling;
