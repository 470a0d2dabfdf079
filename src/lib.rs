//! Torii Authgate Library
//!
//! Reverse-proxy authentication/authorization gateway.
//!
//! # Features
//!
//! - **Auth Subrequests**: the proxy forwards each request to `/verify`
//!   and acts on the 200/401/403 it gets back
//! - **Chained Strategies**: bearer-token introspection, OIDC session
//!   flow, and signed account cookies, in configured order
//! - **Pluggable Decisions**: SAML attribute queries or an OPA-style
//!   policy engine
//! - **Cookie Sessions**: identities ride in a signed session cookie,
//!   so strategies never re-run for a live session
//!
//! # Example
//!
//! ```no_run
//! use torii_authgate::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = Server::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod authz;
pub mod config;
pub mod gateway;
pub mod metrics;
pub mod resource;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use config::Config;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
