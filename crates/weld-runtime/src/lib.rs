//! # Weld Runtime
//!
//! Orchestration for the Weld socket framework: the TCP listener and
//! accept loop, per-connection drivers, the file-backed queue poller,
//! configuration loading, and the logging bootstrap.
//!
//! ```rust,ignore
//! use weld_framework::Router;
//! use weld_runtime::{ConfigLoader, Server, logging};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::default().load()?;
//!     logging::init(config.debug);
//!
//!     let mut router = Router::new();
//!     router.on_event("echo", |ctx| async move {
//!         ctx.gateway.send(&ctx.client, "echo.reply", ctx.data.clone()).await?;
//!         Ok(())
//!     });
//!
//!     Server::new(config, router)?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
mod connection;
pub mod health;
pub mod logging;
pub mod queue;
pub mod server;

pub use config::{ConfigLoader, load_config, validate_config};
pub use queue::{QueueRecord, QueueWriter};
pub use server::{BoundServer, Server};
