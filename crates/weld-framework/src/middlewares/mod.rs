//! Built-in middlewares.

pub mod logger;

pub use logger::{HttpLogger, WsLogger};
