//! # Weld Core
//!
//! The data model of the Weld socket framework: connected clients, the
//! application event format, namespace/room membership, the gateway
//! handle, configuration, and the shared error taxonomy.
//!
//! Higher layers build on these types:
//!
//! ```text
//! ┌────────────┐     ┌───────────────┐     ┌──────────────┐
//! │ transport  │────▶│   framework   │────▶│   runtime    │
//! │ (wire)     │     │ (router + mw) │     │ (listener)   │
//! └────────────┘     └───────────────┘     └──────────────┘
//!        └───────────────────┴────────────────────┘
//!                         weld-core
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod registry;

pub use client::{
    ClientDirectory, ClientId, ClientKind, ConnectionHandle, Outbound, next_client_id,
};
pub use config::{CorsConfig, ServerConfig};
pub use error::{
    ProtocolError, ProtocolResult, QueueError, QueueResult, SendError, SendResult, SetupError,
    SetupResult,
};
pub use event::{
    CONNECT_EVENT, DISCONNECT_EVENT, ERROR_EVENT, EventMessage, error_event, is_valid_event_name,
    unix_timestamp,
};
pub use gateway::{Gateway, normalize_namespace};
pub use registry::{DEFAULT_NAMESPACE, Registry};
