//! # Weld Transport
//!
//! The wire layer of the Weld socket framework. Everything here is pure
//! protocol work over byte buffers; no sockets, no tasks:
//!
//! - [`sniff`]: classify a connection's first bytes as HTTP or WebSocket
//! - [`ws`]: RFC 6455 handshake, frame codec, and session state machine
//! - [`http`]: minimal HTTP/1.1 parser, response builder, CORS
//!
//! The runtime crate owns the sockets and drives these types.

pub mod http;
pub mod sniff;
pub mod ws;

pub use http::{Body, Cors, HttpRequest, HttpResponse, Reply, request_complete};
pub use sniff::Protocol;
pub use ws::{Frame, Handshake, OpCode, SessionEvent, WsSession, accept_key};
