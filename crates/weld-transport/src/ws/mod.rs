//! WebSocket protocol engine: handshake, frame codec, per-connection
//! session state.

pub mod frame;
pub mod handshake;
pub mod session;

pub use frame::{Frame, MAX_FRAME_PAYLOAD, OpCode, decode_next, encode, encode_close};
pub use handshake::{Handshake, accept_key, negotiate};
pub use session::{SessionEvent, WsSession};
