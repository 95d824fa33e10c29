//! Per-connection WebSocket state: the read-side accumulation buffer,
//! fragment reassembly, and the per-frame policy.
//!
//! The session turns raw socket reads into a flat list of events for the
//! connection driver; it never touches the socket itself.

use bytes::BytesMut;
use tracing::trace;
use weld_core::{ProtocolError, ProtocolResult};

use super::frame::{self, OpCode};

/// What a batch of inbound bytes produced, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A complete logical message (fragments already reassembled).
    Message(Vec<u8>),
    /// A ping to be answered with a pong carrying the same payload.
    Ping(Vec<u8>),
    /// A pong; recorded and otherwise ignored.
    Pong,
    /// The peer sent a close frame; the connection is done.
    Close,
}

/// Read-side state machine for one WebSocket connection.
#[derive(Debug)]
pub struct WsSession {
    buffer: BytesMut,
    /// Accumulated payload of an open fragment sequence.
    fragment: Option<Vec<u8>>,
    max_message_size: usize,
    closed: bool,
}

impl WsSession {
    /// Creates a session enforcing the configured message size limit.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            fragment: None,
            max_message_size,
            closed: false,
        }
    }

    /// Whether a close frame has been observed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Appends freshly read bytes and drains every complete frame.
    ///
    /// Frames past a close frame are discarded. A protocol violation or a
    /// message beyond the size limit aborts the session; the connection
    /// driver drops the client.
    pub fn ingest(&mut self, data: &[u8]) -> ProtocolResult<Vec<SessionEvent>> {
        if self.closed {
            return Ok(Vec::new());
        }
        self.buffer.extend_from_slice(data);

        let mut events = Vec::new();
        while let Some(frame) = frame::decode_next(&mut self.buffer)? {
            trace!(opcode = ?frame.opcode, fin = frame.fin, len = frame.payload.len(), "frame");
            match frame.opcode {
                OpCode::Text | OpCode::Binary => {
                    if self.fragment.is_some() {
                        return Err(ProtocolError::InterleavedFragment);
                    }
                    self.check_size(frame.payload.len())?;
                    if frame.fin {
                        if !frame.payload.is_empty() {
                            events.push(SessionEvent::Message(frame.payload));
                        }
                    } else {
                        self.fragment = Some(frame.payload);
                    }
                }
                OpCode::Continuation => {
                    let Some(pending) = self.fragment.as_mut() else {
                        return Err(ProtocolError::StrayContinuation);
                    };
                    pending.extend_from_slice(&frame.payload);
                    self.check_size(self.fragment.as_ref().map_or(0, Vec::len))?;
                    if frame.fin {
                        let message = self.fragment.take().unwrap_or_default();
                        if !message.is_empty() {
                            events.push(SessionEvent::Message(message));
                        }
                    }
                }
                OpCode::Close => {
                    self.buffer.clear();
                    self.fragment = None;
                    self.closed = true;
                    events.push(SessionEvent::Close);
                    break;
                }
                OpCode::Ping => events.push(SessionEvent::Ping(frame.payload)),
                OpCode::Pong => events.push(SessionEvent::Pong),
            }
        }

        // The undecoded residual may carry a frame header on top of a
        // maximum-sized payload, but no more than that.
        if self.buffer.len() > self.max_message_size + frame::MAX_HEADER_LEN {
            return Err(ProtocolError::MessageTooLarge {
                len: self.buffer.len(),
                max: self.max_message_size,
            });
        }

        Ok(events)
    }

    fn check_size(&self, len: usize) -> ProtocolResult<()> {
        if len > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                len,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}
