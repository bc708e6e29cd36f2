//! Venue connectivity: wire protocol, session state machine, transport.
//!
//! The engine never touches a socket. It asks a [`Connector`] for a
//! [`Connection`] handle, writes requests through it, and receives
//! everything else (open, close, text frames) as [`Inbound`] events on a
//! channel. Each connection carries a generation id so events from a
//! superseded socket can be told apart.

pub mod protocol;
pub mod session;
pub mod ws;

use crate::error::EngineError;
use protocol::Request;

/// Connection generation. Strictly increasing per connector.
pub type ConnId = u64;

/// Transport events delivered to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Opened { conn: ConnId },
    Closed { conn: ConnId, reason: String },
    Message { conn: ConnId, text: String },
}

impl Inbound {
    pub fn conn(&self) -> ConnId {
        match self {
            Inbound::Opened { conn } | Inbound::Closed { conn, .. } | Inbound::Message { conn, .. } => *conn,
        }
    }
}

/// Writable half of one venue connection.
pub trait Connection: Send {
    /// Queue a request. Must not block.
    fn send(&mut self, req_id: u64, request: &Request) -> Result<(), EngineError>;

    /// Close the socket. A `Closed` event follows unless the transport is
    /// already gone.
    fn close(&mut self);
}

/// Opens connections. The outcome of the attempt arrives later as an
/// `Opened` or `Closed` event carrying `conn`.
pub trait Connector: Send {
    fn connect(&mut self, conn: ConnId) -> Result<Box<dyn Connection>, EngineError>;
}
