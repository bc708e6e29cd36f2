//! Domain error types.
//!
//! Bootstrap code (config loading, `main`) works in `anyhow::Result`; the
//! engine and venue layers return these typed errors so callers can match on
//! what went wrong.

use std::fmt;

use crate::types::InstrumentId;

/// How the engine must react to a venue error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Credentials rejected. Fatal: stop, never reconnect with the same token.
    InvalidCredential,
    /// Too many requests. Retry after a delay.
    RateLimited,
    /// Market closed for the instrument. Retry after a longer delay.
    MarketClosed,
    /// Anything else, including unrecognised codes. Retry on the next
    /// opportunity.
    Transient,
}

impl ErrorClass {
    /// Classify a venue error code. Unknown codes are transient.
    pub fn from_code(code: &str) -> Self {
        match code {
            "InvalidToken" | "AuthorizationRequired" | "InvalidAppID" => ErrorClass::InvalidCredential,
            "RateLimit" | "TooManyRequests" => ErrorClass::RateLimited,
            "MarketIsClosed" | "TradingDisabled" => ErrorClass::MarketClosed,
            _ => ErrorClass::Transient,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::InvalidCredential => write!(f, "invalid-credential"),
            ErrorClass::RateLimited => write!(f, "rate-limit"),
            ErrorClass::MarketClosed => write!(f, "market-closed"),
            ErrorClass::Transient => write!(f, "transient"),
        }
    }
}

/// An error reported by the venue in a response envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("venue error {code}: {message}")]
pub struct VenueError {
    pub code: String,
    pub message: String,
}

impl VenueError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        ErrorClass::from_code(&self.code)
    }
}

/// A message from the venue that could not be understood.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing field `{field}` in {msg_type} message")]
    MissingField {
        msg_type: String,
        field: &'static str,
    },

    #[error("Invalid value for `{field}`: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Errors raised inside the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(InstrumentId),

    #[error("Invalid trade transition for {instrument}: {from} -> {to}")]
    InvalidTransition {
        instrument: InstrumentId,
        from: &'static str,
        to: &'static str,
    },

    #[error("Not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Venue(#[from] VenueError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
