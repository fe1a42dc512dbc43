//! Error types for the packet flow protocol.
//!
//! Configuration errors are detected while wiring the element graph; protocol errors are
//! raised when an element breaks the push/pull contract at run time. Both are fatal for
//! the simulated run. Lack of capacity is never an error: probes return `bool`.

use thiserror::Error;

use crate::sim::SimTime;

/// Top-level error for every fallible flow operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// A flow operation or probe reached an element that is still executing an operation
    /// further up the call stack.
    #[error("re-entrant call into busy element `{element}`")]
    Reentrant { element: String },
}

/// Wiring problems, surfaced at setup time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("capability mismatch: `{from}` cannot feed `{to}`")]
    CapabilityMismatch { from: String, to: String },

    #[error("gate `{port}` is not an {expected} gate")]
    DirectionMismatch { port: String, expected: &'static str },

    #[error("gate `{port}` is already connected")]
    AlreadyConnected { port: String },

    #[error("gate `{port}` is not connected to a {capability}")]
    NotConnected { port: String, capability: String },

    #[error("gate `{port}` is not connected to a queue")]
    NoQueue { port: String },

    #[error("unknown element #{0}")]
    UnknownElement(usize),

    #[error("element `{element}` has no gate {gate}")]
    UnknownGate { element: String, gate: usize },

    #[error("element `{element}` does not support `{operation}`")]
    Unsupported {
        element: String,
        operation: &'static str,
    },

    #[error("element `{element}` needs a non-zero datarate")]
    ZeroDatarate { element: String },
}

/// Violations of the push/pull and streaming contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// `attempted` is `None` on the pull side, where the new stream id is not known yet.
    #[error("`{port}`: stream {open} is still open, cannot start another one ({attempted:?})")]
    SessionAlreadyOpen {
        port: String,
        open: u64,
        attempted: Option<u64>,
    },

    #[error("`{port}`: atomic transfer while stream {open} is open")]
    AtomicDuringStream { port: String, open: u64 },

    #[error("`{port}`: no stream is open")]
    NoSession { port: String },

    #[error("`{port}`: stream {open} is open, got packet of stream {got}")]
    StreamMismatch { port: String, open: u64, got: u64 },

    #[error("`{element}`: another packet streaming operation is already in progress (stream {open})")]
    AnotherStreamInProgress { element: String, open: u64 },

    #[error("`{element}` is already streaming")]
    AlreadyStreaming { element: String },

    #[error("`{element}` is not streaming")]
    NotStreaming { element: String },

    #[error("`{element}` has nothing to pull")]
    NothingToPull { element: String },

    #[error("`{element}` does not accept packets at {at:?}")]
    NotAccepting { element: String, at: SimTime },

    #[error("`{port}`: streaming over a delayed link is not supported")]
    StreamingOverDelayedLink { port: String },
}

/// Result alias used across the flow protocol.
pub type FlowResult<T> = std::result::Result<T, FlowError>;
