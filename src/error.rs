//! Error types shared across the PDU core.

use std::io;
use thiserror::Error;

/// Result type for PDU operations
pub type PduResult<T> = Result<T, PduError>;

/// Errors raised by the codec, the dispatcher, the transports and the
/// hardware projector.
#[derive(Error, Debug)]
pub enum PduError {
    /// Decoder-level structural failure (bad length, bad delimiter)
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// Structurally valid frame carrying an unrecognized message id
    #[error("unknown message id {0}")]
    UnknownMessage(u8),

    /// Mode state machine rejected the requested transition
    #[error("invalid state transition")]
    InvalidStateTransition,

    /// Line switching attempted outside Operate/Maintenance
    #[error("line transition forbidden in current mode")]
    LineTransitionForbidden,

    /// Logical unit id outside 0-8
    #[error("unknown logical unit {0}")]
    UnknownLogicalUnit(u8),

    /// I2C/GPIO operation failed
    #[error("hardware fault on expander 0x{expander:02X}: {reason}")]
    HardwareFault { expander: u8, reason: String },

    /// Underlying socket or serial I/O failed
    #[error("transport fault: {0}")]
    TransportFault(#[from] io::Error),

    /// Serial device could not be opened
    #[error("serial device error: {0}")]
    SerialFault(#[from] serialport::Error),
}

impl PduError {
    /// Command-level failures produce an error telemetry response and a
    /// counter increment; they never terminate an endpoint.
    pub fn is_command_failure(&self) -> bool {
        matches!(
            self,
            PduError::MalformedFrame(_)
                | PduError::UnknownMessage(_)
                | PduError::InvalidStateTransition
                | PduError::LineTransitionForbidden
                | PduError::UnknownLogicalUnit(_)
        )
    }
}
