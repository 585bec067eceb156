//! # PDU Simulator / Emulator
//!
//! Impersonates the nominal and redundant Power Distribution Units of a
//! satellite flight avionics testbed: accepts OBC telecommands over UDP
//! (CCSDS Space Packets) and RS422 (delimiter-framed packets), maintains
//! the full dual-PDU state, returns compliant telemetry, and in emulator
//! mode drives MCP23017 expanders so modeled line states become real
//! voltages on connected loads.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use pdusim::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     pdusim::supervisor::run(Config::default()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Space Packet and RS422 frame codecs, payload schemas
//! - [`state`] - locked in-memory state of both units
//! - [`dispatcher`] - command execution and the mode state machine
//! - [`transport`] - UDP and RS422 endpoints
//! - [`projector`] - reconciliation loop onto the expander bank
//! - [`supervisor`] - startup, wiring, signal-driven shutdown

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lines;
pub mod measurements;
pub mod projector;
pub mod protocol;
pub mod state;
pub mod supervisor;
pub mod transport;

// Re-export main public types for convenience
pub use config::{Config, RunMode};
pub use dispatcher::Dispatcher;
pub use error::{PduError, PduResult};
pub use lines::LogicalUnit;
pub use protocol::{Command, CommandStatus, MessageId, Response, SpacePacket};
pub use state::{PduMode, PduStateManager};
