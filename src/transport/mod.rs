//! Command/telemetry transports.
//!
//! One long-lived task per endpoint; coordination happens only through the
//! locked state store behind the dispatcher.

pub mod serial;
pub mod udp;

pub use serial::SerialEndpoint;
pub use udp::UdpEndpoint;
