//! Datagram endpoint.
//!
//! Datagram boundaries equal packet boundaries: every received datagram is
//! decoded as exactly one Space Packet and the response datagram goes back
//! to the sender's address. The endpoint is stateless apart from its
//! telemetry sequence counter.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{PduError, PduResult};
use crate::protocol::{Response, SpacePacket, MAX_DATAGRAM_SIZE};

pub struct UdpEndpoint {
    socket: UdpSocket,
    dispatcher: Arc<Dispatcher>,
    sequence_count: u16,
}

impl UdpEndpoint {
    /// Bind the command socket. A refused bind is a startup failure and
    /// propagates to the supervisor.
    pub async fn bind(addr: SocketAddr, dispatcher: Arc<Dispatcher>) -> PduResult<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(addr = %socket.local_addr()?, "UDP endpoint listening");
        Ok(Self {
            socket,
            dispatcher,
            sequence_count: 0,
        })
    }

    pub fn local_addr(&self) -> PduResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive loop. Commands are processed in arrival order; responses
    /// are emitted in that order. Exits when shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("UDP endpoint shutting down");
                    return;
                }
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => self.handle_datagram(&buf[..len], peer).await,
                        Err(e) => {
                            // Transient receive faults never abort the endpoint
                            warn!(error = %e, "datagram receive failed");
                        }
                    }
                }
            }
        }
    }

    async fn handle_datagram(&mut self, datagram: &[u8], peer: SocketAddr) {
        let packet = match SpacePacket::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, len = datagram.len(), "malformed datagram");
                self.answer_malformed(datagram, peer).await;
                return;
            }
        };
        if !packet.is_telecommand {
            debug!(apid = packet.apid, "ignoring non-telecommand packet");
            return;
        }

        let message_id = packet.message_id().unwrap_or(0);
        let logical_unit_id = packet.logical_unit_id().unwrap_or(0);
        let response = match packet.command() {
            Ok(command) => self.dispatcher.dispatch(packet.apid, command),
            Err(PduError::UnknownMessage(id)) => {
                self.dispatcher.unknown_message(packet.apid, id, logical_unit_id)
            }
            Err(_) => self
                .dispatcher
                .malformed_frame(packet.apid, message_id, logical_unit_id),
        };

        // None: the APID belongs to another device, stay silent
        let Some(response) = response else { return };
        if let Err(e) = self.send_response(packet.apid, &response, peer).await {
            warn!(error = %e, %peer, "failed to transmit response datagram");
        }
    }

    /// A datagram failed structural decode. When at least the primary
    /// header is present the packet can still be attributed to a unit and
    /// answered; anything shorter is dropped.
    async fn answer_malformed(&mut self, datagram: &[u8], peer: SocketAddr) {
        if datagram.len() < crate::protocol::SP_HEADER_LEN {
            return;
        }
        let apid = (u16::from(datagram[0] & 0x07) << 8) | u16::from(datagram[1]);
        let message_id = datagram.get(6).copied().unwrap_or(0);
        let logical_unit_id = datagram.get(7).copied().unwrap_or(0);
        let Some(response) = self
            .dispatcher
            .malformed_frame(apid, message_id, logical_unit_id)
        else {
            return;
        };
        if let Err(e) = self.send_response(apid, &response, peer).await {
            warn!(error = %e, %peer, "failed to transmit error response");
        }
    }

    async fn send_response(
        &mut self,
        apid: u16,
        response: &Response,
        peer: SocketAddr,
    ) -> PduResult<()> {
        self.sequence_count = self.sequence_count.wrapping_add(1) & 0x3FFF;
        let packet = SpacePacket::telemetry(apid, self.sequence_count, response);
        self.socket.send_to(&packet.encode(), peer).await?;
        Ok(())
    }
}
