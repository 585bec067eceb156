use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::timeout;

use pdusim::dispatcher::Dispatcher;
use pdusim::protocol::{Command, CommandArgs, CommandStatus, MessageId, ResponseData, SpacePacket};
use pdusim::state::{PduStateManager, APID_NOMINAL};
use pdusim::transport::UdpEndpoint;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

struct Obc {
    socket: UdpSocket,
    endpoint: std::net::SocketAddr,
    sequence: u16,
}

impl Obc {
    async fn connect() -> (Self, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(PduStateManager::new()), true));
        let endpoint = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap(), dispatcher)
            .await
            .unwrap();
        let addr = endpoint.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(endpoint.run(shutdown_rx));

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (
            Self {
                socket,
                endpoint: addr,
                sequence: 0,
            },
            shutdown_tx,
            task,
        )
    }

    async fn send(&mut self, apid: u16, command: &Command) {
        self.sequence = self.sequence.wrapping_add(1);
        let packet = SpacePacket::telecommand(apid, self.sequence, command);
        self.socket
            .send_to(&packet.encode(), self.endpoint)
            .await
            .unwrap();
    }

    async fn recv(&self) -> SpacePacket {
        let mut buf = [0u8; 2048];
        let (len, _) = timeout(RECV_TIMEOUT, self.socket.recv_from(&mut buf))
            .await
            .expect("endpoint did not respond")
            .unwrap();
        SpacePacket::decode(&buf[..len]).unwrap()
    }
}

#[tokio::test]
async fn heartbeat_round_trip_over_udp() {
    let (mut obc, shutdown, task) = Obc::connect().await;

    obc.send(
        APID_NOMINAL,
        &Command {
            message_id: MessageId::ObcHeartBeat,
            logical_unit_id: 0,
            args: CommandArgs::Heartbeat { counter: 0x1234 },
        },
    )
    .await;

    let packet = obc.recv().await;
    assert!(!packet.is_telecommand);
    assert_eq!(packet.apid, APID_NOMINAL);
    let response = packet.response().unwrap();
    assert_eq!(response.status, CommandStatus::Ok);
    assert_eq!(
        response.data,
        ResponseData::HeartbeatEcho {
            counter: 0x1234,
            mode: 0
        }
    );

    let _ = shutdown.send(true);
    task.await.unwrap();
}

#[tokio::test]
async fn mode_commands_flow_over_udp() {
    let (mut obc, shutdown, task) = Obc::connect().await;

    obc.send(
        APID_NOMINAL,
        &Command {
            message_id: MessageId::PduGoLoad,
            logical_unit_id: 0,
            args: CommandArgs::None,
        },
    )
    .await;
    let response = obc.recv().await.response().unwrap();
    assert_eq!(response.status, CommandStatus::Ok);

    obc.send(
        APID_NOMINAL,
        &Command {
            message_id: MessageId::GetPduStatus,
            logical_unit_id: 0,
            args: CommandArgs::None,
        },
    )
    .await;
    let response = obc.recv().await.response().unwrap();
    match response.data {
        ResponseData::Status { mode, .. } => assert_eq!(mode, 1),
        other => panic!("expected status data, got {other:?}"),
    }

    let _ = shutdown.send(true);
    task.await.unwrap();
}

#[tokio::test]
async fn foreign_apid_gets_no_reply() {
    let (mut obc, shutdown, task) = Obc::connect().await;

    obc.send(
        0x70,
        &Command {
            message_id: MessageId::GetPduStatus,
            logical_unit_id: 0,
            args: CommandArgs::None,
        },
    )
    .await;

    let mut buf = [0u8; 256];
    let outcome = timeout(Duration::from_millis(300), obc.socket.recv_from(&mut buf)).await;
    assert!(outcome.is_err(), "foreign APIDs must be ignored silently");

    let _ = shutdown.send(true);
    task.await.unwrap();
}

#[tokio::test]
async fn malformed_payload_is_answered_and_counted() {
    let dispatcher_state = Arc::new(PduStateManager::new());
    let dispatcher = Arc::new(Dispatcher::new(dispatcher_state.clone(), true));
    let endpoint = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap(), dispatcher)
        .await
        .unwrap();
    let addr = endpoint.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(endpoint.run(shutdown_rx));

    // Heartbeat with a truncated counter: structurally valid packet,
    // malformed parameters
    let packet = SpacePacket {
        is_telecommand: true,
        apid: APID_NOMINAL,
        sequence_count: 1,
        payload: vec![MessageId::ObcHeartBeat.as_u8(), 0, 0x12],
    };
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(&packet.encode(), addr).await.unwrap();

    let mut buf = [0u8; 256];
    let (len, _) = timeout(RECV_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .expect("endpoint did not respond")
        .unwrap();
    let response = SpacePacket::decode(&buf[..len]).unwrap().response().unwrap();
    assert_eq!(response.status, CommandStatus::MalformedFrame);
    assert_eq!(response.message_id, MessageId::ObcHeartBeat.as_u8());

    let unit = dispatcher_state.unit(APID_NOMINAL).unwrap();
    let counters = PduStateManager::lock(unit).status.counters;
    assert_eq!(counters.checksum_failed, 1);

    let _ = shutdown_tx.send(true);
    task.await.unwrap();
}
