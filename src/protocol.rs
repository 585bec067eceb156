//! Wire protocol of the PDU.
//!
//! Two framings share one command/response payload schema: CCSDS Space
//! Packets on the datagram transport and delimiter-framed packets on the
//! RS422 link. All multi-byte fields are big-endian; the layout is the
//! OBC interface contract and every bit of it is load-bearing.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::error::PduError;
use crate::state::ErrorCounters;

/// CCSDS primary header length
pub const SP_HEADER_LEN: usize = 6;
/// Space Packet version number (always zero)
pub const SP_VERSION: u8 = 0;
/// Unsegmented packet: sequence grouping flags both set
const SP_GROUPING_UNSEGMENTED: u8 = 0b11;
/// Datagrams above this limit are dropped as malformed
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// RS422 frame delimiter, leading and trailing
pub const FRAME_DELIMITER: u8 = 0x55;
/// The one-byte length prefix bounds serial payloads
pub const MAX_FRAME_PAYLOAD: usize = 255;
/// Delimiter + id + unit + length + payload + delimiter
pub const MAX_FRAME_LEN: usize = MAX_FRAME_PAYLOAD + 5;

const FRAME_BUFFER_CAPACITY: usize = 2 * MAX_FRAME_LEN;

/// Message identifiers, numbered per the OBC interface control document.
/// IDs 3-7 are the address upload/download block this device does not
/// implement; they decode as [`PduError::UnknownMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageId {
    ObcHeartBeat = 1,
    GetPduStatus = 2,
    PduGoLoad = 8,
    PduGoSafe = 9,
    PduGoOperate = 10,
    SetUnitPwLines = 11,
    ResetUnitPwLines = 12,
    OverwriteUnitPwLines = 13,
    GetUnitLineStates = 14,
    GetRawMeasurements = 15,
    GetConvertedMeasurements = 16,
    PduGoMaintenance = 17,
}

impl MessageId {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageId::ObcHeartBeat),
            2 => Some(MessageId::GetPduStatus),
            8 => Some(MessageId::PduGoLoad),
            9 => Some(MessageId::PduGoSafe),
            10 => Some(MessageId::PduGoOperate),
            11 => Some(MessageId::SetUnitPwLines),
            12 => Some(MessageId::ResetUnitPwLines),
            13 => Some(MessageId::OverwriteUnitPwLines),
            14 => Some(MessageId::GetUnitLineStates),
            15 => Some(MessageId::GetRawMeasurements),
            16 => Some(MessageId::GetConvertedMeasurements),
            17 => Some(MessageId::PduGoMaintenance),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Status byte of every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandStatus {
    Ok = 0,
    InvalidStateTransition = 1,
    LineTransitionForbidden = 2,
    UnknownLogicalUnit = 3,
    UnknownMessage = 4,
    MalformedFrame = 5,
}

impl CommandStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CommandStatus::Ok),
            1 => Some(CommandStatus::InvalidStateTransition),
            2 => Some(CommandStatus::LineTransitionForbidden),
            3 => Some(CommandStatus::UnknownLogicalUnit),
            4 => Some(CommandStatus::UnknownMessage),
            5 => Some(CommandStatus::MalformedFrame),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Command-specific parameters following the two header octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandArgs {
    None,
    Heartbeat { counter: u16 },
    LineMask { mask: u32 },
}

/// One decoded telecommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub message_id: MessageId,
    pub logical_unit_id: u8,
    pub args: CommandArgs,
}

impl Command {
    /// Decode from the two header octets and the parameter bytes.
    /// Parameter lengths are strict; a mismatch is a malformed frame.
    pub fn decode(message_id: u8, logical_unit_id: u8, params: &[u8]) -> Result<Self, PduError> {
        let message_id =
            MessageId::from_u8(message_id).ok_or(PduError::UnknownMessage(message_id))?;
        let args = match message_id {
            MessageId::ObcHeartBeat => {
                if params.len() != 2 {
                    return Err(PduError::MalformedFrame("heartbeat expects 2 parameter bytes"));
                }
                CommandArgs::Heartbeat {
                    counter: u16::from_be_bytes([params[0], params[1]]),
                }
            }
            MessageId::SetUnitPwLines
            | MessageId::ResetUnitPwLines
            | MessageId::OverwriteUnitPwLines => {
                if params.len() != 4 {
                    return Err(PduError::MalformedFrame("line command expects 4 parameter bytes"));
                }
                CommandArgs::LineMask {
                    mask: u32::from_be_bytes([params[0], params[1], params[2], params[3]]),
                }
            }
            _ => {
                if !params.is_empty() {
                    return Err(PduError::MalformedFrame("unexpected parameter bytes"));
                }
                CommandArgs::None
            }
        };
        Ok(Self {
            message_id,
            logical_unit_id,
            args,
        })
    }

    pub fn encode_params(&self) -> Vec<u8, MAX_FRAME_PAYLOAD> {
        let mut out = Vec::new();
        match self.args {
            CommandArgs::None => {}
            CommandArgs::Heartbeat { counter } => {
                let _ = out.extend_from_slice(&counter.to_be_bytes());
            }
            CommandArgs::LineMask { mask } => {
                let _ = out.extend_from_slice(&mask.to_be_bytes());
            }
        }
        out
    }
}

/// Response-specific data following the status byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseData {
    None,
    HeartbeatEcho {
        counter: u16,
        mode: u8,
    },
    Status {
        mode: u8,
        counters: ErrorCounters,
        uptime_s: u32,
    },
    LineMask {
        mask: u32,
    },
    RawChannels(Vec<u16, 46>),
    ConvertedChannels(Vec<i32, 46>),
}

/// One telemetry response. The message and logical unit identifiers echo
/// the request verbatim, including identifiers this device does not
/// recognize (the id is then carried raw).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub message_id: u8,
    pub logical_unit_id: u8,
    pub status: CommandStatus,
    pub data: ResponseData,
}

impl Response {
    pub fn success(message_id: MessageId, logical_unit_id: u8, data: ResponseData) -> Self {
        Self {
            message_id: message_id.as_u8(),
            logical_unit_id,
            status: CommandStatus::Ok,
            data,
        }
    }

    pub fn failure(message_id: u8, logical_unit_id: u8, status: CommandStatus) -> Self {
        Self {
            message_id,
            logical_unit_id,
            status,
            data: ResponseData::None,
        }
    }

    /// Status byte plus response data.
    pub fn encode_params(&self) -> Vec<u8, MAX_FRAME_PAYLOAD> {
        let mut out = Vec::new();
        let _ = out.push(self.status.as_u8());
        match &self.data {
            ResponseData::None => {}
            ResponseData::HeartbeatEcho { counter, mode } => {
                let _ = out.extend_from_slice(&counter.to_be_bytes());
                let _ = out.push(*mode);
            }
            ResponseData::Status {
                mode,
                counters,
                uptime_s,
            } => {
                let _ = out.push(*mode);
                let _ = out.extend_from_slice(&counters.command_rejected.to_be_bytes());
                let _ = out.extend_from_slice(&counters.checksum_failed.to_be_bytes());
                let _ = out.extend_from_slice(&counters.unknown_command.to_be_bytes());
                let _ = out.extend_from_slice(&counters.hardware_fault.to_be_bytes());
                let _ = out.extend_from_slice(&uptime_s.to_be_bytes());
            }
            ResponseData::LineMask { mask } => {
                let _ = out.extend_from_slice(&mask.to_be_bytes());
            }
            ResponseData::RawChannels(channels) => {
                let _ = out.push(channels.len() as u8);
                for sample in channels {
                    let _ = out.extend_from_slice(&sample.to_be_bytes());
                }
            }
            ResponseData::ConvertedChannels(channels) => {
                let _ = out.push(channels.len() as u8);
                for value in channels {
                    let _ = out.extend_from_slice(&value.to_be_bytes());
                }
            }
        }
        out
    }

    /// Decode from the two header octets and the status + data bytes.
    pub fn decode(message_id: u8, logical_unit_id: u8, params: &[u8]) -> Result<Self, PduError> {
        let status_byte = *params
            .first()
            .ok_or(PduError::MalformedFrame("response missing status byte"))?;
        let status = CommandStatus::from_u8(status_byte)
            .ok_or(PduError::MalformedFrame("unknown status byte"))?;
        let body = &params[1..];

        if status != CommandStatus::Ok {
            if !body.is_empty() {
                return Err(PduError::MalformedFrame("error response carries data"));
            }
            return Ok(Self {
                message_id,
                logical_unit_id,
                status,
                data: ResponseData::None,
            });
        }

        let data = match MessageId::from_u8(message_id) {
            Some(MessageId::ObcHeartBeat) => {
                if body.len() != 3 {
                    return Err(PduError::MalformedFrame("heartbeat echo expects 3 bytes"));
                }
                ResponseData::HeartbeatEcho {
                    counter: u16::from_be_bytes([body[0], body[1]]),
                    mode: body[2],
                }
            }
            Some(MessageId::GetPduStatus) => {
                if body.len() != 13 {
                    return Err(PduError::MalformedFrame("status response expects 13 bytes"));
                }
                ResponseData::Status {
                    mode: body[0],
                    counters: ErrorCounters {
                        command_rejected: u16::from_be_bytes([body[1], body[2]]),
                        checksum_failed: u16::from_be_bytes([body[3], body[4]]),
                        unknown_command: u16::from_be_bytes([body[5], body[6]]),
                        hardware_fault: u16::from_be_bytes([body[7], body[8]]),
                    },
                    uptime_s: u32::from_be_bytes([body[9], body[10], body[11], body[12]]),
                }
            }
            Some(MessageId::GetUnitLineStates) => {
                if body.len() != 4 {
                    return Err(PduError::MalformedFrame("line mask response expects 4 bytes"));
                }
                ResponseData::LineMask {
                    mask: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
                }
            }
            Some(MessageId::GetRawMeasurements) => {
                let count = *body
                    .first()
                    .ok_or(PduError::MalformedFrame("missing channel count"))?
                    as usize;
                if count > 46 || body.len() != 1 + 2 * count {
                    return Err(PduError::MalformedFrame("raw channel length mismatch"));
                }
                let mut channels = Vec::new();
                for chunk in body[1..].chunks_exact(2) {
                    let _ = channels.push(u16::from_be_bytes([chunk[0], chunk[1]]));
                }
                ResponseData::RawChannels(channels)
            }
            Some(MessageId::GetConvertedMeasurements) => {
                let count = *body
                    .first()
                    .ok_or(PduError::MalformedFrame("missing channel count"))?
                    as usize;
                if count > 46 || body.len() != 1 + 4 * count {
                    return Err(PduError::MalformedFrame("converted channel length mismatch"));
                }
                let mut channels = Vec::new();
                for chunk in body[1..].chunks_exact(4) {
                    let _ =
                        channels.push(i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
                }
                ResponseData::ConvertedChannels(channels)
            }
            _ => {
                if !body.is_empty() {
                    return Err(PduError::MalformedFrame("unexpected response data"));
                }
                ResponseData::None
            }
        };

        Ok(Self {
            message_id,
            logical_unit_id,
            status,
            data,
        })
    }
}

/// One CCSDS Space Packet: 6-octet primary header plus payload. The
/// payload's first two octets are the MessageID and LogicalUnitID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacePacket {
    pub is_telecommand: bool,
    pub apid: u16,
    pub sequence_count: u16,
    pub payload: std::vec::Vec<u8>,
}

impl SpacePacket {
    pub fn telecommand(apid: u16, sequence_count: u16, command: &Command) -> Self {
        let mut payload = std::vec::Vec::with_capacity(2 + 4);
        payload.push(command.message_id.as_u8());
        payload.push(command.logical_unit_id);
        payload.extend_from_slice(&command.encode_params());
        Self {
            is_telecommand: true,
            apid,
            sequence_count,
            payload,
        }
    }

    pub fn telemetry(apid: u16, sequence_count: u16, response: &Response) -> Self {
        let mut payload = std::vec::Vec::with_capacity(2 + 16);
        payload.push(response.message_id);
        payload.push(response.logical_unit_id);
        payload.extend_from_slice(&response.encode_params());
        Self {
            is_telecommand: false,
            apid,
            sequence_count,
            payload,
        }
    }

    /// Serialize: version(3) type(1) sec-hdr(1) apid(11) | grouping(2)
    /// seq(14) | data length minus one, big-endian.
    pub fn encode(&self) -> std::vec::Vec<u8> {
        let mut out = std::vec::Vec::with_capacity(SP_HEADER_LEN + self.payload.len());
        let type_bit = u8::from(self.is_telecommand);
        let apid = self.apid & 0x07FF;
        let seq = self.sequence_count & 0x3FFF;
        let data_len = (self.payload.len() as u16).wrapping_sub(1);
        out.push((SP_VERSION << 5) | (type_bit << 4) | ((apid >> 8) as u8));
        out.push((apid & 0xFF) as u8);
        out.push((SP_GROUPING_UNSEGMENTED << 6) | ((seq >> 8) as u8));
        out.push((seq & 0xFF) as u8);
        out.extend_from_slice(&data_len.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, PduError> {
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(PduError::MalformedFrame("datagram exceeds size limit"));
        }
        if datagram.len() < SP_HEADER_LEN + 1 {
            return Err(PduError::MalformedFrame("datagram shorter than packet header"));
        }
        if datagram[0] >> 5 != SP_VERSION {
            return Err(PduError::MalformedFrame("unsupported packet version"));
        }
        let is_telecommand = (datagram[0] >> 4) & 0x01 == 1;
        let apid = (u16::from(datagram[0] & 0x07) << 8) | u16::from(datagram[1]);
        let sequence_count = (u16::from(datagram[2] & 0x3F) << 8) | u16::from(datagram[3]);
        let declared_len = usize::from(u16::from_be_bytes([datagram[4], datagram[5]])) + 1;
        let payload = &datagram[SP_HEADER_LEN..];
        if payload.len() != declared_len {
            return Err(PduError::MalformedFrame("packet length field mismatch"));
        }
        Ok(Self {
            is_telecommand,
            apid,
            sequence_count,
            payload: payload.to_vec(),
        })
    }

    /// The MessageID octet, when present.
    pub fn message_id(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// The LogicalUnitID octet, when present.
    pub fn logical_unit_id(&self) -> Option<u8> {
        self.payload.get(1).copied()
    }

    pub fn command(&self) -> Result<Command, PduError> {
        if self.payload.len() < 2 {
            return Err(PduError::MalformedFrame("payload shorter than packet ids"));
        }
        Command::decode(self.payload[0], self.payload[1], &self.payload[2..])
    }

    pub fn response(&self) -> Result<Response, PduError> {
        if self.payload.len() < 2 {
            return Err(PduError::MalformedFrame("payload shorter than packet ids"));
        }
        Response::decode(self.payload[0], self.payload[1], &self.payload[2..])
    }
}

/// One decoded RS422 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialFrame {
    pub message_id: u8,
    pub logical_unit_id: u8,
    pub params: Vec<u8, MAX_FRAME_PAYLOAD>,
}

impl SerialFrame {
    pub fn command(&self) -> Result<Command, PduError> {
        Command::decode(self.message_id, self.logical_unit_id, &self.params)
    }

    pub fn response(&self) -> Result<Response, PduError> {
        Response::decode(self.message_id, self.logical_unit_id, &self.params)
    }
}

/// Frame-level decode failure; the header ids are carried so the error
/// telemetry can still echo them.
#[derive(Debug)]
pub struct FrameError {
    pub message_id: u8,
    pub logical_unit_id: u8,
    pub error: PduError,
}

fn encode_frame(message_id: u8, logical_unit_id: u8, params: &[u8]) -> Vec<u8, MAX_FRAME_LEN> {
    let mut out = Vec::new();
    let _ = out.push(FRAME_DELIMITER);
    let _ = out.push(message_id);
    let _ = out.push(logical_unit_id);
    let _ = out.push(params.len() as u8);
    let _ = out.extend_from_slice(params);
    let _ = out.push(FRAME_DELIMITER);
    out
}

pub fn encode_command_frame(command: &Command) -> Vec<u8, MAX_FRAME_LEN> {
    encode_frame(
        command.message_id.as_u8(),
        command.logical_unit_id,
        &command.encode_params(),
    )
}

pub fn encode_response_frame(response: &Response) -> Vec<u8, MAX_FRAME_LEN> {
    encode_frame(
        response.message_id,
        response.logical_unit_id,
        &response.encode_params(),
    )
}

/// Incremental RS422 frame extractor.
///
/// The length prefix is authoritative: the frame spans exactly
/// `4 + PayloadLen + 1` bytes from the leading delimiter, and the byte
/// after the payload is checked against the trailing delimiter. A bad
/// trailer discards the whole frame.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8, FRAME_BUFFER_CAPACITY>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.buf.is_full() {
                // Resync: an unframed run this long cannot contain a frame
                self.buf.clear();
            }
            let _ = self.buf.push(byte);
        }
    }

    /// Extract the next complete frame, if any.
    pub fn next_frame(&mut self) -> Option<Result<SerialFrame, FrameError>> {
        // Skip inter-frame noise up to the next delimiter
        let start = self.buf.iter().position(|&b| b == FRAME_DELIMITER)?;
        if start > 0 {
            self.consume(start);
        }
        if self.buf.len() < 4 {
            return None;
        }
        let message_id = self.buf[1];
        let logical_unit_id = self.buf[2];
        let payload_len = usize::from(self.buf[3]);
        let total = 4 + payload_len + 1;
        if self.buf.len() < total {
            return None;
        }

        let trailer = self.buf[total - 1];
        let mut params = Vec::new();
        let _ = params.extend_from_slice(&self.buf[4..4 + payload_len]);
        self.consume(total);

        if trailer != FRAME_DELIMITER {
            return Some(Err(FrameError {
                message_id,
                logical_unit_id,
                error: PduError::MalformedFrame("missing trailing delimiter"),
            }));
        }
        Some(Ok(SerialFrame {
            message_id,
            logical_unit_id,
            params,
        }))
    }

    fn consume(&mut self, count: usize) {
        let remaining = self.buf.len() - count;
        self.buf.copy_within(count.., 0);
        self.buf.truncate(remaining);
    }
}
