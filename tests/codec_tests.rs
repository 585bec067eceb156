use pdusim::error::PduError;
use pdusim::protocol::*;
use pdusim::state::ErrorCounters;

fn line_command(message_id: MessageId, lu: u8, mask: u32) -> Command {
    Command {
        message_id,
        logical_unit_id: lu,
        args: CommandArgs::LineMask { mask },
    }
}

fn heartbeat_command(counter: u16) -> Command {
    Command {
        message_id: MessageId::ObcHeartBeat,
        logical_unit_id: 0,
        args: CommandArgs::Heartbeat { counter },
    }
}

#[test]
fn space_packet_round_trip_set_lines() {
    // Scenario: SetUnitPwLines(lu=5, mask=0x0FFF) on the nominal APID
    let command = line_command(MessageId::SetUnitPwLines, 5, 0x0FFF);
    let packet = SpacePacket::telecommand(0x65, 7, &command);

    let decoded = SpacePacket::decode(&packet.encode()).unwrap();
    assert_eq!(decoded, packet);
    assert!(decoded.is_telecommand);
    assert_eq!(decoded.apid, 0x65);
    assert_eq!(decoded.sequence_count, 7);
    assert_eq!(decoded.command().unwrap(), command);
}

#[test]
fn space_packet_header_bit_layout() {
    // The exact octets are the OBC contract
    let packet = SpacePacket::telecommand(0x65, 1, &heartbeat_command(0x1234));
    let bytes = packet.encode();
    assert_eq!(
        bytes,
        vec![0x10, 0x65, 0xC0, 0x01, 0x00, 0x03, 0x01, 0x00, 0x12, 0x34]
    );
}

#[test]
fn space_packet_telemetry_type_bit_clear() {
    let response = Response::success(
        MessageId::GetUnitLineStates,
        0,
        ResponseData::LineMask { mask: 0x5 },
    );
    let bytes = SpacePacket::telemetry(0x66, 2, &response).encode();
    // version 0, type 0 (telemetry), APID 0x66
    assert_eq!(bytes[0], 0x00);
    assert_eq!(bytes[1], 0x66);

    let decoded = SpacePacket::decode(&bytes).unwrap();
    assert!(!decoded.is_telecommand);
    assert_eq!(decoded.response().unwrap(), response);
}

#[test]
fn serial_frame_round_trip_set_lines() {
    let command = line_command(MessageId::SetUnitPwLines, 5, 0x0FFF);
    let frame = encode_command_frame(&command);

    let mut decoder = FrameDecoder::new();
    decoder.extend(&frame);
    let parsed = decoder.next_frame().unwrap().unwrap();
    assert_eq!(parsed.command().unwrap(), command);
    assert!(decoder.next_frame().is_none());
}

#[test]
fn serial_frame_byte_layout() {
    let frame = encode_command_frame(&heartbeat_command(0x1234));
    assert_eq!(&frame[..], &[0x55, 0x01, 0x00, 0x02, 0x12, 0x34, 0x55][..]);
}

#[test]
fn serial_frame_payload_may_contain_delimiter_bytes() {
    // Length-prefix parsing: 0x55 inside the mask must not end the frame
    let command = line_command(MessageId::OverwriteUnitPwLines, 3, 0x5555_5555);
    let frame = encode_command_frame(&command);

    let mut decoder = FrameDecoder::new();
    decoder.extend(&frame);
    let parsed = decoder.next_frame().unwrap().unwrap();
    assert_eq!(parsed.command().unwrap(), command);
}

#[test]
fn frame_decoder_handles_byte_at_a_time_delivery() {
    let command = line_command(MessageId::ResetUnitPwLines, 1, 0x000F_F000);
    let frame = encode_command_frame(&command);

    let mut decoder = FrameDecoder::new();
    for (i, byte) in frame.iter().enumerate() {
        decoder.extend(&[*byte]);
        if i < frame.len() - 1 {
            assert!(decoder.next_frame().is_none());
        }
    }
    let parsed = decoder.next_frame().unwrap().unwrap();
    assert_eq!(parsed.command().unwrap(), command);
}

#[test]
fn frame_decoder_skips_interframe_noise() {
    let frame = encode_command_frame(&heartbeat_command(7));
    let mut decoder = FrameDecoder::new();
    decoder.extend(&[0x00, 0xFF, 0x13]);
    decoder.extend(&frame);
    let parsed = decoder.next_frame().unwrap().unwrap();
    assert_eq!(parsed.message_id, MessageId::ObcHeartBeat.as_u8());
}

#[test]
fn frame_decoder_rejects_bad_trailer_and_recovers() {
    let mut bad = encode_command_frame(&heartbeat_command(1));
    let last = bad.len() - 1;
    bad[last] = 0xAA;

    let mut decoder = FrameDecoder::new();
    decoder.extend(&bad);
    let good = encode_command_frame(&heartbeat_command(2));
    decoder.extend(&good);

    let error = decoder.next_frame().unwrap().unwrap_err();
    assert_eq!(error.message_id, MessageId::ObcHeartBeat.as_u8());
    assert!(matches!(error.error, PduError::MalformedFrame(_)));

    // The stream resynchronizes on the next frame
    let parsed = decoder.next_frame().unwrap().unwrap();
    let command = parsed.command().unwrap();
    assert_eq!(command.args, CommandArgs::Heartbeat { counter: 2 });
}

#[test]
fn unknown_message_id_is_not_malformed() {
    // IDs 3-7 are the upload/download block this device does not serve
    let result = Command::decode(5, 0, &[]);
    assert!(matches!(result, Err(PduError::UnknownMessage(5))));
}

#[test]
fn strict_parameter_lengths() {
    assert!(matches!(
        Command::decode(MessageId::ObcHeartBeat.as_u8(), 0, &[0x12]),
        Err(PduError::MalformedFrame(_))
    ));
    assert!(matches!(
        Command::decode(MessageId::SetUnitPwLines.as_u8(), 0, &[0, 0, 5]),
        Err(PduError::MalformedFrame(_))
    ));
    assert!(matches!(
        Command::decode(MessageId::GetPduStatus.as_u8(), 0, &[1]),
        Err(PduError::MalformedFrame(_))
    ));
}

#[test]
fn space_packet_decode_rejects_structural_damage() {
    // Too short for a header
    assert!(matches!(
        SpacePacket::decode(&[0x10, 0x65, 0xC0]),
        Err(PduError::MalformedFrame(_))
    ));

    // Length field disagrees with the datagram
    let mut bytes = SpacePacket::telecommand(0x65, 0, &heartbeat_command(1)).encode();
    bytes.pop();
    assert!(matches!(
        SpacePacket::decode(&bytes),
        Err(PduError::MalformedFrame(_))
    ));

    // Non-zero version
    let mut bytes = SpacePacket::telecommand(0x65, 0, &heartbeat_command(1)).encode();
    bytes[0] |= 0b0110_0000;
    assert!(matches!(
        SpacePacket::decode(&bytes),
        Err(PduError::MalformedFrame(_))
    ));
}

#[test]
fn status_response_round_trip() {
    let response = Response::success(
        MessageId::GetPduStatus,
        0,
        ResponseData::Status {
            mode: 2,
            counters: ErrorCounters {
                command_rejected: 3,
                checksum_failed: 1,
                unknown_command: 0,
                hardware_fault: 7,
            },
            uptime_s: 86_400,
        },
    );
    let packet = SpacePacket::telemetry(0x65, 9, &response);
    let decoded = SpacePacket::decode(&packet.encode()).unwrap();
    assert_eq!(decoded.response().unwrap(), response);
}

#[test]
fn measurement_responses_round_trip() {
    let mut raw = heapless::Vec::<u16, 46>::new();
    for sample in [100u16, 2048, 4095, 0] {
        raw.push(sample).unwrap();
    }
    let response = Response::success(
        MessageId::GetRawMeasurements,
        4,
        ResponseData::RawChannels(raw),
    );
    let frame = encode_response_frame(&response);
    let mut decoder = FrameDecoder::new();
    decoder.extend(&frame);
    let parsed = decoder.next_frame().unwrap().unwrap();
    assert_eq!(parsed.response().unwrap(), response);

    let mut converted = heapless::Vec::<i32, 46>::new();
    for value in [7400i32, -50, 28_000] {
        converted.push(value).unwrap();
    }
    let response = Response::success(
        MessageId::GetConvertedMeasurements,
        0,
        ResponseData::ConvertedChannels(converted),
    );
    let packet = SpacePacket::telemetry(0x65, 3, &response);
    let decoded = SpacePacket::decode(&packet.encode()).unwrap();
    assert_eq!(decoded.response().unwrap(), response);
}

#[test]
fn failure_response_round_trip_preserves_raw_id() {
    // Unknown ids are echoed raw so the OBC can correlate the NACK
    let response = Response::failure(0x42, 3, CommandStatus::UnknownMessage);
    let packet = SpacePacket::telemetry(0x65, 1, &response);
    let decoded = SpacePacket::decode(&packet.encode()).unwrap();
    assert_eq!(decoded.response().unwrap(), response);
}
