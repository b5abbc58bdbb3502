//! Engine-level tests against a scripted loopback device.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use prost::Message;
use sinc::proto::{
    CalibrationProgressResponse, ErrorCode, GetCalibrationResponse, GetParamCommand,
    GetParamResponse, KeyValue, MessageType, ParamUpdatedResponse, PingCommand,
    StopDataAcquisitionCommand, SuccessResponse,
};
use sinc::{encode, Sinc, SincBuffer};

const COMMAND_MARKER: u32 = 0x88E7_D5C6;

/// Read one framed command off the device side of the wire.
fn read_command(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 10];
    stream.read_exact(&mut header).unwrap();
    assert_eq!(header[0..4], COMMAND_MARKER.to_le_bytes(), "bad command marker");
    assert_eq!(header[8], 3, "bad response code");
    let body_len = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize - 2;
    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body).unwrap();
    (header[9], body)
}

fn response_frame(msg_type: MessageType, msg: &impl Message) -> Vec<u8> {
    let mut buf = SincBuffer::new();
    encode::encode_response_message(&mut buf, msg_type, msg);
    buf.as_slice().to_vec()
}

fn success_frame(code: ErrorCode, message: Option<&str>) -> Vec<u8> {
    let mut buf = SincBuffer::new();
    encode::encode_success_response(&mut buf, code, message, -1);
    buf.as_slice().to_vec()
}

/// Spawn a device impersonator; returns the connected client and the script
/// thread handle.
fn scripted_device(script: impl FnOnce(TcpStream) + Send + 'static) -> (Sinc, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let device = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        script(stream);
    });

    let mut conn = Sinc::new();
    conn.set_timeout(5000);
    conn.connect("127.0.0.1", port).unwrap();
    (conn, device)
}

#[test]
fn test_ping_happy_path() {
    let (mut conn, device) = scripted_device(|mut stream| {
        let (msg_type, body) = read_command(&mut stream);
        assert_eq!(msg_type, MessageType::PingCommand.as_wire());
        let cmd = PingCommand::decode(body.as_slice()).unwrap();
        assert_eq!(cmd.verbose, None);
        stream.write_all(&success_frame(ErrorCode::NoError, None)).unwrap();
    });

    conn.ping(false).unwrap();
    assert_eq!(conn.read_error().code(), ErrorCode::NoError);
    assert_eq!(conn.write_error().code(), ErrorCode::NoError);
    device.join().unwrap();
}

#[test]
fn test_ping_device_reports_failure() {
    let (mut conn, device) = scripted_device(|mut stream| {
        let _ = read_command(&mut stream);
        stream
            .write_all(&success_frame(ErrorCode::CommandFailed, Some("busy")))
            .unwrap();
    });

    let err = conn.ping(false).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CommandFailed);
    assert_eq!(err.message(), "busy");
    assert_eq!(conn.last_error_code(), ErrorCode::CommandFailed);
    device.join().unwrap();
}

#[test]
fn test_async_error_interleaved_with_reply() {
    // Between the get_param command and its reply the device interjects an
    // asynchronous error. The call must still succeed; the error stays
    // readable until the next command begins.
    let (mut conn, device) = scripted_device(|mut stream| {
        let (msg_type, body) = read_command(&mut stream);
        assert_eq!(msg_type, MessageType::GetParamCommand.as_wire());
        let cmd = GetParamCommand::decode(body.as_slice()).unwrap();
        assert_eq!(cmd.key.as_deref(), Some("foo"));

        let async_err = sinc::proto::AsynchronousErrorResponse {
            success: Some(SuccessResponse {
                error_code: Some(ErrorCode::CommandFailed as i32),
                message: Some("x".into()),
                channel_id: None,
            }),
        };
        stream
            .write_all(&response_frame(MessageType::AsynchronousErrorResponse, &async_err))
            .unwrap();

        let reply = GetParamResponse {
            channel_id: Some(0),
            success: None,
            results: vec![KeyValue {
                key: Some("foo".into()),
                str_val: Some("bar".into()),
                ..Default::default()
            }],
        };
        stream.write_all(&response_frame(MessageType::GetParamResponse, &reply)).unwrap();

        // The next command clears the stale error before starting.
        let _ = read_command(&mut stream);
        stream.write_all(&success_frame(ErrorCode::NoError, None)).unwrap();
    });

    let (resp, from_channel) = conn.get_param(0, "foo").unwrap();
    assert_eq!(from_channel, 0);
    assert_eq!(resp.results[0].str_val.as_deref(), Some("bar"));

    assert_eq!(conn.last_error_code(), ErrorCode::CommandFailed);
    assert_eq!(conn.last_error().message(), "x");

    conn.ping(false).unwrap();
    assert_eq!(conn.read_error().code(), ErrorCode::NoError);
    device.join().unwrap();
}

#[test]
fn test_calibrate_runs_progress_then_fetch() {
    let (mut conn, device) = scripted_device(|mut stream| {
        let (msg_type, _) = read_command(&mut stream);
        assert_eq!(msg_type, MessageType::StartCalibrationCommand.as_wire());
        stream.write_all(&success_frame(ErrorCode::NoError, None)).unwrap();

        for (progress, complete) in [(0.1, false), (0.5, false), (1.0, true)] {
            let update = CalibrationProgressResponse {
                channel_id: Some(0),
                success: None,
                progress: Some(progress),
                complete: Some(complete),
                stage: Some("pulse fitting".into()),
            };
            stream
                .write_all(&response_frame(MessageType::CalibrationProgressResponse, &update))
                .unwrap();
        }

        let (msg_type, _) = read_command(&mut stream);
        assert_eq!(msg_type, MessageType::GetCalibrationCommand.as_wire());
        let result = GetCalibrationResponse {
            channel_id: Some(0),
            data: Some(vec![0xCA, 0x1B]),
            example_x: vec![0.0, 1.0, 2.0],
            example_y: vec![0.1, 0.9, 0.2],
            model_x: vec![0.0, 1.0, 2.0],
            model_y: vec![0.1, 1.0, 0.1],
            final_x: vec![0.0, 1.0, 2.0],
            final_y: vec![0.0, 1.0, 0.0],
            ..Default::default()
        };
        stream
            .write_all(&response_frame(MessageType::GetCalibrationResponse, &result))
            .unwrap();
    });

    let calibration = conn.calibrate(0).unwrap();
    assert_eq!(calibration.example_pulse.len(), 3);
    assert_eq!(calibration.example_pulse.len(), calibration.model_pulse.len());
    assert_eq!(calibration.model_pulse.len(), calibration.final_pulse.len());
    device.join().unwrap();
}

#[test]
fn test_stop_waits_for_ready_and_stays_in_sync() {
    // The readiness arrives as a ParamUpdatedResponse; the engine must still
    // drain the outstanding GetParamResponse or the next exchange would read
    // a stale reply.
    let (mut conn, device) = scripted_device(|mut stream| {
        let (msg_type, _) = read_command(&mut stream);
        assert_eq!(msg_type, MessageType::StopDataAcquisitionCommand.as_wire());
        stream.write_all(&success_frame(ErrorCode::NoError, None)).unwrap();

        let (msg_type, body) = read_command(&mut stream);
        assert_eq!(msg_type, MessageType::GetParamCommand.as_wire());
        let cmd = GetParamCommand::decode(body.as_slice()).unwrap();
        assert_eq!(cmd.key.as_deref(), Some("channel.state"));

        let ready_kv = KeyValue {
            channel_id: Some(0),
            key: Some("channel.state".into()),
            option_val: Some("ready".into()),
            ..Default::default()
        };
        let update = ParamUpdatedResponse { channel_id: Some(0), params: vec![ready_kv.clone()] };
        stream
            .write_all(&response_frame(MessageType::ParamUpdatedResponse, &update))
            .unwrap();
        let reply = GetParamResponse {
            channel_id: Some(0),
            success: None,
            results: vec![ready_kv],
        };
        stream.write_all(&response_frame(MessageType::GetParamResponse, &reply)).unwrap();

        // Prove the stream is still in step: a ping answers cleanly.
        let (msg_type, _) = read_command(&mut stream);
        assert_eq!(msg_type, MessageType::PingCommand.as_wire());
        stream.write_all(&success_frame(ErrorCode::NoError, None)).unwrap();
    });

    conn.stop(0, 5000, false).unwrap();
    conn.ping(false).unwrap();
    device.join().unwrap();
}

#[test]
fn test_stop_skip_flag_reaches_the_wire() {
    let (mut conn, device) = scripted_device(|mut stream| {
        let (_, body) = read_command(&mut stream);
        let cmd = StopDataAcquisitionCommand::decode(body.as_slice()).unwrap();
        assert_eq!(cmd.skip, Some(true));
        stream.write_all(&success_frame(ErrorCode::NoError, None)).unwrap();

        // wait_ready: answer the channel.state get directly.
        let (_, _) = read_command(&mut stream);
        let reply = GetParamResponse {
            channel_id: Some(2),
            success: None,
            results: vec![KeyValue {
                channel_id: Some(2),
                key: Some("channel.state".into()),
                option_val: Some("ready".into()),
                ..Default::default()
            }],
        };
        stream.write_all(&response_frame(MessageType::GetParamResponse, &reply)).unwrap();
    });

    conn.stop(2, 5000, true).unwrap();
    device.join().unwrap();
}

#[test]
fn test_stream_noise_then_packet() {
    // Ten bytes of noise, then a valid framed packet: the noise is dropped
    // and the packet delivered intact.
    let (mut conn, device) = scripted_device(|mut stream| {
        let mut wire = vec![0u8; 10];
        wire.extend(0x87D6_C4B5u32.to_le_bytes()); // response marker
        wire.extend(3u32.to_le_bytes()); // body + trailer bytes
        wire.push(3); // protobuf response code
        wire.push(0x0A); // message type
        wire.push(0x7F); // one body byte
        stream.write_all(&wire).unwrap();
    });

    let (msg_type, packet) = conn.read_message(5000).unwrap();
    assert_eq!(msg_type.as_wire(), 0x0A);
    assert_eq!(packet.as_slice(), &[0x7F]);
    device.join().unwrap();
}

#[test]
fn test_foreign_response_codes_are_counted() {
    let (mut conn, device) = scripted_device(|mut stream| {
        // A well-formed packet with response code 51 (raw histogram data
        // from a newer firmware), then an ordinary success.
        let mut wire = Vec::new();
        wire.extend(0x87D6_C4B5u32.to_le_bytes());
        wire.extend(6u32.to_le_bytes());
        wire.push(51);
        wire.push(0);
        wire.extend([1, 2, 3, 4]);
        wire.extend(success_frame(ErrorCode::NoError, None));
        stream.write_all(&wire).unwrap();
    });

    let (msg_type, _) = conn.read_message(5000).unwrap();
    assert_eq!(msg_type, MessageType::SuccessResponse);
    assert_eq!(conn.skipped_packet_count(), 1);
    device.join().unwrap();
}

#[test]
fn test_wait_for_type_skips_unrelated_messages() {
    let (mut conn, device) = scripted_device(|mut stream| {
        let update = ParamUpdatedResponse {
            channel_id: Some(1),
            params: vec![KeyValue {
                key: Some("adc.gain".into()),
                float_val: Some(2.0),
                ..Default::default()
            }],
        };
        stream
            .write_all(&response_frame(MessageType::ParamUpdatedResponse, &update))
            .unwrap();
        stream.write_all(&success_frame(ErrorCode::NoError, None)).unwrap();
    });

    // The unsolicited param update must not satisfy (or wedge) the wait.
    conn.wait_for_type(5000, MessageType::SuccessResponse).unwrap();
    device.join().unwrap();
}

#[test]
fn test_set_param_is_idempotent() {
    let (mut conn, device) = scripted_device(|mut stream| {
        for _ in 0..2 {
            let (msg_type, _) = read_command(&mut stream);
            assert_eq!(msg_type, MessageType::SetParamCommand.as_wire());
            stream.write_all(&success_frame(ErrorCode::NoError, None)).unwrap();
        }
    });

    let kv = sinc::make_key_value(0, "adc.gain", sinc::ParamValue::Float(1.5));
    conn.set_param(0, kv.clone()).unwrap();
    // Setting the value the device already holds succeeds the same way.
    conn.set_param(0, kv).unwrap();
    device.join().unwrap();
}
