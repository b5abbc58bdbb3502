//! Project save/load against a scripted device.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use prost::Message;
use sinc::proto::{
    ErrorCode, GetCalibrationCommand, GetCalibrationResponse, GetParamResponse, KeyValue,
    ListParamDetailsCommand, ListParamDetailsResponse, MessageType, ParamDetails, ParamType,
    SetCalibrationCommand, SetParamCommand, SuccessResponse,
};
use sinc::{encode, Sinc, SincBuffer};

const COMMAND_MARKER: u32 = 0x88E7_D5C6;

fn try_read_command(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let mut header = [0u8; 10];
    stream.read_exact(&mut header).ok()?;
    assert_eq!(header[0..4], COMMAND_MARKER.to_le_bytes());
    let body_len = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize - 2;
    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body).ok()?;
    Some((header[9], body))
}

fn write_response(stream: &mut TcpStream, msg_type: MessageType, msg: &impl Message) {
    let mut buf = SincBuffer::new();
    encode::encode_response_message(&mut buf, msg_type, msg);
    stream.write_all(buf.as_slice()).unwrap();
}

fn write_success(stream: &mut TcpStream) {
    let mut buf = SincBuffer::new();
    encode::encode_success_response(&mut buf, ErrorCode::NoError, None, -1);
    stream.write_all(buf.as_slice()).unwrap();
}

fn detail(key: &str, param_type: ParamType, settable: bool, instrument: bool, value: KeyValue) -> ParamDetails {
    let mut kv = value;
    kv.key = Some(key.to_owned());
    kv.param_type = Some(param_type as i32);
    ParamDetails {
        kv: Some(kv),
        settable: Some(settable),
        instrument_level: Some(instrument),
        option_values: Vec::new(),
    }
}

fn float_kv(v: f64) -> KeyValue {
    KeyValue { float_val: Some(v), ..Default::default() }
}

fn device_details(channel_id: u32) -> ListParamDetailsResponse {
    let gain = if channel_id == 0 { 1.5 } else { 2.5 };
    let threshold = if channel_id == 0 { -0.25 } else { 0.5 };
    ListParamDetailsResponse {
        channel_id: Some(channel_id),
        success: None,
        param_details: vec![
            detail("adc.gain", ParamType::FloatType, true, false, float_kv(gain)),
            detail(
                "channel.state",
                ParamType::OptionType,
                false,
                false,
                KeyValue { option_val: Some("ready".into()), ..Default::default() },
            ),
            detail("pulse.detectionThreshold", ParamType::FloatType, true, false, float_kv(threshold)),
            detail(
                "instrument.displayName",
                ParamType::StringType,
                true,
                true,
                KeyValue { str_val: Some("bench rig".into()), ..Default::default() },
            ),
            detail(
                "instrument.firmwareVersion",
                ParamType::StringType,
                false,
                true,
                KeyValue { str_val: Some("2.3.1".into()), ..Default::default() },
            ),
            detail(
                "instrument.numChannels",
                ParamType::IntType,
                false,
                true,
                KeyValue { int_val: Some(2), ..Default::default() },
            ),
        ],
    }
}

fn channel_calibration() -> GetCalibrationResponse {
    GetCalibrationResponse {
        channel_id: Some(0),
        data: Some(vec![1, 2, 3]),
        example_x: vec![0.0, 1.0],
        example_y: vec![1.0, 2.0],
        model_x: vec![0.0],
        model_y: vec![3.0],
        final_x: vec![0.0],
        final_y: vec![4.5],
        ..Default::default()
    }
}

/// Captured device-side writes during a load.
enum Observed {
    Params(SetParamCommand),
    Calibration(SetCalibrationCommand),
}

/// Run a device impersonator until the client hangs up, answering parameter
/// and calibration traffic from the canned model above.
fn scripted_device(observations: Sender<Observed>) -> (Sinc, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let device = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        while let Some((msg_type, body)) = try_read_command(&mut stream) {
            match MessageType::from_wire(msg_type) {
                MessageType::GetParamCommand => {
                    let reply = GetParamResponse {
                        channel_id: Some(0),
                        success: None,
                        results: vec![KeyValue {
                            key: Some("instrument.numChannels".into()),
                            int_val: Some(2),
                            ..Default::default()
                        }],
                    };
                    write_response(&mut stream, MessageType::GetParamResponse, &reply);
                }
                MessageType::ListParamDetailsCommand => {
                    let cmd = ListParamDetailsCommand::decode(body.as_slice()).unwrap();
                    let channel = cmd.channel_id.unwrap_or(0);
                    write_response(
                        &mut stream,
                        MessageType::ListParamDetailsResponse,
                        &device_details(channel),
                    );
                }
                MessageType::GetCalibrationCommand => {
                    let cmd = GetCalibrationCommand::decode(body.as_slice()).unwrap();
                    if cmd.channel_id.unwrap_or(0) == 0 {
                        write_response(
                            &mut stream,
                            MessageType::GetCalibrationResponse,
                            &channel_calibration(),
                        );
                    } else {
                        // Channel 1 was never calibrated.
                        let reply = GetCalibrationResponse {
                            channel_id: Some(1),
                            success: Some(SuccessResponse {
                                error_code: Some(ErrorCode::NotFound as i32),
                                ..Default::default()
                            }),
                            ..Default::default()
                        };
                        write_response(&mut stream, MessageType::GetCalibrationResponse, &reply);
                    }
                }
                MessageType::SetParamCommand => {
                    let cmd = SetParamCommand::decode(body.as_slice()).unwrap();
                    observations.send(Observed::Params(cmd)).unwrap();
                    write_success(&mut stream);
                }
                MessageType::SetCalibrationCommand => {
                    let cmd = SetCalibrationCommand::decode(body.as_slice()).unwrap();
                    observations.send(Observed::Calibration(cmd)).unwrap();
                    write_success(&mut stream);
                }
                other => panic!("device got unexpected {other:?}"),
            }
        }
    });

    let mut conn = Sinc::new();
    conn.set_timeout(5000);
    conn.connect("127.0.0.1", port).unwrap();
    (conn, device)
}

fn find_param<'a>(params: &'a [KeyValue], key: &str, channel_id: Option<u32>) -> Option<&'a KeyValue> {
    params
        .iter()
        .find(|kv| kv.key.as_deref() == Some(key) && kv.channel_id == channel_id)
}

#[test]
fn test_project_save_layout() {
    let (observations, _rx) = mpsc::channel();
    let (mut conn, device) = scripted_device(observations);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.siprj");
    conn.project_save(&path).unwrap();
    conn.disconnect().unwrap();
    device.join().unwrap();

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

    assert_eq!(doc["_fileType"], "SiToro Project");
    assert_eq!(doc["address"], "127.0.0.1");

    let channels = doc["channels"].as_array().unwrap();
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0]["_channelId"], 0);
    assert_eq!(channels[0]["adc.gain"], 1.5);
    assert_eq!(channels[0]["pulse.detectionThreshold"], -0.25);
    assert_eq!(channels[0]["calibration.data"], BASE64.encode([1u8, 2, 3]));
    // Integral plot values are written without a decimal point.
    assert_eq!(channels[0]["calibration.exampleShape.y"], serde_json::json!([1, 2]));
    assert_eq!(channels[0]["calibration.finalShape.y"], serde_json::json!([4.5]));
    // Non-settable channel parameters stay out of the file.
    assert!(channels[0].get("channel.state").is_none());
    // Channel 1 had no calibration to save.
    assert_eq!(channels[1]["adc.gain"], 2.5);
    assert!(channels[1].get("calibration.data").is_none());

    assert_eq!(doc["instrument.firmwareVersion"], "2.3.1");
    assert_eq!(doc["instrument.numChannels"], 2);
    assert_eq!(doc["instrument.displayName"], "bench rig");
}

#[test]
fn test_project_round_trip_restores_device_state() {
    // Save from one scripted device...
    let (observations, _rx) = mpsc::channel();
    let (mut conn, device) = scripted_device(observations);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roundtrip.siprj");
    conn.project_save(&path).unwrap();
    conn.disconnect().unwrap();
    device.join().unwrap();

    // ...then load it back into another and watch what it receives.
    let (observations, rx) = mpsc::channel();
    let (mut conn, device) = scripted_device(observations);
    conn.project_load(&path).unwrap();
    conn.disconnect().unwrap();
    device.join().unwrap();

    let mut bulk_set = None;
    let mut calibrations = Vec::new();
    while let Ok(observed) = rx.try_recv() {
        match observed {
            Observed::Params(cmd) => bulk_set = Some(cmd),
            Observed::Calibration(cmd) => calibrations.push(cmd),
        }
    }

    let bulk_set = bulk_set.expect("load must set parameters");
    assert_eq!(bulk_set.setting_all_params, Some(true));
    assert_eq!(bulk_set.from_firmware_version.as_deref(), Some("2.3.1"));

    let params = &bulk_set.params;
    assert_eq!(find_param(params, "adc.gain", Some(0)).unwrap().float_val, Some(1.5));
    assert_eq!(find_param(params, "adc.gain", Some(1)).unwrap().float_val, Some(2.5));
    // The negative threshold saved from the device is clamped on the way in.
    assert_eq!(
        find_param(params, "pulse.detectionThreshold", Some(0)).unwrap().float_val,
        Some(0.0)
    );
    assert_eq!(
        find_param(params, "pulse.detectionThreshold", Some(1)).unwrap().float_val,
        Some(0.5)
    );
    assert_eq!(find_param(params, "instrument.displayName", None).unwrap().str_val.as_deref(), Some("bench rig"));
    // Read-only keys never travel back.
    assert!(find_param(params, "instrument.numChannels", None).is_none());
    assert!(find_param(params, "channel.state", Some(0)).is_none());

    // Calibration restored bit-identically for the calibrated channel only,
    // with x axes regenerated as sample indices.
    assert_eq!(calibrations.len(), 1);
    let calibration = &calibrations[0];
    assert_eq!(calibration.channel_id, Some(0));
    assert_eq!(calibration.data.as_deref(), Some(&[1u8, 2, 3][..]));
    assert_eq!(calibration.example_y, vec![1.0, 2.0]);
    assert_eq!(calibration.example_x, vec![0.0, 1.0]);
    assert_eq!(calibration.model_y, vec![3.0]);
    assert_eq!(calibration.final_y, vec![4.5]);
}

#[test]
fn test_edit_on_disk_reaches_the_device() {
    let (observations, _rx) = mpsc::channel();
    let (mut conn, device) = scripted_device(observations);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edited.siprj");
    conn.project_save(&path).unwrap();
    conn.disconnect().unwrap();
    device.join().unwrap();

    // Edit one parameter the way a user would.
    let text = std::fs::read_to_string(&path).unwrap();
    let mut doc: serde_json::Value = serde_json::from_str(&text).unwrap();
    doc["channels"][0]["adc.gain"] = serde_json::json!(9.75);
    std::fs::write(&path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();

    let (observations, rx) = mpsc::channel();
    let (mut conn, device) = scripted_device(observations);
    conn.project_load(&path).unwrap();
    conn.disconnect().unwrap();
    device.join().unwrap();

    let mut bulk_set = None;
    while let Ok(observed) = rx.try_recv() {
        if let Observed::Params(cmd) = observed {
            bulk_set = Some(cmd);
        }
    }
    let params = bulk_set.expect("load must set parameters").params;
    assert_eq!(find_param(&params, "adc.gain", Some(0)).unwrap().float_val, Some(9.75));
    // The untouched channel keeps its original value.
    assert_eq!(find_param(&params, "adc.gain", Some(1)).unwrap().float_val, Some(2.5));
}
