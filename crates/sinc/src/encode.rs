//! Encoders from typed commands to framed packet buffers.
//!
//! Each encoder appends one complete framed packet (header plus serialized
//! body) to the supplied buffer, so several commands can be batched into a
//! single send. Encoding into a growable buffer cannot fail.

use std::time::SystemTime;

use prost::Message;
use sinc_proto::{
    CalculateDcOffsetCommand, CheckParamConsistencyCommand, ClearHistogramCommand,
    DeleteSavedConfigurationCommand, DownloadCrashDumpCommand, ErrorCode, GetCalibrationCommand,
    GetParamCommand, KeyValue, ListParamDetailsCommand, MessageType, MonitorChannelsCommand,
    PingCommand, ProbeDatagramCommand, ResetSpatialSystemCommand, RestartCommand,
    SaveConfigurationCommand, SetCalibrationCommand, SetParamCommand, SetTimeCommand,
    SoftwareUpdateCommand, SoftwareUpdateFile, StartCalibrationCommand, StartFftCommand,
    StartHistogramCommand, StartListModeCommand, StartOscilloscopeCommand,
    StopDataAcquisitionCommand, SuccessResponse, SynchronizeLogCommand,
};

use crate::buffer::SincBuffer;
use crate::framing;
use crate::types::CalibrationInfo;

/// Legacy capture length sent with every oscilloscope start.
const OSCILLOSCOPE_RESERVED: u32 = 8192;
/// Legacy bin count sent with every histogram start.
const HISTOGRAM_RESERVED: u32 = 4096;

#[inline]
fn channel(channel_id: i32) -> Option<u32> {
    (channel_id >= 0).then_some(channel_id as u32)
}

fn append_command(buf: &mut SincBuffer, msg_type: MessageType, msg: &impl Message) {
    framing::encode_header(buf, msg.encoded_len(), msg_type);
    buf.append_message(msg);
}

pub fn encode_ping(buf: &mut SincBuffer, verbose: bool) {
    let cmd = PingCommand { verbose: verbose.then_some(true) };
    append_command(buf, MessageType::PingCommand, &cmd);
}

pub fn encode_get_param(buf: &mut SincBuffer, channel_id: i32, name: &str) {
    let cmd = GetParamCommand {
        channel_id: channel(channel_id),
        key: Some(name.to_owned()),
        chan_keys: Vec::new(),
    };
    append_command(buf, MessageType::GetParamCommand, &cmd);
}

/// Multi-get: one (channel, key) pair per request entry. The top-level
/// channel mirrors the first entry for older firmware.
pub fn encode_get_params(buf: &mut SincBuffer, requests: &[(i32, &str)]) {
    let chan_keys = requests
        .iter()
        .map(|&(channel_id, name)| KeyValue {
            channel_id: channel(channel_id),
            key: Some(name.to_owned()),
            ..Default::default()
        })
        .collect();
    let cmd = GetParamCommand {
        channel_id: requests.first().and_then(|&(c, _)| channel(c)),
        key: None,
        chan_keys,
    };
    append_command(buf, MessageType::GetParamCommand, &cmd);
}

fn encode_set_params_internal(
    buf: &mut SincBuffer,
    channel_id: i32,
    params: &[KeyValue],
    setting_all_params: bool,
    from_firmware_version: Option<&str>,
) {
    let cmd = SetParamCommand {
        channel_id: channel(channel_id),
        params: params.to_vec(),
        setting_all_params: setting_all_params.then_some(true),
        from_firmware_version: from_firmware_version.map(str::to_owned),
    };
    append_command(buf, MessageType::SetParamCommand, &cmd);
}

pub fn encode_set_param(buf: &mut SincBuffer, channel_id: i32, param: KeyValue) {
    encode_set_params_internal(buf, channel_id, std::slice::from_ref(&param), false, None);
}

pub fn encode_set_params(buf: &mut SincBuffer, channel_id: i32, params: &[KeyValue]) {
    encode_set_params_internal(buf, channel_id, params, false, None);
}

/// Bulk set: parameters not named here revert to firmware defaults, upgraded
/// from `from_firmware_version` where defaults have moved between releases.
pub fn encode_set_all_params(
    buf: &mut SincBuffer,
    channel_id: i32,
    params: &[KeyValue],
    from_firmware_version: &str,
) {
    encode_set_params_internal(buf, channel_id, params, true, Some(from_firmware_version));
}

pub fn encode_start_calibration(buf: &mut SincBuffer, channel_id: i32) {
    let cmd = StartCalibrationCommand { channel_id: channel(channel_id) };
    append_command(buf, MessageType::StartCalibrationCommand, &cmd);
}

pub fn encode_get_calibration(buf: &mut SincBuffer, channel_id: i32) {
    let cmd = GetCalibrationCommand { channel_id: channel(channel_id) };
    append_command(buf, MessageType::GetCalibrationCommand, &cmd);
}

pub fn encode_set_calibration(
    buf: &mut SincBuffer,
    channel_id: i32,
    calibration: &CalibrationInfo,
) {
    let cmd = SetCalibrationCommand {
        channel_id: channel(channel_id),
        data: Some(calibration.data.clone()),
        example_x: calibration.example_pulse.x.clone(),
        example_y: calibration.example_pulse.y.clone(),
        model_x: calibration.model_pulse.x.clone(),
        model_y: calibration.model_pulse.y.clone(),
        final_x: calibration.final_pulse.x.clone(),
        final_y: calibration.final_pulse.y.clone(),
    };
    append_command(buf, MessageType::SetCalibrationCommand, &cmd);
}

pub fn encode_calculate_dc_offset(buf: &mut SincBuffer, channel_id: i32) {
    let cmd = CalculateDcOffsetCommand { channel_id: channel(channel_id) };
    append_command(buf, MessageType::CalculateDcOffsetCommand, &cmd);
}

pub fn encode_start_oscilloscope(buf: &mut SincBuffer, channel_id: i32) {
    let cmd = StartOscilloscopeCommand {
        channel_id: channel(channel_id),
        reserved: Some(OSCILLOSCOPE_RESERVED),
    };
    append_command(buf, MessageType::StartOscilloscopeCommand, &cmd);
}

pub fn encode_start_histogram(buf: &mut SincBuffer, channel_id: i32) {
    let cmd = StartHistogramCommand {
        channel_id: channel(channel_id),
        reserved: Some(HISTOGRAM_RESERVED),
    };
    append_command(buf, MessageType::StartHistogramCommand, &cmd);
}

pub fn encode_start_fft(buf: &mut SincBuffer, channel_id: i32) {
    let cmd = StartFftCommand { channel_id: channel(channel_id) };
    append_command(buf, MessageType::StartFftCommand, &cmd);
}

pub fn encode_clear_histogram_data(buf: &mut SincBuffer, channel_id: i32) {
    let cmd = ClearHistogramCommand { channel_id: channel(channel_id) };
    append_command(buf, MessageType::ClearHistogramCommand, &cmd);
}

pub fn encode_start_list_mode(buf: &mut SincBuffer, channel_id: i32) {
    let cmd = StartListModeCommand { channel_id: channel(channel_id) };
    append_command(buf, MessageType::StartListModeCommand, &cmd);
}

/// Stop whatever acquisition is running. `skip` skips the optional
/// optimisation phase of calibration while keeping the calibration itself.
pub fn encode_stop(buf: &mut SincBuffer, channel_id: i32, skip: bool) {
    let cmd = StopDataAcquisitionCommand {
        channel_id: channel(channel_id),
        skip: skip.then_some(true),
    };
    append_command(buf, MessageType::StopDataAcquisitionCommand, &cmd);
}

pub fn encode_list_param_details(buf: &mut SincBuffer, channel_id: i32, match_prefix: &str) {
    let cmd = ListParamDetailsCommand {
        channel_id: channel(channel_id),
        match_prefix: Some(match_prefix.to_owned()),
    };
    append_command(buf, MessageType::ListParamDetailsCommand, &cmd);
}

pub fn encode_restart(buf: &mut SincBuffer) {
    append_command(buf, MessageType::RestartCommand, &RestartCommand::default());
}

pub fn encode_reset_spatial_system(buf: &mut SincBuffer) {
    append_command(buf, MessageType::ResetSpatialSystemCommand, &ResetSpatialSystemCommand::default());
}

pub fn encode_trigger_histogram(buf: &mut SincBuffer) {
    append_command(buf, MessageType::TriggerHistogramCommand, &sinc_proto::TriggerHistogramCommand::default());
}

pub fn encode_software_update(
    buf: &mut SincBuffer,
    app_image: Option<(&[u8], &str)>,
    fpga_image: Option<(&[u8], &str)>,
    update_files: &[SoftwareUpdateFile],
    auto_restart: bool,
) {
    let cmd = SoftwareUpdateCommand {
        app_image: app_image.map(|(image, _)| image.to_vec()),
        app_checksum: app_image.map(|(_, sum)| sum.to_owned()),
        fpga_image: fpga_image.map(|(image, _)| image.to_vec()),
        fpga_checksum: fpga_image.map(|(_, sum)| sum.to_owned()),
        update_files: update_files.to_vec(),
        auto_restart: Some(auto_restart),
    };
    append_command(buf, MessageType::SoftwareUpdateCommand, &cmd);
}

pub fn encode_save_configuration(buf: &mut SincBuffer) {
    append_command(buf, MessageType::SaveConfigurationCommand, &SaveConfigurationCommand::default());
}

pub fn encode_delete_saved_configuration(buf: &mut SincBuffer) {
    append_command(
        buf,
        MessageType::DeleteSavedConfigurationCommand,
        &DeleteSavedConfigurationCommand::default(),
    );
}

pub fn encode_monitor_channels(buf: &mut SincBuffer, channels: &[u32]) {
    let cmd = MonitorChannelsCommand { channel_id: channels.to_vec() };
    append_command(buf, MessageType::MonitorChannelsCommand, &cmd);
}

pub fn encode_probe_datagram(buf: &mut SincBuffer) {
    append_command(buf, MessageType::ProbeDatagramCommand, &ProbeDatagramCommand::default());
}

pub fn encode_check_param_consistency(buf: &mut SincBuffer, channel_id: i32) {
    let cmd = CheckParamConsistencyCommand { channel_id: channel(channel_id) };
    append_command(buf, MessageType::CheckParamConsistencyCommand, &cmd);
}

pub fn encode_download_crash_dump(buf: &mut SincBuffer) {
    append_command(buf, MessageType::DownloadCrashDumpCommand, &DownloadCrashDumpCommand::default());
}

pub fn encode_synchronize_log(buf: &mut SincBuffer, sequence_no: u64) {
    let cmd = SynchronizeLogCommand { sequence_no: Some(sequence_no) };
    append_command(buf, MessageType::SynchronizeLogCommand, &cmd);
}

/// Set the device's real-time clock, so its logs carry sensible timestamps.
pub fn encode_set_time(buf: &mut SincBuffer, time: SystemTime) {
    let since_epoch = time.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
    let cmd = SetTimeCommand {
        seconds: Some(since_epoch.as_secs()),
        microseconds: Some(u64::from(since_epoch.subsec_micros())),
    };
    append_command(buf, MessageType::SetTimeCommand, &cmd);
}

/// Encode a device→client success (or failure) response. Used when acting on
/// behalf of a device: aggregators and scripted test peers.
pub fn encode_success_response(
    buf: &mut SincBuffer,
    error_code: ErrorCode,
    message: Option<&str>,
    channel_id: i32,
) {
    let resp = SuccessResponse {
        error_code: (error_code != ErrorCode::NoError).then_some(error_code as i32),
        message: message.map(str::to_owned),
        channel_id: channel(channel_id),
    };
    encode_response_message(buf, MessageType::SuccessResponse, &resp);
}

/// Encode an arbitrary device→client protobuf message as a framed response
/// packet.
pub fn encode_response_message(buf: &mut SincBuffer, msg_type: MessageType, msg: &impl Message) {
    framing::encode_response_header(buf, msg.encoded_len(), msg_type);
    buf.append_message(msg);
}
