//! Decoders from de-encapsulated packet bodies to caller value types.
//!
//! Four payload shapes exist: pure protobuf, protobuf header + raw arrays
//! (oscilloscope / histogram / list mode), the legacy fixed-layout UDP
//! histogram header, and replies carrying the nested in-band success record.
//! Decoders never panic on malformed input; they report `ReadFailed` with a
//! message locating the bad packet. Results are owned values, so a failed
//! decode hands back nothing.

use prost::Message;
use sinc_proto::{
    AsynchronousErrorResponse, CalculateDcOffsetResponse, CalibrationProgressResponse,
    CheckParamConsistencyResponse, DownloadCrashDumpResponse, ErrorCode, GetCalibrationResponse,
    GetParamResponse, HistogramDataResponse, ListModeDataResponse, ListParamDetailsResponse,
    MessageType, MonitorChannelsCommand, OscilloscopeDataResponse, ParamUpdatedResponse,
    SoftwareUpdateCompleteResponse, SuccessResponse, SynchronizeLogResponse,
};

use crate::buffer::SincBuffer;
use crate::error::{SincError, SincResult};
use crate::framing;
use crate::types::{
    CalibrationInfo, CalibrationPlot, CalibrationProgress, CrashDump, DcOffsetResult,
    HistogramCapture, HistogramStats, ListModeCapture, OscilloscopeCapture, OscilloscopePlot,
};

/// Spectrum-selection mask bits.
pub(crate) const SPECTRUM_SELECT_ACCEPTED: u32 = 0x01;
pub(crate) const SPECTRUM_SELECT_REJECTED: u32 = 0x02;

/// Bulk-message protobuf headers are small; anything bigger is corruption.
const MAX_BULK_HEADER_LEN: usize = 200;

/// Offset of the legacy datagram stats block (header_len ∥ version ∥
/// msg_type ∥ channel_id ∥ samples ∥ mask).
const DATAGRAM_STATS_OFFSET: usize = 20;

fn corrupted(what: &str) -> SincError {
    SincError::with_message(ErrorCode::ReadFailed, format!("corrupted {what} packet"))
}

/// Interpret the nested in-band success record carried by most replies.
pub fn interpret_success(success: &SuccessResponse) -> SincResult<()> {
    match success.error_code {
        None => Ok(()),
        Some(raw) => {
            let code = ErrorCode::from_protocol(raw);
            Err(match &success.message {
                Some(msg) => SincError::with_message(code, msg.clone()),
                None => SincError::new(code),
            })
        }
    }
}

fn check_success(success: Option<&SuccessResponse>) -> SincResult<()> {
    success.map_or(Ok(()), interpret_success)
}

fn offset_channel(channel_id: Option<u32>, offset: i32) -> i32 {
    channel_id.map_or(-1, |c| c as i32 + offset)
}

fn read_u32_array(bytes: &[u8]) -> Vec<u32> {
    bytes.chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect()
}

fn read_f64_array(bytes: &[u8]) -> Vec<f64> {
    bytes.chunks_exact(8).map(|c| f64::from_le_bytes(c.try_into().unwrap())).collect()
}

pub fn decode_success_response(packet: &SincBuffer) -> SincResult<(SuccessResponse, i32)> {
    let resp = SuccessResponse::decode(packet.as_slice()).map_err(|_| corrupted("success"))?;
    let from_channel = offset_channel(resp.channel_id, packet.channel_id_offset);
    interpret_success(&resp)?;
    Ok((resp, from_channel))
}

pub fn decode_get_param_response(packet: &SincBuffer) -> SincResult<(GetParamResponse, i32)> {
    let resp =
        GetParamResponse::decode(packet.as_slice()).map_err(|_| corrupted("get parameter"))?;
    let from_channel = offset_channel(resp.channel_id, packet.channel_id_offset);
    check_success(resp.success.as_ref())?;
    Ok((resp, from_channel))
}

pub fn decode_param_updated_response(
    packet: &SincBuffer,
) -> SincResult<(ParamUpdatedResponse, i32)> {
    let resp = ParamUpdatedResponse::decode(packet.as_slice())
        .map_err(|_| corrupted("parameter updated"))?;
    let from_channel = offset_channel(resp.channel_id, packet.channel_id_offset);
    Ok((resp, from_channel))
}

pub fn decode_calibration_progress_response(
    packet: &SincBuffer,
) -> SincResult<CalibrationProgress> {
    let resp = CalibrationProgressResponse::decode(packet.as_slice())
        .map_err(|_| corrupted("calibration progress"))?;
    check_success(resp.success.as_ref())?;
    Ok(CalibrationProgress {
        channel_id: offset_channel(resp.channel_id, packet.channel_id_offset),
        progress: resp.progress.unwrap_or(0.0),
        complete: resp.complete.unwrap_or(false),
        stage: resp.stage,
    })
}

/// Copy one pulse shape out of the carrier. The y axis is authoritative; a
/// mismatched x axis is regenerated as sample indices.
fn copy_pulse(x: &[f64], y: &[f64]) -> CalibrationPlot {
    if x.len() >= y.len() {
        CalibrationPlot { x: x[..y.len()].to_vec(), y: y.to_vec() }
    } else {
        CalibrationPlot::from_y(y.to_vec())
    }
}

pub fn decode_get_calibration_response(packet: &SincBuffer) -> SincResult<CalibrationInfo> {
    let resp = GetCalibrationResponse::decode(packet.as_slice())
        .map_err(|_| corrupted("calibration data"))?;
    check_success(resp.success.as_ref())?;
    Ok(CalibrationInfo {
        channel_id: offset_channel(resp.channel_id, packet.channel_id_offset),
        data: resp.data.unwrap_or_default(),
        example_pulse: copy_pulse(&resp.example_x, &resp.example_y),
        model_pulse: copy_pulse(&resp.model_x, &resp.model_y),
        final_pulse: copy_pulse(&resp.final_x, &resp.final_y),
    })
}

pub fn decode_calculate_dc_offset_response(packet: &SincBuffer) -> SincResult<DcOffsetResult> {
    let resp = CalculateDcOffsetResponse::decode(packet.as_slice())
        .map_err(|_| corrupted("calculate dc offset"))?;
    check_success(resp.success.as_ref())?;
    Ok(DcOffsetResult {
        channel_id: offset_channel(resp.channel_id, packet.channel_id_offset),
        dc_offset: resp.dc_offset.unwrap_or(0.0),
    })
}

pub fn decode_list_param_details_response(
    packet: &SincBuffer,
) -> SincResult<(ListParamDetailsResponse, i32)> {
    let resp = ListParamDetailsResponse::decode(packet.as_slice())
        .map_err(|_| corrupted("parameter details"))?;
    let from_channel = offset_channel(resp.channel_id, packet.channel_id_offset);
    check_success(resp.success.as_ref())?;
    Ok((resp, from_channel))
}

/// Decode an asynchronous error event. The `Ok` value is the device-reported
/// error, ready to install in the read slot; `Err` means the packet itself
/// was malformed.
pub fn decode_asynchronous_error(packet: &SincBuffer) -> SincResult<SincError> {
    let resp = AsynchronousErrorResponse::decode(packet.as_slice())
        .map_err(|_| corrupted("async error"))?;
    match resp.success.as_ref().map(interpret_success) {
        Some(Err(device_err)) => Ok(device_err),
        _ => Ok(SincError::new(ErrorCode::NoError)),
    }
}

pub fn decode_oscilloscope_data_response(packet: &SincBuffer) -> SincResult<OscilloscopeCapture> {
    let body = packet.as_slice();
    let (hdr_len, data_start) =
        framing::read_nested_len(body).ok_or_else(|| corrupted("oscilloscope"))?;
    if data_start + hdr_len > body.len() {
        return Err(corrupted("oscilloscope"));
    }

    let resp = OscilloscopeDataResponse::decode(&body[data_start..data_start + hdr_len])
        .map_err(|_| corrupted("oscilloscope"))?;

    if resp.plot_len.len() < 2 && resp.plots.len() < 2 {
        return Err(corrupted("oscilloscope header"));
    }

    let mut raw = OscilloscopePlot {
        min_range: resp.min_value_range.unwrap_or(0),
        max_range: resp.max_value_range.unwrap_or(0),
        ..Default::default()
    };
    let mut reset_blanked = raw.clone();

    if let Some(plot) = resp.plots.first() {
        raw.int_data = plot.val.clone();
    }
    if let Some(plot) = resp.plots.get(1) {
        reset_blanked.int_data = plot.val.clone();
    }

    if resp.plot_len.len() >= 2 {
        let raw_samples = resp.plot_len[0] as usize;
        let rb_samples = resp.plot_len[1] as usize;
        let tail = &body[data_start + hdr_len..];
        if (raw_samples + rb_samples) * 8 > tail.len() {
            return Err(corrupted("oscilloscope"));
        }
        raw.data = read_f64_array(&tail[..raw_samples * 8]);
        reset_blanked.data = read_f64_array(&tail[raw_samples * 8..][..rb_samples * 8]);
    }

    Ok(OscilloscopeCapture {
        channel_id: offset_channel(resp.channel_id, packet.channel_id_offset),
        data_set_id: resp.data_set_id.unwrap_or(0),
        raw,
        reset_blanked,
    })
}

fn stats_from_header(resp: &HistogramDataResponse) -> HistogramStats {
    HistogramStats {
        data_set_id: resp.data_set_id.unwrap_or(0),
        time_elapsed: resp.time_elapsed.unwrap_or(0.0),
        samples_detected: resp.samples_detected.unwrap_or(0),
        samples_erased: resp.samples_erased.unwrap_or(0),
        pulses_accepted: resp.pulses_accepted.unwrap_or(0),
        pulses_rejected: resp.pulses_rejected.unwrap_or(0),
        input_count_rate: resp.input_count_rate.unwrap_or(0.0),
        output_count_rate: resp.output_count_rate.unwrap_or(0.0),
        dead_time: resp.dead_time_percent.unwrap_or(0.0),
        gate_state: resp.gate_state.unwrap_or(0) as i32,
        spectrum_selection_mask: resp.spectrum_selection_mask.unwrap_or(0),
        subregion_start_index: resp.subregion_start_index.unwrap_or(0),
        subregion_end_index: resp.subregion_end_index.unwrap_or(0),
        refresh_rate: resp.refresh_rate.unwrap_or(0),
        positive_rail_hit_count: 0,
        negative_rail_hit_count: 0,
        trigger: resp.trigger(),
        intensity: resp.intensity.clone(),
    }
}

/// Decode a histogram update received over TCP: extended-length protobuf
/// header, then the selected count arrays as raw little-endian u32s.
pub fn decode_histogram_data_response(packet: &SincBuffer) -> SincResult<HistogramCapture> {
    let body = packet.as_slice();
    let (hdr_len, data_start) =
        framing::read_nested_len(body).ok_or_else(|| corrupted("histogram"))?;
    if hdr_len > MAX_BULK_HEADER_LEN || data_start + hdr_len > body.len() {
        return Err(corrupted("histogram"));
    }

    let resp = HistogramDataResponse::decode(&body[data_start..data_start + hdr_len])
        .map_err(|_| corrupted("histogram header"))?;

    let mut accepted_samples = 0usize;
    let mut rejected_samples = 0usize;
    if let Some(mask) = resp.spectrum_selection_mask {
        let mut plot = 0;
        if mask & SPECTRUM_SELECT_ACCEPTED != 0 && resp.plot_len.len() > plot {
            accepted_samples = resp.plot_len[plot] as usize;
            plot += 1;
        }
        if mask & SPECTRUM_SELECT_REJECTED != 0 && resp.plot_len.len() > plot {
            rejected_samples = resp.plot_len[plot] as usize;
        }
    }

    let tail = &body[data_start + hdr_len..];
    if (accepted_samples + rejected_samples) * 4 > tail.len() {
        return Err(corrupted("histogram"));
    }

    let accepted =
        (accepted_samples > 0).then(|| read_u32_array(&tail[..accepted_samples * 4]));
    let rejected = (rejected_samples > 0)
        .then(|| read_u32_array(&tail[accepted_samples * 4..][..rejected_samples * 4]));

    Ok(HistogramCapture {
        channel_id: offset_channel(resp.channel_id, packet.channel_id_offset),
        accepted,
        rejected,
        stats: stats_from_header(&resp),
    })
}

/// Field cursor over the legacy datagram header. Reads past `limit` yield
/// zero, so short headers from older firmware decode as all-zero statistics.
struct FieldCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    limit: usize,
}

impl<'a> FieldCursor<'a> {
    fn new(buf: &'a [u8], start: usize, limit: usize) -> Self {
        Self { buf, pos: start, limit: limit.min(buf.len()) }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        if self.pos + N <= self.limit {
            out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        }
        self.pos += N;
        out
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take::<4>())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take::<8>())
    }

    fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.take::<8>())
    }
}

/// Decode a histogram update in the legacy UDP datagram layout (after the
/// datagram lift, so `packet` holds the datagram payload).
pub fn decode_histogram_datagram_response(packet: &SincBuffer) -> SincResult<HistogramCapture> {
    let body = packet.as_slice();
    if body.len() < DATAGRAM_STATS_OFFSET {
        return Err(corrupted("histogram datagram"));
    }

    let header_len = u32::from_le_bytes(body[0..4].try_into().unwrap()) as usize;
    let protocol_version = u16::from_le_bytes(body[4..6].try_into().unwrap());
    if protocol_version != 0 {
        return Err(SincError::with_message(
            ErrorCode::ReadFailed,
            "unknown histogram datagram protocol",
        ));
    }
    let msg_type = u16::from_le_bytes(body[6..8].try_into().unwrap());
    if msg_type != MessageType::HistogramDatagramResponse.as_wire() as u16 {
        return Err(corrupted("histogram datagram"));
    }
    if header_len > body.len() {
        return Err(corrupted("histogram datagram"));
    }

    let channel_id = u32::from_le_bytes(body[8..12].try_into().unwrap()) as i32;
    let samples = u32::from_le_bytes(body[12..16].try_into().unwrap()) as usize;
    let mask = u32::from_le_bytes(body[16..20].try_into().unwrap());

    let mut cur = FieldCursor::new(body, DATAGRAM_STATS_OFFSET, header_len);
    let mut stats = HistogramStats {
        spectrum_selection_mask: mask,
        data_set_id: cur.u64(),
        ..Default::default()
    };
    stats.time_elapsed = cur.f64();
    stats.samples_detected = cur.u64();
    stats.samples_erased = cur.u64();
    stats.pulses_accepted = cur.u64();
    stats.pulses_rejected = cur.u64();
    stats.input_count_rate = cur.f64();
    stats.output_count_rate = cur.f64();
    stats.dead_time = cur.f64();
    stats.subregion_start_index = cur.u32();
    stats.subregion_end_index = cur.u32();
    stats.refresh_rate = cur.u32();
    stats.gate_state = cur.u32() as i32;
    stats.positive_rail_hit_count = cur.u32();
    stats.negative_rail_hit_count = cur.u32();

    if header_len > cur.pos {
        stats.trigger =
            sinc_proto::HistogramTrigger::from_i32(cur.u32() as i32).unwrap_or_default();
    }

    // Newer headers append four reserved words, an intensity count and the
    // intensity values themselves.
    if header_len.saturating_sub(5 * 4) >= cur.pos {
        cur.take::<16>();
        let num_intensity = cur.u32() as usize;
        if num_intensity > 0 {
            if cur.pos + num_intensity * 4 > cur.limit {
                return Err(corrupted("histogram intensity"));
            }
            stats.intensity =
                read_u32_array(&body[cur.pos..cur.pos + num_intensity * 4]);
        }
    }

    let tail = &body[header_len..];
    let mut offset = 0usize;
    let mut accepted = None;
    if samples > 0 && mask & SPECTRUM_SELECT_ACCEPTED != 0 && tail.len() >= samples * 4 {
        accepted = Some(read_u32_array(&tail[..samples * 4]));
        offset = samples * 4;
    }
    let mut rejected = None;
    if samples > 0 && mask & SPECTRUM_SELECT_REJECTED != 0 && tail.len() - offset >= samples * 4 {
        rejected = Some(read_u32_array(&tail[offset..offset + samples * 4]));
    }

    Ok(HistogramCapture { channel_id, accepted, rejected, stats })
}

pub fn decode_list_mode_data_response(packet: &SincBuffer) -> SincResult<ListModeCapture> {
    let body = packet.as_slice();
    let (hdr_len, data_start) =
        framing::read_nested_len(body).ok_or_else(|| corrupted("list mode"))?;
    if hdr_len > MAX_BULK_HEADER_LEN || data_start + hdr_len > body.len() {
        return Err(corrupted("list mode"));
    }

    let resp = ListModeDataResponse::decode(&body[data_start..data_start + hdr_len])
        .map_err(|_| corrupted("list mode header"))?;

    Ok(ListModeCapture {
        channel_id: offset_channel(resp.channel_id, packet.channel_id_offset),
        data_set_id: resp.data_set_id.unwrap_or(0),
        data: body[data_start + hdr_len..].to_vec(),
    })
}

pub fn decode_monitor_channels_command(packet: &SincBuffer) -> SincResult<u64> {
    let cmd = MonitorChannelsCommand::decode(packet.as_slice())
        .map_err(|_| corrupted("monitor channels"))?;
    let mut bits = 0u64;
    for channel in cmd.channel_id {
        if channel < 64 {
            bits |= 1 << channel;
        }
    }
    Ok(bits)
}

pub fn decode_check_param_consistency_response(
    packet: &SincBuffer,
) -> SincResult<CheckParamConsistencyResponse> {
    let resp = CheckParamConsistencyResponse::decode(packet.as_slice())
        .map_err(|_| corrupted("check param consistency"))?;
    check_success(resp.success.as_ref())?;
    Ok(resp)
}

pub fn decode_software_update_complete_response(packet: &SincBuffer) -> SincResult<()> {
    let resp = SoftwareUpdateCompleteResponse::decode(packet.as_slice())
        .map_err(|_| corrupted("software update complete"))?;
    check_success(resp.success.as_ref())
}

pub fn decode_download_crash_dump_response(packet: &SincBuffer) -> SincResult<CrashDump> {
    let resp = DownloadCrashDumpResponse::decode(packet.as_slice())
        .map_err(|_| corrupted("crash dump"))?;
    check_success(resp.success.as_ref())?;
    Ok(CrashDump { new_dump: resp.new_dump.unwrap_or(false), data: resp.content.unwrap_or_default() })
}

pub fn decode_synchronize_log_response(packet: &SincBuffer) -> SincResult<SynchronizeLogResponse> {
    let resp = SynchronizeLogResponse::decode(packet.as_slice())
        .map_err(|_| corrupted("synchronize log"))?;
    check_success(resp.success.as_ref())?;
    Ok(resp)
}
