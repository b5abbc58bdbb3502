//! Synchronous device commands: encode, send, await the reply.
//!
//! Every command has a `request_*` twin that only sends; the plain form then
//! runs the request/reply engine for the answer. Commands clear the read
//! error slot when they start, so an error left by an interleaved async
//! event is visible exactly until the next command begins.

use std::time::SystemTime;

use sinc_proto::{
    CheckParamConsistencyResponse, ErrorCode, GetParamResponse, KeyValue,
    ListParamDetailsResponse, MessageType, SoftwareUpdateFile, SynchronizeLogResponse,
};
use tracing::warn;

use crate::buffer::SincBuffer;
use crate::decode;
use crate::encode;
use crate::error::{SincError, SincResult};
use crate::sinc::Sinc;
use crate::socket;
use crate::types::{
    CalibrationInfo, CrashDump, HistogramCapture, ListModeCapture, OscilloscopeCapture,
    ParamValue,
};
use crate::types::{key_value_of, make_key_value};

impl Sinc {
    fn request(&mut self, fill: impl FnOnce(&mut SincBuffer)) -> SincResult<()> {
        self.clear_read_error();
        let mut buf = SincBuffer::new();
        fill(&mut buf);
        self.send(buf)
    }

    // ---- send-only variants ----------------------------------------------

    pub fn request_ping(&mut self, verbose: bool) -> SincResult<()> {
        self.request(|buf| encode::encode_ping(buf, verbose))
    }

    pub fn request_get_param(&mut self, channel_id: i32, name: &str) -> SincResult<()> {
        self.request(|buf| encode::encode_get_param(buf, channel_id, name))
    }

    pub fn request_get_params(&mut self, requests: &[(i32, &str)]) -> SincResult<()> {
        self.request(|buf| encode::encode_get_params(buf, requests))
    }

    pub fn request_set_param(&mut self, channel_id: i32, param: KeyValue) -> SincResult<()> {
        self.request(|buf| encode::encode_set_param(buf, channel_id, param))
    }

    pub fn request_set_params(&mut self, channel_id: i32, params: &[KeyValue]) -> SincResult<()> {
        self.request(|buf| encode::encode_set_params(buf, channel_id, params))
    }

    pub fn request_set_all_params(
        &mut self,
        channel_id: i32,
        params: &[KeyValue],
        from_firmware_version: &str,
    ) -> SincResult<()> {
        self.request(|buf| {
            encode::encode_set_all_params(buf, channel_id, params, from_firmware_version);
        })
    }

    pub fn request_start_calibration(&mut self, channel_id: i32) -> SincResult<()> {
        self.request(|buf| encode::encode_start_calibration(buf, channel_id))
    }

    pub fn request_get_calibration(&mut self, channel_id: i32) -> SincResult<()> {
        self.request(|buf| encode::encode_get_calibration(buf, channel_id))
    }

    pub fn request_set_calibration(
        &mut self,
        channel_id: i32,
        calibration: &CalibrationInfo,
    ) -> SincResult<()> {
        self.request(|buf| encode::encode_set_calibration(buf, channel_id, calibration))
    }

    pub fn request_calculate_dc_offset(&mut self, channel_id: i32) -> SincResult<()> {
        self.request(|buf| encode::encode_calculate_dc_offset(buf, channel_id))
    }

    pub fn request_start_oscilloscope(&mut self, channel_id: i32) -> SincResult<()> {
        self.request(|buf| encode::encode_start_oscilloscope(buf, channel_id))
    }

    pub fn request_start_histogram(&mut self, channel_id: i32) -> SincResult<()> {
        self.request(|buf| encode::encode_start_histogram(buf, channel_id))
    }

    pub fn request_start_fft(&mut self, channel_id: i32) -> SincResult<()> {
        self.request(|buf| encode::encode_start_fft(buf, channel_id))
    }

    pub fn request_clear_histogram_data(&mut self, channel_id: i32) -> SincResult<()> {
        self.request(|buf| encode::encode_clear_histogram_data(buf, channel_id))
    }

    pub fn request_start_list_mode(&mut self, channel_id: i32) -> SincResult<()> {
        self.request(|buf| encode::encode_start_list_mode(buf, channel_id))
    }

    pub fn request_stop(&mut self, channel_id: i32, skip: bool) -> SincResult<()> {
        self.request(|buf| encode::encode_stop(buf, channel_id, skip))
    }

    pub fn request_list_param_details(
        &mut self,
        channel_id: i32,
        match_prefix: &str,
    ) -> SincResult<()> {
        self.request(|buf| encode::encode_list_param_details(buf, channel_id, match_prefix))
    }

    pub fn request_restart(&mut self) -> SincResult<()> {
        self.request(encode::encode_restart)
    }

    pub fn request_reset_spatial_system(&mut self) -> SincResult<()> {
        self.request(encode::encode_reset_spatial_system)
    }

    pub fn request_trigger_histogram(&mut self) -> SincResult<()> {
        self.request(encode::encode_trigger_histogram)
    }

    pub fn request_software_update(
        &mut self,
        app_image: Option<(&[u8], &str)>,
        fpga_image: Option<(&[u8], &str)>,
        update_files: &[SoftwareUpdateFile],
        auto_restart: bool,
    ) -> SincResult<()> {
        self.request(|buf| {
            encode::encode_software_update(buf, app_image, fpga_image, update_files, auto_restart);
        })
    }

    pub fn request_save_configuration(&mut self) -> SincResult<()> {
        self.request(encode::encode_save_configuration)
    }

    pub fn request_delete_saved_configuration(&mut self) -> SincResult<()> {
        self.request(encode::encode_delete_saved_configuration)
    }

    pub fn request_monitor_channels(&mut self, channels: &[u32]) -> SincResult<()> {
        self.request(|buf| encode::encode_monitor_channels(buf, channels))
    }

    pub fn request_probe_datagram(&mut self) -> SincResult<()> {
        self.request(encode::encode_probe_datagram)
    }

    pub fn request_check_param_consistency(&mut self, channel_id: i32) -> SincResult<()> {
        self.request(|buf| encode::encode_check_param_consistency(buf, channel_id))
    }

    pub fn request_download_crash_dump(&mut self) -> SincResult<()> {
        self.request(encode::encode_download_crash_dump)
    }

    pub fn request_synchronize_log(&mut self, sequence_no: u64) -> SincResult<()> {
        self.request(|buf| encode::encode_synchronize_log(buf, sequence_no))
    }

    pub fn request_set_time(&mut self, time: SystemTime) -> SincResult<()> {
        self.request(|buf| encode::encode_set_time(buf, time))
    }

    // ---- synchronous commands --------------------------------------------

    /// Check that the device is responding.
    pub fn ping(&mut self, verbose: bool) -> SincResult<()> {
        self.request_ping(verbose)?;
        self.check_success()
    }

    /// Get one named parameter. The reply carries the owning channel of each
    /// returned parameter.
    pub fn get_param(&mut self, channel_id: i32, name: &str) -> SincResult<(GetParamResponse, i32)> {
        self.request_get_param(channel_id, name)?;
        self.read_get_param_response()
    }

    /// Get several parameters in one exchange.
    pub fn get_params(&mut self, requests: &[(i32, &str)]) -> SincResult<(GetParamResponse, i32)> {
        self.request_get_params(requests)?;
        self.read_get_param_response()
    }

    fn read_get_param_response(&mut self) -> SincResult<(GetParamResponse, i32)> {
        let timeout_ms = self.timeout();
        let packet = self.wait_for_type(timeout_ms, MessageType::GetParamResponse)?;
        match decode::decode_get_param_response(&packet) {
            Ok(found) => Ok(found),
            Err(err) => Err(self.set_read_error(err)),
        }
    }

    /// Get one parameter and extract its typed value.
    pub fn get_param_value(&mut self, channel_id: i32, name: &str) -> SincResult<Option<ParamValue>> {
        let (resp, _) = self.get_param(channel_id, name)?;
        Ok(resp.results.first().and_then(key_value_of))
    }

    pub fn set_param(&mut self, channel_id: i32, param: KeyValue) -> SincResult<()> {
        self.request_set_param(channel_id, param)?;
        self.check_success()
    }

    pub fn set_params(&mut self, channel_id: i32, params: &[KeyValue]) -> SincResult<()> {
        self.request_set_params(channel_id, params)?;
        self.check_success()
    }

    /// Set the complete device state in one command; unnamed parameters
    /// revert to defaults upgraded from `from_firmware_version`.
    pub fn set_all_params(
        &mut self,
        channel_id: i32,
        params: &[KeyValue],
        from_firmware_version: &str,
    ) -> SincResult<()> {
        self.request_set_all_params(channel_id, params, from_firmware_version)?;
        self.check_success()
    }

    /// Start a calibration without waiting for it to finish.
    pub fn start_calibration(&mut self, channel_id: i32) -> SincResult<()> {
        self.request_start_calibration(channel_id)?;
        self.check_success()
    }

    /// Calibrate and wait for the result. May take several seconds.
    pub fn calibrate(&mut self, channel_id: i32) -> SincResult<CalibrationInfo> {
        self.start_calibration(channel_id)?;
        self.wait_calibration_complete(channel_id)
    }

    /// Fetch the calibration from a previous run.
    pub fn get_calibration(&mut self, channel_id: i32) -> SincResult<CalibrationInfo> {
        self.request_get_calibration(channel_id)?;
        let timeout_ms = self.timeout();
        let packet = self.wait_for_type(timeout_ms, MessageType::GetCalibrationResponse)?;
        match decode::decode_get_calibration_response(&packet) {
            Ok(info) => Ok(info),
            Err(err) => Err(self.set_read_error(err)),
        }
    }

    /// Restore a previously captured calibration.
    pub fn set_calibration(
        &mut self,
        channel_id: i32,
        calibration: &CalibrationInfo,
    ) -> SincResult<()> {
        self.request_set_calibration(channel_id, calibration)?;
        self.check_success()
    }

    /// Calculate the DC offset. The device acknowledges first and reports
    /// the offset in a second reply.
    pub fn calculate_dc_offset(&mut self, channel_id: i32) -> SincResult<f64> {
        self.request_calculate_dc_offset(channel_id)?;
        self.check_success()?;
        let timeout_ms = self.timeout();
        let packet = self.wait_for_type(timeout_ms, MessageType::CalculateDcOffsetResponse)?;
        match decode::decode_calculate_dc_offset_response(&packet) {
            Ok(result) => Ok(result.dc_offset),
            Err(err) => Err(self.set_read_error(err)),
        }
    }

    pub fn start_oscilloscope(&mut self, channel_id: i32) -> SincResult<()> {
        self.request_start_oscilloscope(channel_id)?;
        self.check_success()
    }

    /// Wait for the next oscilloscope capture.
    pub fn read_oscilloscope(&mut self, timeout_ms: i32) -> SincResult<OscilloscopeCapture> {
        let packet = self.wait_for_type(timeout_ms, MessageType::OscilloscopeDataResponse)?;
        match decode::decode_oscilloscope_data_response(&packet) {
            Ok(capture) => Ok(capture),
            Err(err) => Err(self.set_read_error(err)),
        }
    }

    /// Start histogram capture. With datagram transfer enabled this first
    /// negotiates the UDP path; failure to negotiate falls back to TCP.
    pub fn start_histogram(&mut self, channel_id: i32) -> SincResult<()> {
        if self.datagram_xfer() && self.datagram_socket().is_none() {
            if let Err(err) = self.init_datagram_comms() {
                warn!(%err, "can't negotiate datagram mode, staying on tcp");
            }
        }
        self.request_start_histogram(channel_id)?;
        self.check_success()
    }

    /// Wait for the next histogram update on the TCP path.
    pub fn read_histogram(&mut self, timeout_ms: i32) -> SincResult<HistogramCapture> {
        let packet = self.wait_for_type(timeout_ms, MessageType::HistogramDataResponse)?;
        match decode::decode_histogram_data_response(&packet) {
            Ok(capture) => Ok(capture),
            Err(err) => Err(self.set_read_error(err)),
        }
    }

    /// Wait for the next histogram update on the datagram path.
    pub fn read_histogram_datagram(&mut self, timeout_ms: i32) -> SincResult<HistogramCapture> {
        let packet = self.wait_for_type(timeout_ms, MessageType::HistogramDatagramResponse)?;
        match decode::decode_histogram_datagram_response(&packet) {
            Ok(capture) => Ok(capture),
            Err(err) => Err(self.set_read_error(err)),
        }
    }

    pub fn clear_histogram_data(&mut self, channel_id: i32) -> SincResult<()> {
        self.request_clear_histogram_data(channel_id)?;
        self.check_success()
    }

    /// Manually trigger one gated histogram collection.
    pub fn trigger_histogram(&mut self) -> SincResult<()> {
        self.request_trigger_histogram()?;
        self.check_success()
    }

    pub fn start_list_mode(&mut self, channel_id: i32) -> SincResult<()> {
        self.request_start_list_mode(channel_id)?;
        self.check_success()
    }

    /// Wait for the next list-mode data block.
    pub fn read_list_mode(&mut self, timeout_ms: i32) -> SincResult<ListModeCapture> {
        let packet = self.wait_for_type(timeout_ms, MessageType::ListModeDataResponse)?;
        match decode::decode_list_mode_data_response(&packet) {
            Ok(capture) => Ok(capture),
            Err(err) => Err(self.set_read_error(err)),
        }
    }

    /// Stop oscilloscope / histogram / list mode / calibration and wait for
    /// the channel to come back to ready. `skip` skips calibration's
    /// optimisation phase while keeping the calibration.
    pub fn stop(&mut self, channel_id: i32, timeout_ms: i32, skip: bool) -> SincResult<()> {
        self.request_stop(channel_id, skip)?;
        self.check_success()?;
        self.wait_ready(channel_id, timeout_ms)
    }

    /// Deprecated spelling of [`Sinc::stop`] without the skip option.
    pub fn stop_data_acquisition(&mut self, channel_id: i32, timeout_ms: i32) -> SincResult<()> {
        self.stop(channel_id, timeout_ms, false)
    }

    /// List matching parameters with their types and attributes. An empty
    /// prefix lists everything.
    pub fn list_param_details(
        &mut self,
        channel_id: i32,
        match_prefix: &str,
    ) -> SincResult<(ListParamDetailsResponse, i32)> {
        self.request_list_param_details(channel_id, match_prefix)?;
        let timeout_ms = self.timeout();
        let packet = self.wait_for_type(timeout_ms, MessageType::ListParamDetailsResponse)?;
        match decode::decode_list_param_details_response(&packet) {
            Ok(found) => Ok(found),
            Err(err) => Err(self.set_read_error(err)),
        }
    }

    pub fn restart(&mut self) -> SincResult<()> {
        self.request_restart()?;
        self.check_success()
    }

    /// Return the spatial system to its origin position.
    pub fn reset_spatial_system(&mut self) -> SincResult<()> {
        self.request_reset_spatial_system()?;
        self.check_success()
    }

    /// Tell the device which channels this connection wants asynchronous
    /// data for.
    pub fn monitor_channels(&mut self, channels: &[u32]) -> SincResult<()> {
        self.request_monitor_channels(channels)?;
        self.check_success()
    }

    pub fn check_param_consistency(
        &mut self,
        channel_id: i32,
    ) -> SincResult<CheckParamConsistencyResponse> {
        self.request_check_param_consistency(channel_id)?;
        let timeout_ms = self.timeout();
        let packet = self.wait_for_type(timeout_ms, MessageType::CheckParamConsistencyResponse)?;
        match decode::decode_check_param_consistency_response(&packet) {
            Ok(resp) => Ok(resp),
            Err(err) => Err(self.set_read_error(err)),
        }
    }

    pub fn software_update(
        &mut self,
        app_image: Option<(&[u8], &str)>,
        fpga_image: Option<(&[u8], &str)>,
        update_files: &[SoftwareUpdateFile],
        auto_restart: bool,
    ) -> SincResult<()> {
        self.request_software_update(app_image, fpga_image, update_files, auto_restart)?;
        self.check_success()
    }

    /// Save the current configuration as the power-on default.
    pub fn save_configuration(&mut self) -> SincResult<()> {
        self.request_save_configuration()?;
        self.check_success()
    }

    /// Remove any saved configuration, returning to factory defaults on the
    /// next start.
    pub fn delete_saved_configuration(&mut self) -> SincResult<()> {
        self.request_delete_saved_configuration()?;
        self.check_success()
    }

    /// Download the most recent crash dump, if one exists.
    pub fn download_crash_dump(&mut self) -> SincResult<CrashDump> {
        self.request_download_crash_dump()?;
        let timeout_ms = self.timeout();
        let packet = self.wait_for_type(timeout_ms, MessageType::DownloadCrashDumpResponse)?;
        match decode::decode_download_crash_dump_response(&packet) {
            Ok(dump) => Ok(dump),
            Err(err) => Err(self.set_read_error(err)),
        }
    }

    /// Fetch log entries starting from `sequence_no` (0 for all).
    pub fn synchronize_log(&mut self, sequence_no: u64) -> SincResult<SynchronizeLogResponse> {
        self.request_synchronize_log(sequence_no)?;
        let timeout_ms = self.timeout();
        let packet = self.wait_for_type(timeout_ms, MessageType::SynchronizeLogResponse)?;
        match decode::decode_synchronize_log_response(&packet) {
            Ok(resp) => Ok(resp),
            Err(err) => Err(self.set_read_error(err)),
        }
    }

    /// Set the device's real-time clock.
    pub fn set_time(&mut self, time: SystemTime) -> SincResult<()> {
        self.request_set_time(time)?;
        self.check_success()
    }

    // ---- datagram negotiation --------------------------------------------

    /// Ask the device to send a probe datagram and watch both descriptors
    /// until it arrives (or the device acknowledges without one). Returns
    /// whether the datagram path works.
    pub fn probe_datagram(&mut self) -> SincResult<bool> {
        self.open_datagram_comms()?;
        self.request_probe_datagram()?;

        let mut datagrams_ok = false;
        let timeout_ms = self.timeout();
        loop {
            let Some(fds) = self.poll_fds() else {
                return Err(self.read_fail(ErrorCode::NotConnected));
            };
            let ready = match socket::wait(&fds, timeout_ms) {
                Ok(ready) => ready,
                Err(code) => {
                    return Err(self.set_read_error(SincError::with_message(
                        code,
                        "can't read histogram probe datagram",
                    )));
                }
            };

            if ready.get(1).copied().unwrap_or(false) {
                // Consume the probe; its content doesn't matter.
                let mut scratch = vec![0u8; 65536];
                if let Some(sock) = self.datagram_socket() {
                    match socket::read_datagram(sock, &mut scratch) {
                        Ok(_) => datagrams_ok = true,
                        Err(code) => {
                            return Err(self.set_read_error(SincError::with_message(
                                code,
                                "can't read histogram probe datagram",
                            )));
                        }
                    }
                }
            }

            if ready[0] {
                break;
            }
        }

        self.check_success()?;
        Ok(datagrams_ok)
    }

    /// Full datagram negotiation: bind the local socket, hand its port to
    /// the device, probe the path, and enable datagram transfer if the probe
    /// made it through.
    pub fn init_datagram_comms(&mut self) -> SincResult<()> {
        if self.datagram_socket().is_some() {
            return Ok(());
        }
        self.open_datagram_comms()?;

        let params = [
            // An empty ip means "use this connection's source address".
            make_key_value(-1, "histogram.datagram.ip", ParamValue::Str(String::new())),
            make_key_value(
                -1,
                "histogram.datagram.port",
                ParamValue::Int(i64::from(self.datagram_port())),
            ),
        ];
        self.set_params(-1, &params)?;

        let datagrams_ok = self.probe_datagram()?;
        self.datagram_ready = datagrams_ok;

        self.set_param(
            -1,
            make_key_value(-1, "histogram.datagram.enable", ParamValue::Bool(datagrams_ok)),
        )?;
        Ok(())
    }
}
