//! The connection type: duplex I/O engine, receive pipeline and the
//! synchronous request/reply state machine.

use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

use mio::net::{TcpStream, UdpSocket};
use sinc_proto::{ErrorCode, KeyValue, MessageType};
use tracing::debug;

use crate::buffer::SincBuffer;
use crate::decode;
use crate::error::{ErrorHalf, SincError, SincResult};
use crate::framing::{self, Scan, HEADER_LEN, RESPONSE_MARKER};
use crate::socket;
use crate::types::CalibrationInfo;

/// Initial receive-buffer capacity; the buffer grows on demand.
const READBUF_DEFAULT_SIZE: usize = 65536;
/// Datagrams cannot be bigger than this.
const MAX_DATAGRAM_BYTES: usize = 65536;
/// Stream reads stage through this much spare space per read.
const STAGING_BYTES: usize = 65536;

/// One attachment to a device.
///
/// The library spawns no threads: the owner drives all I/O, and every
/// blocking call honors the connection's default timeout (milliseconds, -1
/// forever, 0 poll) unless given its own. A connection must not be waited on
/// from two threads at once; the `in_socket_wait` guard turns that misuse
/// into `MultipleThreadWait` instead of a corrupted read buffer.
pub struct Sinc {
    stream: Option<TcpStream>,
    connected: bool,
    timeout_ms: i32,
    datagram_xfer: bool,
    datagram: Option<UdpSocket>,
    datagram_port: u16,
    pub(crate) datagram_ready: bool,
    pub(crate) in_socket_wait: bool,
    read_buf: SincBuffer,
    read_err: SincError,
    write_err: SincError,
    current: ErrorHalf,
    skipped_packets: u64,
}

impl Default for Sinc {
    fn default() -> Self {
        Self::new()
    }
}

impl Sinc {
    /// A new, idle connection with an infinite default timeout.
    pub fn new() -> Self {
        Self {
            stream: None,
            connected: false,
            timeout_ms: -1,
            datagram_xfer: false,
            datagram: None,
            datagram_port: 0,
            datagram_ready: false,
            in_socket_wait: false,
            read_buf: SincBuffer::with_capacity(READBUF_DEFAULT_SIZE),
            read_err: SincError::default(),
            write_err: SincError::default(),
            current: ErrorHalf::Read,
            skipped_packets: 0,
        }
    }

    /// Default timeout for subsequent commands, in milliseconds. -1 waits
    /// forever, 0 polls.
    pub fn set_timeout(&mut self, timeout_ms: i32) {
        self.timeout_ms = timeout_ms;
    }

    pub fn timeout(&self) -> i32 {
        self.timeout_ms
    }

    /// Allow histogram transfer over UDP. Off by default; when on, starting
    /// a histogram negotiates the datagram path first.
    pub fn set_datagram_xfer(&mut self, enabled: bool) {
        self.datagram_xfer = enabled;
    }

    pub fn datagram_xfer(&self) -> bool {
        self.datagram_xfer
    }

    /// The locally bound UDP port, 0 when none is open.
    pub fn datagram_port(&self) -> u16 {
        self.datagram_port
    }

    /// Whether the datagram path has been probed and found working.
    pub fn is_datagram_ready(&self) -> bool {
        self.datagram_ready
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The device's address, once connected.
    pub fn peer_address(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.peer_addr().ok())
    }

    /// Packets with a foreign response code silently dropped by the framing
    /// layer since this connection was created.
    pub fn skipped_packet_count(&self) -> u64 {
        self.skipped_packets
    }

    // ---- error slots -----------------------------------------------------

    /// The last receive-half error.
    pub fn read_error(&self) -> &SincError {
        &self.read_err
    }

    /// The last send-half error.
    pub fn write_error(&self) -> &SincError {
        &self.write_err
    }

    /// Whichever slot was written most recently.
    pub fn last_error(&self) -> &SincError {
        match self.current {
            ErrorHalf::Read => &self.read_err,
            ErrorHalf::Write => &self.write_err,
        }
    }

    pub fn last_error_code(&self) -> ErrorCode {
        self.last_error().code()
    }

    pub(crate) fn set_read_error(&mut self, err: SincError) -> SincError {
        self.read_err = err.clone();
        self.current = ErrorHalf::Read;
        err
    }

    pub(crate) fn read_fail(&mut self, code: ErrorCode) -> SincError {
        self.set_read_error(SincError::new(code))
    }

    pub(crate) fn write_fail(&mut self, code: ErrorCode) -> SincError {
        self.set_write_error(SincError::new(code))
    }

    pub(crate) fn set_write_error(&mut self, err: SincError) -> SincError {
        self.write_err = err.clone();
        self.current = ErrorHalf::Write;
        err
    }

    /// Each command clears the stale read error before starting; a reply may
    /// then leave an interleaved async error in the slot for inspection.
    pub(crate) fn clear_read_error(&mut self) {
        self.read_err = SincError::default();
    }

    // ---- lifecycle -------------------------------------------------------

    /// Connect to a device, bounded by the connection's default timeout.
    pub fn connect(&mut self, host: &str, port: u16) -> SincResult<()> {
        match socket::connect(host, port, self.timeout_ms) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.connected = true;
                Ok(())
            }
            Err(code) => Err(self.read_fail(code)),
        }
    }

    /// Close both descriptors and return to the idle state. The read buffer
    /// keeps whatever arrived before the close.
    pub fn disconnect(&mut self) -> SincResult<()> {
        if let Some(stream) = self.stream.take() {
            socket::disconnect(&stream);
        }
        self.datagram = None;
        self.datagram_port = 0;
        self.datagram_ready = false;
        self.connected = false;
        Ok(())
    }

    // ---- send path -------------------------------------------------------

    /// Send an encoded buffer, blocking until the byte stream drains. The
    /// buffer is consumed by the send.
    pub fn send(&mut self, buf: SincBuffer) -> SincResult<()> {
        if !self.connected {
            return Err(self.write_fail(ErrorCode::NotConnected));
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.write_fail(ErrorCode::NotConnected));
        };
        match socket::write_all(stream, buf.as_slice()) {
            Ok(()) => Ok(()),
            Err(code) => Err(self.write_fail(code)),
        }
    }

    // ---- receive pipeline ------------------------------------------------

    fn take_packet_from_buffer(&mut self) -> Option<(MessageType, SincBuffer)> {
        match framing::scan(self.read_buf.as_slice(), RESPONSE_MARKER) {
            Scan::Packet { body_start, body_len, msg_type, skipped, .. } => {
                self.skipped_packets += u64::from(skipped);
                let body = self.read_buf.as_slice()[body_start..body_start + body_len].to_vec();
                let mut packet = SincBuffer::from_vec(body);
                packet.device_id = self.read_buf.device_id;
                packet.channel_id_offset = self.read_buf.channel_id_offset;
                self.read_buf.consume(body_start + body_len);
                Some((msg_type, packet))
            }
            Scan::Incomplete { discard, skipped } => {
                self.skipped_packets += u64::from(skipped);
                if discard > 0 {
                    self.read_buf.consume(discard);
                }
                None
            }
        }
    }

    pub(crate) fn peek_buffered(&self) -> Option<MessageType> {
        match framing::scan(self.read_buf.as_slice(), RESPONSE_MARKER) {
            Scan::Packet { msg_type, .. } => Some(msg_type),
            Scan::Incomplete { .. } => None,
        }
    }

    /// Wait for either descriptor to become readable. Guards against a
    /// second concurrent wait on the same connection.
    fn wait_for_data(&mut self, timeout_ms: i32) -> SincResult<(bool, bool)> {
        if self.in_socket_wait {
            return Err(self.read_fail(ErrorCode::MultipleThreadWait));
        }
        let Some(stream) = self.stream.as_ref() else {
            return Err(self.read_fail(ErrorCode::NotConnected));
        };

        let mut fds: Vec<RawFd> = vec![stream.as_raw_fd()];
        if let Some(udp) = self.datagram.as_ref() {
            fds.push(udp.as_raw_fd());
        }

        self.in_socket_wait = true;
        let result = socket::wait(&fds, timeout_ms);
        self.in_socket_wait = false;

        match result {
            Ok(ready) => Ok((ready[0], ready.get(1).copied().unwrap_or(false))),
            Err(code) => Err(self.read_fail(code)),
        }
    }

    /// Read whatever the stream has, staging through spare buffer space.
    fn fill_from_stream(&mut self) -> SincResult<bool> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.read_fail(ErrorCode::NotConnected));
        };
        let buf = self.read_buf.vec_mut();
        let old_len = buf.len();
        buf.resize(old_len + STAGING_BYTES, 0);
        let result = socket::read_stream(stream, &mut buf[old_len..]);
        match result {
            Ok(n) => {
                self.read_buf.vec_mut().truncate(old_len + n);
                Ok(n > 0)
            }
            Err(code) => {
                self.read_buf.vec_mut().truncate(old_len);
                Err(self.read_fail(code))
            }
        }
    }

    /// Lift one datagram into the read buffer: reserve ten bytes, receive
    /// the payload behind them, then synthesize a framed header so the rest
    /// of the pipeline never knows the transport. The message-type byte is
    /// taken from payload offset 6 when that byte actually arrived.
    fn fill_from_datagram(&mut self) -> SincResult<bool> {
        let Some(sock) = self.datagram.as_ref() else {
            return Ok(false);
        };
        let buf = self.read_buf.vec_mut();
        let old_len = buf.len();
        buf.resize(old_len + HEADER_LEN + MAX_DATAGRAM_BYTES, 0);
        let result = socket::read_datagram(sock, &mut buf[old_len + HEADER_LEN..]);
        match result {
            Ok(n) if n > 0 => {
                let type_byte = if n > 6 {
                    buf[old_len + HEADER_LEN + 6]
                } else {
                    MessageType::HistogramDatagramResponse.as_wire()
                };
                framing::write_header(
                    &mut buf[old_len..old_len + HEADER_LEN],
                    n,
                    type_byte,
                    RESPONSE_MARKER,
                );
                buf.truncate(old_len + HEADER_LEN + n);
                Ok(true)
            }
            Ok(_) => {
                buf.truncate(old_len);
                Ok(false)
            }
            Err(code) => {
                self.read_buf.vec_mut().truncate(old_len);
                Err(self.read_fail(code))
            }
        }
    }

    fn read_message_impl(
        &mut self,
        timeout_ms: i32,
        consume: bool,
    ) -> SincResult<(MessageType, Option<SincBuffer>)> {
        let try_buffer = |conn: &mut Self| {
            if consume {
                conn.take_packet_from_buffer().map(|(t, b)| (t, Some(b)))
            } else {
                conn.peek_buffered().map(|t| (t, None))
            }
        };

        if let Some(found) = try_buffer(self) {
            return Ok(found);
        }
        if !self.connected {
            return Err(self.read_fail(ErrorCode::NotConnected));
        }

        loop {
            // Drain everything currently available without blocking.
            let mut read_some = false;
            loop {
                let (tcp_ready, udp_ready) = self.wait_for_data(0)?;
                if !tcp_ready && !udp_ready {
                    break;
                }
                if tcp_ready && self.fill_from_stream()? {
                    read_some = true;
                }
                if udp_ready && self.fill_from_datagram()? {
                    read_some = true;
                }
            }

            if read_some {
                if let Some(found) = try_buffer(self) {
                    return Ok(found);
                }
            }

            // Nothing complete yet; block for more, bounded by the timeout.
            self.wait_for_data(timeout_ms)?;
            if timeout_ms == 0 {
                return Err(self.read_fail(ErrorCode::Timeout));
            }
        }
    }

    /// Read the next message: its type plus the de-encapsulated body, ready
    /// for the matching decoder.
    ///
    /// Packets are delivered in the order their first byte arrived on the
    /// stream; lifted datagrams interleave on datagram boundaries but never
    /// split a stream packet.
    pub fn read_message(&mut self, timeout_ms: i32) -> SincResult<(MessageType, SincBuffer)> {
        let (msg_type, packet) = self.read_message_impl(timeout_ms, true)?;
        Ok((msg_type, packet.unwrap_or_default()))
    }

    /// Find the type of the next packet without consuming it.
    pub fn peek_packet(&mut self, timeout_ms: i32) -> SincResult<MessageType> {
        let (msg_type, _) = self.read_message_impl(timeout_ms, false)?;
        Ok(msg_type)
    }

    /// Read and discard the next message, of whatever type.
    pub fn read_and_discard_packet(&mut self, timeout_ms: i32) -> SincResult<()> {
        self.read_message(timeout_ms).map(|_| ())
    }

    // ---- request/reply engine --------------------------------------------

    /// Read messages until one of the sought type arrives.
    ///
    /// Asynchronous errors encountered on the way are installed in the read
    /// slot and consumed; an unexpected `SuccessResponse` is treated as a
    /// possible failure reply to the outstanding command. Anything else is
    /// skipped silently, so interleaved events cannot desynchronize the
    /// engine.
    pub fn wait_for_type(&mut self, timeout_ms: i32, seek: MessageType) -> SincResult<SincBuffer> {
        loop {
            let (msg_type, packet) = self.read_message(timeout_ms)?;
            if msg_type == seek {
                return Ok(packet);
            }

            match msg_type {
                MessageType::AsynchronousErrorResponse => {
                    match decode::decode_asynchronous_error(&packet) {
                        Ok(device_err) => {
                            debug!(code = ?device_err.code(), "async error while waiting");
                            self.set_read_error(device_err);
                        }
                        Err(err) => return Err(self.set_read_error(err)),
                    }
                }
                MessageType::SuccessResponse => {
                    if let Err(err) = decode::decode_success_response(&packet) {
                        return Err(self.set_read_error(err));
                    }
                }
                other => {
                    debug!(?other, ?seek, "skipping interleaved message");
                }
            }
        }
    }

    /// Await the simple success reply that answers most commands.
    pub fn check_success(&mut self) -> SincResult<()> {
        let timeout_ms = self.timeout_ms;
        let packet = self.wait_for_type(timeout_ms, MessageType::SuccessResponse)?;
        match decode::decode_success_response(&packet) {
            Ok(_) => Ok(()),
            Err(err) => Err(self.set_read_error(err)),
        }
    }

    /// Wait for the channel to report `channel.state = "ready"`, as it does
    /// after a stop or at the end of acquisition. A negative `channel_id`
    /// accepts readiness from any channel.
    pub fn wait_ready(&mut self, channel_id: i32, timeout_ms: i32) -> SincResult<()> {
        self.request_get_param(channel_id, "channel.state")?;

        let mut done = false;
        let mut got_get_param_response = false;
        while !done && !got_get_param_response {
            let (msg_type, packet) = self.read_message(timeout_ms)?;
            match msg_type {
                MessageType::ParamUpdatedResponse => {
                    if let Ok((resp, from_channel)) = decode::decode_param_updated_response(&packet)
                    {
                        if channel_id < 0 || from_channel < 0 || from_channel == channel_id {
                            done = params_report_ready(&resp.params, channel_id);
                        }
                    }
                }
                MessageType::GetParamResponse => {
                    match decode::decode_get_param_response(&packet) {
                        Ok((resp, from_channel)) if from_channel == channel_id => {
                            if params_report_ready(&resp.results, channel_id) {
                                done = true;
                            }
                            got_get_param_response = true;
                        }
                        _ => {}
                    }
                }
                MessageType::AsynchronousErrorResponse => {
                    match decode::decode_asynchronous_error(&packet) {
                        Ok(device_err) => {
                            self.set_read_error(device_err);
                        }
                        Err(err) => return Err(self.set_read_error(err)),
                    }
                }
                _ => {}
            }
        }

        if !got_get_param_response {
            // The readiness came from a ParamUpdatedResponse; the reply to
            // our own get is still in flight and must be drained or every
            // later exchange slips one message out of step.
            let _ = self.wait_for_type(timeout_ms, MessageType::GetParamResponse);
        }

        Ok(())
    }

    /// Wait for a running calibration to finish, then fetch its result.
    pub fn wait_calibration_complete(&mut self, channel_id: i32) -> SincResult<CalibrationInfo> {
        loop {
            let timeout_ms = self.timeout_ms;
            let packet =
                self.wait_for_type(timeout_ms, MessageType::CalibrationProgressResponse)?;
            let progress = match decode::decode_calibration_progress_response(&packet) {
                Ok(progress) => progress,
                Err(err) => return Err(self.set_read_error(err)),
            };
            debug!(progress = progress.progress, stage = ?progress.stage, "calibration progress");
            if progress.complete {
                break;
            }
        }
        self.get_calibration(channel_id)
    }

    // ---- datagram negotiation --------------------------------------------

    /// Bind the local datagram socket if it isn't already open.
    pub fn open_datagram_comms(&mut self) -> SincResult<()> {
        if self.datagram.is_some() {
            return Ok(());
        }
        match socket::bind_datagram() {
            Ok((sock, port)) => {
                self.datagram = Some(sock);
                self.datagram_port = port;
                Ok(())
            }
            Err(code) => {
                self.datagram_ready = false;
                Err(self.set_read_error(SincError::with_message(
                    code,
                    "can't bind histogram datagram socket",
                )))
            }
        }
    }

    pub(crate) fn poll_fds(&self) -> Option<Vec<RawFd>> {
        let stream = self.stream.as_ref()?;
        let mut fds = vec![stream.as_raw_fd()];
        if let Some(udp) = self.datagram.as_ref() {
            fds.push(udp.as_raw_fd());
        }
        Some(fds)
    }

    pub(crate) fn datagram_socket(&self) -> Option<&UdpSocket> {
        self.datagram.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn poison_wait_guard(&mut self) {
        self.in_socket_wait = true;
    }

    #[cfg(test)]
    pub(crate) fn buffered_len(&self) -> usize {
        self.read_buf.len()
    }
}

/// Does any of these parameters report `channel.state = "ready"` for the
/// targeted channel (or any channel when `channel_id` is negative)?
fn params_report_ready(params: &[KeyValue], channel_id: i32) -> bool {
    params.iter().any(|kv| {
        kv.key.as_deref() == Some("channel.state")
            && kv.option_val.as_deref() == Some("ready")
            && (channel_id < 0 || kv.channel_id == Some(channel_id as u32))
    })
}
