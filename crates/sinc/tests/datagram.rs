//! Datagram-lift tests: UDP payloads must surface through the same pipeline
//! as framed stream packets.

use std::net::{TcpListener, UdpSocket};

use sinc::proto::MessageType;
use sinc::Sinc;

/// A connection whose TCP side goes to an idle accepted peer, with the
/// datagram socket bound. Returns the sender used to inject datagrams.
fn datagram_setup() -> (Sinc, std::net::TcpStream, UdpSocket) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut conn = Sinc::new();
    conn.set_timeout(5000);
    conn.connect("127.0.0.1", port).unwrap();
    let (peer, _) = listener.accept().unwrap();

    conn.open_datagram_comms().unwrap();
    assert_ne!(conn.datagram_port(), 0);

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.connect(("127.0.0.1", conn.datagram_port())).unwrap();
    (conn, peer, sender)
}

fn histogram_datagram(header_len: u32, channel: u32, samples: u32, mask: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend(header_len.to_le_bytes());
    body.extend(0u16.to_le_bytes()); // protocol version
    body.extend((MessageType::HistogramDatagramResponse.as_wire() as u16).to_le_bytes());
    body.extend(channel.to_le_bytes());
    body.extend(samples.to_le_bytes());
    body.extend(mask.to_le_bytes());
    body
}

#[test]
fn test_short_histogram_datagram_decodes_with_zero_stats() {
    let (mut conn, _peer, sender) = datagram_setup();

    // 32 bytes total: the 20-byte prefix plus an all-zero statistics block.
    let mut payload = histogram_datagram(32, 3, 0, 0);
    payload.extend([0u8; 12]);
    sender.send(&payload).unwrap();

    let capture = conn.read_histogram_datagram(5000).unwrap();
    assert_eq!(capture.channel_id, 3);
    assert_eq!(capture.accepted, None);
    assert_eq!(capture.rejected, None);
    assert_eq!(capture.stats.samples_detected, 0);
    assert_eq!(capture.stats.pulses_accepted, 0);
    assert_eq!(capture.stats.pulses_rejected, 0);
    assert_eq!(capture.stats.spectrum_selection_mask, 0);
}

#[test]
fn test_lifted_datagram_reports_its_own_message_type() {
    let (mut conn, _peer, sender) = datagram_setup();

    // The synthesized header takes its type from payload offset 6; this
    // datagram claims to be oscilloscope data.
    let mut payload = Vec::new();
    payload.extend(16u32.to_le_bytes());
    payload.extend(0u16.to_le_bytes());
    payload.extend((MessageType::OscilloscopeDataResponse.as_wire() as u16).to_le_bytes());
    payload.extend([0u8; 8]);
    sender.send(&payload).unwrap();

    let (msg_type, packet) = conn.read_message(5000).unwrap();
    assert_eq!(msg_type, MessageType::OscilloscopeDataResponse);
    assert_eq!(packet.as_slice(), payload.as_slice());
}

#[test]
fn test_tiny_datagram_falls_back_to_default_type() {
    let (mut conn, _peer, sender) = datagram_setup();

    // Four bytes: too short to carry a type field, so the lift synthesizes
    // the histogram datagram type.
    sender.send(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

    let (msg_type, packet) = conn.read_message(5000).unwrap();
    assert_eq!(msg_type, MessageType::HistogramDatagramResponse);
    assert_eq!(packet.as_slice(), &[0xDE, 0xAD, 0xBE, 0xEF]);
}

#[test]
fn test_datagrams_interleave_with_stream_packets() {
    use std::io::Write;

    let (mut conn, mut peer, sender) = datagram_setup();

    // One stream packet and one datagram, both pending.
    let mut frame = sinc::SincBuffer::new();
    sinc::encode::encode_success_response(
        &mut frame,
        sinc::proto::ErrorCode::NoError,
        None,
        -1,
    );
    peer.write_all(frame.as_slice()).unwrap();

    let mut payload = histogram_datagram(32, 1, 0, 0);
    payload.extend([0u8; 12]);
    sender.send(&payload).unwrap();

    // Both arrive; each is delivered whole, neither splits the other.
    let mut seen = Vec::new();
    for _ in 0..2 {
        let (msg_type, _) = conn.read_message(5000).unwrap();
        seen.push(msg_type);
    }
    assert!(seen.contains(&MessageType::SuccessResponse));
    assert!(seen.contains(&MessageType::HistogramDatagramResponse));
}

#[test]
fn test_init_datagram_comms_negotiation() {
    use std::io::{Read, Write};
    use std::thread;

    use prost::Message;
    use sinc::proto::{ErrorCode, SetParamCommand};
    use sinc::{encode, SincBuffer};

    fn read_command(stream: &mut std::net::TcpStream) -> (u8, Vec<u8>) {
        let mut header = [0u8; 10];
        stream.read_exact(&mut header).unwrap();
        let body_len = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize - 2;
        let mut body = vec![0u8; body_len];
        stream.read_exact(&mut body).unwrap();
        (header[9], body)
    }

    fn write_success(stream: &mut std::net::TcpStream) {
        let mut buf = SincBuffer::new();
        encode::encode_success_response(&mut buf, ErrorCode::NoError, None, -1);
        stream.write_all(buf.as_slice()).unwrap();
    }

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let device = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        // The client hands over its bound UDP port.
        let (msg_type, body) = read_command(&mut stream);
        assert_eq!(msg_type, MessageType::SetParamCommand.as_wire());
        let cmd = SetParamCommand::decode(body.as_slice()).unwrap();
        assert_eq!(cmd.params[0].key.as_deref(), Some("histogram.datagram.ip"));
        assert_eq!(cmd.params[0].str_val.as_deref(), Some(""));
        assert_eq!(cmd.params[1].key.as_deref(), Some("histogram.datagram.port"));
        let udp_port = cmd.params[1].int_val.unwrap() as u16;
        assert_ne!(udp_port, 0);
        write_success(&mut stream);

        // Probe: fire a datagram at the reported port, then acknowledge.
        let (msg_type, _) = read_command(&mut stream);
        assert_eq!(msg_type, MessageType::ProbeDatagramCommand.as_wire());
        let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
        probe.send_to(b"probe", ("127.0.0.1", udp_port)).unwrap();
        write_success(&mut stream);

        // The verified path gets switched on.
        let (msg_type, body) = read_command(&mut stream);
        assert_eq!(msg_type, MessageType::SetParamCommand.as_wire());
        let cmd = SetParamCommand::decode(body.as_slice()).unwrap();
        assert_eq!(cmd.params[0].key.as_deref(), Some("histogram.datagram.enable"));
        assert_eq!(cmd.params[0].bool_val, Some(true));
        write_success(&mut stream);
    });

    let mut conn = Sinc::new();
    conn.set_timeout(5000);
    conn.set_datagram_xfer(true);
    conn.connect("127.0.0.1", port).unwrap();

    conn.init_datagram_comms().unwrap();
    assert!(conn.is_datagram_ready());
    device.join().unwrap();
}

#[test]
fn test_full_histogram_datagram_spectrum() {
    let (mut conn, _peer, sender) = datagram_setup();

    let header_len = 116u32;
    let mut payload = histogram_datagram(header_len, 5, 3, 0x01);
    payload.extend(7u64.to_le_bytes()); // data set id
    payload.extend(2.5f64.to_le_bytes()); // time elapsed
    payload.extend(1000u64.to_le_bytes()); // samples detected
    payload.extend(1u64.to_le_bytes()); // samples erased
    payload.extend(800u64.to_le_bytes()); // pulses accepted
    payload.extend(200u64.to_le_bytes()); // pulses rejected
    payload.extend(400.0f64.to_le_bytes()); // input count rate
    payload.extend(320.0f64.to_le_bytes()); // output count rate
    payload.extend(0.2f64.to_le_bytes()); // dead time
    for v in [0u32, 0, 25, 0, 0, 0] {
        payload.extend(v.to_le_bytes());
    }
    assert_eq!(payload.len() as u32, header_len);
    for v in [11u32, 22, 33] {
        payload.extend(v.to_le_bytes());
    }
    sender.send(&payload).unwrap();

    let capture = conn.read_histogram_datagram(5000).unwrap();
    assert_eq!(capture.channel_id, 5);
    assert_eq!(capture.stats.data_set_id, 7);
    assert_eq!(capture.stats.pulses_accepted, 800);
    assert_eq!(capture.stats.refresh_rate, 25);
    assert_eq!(capture.accepted, Some(vec![11, 22, 33]));
    assert_eq!(capture.rejected, None);
}
