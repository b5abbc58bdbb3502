//! Non-blocking socket primitives.
//!
//! Every descriptor in the library is non-blocking; blocking behavior is
//! built on top of `poll(2)` with millisecond timeouts (-1 waits forever,
//! 0 polls). Interrupted syscalls are retried here so the layers above never
//! see `EINTR`.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};

use mio::net::{TcpStream, UdpSocket};
use sinc_proto::ErrorCode;
use tracing::debug;

/// Wait for a single fd to become writable. Used to complete non-blocking
/// connects and to pace the drain-everything write loop.
fn wait_writable(fd: RawFd, timeout_ms: i32) -> Result<(), ErrorCode> {
    let mut pfd = libc::pollfd { fd, events: libc::POLLOUT, revents: 0 };
    loop {
        let n = unsafe { libc::poll(&mut pfd, 1, timeout_ms.max(-1)) };
        if n == 0 {
            return Err(ErrorCode::Timeout);
        }
        if n < 0 {
            if io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(ErrorCode::ConnectionFailed);
        }
        // Error conditions are reported by the caller's next socket call.
        return Ok(());
    }
}

/// Resolve `host`, start a non-blocking connect and wait for it to complete
/// within `timeout_ms`. The pending socket error is harvested to classify
/// failures.
pub(crate) fn connect(host: &str, port: u16, timeout_ms: i32) -> Result<TcpStream, ErrorCode> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|_| ErrorCode::HostNotFound)?
        .next()
        .ok_or(ErrorCode::HostNotFound)?;

    let stream = TcpStream::connect(addr).map_err(|_| ErrorCode::ConnectionFailed)?;
    wait_writable(stream.as_raw_fd(), timeout_ms)?;

    match stream.take_error() {
        Ok(None) => Ok(stream),
        Ok(Some(err)) => {
            debug!(?err, host, port, "connect failed");
            Err(match err.raw_os_error() {
                Some(libc::EHOSTUNREACH) => ErrorCode::HostUnreachable,
                Some(libc::ETIMEDOUT) => ErrorCode::Timeout,
                _ => ErrorCode::ConnectionFailed,
            })
        }
        Err(_) => Err(ErrorCode::ConnectionFailed),
    }
}

/// Half-close; the descriptor itself closes on drop.
pub(crate) fn disconnect(stream: &TcpStream) {
    let _ = stream.shutdown(std::net::Shutdown::Both);
}

/// Block until one of `fds` is readable, bounded by `timeout_ms`.
///
/// A zero timeout polls and reports no-ready as an all-false result; any
/// other timeout reports no-ready as `Timeout`. Exceptional descriptor state
/// is `ReadFailed`.
pub(crate) fn wait(fds: &[RawFd], timeout_ms: i32) -> Result<Vec<bool>, ErrorCode> {
    let mut pfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd { fd, events: libc::POLLIN, revents: 0 })
        .collect();

    loop {
        let n = unsafe { libc::poll(pfds.as_mut_ptr(), pfds.len() as libc::nfds_t, timeout_ms.max(-1)) };
        if n == 0 {
            if timeout_ms == 0 {
                return Ok(vec![false; fds.len()]);
            }
            return Err(ErrorCode::Timeout);
        }
        if n < 0 {
            if io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(ErrorCode::ReadFailed);
        }

        let mut ready = vec![false; fds.len()];
        for (i, pfd) in pfds.iter().enumerate() {
            if pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                return Err(ErrorCode::ReadFailed);
            }
            if pfd.revents & (libc::POLLIN | libc::POLLHUP) != 0 {
                ready[i] = true;
            }
        }
        return Ok(ready);
    }
}

/// One non-blocking read. `Ok(0)` means no data was available; an orderly
/// remote close is `SocketClosedUnexpectedly` because the device never closes
/// a healthy session.
pub(crate) fn read_stream(stream: &mut TcpStream, buf: &mut [u8]) -> Result<usize, ErrorCode> {
    loop {
        match stream.read(buf) {
            Ok(0) => return Err(ErrorCode::SocketClosedUnexpectedly),
            Ok(n) => return Ok(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return Err(ErrorCode::ReadFailed),
        }
    }
}

/// Write the whole buffer, tolerating partial writes and interruptions.
/// Blocks (without bound) until the byte stream drains.
pub(crate) fn write_all(stream: &mut TcpStream, mut bytes: &[u8]) -> Result<(), ErrorCode> {
    while !bytes.is_empty() {
        wait_writable(stream.as_raw_fd(), -1).map_err(|_| ErrorCode::WriteFailed)?;
        match stream.write(bytes) {
            Ok(0) => return Err(ErrorCode::WriteFailed),
            Ok(n) => bytes = &bytes[n..],
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return Err(ErrorCode::WriteFailed),
        }
    }
    Ok(())
}

/// Bind a UDP socket on any local address and an ephemeral port; report the
/// port so it can be handed to the device.
pub(crate) fn bind_datagram() -> Result<(UdpSocket, u16), ErrorCode> {
    let sock = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
        .map_err(|_| ErrorCode::OutOfResources)?;
    let port = sock.local_addr().map_err(|_| ErrorCode::OutOfResources)?.port();
    Ok((sock, port))
}

/// One datagram receive. Would-block maps to `Timeout` so pollers can tell
/// "nothing yet" from a broken socket.
pub(crate) fn read_datagram(sock: &UdpSocket, buf: &mut [u8]) -> Result<usize, ErrorCode> {
    match sock.recv(buf) {
        Ok(n) => Ok(n),
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Err(ErrorCode::Timeout),
        Err(_) => Err(ErrorCode::ReadFailed),
    }
}
