//! Waiting across several device connections at once.

use sinc_proto::{ErrorCode, MessageType};

use crate::error::SincResult;
use crate::sinc::Sinc;
use crate::socket;

/// Find the next packet across a set of connections.
///
/// Returns the index of the connection with a packet and the packet's type,
/// leaving the packet buffered on that connection. Connections with a
/// complete packet already buffered win immediately; otherwise all
/// connections are guarded and their descriptors (TCP plus UDP where open)
/// are waited on jointly. A connection already waiting elsewhere fails the
/// whole call with `MultipleThreadWait` before anything is touched.
pub fn peek_multi(
    connections: &mut [&mut Sinc],
    timeout_ms: i32,
) -> SincResult<(usize, MessageType)> {
    // Fast path: a packet may already be sitting in a read buffer.
    for (index, conn) in connections.iter().enumerate() {
        if let Some(msg_type) = conn.peek_buffered() {
            return Ok((index, msg_type));
        }
    }

    // Flatten the descriptors, remembering which connection each belongs to.
    let mut fds = Vec::with_capacity(connections.len() * 2);
    let mut fd_owner = Vec::with_capacity(connections.len() * 2);
    for (index, conn) in connections.iter().enumerate() {
        let Some(conn_fds) = conn.poll_fds() else {
            return Err(connections[index].read_fail(ErrorCode::NotConnected));
        };
        for fd in conn_fds {
            fds.push(fd);
            fd_owner.push(index);
        }
    }

    loop {
        // All guards or none: bail before touching anything if one of the
        // connections is already waiting on another thread.
        for index in 0..connections.len() {
            if connections[index].in_socket_wait {
                return Err(connections[index].read_fail(ErrorCode::MultipleThreadWait));
            }
        }
        for conn in connections.iter_mut() {
            conn.in_socket_wait = true;
        }

        let result = socket::wait(&fds, timeout_ms);

        for conn in connections.iter_mut() {
            conn.in_socket_wait = false;
        }

        let ready = match result {
            Ok(ready) => ready,
            Err(code) => return Err(connections[0].read_fail(code)),
        };

        // Poll each readable connection; the first complete packet wins. A
        // poll that comes up empty (the bytes didn't finish a packet) is not
        // an error, another descriptor may still deliver.
        for (slot, is_ready) in ready.iter().enumerate() {
            if !is_ready {
                continue;
            }
            let index = fd_owner[slot];
            match connections[index].peek_packet(0) {
                Ok(msg_type) => return Ok((index, msg_type)),
                Err(err) if err.code() == ErrorCode::Timeout => {}
                Err(err) => return Err(err),
            }
        }
    }
}
