//! Wire message schema for the SINC instrument protocol.
//!
//! This crate is the protocol's vocabulary and nothing else: the
//! [`MessageType`] byte that rides in every framed packet header, the
//! [`ErrorCode`] enumeration shared by the transport and the device, and the
//! protobuf message bodies. Framing, sockets and the request/reply engine
//! live in the `sinc` crate.

mod error_code;
mod message_type;
mod messages;

pub use error_code::ErrorCode;
pub use message_type::MessageType;
pub use messages::*;

/// Default TCP port the instrument listens on.
pub const SINC_PORT: u16 = 8756;
