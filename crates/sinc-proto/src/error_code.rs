/// Protocol error codes, shared by the transport layer and the device.
///
/// The numeric values are part of the wire protocol: the device reports them
/// inside the nested success record of most replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration, strum::FromRepr)]
#[repr(i32)]
pub enum ErrorCode {
    NoError = 0,
    OutOfMemory = 1,
    Unimplemented = 2,
    NotFound = 3,
    BadParameters = 4,
    HostNotFound = 5,
    OutOfResources = 6,
    ConnectionFailed = 7,
    ReadFailed = 8,
    WriteFailed = 9,
    CommandFailed = 10,
    SocketClosedUnexpectedly = 11,
    Timeout = 12,
    HostUnreachable = 13,
    AuthorizationFailed = 14,
    DeviceError = 15,
    InvalidRequest = 16,
    NonGatedHistogramDisabled = 17,
    MultipleThreadWait = 18,
    NotConnected = 19,
}

impl ErrorCode {
    /// The stock human-readable message for this code. Every defined code has
    /// one; callers may override it with a more specific message.
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorCode::NoError => "no error",
            ErrorCode::OutOfMemory => "out of memory",
            ErrorCode::Unimplemented => "unimplemented",
            ErrorCode::NotFound => "not found",
            ErrorCode::BadParameters => "bad parameters",
            ErrorCode::HostNotFound => "host not found",
            ErrorCode::OutOfResources => "out of resources",
            ErrorCode::ConnectionFailed => "connection failed",
            ErrorCode::ReadFailed => "read failed",
            ErrorCode::WriteFailed => "write failed",
            ErrorCode::CommandFailed => "command failed",
            ErrorCode::SocketClosedUnexpectedly => "socket closed unexpectedly",
            ErrorCode::Timeout => "timed out",
            ErrorCode::HostUnreachable => "host unreachable",
            ErrorCode::AuthorizationFailed => "authorization failed",
            ErrorCode::DeviceError => "device error",
            ErrorCode::InvalidRequest => "invalid request",
            ErrorCode::NonGatedHistogramDisabled => "non-gated histogram disabled",
            ErrorCode::MultipleThreadWait => "multiple threads waiting on one connection",
            ErrorCode::NotConnected => "not connected",
        }
    }

    /// Recover a code from a device-reported integer. Values outside the
    /// known range collapse to [`ErrorCode::DeviceError`].
    pub fn from_protocol(value: i32) -> Self {
        Self::from_repr(value).unwrap_or(ErrorCode::DeviceError)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.default_message())
    }
}
