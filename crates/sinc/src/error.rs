use sinc_proto::ErrorCode;
use thiserror::Error;

/// An error code plus its human-readable message.
///
/// Every code carries a stock message; operations that know more install a
/// more specific one. This is both the `Err` payload of fallible calls and
/// the value stored in a connection's read/write error slots.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct SincError {
    pub code: ErrorCode,
    pub message: String,
}

impl SincError {
    pub fn new(code: ErrorCode) -> Self {
        Self { code, message: code.default_message().to_owned() }
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    #[inline]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::Timeout
    }
}

impl Default for SincError {
    fn default() -> Self {
        Self::new(ErrorCode::NoError)
    }
}

impl From<ErrorCode> for SincError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

/// Which half of the duplex wrote an error slot most recently.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum ErrorHalf {
    #[default]
    Read,
    Write,
}

pub type SincResult<T> = Result<T, SincError>;
