//! Status codes of the SDK, surfaced as a single error enum.
//!
//! Task operations report failure through the `Err` arm of their future's
//! output rather than by panicking; the only "framework bug" signals are
//! [`Error::Empty`] (a consumed or never-filled awaitable) and
//! [`Error::Unexpected`].

use doca_async_sys::ffi;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("unknown failure")]
    Unknown,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("resource already in use")]
    InUse,
    #[error("operation not supported")]
    NotSupported,
    #[error("temporarily out of resources")]
    Again,
    #[error("invalid argument")]
    InvalidValue,
    #[error("out of memory")]
    NoMemory,
    #[error("initialization failed")]
    Initialization,
    #[error("shutting down")]
    Shutdown,
    #[error("connection reset")]
    ConnectionReset,
    #[error("connection aborted")]
    ConnectionAborted,
    #[error("connection establishment in progress")]
    ConnectionInProgress,
    #[error("not connected")]
    NotConnected,
    #[error("driver failure")]
    Driver,
    #[error("operating system failure")]
    OperatingSystem,
    #[error("operation not allowed in the current state")]
    BadState,
    #[error("unsupported version")]
    UnsupportedVersion,
    #[error("no space left")]
    Full,
    #[error("no entry available")]
    Empty,
    #[error("operation in progress")]
    InProgress,
    #[error("payload too big")]
    TooBig,
    #[error("not found")]
    NotFound,
    #[error("io failure")]
    IoFailed,
    #[error("unexpected failure")]
    Unexpected,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn from_raw(code: ffi::doca_error_t) -> Error {
        match code {
            ffi::DOCA_ERROR_NOT_PERMITTED => Error::NotPermitted,
            ffi::DOCA_ERROR_IN_USE => Error::InUse,
            ffi::DOCA_ERROR_NOT_SUPPORTED => Error::NotSupported,
            ffi::DOCA_ERROR_AGAIN => Error::Again,
            ffi::DOCA_ERROR_INVALID_VALUE => Error::InvalidValue,
            ffi::DOCA_ERROR_NO_MEMORY => Error::NoMemory,
            ffi::DOCA_ERROR_INITIALIZATION => Error::Initialization,
            ffi::DOCA_ERROR_SHUTDOWN => Error::Shutdown,
            ffi::DOCA_ERROR_CONNECTION_RESET => Error::ConnectionReset,
            ffi::DOCA_ERROR_CONNECTION_ABORTED => Error::ConnectionAborted,
            ffi::DOCA_ERROR_CONNECTION_INPROGRESS => Error::ConnectionInProgress,
            ffi::DOCA_ERROR_NOT_CONNECTED => Error::NotConnected,
            ffi::DOCA_ERROR_DRIVER => Error::Driver,
            ffi::DOCA_ERROR_OPERATING_SYSTEM => Error::OperatingSystem,
            ffi::DOCA_ERROR_BAD_STATE => Error::BadState,
            ffi::DOCA_ERROR_UNSUPPORTED_VERSION => Error::UnsupportedVersion,
            ffi::DOCA_ERROR_FULL => Error::Full,
            ffi::DOCA_ERROR_EMPTY => Error::Empty,
            ffi::DOCA_ERROR_IN_PROGRESS => Error::InProgress,
            ffi::DOCA_ERROR_TOO_BIG => Error::TooBig,
            ffi::DOCA_ERROR_NOT_FOUND => Error::NotFound,
            ffi::DOCA_ERROR_IO_FAILED => Error::IoFailed,
            ffi::DOCA_ERROR_UNEXPECTED => Error::Unexpected,
            _ => Error::Unknown,
        }
    }
}

/// Maps an SDK return code onto `Result`.
pub(crate) fn check(code: ffi::doca_error_t) -> Result<()> {
    if code == ffi::DOCA_SUCCESS {
        Ok(())
    } else {
        Err(Error::from_raw(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_codes_round_trip() {
        assert_eq!(Error::from_raw(ffi::DOCA_ERROR_AGAIN), Error::Again);
        assert_eq!(
            Error::from_raw(ffi::DOCA_ERROR_NOT_CONNECTED),
            Error::NotConnected
        );
        assert_eq!(Error::from_raw(-12345), Error::Unknown);
    }

    #[test]
    fn check_passes_success_through() {
        assert!(check(ffi::DOCA_SUCCESS).is_ok());
        assert_eq!(check(ffi::DOCA_ERROR_BAD_STATE), Err(Error::BadState));
    }
}
