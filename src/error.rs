// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
use core::fmt;

use uefi::Status;

/// Everything that can go wrong while preparing the legacy video shim.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShimError {
    /// Neither GOP nor UGA Draw is present.
    NoAdapterFound,
    InvalidParameter,
    /// Pixel layout or address the emulated mode cannot describe.
    Unsupported,
    /// A lock mechanism ran but the probe disagreed with it.
    DeviceError,
    /// No lock mechanism reached the requested state.
    NotReady,
    BadBufferSize,
    NotFound,
    Firmware(Status),
}

pub type Result<T> = core::result::Result<T, ShimError>;

impl ShimError {
    pub fn status(self) -> Status {
        match self {
            ShimError::NoAdapterFound => Status::NOT_FOUND,
            ShimError::InvalidParameter => Status::INVALID_PARAMETER,
            ShimError::Unsupported => Status::UNSUPPORTED,
            ShimError::DeviceError => Status::DEVICE_ERROR,
            ShimError::NotReady => Status::NOT_READY,
            ShimError::BadBufferSize => Status::BAD_BUFFER_SIZE,
            ShimError::NotFound => Status::NOT_FOUND,
            ShimError::Firmware(s) => s,
        }
    }

    /// Lock/unlock failures degrade to best effort instead of aborting.
    pub fn is_recoverable(self) -> bool {
        matches!(self, ShimError::DeviceError | ShimError::NotReady)
    }
}

impl fmt::Display for ShimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShimError::NoAdapterFound => f.write_str("no display adapter found"),
            ShimError::InvalidParameter => f.write_str("invalid parameter"),
            ShimError::Unsupported => f.write_str("unsupported"),
            ShimError::DeviceError => f.write_str("device error"),
            ShimError::NotReady => f.write_str("not ready"),
            ShimError::BadBufferSize => f.write_str("bad buffer size"),
            ShimError::NotFound => f.write_str("not found"),
            ShimError::Firmware(s) => write!(f, "firmware error {:?}", s),
        }
    }
}

impl From<ShimError> for Status {
    fn from(e: ShimError) -> Self {
        e.status()
    }
}

impl<D: fmt::Debug> From<uefi::Error<D>> for ShimError {
    fn from(e: uefi::Error<D>) -> Self {
        match e.status() {
            Status::NOT_FOUND => ShimError::NotFound,
            Status::UNSUPPORTED => ShimError::Unsupported,
            Status::INVALID_PARAMETER => ShimError::InvalidParameter,
            s => ShimError::Firmware(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_firmware_status() {
        assert_eq!(Status::from(ShimError::NotReady), Status::NOT_READY);
        assert_eq!(Status::from(ShimError::NoAdapterFound), Status::NOT_FOUND);
        assert_eq!(
            ShimError::Firmware(Status::ACCESS_DENIED).status(),
            Status::ACCESS_DENIED
        );
    }

    #[test]
    fn only_lock_failures_are_recoverable() {
        assert!(ShimError::NotReady.is_recoverable());
        assert!(ShimError::DeviceError.is_recoverable());
        assert!(!ShimError::Unsupported.is_recoverable());
        assert!(!ShimError::NoAdapterFound.is_recoverable());
    }

    #[test]
    fn converts_uefi_errors() {
        let e: ShimError = uefi::Error::from(Status::NOT_FOUND).into();
        assert_eq!(e, ShimError::NotFound);
        let e: ShimError = uefi::Error::from(Status::TIMEOUT).into();
        assert_eq!(e, ShimError::Firmware(Status::TIMEOUT));
    }
}
