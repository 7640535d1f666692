//! Error codes surfaced by the system to the front-end.
//!
//! Peripheral-private failures travel through [`Error::User`] and are
//! opaque to the core.

use thiserror::Error;

/// The `Error` type.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Library/front-end version mismatch.
    #[error("invalid version")]
    InvalidVersion,
    /// Host layout is incompatible with the register file.
    #[error("invalid register size or packing")]
    InvalidRegisterPacking,
    /// A peripheral requested a clean shutdown.
    #[error("user requested termination")]
    UserTermination,
    /// No interrupt controller is installed.
    #[error("could not find interrupt controller")]
    NoPic,
    /// No DMA controller is installed.
    #[error("could not find dma controller")]
    NoDma,
    /// Peripheral-private error code.
    #[error("user error {0}")]
    User(u32),
}
