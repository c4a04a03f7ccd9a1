//! Error taxonomy for the emulator core, grouped by the failure kinds in
//! the design's error-handling section rather than by module. Guest-visible
//! failures (`GuestIoError`, `GuestFault`) are small, `Copy` where possible,
//! and never carry a backtrace: they cross the port-trap ABI into guest
//! register state, not up a Rust call stack.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address `{0}`: expected PORT, HOST:PORT, [IPv6]:PORT or HOST")]
    InvalidListenAddress(String),
    #[error("invalid disk spec `{0}`: expected LETTER:PATH")]
    InvalidDiskSpec(String),
    #[error("drive letter `{0}` out of range A..P")]
    DriveOutOfRange(char),
    #[error("could not read host key `{path}`: {source}")]
    HostKey { path: String, #[source] source: io::Error },
    #[error("host key `{0}` is not valid PEM or DER")]
    InvalidHostKey(String),
    #[error("could not read authorized keys `{path}`: {source}")]
    AuthorizedKeys { path: String, #[source] source: io::Error },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GuestIoError {
    #[error("no such drive")]
    NoSuchDrive,
    #[error("short disk i/o")]
    IoShort,
}

impl GuestIoError {
    /// The non-zero value XIOS returns in the A register for this failure.
    pub fn guest_code(self) -> u8 {
        match self {
            GuestIoError::NoSuchDrive => 0xff,
            GuestIoError::IoShort => 0x01,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unimplemented opcode {op:#04x} at pc={pc:#06x}")]
pub struct GuestFault {
    pub pc: u16,
    pub op: u8,
}

#[derive(Debug, Error)]
pub enum ImageFormatError {
    #[error("sysdat truncated: need 256 bytes, got {0}")]
    SysdatTruncated(usize),
    #[error("segment `{name}` header truncated")]
    SegmentTruncated { name: String },
    #[error("segment `{name}` relocation bitmap shorter than its code")]
    BitmapTooShort { name: String },
    #[error("image `{path}` too short to contain a boot sector")]
    ImageTooShort { path: String },
}

#[derive(Debug, Error)]
pub enum HostTransportError {
    #[error("ssh handshake failed: {0}")]
    Handshake(String),
    #[error("ssh channel error: {0}")]
    Channel(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    #[error("bridge wait timed out")]
    Timeout,
}
