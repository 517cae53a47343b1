//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::warn;

use crate::packet::DecodeError;
use crate::sadb::Spi;

/// The error taxonomy of the HIP/AH core (see the protocol's error
/// handling design). Every variant here is either handled locally by its
/// owning component (logged and counted, never panics, never partially
/// mutates caller state) or crosses a component boundary explicitly
/// (`BexFailed`, `SaExhausted`) rather than via panics or exceptions.
#[derive(Debug)]
pub enum Error {
    /// Structural parse failure on a control or AH packet.
    MalformedPacket(DecodeError),
    /// ICV, HMAC, or signature verification mismatch. The taxonomy
    /// deliberately does not distinguish which cryptographic stage
    /// failed once it reaches the caller, so that failure never leaks
    /// on the wire or in a reply.
    AuthFailure,
    /// AH sequence number outside the replay window, or already seen.
    ReplayDetected { spi: Spi, seq: u32 },
    /// AH packet whose SPI has no matching inbound SA.
    UnknownSpi(Spi),
    /// I2's puzzle solution does not satisfy the K-bit constraint.
    PuzzleFailed,
    /// All BEX retransmissions for a peer were exhausted.
    BexFailed,
    /// An outbound SA's sequence-number space has been fully consumed.
    SaExhausted,
    /// I/O errors talking to the bridge or backbone duplex.
    Io(IoError),
}

/// I/O errors, kept distinct from protocol errors so they can be logged
/// with their source chain (matches the convention of every holo
/// protocol crate, which carries an `IoError` alongside `Error`).
#[derive(Debug)]
pub enum IoError {
    BackboneSocket(std::io::Error),
    BackboneRecv(std::io::Error),
    BackboneSend(std::io::Error),
    BridgeDevice(std::io::Error),
    BridgeRecv(std::io::Error),
    BridgeSend(std::io::Error),
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::MalformedPacket(decode_error) => {
                warn!(error = %decode_error, "{}", self);
            }
            Error::AuthFailure => {
                warn!("{}", self);
            }
            Error::ReplayDetected { spi, seq } => {
                warn!(%spi, %seq, "{}", self);
            }
            Error::UnknownSpi(spi) => {
                warn!(%spi, "{}", self);
            }
            Error::PuzzleFailed => {
                warn!("{}", self);
            }
            Error::BexFailed => {
                warn!("{}", self);
            }
            Error::SaExhausted => {
                warn!("{}", self);
            }
            Error::Io(io_error) => {
                io_error.log();
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::MalformedPacket(..) => write!(f, "malformed packet"),
            Error::AuthFailure => write!(f, "failed to authenticate packet"),
            Error::ReplayDetected { .. } => {
                write!(f, "replayed or out-of-window sequence number")
            }
            Error::UnknownSpi(..) => {
                write!(f, "AH packet references unknown SPI")
            }
            Error::PuzzleFailed => {
                write!(f, "puzzle solution does not satisfy the difficulty")
            }
            Error::BexFailed => {
                write!(f, "base exchange retransmissions exhausted")
            }
            Error::SaExhausted => {
                write!(f, "outbound SA sequence-number space exhausted")
            }
            Error::Io(..) => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::MalformedPacket(error) => Some(error),
            Error::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(error: DecodeError) -> Error {
        Error::MalformedPacket(error)
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::Io(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub fn log(&self) {
        match self {
            IoError::BackboneSocket(error)
            | IoError::BackboneRecv(error)
            | IoError::BackboneSend(error)
            | IoError::BridgeDevice(error)
            | IoError::BridgeRecv(error)
            | IoError::BridgeSend(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::BackboneSocket(..) => {
                write!(f, "failed to create backbone socket")
            }
            IoError::BackboneRecv(..) => {
                write!(f, "failed to receive backbone datagram")
            }
            IoError::BackboneSend(..) => {
                write!(f, "failed to send backbone datagram")
            }
            IoError::BridgeDevice(..) => {
                write!(f, "failed to open bridge device")
            }
            IoError::BridgeRecv(..) => {
                write!(f, "failed to receive bridge frame")
            }
            IoError::BridgeSend(..) => {
                write!(f, "failed to send bridge frame")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::BackboneSocket(error)
            | IoError::BackboneRecv(error)
            | IoError::BackboneSend(error)
            | IoError::BridgeDevice(error)
            | IoError::BridgeRecv(error)
            | IoError::BridgeSend(error) => Some(error),
        }
    }
}

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}

/// Startup-only configuration errors. Kept separate from the runtime
/// `Error` taxonomy because a `ConfigError` aborts the process rather
/// than being handled per-packet.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    MissingPeer(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(error) => write!(f, "I/O error: {error}"),
            ConfigError::Parse(msg) => write!(f, "parse error: {msg}"),
            ConfigError::MissingPeer(name) => {
                write!(f, "no such configured peer: {name}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(error: std::io::Error) -> ConfigError {
        ConfigError::Io(error)
    }
}
