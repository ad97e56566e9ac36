//! Crate-wide error types.
//!
//! One `thiserror` enum per subsystem, matching the taxonomy in the design
//! doc (§7): `ConfigError`, `ManifestError`, `FilterNotFoundError`,
//! `SourceError`, `ControlError`. `BinSimError` composes them for callers
//! that cross subsystem boundaries (e.g. `Engine::new`).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`BinSimError`].
pub type Result<T> = std::result::Result<T, BinSimError>;

/// Errors raised while reading and validating the `key value` config file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not open config file {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("malformed line in config file: {0:?}")]
    MalformedLine(String),
}

/// Errors raised while loading the filter manifest and its impulse responses.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("could not open manifest file {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("malformed manifest line: {0:?}")]
    MalformedLine(String),

    #[error("impulse response file {0} has {1} samples per ear, expected a non-zero multiple of block size {2}")]
    BadLength(PathBuf, usize, usize),

    #[error("impulse responses in manifest have mismatched lengths: {first} ({first_len} blocks) vs {other} ({other_len} blocks)")]
    LengthMismatch {
        first: PathBuf,
        first_len: usize,
        other: PathBuf,
        other_len: usize,
    },

    #[error("failed to decode impulse response {0}: {1}")]
    Decode(PathBuf, #[source] SourceError),
}

/// Raised at runtime when a pose has no matching entry in the filter table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no filter registered for key {0:?}")]
pub struct FilterNotFoundError(pub Vec<i32>);

/// Errors raised by the sound-file loader thread.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("could not open audio file {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("could not decode audio file {0}: {1}")]
    Decode(PathBuf, String),

    #[error("sample rate mismatch for {path}: file is {file_rate} Hz, engine is running at {engine_rate} Hz")]
    SampleRateMismatch {
        path: PathBuf,
        file_rate: u32,
        engine_rate: u32,
    },
}

/// Errors raised while decoding control messages off the wire.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("failed to decode OSC packet: {0}")]
    Decode(String),

    #[error("unrecognized OSC address: {0}")]
    UnknownAddress(String),

    #[error("wrong argument count or type for {address}: {detail}")]
    BadArguments { address: String, detail: String },
}

/// Top-level error type, used for startup failures that abort before any
/// audio starts.
#[derive(Error, Debug)]
pub enum BinSimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("no audio output device available")]
    NoOutputDevice,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
