//! Error types shared by the codec, transformer and fan controller.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Requested fan intensity outside 0..=255 (or not a number)
    #[error("Intensity {0} is outside the range 0..=255")]
    InvalidIntensity(f64),

    /// Level outside 0..=63, only reachable through a corrupted message
    #[error("Level {0} is outside the range 0..=63")]
    LevelOutOfRange(u32),

    /// Symbol outside the 4-tone alphabet
    #[error("Symbol {0} is not one of 0, 1, 2, 3")]
    InvalidSymbol(u8),

    /// The configured end-of-print marker does not occur in the input
    #[error("End marker {0:?} not found in the input, refusing to write any output")]
    EndMarkerNotFound(String),

    /// Intake datagram that is not a known message
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
