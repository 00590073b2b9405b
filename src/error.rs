//! Error types for the entry guard

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EntryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sensor error: {0}")]
    Sensor(String),

    #[error("Actuator error: {0}")]
    Actuator(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Connection closed mid-frame while reading {0}")]
    Truncated(&'static str),

    #[error("Frame field {field} too large: {len} bytes (max {max})")]
    FrameTooLarge {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EntryError {
    /// True for errors that end a transport session rather than the process.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            EntryError::MalformedFrame(_) | EntryError::Truncated(_) | EntryError::FrameTooLarge { .. }
        )
    }
}
