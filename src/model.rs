//! Core data model for a single entry attempt

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Display name used for unrecognised subjects
pub const UNKNOWN_NAME: &str = "Unknown";

/// Pixel encoding of an [`Image`] buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageEncoding {
    Jpeg,
    Raw,
}

/// Captured frame. Moved from capture to classification to recording and
/// dropped at the end of the attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub encoding: ImageEncoding,
    pub data: Vec<u8>,
}

impl Image {
    pub fn jpeg(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            encoding: ImageEncoding::Jpeg,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Face bounding box in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

/// Who the classifier decided the subject is
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub fn name(&self) -> &str {
        match self {
            Identity::Known(name) => name,
            Identity::Unknown => UNKNOWN_NAME,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known(_))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of an access decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessStatus {
    Granted,
    Denied,
}

impl AccessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessStatus::Granted => "GRANTED",
            AccessStatus::Denied => "DENIED",
        }
    }
}

impl std::fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One access decision. Immutable once built; `granted` is derived from the
/// identity, including when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DecisionRecord")]
pub struct Decision {
    identity: Identity,
    confidence: f32,
    granted: bool,
    timestamp: DateTime<Local>,
}

impl Decision {
    /// Build a decision for `identity`. Unknown subjects always get zero
    /// confidence.
    pub fn new(identity: Identity, confidence: f32, timestamp: DateTime<Local>) -> Self {
        let granted = identity.is_known();
        let confidence = if granted {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            identity,
            confidence,
            granted,
            timestamp,
        }
    }

    pub fn granted(name: impl Into<String>, confidence: f32, timestamp: DateTime<Local>) -> Self {
        Self::new(Identity::Known(name.into()), confidence, timestamp)
    }

    pub fn denied(timestamp: DateTime<Local>) -> Self {
        Self::new(Identity::Unknown, 0.0, timestamp)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn is_granted(&self) -> bool {
        self.granted
    }

    pub fn status(&self) -> AccessStatus {
        if self.granted {
            AccessStatus::Granted
        } else {
            AccessStatus::Denied
        }
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }
}

#[derive(Deserialize)]
struct DecisionRecord {
    identity: Identity,
    confidence: f32,
    granted: bool,
    timestamp: DateTime<Local>,
}

impl TryFrom<DecisionRecord> for Decision {
    type Error = String;

    fn try_from(record: DecisionRecord) -> Result<Self, Self::Error> {
        if record.granted != record.identity.is_known() {
            return Err(format!(
                "granted={} does not match identity {}",
                record.granted, record.identity
            ));
        }
        Ok(Decision::new(record.identity, record.confidence, record.timestamp))
    }
}

/// Unit persisted locally and transmitted to the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct EntryEvent {
    pub decision: Decision,
    pub image: Option<PathBuf>,
}
