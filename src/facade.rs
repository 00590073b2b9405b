//! Hardware and recognition facades
//!
//! The controller only ever talks to these traits. Real GPIO, camera and
//! recognition backends live outside this crate; [`crate::sim`] provides
//! in-memory implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::{Image, Rect};
use crate::Result;

/// Status indicator LEDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Green,
    Red,
}

/// Buzzer pulse train played with one indicator lit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalPattern {
    pub indicator: Indicator,
    pub pulses: u32,
    pub on: Duration,
    pub off: Duration,
}

impl SignalPattern {
    /// Three short chirps with the green LED.
    pub const GRANTED: SignalPattern = SignalPattern {
        indicator: Indicator::Green,
        pulses: 3,
        on: Duration::from_millis(150),
        off: Duration::from_millis(150),
    };

    /// Ten rapid pulses with the red LED.
    pub const DENIED: SignalPattern = SignalPattern {
        indicator: Indicator::Red,
        pulses: 10,
        on: Duration::from_millis(30),
        off: Duration::from_millis(50),
    };

    /// Wall time the pattern takes to play
    pub fn duration(&self) -> Duration {
        (self.on + self.off) * self.pulses
    }
}

/// Lock motor and indicators
#[async_trait]
pub trait Actuator: Send {
    /// Drive the lock to the closed angle
    async fn lock(&mut self) -> Result<()>;

    /// Drive the lock to the open angle
    async fn unlock(&mut self) -> Result<()>;

    /// Play a buzzer/LED pattern
    async fn signal(&mut self, pattern: &SignalPattern) -> Result<()>;

    async fn signal_granted(&mut self) -> Result<()> {
        self.signal(&SignalPattern::GRANTED).await
    }

    async fn signal_denied(&mut self) -> Result<()> {
        self.signal(&SignalPattern::DENIED).await
    }
}

/// Motion sensor and camera
#[async_trait]
pub trait Sensor: Send {
    async fn motion_detected(&mut self) -> Result<bool>;

    /// Power the camera up. Called lazily at the start of an attempt.
    async fn activate(&mut self) -> Result<()>;

    async fn capture_frame(&mut self) -> Result<Image>;

    /// Power the camera down (low-power idle).
    async fn deactivate(&mut self) -> Result<()>;
}

/// Closest enrolled identity for a detected face
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub name: String,
    pub distance: f32,
}

/// Result of running recognition on one frame
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// No face found in the frame
    NoFace,
    /// A face, with its best candidate if any identities are enrolled
    Face {
        candidate: Option<Candidate>,
        bounding_box: Option<Rect>,
    },
}

/// Face recognition backend
#[async_trait]
pub trait Classifier: Send {
    async fn classify(&mut self, image: &Image) -> Result<Classification>;
}
