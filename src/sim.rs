//! In-memory facades for bench runs and tests
//!
//! Each simulator is `Clone` and shares its state between clones, so a test
//! can hand one clone to the controller and inspect the other.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::embeddings::{FaceEncoder, FaceEncoding};
use crate::facade::{Actuator, Candidate, Classification, Classifier, Indicator, SignalPattern, Sensor};
use crate::model::{Image, Rect};
use crate::{EntryError, Result};

#[derive(Debug, Default)]
struct SensorState {
    scripted_motion: VecDeque<bool>,
    motion_every: Option<u64>,
    polls: u64,
    active: bool,
    activations: u32,
    deactivations: u32,
    captures: u32,
    fail_capture: bool,
}

/// Simulated PIR sensor and camera
#[derive(Clone)]
pub struct SimSensor {
    state: Arc<Mutex<SensorState>>,
    frame: Image,
}

impl SimSensor {
    pub fn new(frame: Image) -> Self {
        Self {
            state: Arc::new(Mutex::new(SensorState::default())),
            frame,
        }
    }

    /// Report motion on every `n`th poll once the script is exhausted.
    pub fn with_motion_every(self, n: u64) -> Self {
        self.state.lock().motion_every = Some(n.max(1));
        self
    }

    /// Queue readings returned by the next polls.
    pub fn script_motion(&self, readings: impl IntoIterator<Item = bool>) {
        self.state.lock().scripted_motion.extend(readings);
    }

    pub fn fail_captures(&self, fail: bool) {
        self.state.lock().fail_capture = fail;
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn activations(&self) -> u32 {
        self.state.lock().activations
    }

    pub fn deactivations(&self) -> u32 {
        self.state.lock().deactivations
    }

    pub fn captures(&self) -> u32 {
        self.state.lock().captures
    }
}

#[async_trait]
impl Sensor for SimSensor {
    async fn motion_detected(&mut self) -> Result<bool> {
        let mut state = self.state.lock();
        state.polls += 1;
        if let Some(reading) = state.scripted_motion.pop_front() {
            return Ok(reading);
        }
        Ok(matches!(state.motion_every, Some(n) if state.polls % n == 0))
    }

    async fn activate(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.active = true;
        state.activations += 1;
        Ok(())
    }

    async fn capture_frame(&mut self) -> Result<Image> {
        let mut state = self.state.lock();
        if !state.active {
            return Err(EntryError::Sensor("camera not active".into()));
        }
        if state.fail_capture {
            return Err(EntryError::Sensor("camera busy".into()));
        }
        state.captures += 1;
        Ok(self.frame.clone())
    }

    async fn deactivate(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.active = false;
        state.deactivations += 1;
        Ok(())
    }
}

/// One observed actuator command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCall {
    Lock,
    Unlock,
    Signal { indicator: Indicator, pulses: u32 },
}

#[derive(Debug)]
struct ActuatorState {
    calls: Vec<ActuatorCall>,
    angle: u16,
    fail_unlock: bool,
    fail_signal: bool,
}

/// Simulated servo lock, LEDs and buzzer
#[derive(Clone)]
pub struct SimActuator {
    state: Arc<Mutex<ActuatorState>>,
    closed_angle: u16,
    open_angle: u16,
    play_patterns: bool,
}

impl SimActuator {
    /// Starts at `open_angle` so a missing startup lock is visible.
    pub fn new(closed_angle: u16, open_angle: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(ActuatorState {
                calls: Vec::new(),
                angle: open_angle,
                fail_unlock: false,
                fail_signal: false,
            })),
            closed_angle,
            open_angle,
            play_patterns: true,
        }
    }

    /// Skip the pulse timing of signal patterns.
    pub fn without_delays(mut self) -> Self {
        self.play_patterns = false;
        self
    }

    pub fn fail_unlock(&self, fail: bool) {
        self.state.lock().fail_unlock = fail;
    }

    pub fn fail_signal(&self, fail: bool) {
        self.state.lock().fail_signal = fail;
    }

    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.state.lock().calls.clone()
    }

    pub fn angle(&self) -> u16 {
        self.state.lock().angle
    }

    pub fn is_locked(&self) -> bool {
        self.angle() == self.closed_angle
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

#[async_trait]
impl Actuator for SimActuator {
    async fn lock(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(ActuatorCall::Lock);
        state.angle = self.closed_angle;
        tracing::debug!(angle = self.closed_angle, "Lock closed");
        Ok(())
    }

    async fn unlock(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(ActuatorCall::Unlock);
        if state.fail_unlock {
            return Err(EntryError::Actuator("servo did not respond".into()));
        }
        state.angle = self.open_angle;
        tracing::debug!(angle = self.open_angle, "Lock opened");
        Ok(())
    }

    async fn signal(&mut self, pattern: &SignalPattern) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.calls.push(ActuatorCall::Signal {
                indicator: pattern.indicator,
                pulses: pattern.pulses,
            });
            if state.fail_signal {
                return Err(EntryError::Actuator("buzzer driver error".into()));
            }
        }
        if self.play_patterns {
            tokio::time::sleep(pattern.duration()).await;
        }
        Ok(())
    }
}

/// One scripted classifier response
#[derive(Debug, Clone, PartialEq)]
pub enum Scripted {
    NoFace,
    Unrecognised,
    Match { name: String, distance: f32 },
    Error(String),
}

impl Scripted {
    pub fn matched(name: impl Into<String>, distance: f32) -> Self {
        Scripted::Match {
            name: name.into(),
            distance,
        }
    }
}

/// Classifier returning queued responses; `NoFace` once the queue is empty
#[derive(Clone, Default)]
pub struct ScriptedClassifier {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    calls: Arc<Mutex<u32>>,
}

impl ScriptedClassifier {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            calls: Arc::default(),
        }
    }

    pub fn push(&self, response: Scripted) {
        self.script.lock().push_back(response);
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock()
    }
}

const SIM_FACE: Rect = Rect {
    top: 40,
    right: 120,
    bottom: 120,
    left: 40,
};

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&mut self, _image: &Image) -> Result<Classification> {
        *self.calls.lock() += 1;
        let next = self.script.lock().pop_front().unwrap_or(Scripted::NoFace);
        match next {
            Scripted::NoFace => Ok(Classification::NoFace),
            Scripted::Unrecognised => Ok(Classification::Face {
                candidate: None,
                bounding_box: Some(SIM_FACE),
            }),
            Scripted::Match { name, distance } => Ok(Classification::Face {
                candidate: Some(Candidate { name, distance }),
                bounding_box: Some(SIM_FACE),
            }),
            Scripted::Error(message) => Err(EntryError::Classifier(message)),
        }
    }
}

/// Encoder that reports the same faces for every frame
#[derive(Debug, Clone, Default)]
pub struct StaticEncoder {
    faces: Vec<FaceEncoding>,
}

impl StaticEncoder {
    pub fn new(faces: Vec<FaceEncoding>) -> Self {
        Self { faces }
    }

    /// One face at a fixed box with the given embedding
    pub fn single(embedding: Vec<f32>) -> Self {
        Self::new(vec![FaceEncoding {
            embedding,
            bounding_box: SIM_FACE,
        }])
    }
}

#[async_trait]
impl FaceEncoder for StaticEncoder {
    async fn encode(&mut self, _image: &Image) -> Result<Vec<FaceEncoding>> {
        Ok(self.faces.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sensor_script_then_period() {
        let mut sensor = SimSensor::new(Image::jpeg(1, 1, vec![0])).with_motion_every(2);
        sensor.script_motion([true, true]);
        let mut readings = Vec::new();
        for _ in 0..5 {
            readings.push(sensor.motion_detected().await.unwrap());
        }
        // polls 3..5 fall back to "every 2nd poll"
        assert_eq!(readings, vec![true, true, false, true, false]);
    }

    #[tokio::test]
    async fn test_capture_requires_activation() {
        let mut sensor = SimSensor::new(Image::jpeg(1, 1, vec![0]));
        assert!(sensor.capture_frame().await.is_err());
        sensor.activate().await.unwrap();
        assert!(sensor.capture_frame().await.is_ok());
        sensor.deactivate().await.unwrap();
        assert!(!sensor.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_actuator_tracks_angle() {
        let mut actuator = SimActuator::new(180, 90);
        assert!(!actuator.is_locked());
        actuator.lock().await.unwrap();
        assert!(actuator.is_locked());
        actuator.unlock().await.unwrap();
        assert_eq!(actuator.angle(), 90);
        actuator.signal_denied().await.unwrap();
        assert_eq!(
            actuator.calls().last(),
            Some(&ActuatorCall::Signal {
                indicator: Indicator::Red,
                pulses: 10
            })
        );
    }

    #[tokio::test]
    async fn test_classifier_defaults_to_no_face() {
        let mut classifier = ScriptedClassifier::new([Scripted::matched("alice", 0.2)]);
        let image = Image::jpeg(1, 1, vec![0]);
        assert!(matches!(
            classifier.classify(&image).await.unwrap(),
            Classification::Face { candidate: Some(_), .. }
        ));
        assert_eq!(classifier.classify(&image).await.unwrap(), Classification::NoFace);
        assert_eq!(classifier.calls(), 2);
    }
}
