//! Access-decision state machine
//!
//! One attempt runs to completion before the sensor is polled again:
//!
//! ```text
//! Idle → Sensing → Capturing → Classifying → Granting|Denying → Recording → Reporting → Idle
//! ```
//!
//! Any failure returns to `Idle`. Recording starts by annotating the frame
//! with the face box and decision; the annotated copies are what get written
//! and streamed. The camera is released on every exit path
//! of an attempt, and the lock is driven closed at start and at stop
//! whatever state it was left in.

use chrono::Local;
use std::future::Future;
use tokio::time::{Instant, MissedTickBehavior};

use crate::annotate::Annotator;
use crate::client::{SendOutcome, TransportClient};
use crate::config::ControllerConfig;
use crate::facade::{Actuator, Classification, Classifier, Sensor};
use crate::model::{Decision, EntryEvent, Identity, Image, Rect};
use crate::protocol::WireEvent;
use crate::recorder::EventRecorder;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Sensing,
    Capturing,
    Classifying,
    Granting,
    Denying,
    Recording,
    Reporting,
}

/// Result of one call to [`AccessController::attempt_entry`]
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Inside the motion cooldown; nothing happened
    Debounced,
    /// No face in the frame; nothing recorded or sent
    NoFace,
    /// Capture or classification failed
    Aborted,
    Completed(Decision),
}

/// Apply the recognition threshold. `None` when no face was found.
///
/// A candidate is accepted only when its distance is strictly below
/// `threshold`.
pub fn decide(
    classification: &Classification,
    threshold: f32,
    timestamp: chrono::DateTime<Local>,
) -> Option<Decision> {
    match classification {
        Classification::NoFace => None,
        Classification::Face {
            candidate: Some(c), ..
        } if c.distance < threshold => Some(Decision::new(
            Identity::Known(c.name.clone()),
            1.0 - c.distance,
            timestamp,
        )),
        Classification::Face { .. } => Some(Decision::denied(timestamp)),
    }
}

fn face_box(classification: &Classification) -> Option<Rect> {
    match classification {
        Classification::Face { bounding_box, .. } => *bounding_box,
        Classification::NoFace => None,
    }
}

pub struct AccessController<S, A, C> {
    config: ControllerConfig,
    sensor: S,
    actuator: A,
    classifier: C,
    recorder: EventRecorder,
    annotator: Annotator,
    client: TransportClient,
    state: ControllerState,
    last_attempt: Option<Instant>,
    camera_active: bool,
}

impl<S, A, C> AccessController<S, A, C>
where
    S: Sensor,
    A: Actuator,
    C: Classifier,
{
    pub fn new(
        config: ControllerConfig,
        sensor: S,
        actuator: A,
        classifier: C,
        recorder: EventRecorder,
    ) -> Self {
        let client = TransportClient::offline(config.gateway_addr.clone());
        Self {
            config,
            sensor,
            actuator,
            classifier,
            recorder,
            annotator: Annotator::plain(),
            client,
            state: ControllerState::Idle,
            last_attempt: None,
            camera_active: false,
        }
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_camera_active(&self) -> bool {
        self.camera_active
    }

    pub fn client(&self) -> &TransportClient {
        &self.client
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Secure the lock and make the single gateway connection attempt.
    /// Fails only if the lock cannot be driven closed.
    pub async fn start(&mut self) -> Result<()> {
        self.actuator.lock().await?;
        tracing::info!(angle = self.config.door_closed_angle, "Door secured");

        self.client =
            TransportClient::connect(self.config.gateway_addr.clone(), self.config.connect_timeout)
                .await;

        self.state = ControllerState::Idle;
        tracing::info!(
            threshold = self.config.unknown_threshold,
            cooldown = ?self.config.motion_cooldown,
            gateway_connected = self.client.is_connected(),
            "Ready, waiting for motion"
        );
        Ok(())
    }

    /// Secure the lock, power the camera down and close the gateway link.
    /// Every step runs even if an earlier one fails.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("Shutting down");
        let locked = self.actuator.lock().await;
        match &locked {
            Ok(()) => tracing::info!(angle = self.config.door_closed_angle, "Door secured"),
            Err(e) => tracing::error!(error = %e, "Failed to secure door on shutdown"),
        }
        self.release_camera().await;
        self.client.close().await;
        self.state = ControllerState::Idle;
        locked
    }

    /// Poll the sensor every `poll_interval` until `shutdown` resolves, then
    /// stop. Attempts are never interrupted by shutdown.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        self.stop().await
    }

    /// Sample the motion sensor once and run an attempt on motion.
    pub async fn poll_once(&mut self) -> Option<AttemptOutcome> {
        self.transition(ControllerState::Sensing);
        let outcome = match self.sensor.motion_detected().await {
            Ok(true) => Some(self.attempt_entry().await),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Motion sensor read failed");
                None
            }
        };
        self.transition(ControllerState::Idle);
        outcome
    }

    /// Run one full entry attempt.
    pub async fn attempt_entry(&mut self) -> AttemptOutcome {
        let now = Instant::now();
        if let Some(last) = self.last_attempt {
            if now.duration_since(last) < self.config.motion_cooldown {
                tracing::trace!("Motion within cooldown, ignored");
                self.transition(ControllerState::Idle);
                return AttemptOutcome::Debounced;
            }
        }
        self.last_attempt = Some(now);
        tracing::info!(at = %Local::now().format("%H:%M:%S"), "Motion detected");

        let outcome = match self.run_attempt().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, state = ?self.state, "Entry attempt aborted");
                AttemptOutcome::Aborted
            }
        };

        self.release_camera().await;
        self.transition(ControllerState::Idle);
        outcome
    }

    async fn run_attempt(&mut self) -> Result<AttemptOutcome> {
        self.transition(ControllerState::Capturing);
        let image = self.capture().await?;

        self.transition(ControllerState::Classifying);
        let classification = self.classifier.classify(&image).await?;
        let face = face_box(&classification);
        let Some(decision) = decide(&classification, self.config.unknown_threshold, Local::now())
        else {
            tracing::info!("No face detected");
            return Ok(AttemptOutcome::NoFace);
        };

        if decision.is_granted() {
            tracing::info!(
                name = %decision.identity(),
                confidence = decision.confidence(),
                "Access granted"
            );
            self.transition(ControllerState::Granting);
            self.grant().await;
        } else {
            tracing::info!("Access denied: unknown person");
            self.transition(ControllerState::Denying);
            self.deny().await;
        }

        self.transition(ControllerState::Recording);
        let frames = self.annotator.annotate(image, &decision, face);
        let recorded = match self.recorder.record(&frames.recorded, &decision).await {
            Ok(entry) => Some(entry.image_path),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to record decision");
                None
            }
        };
        let event = EntryEvent {
            decision,
            image: recorded,
        };

        self.transition(ControllerState::Reporting);
        self.report(&event, frames.streamed).await;

        Ok(AttemptOutcome::Completed(event.decision))
    }

    async fn capture(&mut self) -> Result<Image> {
        if !self.camera_active {
            tracing::info!("Activating camera");
            self.sensor.activate().await?;
            self.camera_active = true;
            tokio::time::sleep(self.config.camera_warmup).await;
        }
        self.sensor.capture_frame().await
    }

    async fn release_camera(&mut self) {
        if !self.camera_active {
            return;
        }
        if let Err(e) = self.sensor.deactivate().await {
            tracing::warn!(error = %e, "Camera deactivation failed");
        }
        self.camera_active = false;
        tracing::info!("Camera deactivated (low-power mode)");
    }

    /// Success signal, then open, hold and close. The close is attempted
    /// even when opening failed.
    async fn grant(&mut self) {
        if let Err(e) = self.actuator.signal_granted().await {
            tracing::warn!(error = %e, "Grant signal failed");
        }

        match self.actuator.unlock().await {
            Ok(()) => {
                tracing::info!(
                    from = self.config.door_closed_angle,
                    to = self.config.door_open_angle,
                    "Lock opening"
                );
                tokio::time::sleep(self.config.door_open_time).await;
            }
            Err(e) => tracing::warn!(error = %e, "Unlock failed"),
        }

        match self.actuator.lock().await {
            Ok(()) => tracing::info!(angle = self.config.door_closed_angle, "Lock closed"),
            Err(e) => tracing::error!(error = %e, "Failed to close lock"),
        }
    }

    async fn deny(&mut self) {
        if let Err(e) = self.actuator.signal_denied().await {
            tracing::warn!(error = %e, "Denial alarm failed");
        }
    }

    async fn report(&mut self, event: &EntryEvent, image: Image) {
        let wire = WireEvent::from_decision(&event.decision, image.data);
        match self.client.send(&wire).await {
            SendOutcome::Sent(_) => {}
            SendOutcome::Offline => tracing::debug!("Gateway offline, event not streamed"),
            SendOutcome::Failed | SendOutcome::Rejected => {
                tracing::warn!(name = %wire.name, "Event not delivered to gateway")
            }
        }
    }

    fn transition(&mut self, next: ControllerState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "State transition");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::{Candidate, Indicator};
    use crate::sim::{ActuatorCall, Scripted, ScriptedClassifier, SimActuator, SimSensor};
    use std::time::Duration;

    fn face(name: &str, distance: f32) -> Classification {
        Classification::Face {
            candidate: Some(Candidate {
                name: name.into(),
                distance,
            }),
            bounding_box: None,
        }
    }

    #[test]
    fn test_decide_match() {
        let d = decide(&face("alice", 0.2), 0.45, Local::now()).unwrap();
        assert!(d.is_granted());
        assert_eq!(d.identity(), &Identity::Known("alice".into()));
        assert!((d.confidence() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_decide_threshold_is_strict() {
        let d = decide(&face("alice", 0.45), 0.45, Local::now()).unwrap();
        assert!(!d.is_granted());
        assert_eq!(d.identity(), &Identity::Unknown);
        assert_eq!(d.confidence(), 0.0);

        let d = decide(&face("alice", 0.449), 0.45, Local::now()).unwrap();
        assert!(d.is_granted());
    }

    #[test]
    fn test_decide_no_face_and_no_candidate() {
        assert!(decide(&Classification::NoFace, 0.45, Local::now()).is_none());
        let d = decide(
            &Classification::Face {
                candidate: None,
                bounding_box: None,
            },
            0.45,
            Local::now(),
        )
        .unwrap();
        assert!(!d.is_granted());
    }

    struct Rig {
        controller: AccessController<SimSensor, SimActuator, ScriptedClassifier>,
        sensor: SimSensor,
        actuator: SimActuator,
        classifier: ScriptedClassifier,
        _dir: tempfile::TempDir,
    }

    async fn rig(script: Vec<Scripted>, cooldown: Duration) -> Rig {
        rig_with_frame(script, cooldown, Image::jpeg(4, 4, vec![0xFF, 0xD8, 1, 2])).await
    }

    async fn rig_with_frame(script: Vec<Scripted>, cooldown: Duration, frame: Image) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let config = ControllerConfig {
            gateway_addr: "127.0.0.1:9".into(),
            motion_cooldown: cooldown,
            door_open_time: Duration::from_millis(5),
            camera_warmup: Duration::ZERO,
            poll_interval: Duration::from_millis(5),
            log_dir: dir.path().join("logs"),
            encrypted_log_dir: dir.path().join("enc"),
            ..Default::default()
        };
        let recorder = EventRecorder::new(
            config.log_dir.clone(),
            config.encrypted_log_dir.clone(),
            config.xor_key,
        )
        .await
        .unwrap();
        let sensor = SimSensor::new(frame);
        let actuator = SimActuator::new(180, 90).without_delays();
        let classifier = ScriptedClassifier::new(script);
        let controller = AccessController::new(
            config,
            sensor.clone(),
            actuator.clone(),
            classifier.clone(),
            recorder,
        );
        Rig {
            controller,
            sensor,
            actuator,
            classifier,
            _dir: dir,
        }
    }

    fn audit_lines(rig: &Rig) -> Vec<String> {
        let path = rig.controller.config().log_dir.join("access_log.txt");
        std::fs::read_to_string(path)
            .map(|s| s.lines().map(String::from).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_granted_attempt_opens_then_closes() {
        let mut rig = rig(vec![Scripted::matched("alice", 0.2)], Duration::from_secs(1)).await;

        let decision = match rig.controller.attempt_entry().await {
            AttemptOutcome::Completed(decision) => decision,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert!(decision.is_granted());
        assert_eq!(
            rig.actuator.calls(),
            vec![
                ActuatorCall::Signal {
                    indicator: Indicator::Green,
                    pulses: 3
                },
                ActuatorCall::Unlock,
                ActuatorCall::Lock,
            ]
        );
        assert!(rig.actuator.is_locked());
        assert!(audit_lines(&rig)[0].ends_with("GRANTED - alice"));
        assert!(!rig.sensor.is_active());
        assert_eq!(rig.controller.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn test_recorded_frame_is_annotated() {
        let frame = image::RgbImage::from_pixel(160, 160, image::Rgb([90, 90, 90]));
        let mut buf = std::io::Cursor::new(Vec::new());
        frame.write_to(&mut buf, image::ImageFormat::Jpeg).unwrap();
        let captured = buf.into_inner();
        let mut rig = rig_with_frame(
            vec![Scripted::matched("alice", 0.2)],
            Duration::from_secs(1),
            Image::jpeg(160, 160, captured.clone()),
        )
        .await;

        assert!(matches!(rig.controller.attempt_entry().await, AttemptOutcome::Completed(_)));

        let log_dir = rig.controller.config().log_dir.clone();
        let written = std::fs::read_dir(&log_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.extension().map_or(false, |ext| ext == "jpg"))
            .unwrap();
        let bytes = std::fs::read(written).unwrap();
        assert_ne!(bytes, captured);

        // Sim face box starts at (40, 40); its edge is drawn in green.
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (160, 160));
        let edge = decoded.get_pixel(41, 80);
        assert!(edge[1] > 180 && edge[0] < 100, "expected green edge, got {:?}", edge);
    }

    #[tokio::test]
    async fn test_threshold_distance_is_denied() {
        let mut rig = rig(vec![Scripted::matched("alice", 0.45)], Duration::from_secs(1)).await;

        let outcome = rig.controller.attempt_entry().await;
        assert!(matches!(outcome, AttemptOutcome::Completed(ref d) if !d.is_granted()));
        assert_eq!(
            rig.actuator.calls(),
            vec![ActuatorCall::Signal {
                indicator: Indicator::Red,
                pulses: 10
            }]
        );
        assert!(audit_lines(&rig)[0].ends_with("DENIED - Unknown"));
    }

    #[tokio::test]
    async fn test_no_face_records_nothing() {
        let mut rig = rig(vec![Scripted::NoFace], Duration::from_secs(1)).await;

        assert_eq!(rig.controller.attempt_entry().await, AttemptOutcome::NoFace);
        assert!(rig.actuator.calls().is_empty());
        assert!(audit_lines(&rig).is_empty());
        assert_eq!(rig.sensor.activations(), 1);
        assert_eq!(rig.sensor.deactivations(), 1);
        assert!(!rig.controller.is_camera_active());
    }

    #[tokio::test]
    async fn test_debounce_within_cooldown() {
        let mut rig = rig(
            vec![Scripted::matched("alice", 0.1), Scripted::matched("bob", 0.1)],
            Duration::from_secs(30),
        )
        .await;

        assert!(matches!(rig.controller.attempt_entry().await, AttemptOutcome::Completed(_)));
        assert_eq!(rig.controller.attempt_entry().await, AttemptOutcome::Debounced);
        assert_eq!(rig.classifier.calls(), 1);
        assert_eq!(rig.sensor.captures(), 1);
        assert_eq!(audit_lines(&rig).len(), 1);
    }

    #[tokio::test]
    async fn test_attempt_after_cooldown_runs() {
        let mut rig = rig(
            vec![Scripted::NoFace, Scripted::matched("bob", 0.1)],
            Duration::from_millis(20),
        )
        .await;

        assert_eq!(rig.controller.attempt_entry().await, AttemptOutcome::NoFace);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(matches!(rig.controller.attempt_entry().await, AttemptOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_classifier_error_releases_camera() {
        let mut rig = rig(vec![Scripted::Error("model crashed".into())], Duration::ZERO).await;

        assert_eq!(rig.controller.attempt_entry().await, AttemptOutcome::Aborted);
        assert!(!rig.sensor.is_active());
        assert_eq!(rig.sensor.deactivations(), 1);
        assert!(audit_lines(&rig).is_empty());
        assert_eq!(rig.controller.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn test_capture_failure_aborts() {
        let mut rig = rig(vec![Scripted::matched("alice", 0.1)], Duration::ZERO).await;
        rig.sensor.fail_captures(true);

        assert_eq!(rig.controller.attempt_entry().await, AttemptOutcome::Aborted);
        assert_eq!(rig.classifier.calls(), 0);
        assert!(!rig.sensor.is_active());
    }

    #[tokio::test]
    async fn test_actuator_failure_still_records_and_relocks() {
        let mut rig = rig(vec![Scripted::matched("alice", 0.1)], Duration::ZERO).await;
        rig.actuator.fail_unlock(true);
        rig.actuator.fail_signal(true);

        assert!(matches!(rig.controller.attempt_entry().await, AttemptOutcome::Completed(_)));
        assert_eq!(rig.actuator.calls().last(), Some(&ActuatorCall::Lock));
        assert_eq!(audit_lines(&rig).len(), 1);
    }

    #[tokio::test]
    async fn test_start_and_stop_secure_lock() {
        let mut rig = rig(vec![], Duration::ZERO).await;
        assert!(!rig.actuator.is_locked());

        rig.controller.start().await.unwrap();
        assert!(rig.actuator.is_locked());

        let mut handle = rig.actuator.clone();
        handle.unlock().await.unwrap();
        assert!(!rig.actuator.is_locked());

        rig.controller.stop().await.unwrap();
        assert!(rig.actuator.is_locked());
        assert!(!rig.controller.client().is_connected());
    }

    #[tokio::test]
    async fn test_run_polls_until_shutdown() {
        let mut rig = rig(vec![Scripted::matched("alice", 0.1)], Duration::from_secs(30)).await;
        rig.sensor.script_motion([false, true, true]);

        rig.controller
            .run(tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();

        assert_eq!(rig.classifier.calls(), 1);
        assert_eq!(audit_lines(&rig).len(), 1);
        assert!(rig.actuator.is_locked());
        assert!(!rig.sensor.is_active());
    }
}
