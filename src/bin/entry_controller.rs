//! Entry Controller Binary
//!
//! Runs the access-decision loop. Hardware drivers are not part of this
//! crate, so the binary wires the simulated facades: motion fires every
//! `ENTRY_SIM_MOTION_EVERY` polls, frames come from `ENTRY_SIM_FRAME`, and the
//! face embedding reported for every frame comes from `ENTRY_SIM_PROBE`
//! (a JSON array).

use anyhow::Context;
use entry_guard::annotate::Annotator;
use entry_guard::embeddings::{EmbeddingClassifier, EmbeddingDatabase};
use entry_guard::facade::Actuator;
use entry_guard::sim::{SimActuator, SimSensor, StaticEncoder};
use entry_guard::{AccessController, ControllerConfig, EventRecorder, Image};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    entry_guard::init_tracing();

    tracing::info!("Starting Entry Controller v{}", entry_guard::VERSION);

    let config = ControllerConfig::from_env()?;
    tracing::info!(
        gateway = %config.gateway_addr,
        threshold = config.unknown_threshold,
        cooldown = ?config.motion_cooldown,
        door_closed_angle = config.door_closed_angle,
        log_dir = %config.log_dir.display(),
        "Configuration loaded"
    );
    tracing::warn!("No hardware drivers linked, using simulated sensor and actuator");

    let mut actuator = SimActuator::new(config.door_closed_angle, config.door_open_angle);

    let (recorder, classifier, sensor) = match init(&config).await {
        Ok(parts) => parts,
        Err(e) => {
            // Fatal init failure: leave the door secured before exiting.
            if let Err(lock_err) = actuator.lock().await {
                tracing::error!(error = %lock_err, "Failed to secure door");
            }
            return Err(e);
        }
    };

    let annotator = Annotator::load(config.font_file.as_deref());
    let mut controller = AccessController::new(config, sensor, actuator, classifier, recorder)
        .with_annotator(annotator);
    controller
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("Controller stopped");
    Ok(())
}

async fn init(
    config: &ControllerConfig,
) -> anyhow::Result<(EventRecorder, EmbeddingClassifier<StaticEncoder>, SimSensor)> {
    let recorder = EventRecorder::new(
        config.log_dir.clone(),
        config.encrypted_log_dir.clone(),
        config.xor_key,
    )
    .await
    .context("creating log directories")?;

    let database = EmbeddingDatabase::load(&config.embeddings_file)
        .with_context(|| format!("loading {}", config.embeddings_file.display()))?;
    let encoder = match std::env::var("ENTRY_SIM_PROBE") {
        Ok(raw) => StaticEncoder::single(
            serde_json::from_str(&raw).context("ENTRY_SIM_PROBE must be a JSON array of floats")?,
        ),
        Err(_) => StaticEncoder::default(),
    };
    let classifier = EmbeddingClassifier::new(encoder, database);

    let frame = match std::env::var("ENTRY_SIM_FRAME") {
        Ok(path) => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path))?;
            Image::jpeg(1280, 720, data)
        }
        Err(_) => Image::jpeg(1280, 720, vec![0xFF, 0xD8, 0xFF, 0xD9]),
    };
    let motion_every = std::env::var("ENTRY_SIM_MOTION_EVERY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(50);
    let sensor = SimSensor::new(frame).with_motion_every(motion_every);

    Ok((recorder, classifier, sensor))
}
