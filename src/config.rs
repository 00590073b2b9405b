//! Configuration for the controller and gateway processes
//!
//! Every option has a built-in default and can be overridden through an
//! `ENTRY_*` environment variable (a `.env` file is honoured by the binaries).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{EntryError, Result};

/// GPIO pin assignments (BCM numbering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinConfig {
    pub pir: u8,
    pub servo: u8,
    pub green_led: u8,
    pub red_led: u8,
    pub buzzer: u8,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            pir: 26,
            servo: 17,
            green_led: 6,
            red_led: 16,
            buzzer: 23,
        }
    }
}

/// Controller (door side) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub gateway_addr: String,
    pub pins: PinConfig,
    pub embeddings_file: PathBuf,
    /// Match distances strictly below this are accepted
    pub unknown_threshold: f32,
    pub door_open_time: Duration,
    pub door_closed_angle: u16,
    pub door_open_angle: u16,
    pub motion_cooldown: Duration,
    pub poll_interval: Duration,
    pub camera_warmup: Duration,
    pub connect_timeout: Duration,
    pub log_dir: PathBuf,
    pub encrypted_log_dir: PathBuf,
    pub xor_key: u8,
    /// Font for frame labels; boxes only when unset
    pub font_file: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            gateway_addr: format!("100.127.50.12:{}", crate::DEFAULT_GATEWAY_PORT),
            pins: PinConfig::default(),
            embeddings_file: PathBuf::from("users_embeddings.json"),
            unknown_threshold: 0.45,
            door_open_time: Duration::from_secs(2),
            door_closed_angle: 180,
            door_open_angle: 90,
            motion_cooldown: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            camera_warmup: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            log_dir: PathBuf::from("logs"),
            encrypted_log_dir: PathBuf::from("encrypted_logs"),
            xor_key: 0xAA,
            font_file: None,
        }
    }
}

impl ControllerConfig {
    /// Defaults overridden by `ENTRY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let config = Self {
            gateway_addr: env_or("ENTRY_GATEWAY_ADDR", d.gateway_addr)?,
            pins: PinConfig {
                pir: env_or("ENTRY_PIR_PIN", d.pins.pir)?,
                servo: env_or("ENTRY_SERVO_PIN", d.pins.servo)?,
                green_led: env_or("ENTRY_GREEN_LED_PIN", d.pins.green_led)?,
                red_led: env_or("ENTRY_RED_LED_PIN", d.pins.red_led)?,
                buzzer: env_or("ENTRY_BUZZER_PIN", d.pins.buzzer)?,
            },
            embeddings_file: env_or("ENTRY_EMBEDDINGS_FILE", d.embeddings_file)?,
            unknown_threshold: env_or("ENTRY_UNKNOWN_THRESHOLD", d.unknown_threshold)?,
            door_open_time: env_secs("ENTRY_DOOR_OPEN_SECS", d.door_open_time)?,
            door_closed_angle: env_or("ENTRY_DOOR_CLOSED_ANGLE", d.door_closed_angle)?,
            door_open_angle: env_or("ENTRY_DOOR_OPEN_ANGLE", d.door_open_angle)?,
            motion_cooldown: env_secs("ENTRY_MOTION_COOLDOWN_SECS", d.motion_cooldown)?,
            poll_interval: env_millis("ENTRY_POLL_INTERVAL_MS", d.poll_interval)?,
            camera_warmup: env_millis("ENTRY_CAMERA_WARMUP_MS", d.camera_warmup)?,
            connect_timeout: env_secs("ENTRY_CONNECT_TIMEOUT_SECS", d.connect_timeout)?,
            log_dir: env_or("ENTRY_LOG_DIR", d.log_dir)?,
            encrypted_log_dir: env_or("ENTRY_ENCRYPTED_LOG_DIR", d.encrypted_log_dir)?,
            xor_key: match std::env::var("ENTRY_XOR_KEY") {
                Ok(raw) => parse_key_byte(&raw)?,
                Err(_) => d.xor_key,
            },
            font_file: std::env::var_os("ENTRY_FONT_FILE").map(PathBuf::from).or(d.font_file),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.unknown_threshold > 0.0 && self.unknown_threshold <= 1.0) {
            return Err(EntryError::Config(format!(
                "unknown_threshold must be in (0, 1], got {}",
                self.unknown_threshold
            )));
        }
        for (name, angle) in [
            ("door_closed_angle", self.door_closed_angle),
            ("door_open_angle", self.door_open_angle),
        ] {
            if angle > 180 {
                return Err(EntryError::Config(format!(
                    "{} must be at most 180 degrees, got {}",
                    name, angle
                )));
            }
        }
        if self.poll_interval.is_zero() {
            return Err(EntryError::Config("poll_interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Gateway (dashboard side) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    pub dashboard_addr: SocketAddr,
    pub captures_dir: PathBuf,
    pub store_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], crate::DEFAULT_GATEWAY_PORT)),
            dashboard_addr: SocketAddr::from(([0, 0, 0, 0], crate::DEFAULT_DASHBOARD_PORT)),
            captures_dir: PathBuf::from("static/captures"),
            store_capacity: crate::DEFAULT_STORE_CAPACITY,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let config = Self {
            listen_addr: env_or("ENTRY_LISTEN_ADDR", d.listen_addr)?,
            dashboard_addr: env_or("ENTRY_DASHBOARD_ADDR", d.dashboard_addr)?,
            captures_dir: env_or("ENTRY_CAPTURES_DIR", d.captures_dir)?,
            store_capacity: env_or("ENTRY_STORE_CAPACITY", d.store_capacity)?,
        };
        if config.store_capacity == 0 {
            return Err(EntryError::Config("store_capacity must be non-zero".into()));
        }
        Ok(config)
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| EntryError::Config(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(raw) => parse_secs(&raw).map_err(|e| EntryError::Config(format!("{}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

fn env_millis(key: &str, default: Duration) -> Result<Duration> {
    env_or(key, default.as_millis() as u64).map(Duration::from_millis)
}

/// Fractional seconds, e.g. `2` or `0.5`.
fn parse_secs(raw: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|e| format!("invalid seconds {:?}: {}", raw, e))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid seconds {:?}: {}", raw, e))
}

/// Key byte as `0x`-prefixed hex or decimal.
pub fn parse_key_byte(raw: &str) -> Result<u8> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => raw.parse::<u8>(),
    };
    parsed.map_err(|e| EntryError::Config(format!("invalid key byte {:?}: {}", raw, e)))
}
