//! Event transport wire format
//!
//! One event is two length-prefixed fields, lengths as big-endian `u32`
//! byte counts:
//!
//! ```text
//! [N: u32][N bytes UTF-8 "name|status|timestamp"][M: u32][M bytes image]
//! ```
//!
//! Events follow each other on a connection with no other framing.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::model::{AccessStatus, Decision};
use crate::{EntryError, Result};

/// Separator between metadata fields
pub const FIELD_SEPARATOR: char = '|';

/// Timestamp text format carried on the wire
pub const WIRE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Upper bound for the metadata field
pub const MAX_METADATA_LEN: usize = 4 * 1024;

/// Upper bound for the image field
pub const MAX_IMAGE_LEN: usize = 16 * 1024 * 1024;

/// Status as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireStatus {
    Granted,
    Denied,
}

impl WireStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireStatus::Granted => "GRANTED",
            WireStatus::Denied => "DENIED",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "GRANTED" => Ok(WireStatus::Granted),
            "DENIED" => Ok(WireStatus::Denied),
            other => Err(EntryError::MalformedFrame(format!("unknown status {:?}", other))),
        }
    }
}

impl std::fmt::Display for WireStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AccessStatus> for WireStatus {
    fn from(status: AccessStatus) -> Self {
        match status {
            AccessStatus::Granted => WireStatus::Granted,
            AccessStatus::Denied => WireStatus::Denied,
        }
    }
}

/// Transmitted form of an entry event. Cloning shares the image buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireEvent {
    pub name: String,
    pub status: WireStatus,
    pub timestamp: String,
    pub image: Bytes,
}

impl WireEvent {
    pub fn from_decision(decision: &Decision, image: impl Into<Bytes>) -> Self {
        Self {
            name: decision.identity().name().to_string(),
            status: decision.status().into(),
            timestamp: decision.timestamp().format(WIRE_TIME_FORMAT).to_string(),
            image: image.into(),
        }
    }

    /// `name|status|timestamp`
    pub fn metadata(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.name,
            self.status,
            self.timestamp,
            sep = FIELD_SEPARATOR
        )
    }

    pub fn parse_metadata(raw: &str) -> Result<(String, WireStatus, String)> {
        let fields: Vec<&str> = raw.split(FIELD_SEPARATOR).collect();
        match fields.as_slice() {
            [name, status, timestamp] => Ok((
                name.to_string(),
                WireStatus::parse(status)?,
                timestamp.to_string(),
            )),
            _ => Err(EntryError::MalformedFrame(format!(
                "expected 3 metadata fields, got {}",
                fields.len()
            ))),
        }
    }
}

/// Serialize one event into a complete frame.
pub fn encode_event(event: &WireEvent) -> Result<Vec<u8>> {
    for (field, value) in [("name", &event.name), ("timestamp", &event.timestamp)] {
        if value.contains(FIELD_SEPARATOR) {
            return Err(EntryError::MalformedFrame(format!(
                "{} contains field separator: {:?}",
                field, value
            )));
        }
    }

    let metadata = event.metadata();
    check_len("metadata", metadata.len(), MAX_METADATA_LEN)?;
    check_len("image", event.image.len(), MAX_IMAGE_LEN)?;

    let mut buf = Vec::with_capacity(8 + metadata.len() + event.image.len());
    buf.extend_from_slice(&(metadata.len() as u32).to_be_bytes());
    buf.extend_from_slice(metadata.as_bytes());
    buf.extend_from_slice(&(event.image.len() as u32).to_be_bytes());
    buf.extend_from_slice(&event.image);
    Ok(buf)
}

/// Read one event.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between
/// events. A short read anywhere inside an event is [`EntryError::Truncated`].
pub async fn read_event<R>(reader: &mut R) -> Result<Option<WireEvent>>
where
    R: AsyncRead + Unpin,
{
    let Some(meta_len) = read_first_prefix(reader).await? else {
        return Ok(None);
    };
    check_len("metadata", meta_len, MAX_METADATA_LEN)?;
    let metadata = read_field(reader, meta_len, "metadata").await?;
    let metadata = String::from_utf8(metadata)
        .map_err(|e| EntryError::MalformedFrame(format!("metadata is not UTF-8: {}", e)))?;
    let (name, status, timestamp) = WireEvent::parse_metadata(&metadata)?;

    let mut prefix = [0u8; 4];
    read_exact_or_truncated(reader, &mut prefix, "image length").await?;
    let image_len = u32::from_be_bytes(prefix) as usize;
    check_len("image", image_len, MAX_IMAGE_LEN)?;
    let image = read_field(reader, image_len, "image").await?;

    Ok(Some(WireEvent {
        name,
        status,
        timestamp,
        image: Bytes::from(image),
    }))
}

/// Read the leading length prefix, telling a clean close from a torn one.
async fn read_first_prefix<R>(reader: &mut R) -> Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(EntryError::Truncated("metadata length"));
        }
        filled += n;
    }
    Ok(Some(u32::from_be_bytes(prefix) as usize))
}

async fn read_field<R>(reader: &mut R, len: usize, what: &'static str) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len];
    read_exact_or_truncated(reader, &mut buf, what).await?;
    Ok(buf)
}

async fn read_exact_or_truncated<R>(reader: &mut R, buf: &mut [u8], what: &'static str) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(EntryError::Truncated(what)),
        Err(e) => Err(e.into()),
    }
}

fn check_len(field: &'static str, len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(EntryError::FrameTooLarge { field, len, max });
    }
    Ok(())
}
