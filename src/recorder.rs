//! Local decision log
//!
//! Each decision leaves three traces on disk:
//! - the captured image under the log directory
//! - an XOR-obfuscated copy under the encrypted log directory
//! - one line in the append-only `access_log.txt`
//!
//! The XOR transform is a placeholder for confidentiality, not cryptography:
//! a single-byte key is trivially recoverable from any known plaintext.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::model::{Decision, Image};
use crate::Result;

/// Audit log file name inside the log directory
pub const AUDIT_LOG_NAME: &str = "access_log.txt";

/// Prefix of encrypted capture files
pub const ENCRYPTED_PREFIX: &str = "enc_";

/// Byte-wise XOR with a single-byte key. Applying it twice with the same key
/// returns the input.
pub fn xor_transform(data: &[u8], key: u8) -> Vec<u8> {
    data.iter().map(|b| b ^ key).collect()
}

/// Read an encrypted capture back to plaintext.
pub async fn decrypt_file(path: &Path, key: u8) -> Result<Vec<u8>> {
    let data = fs::read(path).await?;
    Ok(xor_transform(&data, key))
}

/// Paths written for one decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEntry {
    pub image_path: PathBuf,
    pub encrypted_path: PathBuf,
    pub audit_line: String,
}

pub struct EventRecorder {
    log_dir: PathBuf,
    encrypted_dir: PathBuf,
    key: u8,
}

impl EventRecorder {
    /// Create the recorder, creating both directories if needed.
    pub async fn new(log_dir: PathBuf, encrypted_dir: PathBuf, key: u8) -> Result<Self> {
        fs::create_dir_all(&log_dir).await?;
        fs::create_dir_all(&encrypted_dir).await?;
        Ok(Self {
            log_dir,
            encrypted_dir,
            key,
        })
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.log_dir.join(AUDIT_LOG_NAME)
    }

    /// File name for a decision's capture: `<timestamp>_<identity>_<STATUS>.jpg`
    pub fn capture_file_name(decision: &Decision) -> String {
        format!(
            "{}_{}_{}.jpg",
            decision.timestamp().format("%Y-%m-%d_%H-%M-%S"),
            sanitize(decision.identity().name()),
            decision.status()
        )
    }

    /// `[<datetime>] <STATUS> - <identity>`
    pub fn audit_line(decision: &Decision) -> String {
        format!(
            "[{}] {} - {}",
            decision.timestamp().format("%Y-%m-%d %H:%M:%S%.6f"),
            decision.status(),
            decision.identity()
        )
    }

    pub async fn record(&self, image: &Image, decision: &Decision) -> Result<RecordedEntry> {
        let file_name = Self::capture_file_name(decision);

        let image_path = self.log_dir.join(&file_name);
        fs::write(&image_path, &image.data).await?;

        let encrypted_path = self
            .encrypted_dir
            .join(format!("{}{}", ENCRYPTED_PREFIX, file_name));
        fs::write(&encrypted_path, xor_transform(&image.data, self.key)).await?;
        tracing::debug!(path = %encrypted_path.display(), "Encrypted capture written");

        let audit_line = Self::audit_line(decision);
        let mut log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.audit_log_path())
            .await?;
        log.write_all(format!("{}\n", audit_line).as_bytes()).await?;
        log.flush().await?;

        tracing::info!(file = %file_name, status = %decision.status(), "Decision recorded");

        Ok(RecordedEntry {
            image_path,
            encrypted_path,
            audit_line,
        })
    }
}

/// Keep identity names from escaping the log directory.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use proptest::prelude::*;

    fn fixed_time() -> chrono::DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    proptest! {
        #[test]
        fn prop_xor_involution(data in proptest::collection::vec(any::<u8>(), 0..512), key in any::<u8>()) {
            prop_assert_eq!(xor_transform(&xor_transform(&data, key), key), data);
        }
    }

    #[test]
    fn test_xor_changes_bytes_for_nonzero_key() {
        assert_eq!(xor_transform(&[0x00, 0xFF, 0xAA], 0xAA), vec![0xAA, 0x55, 0x00]);
        assert_eq!(xor_transform(&[1, 2, 3], 0), vec![1, 2, 3]);
    }

    #[test]
    fn test_capture_file_name() {
        let decision = Decision::granted("alice", 0.8, fixed_time());
        assert_eq!(
            EventRecorder::capture_file_name(&decision),
            "2024-03-09_14-05-07_alice_GRANTED.jpg"
        );
        let decision = Decision::granted("../mallory smith", 0.8, fixed_time());
        assert_eq!(
            EventRecorder::capture_file_name(&decision),
            "2024-03-09_14-05-07_.._mallory_smith_GRANTED.jpg"
        );
    }

    #[test]
    fn test_audit_line_format() {
        let decision = Decision::denied(fixed_time());
        assert_eq!(
            EventRecorder::audit_line(&decision),
            "[2024-03-09 14:05:07.000000] DENIED - Unknown"
        );
    }

    #[tokio::test]
    async fn test_record_writes_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = EventRecorder::new(dir.path().join("logs"), dir.path().join("enc"), 0xAA)
            .await
            .unwrap();

        let image = Image::jpeg(2, 2, vec![1, 2, 3, 4]);
        let first = recorder
            .record(&image, &Decision::granted("alice", 0.8, fixed_time()))
            .await
            .unwrap();
        recorder
            .record(&image, &Decision::denied(fixed_time()))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&first.image_path).unwrap(), vec![1, 2, 3, 4]);
        assert!(first
            .encrypted_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("enc_"));
        assert_eq!(decrypt_file(&first.encrypted_path, 0xAA).await.unwrap(), image.data);

        let log = std::fs::read_to_string(recorder.audit_log_path()).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("GRANTED - alice"));
        assert!(lines[1].ends_with("DENIED - Unknown"));
    }
}
