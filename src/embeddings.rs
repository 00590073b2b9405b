//! Enrolled face embeddings and nearest-neighbour matching
//!
//! The database file is JSON with the shape
//! `{"names": [..], "encodings": [[f32; D], ..]}` and is loaded once at
//! startup. A missing file is not fatal: the database is empty and every
//! classification comes back without a candidate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::facade::{Candidate, Classification, Classifier};
use crate::model::{Image, Rect};
use crate::{EntryError, Result};

/// On-disk shape of the embeddings file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingFile {
    pub names: Vec<String>,
    pub encodings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub name: String,
    pub embedding: Vec<f32>,
}

/// Immutable set of enrolled identities
#[derive(Debug, Clone, Default)]
pub struct EmbeddingDatabase {
    entries: Vec<Enrollment>,
    dimension: usize,
}

impl EmbeddingDatabase {
    pub fn from_file(file: EmbeddingFile) -> Result<Self> {
        if file.names.len() != file.encodings.len() {
            return Err(EntryError::Config(format!(
                "embeddings file has {} names but {} encodings",
                file.names.len(),
                file.encodings.len()
            )));
        }

        let dimension = file.encodings.first().map(Vec::len).unwrap_or(0);
        if let Some((i, bad)) = file
            .encodings
            .iter()
            .enumerate()
            .find(|(_, e)| e.len() != dimension || e.is_empty())
        {
            return Err(EntryError::Config(format!(
                "encoding {} has dimension {}, expected {}",
                i,
                bad.len(),
                dimension
            )));
        }

        let entries = file
            .names
            .into_iter()
            .zip(file.encodings)
            .map(|(name, embedding)| Enrollment { name, embedding })
            .collect();

        Ok(Self { entries, dimension })
    }

    /// Load from `path`. A missing file yields an empty database.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "No face database found, every subject will be denied");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let file: EmbeddingFile = serde_json::from_slice(&raw)?;
        let db = Self::from_file(file)?;
        tracing::info!(
            path = %path.display(),
            identities = db.len(),
            dimension = db.dimension,
            "Loaded face encodings"
        );
        Ok(db)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Closest enrolled identity by euclidean distance. The first strict
    /// minimum wins on ties.
    pub fn best_match(&self, probe: &[f32]) -> Option<Candidate> {
        let mut best: Option<(&Enrollment, f32)> = None;
        for entry in &self.entries {
            let distance = euclidean_distance(&entry.embedding, probe);
            match best {
                Some((_, current)) if distance >= current => {}
                _ => best = Some((entry, distance)),
            }
        }
        best.map(|(entry, distance)| Candidate {
            name: entry.name.clone(),
            distance,
        })
    }
}

/// L2 distance. Vectors of different length are compared over the shorter
/// prefix with the remainder counted against zero.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().max(b.len());
    (0..n)
        .map(|i| {
            let d = a.get(i).copied().unwrap_or(0.0) - b.get(i).copied().unwrap_or(0.0);
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

/// One face found by a [`FaceEncoder`]
#[derive(Debug, Clone, PartialEq)]
pub struct FaceEncoding {
    pub embedding: Vec<f32>,
    pub bounding_box: Rect,
}

/// External face detector and embedding extractor
#[async_trait]
pub trait FaceEncoder: Send {
    async fn encode(&mut self, image: &Image) -> Result<Vec<FaceEncoding>>;
}

/// [`Classifier`] backed by a [`FaceEncoder`] and an [`EmbeddingDatabase`].
///
/// Only the first detected face is matched.
pub struct EmbeddingClassifier<E> {
    encoder: E,
    database: EmbeddingDatabase,
}

impl<E: FaceEncoder> EmbeddingClassifier<E> {
    pub fn new(encoder: E, database: EmbeddingDatabase) -> Self {
        Self { encoder, database }
    }

    pub fn database(&self) -> &EmbeddingDatabase {
        &self.database
    }
}

#[async_trait]
impl<E: FaceEncoder> Classifier for EmbeddingClassifier<E> {
    async fn classify(&mut self, image: &Image) -> Result<Classification> {
        // Nothing enrolled: reject without running detection.
        if self.database.is_empty() {
            return Ok(Classification::Face {
                candidate: None,
                bounding_box: None,
            });
        }

        let faces = self.encoder.encode(image).await?;
        let Some(face) = faces.into_iter().next() else {
            return Ok(Classification::NoFace);
        };

        let candidate = self.database.best_match(&face.embedding);
        if let Some(c) = &candidate {
            tracing::debug!(name = %c.name, distance = c.distance, "Best match");
        }

        Ok(Classification::Face {
            candidate,
            bounding_box: Some(face.bounding_box),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::StaticEncoder;

    fn db() -> EmbeddingDatabase {
        EmbeddingDatabase::from_file(EmbeddingFile {
            names: vec!["alice".into(), "bob".into(), "carol".into()],
            encodings: vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]],
        })
        .unwrap()
    }

    #[test]
    fn test_best_match_minimum() {
        let c = db().best_match(&[0.9, 0.0]).unwrap();
        assert_eq!(c.name, "bob");
        assert!((c.distance - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_tie_resolves_to_first() {
        // equidistant from all three
        let c = db().best_match(&[0.5, 0.5]).unwrap();
        assert_eq!(c.name, "alice");
        // equidistant from bob and carol
        let c = db().best_match(&[1.0, 1.0]).unwrap();
        assert_eq!(c.name, "bob");
    }

    #[test]
    fn test_empty_database_has_no_match() {
        assert!(EmbeddingDatabase::default().best_match(&[0.0]).is_none());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let result = EmbeddingDatabase::from_file(EmbeddingFile {
            names: vec!["alice".into()],
            encodings: vec![],
        });
        assert!(matches!(result, Err(EntryError::Config(_))));
    }

    #[test]
    fn test_mixed_dimensions_rejected() {
        let result = EmbeddingDatabase::from_file(EmbeddingFile {
            names: vec!["a".into(), "b".into()],
            encodings: vec![vec![0.0, 1.0], vec![0.0]],
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = EmbeddingDatabase::load(&dir.path().join("absent.json")).unwrap();
        assert!(db.is_empty());
    }

    #[test]
    fn test_load_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, r#"{"names":["alice"],"encodings":[[0.1,0.2,0.3]]}"#).unwrap();
        let db = EmbeddingDatabase::load(&path).unwrap();
        assert_eq!(db.len(), 1);
        assert_eq!(db.dimension(), 3);
    }

    #[tokio::test]
    async fn test_classifier_no_face() {
        let mut classifier = EmbeddingClassifier::new(StaticEncoder::new(vec![]), db());
        let image = Image::jpeg(1, 1, vec![0]);
        assert_eq!(classifier.classify(&image).await.unwrap(), Classification::NoFace);
    }

    #[tokio::test]
    async fn test_classifier_empty_database_skips_detection() {
        let mut classifier =
            EmbeddingClassifier::new(StaticEncoder::new(vec![]), EmbeddingDatabase::default());
        let image = Image::jpeg(1, 1, vec![0]);
        let result = classifier.classify(&image).await.unwrap();
        assert_eq!(
            result,
            Classification::Face {
                candidate: None,
                bounding_box: None
            }
        );
    }

    #[tokio::test]
    async fn test_classifier_matches_first_face() {
        let rect = Rect {
            top: 4,
            right: 8,
            bottom: 8,
            left: 4,
        };
        let encoder = StaticEncoder::new(vec![
            FaceEncoding {
                embedding: vec![0.0, 0.2],
                bounding_box: rect,
            },
            FaceEncoding {
                embedding: vec![1.0, 0.0],
                bounding_box: rect,
            },
        ]);
        let mut classifier = EmbeddingClassifier::new(encoder, db());
        let image = Image::jpeg(16, 16, vec![0; 4]);
        match classifier.classify(&image).await.unwrap() {
            Classification::Face {
                candidate: Some(c),
                bounding_box,
            } => {
                assert_eq!(c.name, "alice");
                assert_eq!(bounding_box, Some(rect));
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }
}
