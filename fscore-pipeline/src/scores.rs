//! Score Mapping
//!
//! Terminal artifact of the pipeline: `user_id -> score (0-100)`, written as a
//! pretty JSON object with sorted keys so identical mappings produce
//! byte-identical files.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Highest score the mapping accepts
pub const MAX_SCORE: u8 = 100;

/// Structured user → score output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreMapping(BTreeMap<String, u8>);

impl ScoreMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a score, returning the one it replaced
    pub fn insert(&mut self, user_id: impl Into<String>, score: u8) -> Option<u8> {
        self.0.insert(user_id.into(), score.min(MAX_SCORE))
    }

    pub fn get(&self, user_id: &str) -> Option<u8> {
        self.0.get(user_id).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.0.iter().map(|(user, score)| (user.as_str(), *score))
    }

    /// Users scoring at least `threshold`
    pub fn at_or_above(&self, threshold: u8) -> ScoreMapping {
        ScoreMapping(
            self.0
                .iter()
                .filter(|(_, score)| **score >= threshold)
                .map(|(user, score)| (user.clone(), *score))
                .collect(),
        )
    }

    /// Read a mapping file; a missing file is an empty mapping
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(PipelineError::storage(path, e)),
        };
        serde_json::from_str(&content)
            .map_err(|e| PipelineError::storage(path, format!("malformed score mapping: {}", e)))
    }

    /// Overwrite `path` atomically with this mapping
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::storage(path, e))?;
        json.push('\n');
        fscore_common::fs::write_atomic(path, json.as_bytes())
            .map_err(|e| PipelineError::storage(path, e))?;
        info!(path = %path.display(), users = self.len(), "Score mapping saved");
        Ok(())
    }
}

impl FromIterator<(String, u8)> for ScoreMapping {
    fn from_iter<I: IntoIterator<Item = (String, u8)>>(iter: I) -> Self {
        let mut mapping = ScoreMapping::new();
        for (user, score) in iter {
            mapping.insert(user, score);
        }
        mapping
    }
}

/// Validate a user-supplied threshold (0-100)
pub fn validate_threshold(threshold: i64) -> Result<u8> {
    u8::try_from(threshold)
        .ok()
        .filter(|t| *t <= MAX_SCORE)
        .ok_or_else(|| {
            PipelineError::InvalidInput(format!(
                "score threshold must be between 0 and {}, got {}",
                MAX_SCORE, threshold
            ))
        })
}
