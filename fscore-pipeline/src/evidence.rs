//! Evidence Store
//!
//! Read-only input of the pipeline: a JSON object written by the forum
//! harvester, mapping each user id to the ordered list of their comments or
//! to a single scalar aggregate value.
//!
//! File order is kept so batching is deterministic for a given file.

use crate::error::{PipelineError, Result};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Evidence collected for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Evidence {
    /// Comments in the order they were harvested
    Comments(Vec<String>),
    /// Pre-aggregated value
    Scalar(ScalarValue),
}

/// Scalar evidence value, kept lossless
///
/// Numbers keep their source digits (serde_json `arbitrary_precision`), so
/// values wider than `u64` or `f64` reach the prompt unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// Harvester had no value for the user
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl Evidence {
    /// Value embedded in the scoring prompt (JSON text, nothing truncated)
    pub fn render(&self) -> String {
        // Serializing scalars and string arrays cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One user and their evidence
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceEntry {
    pub user_id: String,
    pub evidence: Evidence,
}

/// Ordered user → evidence table with unique keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceStore {
    entries: Vec<EvidenceEntry>,
    index: HashMap<String, usize>,
}

impl EvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entries; a repeated user id replaces the earlier evidence in place
    pub fn from_entries(entries: impl IntoIterator<Item = EvidenceEntry>) -> Self {
        let mut store = Self::new();
        for entry in entries {
            store.insert(entry.user_id, entry.evidence);
        }
        store
    }

    pub fn insert(&mut self, user_id: String, evidence: Evidence) {
        match self.index.get(&user_id) {
            Some(&position) => {
                debug!(user_id = %user_id, "Duplicate user in evidence store, keeping last value");
                self.entries[position].evidence = evidence;
            }
            None => {
                self.index.insert(user_id.clone(), self.entries.len());
                self.entries.push(EvidenceEntry { user_id, evidence });
            }
        }
    }

    /// Read the evidence store file
    ///
    /// # Errors
    /// `PipelineError::Storage` when the file is missing, unreadable, or not a
    /// JSON object of `user -> [comments] | scalar`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::storage(path, format!("cannot read evidence store: {}", e)))?;

        let store: EvidenceStore = serde_json::from_str(&content)
            .map_err(|e| PipelineError::storage(path, format!("malformed evidence store: {}", e)))?;

        info!(path = %path.display(), users = store.len(), "Loaded evidence store");
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[EvidenceEntry] {
        &self.entries
    }

    pub fn get(&self, user_id: &str) -> Option<&Evidence> {
        self.index
            .get(user_id)
            .map(|&position| &self.entries[position].evidence)
    }
}

impl Serialize for EvidenceStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.user_id, &entry.evidence)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EvidenceStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct StoreVisitor;

        impl<'de> Visitor<'de> for StoreVisitor {
            type Value = EvidenceStore;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object mapping user ids to a list of comments or a scalar")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<EvidenceStore, A::Error> {
                let mut store = EvidenceStore::new();
                while let Some(user_id) = map.next_key::<String>()? {
                    let evidence = map.next_value::<Evidence>().map_err(|e| {
                        de::Error::custom(format!("user {:?}: {}", user_id, e))
                    })?;
                    store.insert(user_id, evidence);
                }
                Ok(store)
            }
        }

        deserializer.deserialize_map(StoreVisitor)
    }
}
