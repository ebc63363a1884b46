//! Batch Scorer
//!
//! One scoring request per batch. The reply is returned exactly as received;
//! interpreting it is the normalizer's job.

use crate::error::TransportError;
use crate::partition::Batch;
use crate::raw_log::RawResponseRecord;
use crate::session::SessionManager;
use std::fmt::Write;
use tracing::{debug, warn};
use uuid::Uuid;

/// Builds prompts and submits batches for one run
#[derive(Debug, Clone)]
pub struct BatchScorer {
    run_id: Uuid,
    rubric: String,
}

impl BatchScorer {
    pub fn new(run_id: Uuid, rubric: impl Into<String>) -> Self {
        Self {
            run_id,
            rubric: rubric.into(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Prompt embedding every user of `batch` with their rendered evidence
    pub fn build_prompt(&self, batch: &Batch<'_>) -> String {
        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "Score each of the following forum users from 0 to 100 based on {}.",
            self.rubric
        );
        prompt.push('\n');

        for entry in batch.entries {
            let _ = writeln!(
                prompt,
                "Username: {}, Value: {}",
                entry.user_id,
                entry.evidence.render()
            );
        }

        prompt.push('\n');
        prompt.push_str(
            "Respond only with a JSON object mapping each username to an integer score \
             between 0 and 100, with no other text.",
        );
        prompt
    }

    /// Submit `batch` through the live session and capture the reply
    ///
    /// # Errors
    /// `TransportError` if the service could not be reached or refused the
    /// session; `session_stale` tells the caller to re-authenticate.
    pub async fn score(
        &self,
        batch: &Batch<'_>,
        sessions: &SessionManager,
    ) -> Result<RawResponseRecord, TransportError> {
        let prompt = self.build_prompt(batch);
        debug!(
            run_id = %self.run_id,
            batch_index = batch.index,
            users = batch.len(),
            prompt_chars = prompt.len(),
            "Submitting batch"
        );

        match sessions.send(&prompt).await {
            Ok(raw_text) => Ok(RawResponseRecord::new(self.run_id, batch.index, raw_text)),
            Err(e) => {
                warn!(batch_index = batch.index, error = %e, "Batch request failed");
                Err(TransportError {
                    batch_index: batch.index,
                    session_stale: e.is_session_stale(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
