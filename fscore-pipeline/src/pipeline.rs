//! Pipeline Orchestrator
//!
//! Sequences one scoring run:
//! `Idle → Loading → Authenticating → Scoring { batch, total } → Normalizing → Done | Failed`
//!
//! - Loading and authentication failures are terminal; no batch is sent.
//! - A failed batch is recorded in the report and the run moves on.
//! - A batch failing on a stale session drops it; the next batch logs in
//!   again, and a failed re-login ends the run with the raw log intact.
//!   A session restored from the cookie cache is the exception: its batch
//!   is resent once after a fresh login.
//! - The raw log is truncated when the first reply of the run is recorded.
//!   A run where every batch failed ends `Failed` without normalizing, so
//!   the previous raw log and score mapping stay as they were.
//! - Normalization runs once, after every batch.
//!
//! Batches are strictly sequential. The current state is published through a
//! watch channel so the HTTP surface and the CLI can observe progress.

use crate::error::{PipelineError, Result};
use crate::evidence::EvidenceStore;
use crate::normalizer;
use crate::partition::partition;
use crate::raw_log::RawLog;
use crate::scorer::BatchScorer;
use crate::scores::ScoreMapping;
use crate::session::{Credentials, SessionManager, SessionOrigin, SessionState};
use fscore_common::config::{PipelineSettings, RootFolderInitializer};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Observable pipeline state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Loading,
    Authenticating,
    /// `batch` is 1-based
    Scoring { batch: usize, total: usize },
    Normalizing,
    Done,
    Failed { reason: String },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed { .. })
    }
}

/// Files a run reads and writes
#[derive(Debug, Clone, PartialEq)]
pub struct PipelinePaths {
    pub evidence: PathBuf,
    pub raw_log: PathBuf,
    pub scores: PathBuf,
}

impl PipelinePaths {
    pub fn from_root(root: &RootFolderInitializer) -> Self {
        Self {
            evidence: root.evidence_path(),
            raw_log: root.raw_log_path(),
            scores: root.scores_path(),
        }
    }
}

/// Run parameters
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    /// Only needed when there is something to score
    pub credentials: Option<Credentials>,
    pub rubric: String,
}

impl PipelineConfig {
    pub fn from_settings(settings: &PipelineSettings, credentials: Option<Credentials>) -> Self {
        Self {
            batch_size: settings.batch_size,
            credentials,
            rubric: settings.rubric.clone(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// A batch that produced no raw record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub batch_index: usize,
    pub users: Vec<String>,
    pub reason: String,
}

/// Outcome of the scoring stages
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoringReport {
    pub run_id: Uuid,
    pub total_batches: usize,
    pub scored_batches: usize,
    pub failed_batches: Vec<BatchFailure>,
}

/// Outcome of a full run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub scoring: ScoringReport,
    pub scores: ScoreMapping,
    pub state: PipelineState,
}

pub struct Pipeline {
    paths: PipelinePaths,
    config: PipelineConfig,
    state_tx: Arc<watch::Sender<PipelineState>>,
}

impl Pipeline {
    pub fn new(paths: PipelinePaths, config: PipelineConfig) -> Self {
        let (state_tx, _) = watch::channel(PipelineState::Idle);
        Self {
            paths,
            config,
            state_tx: Arc::new(state_tx),
        }
    }

    /// Publish state on a channel that outlives this pipeline
    pub fn with_state_sender(mut self, state_tx: Arc<watch::Sender<PipelineState>>) -> Self {
        self.state_tx = state_tx;
        self
    }

    pub fn paths(&self) -> &PipelinePaths {
        &self.paths
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Receive every state change
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> PipelineState {
        self.state_tx.borrow().clone()
    }

    fn set_state(&self, state: PipelineState) {
        info!(state = ?state, "Pipeline state changed");
        self.state_tx.send_replace(state);
    }

    /// Mark the pipeline `Done` or `Failed` depending on `result`
    fn conclude<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.set_state(PipelineState::Done),
            Err(e) => {
                error!(error = %e, "Pipeline run failed");
                self.set_state(PipelineState::Failed {
                    reason: e.to_string(),
                });
            }
        }
        result
    }

    /// Load, authenticate, score every batch, then normalize
    pub async fn run(&self, sessions: &mut SessionManager) -> Result<RunReport> {
        let outcome = match self.score_batches(sessions).await {
            Ok(scoring) => self.normalize_raw_log().map(|scores| (scoring, scores)),
            Err(e) => Err(e),
        };

        let (scoring, scores) = self.conclude(outcome)?;
        info!(
            run_id = %scoring.run_id,
            scored_batches = scoring.scored_batches,
            failed_batches = scoring.failed_batches.len(),
            users = scores.len(),
            "Pipeline run complete"
        );

        Ok(RunReport {
            scoring,
            scores,
            state: self.state(),
        })
    }

    /// Load, authenticate and score every batch; the raw log is left for a
    /// later `normalize`
    pub async fn score_all(&self, sessions: &mut SessionManager) -> Result<ScoringReport> {
        let outcome = self.score_batches(sessions).await;
        self.conclude(outcome)
    }

    /// Normalize the existing raw log into the score mapping file
    pub fn normalize(&self) -> Result<ScoreMapping> {
        let outcome = self.normalize_raw_log();
        self.conclude(outcome)
    }

    async fn score_batches(&self, sessions: &mut SessionManager) -> Result<ScoringReport> {
        let run_id = Uuid::new_v4();

        self.set_state(PipelineState::Loading);
        let store = EvidenceStore::load(&self.paths.evidence)?;
        let batches = partition(&store, self.config.batch_size)?;
        let total_batches = batches.len();
        info!(
            run_id = %run_id,
            users = store.len(),
            total_batches,
            batch_size = self.config.batch_size,
            "Evidence store loaded"
        );

        let mut report = ScoringReport {
            run_id,
            total_batches,
            scored_batches: 0,
            failed_batches: Vec::new(),
        };
        let raw_log = RawLog::new(&self.paths.raw_log);

        if total_batches == 0 {
            info!(run_id = %run_id, "Evidence store is empty, nothing to score");
            raw_log.begin_run()?;
            return Ok(report);
        }

        let credentials = self.config.credentials.as_ref().ok_or_else(|| {
            PipelineError::Common(fscore_common::Error::Config(
                "scoring service credentials not configured".to_string(),
            ))
        })?;

        self.set_state(PipelineState::Authenticating);
        sessions.acquire(credentials).await?;

        let scorer = BatchScorer::new(run_id, self.config.rubric.clone());
        // The previous run's replies are replaced only once this run has one
        let mut log_started = false;

        for batch in batches {
            if sessions.session().is_none() {
                self.set_state(PipelineState::Authenticating);
                info!(batch_index = batch.index, "Re-establishing session");
                sessions.acquire(credentials).await?;
            }

            let scoring = PipelineState::Scoring {
                batch: batch.index + 1,
                total: total_batches,
            };
            self.set_state(scoring.clone());

            let mut outcome = scorer.score(&batch, sessions).await;

            // Cookies restored from disk may have expired since they were
            // cached; log in once and resend the same batch
            let cached_session_rejected = matches!(&outcome, Err(e) if e.session_stale)
                && sessions.origin() == Some(SessionOrigin::CookieCache);
            if cached_session_rejected {
                info!(batch_index = batch.index, "Cached session rejected, logging in");
                sessions.invalidate(SessionState::Expired);
                self.set_state(PipelineState::Authenticating);
                sessions.acquire(credentials).await?;
                self.set_state(scoring);
                outcome = scorer.score(&batch, sessions).await;
            }

            match outcome {
                Ok(record) => {
                    let recorded = if log_started {
                        raw_log.append(&record)
                    } else {
                        raw_log.begin_run().and_then(|()| raw_log.append(&record))
                    };
                    if let Err(e) = recorded {
                        error!(
                            batch_index = record.batch_index,
                            raw_text = %record.raw_text,
                            "Raw reply could not be recorded"
                        );
                        return Err(e);
                    }
                    log_started = true;
                    report.scored_batches += 1;
                    info!(
                        run_id = %run_id,
                        batch_index = batch.index,
                        users = batch.len(),
                        "Batch scored"
                    );
                }
                Err(e) => {
                    warn!(
                        run_id = %run_id,
                        batch_index = e.batch_index,
                        reason = %e.reason,
                        "Batch failed, continuing with next batch"
                    );
                    if e.session_stale {
                        sessions.invalidate(SessionState::Expired);
                    }
                    report.failed_batches.push(BatchFailure {
                        batch_index: e.batch_index,
                        users: batch.user_ids().map(String::from).collect(),
                        reason: e.reason,
                    });
                }
            }
        }

        if report.scored_batches == 0 {
            let last_reason = report
                .failed_batches
                .last()
                .map(|failure| failure.reason.clone())
                .unwrap_or_default();
            return Err(PipelineError::NothingScored {
                total_batches,
                last_reason,
            });
        }

        Ok(report)
    }

    fn normalize_raw_log(&self) -> Result<ScoreMapping> {
        self.set_state(PipelineState::Normalizing);
        normalizer::normalize_log(&RawLog::new(&self.paths.raw_log), &self.paths.scores)
    }
}

/// Reject a batch size of zero before a run starts
pub fn validate_batch_size(batch_size: usize) -> Result<usize> {
    if batch_size == 0 {
        return Err(PipelineError::InvalidInput(
            "batch size must be at least 1".to_string(),
        ));
    }
    Ok(batch_size)
}
