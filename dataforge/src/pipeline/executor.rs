//! Pipeline executor.
//!
//! Stages run strictly in order. A stage is swept in cycles: each of the
//! configured workers makes one claim attempt per cycle and, if it got a
//! row, runs it through the completion client and writes the result. A
//! stage ends after a cycle in which no worker claimed anything and no claim
//! attempt failed. Cycles are stretched to the configured minimum duration
//! and cancellation is honoured between cycles.

use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::claims::{claim_row, ClaimLease, ClaimRegistry};
use super::pacing::CyclePacer;
use super::spec::{validate_columns, validate_pipeline_columns, StageDescriptor};
use super::summary::{FailureRecord, RunSummary, SingleOutcome, StageReport};
use crate::cancellation::CancellationToken;
use crate::completion::CompletionClient;
use crate::config::{ExecutorConfig, ForgeConfig};
use crate::errors::{DataforgeError, DataforgeResult, MissingPromptError};
use crate::events::{EventSink, ForgeEvent, NoOpEventSink};
use crate::observability::{run_span, stage_span, worker_span};
use crate::store::{prompt_key, ClaimedRow, RowKey, RowStore};

/// Runs stage pipelines over a processing table.
pub struct PipelineExecutor {
    store: Arc<dyn RowStore>,
    client: Arc<CompletionClient>,
    config: ExecutorConfig,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
    registry: ClaimRegistry,
    prompts: DashMap<String, Arc<str>>,
}

/// What happened to one claimed row.
enum RowOutcome {
    Done { row: RowKey, text: String, attempts: usize },
    Failed(FailureRecord),
}

/// One worker's share of a cycle.
enum WorkerOutcome {
    /// Nothing was left to claim.
    Idle,
    Row(RowOutcome),
    /// The claim failed with a non-fatal storage error.
    ClaimFailed(DataforgeError),
}

/// Everything a worker needs for one stage, cheap to clone into tasks.
#[derive(Clone)]
struct StageWork {
    store: Arc<dyn RowStore>,
    client: Arc<CompletionClient>,
    registry: ClaimRegistry,
    events: Arc<dyn EventSink>,
    table: Arc<str>,
    stage: Arc<StageDescriptor>,
    prompt: Arc<str>,
}

impl StageWork {
    /// Claims at most one row and processes it.
    async fn claim_and_process(self, skip: Arc<[RowKey]>) -> DataforgeResult<WorkerOutcome> {
        let claimed = claim_row(
            self.store.as_ref(),
            &self.registry,
            &self.table,
            &self.stage,
            &skip,
        )
        .await;

        match claimed {
            Ok(Some((row, lease))) => self.process(row, lease).await.map(WorkerOutcome::Row),
            Ok(None) => Ok(WorkerOutcome::Idle),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(error = %err, "Claim failed");
                Ok(WorkerOutcome::ClaimFailed(err))
            }
        }
    }

    /// Runs a claimed row through the completion client and writes the
    /// result. The lease is released on every path.
    async fn process(&self, row: ClaimedRow, lease: ClaimLease) -> DataforgeResult<RowOutcome> {
        let destination = self.stage.destination();
        let result = async {
            let completion = self.client.complete(&self.prompt, &row.user_content()).await?;
            self.store
                .write_result(&self.table, row.key, destination, &completion.text)
                .await?;
            Ok::<_, DataforgeError>(completion)
        }
        .await;
        drop(lease);

        match result {
            Ok(completion) => {
                debug!(row = row.key, attempts = completion.attempts, "Row completed");
                self.events.try_emit(&ForgeEvent::RowCompleted {
                    stage: destination.to_string(),
                    row: row.key,
                    attempts: completion.attempts,
                    chars: completion.text.chars().count(),
                });
                Ok(RowOutcome::Done {
                    row: row.key,
                    text: completion.text,
                    attempts: completion.attempts,
                })
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(row = row.key, error = %err, "Row failed");
                self.events.try_emit(&ForgeEvent::RowFailed {
                    stage: destination.to_string(),
                    row: row.key,
                    error: err.to_string(),
                });
                Ok(RowOutcome::Failed(FailureRecord::from_error(row.key, &err)))
            }
        }
    }
}

impl PipelineExecutor {
    /// Creates an executor.
    pub fn new(
        store: Arc<dyn RowStore>,
        client: Arc<CompletionClient>,
        config: ExecutorConfig,
    ) -> DataforgeResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            client,
            config,
            events: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
            registry: ClaimRegistry::new(),
            prompts: DashMap::new(),
        })
    }

    /// Creates an executor with an HTTP completion client.
    ///
    /// The executor's `retry_attempts` sets the client's attempt budget.
    pub fn from_config(store: Arc<dyn RowStore>, config: &ForgeConfig) -> DataforgeResult<Self> {
        config.validate()?;
        let client = CompletionClient::from_config(&config.effective_completion())?;
        Self::new(store, Arc::new(client), config.executor.clone())
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Uses a caller-owned cancellation token.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// The token that stops this executor between cycles.
    #[must_use]
    pub fn cancellation_token(&self) -> Arc<CancellationToken> {
        self.cancel.clone()
    }

    /// The executor configuration.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Checks one stage's sources against the table's current columns.
    pub async fn validate_stage(&self, table: &str, stage: &StageDescriptor) -> DataforgeResult<()> {
        let columns = self.column_names(table).await?;
        validate_columns(&columns, stage)?;
        Ok(())
    }

    /// Validates a pipeline before any row work.
    ///
    /// Fails if the table is missing or a source column is unknown (a
    /// source may be an earlier stage's destination). On success, creates
    /// every missing destination column.
    pub async fn validate(&self, table: &str, stages: &[StageDescriptor]) -> DataforgeResult<()> {
        let columns = self.column_names(table).await?;
        validate_pipeline_columns(&columns, stages)?;

        for stage in stages {
            self.store.ensure_column(table, stage.destination()).await?;
        }
        Ok(())
    }

    async fn column_names(&self, table: &str) -> DataforgeResult<Vec<String>> {
        if !self.store.table_exists(table).await? {
            return Err(DataforgeError::MissingTable {
                table: table.to_string(),
            });
        }
        Ok(self
            .store
            .table_columns(table)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    async fn system_prompt(&self, table: &str, stage: &StageDescriptor) -> DataforgeResult<Arc<str>> {
        let key = prompt_key(table, stage.destination());
        if let Some(prompt) = self.prompts.get(&key) {
            return Ok(prompt.clone());
        }

        let prompt: Arc<str> = self
            .store
            .get_system_prompt(table, stage.destination())
            .await?
            .ok_or_else(|| MissingPromptError::new(table, stage.destination()))?
            .into();
        self.prompts.insert(key, prompt.clone());
        Ok(prompt)
    }

    /// Destination columns of `stages` that have no system prompt.
    ///
    /// Prompts that are found are cached for the run.
    pub async fn missing_prompts(&self, table: &str, stages: &[StageDescriptor]) -> DataforgeResult<Vec<String>> {
        let mut missing = Vec::new();
        for stage in stages {
            match self.system_prompt(table, stage).await {
                Ok(_) => {}
                Err(DataforgeError::MissingPrompt(_)) => missing.push(stage.destination().to_string()),
                Err(err) => return Err(err),
            }
        }
        Ok(missing)
    }

    fn stage_work(&self, table: &str, stage: &StageDescriptor, prompt: Arc<str>) -> StageWork {
        StageWork {
            store: self.store.clone(),
            client: self.client.clone(),
            registry: self.registry.clone(),
            events: self.events.clone(),
            table: Arc::from(table),
            stage: Arc::new(stage.clone()),
            prompt,
        }
    }

    /// Processes exactly one row through exactly one stage transition.
    ///
    /// Stages are tried in order; the first with a pending row is used.
    pub async fn run_single(&self, table: &str, stages: &[StageDescriptor]) -> DataforgeResult<SingleOutcome> {
        self.validate(table, stages).await?;

        for stage in stages {
            let Some((row, lease)) = claim_row(self.store.as_ref(), &self.registry, table, stage, &[]).await?
            else {
                continue;
            };

            let prompt = self.system_prompt(table, stage).await?;
            let label = stage.to_string();
            let outcome = self
                .stage_work(table, stage, prompt)
                .process(row, lease)
                .instrument(stage_span(stage.destination()))
                .await?;

            return Ok(match outcome {
                RowOutcome::Done { row, text, attempts } => SingleOutcome::Processed {
                    stage: label,
                    row,
                    text,
                    attempts,
                },
                RowOutcome::Failed(failure) => SingleOutcome::Failed {
                    stage: label,
                    row: failure.row,
                    failure,
                },
            });
        }

        Ok(SingleOutcome::NoPendingRow)
    }

    /// Sweeps every stage in order until no pending rows remain, using the
    /// configured number of workers.
    ///
    /// Row-level failures are counted in the summary; fatal errors abort
    /// the run. If cancelled, returns the partial summary with
    /// `cancelled` set.
    pub async fn run_parallel(&self, table: &str, stages: &[StageDescriptor]) -> DataforgeResult<RunSummary> {
        let run_id = Uuid::new_v4();
        self.run_stages(run_id, table, stages)
            .instrument(run_span(run_id, table))
            .await
    }

    async fn run_stages(&self, run_id: Uuid, table: &str, stages: &[StageDescriptor]) -> DataforgeResult<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::new(run_id, table);

        self.validate(table, stages).await?;
        for stage in self.missing_prompts(table, stages).await? {
            warn!(
                %stage,
                key = %prompt_key(table, &stage),
                "No system prompt; the stage stops the run if it has pending rows"
            );
        }

        info!(
            stages = stages.len(),
            threads = self.config.threads,
            "Starting pipeline run"
        );
        self.events
            .emit(&ForgeEvent::RunStarted {
                run_id,
                table: table.to_string(),
                stages: stages.iter().map(ToString::to_string).collect(),
                threads: self.config.threads,
            })
            .await;

        for stage in stages {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let report = self
                .sweep_stage(table, stage)
                .instrument(stage_span(stage.destination()))
                .await?;
            summary.stages.push(report);
        }
        summary.cancelled |= self.cancel.is_cancelled();
        summary.finish(started.elapsed());

        if summary.cancelled {
            let reason = self.cancel.reason().unwrap_or_default();
            info!(%reason, processed = summary.total_processed(), "Pipeline run cancelled");
            self.events
                .emit(&ForgeEvent::RunCancelled { run_id, reason })
                .await;
        } else {
            info!(
                processed = summary.total_processed(),
                failed = summary.total_failed(),
                duration_ms = summary.duration_ms,
                "Pipeline run completed"
            );
            self.events
                .emit(&ForgeEvent::RunCompleted {
                    run_id,
                    processed: summary.total_processed(),
                    failed: summary.total_failed(),
                    duration_ms: summary.duration_ms,
                })
                .await;
        }
        Ok(summary)
    }

    async fn sweep_stage(&self, table: &str, stage: &StageDescriptor) -> DataforgeResult<StageReport> {
        let mut report = StageReport::new(stage.to_string());
        let counts = self.store.stage_counts(table, stage).await?;

        info!(
            pending = counts.pending(),
            completed = counts.completed,
            eligible = counts.eligible,
            "Processing remaining rows"
        );
        self.events
            .emit(&ForgeEvent::StageStarted {
                stage: stage.destination().to_string(),
                eligible: counts.eligible,
                completed: counts.completed,
            })
            .await;

        if counts.pending() > 0 {
            let prompt = self.system_prompt(table, stage).await?;
            let work = self.stage_work(table, stage, prompt);
            self.run_cycles(&work, &mut report).await?;
        }

        info!(
            processed = report.processed,
            failed = report.failed,
            cycles = report.cycles,
            claim_errors = report.claim_errors,
            "Stage completed"
        );
        self.events
            .emit(&ForgeEvent::StageCompleted {
                stage: stage.destination().to_string(),
                processed: report.processed,
                failed: report.failed,
                cycles: report.cycles,
                claim_errors: report.claim_errors,
            })
            .await;
        Ok(report)
    }

    async fn run_cycles(&self, work: &StageWork, report: &mut StageReport) -> DataforgeResult<()> {
        let pacer = CyclePacer::new(self.config.min_cycle());
        let mut failed_rows: Vec<RowKey> = Vec::new();
        let mut error_only_cycles = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let cycle_start = Instant::now();
            report.cycles += 1;
            let cycle = report.cycles;
            let skip: Arc<[RowKey]> = Arc::from(failed_rows.as_slice());

            let mut tasks: FuturesUnordered<_> = (0..self.config.threads)
                .map(|worker| {
                    let work = work.clone();
                    let skip = skip.clone();
                    tokio::spawn(
                        work.claim_and_process(skip)
                            .instrument(worker_span(worker, cycle)),
                    )
                })
                .collect();

            let mut claimed = 0;
            let mut claim_error = None;
            let mut fatal = None;
            while let Some(joined) = tasks.next().await {
                let outcome = joined
                    .map_err(|e| DataforgeError::Worker(format!("Task join error: {e}")))
                    .and_then(|r| r);
                match outcome {
                    Ok(WorkerOutcome::Row(RowOutcome::Done { .. })) => {
                        claimed += 1;
                        report.record_success();
                    }
                    Ok(WorkerOutcome::Row(RowOutcome::Failed(failure))) => {
                        claimed += 1;
                        failed_rows.push(failure.row);
                        report.record_failure(failure);
                    }
                    Ok(WorkerOutcome::ClaimFailed(err)) => {
                        report.record_claim_error();
                        claim_error = Some(err);
                    }
                    Ok(WorkerOutcome::Idle) => {}
                    Err(err) => {
                        fatal.get_or_insert(err);
                    }
                }
            }

            if let Some(err) = fatal {
                warn!(cycle, error = %err, "Stopping run on fatal error");
                return Err(err);
            }

            debug!(cycle, claimed, "Cycle finished");
            match claim_error {
                None if claimed == 0 => return Ok(()),
                Some(err) if claimed == 0 => {
                    error_only_cycles += 1;
                    if error_only_cycles > self.config.max_claim_error_cycles {
                        warn!(cycle, error = %err, "Claims keep failing, stopping run");
                        return Err(err);
                    }
                }
                _ => error_only_cycles = 0,
            }

            tokio::select! {
                _ = pacer.pace(cycle_start) => {}
                () = self.cancel.cancelled() => {}
            }
        }
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("config", &self.config)
            .field("client", &self.client)
            .field("cancel", &self.cancel)
            .field("leased", &self.registry.len())
            .finish_non_exhaustive()
    }
}
