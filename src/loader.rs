// ABOUTME: Load orchestrator - discovery, filtering, parallel copy, views, sequences, report
// ABOUTME: One engine for full and row-limited sample refreshes

use crate::config::RunSettings;
use crate::error::{LoaderError, Result};
use crate::report::{ReconciliationReport, ReconciliationReporter};
use crate::source::{catalog, SchemaObjectSet, SequenceDescriptor, SourceConnector};
use crate::target::{self, TargetDatabase};
use crate::transfer::{copy_table, TransferOutcome, TransferTask};
use crate::utils::{condense_error, retry_with_backoff, LOG_MESSAGE_LIMIT};
use crate::views::{self, ViewSqlTranslator};
use anyhow::Context;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;

/// Rows copied per table in sample mode when no positive limit is configured.
pub const DEFAULT_SAMPLE_ROWS: usize = 100;

/// Which rows a run copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Full,
    Sample { row_limit: usize },
}

impl LoadMode {
    /// Sample mode; a non-positive limit falls back to [`DEFAULT_SAMPLE_ROWS`].
    pub fn sample(row_limit: i64) -> Self {
        let row_limit = if row_limit <= 0 {
            DEFAULT_SAMPLE_ROWS
        } else {
            row_limit as usize
        };
        LoadMode::Sample { row_limit }
    }

    pub fn row_limit(&self) -> Option<usize> {
        match self {
            LoadMode::Full => None,
            LoadMode::Sample { row_limit } => Some(*row_limit),
        }
    }

    pub fn default_job_label(&self) -> &'static str {
        match self {
            LoadMode::Full => "Oracle -> DuckDB full refresh",
            LoadMode::Sample { .. } => "Oracle -> DuckDB sample refresh",
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Full => f.write_str("full"),
            LoadMode::Sample { row_limit } => write!(f, "sample ({} rows per table)", row_limit),
        }
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Discovering,
    Filtering,
    Copying,
    RecreatingViews,
    SyncingSequences,
    Reporting,
    /// Run aborted by a run-scoped error raised during `during`
    Failed { during: Box<RunPhase> },
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Idle => f.write_str("IDLE"),
            RunPhase::Discovering => f.write_str("DISCOVERING"),
            RunPhase::Filtering => f.write_str("FILTERING"),
            RunPhase::Copying => f.write_str("COPYING"),
            RunPhase::RecreatingViews => f.write_str("RECREATING_VIEWS"),
            RunPhase::SyncingSequences => f.write_str("SYNCING_SEQUENCES"),
            RunPhase::Reporting => f.write_str("REPORTING"),
            RunPhase::Failed { during } => write!(f, "FAILED (during {})", during),
        }
    }
}

/// A view or sequence that could not be recreated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFailure {
    pub name: String,
    pub error: String,
}

/// What one completed run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub job_label: String,
    pub mode: LoadMode,
    pub phase: RunPhase,
    pub discovered: SchemaObjectSet,
    /// Objects excluded by the blacklist, in discovery order
    pub skipped: Vec<String>,
    pub outcomes: Vec<TransferOutcome>,
    pub view_failures: Vec<ObjectFailure>,
    pub sequence_failures: Vec<ObjectFailure>,
    pub report: ReconciliationReport,
    pub rendered_report: String,
}

impl RunSummary {
    pub fn outcome(&self, table: &str) -> Option<&TransferOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.table().eq_ignore_ascii_case(table))
    }

    pub fn copied_tables(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_copied()).count()
    }

    pub fn failed_tables(&self) -> usize {
        self.outcomes.len() - self.copied_tables()
    }

    /// No table, view or sequence failed.
    pub fn is_clean(&self) -> bool {
        self.failed_tables() == 0
            && self.view_failures.is_empty()
            && self.sequence_failures.is_empty()
    }
}

/// Names kept and names excluded by the blacklist.
struct Partitioned<T> {
    included: Vec<T>,
    skipped: Vec<String>,
}

/// Runs refreshes of one source schema into one target database.
pub struct LoadOrchestrator {
    settings: RunSettings,
    connector: Arc<dyn SourceConnector>,
    target: Arc<TargetDatabase>,
    phase: Mutex<RunPhase>,
    completed: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
}

impl LoadOrchestrator {
    pub fn new(
        settings: RunSettings,
        connector: Arc<dyn SourceConnector>,
        target: Arc<TargetDatabase>,
    ) -> Self {
        Self {
            settings,
            connector,
            target,
            phase: Mutex::new(RunPhase::Idle),
            completed: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn target(&self) -> &Arc<TargetDatabase> {
        &self.target
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
            .lock()
            .map(|p| p.clone())
            .unwrap_or(RunPhase::Idle)
    }

    /// Tables finished so far in the current copy phase: (copied, failed).
    pub fn progress(&self) -> (usize, usize) {
        (
            self.completed.load(Ordering::SeqCst),
            self.failed.load(Ordering::SeqCst),
        )
    }

    fn set_phase(&self, next: RunPhase) {
        if let Ok(mut phase) = self.phase.lock() {
            tracing::info!("[{}] {} -> {}", self.settings.job_label, *phase, next);
            *phase = next;
        }
    }

    /// Run one complete refresh
    ///
    /// Per-object failures are absorbed into the summary and the report.
    ///
    /// # Errors
    ///
    /// Only run-scoped failures: the source is unreachable or catalog
    /// discovery fails, or a worker panics. The phase is then left at
    /// [`RunPhase::Failed`].
    pub async fn run_full_refresh(&self) -> Result<RunSummary> {
        let started = Instant::now();
        tracing::info!(
            "Starting {} of schema {} ({})",
            self.settings.job_label,
            self.settings.schema,
            self.settings.mode
        );

        match self.execute().await {
            Ok(summary) => {
                self.set_phase(RunPhase::Idle);
                tracing::info!(
                    "{} finished in {:.1}s: {} tables copied, {} failed, {} objects skipped",
                    self.settings.job_label,
                    started.elapsed().as_secs_f64(),
                    summary.copied_tables(),
                    summary.failed_tables(),
                    summary.skipped.len()
                );
                Ok(RunSummary {
                    phase: RunPhase::Idle,
                    ..summary
                })
            }
            Err(e) => {
                let during = Box::new(self.phase());
                self.set_phase(RunPhase::Failed { during });
                tracing::error!("{} failed: {}", self.settings.job_label, e);
                Err(e)
            }
        }
    }

    async fn execute(&self) -> Result<RunSummary> {
        self.set_phase(RunPhase::Discovering);
        let objects = Arc::new(self.discover().await?);

        self.set_phase(RunPhase::Filtering);
        let tables = self.partition(objects.tables.clone(), |t| t.as_str());
        let views = self.partition(objects.views.clone(), |v| v.as_str());
        let sequences = self.partition(objects.sequences.clone(), |s| s.name.as_str());
        let skipped: Vec<String> = tables
            .skipped
            .iter()
            .chain(&views.skipped)
            .chain(&sequences.skipped)
            .cloned()
            .collect();
        if !skipped.is_empty() {
            tracing::info!("Skipping blacklisted objects: {}", skipped.join(", "));
        }

        self.set_phase(RunPhase::Copying);
        let outcomes = self.copy_tables(tables.included).await;

        self.set_phase(RunPhase::RecreatingViews);
        let view_failures = {
            let connector = self.connector.clone();
            let target_db = self.target.clone();
            let translator = ViewSqlTranslator::new(&self.settings.schema);
            let names = views.included;
            tokio::task::spawn_blocking(move || {
                recreate_views(connector.as_ref(), &target_db, &translator, &names)
            })
            .await?
        };

        self.set_phase(RunPhase::SyncingSequences);
        let sequence_failures = {
            let target_db = self.target.clone();
            let list = sequences.included;
            tokio::task::spawn_blocking(move || sync_sequences(&target_db, &list)).await?
        };

        self.set_phase(RunPhase::Reporting);
        let report = {
            let connector = self.connector.clone();
            let target_db = self.target.clone();
            let schema = self.settings.schema.clone();
            let blacklist = self.settings.blacklist.clone();
            let objects = objects.clone();
            let failed_tables: Vec<(String, String)> = outcomes
                .iter()
                .filter_map(|outcome| match outcome {
                    TransferOutcome::Failed { table, error, .. } => Some((table.clone(), error.clone())),
                    TransferOutcome::Copied { .. } => None,
                })
                .collect();
            let failed_views: Vec<(String, String)> = view_failures
                .iter()
                .map(|failure| (failure.name.clone(), failure.error.clone()))
                .collect();
            tokio::task::spawn_blocking(move || {
                ReconciliationReporter::new(connector.as_ref(), &target_db, &schema, &blacklist)
                    .with_failed_tables(failed_tables)
                    .with_failed_views(failed_views)
                    .build_report(&objects)
            })
            .await?
        };
        let rendered_report = report.render();
        tracing::info!("\n{}", rendered_report);

        Ok(RunSummary {
            job_label: self.settings.job_label.clone(),
            mode: self.settings.mode,
            phase: self.phase(),
            discovered: objects.as_ref().clone(),
            skipped,
            outcomes,
            view_failures,
            sequence_failures,
            report,
            rendered_report,
        })
    }

    async fn discover(&self) -> Result<SchemaObjectSet> {
        let connector = self.connector.clone();
        let schema = self.settings.schema.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = connector.connect().map_err(LoaderError::Source)?;
            catalog::discover(session.as_mut(), &schema)
                .map_err(|e| LoaderError::discovery(schema.clone(), e))
        })
        .await?
    }

    fn partition<T>(&self, items: Vec<T>, name: impl Fn(&T) -> &str) -> Partitioned<T> {
        let mut included = Vec::with_capacity(items.len());
        let mut skipped = Vec::new();
        for item in items {
            if self.settings.blacklist.is_excluded(name(&item)) {
                skipped.push(name(&item).to_string());
            } else {
                included.push(item);
            }
        }
        Partitioned { included, skipped }
    }

    /// Copy every table under a pool of `threads` workers.
    ///
    /// Each table retries as a whole, on fresh connections, up to
    /// `max_retries` attempts. A failing table never affects its siblings.
    async fn copy_tables(&self, tables: Vec<String>) -> Vec<TransferOutcome> {
        self.completed.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);

        let total = tables.len();
        let semaphore = Arc::new(Semaphore::new(self.settings.threads.max(1)));
        let mut handles = Vec::with_capacity(total);

        for table in tables {
            let task = TransferTask::new(&self.settings.schema, &table, self.settings.mode.row_limit());
            let semaphore = semaphore.clone();
            let connector = self.connector.clone();
            let target_db = self.target.clone();
            let completed = self.completed.clone();
            let failed = self.failed.clone();
            let batch_size = self.settings.batch_size;
            let max_attempts = self.settings.max_retries.max(1);
            let backoff = self.settings.retry_backoff;

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        failed.fetch_add(1, Ordering::SeqCst);
                        return TransferOutcome::Failed {
                            table: task.table.clone(),
                            error: e.to_string(),
                            attempts: 0,
                        };
                    }
                };

                let started = Instant::now();
                let mut attempts = 0;
                let result = retry_with_backoff(
                    &task.table,
                    |attempt| {
                        attempts = attempt;
                        let task = task.clone();
                        let connector = connector.clone();
                        let target_db = target_db.clone();
                        async move {
                            tokio::task::spawn_blocking(move || {
                                copy_table(&task, connector.as_ref(), &target_db, batch_size)
                            })
                            .await
                            .context("Copy worker panicked")?
                        }
                    },
                    max_attempts,
                    backoff,
                )
                .await;

                match result {
                    Ok(rows) => {
                        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                        tracing::info!(
                            "{}: copied {} rows in {:.1}s [{}/{}]",
                            task.table,
                            rows,
                            started.elapsed().as_secs_f64(),
                            done + failed.load(Ordering::SeqCst),
                            total
                        );
                        TransferOutcome::Copied {
                            table: task.table,
                            rows,
                            attempts,
                        }
                    }
                    Err(e) => {
                        failed.fetch_add(1, Ordering::SeqCst);
                        let error = condense_error(&e, LOG_MESSAGE_LIMIT);
                        tracing::error!(
                            "{}: copy failed after {} attempt(s): {}",
                            task.table,
                            attempts,
                            error
                        );
                        TransferOutcome::Failed {
                            table: task.table,
                            error,
                            attempts,
                        }
                    }
                }
            });
            handles.push((table, handle));
        }

        let mut outcomes = Vec::with_capacity(total);
        for (table, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::SeqCst);
                    tracing::error!("{}: copy task panicked: {}", table, e);
                    outcomes.push(TransferOutcome::Failed {
                        table,
                        error: format!("Task panicked: {}", e),
                        attempts: 0,
                    });
                }
            }
        }
        outcomes
    }
}

/// Recreate every view on one source session; failures are per view.
fn recreate_views(
    connector: &dyn SourceConnector,
    target_db: &TargetDatabase,
    translator: &ViewSqlTranslator,
    names: &[String],
) -> Vec<ObjectFailure> {
    if names.is_empty() {
        return Vec::new();
    }

    let connections = connector
        .connect()
        .context("Failed to connect to source")
        .and_then(|session| Ok((session, target_db.connect()?)));
    let (mut session, conn) = match connections {
        Ok(pair) => pair,
        Err(e) => {
            let error = condense_error(&e, LOG_MESSAGE_LIMIT);
            tracing::error!("Cannot recreate views: {}", error);
            return names
                .iter()
                .map(|name| ObjectFailure {
                    name: name.clone(),
                    error: error.clone(),
                })
                .collect();
        }
    };

    let mut failures = Vec::new();
    for name in names {
        if let Err(e) = views::recreate_view(session.as_mut(), &conn, translator, name) {
            let error = condense_error(&e, LOG_MESSAGE_LIMIT);
            tracing::warn!("View {}: {}", name, error);
            failures.push(ObjectFailure {
                name: name.clone(),
                error,
            });
        }
    }
    failures
}

/// Recreate every sequence at its source position; failures are per sequence.
fn sync_sequences(target_db: &TargetDatabase, sequences: &[SequenceDescriptor]) -> Vec<ObjectFailure> {
    if sequences.is_empty() {
        return Vec::new();
    }

    let conn = match target_db.connect() {
        Ok(conn) => conn,
        Err(e) => {
            let error = condense_error(&e, LOG_MESSAGE_LIMIT);
            tracing::error!("Cannot sync sequences: {}", error);
            return sequences
                .iter()
                .map(|s| ObjectFailure {
                    name: s.name.clone(),
                    error: error.clone(),
                })
                .collect();
        }
    };

    let mut failures = Vec::new();
    for sequence in sequences {
        match target::recreate_sequence(&conn, sequence) {
            Ok(()) => tracing::info!(
                "Synced sequence {} to {}",
                sequence.name,
                sequence.last_number
            ),
            Err(e) => {
                let error = condense_error(&e, LOG_MESSAGE_LIMIT);
                tracing::warn!("Sequence {}: {}", sequence.name, error);
                failures.push(ObjectFailure {
                    name: sequence.name.clone(),
                    error,
                });
            }
        }
    }
    failures
}
