// ABOUTME: Refresh triggers - single-run guard, startup trigger, interval scheduler
// ABOUTME: Plus the injected shutdown hook that finalizes the target once

use crate::error::Result;
use crate::loader::{LoadOrchestrator, RunSummary};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::interval;

/// What a trigger call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerResult {
    /// A run was executed to completion
    Started,
    /// Another run was in flight; nothing was done
    AlreadyRunning,
    /// Refreshes are turned off by configuration
    Disabled,
}

/// Clears the running flag on every exit path, panics included.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Starts refreshes while guaranteeing at most one in flight.
pub struct RefreshTrigger {
    orchestrator: Arc<LoadOrchestrator>,
    enabled: bool,
    running: AtomicBool,
    startup_fired: AtomicBool,
    last_summary: Mutex<Option<RunSummary>>,
}

impl RefreshTrigger {
    pub fn new(orchestrator: Arc<LoadOrchestrator>, enabled: bool) -> Self {
        Self {
            orchestrator,
            enabled,
            running: AtomicBool::new(false),
            startup_fired: AtomicBool::new(false),
            last_summary: Mutex::new(None),
        }
    }

    pub fn orchestrator(&self) -> &Arc<LoadOrchestrator> {
        &self.orchestrator
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Summary of the most recent run that completed.
    pub fn last_summary(&self) -> Option<RunSummary> {
        self.last_summary.lock().ok().and_then(|s| s.clone())
    }

    /// Run a refresh now unless one is already running
    ///
    /// Waits for the run to finish. The guard is released even when the run
    /// fails with a run-scoped error, which is returned as `Err`.
    pub async fn trigger_full_refresh(&self, reason: &str) -> Result<TriggerResult> {
        let label = &self.orchestrator.settings().job_label;
        if !self.enabled {
            tracing::info!("{} is disabled, ignoring trigger ({})", label, reason);
            return Ok(TriggerResult::Disabled);
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("{} already running, ignoring trigger ({})", label, reason);
            return Ok(TriggerResult::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        tracing::info!("{} triggered: {}", label, reason);
        let summary = self.orchestrator.run_full_refresh().await?;
        if let Ok(mut last) = self.last_summary.lock() {
            *last = Some(summary);
        }
        Ok(TriggerResult::Started)
    }

    /// Like [`trigger_full_refresh`](Self::trigger_full_refresh), but only
    /// the first call per trigger does anything. Later calls return
    /// `Ok(None)`.
    pub async fn trigger_startup_refresh(&self, reason: &str) -> Result<Option<TriggerResult>> {
        if self.startup_fired.swap(true, Ordering::SeqCst) {
            tracing::debug!("Startup refresh already fired, ignoring ({})", reason);
            return Ok(None);
        }
        self.trigger_full_refresh(reason).await.map(Some)
    }

    /// Trigger a refresh on every tick of `period` until `shutdown` fires.
    ///
    /// The first tick is immediate. Run-scoped failures are logged and the
    /// loop keeps going. Shutdown is only checked between runs, so an
    /// in-flight run always finishes before this returns.
    pub async fn run_every(
        &self,
        period: Duration,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut ticker = interval(period);
        let mut cycles = 0u64;

        tracing::info!(
            "Scheduling {} every {:?}",
            self.orchestrator.settings().job_label,
            period
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping scheduler");
                    break;
                }
                _ = ticker.tick() => {
                    cycles += 1;
                    let reason = format!("scheduled cycle {}", cycles);

                    // Runs to completion; a shutdown sent meanwhile is seen on the next pass.
                    match self.trigger_full_refresh(&reason).await {
                        Ok(TriggerResult::Started) => {
                            tracing::info!("Scheduled cycle {} completed", cycles);
                        }
                        Ok(other) => {
                            tracing::info!("Scheduled cycle {} skipped: {:?}", cycles, other);
                        }
                        Err(e) => {
                            tracing::error!("Scheduled cycle {} failed: {}", cycles, e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

type HookFn = Box<dyn FnOnce() + Send>;

/// Callback run once during process shutdown, e.g. to checkpoint the target.
pub struct ShutdownHook(Mutex<Option<HookFn>>);

impl ShutdownHook {
    pub fn new(hook: impl FnOnce() + Send + 'static) -> Self {
        Self(Mutex::new(Some(Box::new(hook))))
    }

    /// Run the hook. Returns `false` if it already ran.
    pub fn fire(&self) -> bool {
        let hook = match self.0.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match hook {
            Some(hook) => {
                hook();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for ShutdownHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self.0.lock().map(|s| s.is_some()).unwrap_or(false);
        f.debug_struct("ShutdownHook")
            .field("pending", &pending)
            .finish()
    }
}
