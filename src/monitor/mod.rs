//! Scan monitor: starts scans and observes them through a single,
//! cancellable poll task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{OrchestratorError, Scan, ScanRequest, ScanStatus};
use crate::engine::ScanEngine;

/// Something the poll task observed
#[derive(Debug, Clone, PartialEq)]
pub enum ScanUpdate {
    /// Latest state of the scan
    Status(Scan),
    /// The scan no longer exists; polling stopped
    Removed(String),
    /// A poll call failed; polling stopped
    PollFailed { scan_id: String, error: OrchestratorError },
}

impl ScanUpdate {
    pub fn scan_id(&self) -> &str {
        match self {
            ScanUpdate::Status(scan) => &scan.id,
            ScanUpdate::Removed(scan_id) => scan_id,
            ScanUpdate::PollFailed { scan_id, .. } => scan_id,
        }
    }

    /// Returns whether the poll task exits after sending this update
    pub fn is_final(&self) -> bool {
        match self {
            ScanUpdate::Status(scan) => scan.is_terminal(),
            ScanUpdate::Removed(_) | ScanUpdate::PollFailed { .. } => true,
        }
    }
}

/// Handle to the running poll task. Dropping it stops the task.
struct PollHandle {
    generation: u64,
    scan_id: String,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
        self.task.abort();
    }
}

/// Owns the current scan and the only poll loop of a session
pub struct ScanMonitor {
    engine: Arc<dyn ScanEngine>,
    poll_interval: Duration,
    recent_limit: u32,
    current: Option<Scan>,
    recent: Vec<Scan>,
    poll: Option<PollHandle>,
    generation: u64,
    updates_tx: mpsc::UnboundedSender<(u64, ScanUpdate)>,
    updates_rx: mpsc::UnboundedReceiver<(u64, ScanUpdate)>,
}

impl ScanMonitor {
    pub fn new(engine: Arc<dyn ScanEngine>, poll_interval: Duration, recent_limit: u32) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            poll_interval,
            recent_limit,
            current: None,
            recent: Vec::new(),
            poll: None,
            generation: 0,
            updates_tx,
            updates_rx,
        }
    }

    pub fn current(&self) -> Option<&Scan> {
        self.current.as_ref()
    }

    pub fn recent_scans(&self) -> &[Scan] {
        &self.recent
    }

    /// Returns whether a poll loop is active
    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    pub fn polling_scan_id(&self) -> Option<&str> {
        self.poll.as_ref().map(|p| p.scan_id.as_str())
    }

    /// Validate the request, queue the scan and start polling it
    pub async fn start_scan(&mut self, request: &ScanRequest) -> Result<Scan, OrchestratorError> {
        request.validate()?;

        let scan_id = self.engine.start_scan(request).await?;
        info!("Started scan {} targeting API {}", scan_id, request.target_api_version);

        let scan = Scan::queued(scan_id.clone(), request);
        self.current = Some(scan.clone());
        self.start_polling(&scan_id);

        Ok(scan)
    }

    /// Single status read without touching the poll loop
    pub async fn poll_status(&self, scan_id: &str) -> Result<Option<Scan>, OrchestratorError> {
        Ok(self.engine.get_scan_status(scan_id).await?)
    }

    /// Make `scan_id` the current scan. Active scans are polled, terminal
    /// ones are not.
    pub async fn select_scan(&mut self, scan_id: &str) -> Result<Scan, OrchestratorError> {
        let scan = self
            .poll_status(scan_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(format!("Scan {} no longer exists", scan_id)))?;

        self.current = Some(scan.clone());
        if scan.status.is_active() {
            self.start_polling(scan_id);
        } else {
            self.stop_polling();
        }

        Ok(scan)
    }

    /// Replace any running poll loop with one for `scan_id`
    pub fn start_polling(&mut self, scan_id: &str) {
        self.stop_polling();

        self.generation += 1;
        let generation = self.generation;
        let token = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.engine),
            scan_id.to_string(),
            self.poll_interval,
            generation,
            token.clone(),
            self.updates_tx.clone(),
        ));

        debug!("Polling scan {} every {:?}", scan_id, self.poll_interval);
        self.poll = Some(PollHandle {
            generation,
            scan_id: scan_id.to_string(),
            token,
            task,
        });
    }

    /// Stop the poll loop, if any, and discard anything it already sent
    pub fn stop_polling(&mut self) {
        if let Some(handle) = self.poll.take() {
            debug!("Stopped polling scan {}", handle.scan_id);
        }
        while self.updates_rx.try_recv().is_ok() {}
    }

    /// Wait for the next update from the active poll loop and apply it.
    /// Returns `None` when nothing is being polled.
    pub async fn next_update(&mut self) -> Option<ScanUpdate> {
        loop {
            let generation = self.poll.as_ref()?.generation;
            let (sent_by, update) = self.updates_rx.recv().await?;
            if sent_by == generation {
                self.apply(&update);
                return Some(update);
            }
        }
    }

    /// Apply an update that is already waiting, without blocking
    pub fn try_next_update(&mut self) -> Option<ScanUpdate> {
        loop {
            let generation = self.poll.as_ref()?.generation;
            let (sent_by, update) = self.updates_rx.try_recv().ok()?;
            if sent_by == generation {
                self.apply(&update);
                return Some(update);
            }
        }
    }

    fn apply(&mut self, update: &ScanUpdate) {
        if update.is_final() {
            self.poll = None;
        }
        match update {
            ScanUpdate::Status(scan) => self.current = Some(scan.clone()),
            ScanUpdate::Removed(scan_id) => {
                info!("Scan {} was removed; polling stopped", scan_id);
                self.current = None;
            }
            ScanUpdate::PollFailed { scan_id, error } => {
                warn!("Polling scan {} failed: {}", scan_id, error);
            }
        }
    }

    /// Stop polling, then ask the engine to cancel. Local polling stops even
    /// when the engine call fails.
    pub async fn cancel_scan(&mut self) -> Result<(), OrchestratorError> {
        let scan_id = self
            .current
            .as_ref()
            .map(|s| s.id.clone())
            .ok_or_else(|| OrchestratorError::validation("No scan to cancel"))?;

        self.stop_polling();
        self.engine.cancel_scan(&scan_id).await?;
        info!("Cancelled scan {}", scan_id);

        if let Some(scan) = self.current.as_mut() {
            scan.status = ScanStatus::Cancelled;
        }
        if let Err(e) = self.refresh_recent().await {
            warn!("Failed to refresh recent scans: {}", e);
        }

        Ok(())
    }

    pub async fn refresh_recent(&mut self) -> Result<&[Scan], OrchestratorError> {
        self.recent = self.engine.get_recent_scans(self.recent_limit).await?;
        Ok(&self.recent)
    }

    /// Forget the current scan and stop polling
    pub fn reset(&mut self) {
        self.stop_polling();
        self.current = None;
    }
}

async fn poll_loop(
    engine: Arc<dyn ScanEngine>,
    scan_id: String,
    period: Duration,
    generation: u64,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<(u64, ScanUpdate)>,
) {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = engine.get_scan_status(&scan_id) => result,
        };

        let update = match result {
            Ok(Some(scan)) => {
                debug!(
                    "Scan {} is {} ({}/{})",
                    scan.id, scan.status, scan.processed_artifacts, scan.total_artifacts
                );
                ScanUpdate::Status(scan)
            }
            Ok(None) => ScanUpdate::Removed(scan_id.clone()),
            Err(e) => ScanUpdate::PollFailed {
                scan_id: scan_id.clone(),
                error: OrchestratorError::TransientPoll(e.to_string()),
            },
        };

        let done = update.is_final();
        if tx.send((generation, update)).is_err() || done {
            break;
        }
    }
}
