//! Grouped batch runs over the region catalog
//!
//! Regions are split into contiguous groups of `group_size`. All regions of
//! one group run concurrently; groups run one after another with a fixed
//! pause in between (not after the last). A failing region becomes a
//! failure outcome and never affects its siblings. Outcomes are reported in
//! catalog order regardless of completion order.
//!
//! Dropping a run (for example on a timeout) aborts the region tasks it
//! spawned, so a retried run never overlaps the remains of the last one.

use crate::AdvisoryError;
use crate::config::BatchConfig;
use crate::error::Stage;
use crate::processor::RegionHandler;
use crate::regions::Region;
use futures::future::join_all;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::task::AbortHandle;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// Result for one region of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub region_code: String,
    pub display_name: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchOutcome {
    fn success(region: &Region, message: String) -> Self {
        Self {
            region_code: region.code.clone(),
            display_name: region.display_name.clone(),
            status: OutcomeStatus::Success,
            message: Some(message),
            stage: None,
            error: None,
        }
    }

    fn failure(region: &Region, stage: Option<Stage>, error: String) -> Self {
        Self {
            region_code: region.code.clone(),
            display_name: region.display_name.clone(),
            status: OutcomeStatus::Failure,
            message: None,
            stage,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Aggregate of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_regions: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub groups: usize,
    pub outcomes: Vec<BatchOutcome>,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// State of the most recently started run, tagged with its run number
#[derive(Debug, Clone, Copy)]
struct RunState {
    run: u64,
    state: BatchState,
}

pub struct BatchOrchestrator {
    handler: Arc<dyn RegionHandler>,
    group_size: usize,
    group_interval: Duration,
    state: Mutex<RunState>,
}

/// Marks its run as failed unless it was finished explicitly.
struct RunGuard<'a> {
    orchestrator: &'a BatchOrchestrator,
    run: u64,
    finished: bool,
}

impl RunGuard<'_> {
    fn finish(mut self, state: BatchState) {
        self.finished = true;
        self.orchestrator.finish_run(self.run, state);
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(run = self.run, "Batch run cancelled");
            self.orchestrator.finish_run(self.run, BatchState::Failed);
        }
    }
}

/// Aborts the wrapped region tasks when dropped.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

impl BatchOrchestrator {
    pub fn new(handler: Arc<dyn RegionHandler>, group_size: usize, group_interval: Duration) -> Self {
        Self {
            handler,
            group_size,
            group_interval,
            state: Mutex::new(RunState {
                run: 0,
                state: BatchState::Idle,
            }),
        }
    }

    pub fn from_config(handler: Arc<dyn RegionHandler>, config: &BatchConfig) -> Self {
        Self::new(handler, config.group_size, config.group_interval())
    }

    /// State of the most recently started run. An older run that ends
    /// while a newer one is in flight does not change it.
    #[must_use]
    pub fn state(&self) -> BatchState {
        self.state
            .lock()
            .map(|s| s.state)
            .unwrap_or_else(|poisoned| poisoned.into_inner().state)
    }

    fn start_run(&self) -> RunGuard<'_> {
        let mut current = self.state.lock().unwrap_or_else(|p| p.into_inner());
        current.run += 1;
        current.state = BatchState::Running;
        RunGuard {
            orchestrator: self,
            run: current.run,
            finished: false,
        }
    }

    fn finish_run(&self, run: u64, state: BatchState) {
        let mut current = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if current.run == run {
            current.state = state;
        }
    }

    /// Process `regions` group by group and summarize the outcomes.
    #[instrument(skip(self, regions), fields(regions = regions.len()))]
    pub async fn run(&self, regions: &[Region]) -> Result<BatchSummary, AdvisoryError> {
        let guard = self.start_run();

        match self.run_groups(regions).await {
            Ok(summary) => {
                guard.finish(BatchState::Completed);
                info!(
                    total = summary.total_regions,
                    success = summary.success_count,
                    failed = summary.failure_count,
                    groups = summary.groups,
                    "Batch completed in {:.3}s",
                    summary.processing_time_ms as f64 / 1000.0
                );
                Ok(summary)
            }
            Err(err) => {
                guard.finish(BatchState::Failed);
                error!(error = %err, "Batch failed");
                Err(err)
            }
        }
    }

    async fn run_groups(&self, regions: &[Region]) -> Result<BatchSummary, AdvisoryError> {
        if self.group_size == 0 {
            return Err(AdvisoryError::batch("group size must be at least 1"));
        }

        let start = Instant::now();
        let groups: Vec<&[Region]> = regions.chunks(self.group_size).collect();
        let mut outcomes = Vec::with_capacity(regions.len());

        for (index, group) in groups.iter().enumerate() {
            info!(group = index + 1, of = groups.len(), size = group.len(), "Starting group");
            outcomes.extend(self.run_group(group).await);

            if index + 1 < groups.len() {
                info!(
                    group = index + 1,
                    wait_s = self.group_interval.as_secs_f64(),
                    "Waiting before next group"
                );
                sleep(self.group_interval).await;
            }
        }

        let success_count = outcomes.iter().filter(|o| o.is_success()).count();
        Ok(BatchSummary {
            total_regions: regions.len(),
            success_count,
            failure_count: outcomes.len() - success_count,
            groups: groups.len(),
            outcomes,
            processing_time_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Run one group concurrently and return outcomes in group order.
    async fn run_group(&self, group: &[Region]) -> Vec<BatchOutcome> {
        let handles: Vec<_> = group
            .iter()
            .map(|region| {
                let handler = self.handler.clone();
                let code = region.code.clone();
                tokio::spawn(async move { handler.process(&code).await })
            })
            .collect();

        let _abort = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());

        join_all(handles)
            .await
            .into_iter()
            .zip(group)
            .map(|(joined, region)| match joined {
                Ok(Ok(result)) => BatchOutcome::success(region, result.message),
                Ok(Err(err)) => BatchOutcome::failure(region, Some(err.stage()), err.to_string()),
                Err(join_err) => {
                    warn!(region_code = %region.code, error = %join_err, "Region task aborted");
                    BatchOutcome::failure(region, None, format!("region task aborted: {join_err}"))
                }
            })
            .collect()
    }
}
