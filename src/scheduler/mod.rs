//! Batch scheduler
//!
//! Splits a fragment amount into per-tick batches and drives one caching job
//! through them. Nothing here blocks: every `poll` does at most one batch of
//! engine work, so expensive fragmentation is spread over several ticks.
//!
//! ```text
//! Idle ──start──▶ InProgress ──last batch──▶ Complete
//!                     │
//!              request_cancellation
//!                     ▼
//!                Cancelling ──next poll──▶ Idle (fragments discarded)
//! ```

use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{FilterConfig, FragmentationParams, PlanStrategy};
use crate::error::{EngineError, JobError};
use crate::filters::{self, FilterReport};
use crate::fragmenter::{cache_key, FragmentationEngine};
use crate::geometry::FragmentMesh;

// ============================================================================
// Planning
// ============================================================================

/// Ordered per-tick batch sizes summing to the job's fragment amount.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan(Vec<usize>);

impl BatchPlan {
    pub fn from_sizes(sizes: Vec<usize>) -> Self {
        Self(sizes)
    }

    pub fn sizes(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }

    /// Global fragment indices covered by batch `batch_index`.
    pub fn marked_indices(&self, batch_index: usize) -> Range<usize> {
        marked_indices(batch_index, self)
    }
}

/// Divides `total_amount` over `tick_count` buckets as evenly as possible.
///
/// The first `total % ticks` buckets carry one extra unit; empty trailing
/// buckets are dropped, so the plan may be shorter than `tick_count`.
/// A tick count of zero is treated as one.
pub fn plan_by_tick_count(tick_count: usize, total_amount: usize) -> BatchPlan {
    let ticks = tick_count.max(1);
    let base = total_amount / ticks;
    let extra = total_amount % ticks;
    let sizes = (0..ticks)
        .map(|i| base + usize::from(i < extra))
        .filter(|size| *size > 0)
        .collect();
    BatchPlan(sizes)
}

/// Divides `total_amount` into full buckets of `bucket_size` plus one
/// trailing partial bucket for the remainder. A bucket size of zero puts
/// everything in a single bucket.
pub fn plan_by_bucket_size(bucket_size: usize, total_amount: usize) -> BatchPlan {
    if total_amount == 0 {
        return BatchPlan::default();
    }
    if bucket_size == 0 {
        return BatchPlan(vec![total_amount]);
    }
    let mut sizes = vec![bucket_size; total_amount / bucket_size];
    let remainder = total_amount % bucket_size;
    if remainder > 0 {
        sizes.push(remainder);
    }
    BatchPlan(sizes)
}

/// Contiguous global index range `[offset, offset + plan[batch_index])`,
/// where `offset` is the sum of all earlier buckets. Out-of-range batch
/// indices yield an empty range at the end of the plan.
pub fn marked_indices(batch_index: usize, plan: &BatchPlan) -> Range<usize> {
    let sizes = plan.sizes();
    let clamped = batch_index.min(sizes.len());
    let offset: usize = sizes[..clamped].iter().sum();
    let len = sizes.get(batch_index).copied().unwrap_or(0);
    offset..offset + len
}

impl PlanStrategy {
    pub fn plan(&self, total_amount: usize) -> BatchPlan {
        match *self {
            PlanStrategy::ByTickCount(ticks) => plan_by_tick_count(ticks as usize, total_amount),
            PlanStrategy::ByBucketSize(size) => plan_by_bucket_size(size as usize, total_amount),
        }
    }
}

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    InProgress,
    Cancelling,
    Complete,
}

/// Result of advancing a job by one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPoll {
    /// More batches remain; poll again next tick.
    Busy,
    Complete,
    /// Cancellation was honored and produced fragments were discarded.
    Cancelled,
    Failed(EngineError),
}

/// One caching job: a source mesh, its parameters, and the fragments
/// produced so far.
#[derive(Debug, Clone)]
pub struct FragmentationJob {
    source: Arc<FragmentMesh>,
    params: FragmentationParams,
    strategy: PlanStrategy,
    /// Key of the (source, params) pair the job was created for.
    key: u64,
    plan: BatchPlan,
    next_batch: usize,
    state: JobState,
    cancel_requested: bool,
    /// Meshes returned by the engine so far, before filtering.
    produced_count: usize,
    fragments: Vec<FragmentMesh>,
    filter_report: FilterReport,
}

impl FragmentationJob {
    pub fn new(source: Arc<FragmentMesh>, params: FragmentationParams, strategy: PlanStrategy) -> Self {
        let key = cache_key(&source, &params);
        Self {
            source,
            params,
            strategy,
            key,
            plan: BatchPlan::default(),
            next_batch: 0,
            state: JobState::Idle,
            cancel_requested: false,
            produced_count: 0,
            fragments: Vec::new(),
            filter_report: FilterReport::default(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn plan(&self) -> &BatchPlan {
        &self.plan
    }

    pub fn params(&self) -> &FragmentationParams {
        &self.params
    }

    pub fn source(&self) -> &Arc<FragmentMesh> {
        &self.source
    }

    pub fn cache_key(&self) -> u64 {
        self.key
    }

    /// Batches already produced.
    pub fn batches_done(&self) -> usize {
        self.next_batch
    }

    pub fn produced_count(&self) -> usize {
        self.produced_count
    }

    pub fn fragments(&self) -> &[FragmentMesh] {
        &self.fragments
    }

    pub fn filter_report(&self) -> FilterReport {
        self.filter_report
    }

    /// Computes the batch plan and enters InProgress.
    pub fn start(&mut self) -> Result<(), JobError> {
        if matches!(self.state, JobState::InProgress | JobState::Cancelling) {
            return Err(JobError::Busy);
        }
        self.plan = self.strategy.plan(self.params.amount as usize);
        self.next_batch = 0;
        self.produced_count = 0;
        self.fragments.clear();
        self.filter_report = FilterReport::default();
        self.cancel_requested = false;
        self.state = JobState::InProgress;
        debug!(batches = self.plan.len(), amount = self.params.amount, "caching job started");
        Ok(())
    }

    /// Cooperative, one-way cancellation signal, honored on the next poll.
    pub fn request_cancellation(&mut self) {
        if self.state == JobState::InProgress {
            self.cancel_requested = true;
            self.state = JobState::Cancelling;
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Advances the job by one batch.
    pub fn poll(&mut self, engine: &dyn FragmentationEngine, filter_config: &FilterConfig) -> JobPoll {
        match self.state {
            JobState::Complete => return JobPoll::Complete,
            JobState::Idle => {
                if let Err(err) = self.start() {
                    warn!(%err, "could not start caching job");
                    return JobPoll::Busy;
                }
            }
            JobState::Cancelling => {
                info!(discarded = self.fragments.len(), "caching job cancelled");
                self.fragments.clear();
                self.produced_count = 0;
                self.next_batch = 0;
                self.plan = BatchPlan::default();
                self.cancel_requested = false;
                self.state = JobState::Idle;
                return JobPoll::Cancelled;
            }
            JobState::InProgress => {}
        }

        if !engine.is_supported() {
            self.state = JobState::Idle;
            self.fragments.clear();
            return JobPoll::Failed(EngineError::Unsupported);
        }

        if self.next_batch >= self.plan.len() {
            self.state = JobState::Complete;
            return JobPoll::Complete;
        }

        let indices = self.plan.marked_indices(self.next_batch);
        let batch = match engine.produce(&self.source, &self.params, indices.clone()) {
            Ok(batch) => batch,
            Err(err) => {
                self.state = JobState::Idle;
                self.fragments.clear();
                return JobPoll::Failed(err);
            }
        };

        self.produced_count += batch.len();
        let batch_start = self.fragments.len();
        self.fragments.extend(batch);

        let source_diagonal = self.source.local_bounds().diagonal();
        let report = filters::apply(filter_config, &mut self.fragments, batch_start, source_diagonal);
        self.filter_report.coplanar += report.coplanar;
        self.filter_report.undersized += report.undersized;
        self.filter_report.over_budget += report.over_budget;

        debug!(
            batch = self.next_batch,
            first = indices.start,
            last = indices.end,
            kept = self.fragments.len() - batch_start,
            "batch produced"
        );

        self.next_batch += 1;
        if self.next_batch >= self.plan.len() {
            self.state = JobState::Complete;
            JobPoll::Complete
        } else {
            JobPoll::Busy
        }
    }

    /// Hands over the finished fragments. Only meaningful once Complete.
    pub fn take_fragments(&mut self) -> Vec<FragmentMesh> {
        std::mem::take(&mut self.fragments)
    }
}
