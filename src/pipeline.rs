//! Bounded worker-pool stages and the two-stage batch driver.
//!
//! A [`Stage`] runs one task per input on its own rayon pool, so the pool size
//! caps the number of outbound connections. Results come back in input order
//! whatever the completion order. [`run_two_stage`] chains a fetch stage and a
//! transform stage; the second stage starts only after every fetch finished.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::GeneId;
use crate::error::GeneBatchError;

/// Sub-range of the overall `[0, 1]` progress scale owned by one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRange {
    pub from: f64,
    pub to: f64,
}

impl ProgressRange {
    pub const FULL: ProgressRange = ProgressRange { from: 0.0, to: 1.0 };
    pub const FIRST_HALF: ProgressRange = ProgressRange { from: 0.0, to: 0.5 };
    pub const SECOND_HALF: ProgressRange = ProgressRange { from: 0.5, to: 1.0 };

    pub fn at(&self, done: usize, total: usize) -> f64 {
        if total == 0 || done >= total {
            return self.to;
        }
        self.from + (self.to - self.from) * (done as f64 / total as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPanicked {
    pub message: String,
}

pub struct Stage {
    name: &'static str,
    pool: ThreadPool,
}

impl Stage {
    pub fn new(name: &'static str, concurrency: usize) -> Result<Self, GeneBatchError> {
        if concurrency == 0 {
            return Err(GeneBatchError::InvalidConcurrency(concurrency));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(move |idx| format!("genebatch-{name}-{idx}"))
            .build()
            .map_err(|err| GeneBatchError::WorkerPool(err.to_string()))?;
        Ok(Self { name, pool })
    }

    pub fn concurrency(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `task` once per input. A panicking task yields `Err` in its own
    /// slot and leaves the rest of the stage running.
    pub fn run<I, O, F>(
        &self,
        inputs: &[I],
        range: ProgressRange,
        sink: &dyn ProgressSink,
        task: F,
    ) -> Vec<Result<O, TaskPanicked>>
    where
        I: Sync,
        O: Send,
        F: Fn(&I) -> O + Sync + Send,
    {
        let total = inputs.len();
        let done = Mutex::new(0usize);
        let started = Instant::now();
        info!(stage = self.name, tasks = total, workers = self.concurrency(), "stage started");

        let results = self.pool.install(|| {
            inputs
                .par_iter()
                .map(|input| {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| task(input)))
                        .map_err(|payload| TaskPanicked {
                            message: panic_message(payload),
                        });
                    // The counter lock also serializes sink calls, which keeps
                    // the reported fractions monotone.
                    let mut done = done.lock().unwrap_or_else(PoisonError::into_inner);
                    *done += 1;
                    sink.event(ProgressEvent {
                        fraction: range.at(*done, total),
                        message: format!("{} {}/{}", self.name, *done, total),
                    });
                    result
                })
                .collect::<Vec<_>>()
        });

        info!(
            stage = self.name,
            tasks = total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stage finished"
        );
        results
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageConcurrency {
    pub fetch: usize,
    pub transform: usize,
}

impl StageConcurrency {
    pub fn uniform(workers: usize) -> Self {
        Self {
            fetch: workers,
            transform: workers,
        }
    }
}

/// A batch computation split into a per-gene fetch and a per-key transform.
///
/// Every method must recover its own failures into values: a failing gene
/// becomes a sentinel in its own result, never an error for the batch.
pub trait TwoStageJob: Sync {
    type Fetched: Send + Sync;
    type Key: Eq + Hash + Clone + Send + Sync;
    type Transformed: Send + Sync;
    type Output;

    fn fetch(&self, id: &GeneId) -> Self::Fetched;

    fn fetch_panicked(&self, id: &GeneId, message: &str) -> Self::Fetched;

    /// The stage-two input derived from a fetch result, if it needs one.
    /// Equal keys from different genes are transformed once.
    fn stage_two_key(&self, fetched: &Self::Fetched) -> Option<Self::Key>;

    fn transform(&self, key: &Self::Key) -> Self::Transformed;

    /// Keys handed to one stage-two task. Jobs whose service accepts several
    /// keys per request raise this and override [`TwoStageJob::transform_batch`].
    fn batch_size(&self) -> usize {
        1
    }

    /// One result per key, in key order.
    fn transform_batch(&self, keys: &[Self::Key]) -> Vec<Self::Transformed> {
        keys.iter().map(|key| self.transform(key)).collect()
    }

    fn transform_panicked(&self, key: &Self::Key, message: &str) -> Self::Transformed;

    fn merge(
        &self,
        id: &GeneId,
        fetched: &Self::Fetched,
        transformed: Option<&Self::Transformed>,
    ) -> Self::Output;
}

/// Runs `job` over `ids` and returns one merged output per submitted id, in
/// submission order. Duplicated ids are fetched once, and distinct stage-two
/// keys are grouped into tasks of [`TwoStageJob::batch_size`].
///
/// Fails only when a worker pool cannot be built. An empty batch returns
/// immediately without building pools or reporting progress.
pub fn run_two_stage<J: TwoStageJob>(
    ids: &[GeneId],
    job: &J,
    concurrency: StageConcurrency,
    sink: &dyn ProgressSink,
) -> Result<Vec<J::Output>, GeneBatchError> {
    for workers in [concurrency.fetch, concurrency.transform] {
        if workers == 0 {
            return Err(GeneBatchError::InvalidConcurrency(workers));
        }
    }
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let fetch_stage = Stage::new("fetch", concurrency.fetch)?;
    let transform_stage = Stage::new("transform", concurrency.transform)?;

    let mut seen = HashSet::new();
    let distinct: Vec<GeneId> = ids.iter().filter(|id| seen.insert(*id)).cloned().collect();

    let fetched: HashMap<GeneId, J::Fetched> = {
        let results = fetch_stage.run(&distinct, ProgressRange::FIRST_HALF, sink, |id| {
            job.fetch(id)
        });
        distinct
            .into_iter()
            .zip(results)
            .map(|(id, result)| {
                let value = result.unwrap_or_else(|panicked| {
                    warn!(gene = %id, message = %panicked.message, "fetch task panicked");
                    job.fetch_panicked(&id, &panicked.message)
                });
                (id, value)
            })
            .collect()
    };

    let mut seen_keys = HashSet::new();
    let keys: Vec<J::Key> = ids
        .iter()
        .filter_map(|id| fetched.get(id).and_then(|value| job.stage_two_key(value)))
        .filter(|key| seen_keys.insert(key.clone()))
        .collect();

    let transformed: HashMap<J::Key, J::Transformed> = if keys.is_empty() {
        sink.event(ProgressEvent {
            fraction: ProgressRange::SECOND_HALF.to,
            message: "transform 0/0".to_string(),
        });
        HashMap::new()
    } else {
        let batches: Vec<&[J::Key]> = keys.chunks(job.batch_size().max(1)).collect();
        let results = transform_stage.run(&batches, ProgressRange::SECOND_HALF, sink, |batch| {
            job.transform_batch(batch)
        });
        let mut transformed = HashMap::with_capacity(keys.len());
        for (batch, result) in batches.iter().zip(results) {
            match result {
                Ok(values) => {
                    if values.len() != batch.len() {
                        warn!(
                            expected = batch.len(),
                            got = values.len(),
                            "transform batch returned the wrong number of results"
                        );
                    }
                    let mut values = values.into_iter();
                    for key in batch.iter() {
                        let value = values.next().unwrap_or_else(|| {
                            job.transform_panicked(key, "no result for key in batch")
                        });
                        transformed.insert(key.clone(), value);
                    }
                }
                Err(panicked) => {
                    warn!(message = %panicked.message, keys = batch.len(), "transform task panicked");
                    for key in batch.iter() {
                        transformed.insert(key.clone(), job.transform_panicked(key, &panicked.message));
                    }
                }
            }
        }
        transformed
    };

    let mut outputs = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(value) = fetched.get(id) else {
            continue;
        };
        let stage_two = job
            .stage_two_key(value)
            .and_then(|key| transformed.get(&key));
        outputs.push(job.merge(id, value, stage_two));
    }
    Ok(outputs)
}
