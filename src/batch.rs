//! Classify many records on a fixed worker pool.
//!
//! Records are queued on a shared injector; each worker pulls one record at a time,
//! runs the whole classifier on it and sends the result back over a channel tagged with
//! the record's input position.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashSet;
use crossbeam::channel;
use crossbeam::deque::{Injector, Steal};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analyzer::{Analysis, AnalysisResult, Analyzer};
use crate::config::BatchOptions;
use crate::decoder::Decoder;
use crate::error::{CollaboratorError, StartupError};
use crate::loader::InputRecord;

/// Shared flag telling workers to stop picking up new records
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancel on Ctrl-C. Only one handler can be installed per process.
    pub fn cancel_on_interrupt(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            warn!("interrupted, finishing records already in progress");
            token.cancel();
        })
    }
}

/// Classification of one input record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordReport {
    pub index: usize,
    pub id: Option<String>,
    pub code: String,
    pub category: Option<String>,
    pub frc: Option<i64>,
    pub analysis: Analysis,
    /// Code already seen on an earlier record
    pub duplicate: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub reports: Vec<RecordReport>,
    /// Records never started because the batch was cancelled
    pub skipped: usize,
}

/// Per-result statistics over non-duplicate records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStats {
    pub result: AnalysisResult,
    pub count: usize,
    /// Fraction of the counted records with this result
    pub share: f64,
    pub mean_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    /// Records analyzed, duplicates included
    pub analyzed: usize,
    pub duplicates: usize,
    pub skipped: usize,
    /// Non-empty categories in result order
    pub categories: Vec<CategoryStats>,
}

impl BatchSummary {
    pub fn from_outcome(outcome: &BatchOutcome) -> Self {
        let counted: Vec<&RecordReport> = outcome.reports.iter().filter(|r| !r.duplicate).collect();
        let total = counted.len();

        let categories = AnalysisResult::ALL
            .iter()
            .filter_map(|&result| {
                let fractions: Vec<f64> = counted
                    .iter()
                    .filter(|r| r.analysis.result == result)
                    .map(|r| r.analysis.fraction())
                    .collect();
                if fractions.is_empty() {
                    return None;
                }
                let count = fractions.len();
                Some(CategoryStats {
                    result,
                    count,
                    share: count as f64 / total as f64,
                    mean_fraction: fractions.iter().sum::<f64>() / count as f64,
                })
            })
            .collect();

        BatchSummary {
            analyzed: outcome.reports.len(),
            duplicates: outcome.reports.len() - total,
            skipped: outcome.skipped,
            categories,
        }
    }

    pub fn count(&self, result: AnalysisResult) -> usize {
        self.categories
            .iter()
            .find(|c| c.result == result)
            .map_or(0, |c| c.count)
    }
}

/// Runs an [`Analyzer`] over a batch of records
pub struct BatchRunner<'a, D: ?Sized> {
    analyzer: Analyzer<'a, D>,
    options: BatchOptions,
    cancel: CancellationToken,
}

impl<'a, D: Decoder + Sync + ?Sized> BatchRunner<'a, D> {
    pub fn new(analyzer: Analyzer<'a, D>, options: BatchOptions) -> Self {
        BatchRunner {
            analyzer,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn run(&self, records: &[InputRecord]) -> Result<BatchOutcome, StartupError> {
        let num_threads = self.options.num_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("odat-worker-{}", i))
            .build()
            .map_err(|e| StartupError::WorkerPool(e.to_string()))?;

        info!(records = records.len(), threads = num_threads, "starting batch");

        let queue = Injector::new();
        for position in 0..records.len() {
            queue.push(position);
        }
        let (tx, rx) = channel::unbounded::<(usize, Analysis)>();

        pool.scope(|scope| {
            for _ in 0..num_threads {
                let tx = tx.clone();
                let queue = &queue;
                scope.spawn(move |_| loop {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    match queue.steal() {
                        Steal::Success(position) => {
                            let analysis = self.analyze_record(&records[position]);
                            if tx.send((position, analysis)).is_err() {
                                break;
                            }
                        }
                        Steal::Retry => continue,
                        Steal::Empty => break,
                    }
                });
            }
        });
        drop(tx);

        // Completion order
        let finished: Vec<(usize, Analysis)> = rx.iter().collect();
        let skipped = records.len() - finished.len();
        if skipped > 0 {
            warn!(skipped, "batch cancelled before every record started");
        }

        // Duplicates are judged in input order whatever the output order
        let mut by_position: Vec<usize> = (0..finished.len()).collect();
        by_position.sort_by_key(|&i| finished[i].0);
        let mut seen = AHashSet::with_capacity(finished.len());
        let mut duplicate = vec![false; finished.len()];
        for i in by_position {
            duplicate[i] = !seen.insert(records[finished[i].0].code.as_str());
        }

        let mut reports: Vec<RecordReport> = finished
            .into_iter()
            .zip(duplicate)
            .map(|((position, analysis), duplicate)| {
                let record = &records[position];
                RecordReport {
                    index: record.index,
                    id: record.id.clone(),
                    code: record.code.clone(),
                    category: record.category.clone(),
                    frc: record.frc,
                    analysis,
                    duplicate,
                }
            })
            .collect();
        if self.options.stable_order {
            reports.sort_by_key(|r| r.index);
        }

        info!(analyzed = reports.len(), skipped, "finished batch");
        Ok(BatchOutcome { reports, skipped })
    }

    fn analyze_record(&self, record: &InputRecord) -> Analysis {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.analyzer.analyze(&record.code, &record.geometry)
        }));
        match outcome {
            Ok(analysis) => {
                debug!(index = record.index, result = %analysis.result, "classified record");
                analysis
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(index = record.index, %message, "decoder panicked");
                Analysis::error(CollaboratorError::Panicked(message))
            }
        }
    }
}
