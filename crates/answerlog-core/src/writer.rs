//! Single consumer that drains the batch queue into an [`AnswerStore`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::batch::Batch;
use crate::store::{AnswerRecord, AnswerStore, StoreError};

/// What happened to one batch handed to [`BatchWriter::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Empty batch, storage was not touched
    Skipped,
    /// Upsert succeeded for this many distinct names
    Written { records: usize },
}

/// Running totals shared between the writer task and its owner.
#[derive(Debug, Default)]
pub struct WriterStats {
    batches_written: AtomicU64,
    batches_skipped: AtomicU64,
    batches_failed: AtomicU64,
    records_written: AtomicU64,
}

/// Point-in-time copy of [`WriterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStatsSnapshot {
    pub batches_written: u64,
    pub batches_skipped: u64,
    pub batches_failed: u64,
    pub records_written: u64,
}

impl WriterStatsSnapshot {
    /// Batches that reached the writer, whatever their outcome.
    pub fn batches_seen(&self) -> u64 {
        self.batches_written + self.batches_skipped + self.batches_failed
    }
}

impl WriterStats {
    pub fn snapshot(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_skipped: self.batches_skipped.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
        }
    }

    fn record(&self, result: &Result<WriteOutcome, StoreError>) {
        match result {
            Ok(WriteOutcome::Skipped) => {
                self.batches_skipped.fetch_add(1, Ordering::Relaxed);
                counter!("answerlog.batches.skipped", 1);
            }
            Ok(WriteOutcome::Written { records }) => {
                self.batches_written.fetch_add(1, Ordering::Relaxed);
                self.records_written
                    .fetch_add(*records as u64, Ordering::Relaxed);
                counter!("answerlog.batches.written", 1);
                counter!("answerlog.names.written", *records as u64);
            }
            Err(_) => {
                self.batches_failed.fetch_add(1, Ordering::Relaxed);
                counter!("answerlog.batches.failed", 1);
            }
        }
    }
}

/// Turn a batch into upsert rows stamped with `now`, sorted by domain.
///
/// Every writer emits rows in the same order so concurrent transactions take
/// row locks in the same sequence.
pub fn materialize(batch: Batch, now: DateTime<Utc>) -> Vec<AnswerRecord> {
    let mut records: Vec<AnswerRecord> = batch
        .into_names()
        .map(|domain| AnswerRecord {
            domain,
            created_at: now,
            updated_at: now,
        })
        .collect();
    records.sort_by(|a, b| a.domain.cmp(&b.domain));
    records
}

/// Persists batches one statement at a time.
pub struct BatchWriter {
    store: Arc<dyn AnswerStore>,
    stats: Arc<WriterStats>,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn AnswerStore>) -> Self {
        Self {
            store,
            stats: Arc::new(WriterStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<WriterStats> {
        Arc::clone(&self.stats)
    }

    /// Persist one batch. Empty batches never reach the store.
    pub async fn write(&self, batch: Batch) -> Result<WriteOutcome, StoreError> {
        let result = self.write_inner(batch).await;
        self.stats.record(&result);
        result
    }

    async fn write_inner(&self, batch: Batch) -> Result<WriteOutcome, StoreError> {
        if batch.is_empty() {
            return Ok(WriteOutcome::Skipped);
        }

        let records = materialize(batch, Utc::now());
        self.store.upsert(&records).await?;

        Ok(WriteOutcome::Written {
            records: records.len(),
        })
    }

    /// Drain `rx` until every sender is gone. A failed batch is reported and
    /// dropped; it never stops the loop.
    pub async fn run(self, mut rx: mpsc::Receiver<Batch>) {
        debug!("Batch writer started");

        while let Some(batch) = rx.recv().await {
            let names = batch.len();
            match self.write(batch).await {
                Ok(WriteOutcome::Written { records }) => {
                    debug!(records, "Persisted answer batch");
                }
                Ok(WriteOutcome::Skipped) => {}
                Err(e) => {
                    error!(
                        error = %e,
                        kind = e.kind(),
                        names,
                        "Failed to persist answer batch"
                    );
                }
            }
        }

        let stats = self.stats.snapshot();
        debug!(
            written = stats.batches_written,
            skipped = stats.batches_skipped,
            failed = stats.batches_failed,
            "Batch writer stopped"
        );
    }
}
