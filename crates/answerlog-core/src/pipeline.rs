//! `AnswerLog`: the handler that ties collector, queue and writer together.
//!
//! Construction spawns the writer task on the current tokio runtime. Each
//! served request pushes exactly one batch. [`AnswerLog::shutdown`] closes the
//! queue and waits for the writer to drain it, so the store may be closed as
//! soon as it returns.

use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::Message;
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chain::{Handler, ResponseSink, ServeError, ServeResult};
use crate::collector::AnswerCollector;
use crate::queue::{BatchQueue, DEFAULT_QUEUE_CAPACITY};
use crate::store::AnswerStore;
use crate::writer::{BatchWriter, WriterStats, WriterStatsSnapshot};

/// Name this handler reports in the chain.
pub const PLUGIN_NAME: &str = "answerlog";

/// Lifecycle of the writer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Writer active, queue open
    Running,
    /// Queue closed, writer still persisting what was queued
    Draining,
    /// Writer has seen end-of-input and exited
    Stopped,
}

pub struct AnswerLog {
    next: Option<Arc<dyn Handler>>,
    queue: BatchQueue,
    state: Arc<watch::Sender<PipelineState>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<WriterStats>,
}

impl AnswerLog {
    /// Build the pipeline with the default queue capacity.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(next: Option<Arc<dyn Handler>>, store: Arc<dyn AnswerStore>) -> Self {
        Self::with_capacity(next, store, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(
        next: Option<Arc<dyn Handler>>,
        store: Arc<dyn AnswerStore>,
        queue_capacity: usize,
    ) -> Self {
        let (queue, rx) = BatchQueue::bounded(queue_capacity);
        let writer = BatchWriter::new(store);
        let stats = writer.stats();
        let (state, _) = watch::channel(PipelineState::Running);
        let state = Arc::new(state);

        let task_state = Arc::clone(&state);
        let writer_task = tokio::spawn(async move {
            writer.run(rx).await;
            task_state.send_replace(PipelineState::Stopped);
        });

        debug!(capacity = queue.capacity(), "Answer pipeline started");

        Self {
            next,
            queue,
            state,
            writer_task: Mutex::new(Some(writer_task)),
            stats,
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Writer totals so far.
    pub fn stats(&self) -> WriterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Close the queue and wait until every batch pushed before this call has
    /// been persisted or reported as failed.
    ///
    /// Calling this more than once is a caller error; later calls log a
    /// warning and return the current totals.
    pub async fn shutdown(&self) -> WriterStatsSnapshot {
        let task = self.writer_task.lock().take();
        let Some(task) = task else {
            warn!("Answer pipeline shutdown requested more than once");
            return self.stats.snapshot();
        };

        self.queue.close();
        self.state.send_if_modified(|state| {
            if *state == PipelineState::Running {
                *state = PipelineState::Draining;
                true
            } else {
                false
            }
        });
        info!("Draining answer queue before shutdown");

        if let Err(e) = task.await {
            warn!(error = %e, "Batch writer task ended abnormally");
            self.state.send_replace(PipelineState::Stopped);
        }

        let stats = self.stats.snapshot();
        info!(
            written = stats.batches_written,
            failed = stats.batches_failed,
            records = stats.records_written,
            "Answer pipeline stopped"
        );
        stats
    }
}

#[async_trait]
impl Handler for AnswerLog {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn serve(&self, request: &Message, sink: &mut dyn ResponseSink) -> ServeResult {
        let mut collector = AnswerCollector::new(sink);

        let result = match &self.next {
            Some(next) => next.serve(request, &mut collector).await,
            None => Err(ServeError::NoNextHandler {
                handler: PLUGIN_NAME.to_string(),
            }),
        };

        if let Err(e) = self.queue.push(collector.into_batch()).await {
            counter!("answerlog.queue.rejected", 1);
            warn!(error = %e, id = request.id(), "Dropped answer batch pushed after shutdown");
        }

        result
    }
}
