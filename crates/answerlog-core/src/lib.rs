// answerlog-core - Capture-and-persist pipeline for DNS answer names
//
// Sits inline in a DNS handler chain:
// 1. AnswerCollector wraps the response sink and records answer owner names
// 2. BatchQueue carries one deduplicated Batch per request (bounded, FIFO)
// 3. BatchWriter drains the queue and upserts each batch in one statement
// 4. AnswerLog owns the queue + writer task and the drain-on-shutdown protocol
//
// The storage handle is opened and migrated elsewhere; this crate only
// executes statements against it.

mod batch;
mod chain;
mod collector;
mod pipeline;
mod queue;
mod store;
mod writer;

pub use batch::Batch;
pub use chain::{Handler, ResponseSink, ServeError, ServeResult, SinkError};
pub use collector::AnswerCollector;
pub use pipeline::{AnswerLog, PipelineState, PLUGIN_NAME};
pub use queue::{BatchQueue, QueueError, DEFAULT_QUEUE_CAPACITY};
pub use store::{AnswerRecord, AnswerStore, SqlStore, StoreError, ANSWERS_TABLE};
pub use writer::{materialize, BatchWriter, WriteOutcome, WriterStats, WriterStatsSnapshot};

// Re-export the DNS message model so hosts and tests agree on versions
pub use hickory_proto;
