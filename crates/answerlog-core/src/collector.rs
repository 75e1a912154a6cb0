//! Response sink wrapper that records answer owner names.

use std::collections::HashSet;

use async_trait::async_trait;
use hickory_proto::op::Message;

use crate::batch::Batch;
use crate::chain::{ResponseSink, SinkError};

/// Wraps the real response sink for the lifetime of one request.
///
/// Every message written through the collector has its answer-section owner
/// names added to a per-request set before the write is forwarded. Names are
/// kept even if the forwarded write fails: they describe what the chain
/// answered, not whether the client received it.
pub struct AnswerCollector<'a> {
    inner: &'a mut dyn ResponseSink,
    names: HashSet<String>,
}

impl<'a> AnswerCollector<'a> {
    pub fn new(inner: &'a mut dyn ResponseSink) -> Self {
        Self {
            inner,
            names: HashSet::new(),
        }
    }

    /// Distinct names captured so far, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }

    /// Finish the request and hand the captured names over as a batch.
    pub fn into_batch(self) -> Batch {
        Batch::from(self.names)
    }

    fn capture(&mut self, message: &Message) {
        // Wire form: punycode labels and case stay exactly as received
        for record in message.answers() {
            self.names.insert(record.name().to_ascii());
        }
    }
}

#[async_trait]
impl ResponseSink for AnswerCollector<'_> {
    async fn write_message(&mut self, message: &Message) -> Result<(), SinkError> {
        self.capture(message);
        self.inner.write_message(message).await
    }
}
