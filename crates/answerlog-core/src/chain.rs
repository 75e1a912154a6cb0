//! Handler chain contracts shared by the pipeline and its host.
//!
//! A [`Handler`] receives a request and a [`ResponseSink`]; it may write any
//! number of responses through the sink and reports a DNS response code.

use async_trait::async_trait;
use hickory_proto::error::ProtoError;
use hickory_proto::op::{Message, ResponseCode};
use thiserror::Error;

/// Result of serving one request: the response code, or an error that still
/// carries the code the host should answer with.
pub type ServeResult = std::result::Result<ResponseCode, ServeError>;

/// Errors returned by a handler in the chain
#[derive(Debug, Error)]
pub enum ServeError {
    /// The handler had nothing to forward the request to
    #[error("{handler}: no next handler found")]
    NoNextHandler { handler: String },

    /// A downstream handler failed
    #[error("handler failed ({rcode}): {source}")]
    Handler {
        rcode: ResponseCode,
        #[source]
        source: anyhow::Error,
    },
}

impl ServeError {
    /// Wrap a failure together with the response code to answer with.
    pub fn handler(rcode: ResponseCode, source: impl Into<anyhow::Error>) -> Self {
        Self::Handler {
            rcode,
            source: source.into(),
        }
    }

    /// Response code the host should send for this failure.
    pub fn rcode(&self) -> ResponseCode {
        match self {
            Self::NoNextHandler { .. } => ResponseCode::ServFail,
            Self::Handler { rcode, .. } => *rcode,
        }
    }
}

/// Errors from writing a response back to a client
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to encode response: {0}")]
    Encode(#[from] ProtoError),

    #[error("failed to send response: {0}")]
    Io(#[from] std::io::Error),

    #[error("response sink closed")]
    Closed,
}

/// Outbound side of a request: where responses for the client are written.
#[async_trait]
pub trait ResponseSink: Send {
    async fn write_message(&mut self, message: &Message) -> Result<(), SinkError>;
}

/// One stage of the request-processing chain.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    async fn serve(&self, request: &Message, sink: &mut dyn ResponseSink) -> ServeResult;
}
