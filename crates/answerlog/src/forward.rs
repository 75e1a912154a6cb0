// Upstream forwarder - terminal handler of the chain
//
// Relays each query to a single upstream resolver over UDP and writes the
// upstream's response back through the sink. Any failure maps to SERVFAIL.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use answerlog_core::hickory_proto::op::{Message, ResponseCode};
use answerlog_core::{Handler, ResponseSink, ServeError, ServeResult};
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::debug;

/// Largest UDP DNS payload accepted from the upstream (EDNS0 ceiling).
pub(crate) const MAX_UDP_PAYLOAD: usize = 4096;

pub struct UpstreamForwarder {
    upstream: SocketAddr,
    timeout: Duration,
}

impl UpstreamForwarder {
    pub fn new(upstream: SocketAddr, timeout: Duration) -> Self {
        Self { upstream, timeout }
    }

    async fn exchange(&self, request: &Message) -> anyhow::Result<Message> {
        let query = request.to_vec().context("Failed to encode query")?;

        let local: SocketAddr = if self.upstream.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .context("Failed to bind upstream socket")?;
        socket
            .connect(self.upstream)
            .await
            .with_context(|| format!("Failed to connect to upstream {}", self.upstream))?;
        socket.send(&query).await.context("Failed to send query")?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        loop {
            let len = tokio::time::timeout_at(deadline, socket.recv(&mut buf))
                .await
                .map_err(|_| anyhow!("upstream {} timed out after {:?}", self.upstream, self.timeout))?
                .context("Failed to read upstream response")?;

            let response = match Message::from_vec(&buf[..len]) {
                Ok(response) => response,
                Err(e) => {
                    debug!(error = %e, len, "Ignoring malformed upstream datagram");
                    continue;
                }
            };
            if response.id() == request.id() {
                return Ok(response);
            }
            debug!(
                expected = request.id(),
                got = response.id(),
                "Ignoring upstream response with mismatched id"
            );
        }
    }
}

#[async_trait]
impl Handler for UpstreamForwarder {
    fn name(&self) -> &str {
        "forward"
    }

    async fn serve(&self, request: &Message, sink: &mut dyn ResponseSink) -> ServeResult {
        let response = self
            .exchange(request)
            .await
            .map_err(|e| ServeError::handler(ResponseCode::ServFail, e))?;

        sink.write_message(&response)
            .await
            .map_err(|e| ServeError::handler(ResponseCode::ServFail, e))?;

        Ok(response.response_code())
    }
}
