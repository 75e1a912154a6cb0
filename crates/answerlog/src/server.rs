// UDP listener loop
//
// One task per datagram, tracked in a JoinSet so shutdown can stop accepting
// and then wait for every in-flight request to finish.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use answerlog_core::hickory_proto::op::Message;
use answerlog_core::{Handler, ResponseSink, SinkError};
use async_trait::async_trait;
use metrics::counter;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::forward::MAX_UDP_PAYLOAD;

/// Writes responses back to the client that sent the request.
pub struct UdpResponseSink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    written: bool,
}

impl UdpResponseSink {
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            written: false,
        }
    }

    pub fn has_written(&self) -> bool {
        self.written
    }
}

#[async_trait]
impl ResponseSink for UdpResponseSink {
    async fn write_message(&mut self, message: &Message) -> Result<(), SinkError> {
        let bytes = message.to_vec()?;
        self.socket.send_to(&bytes, self.peer).await?;
        self.written = true;
        Ok(())
    }
}

/// Serve DNS over `socket` until `shutdown` resolves, then wait for in-flight
/// requests before returning.
pub async fn serve_udp<F>(socket: Arc<UdpSocket>, chain: Arc<dyn Handler>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut tasks = JoinSet::new();
    let mut buf = vec![0u8; MAX_UDP_PAYLOAD];

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "Request task ended abnormally");
                }
            }
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        // ICMP errors from earlier sends surface here on some platforms
                        warn!(error = %e, "Failed to receive datagram");
                        continue;
                    }
                };
                let request = match Message::from_vec(&buf[..len]) {
                    Ok(request) => request,
                    Err(e) => {
                        counter!("answerlog.requests.malformed", 1);
                        debug!(error = %e, peer = %peer, "Dropping malformed request");
                        continue;
                    }
                };

                let socket = Arc::clone(&socket);
                let chain = Arc::clone(&chain);
                tasks.spawn(async move {
                    handle_request(socket, chain, peer, request).await;
                });
            }
        }
    }

    if !tasks.is_empty() {
        info!(in_flight = tasks.len(), "Waiting for in-flight requests");
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Request task ended abnormally");
        }
    }

    Ok(())
}

async fn handle_request(
    socket: Arc<UdpSocket>,
    chain: Arc<dyn Handler>,
    peer: SocketAddr,
    request: Message,
) {
    let mut sink = UdpResponseSink::new(socket, peer);

    match chain.serve(&request, &mut sink).await {
        Ok(rcode) => {
            debug!(id = request.id(), peer = %peer, rcode = %rcode, "Request served");
        }
        Err(e) => {
            warn!(
                error = %e,
                handler = chain.name(),
                id = request.id(),
                peer = %peer,
                "Request failed"
            );
            if sink.has_written() {
                return;
            }
            let mut reply = Message::error_msg(request.id(), request.op_code(), e.rcode());
            reply.add_queries(request.queries().to_vec());
            if let Err(e) = sink.write_message(&reply).await {
                warn!(error = %e, peer = %peer, "Failed to write error response");
            }
        }
    }
}
