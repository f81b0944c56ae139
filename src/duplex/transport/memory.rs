use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::{SinkExt, Stream, StreamExt};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::duplex::error::RpcError;
use crate::duplex::frame::Frame;
use crate::duplex::transport::{Connector, Transport};

/// Create two connected in-process transports.
///
/// Each direction is a bounded channel holding at most `capacity` frames, so a sender that runs
/// ahead of its peer is suspended until the peer catches up.
pub fn pair(capacity: usize) -> (Transport, Transport) {
    let (a_tx, a_rx) = mpsc::channel::<Frame>(capacity);
    let (b_tx, b_rx) = mpsc::channel::<Frame>(capacity);

    (half(a_tx, b_rx), half(b_tx, a_rx))
}

fn half(tx: mpsc::Sender<Frame>, rx: mpsc::Receiver<Frame>) -> Transport {
    let sink = tx.sink_map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e));
    Transport::new(sink, rx.map(Ok))
}

/// Create an in-process listener: calls opened through the connector arrive on the incoming side.
pub fn channel(capacity: usize) -> (MemoryConnector, MemoryIncoming) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (
        MemoryConnector { tx, capacity },
        MemoryIncoming {
            inner: UnboundedReceiverStream::new(rx),
        },
    )
}

/// Client end of an in-process listener.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    tx: tokio::sync::mpsc::UnboundedSender<Transport>,
    capacity: usize,
}

impl Connector for MemoryConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Transport, RpcError>> {
        Box::pin(async move {
            let (client, server) = pair(self.capacity);
            self.tx
                .send(server)
                .map_err(|_| RpcError::Transport("in-memory listener is closed".to_string()))?;
            debug!(capacity = self.capacity, "Opened in-memory transport");
            Ok(client)
        })
    }
}

/// Server end of an in-process listener, yielding one transport per call.
pub struct MemoryIncoming {
    inner: UnboundedReceiverStream<Transport>,
}

impl Stream for MemoryIncoming {
    type Item = Result<Transport, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx).map(|next| next.map(Ok))
    }
}
