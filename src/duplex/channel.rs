//! Typed, ordered, unidirectional message channels over a transport.
//!
//! [`MessageSink`] writes payloads and a single end marker; [`MessageSource`] reads them back in
//! order and reports the end marker as `Ok(None)` rather than as an error.

use std::marker::PhantomData;

use futures::{SinkExt, StreamExt};
use prost::Message;

use crate::duplex::error::RpcError;
use crate::duplex::frame::{Frame, frame::Kind};
use crate::duplex::status::Status;
use crate::duplex::transport::{FrameSink, FrameStream};

/// Outbound half of a message channel.
pub struct MessageSink<T> {
    sink: FrameSink,
    closed: bool,
    shut_down: bool,
    _marker: PhantomData<fn(T)>,
}

impl<T> MessageSink<T> {
    pub fn new(sink: FrameSink) -> Self {
        Self {
            sink,
            closed: false,
            shut_down: false,
            _marker: PhantomData,
        }
    }

    /// Whether the end marker has been written.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Write the end marker. Closing an already closed channel is a no-op.
    pub async fn close(&mut self) -> Result<(), RpcError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.send_frame(Frame::end()).await
    }

    /// Write a control frame (header or trailer), regardless of the end marker.
    pub(crate) async fn send_frame(&mut self, frame: Frame) -> Result<(), RpcError> {
        if self.shut_down {
            return Err(RpcError::ChannelClosed);
        }
        self.sink.send(frame).await.map_err(RpcError::from)
    }

    /// Flush and release the underlying transport direction.
    pub(crate) async fn shutdown(&mut self) -> Result<(), RpcError> {
        if self.shut_down {
            return Ok(());
        }
        self.closed = true;
        self.shut_down = true;
        self.sink.close().await.map_err(RpcError::from)
    }
}

impl<T: Message> MessageSink<T> {
    /// Enqueue `message` for delivery, suspending while the transport applies backpressure.
    pub async fn send(&mut self, message: T) -> Result<(), RpcError> {
        if self.closed {
            return Err(RpcError::ChannelClosed);
        }
        self.send_frame(Frame::data(message.encode_to_vec())).await
    }
}

/// One decoded inbound frame.
#[derive(Debug)]
pub(crate) enum Inbound<T> {
    Message(T),
    End,
    Trailer(Status),
    /// A call header after the call started.
    Header,
}

/// Inbound half of a message channel.
pub struct MessageSource<T> {
    stream: FrameStream,
    ended: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> MessageSource<T> {
    pub fn new(stream: FrameStream) -> Self {
        Self {
            stream,
            ended: false,
            _marker: PhantomData,
        }
    }

    /// Whether the end of the stream has been observed.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub(crate) fn mark_ended(&mut self) {
        self.ended = true;
    }
}

impl<T: Message + Default> MessageSource<T> {
    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` once the peer closed its direction, and keeps returning it afterwards
    /// without touching the transport. A connection that drops before the end marker is a
    /// [`RpcError::Transport`].
    pub async fn receive(&mut self) -> Result<Option<T>, RpcError> {
        if self.ended {
            return Ok(None);
        }
        match self.next_inbound().await? {
            Inbound::Message(message) => Ok(Some(message)),
            Inbound::End => {
                self.ended = true;
                Ok(None)
            }
            Inbound::Trailer(status) => {
                self.ended = true;
                status.into_result().map(|()| None)
            }
            Inbound::Header => Err(RpcError::invalid_usage(
                "metadata received after the call started",
            )),
        }
    }

    pub(crate) async fn next_inbound(&mut self) -> Result<Inbound<T>, RpcError> {
        let frame = match self.stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Err(RpcError::from(e)),
            None => {
                return Err(RpcError::transport(
                    "connection closed before the end of the stream",
                ));
            }
        };

        match frame.kind {
            Some(Kind::Data(payload)) => Ok(Inbound::Message(T::decode(payload.as_slice())?)),
            Some(Kind::End(_)) => Ok(Inbound::End),
            Some(Kind::Trailer(trailer)) => Ok(Inbound::Trailer(trailer.into_status())),
            Some(Kind::Header(_)) => Ok(Inbound::Header),
            None => Err(RpcError::invalid_usage("received an empty frame")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplex::transport::memory;

    fn channel_pair() -> (MessageSink<String>, MessageSource<String>) {
        let (a, b) = memory::pair(8);
        let (sink, _) = a.into_parts();
        let (_, stream) = b.into_parts();
        (MessageSink::new(sink), MessageSource::new(stream))
    }

    #[tokio::test]
    async fn test_close_observed_as_end_of_stream() {
        let (mut tx, mut rx) = channel_pair();

        tx.send("Hello".to_string()).await.unwrap();
        tx.send("World".to_string()).await.unwrap();
        tx.close().await.unwrap();

        assert_eq!(rx.receive().await.unwrap().as_deref(), Some("Hello"));
        assert_eq!(rx.receive().await.unwrap().as_deref(), Some("World"));
        assert_eq!(rx.receive().await.unwrap(), None);
        assert!(rx.is_ended());
    }

    #[tokio::test]
    async fn test_receive_after_end_is_idempotent() {
        let (mut tx, mut rx) = channel_pair();
        tx.close().await.unwrap();
        drop(tx);

        for _ in 0..3 {
            assert_eq!(rx.receive().await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (mut tx, _rx) = channel_pair();

        tx.close().await.unwrap();
        // Closing twice is a no-op.
        tx.close().await.unwrap();

        let result = tx.send("late".to_string()).await;
        assert!(matches!(result, Err(RpcError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_dropped_connection_is_transport_error() {
        let (mut tx, mut rx) = channel_pair();
        tx.send("partial".to_string()).await.unwrap();
        drop(tx);

        assert_eq!(rx.receive().await.unwrap().as_deref(), Some("partial"));
        assert!(matches!(rx.receive().await, Err(RpcError::Transport(_))));
    }

    #[tokio::test]
    async fn test_late_header_is_invalid_usage() {
        let (a, b) = memory::pair(8);
        let (sink, _) = a.into_parts();
        let (_, stream) = b.into_parts();
        let mut raw = MessageSink::<()>::new(sink);
        let mut rx = MessageSource::<String>::new(stream);

        raw.send_frame(Frame::header(Default::default())).await.unwrap();

        let err = rx.receive().await.unwrap_err();
        assert!(matches!(err, RpcError::InvalidUsage(_)));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_decode_error() {
        let (a, b) = memory::pair(8);
        let (sink, _) = a.into_parts();
        let (_, stream) = b.into_parts();
        let mut raw = MessageSink::<()>::new(sink);
        let mut rx = MessageSource::<String>::new(stream);

        // A lone field tag with no value cannot be decoded.
        raw.send_frame(Frame::data(vec![0x0a])).await.unwrap();

        let err = rx.receive().await.unwrap_err();
        assert!(matches!(err, RpcError::Decode(_)));
    }
}
