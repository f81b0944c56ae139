//! Transports carry [`Frame`]s for exactly one call.
//!
//! A transport is a reliable, ordered, bidirectional frame stream: a `Sink` for the outbound
//! direction and a `Stream` for the inbound one. The stream ending without an end marker or
//! trailer is how a broken connection shows up.

pub mod memory;
pub mod tcp;

use std::io;
use std::pin::Pin;

use futures::future::BoxFuture;
use futures::{Sink, Stream};

use crate::duplex::error::RpcError;
use crate::duplex::frame::Frame;

pub use memory::{MemoryConnector, MemoryIncoming};
pub use tcp::{FrameCodec, TcpConnector};

/// Default upper bound on the encoded size of a single frame.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = io::Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = io::Result<Frame>> + Send>>;

/// Both directions of one call's connection.
pub struct Transport {
    pub(crate) sink: FrameSink,
    pub(crate) stream: FrameStream,
}

impl Transport {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Frame, Error = io::Error> + Send + 'static,
        St: Stream<Item = io::Result<Frame>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    pub fn into_parts(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("sink", &"<FrameSink>")
            .field("stream", &"<FrameStream>")
            .finish()
    }
}

/// Opens a fresh transport for every call a client makes.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, Result<Transport, RpcError>>;
}
