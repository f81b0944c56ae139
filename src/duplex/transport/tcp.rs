use std::io;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use prost::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::codec::{Decoder, Encoder, Framed, LengthDelimitedCodec};
use tracing::debug;

use crate::duplex::error::RpcError;
use crate::duplex::frame::Frame;
use crate::duplex::transport::{Connector, DEFAULT_MAX_FRAME_LENGTH, Transport};

/// Length-prefixed protobuf encoding of [`Frame`]s.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(max_frame_length)
                .new_codec(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(buf) => Frame::decode(buf.freeze())
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.inner.encode(Bytes::from(frame.encode_to_vec()), dst)
    }
}

impl Transport {
    /// Frame any byte stream (TCP, Unix socket, in-memory duplex) into a transport.
    pub fn from_io<T>(io: T, max_frame_length: usize) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (sink, stream) =
            Framed::new(io, FrameCodec::with_max_frame_length(max_frame_length)).split();
        Transport::new(sink, stream)
    }
}

/// Opens one TCP connection per call.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    max_frame_length: usize,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>, max_frame_length: usize) -> Self {
        Self {
            addr: addr.into(),
            max_frame_length,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Transport, RpcError>> {
        Box::pin(async move {
            let stream = TcpStream::connect(&self.addr).await?;
            stream.set_nodelay(true)?;
            debug!(addr = %self.addr, "Opened TCP transport");
            Ok(Transport::from_io(stream, self.max_frame_length))
        })
    }
}

/// Turn a bound listener into a stream of per-connection transports.
pub fn incoming(
    listener: TcpListener,
    max_frame_length: usize,
) -> impl Stream<Item = Result<Transport, RpcError>> + Send + Unpin {
    TcpListenerStream::new(listener).map(move |accepted| {
        let stream = accepted?;
        stream.set_nodelay(true)?;
        if let Ok(peer) = stream.peer_addr() {
            debug!(peer = %peer, "Accepted TCP connection");
        }
        Ok(Transport::from_io(stream, max_frame_length))
    })
}

#[cfg(test)]
mod tests {
    use futures::SinkExt;

    use super::*;

    #[test]
    fn test_codec_splits_frames() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(Frame::data(b"hello".to_vec()), &mut buf).unwrap();
        codec.encode(Frame::end(), &mut buf).unwrap();

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::data(b"hello".to_vec()))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::end()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_codec_rejects_oversized_frame() {
        let mut codec = FrameCodec::with_max_frame_length(8);
        let mut buf = BytesMut::new();

        assert!(codec.encode(Frame::data(vec![0; 64]), &mut buf).is_err());
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut incoming = incoming(listener, DEFAULT_MAX_FRAME_LENGTH);

        let connector = TcpConnector::new(addr, DEFAULT_MAX_FRAME_LENGTH);
        let mut client = connector.connect().await.unwrap();
        let mut server = incoming.next().await.unwrap().unwrap();

        client.sink.send(Frame::data(b"ping".to_vec())).await.unwrap();
        assert_eq!(
            server.stream.next().await.unwrap().unwrap(),
            Frame::data(b"ping".to_vec())
        );

        drop(client);
        assert!(server.stream.next().await.is_none());
    }
}
