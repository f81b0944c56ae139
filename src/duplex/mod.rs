//! # duplex
//!
//! A small RPC runtime in which every call, whatever its interaction pattern, runs over one
//! duplex stream session.
//!
//! A call is a transport carrying [`Frame`]s: the client opens with a header naming the method
//! and its metadata, both sides exchange payload frames and end markers, and the server closes
//! with a trailer carrying the final [`Status`]. Each direction of the session moves through
//! `Open → HalfClosed → Closed` on its own.
//!
//! ## Server Side
//!
//! The `RpcRouter` maps method paths to handlers and serves each incoming transport on its own
//! task.
//!
//! ```ignore
//! use duplex_rpc::duplex::{Request, RpcRouter, RpcRouterConfig, Status};
//!
//! let mut router = RpcRouter::new(RpcRouterConfig::default());
//!
//! router.register_unary(
//!     "/example.ExampleService/SayHello",
//!     |request: Request<HelloRequest>| async move {
//!         Ok(HelloReply { message: format!("Hello{}", request.get_ref().name) })
//!     },
//! )?;
//!
//! router.serve_tcp(listener, shutdown).await?;
//! ```
//!
//! ## Client Side
//!
//! The `RpcClient` opens a transport per call and returns the call object for the pattern:
//! `UnaryCall`, `ClientStreamingCall`, `ServerStreamingCall` or `BidiCall`.
//!
//! ```ignore
//! use duplex_rpc::duplex::{CallOptions, RpcClient, RpcClientConfig};
//!
//! let client = RpcClient::tcp("127.0.0.1:50052", RpcClientConfig::default());
//!
//! let mut replies = client
//!     .server_streaming::<HelloRequest, HelloReply>(
//!         "/example.ExampleService/GetMessages",
//!         request,
//!         CallOptions::default(),
//!     )
//!     .await?;
//!
//! while let Some(reply) = replies.message().await? {
//!     println!("{}", reply.message);
//! }
//! ```
//!
//! ## Method Paths
//!
//! Methods are addressed as `/{package}.{service}/{method}`, e.g.
//! `/example.ExampleService/Chat`. The leading slash is optional.

mod call;
mod channel;
mod error;
pub mod frame;
mod metadata;
mod path;
mod session;
mod status;

pub mod client;
pub mod pattern;
pub mod server;
pub mod transport;

pub use call::{CallId, CallInfo};
pub use channel::{MessageSink, MessageSource};
pub use error::RpcError;
pub use frame::{End, Frame, Header, MetadataEntry, Trailer};
pub use metadata::Metadata;
pub use path::MethodPath;
pub use session::{Role, SessionReceiver, SessionSender, SessionState, StreamSession, Streaming};
pub use status::{Code, Status};

pub use client::{CallOptions, RpcClient, RpcClientConfig};
pub use pattern::{
    BidiCall, ClientStreamingCall, Pattern, Request, ServerStreamingCall, UnaryCall,
};
pub use server::{RpcRouter, RpcRouterConfig};
pub use transport::{Connector, DEFAULT_MAX_FRAME_LENGTH, Transport};
