//! The four interaction patterns, each built on a single [`StreamSession`].
//!
//! Every pattern has a client call object (`UnaryCall`, `ClientStreamingCall`,
//! `ServerStreamingCall`, `BidiCall`) and a server driver that feeds one registered handler.
//! Both sides call `finish` exactly once per call, on every path.

pub mod bidi;
pub mod client_streaming;
pub mod server_streaming;
pub mod unary;

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::{FutureExt, Stream, StreamExt};
use prost::Message;
use tracing::error;

use crate::duplex::call::{CallId, CallInfo};
use crate::duplex::error::RpcError;
use crate::duplex::metadata::Metadata;
use crate::duplex::path::MethodPath;
use crate::duplex::session::{SessionSender, StreamSession};
use crate::duplex::status::Status;

pub use bidi::BidiCall;
pub use client_streaming::ClientStreamingCall;
pub use server_streaming::ServerStreamingCall;
pub use unary::UnaryCall;

/// Which interaction pattern a method follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern {
    Unary,
    ClientStreaming,
    ServerStreaming,
    Bidi,
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pattern::Unary => "unary",
            Pattern::ClientStreaming => "client-streaming",
            Pattern::ServerStreaming => "server-streaming",
            Pattern::Bidi => "bidi",
        };
        f.write_str(name)
    }
}

/// What a handler receives: the call's details plus the request message or stream.
#[derive(Debug)]
pub struct Request<T> {
    info: CallInfo,
    message: T,
}

impl<T> Request<T> {
    pub fn new(info: CallInfo, message: T) -> Self {
        Self { info, message }
    }

    pub fn call_info(&self) -> &CallInfo {
        &self.info
    }

    pub fn call_id(&self) -> &CallId {
        self.info.call_id()
    }

    pub fn method(&self) -> &MethodPath {
        self.info.method()
    }

    pub fn metadata(&self) -> &Metadata {
        self.info.metadata()
    }

    pub fn get_ref(&self) -> &T {
        &self.message
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.message
    }

    pub fn into_inner(self) -> T {
        self.message
    }

    pub fn into_parts(self) -> (CallInfo, T) {
        (self.info, self.message)
    }
}

/// Run a handler future, turning a panic into an `InternalError` status.
pub(crate) async fn invoke<T>(
    info: &CallInfo,
    handler: impl Future<Output = Result<T, Status>>,
) -> Result<T, Status> {
    match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            error!(call_id = %info.call_id(), method = %info.method(), "Handler panicked");
            Err(Status::internal("handler panicked"))
        }
    }
}

/// Send every reply the handler produces, stopping at the first failure.
///
/// Returns the status the call should finish with. The call terminating while the handler is
/// still producing (cancellation, transport failure) stops the pump with the recorded status.
pub(crate) async fn pump<Out, S>(replies: S, tx: &mut SessionSender<Out>) -> Status
where
    Out: Message,
    S: Stream<Item = Result<Out, Status>>,
{
    let mut replies = std::pin::pin!(replies);
    loop {
        let next = tokio::select! {
            biased;
            status = tx.terminated() => return status,
            next = replies.next() => next,
        };

        match next {
            Some(Ok(reply)) => {
                if let Err(e) = tx.send_message(reply).await {
                    return Status::from(&e);
                }
            }
            Some(Err(status)) => return status,
            None => return Status::ok(),
        }
    }
}

/// Receive the only reply of a call and complete it.
pub(crate) async fn single_reply<Req, Resp>(
    mut session: StreamSession<Req, Resp>,
    pattern: Pattern,
) -> Result<Resp, RpcError>
where
    Req: Message,
    Resp: Message + Default,
{
    match session.receive_single(pattern).await {
        Ok(reply) => {
            session.finish(Status::ok()).await?.into_result()?;
            Ok(reply)
        }
        Err(e) => Err(session.finish_with_error(e).await),
    }
}

/// Finish a session and collapse the outcome into the recorded status.
pub(crate) async fn complete<Out, In>(session: StreamSession<Out, In>, status: Status) -> Status
where
    Out: Message,
    In: Message + Default,
{
    match session.finish(status).await {
        Ok(recorded) => recorded,
        Err(e) => Status::from(&e),
    }
}
