use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::Stream;
use futures::future::BoxFuture;
use prost::Message;
use tokio_util::sync::CancellationToken;

use crate::duplex::call::CallInfo;
use crate::duplex::error::RpcError;
use crate::duplex::pattern::{Pattern, Request, complete, invoke, pump};
use crate::duplex::server::handler::ErasedHandler;
use crate::duplex::session::StreamSession;
use crate::duplex::status::Status;
use crate::duplex::transport::Transport;

/// Client side of a server-streaming call, after the request has been sent.
///
/// Replies are read with [`message`](ServerStreamingCall::message) until it returns `Ok(None)`;
/// the call completes at that point and [`status`](ServerStreamingCall::status) holds the
/// server's final status.
pub struct ServerStreamingCall<Req, Resp> {
    session: Option<StreamSession<Req, Resp>>,
    status: Option<Status>,
}

impl<Req, Resp> ServerStreamingCall<Req, Resp>
where
    Req: Message,
    Resp: Message + Default,
{
    pub(crate) fn new(session: StreamSession<Req, Resp>) -> Self {
        Self {
            session: Some(session),
            status: None,
        }
    }

    /// The next reply, or `None` once the server finished successfully.
    pub async fn message(&mut self) -> Result<Option<Resp>, RpcError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };

        let received = session.receive_message().await;
        match received {
            Ok(Some(reply)) => Ok(Some(reply)),
            Ok(None) => {
                let status = self.settle(Status::ok()).await;
                status.into_result().map(|()| None)
            }
            Err(e) => {
                self.settle(Status::from(&e)).await;
                Err(e)
            }
        }
    }

    async fn settle(&mut self, status: Status) -> Status {
        let status = match self.session.take() {
            Some(session) => complete(session, status).await,
            None => status,
        };
        self.status = Some(status.clone());
        status
    }

    /// The final status, once the call has completed.
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    /// Stop reading early, resetting the call on the server.
    pub async fn cancel(mut self) -> Status {
        self.settle(Status::cancelled("cancelled by caller")).await
    }

    /// Consume the call as a stream of replies.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Resp, RpcError>> + Send
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        async_stream::try_stream! {
            while let Some(reply) = self.message().await? {
                yield reply;
            }
        }
    }
}

/// Server driver for a server-streaming handler.
pub(crate) struct ServerStreamingHandler<Req, Resp, F> {
    handler: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F> ServerStreamingHandler<Req, Resp, F> {
    pub(crate) fn new(handler: F) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp, F, Fut, S> ErasedHandler for ServerStreamingHandler<Req, Resp, F>
where
    Req: Message + Default + Send + 'static,
    Resp: Message + Send + 'static,
    F: Fn(Request<Req>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<S, Status>> + Send + 'static,
    S: Stream<Item = Result<Resp, Status>> + Send + 'static,
{
    fn pattern(&self) -> Pattern {
        Pattern::ServerStreaming
    }

    fn serve(
        self: Arc<Self>,
        info: CallInfo,
        transport: Transport,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Status> {
        Box::pin(async move {
            let mut session = StreamSession::<Resp, Req>::accept(transport, info.clone(), &cancel);

            let request = match session.receive_single(Pattern::ServerStreaming).await {
                Ok(request) => request,
                Err(e) => return complete(session, Status::from(&e)).await,
            };

            let request = Request::new(info.clone(), request);
            let (tx, rx) = session.halves_mut();
            let outcome = tokio::select! {
                biased;
                status = tx.terminated() => Err(status),
                status = rx.reset() => Err(status),
                result = invoke(&info, (self.handler)(request)) => result,
            };

            let status = match outcome {
                Ok(replies) => tokio::select! {
                    status = rx.reset() => status,
                    status = pump(replies, tx) => status,
                },
                Err(status) => status,
            };
            complete(session, status).await
        })
    }
}
