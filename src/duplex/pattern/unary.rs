use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use prost::Message;
use tokio_util::sync::CancellationToken;

use crate::duplex::call::CallInfo;
use crate::duplex::error::RpcError;
use crate::duplex::pattern::{Pattern, Request, complete, invoke, single_reply};
use crate::duplex::server::handler::ErasedHandler;
use crate::duplex::session::StreamSession;
use crate::duplex::status::Status;
use crate::duplex::transport::Transport;

/// Client side of a unary call: one request, one reply.
///
/// [`call`](UnaryCall::call) is the usual entry point. [`send`](UnaryCall::send) and
/// [`receive`](UnaryCall::receive) split it in two; a second `send` fails with `InvalidUsage`.
pub struct UnaryCall<Req, Resp> {
    session: StreamSession<Req, Resp>,
    sent: bool,
}

impl<Req, Resp> UnaryCall<Req, Resp>
where
    Req: Message,
    Resp: Message + Default,
{
    pub(crate) fn new(session: StreamSession<Req, Resp>) -> Self {
        Self {
            session,
            sent: false,
        }
    }

    pub fn call_info(&self) -> &CallInfo {
        self.session.call_info()
    }

    /// Send the request and close the outbound direction.
    pub async fn send(&mut self, request: Req) -> Result<(), RpcError> {
        if self.sent {
            return Err(RpcError::invalid_usage(
                "unary call accepts exactly one request",
            ));
        }
        self.sent = true;

        self.session.send_message(request).await?;
        self.session.close_send().await
    }

    /// Wait for the reply and complete the call.
    pub async fn receive(self) -> Result<Resp, RpcError> {
        if !self.sent {
            let err = RpcError::invalid_usage("unary reply requested before the request was sent");
            return Err(self.session.finish_with_error(err).await);
        }
        single_reply(self.session, Pattern::Unary).await
    }

    /// Send `request` and wait for the reply.
    pub async fn call(mut self, request: Req) -> Result<Resp, RpcError> {
        if let Err(e) = self.send(request).await {
            return Err(self.session.finish_with_error(e).await);
        }
        self.receive().await
    }

    /// Abandon the call, resetting it on the server.
    pub async fn cancel(self) -> Status {
        complete(self.session, Status::cancelled("cancelled by caller")).await
    }
}

/// Server driver for a unary handler.
pub(crate) struct UnaryHandler<Req, Resp, F> {
    handler: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F> UnaryHandler<Req, Resp, F> {
    pub(crate) fn new(handler: F) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp, F, Fut> ErasedHandler for UnaryHandler<Req, Resp, F>
where
    Req: Message + Default + Send + 'static,
    Resp: Message + Send + 'static,
    F: Fn(Request<Req>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    fn pattern(&self) -> Pattern {
        Pattern::Unary
    }

    fn serve(
        self: Arc<Self>,
        info: CallInfo,
        transport: Transport,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Status> {
        Box::pin(async move {
            let mut session = StreamSession::<Resp, Req>::accept(transport, info.clone(), &cancel);

            let request = match session.receive_single(Pattern::Unary).await {
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
                Ok(reply) => match tx.send_message(reply).await {
                    Ok(()) => Status::ok(),
                    Err(e) => Status::from(&e),
                },
                Err(status) => status,
            };
            complete(session, status).await
        })
    }
}
