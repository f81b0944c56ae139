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
use crate::duplex::session::{StreamSession, Streaming};
use crate::duplex::status::Status;
use crate::duplex::transport::Transport;

/// Client side of a client-streaming call: any number of requests, then one aggregate reply.
pub struct ClientStreamingCall<Req, Resp> {
    session: StreamSession<Req, Resp>,
}

impl<Req, Resp> ClientStreamingCall<Req, Resp>
where
    Req: Message,
    Resp: Message + Default,
{
    pub(crate) fn new(session: StreamSession<Req, Resp>) -> Self {
        Self { session }
    }

    pub fn call_info(&self) -> &CallInfo {
        self.session.call_info()
    }

    pub async fn send(&mut self, request: Req) -> Result<(), RpcError> {
        self.session.send_message(request).await
    }

    /// Close the outbound direction and wait for the server's reply.
    pub async fn close_and_receive(mut self) -> Result<Resp, RpcError> {
        if let Err(e) = self.session.close_send().await {
            return Err(self.session.finish_with_error(e).await);
        }
        single_reply(self.session, Pattern::ClientStreaming).await
    }

    /// Abandon the call, resetting it on the server.
    pub async fn cancel(self) -> Status {
        complete(self.session, Status::cancelled("cancelled by caller")).await
    }
}

/// Server driver for a client-streaming handler.
///
/// The handler owns the inbound stream and drains it; its reply is the only outbound message.
pub(crate) struct ClientStreamingHandler<Req, Resp, F> {
    handler: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F> ClientStreamingHandler<Req, Resp, F> {
    pub(crate) fn new(handler: F) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp, F, Fut> ErasedHandler for ClientStreamingHandler<Req, Resp, F>
where
    Req: Message + Default + Send + 'static,
    Resp: Message + Send + 'static,
    F: Fn(Request<Streaming<Req>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    fn pattern(&self) -> Pattern {
        Pattern::ClientStreaming
    }

    fn serve(
        self: Arc<Self>,
        info: CallInfo,
        transport: Transport,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Status> {
        Box::pin(async move {
            let session = StreamSession::<Resp, Req>::accept(transport, info.clone(), &cancel);
            let (mut tx, rx) = session.split();

            let outcome = tokio::select! {
                biased;
                status = tx.terminated() => Err(status),
                result = invoke(&info, (self.handler)(Request::new(info.clone(), rx))) => result,
            };

            let status = match outcome {
                Ok(reply) => match tx.send_message(reply).await {
                    Ok(()) => Status::ok(),
                    Err(e) => Status::from(&e),
                },
                Err(status) => status,
            };
            tx.finish(status).await
        })
    }
}
