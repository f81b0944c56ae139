use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::Stream;
use futures::future::BoxFuture;
use prost::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::duplex::call::CallInfo;
use crate::duplex::error::RpcError;
use crate::duplex::pattern::{Pattern, Request, complete, invoke, pump};
use crate::duplex::server::handler::ErasedHandler;
use crate::duplex::session::{SessionReceiver, SessionSender, StreamSession, Streaming};
use crate::duplex::status::Status;
use crate::duplex::transport::Transport;

/// Client side of a bidirectional streaming call.
///
/// Sending and receiving progress independently. Either drive both directions from one task
/// with [`drive`](BidiCall::drive), or [`split`](BidiCall::split) the call and move the halves
/// onto separate tasks, then [`reunite`](BidiCall::reunite) them to [`finish`](BidiCall::finish).
pub struct BidiCall<Req, Resp> {
    session: StreamSession<Req, Resp>,
}

impl<Req, Resp> BidiCall<Req, Resp>
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

    pub async fn close_send(&mut self) -> Result<(), RpcError> {
        self.session.close_send().await
    }

    pub async fn receive(&mut self) -> Result<Option<Resp>, RpcError> {
        self.session.receive_message().await
    }

    pub fn split(self) -> (SessionSender<Req>, SessionReceiver<Resp>) {
        self.session.split()
    }

    pub fn reunite(
        sender: SessionSender<Req>,
        receiver: SessionReceiver<Resp>,
    ) -> Result<Self, RpcError> {
        StreamSession::reunite(sender, receiver).map(Self::new)
    }

    /// Complete the call, half-closing first if that has not happened yet, and return the
    /// server's verdict.
    pub async fn finish(self) -> Result<(), RpcError> {
        self.session.finish(Status::ok()).await?.into_result()
    }

    /// Abandon the call, resetting it on the server.
    pub async fn cancel(self) -> Status {
        complete(self.session, Status::cancelled("cancelled by caller")).await
    }

    /// Run a send path and a receive path concurrently, then complete the call.
    ///
    /// The outbound direction is half-closed once `send_path` returns. A failure on either path
    /// terminates the call so the other path is woken instead of waiting forever.
    ///
    /// ```ignore
    /// let (_, replies) = call
    ///     .drive(
    ///         async |tx: &mut SessionSender<ChatMessage>| {
    ///             for message in messages {
    ///                 tx.send_message(message).await?;
    ///             }
    ///             Ok(())
    ///         },
    ///         async |rx: &mut SessionReceiver<ChatMessage>| {
    ///             let mut replies = Vec::new();
    ///             while let Some(reply) = rx.receive_message().await? {
    ///                 replies.push(reply);
    ///             }
    ///             Ok(replies)
    ///         },
    ///     )
    ///     .await?;
    /// ```
    pub async fn drive<S, R, SO, RO>(
        mut self,
        send_path: S,
        recv_path: R,
    ) -> Result<(SO, RO), RpcError>
    where
        S: AsyncFnOnce(&mut SessionSender<Req>) -> Result<SO, RpcError>,
        R: AsyncFnOnce(&mut SessionReceiver<Resp>) -> Result<RO, RpcError>,
    {
        let (tx, rx) = self.session.halves_mut();

        let (sent, received) = tokio::join!(
            async {
                let mut result = send_path(&mut *tx).await;
                if result.is_ok() {
                    if let Err(e) = tx.close_send().await {
                        result = Err(e);
                    }
                }
                if let Err(e) = &result {
                    tx.abort(Status::from(e));
                }
                result
            },
            async {
                let result = recv_path(&mut *rx).await;
                if let Err(e) = &result {
                    rx.abort(Status::from(e));
                }
                result
            },
        );

        match (sent, received) {
            (Ok(sent), Ok(received)) => {
                self.session.finish(Status::ok()).await?.into_result()?;
                Ok((sent, received))
            }
            (_, Err(e)) | (Err(e), _) => Err(self.session.finish_with_error(e).await),
        }
    }
}

/// Server driver for a bidirectional handler.
///
/// The handler gets the inbound stream and returns the outbound one. A successful call is only
/// recorded once the reply stream is done and the client has half-closed.
pub(crate) struct BidiHandler<Req, Resp, F> {
    handler: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F> BidiHandler<Req, Resp, F> {
    pub(crate) fn new(handler: F) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp, F, Fut, S> ErasedHandler for BidiHandler<Req, Resp, F>
where
    Req: Message + Default + Send + 'static,
    Resp: Message + Send + 'static,
    F: Fn(Request<Streaming<Req>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<S, Status>> + Send + 'static,
    S: Stream<Item = Result<Resp, Status>> + Send + 'static,
{
    fn pattern(&self) -> Pattern {
        Pattern::Bidi
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
                Ok(replies) => match pump(replies, &mut tx).await {
                    status if status.is_ok() => match tx.close_send().await {
                        Ok(()) => {
                            debug!(
                                call_id = %info.call_id(),
                                "Replies done, waiting for client half-close"
                            );
                            tx.inbound_closed().await;
                            Status::ok()
                        }
                        Err(e) => Status::from(&e),
                    },
                    status => status,
                },
                Err(status) => status,
            };
            tx.finish(status).await
        })
    }
}
