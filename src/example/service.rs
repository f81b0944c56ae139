use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::duplex::{Request, RpcError, RpcRouter, RpcRouterConfig, Status, Streaming};
use crate::example::proto::{ChatMessage, HelloReply, HelloRequest};
use crate::example::{
    CHAT, DEFAULT_STREAM_INTERVAL, GET_MESSAGES, GREETINGS, SAY_HELLO, SEND_MESSAGES,
};

/// Replies in flight between the chat reader task and the outbound stream.
const CHAT_BUFFER: usize = 16;

pub type ReplyStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

pub async fn start_server(
    listener: TcpListener,
    config: RpcRouterConfig,
    shutdown: CancellationToken,
) -> Result<(), RpcError> {
    let router = ExampleServiceImpl::default().into_router(config)?;
    router.serve_tcp(listener, shutdown).await
}

pub struct ExampleServiceImpl {
    /// Pause between the replies of the streaming methods.
    stream_interval: Duration,
}

impl Default for ExampleServiceImpl {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_INTERVAL)
    }
}

impl ExampleServiceImpl {
    pub fn new(stream_interval: Duration) -> Self {
        Self { stream_interval }
    }

    /// Build a router serving this service.
    pub fn into_router(self, config: RpcRouterConfig) -> Result<RpcRouter, RpcError> {
        let mut router = RpcRouter::new(config);
        self.register(&mut router)?;
        Ok(router)
    }

    /// Register all four methods on `router`.
    pub fn register(self, router: &mut RpcRouter) -> Result<(), RpcError> {
        let service = Arc::new(self);

        let svc = Arc::clone(&service);
        router.register_unary(SAY_HELLO, move |request: Request<HelloRequest>| {
            let svc = Arc::clone(&svc);
            async move { svc.say_hello(request).await }
        })?;

        let svc = Arc::clone(&service);
        router.register_client_streaming(
            SEND_MESSAGES,
            move |request: Request<Streaming<HelloRequest>>| {
                let svc = Arc::clone(&svc);
                async move { svc.send_messages(request).await }
            },
        )?;

        let svc = Arc::clone(&service);
        router.register_server_streaming(GET_MESSAGES, move |request: Request<HelloRequest>| {
            let svc = Arc::clone(&svc);
            async move { svc.get_messages(request).await }
        })?;

        let svc = Arc::clone(&service);
        router.register_bidi(CHAT, move |request: Request<Streaming<ChatMessage>>| {
            let svc = Arc::clone(&svc);
            async move { svc.chat(request).await }
        })?;

        Ok(())
    }

    pub async fn say_hello(&self, request: Request<HelloRequest>) -> Result<HelloReply, Status> {
        let call_id = request.call_id().clone();
        if let Some(token) = request.metadata().get("token") {
            info!(call_id = %call_id, token, "SayHello token");
        }

        let req = request.into_inner();

        // An empty message carries no payload; anything else must be a JSON object.
        if !req.message.is_empty() {
            let payload: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(&req.message).map_err(|e| {
                    warn!(call_id = %call_id, error = %e, "Malformed JSON message");
                    Status::invalid_usage(format!("message is not a JSON object: {e}"))
                })?;
            info!(call_id = %call_id, message = ?payload, "SayHello message");
        }

        Ok(HelloReply {
            message: format!("Hello{}{}", req.name, req.action().as_str_name()),
        })
    }

    pub async fn send_messages(
        &self,
        request: Request<Streaming<HelloRequest>>,
    ) -> Result<HelloReply, Status> {
        let mut inbound = request.into_inner();

        let mut messages = Vec::new();
        while let Some(req) = inbound.receive_message().await.map_err(Status::from)? {
            messages.push(req.message);
        }

        debug!(count = messages.len(), "Client stream exhausted");
        Ok(HelloReply {
            message: format!("Received messages: {}", messages.join(", ")),
        })
    }

    pub async fn get_messages(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<ReplyStream<HelloReply>, Status> {
        let interval = self.stream_interval;
        info!(call_id = %request.call_id(), name = %request.get_ref().name, "GetMessages started");

        let outbound = async_stream::stream! {
            for (i, message) in GREETINGS.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(interval).await;
                }
                yield Ok(HelloReply { message: message.to_string() });
            }
        };

        Ok(Box::pin(outbound))
    }

    pub async fn chat(
        &self,
        request: Request<Streaming<ChatMessage>>,
    ) -> Result<ReplyStream<ChatMessage>, Status> {
        let (info, mut inbound) = request.into_parts();
        let call_id = info.call_id().clone();
        let interval = self.stream_interval;
        let (tx, rx) = mpsc::channel(CHAT_BUFFER);

        tokio::spawn(async move {
            loop {
                match inbound.receive_message().await {
                    Ok(Some(msg)) => {
                        info!(call_id = %call_id, message = %msg.message, "Received message");
                        let reply = ChatMessage {
                            message: format!("Server received: {}", msg.message),
                        };
                        if tx.send(Ok(reply)).await.is_err() {
                            break;
                        }
                        tokio::time::sleep(interval).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(call_id = %call_id, error = %e, "Chat stream error");
                        let _ = tx.send(Err(Status::from(e))).await;
                        break;
                    }
                }
            }

            debug!(call_id = %call_id, "Chat inbound closed");
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
