use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::{SinkExt, Stream, StreamExt};
use prost::Message;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::duplex::call::{CallId, CallInfo};
use crate::duplex::error::RpcError;
use crate::duplex::frame::Frame;
use crate::duplex::frame::frame::Kind;
use crate::duplex::metadata::Metadata;
use crate::duplex::path::MethodPath;
use crate::duplex::pattern::Request;
use crate::duplex::pattern::bidi::BidiHandler;
use crate::duplex::pattern::client_streaming::ClientStreamingHandler;
use crate::duplex::pattern::server_streaming::ServerStreamingHandler;
use crate::duplex::pattern::unary::UnaryHandler;
use crate::duplex::server::config::RpcRouterConfig;
use crate::duplex::server::handler::ErasedHandler;
use crate::duplex::session::Streaming;
use crate::duplex::status::Status;
use crate::duplex::transport::{FrameSink, FrameStream, Transport, tcp};

type Registry = HashMap<String, Arc<dyn ErasedHandler>>;

/// Maps method paths to handlers and serves incoming calls.
///
/// Handlers are registered up front; [`serve`](RpcRouter::serve) consumes the router, so the
/// registry is immutable while calls are running.
pub struct RpcRouter {
    handlers: Registry,
    config: RpcRouterConfig,
}

impl RpcRouter {
    pub fn new(config: RpcRouterConfig) -> Self {
        Self {
            handlers: HashMap::new(),
            config,
        }
    }

    /// Register a handler that takes one request and returns one reply.
    ///
    /// # Example
    /// ```ignore
    /// router.register_unary(
    ///     "/example.ExampleService/SayHello",
    ///     |request: Request<HelloRequest>| async move {
    ///         let name = request.into_inner().name;
    ///         Ok(HelloReply { message: format!("Hello {name}") })
    ///     },
    /// )?;
    /// ```
    pub fn register_unary<Req, Resp, F, Fut>(
        &mut self,
        method: &str,
        handler: F,
    ) -> Result<(), RpcError>
    where
        Req: Message + Default + Send + 'static,
        Resp: Message + Send + 'static,
        F: Fn(Request<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        self.insert(method, Arc::new(UnaryHandler::<Req, Resp, F>::new(handler)))
    }

    /// Register a handler that drains a request stream and returns one reply.
    pub fn register_client_streaming<Req, Resp, F, Fut>(
        &mut self,
        method: &str,
        handler: F,
    ) -> Result<(), RpcError>
    where
        Req: Message + Default + Send + 'static,
        Resp: Message + Send + 'static,
        F: Fn(Request<Streaming<Req>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        self.insert(
            method,
            Arc::new(ClientStreamingHandler::<Req, Resp, F>::new(handler)),
        )
    }

    /// Register a handler that takes one request and returns a stream of replies.
    pub fn register_server_streaming<Req, Resp, F, Fut, S>(
        &mut self,
        method: &str,
        handler: F,
    ) -> Result<(), RpcError>
    where
        Req: Message + Default + Send + 'static,
        Resp: Message + Send + 'static,
        F: Fn(Request<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, Status>> + Send + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
    {
        self.insert(
            method,
            Arc::new(ServerStreamingHandler::<Req, Resp, F>::new(handler)),
        )
    }

    /// Register a handler that maps a request stream to a reply stream.
    pub fn register_bidi<Req, Resp, F, Fut, S>(
        &mut self,
        method: &str,
        handler: F,
    ) -> Result<(), RpcError>
    where
        Req: Message + Default + Send + 'static,
        Resp: Message + Send + 'static,
        F: Fn(Request<Streaming<Req>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, Status>> + Send + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
    {
        self.insert(method, Arc::new(BidiHandler::<Req, Resp, F>::new(handler)))
    }

    fn insert(&mut self, method: &str, handler: Arc<dyn ErasedHandler>) -> Result<(), RpcError> {
        let path = MethodPath::parse(method)?.full_path();
        if self.handlers.contains_key(&path) {
            return Err(RpcError::DuplicateMethod(path));
        }

        info!(method = %path, pattern = %handler.pattern(), "Registered RPC handler");
        self.handlers.insert(path, handler);
        Ok(())
    }

    /// Check if a handler is registered for the given method path.
    pub fn has_handler(&self, method: &str) -> bool {
        MethodPath::parse(method)
            .map(|path| self.handlers.contains_key(&path.full_path()))
            .unwrap_or(false)
    }

    pub fn config(&self) -> &RpcRouterConfig {
        &self.config
    }

    /// Serve calls from `incoming` until it ends or `shutdown` fires.
    ///
    /// Every call runs on its own task with a child of `shutdown` as its cancellation signal, so
    /// shutting down cancels in-flight calls. This returns once all of them have completed.
    pub async fn serve<I>(
        self,
        mut incoming: I,
        shutdown: CancellationToken,
    ) -> Result<(), RpcError>
    where
        I: Stream<Item = Result<Transport, RpcError>> + Unpin,
    {
        let handlers = Arc::new(self.handlers);
        let limit = self
            .config
            .max_concurrent_calls
            .map(|max| Arc::new(Semaphore::new(max)));
        let mut calls = JoinSet::new();

        info!(
            methods = handlers.len(),
            max_concurrent_calls = ?self.config.max_concurrent_calls,
            "RPC router started"
        );

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting calls");
                    break;
                }
                next = incoming.next() => next,
            };

            let transport = match next {
                Some(Ok(transport)) => transport,
                Some(Err(e)) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
                None => {
                    info!("Incoming connection stream closed, router shutting down");
                    break;
                }
            };

            let permit = match &limit {
                Some(semaphore) => tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = Arc::clone(semaphore).acquire_owned() => Some(
                        permit.map_err(|e| RpcError::Internal(e.to_string()))?,
                    ),
                },
                None => None,
            };

            let handlers = Arc::clone(&handlers);
            let cancel = shutdown.child_token();
            calls.spawn(async move {
                let _permit = permit;
                dispatch(&handlers, transport, cancel).await;
            });

            while let Some(finished) = calls.try_join_next() {
                if let Err(e) = finished {
                    error!(error = %e, "Call task failed");
                }
            }
        }

        if !calls.is_empty() {
            info!(in_flight = calls.len(), "Draining in-flight calls");
        }
        while let Some(finished) = calls.join_next().await {
            if let Err(e) = finished {
                error!(error = %e, "Call task failed");
            }
        }

        info!("RPC router stopped");
        Ok(())
    }

    /// Serve calls accepted on a TCP listener.
    pub async fn serve_tcp(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), RpcError> {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "Listening for TCP connections");
        }
        let incoming = tcp::incoming(listener, self.config.max_frame_length);
        self.serve(incoming, shutdown).await
    }
}

/// Read the call header, look up the handler and run the call to completion.
async fn dispatch(handlers: &Registry, transport: Transport, cancel: CancellationToken) {
    let (sink, mut stream) = transport.into_parts();

    let first = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Shutdown before the call header arrived");
            return;
        }
        first = stream.next() => first,
    };

    let header = match first {
        Some(Ok(Frame {
            kind: Some(Kind::Header(header)),
        })) => header,
        Some(Ok(frame)) => {
            warn!(frame = frame.kind_name(), "Connection did not start with a call header");
            let status = Status::invalid_usage("first frame must be the call header");
            reject(sink, stream, status, &cancel).await;
            return;
        }
        Some(Err(e)) => {
            warn!(error = %e, "Failed to read call header");
            return;
        }
        None => {
            debug!("Connection closed before the call header arrived");
            return;
        }
    };

    let call_id = CallId::parse_or_generate(&header.call_id);

    let method = match MethodPath::parse(&header.method) {
        Ok(method) => method,
        Err(e) => {
            warn!(call_id = %call_id, method = %header.method, error = %e, "Rejected call");
            reject(sink, stream, Status::from(&e), &cancel).await;
            return;
        }
    };

    let metadata = match Metadata::from_entries(header.metadata) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(call_id = %call_id, method = %method, error = %e, "Rejected call");
            reject(sink, stream, Status::from(&e), &cancel).await;
            return;
        }
    };

    let path = method.full_path();
    let Some(handler) = handlers.get(&path).cloned() else {
        warn!(call_id = %call_id, method = %path, "No handler registered for method");
        let status = Status::unimplemented(format!("method '{path}' is not registered"));
        reject(sink, stream, status, &cancel).await;
        return;
    };

    info!(call_id = %call_id, method = %path, pattern = %handler.pattern(), "Dispatching call");

    let info = CallInfo::new(call_id.clone(), method, metadata);
    let status = handler
        .serve(info, Transport { sink, stream }, cancel)
        .await;

    info!(
        call_id = %call_id,
        method = %path,
        code = ?status.code(),
        detail = status.detail().unwrap_or_default(),
        "Call completed"
    );
}

/// Answer a call that never reached a handler with its final status.
///
/// The inbound direction is drained until the client lets go, so a client still sending reads
/// the rejection instead of a broken connection.
async fn reject(
    mut sink: FrameSink,
    mut stream: FrameStream,
    status: Status,
    cancel: &CancellationToken,
) {
    if let Err(e) = sink.send(Frame::trailer(&status)).await {
        debug!(error = %e, "Peer gone before rejection could be delivered");
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Transport shutdown failed");
    }

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => None,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Frame { kind: Some(Kind::Trailer(_)) })) | Some(Err(_)) | None => break,
            Some(Ok(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::duplex::client::{CallOptions, RpcClient, RpcClientConfig};
    use crate::duplex::session::StreamSession;
    use crate::duplex::status::Code;
    use crate::duplex::transport::memory;

    const TOKEN: &str = "/test.Echo/Token";
    const COUNT: &str = "/test.Echo/Count";

    fn token_router(config: RpcRouterConfig) -> RpcRouter {
        let mut router = RpcRouter::new(config);
        router
            .register_unary(TOKEN, |request: Request<String>| async move {
                let token = request.metadata().get("token").unwrap_or("missing");
                Ok::<_, Status>(format!("{token}:{}", request.get_ref()))
            })
            .unwrap();
        router
    }

    /// Replies with `0..n` for a request carrying `n`.
    fn count_router() -> RpcRouter {
        let mut router = RpcRouter::new(RpcRouterConfig::default());
        router
            .register_server_streaming(COUNT, |request: Request<String>| async move {
                let n: usize = request.get_ref().parse().unwrap_or(0);
                Ok::<_, Status>(futures::stream::iter(
                    (0..n).map(|i| Ok::<_, Status>(i.to_string())),
                ))
            })
            .unwrap();
        router
    }

    /// A hand-driven server that reads the whole request and answers with `replies`.
    fn replying_server(replies: &'static [&'static str]) -> RpcClient {
        let (connector, mut incoming) = memory::channel(8);
        tokio::spawn(async move {
            let mut transport = incoming.next().await.unwrap().unwrap();
            let header = transport.stream.next().await.unwrap().unwrap();
            assert_eq!(header.kind_name(), "header");

            let info = CallInfo::new(
                CallId::generate(),
                MethodPath::parse(TOKEN).unwrap(),
                Metadata::new(),
            );
            let mut session = StreamSession::<String, String>::accept(
                transport,
                info,
                &CancellationToken::new(),
            );
            while session.receive_message().await.unwrap().is_some() {}
            for reply in replies {
                if session.send_message(reply.to_string()).await.is_err() {
                    break;
                }
            }
            session.finish(Status::ok()).await.unwrap();
        });
        RpcClient::new(connector, RpcClientConfig::default())
    }

    fn client_for(router: RpcRouter) -> (RpcClient, CancellationToken) {
        let (connector, incoming) = memory::channel(8);
        let shutdown = CancellationToken::new();
        tokio::spawn(router.serve(incoming, shutdown.clone()));
        (RpcClient::new(connector, RpcClientConfig::default()), shutdown)
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut router = token_router(RpcRouterConfig::default());

        let err = router
            .register_unary(TOKEN, |_: Request<String>| async {
                Ok::<_, Status>(String::new())
            })
            .unwrap_err();
        assert!(matches!(err, RpcError::DuplicateMethod(ref path) if path == TOKEN));
    }

    #[test]
    fn test_malformed_path_rejected() {
        let mut router = RpcRouter::new(RpcRouterConfig::default());

        let err = router
            .register_unary("NoMethod", |_: Request<String>| async {
                Ok::<_, Status>(String::new())
            })
            .unwrap_err();
        assert!(matches!(err, RpcError::PathParse(_)));
    }

    #[test]
    fn test_has_handler() {
        let router = token_router(RpcRouterConfig::default());

        assert!(router.has_handler(TOKEN));
        assert!(router.has_handler("test.Echo/Token"));
        assert!(!router.has_handler("/test.Echo/Other"));
        assert!(!router.has_handler("garbage"));
    }

    #[tokio::test]
    async fn test_metadata_reaches_handler() {
        let (client, shutdown) = client_for(token_router(RpcRouterConfig::default()));

        let options = CallOptions::builder()
            .metadata(Metadata::from_pairs([("token", "abc")]).unwrap())
            .build();
        let reply: String = client
            .unary(TOKEN, "ping".to_string(), options)
            .await
            .unwrap();
        assert_eq!(reply, "abc:ping");

        let reply: String = client
            .unary(TOKEN, "ping".to_string(), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, "missing:ping");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unknown_method_is_unimplemented() {
        let (client, shutdown) = client_for(token_router(RpcRouterConfig::default()));

        let err = client
            .unary::<String, String>(
                "/test.Echo/Missing",
                "ping".to_string(),
                CallOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_concurrency_limit_serves_sequential_calls() {
        let config = RpcRouterConfig::builder().max_concurrent_calls(1).build();
        let (client, shutdown) = client_for(token_router(config));

        for i in 0..3 {
            let reply: String = client
                .unary(TOKEN, i.to_string(), CallOptions::default())
                .await
                .unwrap();
            assert_eq!(reply, format!("missing:{i}"));
        }

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_handler_panic_is_internal_error() {
        let mut router = RpcRouter::new(RpcRouterConfig::default());
        router
            .register_unary("/test.Echo/Panic", |_: Request<String>| async {
                if true {
                    panic!("boom");
                }
                Ok::<_, Status>(String::new())
            })
            .unwrap();
        let (client, shutdown) = client_for(router);

        let err = client
            .unary::<String, String>("/test.Echo/Panic", String::new(), CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InternalError);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_serve_returns_when_incoming_closes() {
        let (connector, incoming) = memory::channel(8);
        let router = token_router(RpcRouterConfig::default());

        let server = tokio::spawn(router.serve(incoming, CancellationToken::new()));
        drop(connector);

        tokio::time::timeout(Duration::from_secs(1), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_unary_server_rejects_second_request() {
        let (client, shutdown) = client_for(token_router(RpcRouterConfig::default()));

        let mut session = client
            .open::<String, String>(TOKEN, CallOptions::default())
            .await
            .unwrap();
        session.send_message("one".to_string()).await.unwrap();
        session.send_message("two".to_string()).await.unwrap();

        let err = session.receive_message().await.unwrap_err();
        assert!(matches!(
            err,
            RpcError::InvalidUsage(ref detail) if detail.contains("more than one")
        ));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_server_streaming_rejects_second_request() {
        let (client, shutdown) = client_for(count_router());

        let mut session = client
            .open::<String, String>(COUNT, CallOptions::default())
            .await
            .unwrap();
        session.send_message("1".to_string()).await.unwrap();
        session.send_message("2".to_string()).await.unwrap();

        let err = session.receive_message().await.unwrap_err();
        assert!(matches!(
            err,
            RpcError::InvalidUsage(ref detail) if detail.contains("more than one")
        ));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unary_client_rejects_second_reply() {
        let client = replying_server(&["one", "two"]);

        let err = client
            .unary::<String, String>(TOKEN, "ping".to_string(), CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RpcError::InvalidUsage(ref detail) if detail.contains("more than one")
        ));
    }

    #[tokio::test]
    async fn test_unary_client_rejects_missing_reply() {
        let client = replying_server(&[]);

        let err = client
            .unary::<String, String>(TOKEN, "ping".to_string(), CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RpcError::InvalidUsage(ref detail) if detail.contains("got none")
        ));
    }

    #[tokio::test]
    async fn test_shutdown_with_stalled_reader() {
        let (connector, incoming) = memory::channel(8);
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(count_router().serve(incoming, shutdown.clone()));
        let client = RpcClient::new(connector, RpcClientConfig::default());

        let mut call = client
            .server_streaming::<String, String>(COUNT, "100".to_string(), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(call.message().await.unwrap().as_deref(), Some("0"));

        // The client keeps the call open without reading the rest.
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("serve must return while a client holds a call open")
            .unwrap()
            .unwrap();

        drop(call);
    }
}
