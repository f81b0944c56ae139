use std::sync::Arc;

use prost::Message;
use tracing::{debug, info};

use crate::duplex::call::{CallId, CallInfo};
use crate::duplex::client::config::{CallOptions, RpcClientConfig};
use crate::duplex::error::RpcError;
use crate::duplex::path::MethodPath;
use crate::duplex::pattern::{BidiCall, ClientStreamingCall, ServerStreamingCall, UnaryCall};
use crate::duplex::session::StreamSession;
use crate::duplex::transport::{Connector, TcpConnector};

/// An RPC client that opens one transport per call.
///
/// The client handles:
/// - Opening the transport through its [`Connector`] (with timeout)
/// - Sending the call header with the method path and metadata
/// - Wrapping the session in the call object for the method's pattern
///
/// # Example
///
/// ```ignore
/// let client = RpcClient::tcp("127.0.0.1:50052", RpcClientConfig::default());
///
/// let options = CallOptions::builder()
///     .metadata(Metadata::from_pairs([("token", "dververbt3")])?)
///     .build();
///
/// let reply: HelloReply = client
///     .unary("/example.ExampleService/SayHello", request, options)
///     .await?;
/// ```
#[derive(Clone)]
pub struct RpcClient {
    connector: Arc<dyn Connector>,
    config: RpcClientConfig,
}

impl RpcClient {
    pub fn new(connector: impl Connector, config: RpcClientConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            config,
        }
    }

    /// A client that connects to `addr` over TCP.
    pub fn tcp(addr: impl Into<String>, config: RpcClientConfig) -> Self {
        let connector = TcpConnector::new(addr, config.max_frame_length);
        Self::new(connector, config)
    }

    /// Open a call and return its raw session.
    ///
    /// The caller owns the session from here on and must end it with
    /// [`finish`](StreamSession::finish). The pattern methods below do that for you.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * `method` is not a valid method path
    /// * The transport could not be opened within the connect timeout
    /// * The call header could not be sent
    pub async fn open<Req, Resp>(
        &self,
        method: &str,
        options: CallOptions,
    ) -> Result<StreamSession<Req, Resp>, RpcError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let method = MethodPath::parse(method)?;
        let call_id = CallId::generate();
        let cancel = options.cancellation.unwrap_or_default();

        info!(call_id = %call_id, method = %method, "Opening call");

        let transport =
            tokio::time::timeout(self.config.connect_timeout, self.connector.connect()).await??;

        let info = CallInfo::new(call_id, method, options.metadata);
        let session = StreamSession::open(transport, info, &cancel).await?;

        debug!(call_id = %session.call_id(), "Call header sent");
        Ok(session)
    }

    /// Send one request and wait for the reply.
    pub async fn unary<Req, Resp>(
        &self,
        method: &str,
        request: Req,
        options: CallOptions,
    ) -> Result<Resp, RpcError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let session = self.open(method, options).await?;
        UnaryCall::new(session).call(request).await
    }

    /// Start a unary call whose request is sent separately.
    pub async fn unary_call<Req, Resp>(
        &self,
        method: &str,
        options: CallOptions,
    ) -> Result<UnaryCall<Req, Resp>, RpcError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        Ok(UnaryCall::new(self.open(method, options).await?))
    }

    /// Start a call that streams requests and receives one reply.
    pub async fn client_streaming<Req, Resp>(
        &self,
        method: &str,
        options: CallOptions,
    ) -> Result<ClientStreamingCall<Req, Resp>, RpcError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        Ok(ClientStreamingCall::new(self.open(method, options).await?))
    }

    /// Send one request and return the stream of replies.
    pub async fn server_streaming<Req, Resp>(
        &self,
        method: &str,
        request: Req,
        options: CallOptions,
    ) -> Result<ServerStreamingCall<Req, Resp>, RpcError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let mut session = self.open(method, options).await?;

        let sent = async {
            session.send_message(request).await?;
            session.close_send().await
        }
        .await;
        if let Err(e) = sent {
            return Err(session.finish_with_error(e).await);
        }

        Ok(ServerStreamingCall::new(session))
    }

    /// Start a call that streams in both directions.
    pub async fn bidi<Req, Resp>(
        &self,
        method: &str,
        options: CallOptions,
    ) -> Result<BidiCall<Req, Resp>, RpcError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        Ok(BidiCall::new(self.open(method, options).await?))
    }

    /// Get the client configuration.
    pub fn config(&self) -> &RpcClientConfig {
        &self.config
    }
}
