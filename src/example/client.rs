use crate::duplex::{
    BidiCall, CallOptions, ClientStreamingCall, RpcClient, RpcClientConfig, RpcError,
    ServerStreamingCall,
};
use crate::example::proto::{ChatMessage, HelloReply, HelloRequest};
use crate::example::{CHAT, GET_MESSAGES, SAY_HELLO, SEND_MESSAGES};

/// Typed client for `example.ExampleService`.
#[derive(Clone)]
pub struct ExampleServiceClient {
    inner: RpcClient,
}

impl ExampleServiceClient {
    pub fn new(inner: RpcClient) -> Self {
        Self { inner }
    }

    pub fn tcp(addr: impl Into<String>, config: RpcClientConfig) -> Self {
        Self::new(RpcClient::tcp(addr, config))
    }

    pub async fn say_hello(
        &self,
        request: HelloRequest,
        options: CallOptions,
    ) -> Result<HelloReply, RpcError> {
        self.inner.unary(SAY_HELLO, request, options).await
    }

    pub async fn send_messages(
        &self,
        options: CallOptions,
    ) -> Result<ClientStreamingCall<HelloRequest, HelloReply>, RpcError> {
        self.inner.client_streaming(SEND_MESSAGES, options).await
    }

    pub async fn get_messages(
        &self,
        request: HelloRequest,
        options: CallOptions,
    ) -> Result<ServerStreamingCall<HelloRequest, HelloReply>, RpcError> {
        self.inner.server_streaming(GET_MESSAGES, request, options).await
    }

    pub async fn chat(
        &self,
        options: CallOptions,
    ) -> Result<BidiCall<ChatMessage, ChatMessage>, RpcError> {
        self.inner.bidi(CHAT, options).await
    }

    pub fn inner(&self) -> &RpcClient {
        &self.inner
    }
}
