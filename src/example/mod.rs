//! `example.ExampleService`: one method per interaction pattern.
//!
//! - `SayHello` (unary) greets with the request's name and action.
//! - `SendMessages` (client-streaming) joins every message it receives.
//! - `GetMessages` (server-streaming) emits a fixed list of greetings.
//! - `Chat` (bidi) echoes every message back.

pub mod client;
pub mod proto;
pub mod service;

use std::time::Duration;

pub use client::ExampleServiceClient;
pub use proto::{Actions, ChatMessage, HelloReply, HelloRequest};
pub use service::{ExampleServiceImpl, start_server};

pub const SAY_HELLO: &str = "/example.ExampleService/SayHello";
pub const SEND_MESSAGES: &str = "/example.ExampleService/SendMessages";
pub const GET_MESSAGES: &str = "/example.ExampleService/GetMessages";
pub const CHAT: &str = "/example.ExampleService/Chat";

/// Replies of `GetMessages`, in order.
pub const GREETINGS: [&str; 4] = ["Hello", "World", "gRPC", "Server Streaming"];

pub const DEFAULT_STREAM_INTERVAL: Duration = Duration::from_secs(1);

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::duplex::transport::memory;
    use crate::duplex::{
        BidiCall, CallOptions, Code, Metadata, RpcClient, RpcClientConfig, RpcError,
        RpcRouterConfig, SessionReceiver, SessionSender, Status,
    };

    struct Harness {
        client: ExampleServiceClient,
        shutdown: CancellationToken,
        server: JoinHandle<Result<(), RpcError>>,
    }

    impl Harness {
        fn start(stream_interval: Duration) -> Self {
            let (connector, incoming) = memory::channel(8);
            let router = ExampleServiceImpl::new(stream_interval)
                .into_router(RpcRouterConfig::default())
                .unwrap();

            let shutdown = CancellationToken::new();
            let server = tokio::spawn(router.serve(incoming, shutdown.clone()));
            let client =
                ExampleServiceClient::new(RpcClient::new(connector, RpcClientConfig::default()));

            Self {
                client,
                shutdown,
                server,
            }
        }

        async fn stop(self) {
            self.shutdown.cancel();
            self.server.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_say_hello() {
        let harness = Harness::start(Duration::ZERO);

        let metadata =
            Metadata::from_pairs([("token", "dververbt3"), ("organization", "xyz")]).unwrap();
        let options = CallOptions::builder().metadata(metadata).build();
        let request = HelloRequest::new(
            "amizhthan",
            Actions::Create,
            r#"{"Key1":"value1","Key2":"value2"}"#,
        );

        let reply = harness.client.say_hello(request, options).await.unwrap();
        assert_eq!(reply.message, "HelloamizhthanCREATE");

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_say_hello_rejects_malformed_json() {
        let harness = Harness::start(Duration::ZERO);

        let request = HelloRequest::new("amizhthan", Actions::Update, "{not json");
        let err = harness
            .client
            .say_hello(request, CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidUsage(ref detail) if detail.contains("JSON")));

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_unary_second_send_is_invalid_usage() {
        let harness = Harness::start(Duration::ZERO);

        let mut call = harness
            .client
            .inner()
            .unary_call::<HelloRequest, HelloReply>(SAY_HELLO, CallOptions::default())
            .await
            .unwrap();

        call.send(HelloRequest::new("Client", Actions::Read, ""))
            .await
            .unwrap();
        let err = call
            .send(HelloRequest::new("Again", Actions::Read, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidUsage(_)));

        // The first request is unaffected.
        let reply = call.receive().await.unwrap();
        assert_eq!(reply.message, "HelloClientREAD");

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_send_messages_joins_in_order() {
        let harness = Harness::start(Duration::ZERO);

        let mut call = harness
            .client
            .send_messages(CallOptions::default())
            .await
            .unwrap();
        for message in ["Hello", "World"] {
            call.send(HelloRequest::with_message(message)).await.unwrap();
        }
        let reply = call.close_and_receive().await.unwrap();
        assert_eq!(reply.message, "Received messages: Hello, World");

        let call = harness
            .client
            .send_messages(CallOptions::default())
            .await
            .unwrap();
        let reply = call.close_and_receive().await.unwrap();
        assert_eq!(reply.message, "Received messages: ");

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_get_messages_then_exhausted() {
        let harness = Harness::start(Duration::ZERO);

        let request = HelloRequest {
            name: "Client".to_string(),
            ..Default::default()
        };
        let mut call = harness
            .client
            .get_messages(request, CallOptions::default())
            .await
            .unwrap();

        let mut received = Vec::new();
        while let Some(reply) = call.message().await.unwrap() {
            received.push(reply.message);
        }
        assert_eq!(received, GREETINGS);
        assert!(call.status().is_some_and(Status::is_ok));

        // Exhausted stays exhausted.
        assert_eq!(call.message().await.unwrap(), None);

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_get_messages_as_stream() {
        let harness = Harness::start(Duration::from_millis(5));

        let call = harness
            .client
            .get_messages(HelloRequest::default(), CallOptions::default())
            .await
            .unwrap();

        let received: Vec<String> = call
            .into_stream()
            .map(|reply| reply.unwrap().message)
            .collect()
            .await;
        assert_eq!(received, GREETINGS);

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_chat_at_mismatched_rates() {
        let messages = ["Hello", "World", "gRPC", "Bidirectional Streaming"];
        let expected = messages.map(|m| format!("Server received: {m}"));

        // Fast client, slow server.
        let harness = Harness::start(Duration::from_millis(20));
        let call = harness.client.chat(CallOptions::default()).await.unwrap();
        let ((), replies) = call
            .drive(
                async |tx: &mut SessionSender<ChatMessage>| {
                    for message in messages {
                        tx.send_message(ChatMessage::new(message)).await?;
                    }
                    Ok(())
                },
                async |rx: &mut SessionReceiver<ChatMessage>| {
                    let mut replies = Vec::new();
                    while let Some(reply) = rx.receive_message().await? {
                        replies.push(reply.message);
                    }
                    Ok(replies)
                },
            )
            .await
            .unwrap();
        assert_eq!(replies, expected);
        harness.stop().await;

        // Slow client, fast server.
        let harness = Harness::start(Duration::ZERO);
        let call = harness.client.chat(CallOptions::default()).await.unwrap();
        let ((), replies) = call
            .drive(
                async |tx: &mut SessionSender<ChatMessage>| {
                    for message in messages {
                        tx.send_message(ChatMessage::new(message)).await?;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Ok(())
                },
                async |rx: &mut SessionReceiver<ChatMessage>| {
                    let mut replies = Vec::new();
                    while let Some(reply) = rx.receive_message().await? {
                        replies.push(reply.message);
                    }
                    Ok(replies)
                },
            )
            .await
            .unwrap();
        assert_eq!(replies, expected);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_chat_split_across_tasks() {
        let harness = Harness::start(Duration::ZERO);

        let call = harness.client.chat(CallOptions::default()).await.unwrap();
        let (mut tx, mut rx) = call.split();

        let sending = tokio::spawn(async move {
            for message in ["one", "two"] {
                tx.send_message(ChatMessage::new(message)).await.unwrap();
            }
            tx.close_send().await.unwrap();
            tx
        });

        let mut replies = Vec::new();
        while let Some(reply) = rx.receive_message().await.unwrap() {
            replies.push(reply.message);
        }
        assert_eq!(replies, ["Server received: one", "Server received: two"]);

        let tx = sending.await.unwrap();
        BidiCall::reunite(tx, rx).unwrap().finish().await.unwrap();

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_cancel_unblocks_pending_message() {
        let harness = Harness::start(Duration::from_secs(5));

        let cancel = CancellationToken::new();
        let options = CallOptions::builder().cancellation(cancel.clone()).build();
        let mut call = harness
            .client
            .get_messages(HelloRequest::default(), options)
            .await
            .unwrap();

        assert_eq!(call.message().await.unwrap().unwrap().message, "Hello");

        let (next, ()) = tokio::join!(call.message(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        assert!(matches!(next, Err(RpcError::Cancelled(_))));
        assert_eq!(call.status().map(Status::code), Some(Code::Cancelled));

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_calls() {
        let harness = Harness::start(Duration::from_secs(5));

        let mut call = harness
            .client
            .get_messages(HelloRequest::default(), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(call.message().await.unwrap().unwrap().message, "Hello");

        harness.shutdown.cancel();

        let err = call.message().await.unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);

        harness.server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_server_gone_is_transport_error() {
        let (connector, mut incoming) = memory::channel(8);
        let client =
            ExampleServiceClient::new(RpcClient::new(connector, RpcClientConfig::default()));

        // Accept the connection and drop it without answering.
        let server = tokio::spawn(async move {
            let transport = incoming.next().await.unwrap().unwrap();
            drop(transport);
        });

        let mut call = client
            .send_messages(CallOptions::default())
            .await
            .unwrap();
        server.await.unwrap();

        let sent = call.send(HelloRequest::with_message("Hello")).await;
        let result = match sent {
            Ok(()) => call.close_and_receive().await.map(|_| ()),
            Err(e) => Err(e),
        };
        assert!(matches!(result, Err(RpcError::Transport(_))));
    }
}
