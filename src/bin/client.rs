use std::time::Duration;

use anyhow::{Result, bail};
use duplex_rpc::DEFAULT_SERVER_ADDR;
use duplex_rpc::duplex::{
    CallOptions, Metadata, RpcClientConfig, SessionReceiver, SessionSender,
};
use duplex_rpc::example::{Actions, ChatMessage, ExampleServiceClient, HelloRequest};
use tracing::info;

const CLIENT_STREAM_MESSAGES: [&str; 4] = ["Hello", "World", "gRPC", "Client Streaming"];
const CHAT_MESSAGES: [&str; 4] = ["Hello", "World", "gRPC", "Bidirectional Streaming"];
const CHAT_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let addr = std::env::var("SERVER_ADDR").unwrap_or_else(|_| DEFAULT_SERVER_ADDR.to_string());
    let mode = std::env::args().nth(1).unwrap_or_else(|| "unary".to_string());

    let client = ExampleServiceClient::tcp(addr.clone(), RpcClientConfig::default());
    info!(addr = %addr, mode = %mode, "Client starting");

    match mode.as_str() {
        "unary" => say_hello(&client).await?,
        "client-stream" => send_messages(&client).await?,
        "server-stream" => get_messages(&client).await?,
        "bidi" => chat(&client).await?,
        other => {
            bail!("unknown mode '{other}', expected unary, client-stream, server-stream or bidi")
        }
    }

    Ok(())
}

async fn say_hello(client: &ExampleServiceClient) -> Result<()> {
    let metadata = Metadata::from_pairs([("token", "dververbt3"), ("organization", "xyz")])?;
    let options = CallOptions::builder().metadata(metadata).build();

    let request = HelloRequest::new(
        "amizhthan",
        Actions::Create,
        r#"{"Key1":"value1","Key2":"value2"}"#,
    );
    let reply = client.say_hello(request, options).await?;
    println!("Greeting: {}", reply.message);
    Ok(())
}

async fn send_messages(client: &ExampleServiceClient) -> Result<()> {
    let mut call = client.send_messages(CallOptions::default()).await?;
    for message in CLIENT_STREAM_MESSAGES {
        call.send(HelloRequest::with_message(message)).await?;
        println!("Sent: {message}");
    }

    let reply = call.close_and_receive().await?;
    println!("Response: {}", reply.message);
    Ok(())
}

async fn get_messages(client: &ExampleServiceClient) -> Result<()> {
    let request = HelloRequest {
        name: "Client".to_string(),
        ..Default::default()
    };
    let mut call = client.get_messages(request, CallOptions::default()).await?;

    while let Some(reply) = call.message().await? {
        println!("Received: {}", reply.message);
    }
    Ok(())
}

async fn chat(client: &ExampleServiceClient) -> Result<()> {
    let call = client.chat(CallOptions::default()).await?;

    call.drive(
        async |tx: &mut SessionSender<ChatMessage>| {
            for message in CHAT_MESSAGES {
                tx.send_message(ChatMessage::new(message)).await?;
                println!("Sent: {message}");
                tokio::time::sleep(CHAT_INTERVAL).await;
            }
            Ok(())
        },
        async |rx: &mut SessionReceiver<ChatMessage>| {
            while let Some(reply) = rx.receive_message().await? {
                println!("Received: {}", reply.message);
            }
            Ok(())
        },
    )
    .await?;
    Ok(())
}
