//! Client-side types.
//!
//! This module contains the `RpcClient` and its configuration. The client opens one transport
//! per call and hands back the call object for the method's interaction pattern.
//!
//! # Example
//!
//! ```ignore
//! let client = RpcClient::tcp("127.0.0.1:50052", RpcClientConfig::default());
//!
//! let mut call = client
//!     .client_streaming::<HelloRequest, HelloReply>(
//!         "/example.ExampleService/SendMessages",
//!         CallOptions::default(),
//!     )
//!     .await?;
//!
//! call.send(HelloRequest { message: "Hello".into(), ..Default::default() }).await?;
//! let reply = call.close_and_receive().await?;
//! ```

mod config;
mod rpc_client;

pub use config::{CallOptions, RpcClientConfig};
pub use rpc_client::RpcClient;
