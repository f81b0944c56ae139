//! Server-side types.
//!
//! The [`RpcRouter`] holds one handler per method path and serves every incoming transport as
//! one call on its own task.
//!
//! # Example
//!
//! ```ignore
//! let mut router = RpcRouter::new(RpcRouterConfig::default());
//!
//! router.register_server_streaming(
//!     "/example.ExampleService/GetMessages",
//!     |request: Request<HelloRequest>| async move {
//!         let name = request.into_inner().name;
//!         Ok(futures::stream::iter([Ok(HelloReply { message: format!("Hello {name}") })]))
//!     },
//! )?;
//!
//! let listener = TcpListener::bind("0.0.0.0:50052").await?;
//! router.serve_tcp(listener, shutdown).await?;
//! ```

mod config;
pub(crate) mod handler;
mod router;

pub use config::RpcRouterConfig;
pub use router::RpcRouter;
