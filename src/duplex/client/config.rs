use std::time::Duration;

use bon::Builder;
use tokio_util::sync::CancellationToken;

use crate::duplex::metadata::Metadata;
use crate::duplex::transport::DEFAULT_MAX_FRAME_LENGTH;

/// Configuration for the RPC client.
#[derive(Debug, Clone, Builder)]
pub struct RpcClientConfig {
    /// Timeout for opening the transport of a call.
    #[builder(default = Duration::from_secs(5))]
    pub connect_timeout: Duration,

    /// Largest encoded frame accepted on TCP connections.
    #[builder(default = DEFAULT_MAX_FRAME_LENGTH)]
    pub max_frame_length: usize,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Per-call options: the metadata sent with the call and an optional cancellation signal.
#[derive(Debug, Clone, Default, Builder)]
pub struct CallOptions {
    #[builder(default)]
    pub metadata: Metadata,

    /// Cancelling this token terminates the call with `Cancelled`.
    pub cancellation: Option<CancellationToken>,
}
