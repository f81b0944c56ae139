use bon::Builder;

use crate::duplex::transport::DEFAULT_MAX_FRAME_LENGTH;

/// Configuration for the RPC router.
#[derive(Debug, Clone, Builder)]
pub struct RpcRouterConfig {
    /// Largest encoded frame accepted on TCP connections.
    #[builder(default = DEFAULT_MAX_FRAME_LENGTH)]
    pub max_frame_length: usize,

    /// Upper bound on calls served at once. Further connections wait for a free slot.
    /// Unlimited if not specified.
    pub max_concurrent_calls: Option<usize>,
}

impl Default for RpcRouterConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
