use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::duplex::call::CallInfo;
use crate::duplex::pattern::Pattern;
use crate::duplex::status::Status;
use crate::duplex::transport::Transport;

/// A registered handler with its message types erased, so handlers of every pattern and message
/// type can share one registry.
///
/// `serve` owns the call from the moment its header was read until its status is recorded, and
/// resolves with that status.
pub(crate) trait ErasedHandler: Send + Sync + 'static {
    fn pattern(&self) -> Pattern;

    fn serve(
        self: Arc<Self>,
        info: CallInfo,
        transport: Transport,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Status>;
}
