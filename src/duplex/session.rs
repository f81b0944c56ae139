//! The duplex stream session bound to one call.
//!
//! A [`StreamSession`] pairs an outbound [`MessageSink`] with an inbound [`MessageSource`] and
//! tracks each direction with a [`DirectionMachine`]. The two halves can be split onto
//! independent tasks; they share only the call's terminal status and an abort signal, which is
//! how a transport failure or cancellation seen by one half wakes the other.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::Stream;
use prost::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::duplex::call::{CallId, CallInfo};
use crate::duplex::channel::{Inbound, MessageSink, MessageSource};
use crate::duplex::error::RpcError;
use crate::duplex::frame::{Frame, Header};
use crate::duplex::metadata::Metadata;
use crate::duplex::status::{Code, Status};
use crate::duplex::transport::Transport;
use crate::state_machine::StateMachine;
use crate::state_machine::direction::{
    DirectionInput, DirectionMachine, DirectionOutput, DirectionState,
};

/// Which end of the call a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Snapshot of both directions of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub outbound: DirectionState,
    pub inbound: DirectionState,
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        self.outbound == DirectionState::Closed && self.inbound == DirectionState::Closed
    }
}

/// State both halves of a session can see.
struct Shared {
    info: CallInfo,
    role: Role,
    /// Fired once the call is terminal, whatever the cause. A child of the caller's token.
    abort: CancellationToken,
    /// Fired once the inbound direction is exhausted or its half is dropped.
    inbound_done: CancellationToken,
    terminal: OnceLock<Status>,
    /// The peer already delivered (or reset with) its trailer.
    peer_finished: AtomicBool,
}

impl Shared {
    fn is_terminated(&self) -> bool {
        self.terminal.get().is_some() || self.abort.is_cancelled()
    }

    /// Record `status` unless a status is already recorded, wake every suspended operation and
    /// return the status that won.
    fn record(&self, status: Status) -> Status {
        let mut won = false;
        let recorded = self
            .terminal
            .get_or_init(|| {
                won = true;
                status
            })
            .clone();

        if won {
            debug!(
                call_id = %self.info.call_id(),
                method = %self.info.method(),
                code = ?recorded.code(),
                "Call reached terminal status"
            );
        }

        self.abort.cancel();
        self.inbound_done.cancel();
        recorded
    }

    /// The terminal status after the abort signal fired.
    ///
    /// The caller's cancellation token fires without recording anything, so that case is
    /// recorded here as `Cancelled`.
    fn aborted(&self) -> Status {
        match self.terminal.get() {
            Some(status) => status.clone(),
            None => self.record(Status::cancelled("call cancelled")),
        }
    }

    /// Terminate the call for errors that break it; local misuse leaves the call running.
    fn escalate(&self, err: RpcError) -> RpcError {
        match err {
            RpcError::ChannelClosed | RpcError::StreamAlreadyClosed | RpcError::Encode(_) => err,
            err => {
                let recorded = self.record(Status::from(&err));
                if recorded.code() == err.code() {
                    err
                } else {
                    RpcError::from(recorded)
                }
            }
        }
    }
}

/// How long a call that ended in failure waits for the transport to accept its trailer.
pub(crate) const FAILED_CALL_FLUSH_TIMEOUT: Duration = Duration::from_millis(250);

/// Run `op` unless the call terminates first.
async fn guarded<R>(
    shared: &Shared,
    op: impl Future<Output = Result<R, RpcError>>,
) -> Result<R, RpcError> {
    let result = tokio::select! {
        biased;
        _ = shared.abort.cancelled() => None,
        result = op => Some(result),
    };

    match result {
        Some(result) => result.map_err(|e| shared.escalate(e)),
        None => Err(RpcError::from(shared.aborted())),
    }
}

/// The sending half of a session.
pub struct SessionSender<Out> {
    channel: MessageSink<Out>,
    machine: DirectionMachine,
    shared: Arc<Shared>,
}

impl<Out> SessionSender<Out> {
    pub fn call_info(&self) -> &CallInfo {
        &self.shared.info
    }

    pub fn state(&self) -> DirectionState {
        if self.shared.is_terminated() {
            DirectionState::Closed
        } else {
            self.machine.state()
        }
    }

    /// Cancel the whole call, waking the receiving half if it is suspended.
    pub fn cancel(&self) {
        self.shared.record(Status::cancelled("cancelled by caller"));
    }

    /// Half-close the outbound direction. The peer observes this as end-of-stream.
    ///
    /// Closing twice, or closing a call that already terminated, is a no-op.
    pub async fn close_send(&mut self) -> Result<(), RpcError> {
        if self.shared.is_terminated() {
            self.terminate();
            return Ok(());
        }

        self.machine.process_input(DirectionInput::EndOfStream);
        while let Some(output) = self.machine.poll_output() {
            if output == DirectionOutput::HalfClosed {
                debug!(call_id = %self.shared.info.call_id(), "Outbound direction half-closed");
                guarded(&self.shared, self.channel.close()).await?;
            }
        }
        Ok(())
    }

    fn terminate(&mut self) {
        self.machine.process_input(DirectionInput::Terminate);
        while self.machine.poll_output().is_some() {}
    }

    /// Terminate the call with `status` unless it already terminated.
    pub(crate) fn abort(&self, status: Status) {
        self.shared.record(status);
    }

    /// Resolve with the terminal status once the call terminates.
    ///
    /// The future owns its handle on the call, so it does not borrow the sender.
    pub(crate) fn terminated(&self) -> impl Future<Output = Status> + Send + use<Out> {
        let shared = Arc::clone(&self.shared);
        async move {
            shared.abort.cancelled().await;
            shared.aborted()
        }
    }

    /// Wait until the inbound direction is exhausted or released, or the call terminates.
    pub(crate) fn inbound_closed(&self) -> impl Future<Output = ()> + Send + use<Out> {
        let shared = Arc::clone(&self.shared);
        async move {
            tokio::select! {
                _ = shared.inbound_done.cancelled() => {}
                _ = shared.abort.cancelled() => {}
            }
        }
    }

    /// Record the terminal status and tell the peer about it.
    ///
    /// Returns the status that was recorded, which is an earlier one if the call had already
    /// terminated. No trailer is written when the peer already sent one or the transport failed.
    ///
    /// A failed call gives the peer [`FAILED_CALL_FLUSH_TIMEOUT`] to take the trailer; a peer
    /// that stopped reading does not keep the call alive.
    pub(crate) async fn finish(mut self, status: Status) -> Status {
        let recorded = self.shared.record(status);
        self.terminate();

        let call_id = self.shared.info.call_id().clone();
        let send_trailer = !self.shared.peer_finished.load(Ordering::Acquire)
            && recorded.code() != Code::TransportError;

        let release = async {
            if send_trailer {
                if let Err(e) = self.channel.send_frame(Frame::trailer(&recorded)).await {
                    debug!(
                        call_id = %call_id,
                        error = %e,
                        "Peer gone before trailer could be delivered"
                    );
                }
            }
            if let Err(e) = self.channel.shutdown().await {
                debug!(call_id = %call_id, error = %e, "Transport shutdown failed");
            }
        };

        if recorded.is_ok() {
            release.await;
        } else if tokio::time::timeout(FAILED_CALL_FLUSH_TIMEOUT, release)
            .await
            .is_err()
        {
            debug!(
                call_id = %call_id,
                code = ?recorded.code(),
                "Peer not reading, trailer dropped"
            );
        }
        recorded
    }
}

impl<Out: Message> SessionSender<Out> {
    /// Send one message. Only valid while the outbound direction is open.
    pub async fn send_message(&mut self, message: Out) -> Result<(), RpcError> {
        if self.shared.is_terminated() {
            self.terminate();
            return Err(RpcError::from(self.shared.aborted()));
        }
        if !self.machine.is_open() {
            return Err(RpcError::StreamAlreadyClosed);
        }
        guarded(&self.shared, self.channel.send(message)).await
    }
}

/// The receiving half of a session.
///
/// Dropping it tells the session that the inbound direction will not be read any further.
pub struct SessionReceiver<In> {
    channel: MessageSource<In>,
    machine: DirectionMachine,
    shared: Arc<Shared>,
}

/// The inbound half as handed to server handlers.
pub type Streaming<In> = SessionReceiver<In>;

impl<In> SessionReceiver<In> {
    pub fn call_info(&self) -> &CallInfo {
        &self.shared.info
    }

    pub fn metadata(&self) -> &Metadata {
        self.shared.info.metadata()
    }

    pub fn state(&self) -> DirectionState {
        if self.shared.is_terminated() {
            DirectionState::Closed
        } else {
            self.machine.state()
        }
    }

    /// Whether the end of the inbound direction has been observed.
    pub fn is_exhausted(&self) -> bool {
        self.channel.is_ended()
    }

    /// Cancel the whole call, waking the sending half if it is suspended.
    pub fn cancel(&self) {
        self.shared.record(Status::cancelled("cancelled by caller"));
    }

    /// Terminate the call with `status` unless it already terminated.
    pub(crate) fn abort(&self, status: Status) {
        self.shared.record(status);
    }

    fn exhaust(&mut self) {
        self.channel.mark_ended();
        self.machine.process_input(DirectionInput::EndOfStream);
        while let Some(output) = self.machine.poll_output() {
            if output == DirectionOutput::HalfClosed {
                debug!(call_id = %self.shared.info.call_id(), "Inbound direction exhausted");
            }
        }
        self.shared.inbound_done.cancel();
    }

    fn terminate(&mut self) {
        self.machine.process_input(DirectionInput::Terminate);
        while self.machine.poll_output().is_some() {}
    }

    fn on_aborted<T>(&mut self) -> Result<Option<T>, RpcError> {
        self.terminate();
        let status = self.shared.aborted();
        if status.is_ok() {
            Ok(None)
        } else {
            Err(RpcError::from(status))
        }
    }

    fn on_peer_trailer(&mut self, status: Status) -> Status {
        self.exhaust();
        self.shared.peer_finished.store(true, Ordering::Release);
        let status = match self.shared.role {
            Role::Client => status,
            // A trailer from the client is a reset, never a success.
            Role::Server if status.is_ok() => Status::cancelled("call reset by client"),
            Role::Server => status,
        };
        self.shared.record(status)
    }

    fn protocol_violation(&mut self, detail: &str) -> RpcError {
        warn!(call_id = %self.shared.info.call_id(), detail, "Protocol violation");
        self.terminate();
        self.shared.escalate(RpcError::invalid_usage(detail))
    }
}

impl<In: Message + Default> SessionReceiver<In> {
    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` once the peer has closed its direction and on every call after that,
    /// without blocking. Fails with the call's status if it is cancelled or the transport breaks
    /// while waiting.
    pub async fn receive_message(&mut self) -> Result<Option<In>, RpcError> {
        if self.channel.is_ended() {
            return Ok(None);
        }
        if self.shared.is_terminated() {
            return self.on_aborted();
        }

        let next = tokio::select! {
            biased;
            _ = self.shared.abort.cancelled() => None,
            inbound = self.channel.next_inbound() => Some(inbound),
        };
        let Some(inbound) = next else {
            return self.on_aborted();
        };

        match inbound {
            Ok(Inbound::Message(message)) => Ok(Some(message)),
            Ok(Inbound::End) => {
                self.exhaust();
                Ok(None)
            }
            Ok(Inbound::Trailer(status)) => {
                let recorded = self.on_peer_trailer(status);
                if recorded.is_ok() {
                    Ok(None)
                } else {
                    Err(RpcError::from(recorded))
                }
            }
            Ok(Inbound::Header) => {
                Err(self.protocol_violation("metadata received after the call started"))
            }
            Err(e) => {
                self.terminate();
                Err(self.shared.escalate(e))
            }
        }
    }

    /// Read the rest of the inbound direction up to the peer's trailer and return the status it
    /// carries. Any message still in flight at this point is a protocol violation.
    pub(crate) async fn trailer(&mut self) -> Result<Status, RpcError> {
        loop {
            if let Some(status) = self.shared.terminal.get() {
                return Ok(status.clone());
            }

            let next = tokio::select! {
                biased;
                _ = self.shared.abort.cancelled() => None,
                inbound = self.channel.next_inbound() => Some(inbound),
            };
            let Some(inbound) = next else {
                self.terminate();
                return Ok(self.shared.aborted());
            };

            match inbound {
                Ok(Inbound::Trailer(status)) => return Ok(self.on_peer_trailer(status)),
                Ok(Inbound::End) if !self.channel.is_ended() => self.exhaust(),
                Ok(Inbound::End) => return Err(self.protocol_violation("duplicate end of stream")),
                Ok(Inbound::Message(_)) => {
                    let detail = "message arrived after the caller finished";
                    return Err(self.protocol_violation(detail));
                }
                Ok(Inbound::Header) => {
                    return Err(self.protocol_violation("metadata received after the call started"));
                }
                Err(e) => {
                    self.terminate();
                    return Err(self.shared.escalate(e));
                }
            }
        }
    }

    /// Wait for the peer to abandon the call after its direction ended, either with a reset
    /// trailer or by dropping the connection. Resolves with the recorded status.
    pub(crate) async fn reset(&mut self) -> Status {
        let next = tokio::select! {
            biased;
            _ = self.shared.abort.cancelled() => None,
            inbound = self.channel.next_inbound() => Some(inbound),
        };

        match next {
            None => self.shared.aborted(),
            Some(Ok(Inbound::Trailer(status))) => self.on_peer_trailer(status),
            Some(Ok(_)) => {
                let err = self.protocol_violation("frame received after end of stream");
                Status::from(&err)
            }
            Some(Err(e)) => {
                self.terminate();
                Status::from(&self.shared.escalate(e))
            }
        }
    }

    /// Turn the receiver into a stream of messages that ends at end-of-stream.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<In, RpcError>> + Send
    where
        In: Send + 'static,
    {
        async_stream::stream! {
            loop {
                match self.receive_message().await {
                    Ok(Some(message)) => yield Ok(message),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        }
    }
}

impl<In> Drop for SessionReceiver<In> {
    fn drop(&mut self) {
        self.shared.inbound_done.cancel();
    }
}

/// One logical duplex stream bound to one call.
///
/// Each direction follows `Open → HalfClosed → Closed` independently. Every call must end with
/// exactly one [`finish`](StreamSession::finish), which consumes the session.
pub struct StreamSession<Out, In> {
    sender: SessionSender<Out>,
    receiver: SessionReceiver<In>,
    _marker: PhantomData<fn(Out) -> In>,
}

impl<Out, In> StreamSession<Out, In> {
    fn new(transport: Transport, info: CallInfo, role: Role, cancel: &CancellationToken) -> Self {
        let (sink, stream) = transport.into_parts();
        let shared = Arc::new(Shared {
            info,
            role,
            abort: cancel.child_token(),
            inbound_done: CancellationToken::new(),
            terminal: OnceLock::new(),
            peer_finished: AtomicBool::new(false),
        });

        Self {
            sender: SessionSender {
                channel: MessageSink::new(sink),
                machine: DirectionMachine::new(),
                shared: Arc::clone(&shared),
            },
            receiver: SessionReceiver {
                channel: MessageSource::new(stream),
                machine: DirectionMachine::new(),
                shared,
            },
            _marker: PhantomData,
        }
    }

    /// Open the client end of a call, sending the header with the call's metadata.
    pub(crate) async fn open(
        transport: Transport,
        info: CallInfo,
        cancel: &CancellationToken,
    ) -> Result<Self, RpcError> {
        let header = Header {
            call_id: info.call_id().to_string(),
            method: info.method().full_path(),
            metadata: info.metadata().to_entries(),
        };
        let mut session = Self::new(transport, info, Role::Client, cancel);

        let sender = &mut session.sender;
        guarded(&sender.shared, sender.channel.send_frame(Frame::header(header))).await?;
        Ok(session)
    }

    /// Accept the server end of a call whose header has already been read.
    pub(crate) fn accept(transport: Transport, info: CallInfo, cancel: &CancellationToken) -> Self {
        Self::new(transport, info, Role::Server, cancel)
    }

    pub fn call_info(&self) -> &CallInfo {
        &self.sender.shared.info
    }

    pub fn call_id(&self) -> &CallId {
        self.sender.shared.info.call_id()
    }

    pub fn metadata(&self) -> &Metadata {
        self.sender.shared.info.metadata()
    }

    pub fn role(&self) -> Role {
        self.sender.shared.role
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            outbound: self.sender.state(),
            inbound: self.receiver.state(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// The terminal status, once one has been recorded.
    pub fn terminal_status(&self) -> Option<&Status> {
        self.sender.shared.terminal.get()
    }

    /// Cancel the call, waking any suspended send or receive with `Cancelled`.
    pub fn cancel(&self) {
        self.sender.cancel();
    }

    pub async fn close_send(&mut self) -> Result<(), RpcError> {
        self.sender.close_send().await
    }

    /// Split into halves that can be driven from independent tasks.
    pub fn split(self) -> (SessionSender<Out>, SessionReceiver<In>) {
        (self.sender, self.receiver)
    }

    /// Reassemble halves produced by [`split`](StreamSession::split).
    pub fn reunite(
        sender: SessionSender<Out>,
        receiver: SessionReceiver<In>,
    ) -> Result<Self, RpcError> {
        if !Arc::ptr_eq(&sender.shared, &receiver.shared) {
            return Err(RpcError::invalid_usage(
                "cannot reunite halves of different calls",
            ));
        }
        Ok(Self {
            sender,
            receiver,
            _marker: PhantomData,
        })
    }

    pub(crate) fn halves_mut(&mut self) -> (&mut SessionSender<Out>, &mut SessionReceiver<In>) {
        (&mut self.sender, &mut self.receiver)
    }
}

impl<Out: Message, In: Message + Default> StreamSession<Out, In> {
    pub async fn send_message(&mut self, message: Out) -> Result<(), RpcError> {
        self.sender.send_message(message).await
    }

    pub async fn receive_message(&mut self) -> Result<Option<In>, RpcError> {
        self.receiver.receive_message().await
    }

    /// Record the terminal status of the call and release the transport.
    ///
    /// On the server this delivers `status` to the client. On the client a success status
    /// half-closes and waits for the server's trailer, whose status is returned; a failure status
    /// resets the call. In both cases a status recorded earlier (cancellation, transport failure)
    /// wins over `status`.
    pub async fn finish(self, status: Status) -> Result<Status, RpcError> {
        let Self {
            mut sender,
            mut receiver,
            ..
        } = self;

        let wait_for_peer = sender.shared.role == Role::Client
            && status.is_ok()
            && sender.shared.terminal.get().is_none();

        if !wait_for_peer {
            receiver.terminate();
            return Ok(sender.finish(status).await);
        }

        let outcome = async {
            sender.close_send().await?;
            receiver.trailer().await
        }
        .await;
        receiver.terminate();

        match outcome {
            Ok(peer_status) => Ok(sender.finish(peer_status).await),
            Err(e) => {
                sender.finish(Status::from(&e)).await;
                Err(e)
            }
        }
    }

    /// Finish the call with the status matching `err` and hand `err` back for propagation.
    pub async fn finish_with_error(self, err: RpcError) -> RpcError {
        let recorded = self.finish(Status::from(&err)).await;
        if let Ok(status) = &recorded {
            if status.code() != err.code() {
                debug!(code = ?status.code(), error = %err, "Call had already terminated");
            }
        }
        err
    }

    /// Receive exactly one message followed by end-of-stream.
    pub(crate) async fn receive_single(
        &mut self,
        pattern: impl std::fmt::Display,
    ) -> Result<In, RpcError> {
        let message = self.receive_message().await?.ok_or_else(|| {
            RpcError::invalid_usage(format!("{pattern} call expected one message, got none"))
        })?;

        match self.receive_message().await? {
            None => Ok(message),
            Some(_) => Err(RpcError::invalid_usage(format!(
                "{pattern} call expected one message, got more than one"
            ))),
        }
    }
}
