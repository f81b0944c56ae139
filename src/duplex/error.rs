use thiserror::Error;

use crate::duplex::status::{Code, Status};

/// Errors that can occur while driving a call.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Failed to parse a method path.
    #[error("failed to parse method path: {0}")]
    PathParse(String),

    /// A handler is already registered for this method path.
    #[error("a handler is already registered for '{0}'")]
    DuplicateMethod(String),

    /// A message was sent after the outbound direction of the stream closed.
    #[error("stream already closed for sending")]
    StreamAlreadyClosed,

    /// A message was sent on a channel that was already closed.
    #[error("message channel closed")]
    ChannelClosed,

    /// An interaction pattern or metadata ordering contract was violated.
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// Metadata key or value that cannot be carried with a call.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// The underlying connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call was cancelled.
    #[error("call cancelled: {0}")]
    Cancelled(String),

    /// No handler registered for the method.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// The handler or the library failed internally.
    #[error("internal error: {0}")]
    Internal(String),

    /// Failed to encode a protobuf message.
    #[error("protobuf encode error")]
    Encode(#[from] prost::EncodeError),

    /// Failed to decode a protobuf message.
    #[error("protobuf decode error")]
    Decode(#[from] prost::DecodeError),

    /// Timeout while establishing a connection.
    #[error("timeout while connecting")]
    Timeout(#[from] tokio::time::error::Elapsed),
}

impl RpcError {
    /// The status code a call failing with this error completes with.
    pub fn code(&self) -> Code {
        match self {
            RpcError::PathParse(_)
            | RpcError::StreamAlreadyClosed
            | RpcError::ChannelClosed
            | RpcError::InvalidUsage(_)
            | RpcError::InvalidMetadata(_)
            | RpcError::Decode(_) => Code::InvalidUsage,
            RpcError::Transport(_) | RpcError::Timeout(_) => Code::TransportError,
            RpcError::Cancelled(_) => Code::Cancelled,
            RpcError::Unimplemented(_) => Code::Unimplemented,
            RpcError::DuplicateMethod(_) | RpcError::Internal(_) | RpcError::Encode(_) => {
                Code::InternalError
            }
        }
    }

    /// The human-readable part of the error, without the category prefix.
    pub fn detail(&self) -> String {
        match self {
            RpcError::InvalidUsage(detail)
            | RpcError::Transport(detail)
            | RpcError::Cancelled(detail)
            | RpcError::Unimplemented(detail)
            | RpcError::Internal(detail) => detail.clone(),
            other => other.to_string(),
        }
    }

    pub fn invalid_usage(detail: impl Into<String>) -> Self {
        RpcError::InvalidUsage(detail.into())
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        RpcError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Transport(err.to_string())
    }
}

impl From<Status> for RpcError {
    fn from(status: Status) -> Self {
        let detail = status.detail().unwrap_or(status.code().as_str()).to_string();
        match status.code() {
            // A success status carries no error; reaching here means the stream was already done.
            Code::Success => RpcError::StreamAlreadyClosed,
            Code::Cancelled => RpcError::Cancelled(detail),
            Code::Unimplemented => RpcError::Unimplemented(detail),
            Code::InvalidUsage => RpcError::InvalidUsage(detail),
            Code::TransportError => RpcError::Transport(detail),
            Code::InternalError => RpcError::Internal(detail),
        }
    }
}
