use std::fmt;

use crate::duplex::error::RpcError;

/// Terminal outcome code of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Code {
    Success = 0,
    Cancelled = 1,
    Unimplemented = 2,
    InvalidUsage = 3,
    TransportError = 4,
    InternalError = 5,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Success => "success",
            Code::Cancelled => "cancelled",
            Code::Unimplemented => "unimplemented",
            Code::InvalidUsage => "invalid usage",
            Code::TransportError => "transport error",
            Code::InternalError => "internal error",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The status every completed call carries: a [`Code`] plus an optional human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: Code,
    detail: Option<String>,
}

impl Status {
    pub fn new(code: Code, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: Some(detail.into()),
        }
    }

    pub fn from_code(code: Code) -> Self {
        Self { code, detail: None }
    }

    pub fn ok() -> Self {
        Self::from_code(Code::Success)
    }

    pub fn cancelled(detail: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, detail)
    }

    pub fn unimplemented(detail: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, detail)
    }

    pub fn invalid_usage(detail: impl Into<String>) -> Self {
        Self::new(Code::InvalidUsage, detail)
    }

    pub fn transport_error(detail: impl Into<String>) -> Self {
        Self::new(Code::TransportError, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(Code::InternalError, detail)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Success
    }

    /// Turn a non-success status into the matching [`RpcError`].
    pub fn into_result(self) -> Result<(), RpcError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(RpcError::from(self))
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.code, detail),
            None => write!(f, "{}", self.code),
        }
    }
}

impl From<&RpcError> for Status {
    fn from(err: &RpcError) -> Self {
        Status::new(err.code(), err.detail())
    }
}

impl From<RpcError> for Status {
    fn from(err: RpcError) -> Self {
        Status::from(&err)
    }
}

impl From<Status> for tonic::Status {
    fn from(status: Status) -> Self {
        let code = match status.code {
            Code::Success => tonic::Code::Ok,
            Code::Cancelled => tonic::Code::Cancelled,
            Code::Unimplemented => tonic::Code::Unimplemented,
            Code::InvalidUsage => tonic::Code::InvalidArgument,
            Code::TransportError => tonic::Code::Unavailable,
            Code::InternalError => tonic::Code::Internal,
        };
        tonic::Status::new(code, status.detail.unwrap_or_default())
    }
}

impl From<tonic::Status> for Status {
    fn from(status: tonic::Status) -> Self {
        let code = match status.code() {
            tonic::Code::Ok => Code::Success,
            tonic::Code::Cancelled | tonic::Code::DeadlineExceeded => Code::Cancelled,
            tonic::Code::Unimplemented => Code::Unimplemented,
            tonic::Code::InvalidArgument
            | tonic::Code::FailedPrecondition
            | tonic::Code::OutOfRange => Code::InvalidUsage,
            tonic::Code::Unavailable => Code::TransportError,
            _ => Code::InternalError,
        };
        if status.message().is_empty() {
            Status::from_code(code)
        } else {
            Status::new(code, status.message())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result() {
        assert!(Status::ok().into_result().is_ok());

        let err = Status::unimplemented("method Foo not implemented")
            .into_result()
            .unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
    }

    #[test]
    fn test_error_round_trips_code() {
        let status = Status::from(RpcError::StreamAlreadyClosed);
        assert_eq!(status.code(), Code::InvalidUsage);

        let status = Status::from(RpcError::Transport("reset by peer".to_string()));
        assert_eq!(status.code(), Code::TransportError);
        assert_eq!(RpcError::from(status).code(), Code::TransportError);
    }

    #[test]
    fn test_tonic_interop() {
        let status: tonic::Status = Status::invalid_usage("bad payload").into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert_eq!(status.message(), "bad payload");

        let back = Status::from(status);
        assert_eq!(back.code(), Code::InvalidUsage);
        assert_eq!(back.detail(), Some("bad payload"));

        let ok = Status::from(tonic::Status::new(tonic::Code::Ok, ""));
        assert!(ok.is_ok());
        assert!(ok.detail().is_none());
    }
}
