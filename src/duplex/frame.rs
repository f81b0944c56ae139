//! Frames exchanged over a transport.
//!
//! A client opens a call with a [`Header`], then both sides exchange `Data` frames. `End` closes
//! the sender's direction. The server completes the call with a [`Trailer`], which also ends its
//! direction; a trailer sent by the client resets the call.

use crate::duplex::status::{Code, Status};

#[derive(Clone, PartialEq, prost::Message)]
pub struct Frame {
    #[prost(oneof = "frame::Kind", tags = "1, 2, 3, 4")]
    pub kind: Option<frame::Kind>,
}

pub mod frame {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        Header(super::Header),
        #[prost(bytes = "vec", tag = "2")]
        Data(Vec<u8>),
        #[prost(message, tag = "3")]
        End(super::End),
        #[prost(message, tag = "4")]
        Trailer(super::Trailer),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Header {
    #[prost(string, tag = "1")]
    pub call_id: String,
    #[prost(string, tag = "2")]
    pub method: String,
    #[prost(message, repeated, tag = "3")]
    pub metadata: Vec<MetadataEntry>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MetadataEntry {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct End {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Trailer {
    #[prost(enumeration = "Code", tag = "1")]
    pub code: i32,
    #[prost(string, optional, tag = "2")]
    pub detail: Option<String>,
}

impl Frame {
    pub fn header(header: Header) -> Self {
        Self {
            kind: Some(frame::Kind::Header(header)),
        }
    }

    pub fn data(payload: Vec<u8>) -> Self {
        Self {
            kind: Some(frame::Kind::Data(payload)),
        }
    }

    pub fn end() -> Self {
        Self {
            kind: Some(frame::Kind::End(End {})),
        }
    }

    pub fn trailer(status: &Status) -> Self {
        Self {
            kind: Some(frame::Kind::Trailer(Trailer {
                code: status.code() as i32,
                detail: status.detail().map(str::to_string),
            })),
        }
    }

    /// Short name of the frame kind, for logging.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            Some(frame::Kind::Header(_)) => "header",
            Some(frame::Kind::Data(_)) => "data",
            Some(frame::Kind::End(_)) => "end",
            Some(frame::Kind::Trailer(_)) => "trailer",
            None => "empty",
        }
    }
}

impl Trailer {
    pub fn into_status(self) -> Status {
        // Codes this build does not know about are treated as internal failures.
        let code = Code::try_from(self.code).unwrap_or(Code::InternalError);
        match self.detail {
            Some(detail) => Status::new(code, detail),
            None => Status::from_code(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;

    #[test]
    fn test_trailer_carries_status() {
        let frame = Frame::trailer(&Status::unimplemented("method Foo not implemented"));
        let decoded = Frame::decode(frame.encode_to_vec().as_slice()).unwrap();

        let Some(frame::Kind::Trailer(trailer)) = decoded.kind else {
            panic!("expected trailer, got {}", decoded.kind_name());
        };
        let status = trailer.into_status();
        assert_eq!(status.code(), Code::Unimplemented);
        assert_eq!(status.detail(), Some("method Foo not implemented"));
    }

    #[test]
    fn test_unknown_code_is_internal() {
        let trailer = Trailer {
            code: 42,
            detail: None,
        };
        assert_eq!(trailer.into_status().code(), Code::InternalError);
    }
}
