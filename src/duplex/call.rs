use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::duplex::metadata::Metadata;
use crate::duplex::path::MethodPath;

/// Identifies one call for log correlation on both ends.
#[derive(Clone, Hash, PartialEq, Eq)]
pub struct CallId(Arc<Uuid>);

impl CallId {
    pub fn generate() -> Self {
        Self(Arc::new(Uuid::new_v4()))
    }

    /// Parse the id a peer sent, falling back to a fresh one if it is not a valid UUID.
    pub fn parse_or_generate(raw: &str) -> Self {
        Uuid::parse_str(raw)
            .map(|uuid| Self(Arc::new(uuid)))
            .unwrap_or_else(|_| Self::generate())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallId({})", self.0)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything known about a call before its first message: id, method and metadata.
#[derive(Debug, Clone)]
pub struct CallInfo {
    call_id: CallId,
    method: Arc<MethodPath>,
    metadata: Arc<Metadata>,
}

impl CallInfo {
    pub fn new(call_id: CallId, method: MethodPath, metadata: Metadata) -> Self {
        Self {
            call_id,
            method: Arc::new(method),
            metadata: Arc::new(metadata),
        }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn method(&self) -> &MethodPath {
        &self.method
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_parse_round_trip() {
        let id = CallId::generate();
        let parsed = CallId::parse_or_generate(&id.to_string());
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_call_id_invalid_generates_fresh() {
        let id = CallId::parse_or_generate("not-a-uuid");
        assert_eq!(id.as_uuid().get_version_num(), 4);
    }
}
