use tonic::metadata::{Ascii, KeyAndValueRef, MetadataKey, MetadataMap, MetadataValue};

use crate::duplex::error::RpcError;
use crate::duplex::frame::MetadataEntry;

/// Out-of-band key/value pairs carried with a call.
///
/// Keys are case-insensitive and may hold several values. Metadata is built before a call is
/// opened and moved into it, after which both ends only ever see it through a shared reference.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    map: MetadataMap,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build metadata from key/value pairs.
    ///
    /// ```ignore
    /// let metadata = Metadata::from_pairs([("token", "dververbt3"), ("organization", "xyz")])?;
    /// ```
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self, RpcError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut metadata = Self::new();
        for (key, value) in pairs {
            metadata.attach(key.as_ref(), value.as_ref())?;
        }
        Ok(metadata)
    }

    /// Attach a value to `key`, keeping any values already present.
    pub fn attach(&mut self, key: &str, value: &str) -> Result<(), RpcError> {
        let key = MetadataKey::<Ascii>::from_bytes(key.to_ascii_lowercase().as_bytes())
            .map_err(|e| RpcError::InvalidMetadata(format!("key '{key}': {e}")))?;
        let value = MetadataValue::<Ascii>::try_from(value)
            .map_err(|e| RpcError::InvalidMetadata(format!("value for '{}': {e}", key.as_str())))?;
        self.map.append(key, value);
        Ok(())
    }

    /// The first value attached to `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map
            .get(key.to_ascii_lowercase().as_str())
            .and_then(|value| value.to_str().ok())
    }

    /// Every value attached to `key`, in insertion order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.map
            .get_all(key.to_ascii_lowercase().as_str())
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key.to_ascii_lowercase().as_str())
    }

    /// Number of values, counting each value of a multi-valued key.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate over every `(key, value)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().filter_map(|entry| match entry {
            KeyAndValueRef::Ascii(key, value) => {
                value.to_str().ok().map(|value| (key.as_str(), value))
            }
            KeyAndValueRef::Binary(..) => None,
        })
    }

    /// Borrow the underlying map, e.g. to forward it to a tonic request.
    pub fn as_map(&self) -> &MetadataMap {
        &self.map
    }

    pub fn into_map(self) -> MetadataMap {
        self.map
    }

    pub(crate) fn to_entries(&self) -> Vec<MetadataEntry> {
        self.iter()
            .map(|(key, value)| MetadataEntry {
                key: key.to_string(),
                value: value.to_string(),
            })
            .collect()
    }

    pub(crate) fn from_entries(entries: Vec<MetadataEntry>) -> Result<Self, RpcError> {
        Self::from_pairs(entries.into_iter().map(|entry| (entry.key, entry.value)))
    }
}

impl From<MetadataMap> for Metadata {
    fn from(map: MetadataMap) -> Self {
        Self { map }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_case_insensitive() {
        let metadata = Metadata::from_pairs([("Token", "dververbt3")]).unwrap();

        assert_eq!(metadata.get("token"), Some("dververbt3"));
        assert_eq!(metadata.get("TOKEN"), Some("dververbt3"));
        assert!(metadata.contains_key("tOkEn"));
    }

    #[test]
    fn test_multiple_values_per_key() {
        let mut metadata = Metadata::new();
        metadata.attach("role", "reader").unwrap();
        metadata.attach("Role", "writer").unwrap();
        metadata.attach("organization", "xyz").unwrap();

        assert_eq!(metadata.get("role"), Some("reader"));
        assert_eq!(metadata.get_all("role"), vec!["reader", "writer"]);
        assert_eq!(metadata.len(), 3);
    }

    #[test]
    fn test_invalid_key_rejected() {
        let mut metadata = Metadata::new();
        let result = metadata.attach("bad key", "value");
        assert!(matches!(result, Err(RpcError::InvalidMetadata(_))));
        assert!(metadata.is_empty());
    }

    #[test]
    fn test_entries_preserve_pairs() {
        let metadata = Metadata::from_pairs([("token", "a"), ("token", "b")]).unwrap();
        let restored = Metadata::from_entries(metadata.to_entries()).unwrap();

        assert_eq!(restored.get_all("token"), vec!["a", "b"]);
    }
}
