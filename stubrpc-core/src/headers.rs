//! # Bridge Headers
//!
//! A small ordered multimap used on both sides of the bridge: inbound gRPC metadata is
//! copied into it before a call reaches the matching engine, and stub response headers are
//! read from it when they are reflected back as gRPC trailers.
//!
//! Keys are ASCII case-insensitive and stored lower-cased. Keys ending in [`BINARY_SUFFIX`]
//! carry byte content, which is held as base64 text inside the multimap and converted to
//! binary metadata at the transport boundary. Every other key is plain ASCII text.
use base64::{
    Engine,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig, general_purpose::STANDARD},
};
use std::str::FromStr;
use tonic::metadata::{
    AsciiMetadataKey, AsciiMetadataValue, BinaryMetadataKey, BinaryMetadataValue,
    KeyAndValueRef, MetadataMap,
};
use tracing::warn;

/// Suffix marking a header whose value is binary.
pub const BINARY_SUFFIX: &str = "-bin";

/// Accepts base64 with or without padding, the way gRPC peers send it.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Returns `true` if `key` names a binary header.
pub fn is_binary_key(key: &str) -> bool {
    let key = key.as_bytes();
    key.len() > BINARY_SUFFIX.len()
        && key[key.len() - BINARY_SUFFIX.len()..].eq_ignore_ascii_case(BINARY_SUFFIX.as_bytes())
}

/// Encodes bytes the way binary header values are represented in [`HttpHeaders`].
pub fn encode_binary(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes a binary header value, accepting padded and unpadded base64.
pub fn decode_binary(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    LENIENT_BASE64.decode(value.trim())
}

/// An ordered, case-insensitive header multimap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaders {
    entries: Vec<(String, Vec<String>)>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value to `key`, keeping any values already present.
    pub fn append(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        let key = key.as_ref().to_ascii_lowercase();
        let value = value.into();

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// Replaces every value of `key` with `value`.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.remove(key.as_ref());
        self.append(key, value);
    }

    /// Builder-style [`HttpHeaders::append`].
    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.append(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        let index = self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        Some(self.entries.remove(index).1)
    }

    /// All values of `key`, in insertion order.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }

    /// First value of `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        !self.get_all(key).is_empty()
    }

    /// Iterates over `(key, values)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(k, values)| (k.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies gRPC metadata into a header collection.
    ///
    /// Binary values are re-encoded as padded base64, text values are copied as they are.
    /// Values that are not valid ASCII are skipped.
    pub fn from_metadata(metadata: &MetadataMap) -> Self {
        let mut headers = Self::new();

        for entry in metadata.iter() {
            match entry {
                KeyAndValueRef::Ascii(key, value) => match value.to_str() {
                    Ok(value) => headers.append(key.as_str(), value),
                    Err(_) => warn!(key = key.as_str(), "Skipping non ASCII metadata value"),
                },
                KeyAndValueRef::Binary(key, value) => match value.to_bytes() {
                    Ok(bytes) => headers.append(key.as_str(), encode_binary(&bytes)),
                    Err(_) => warn!(key = key.as_str(), "Skipping undecodable binary metadata"),
                },
            }
        }

        headers
    }

    /// Converts the collection into gRPC metadata.
    ///
    /// Multi-valued text headers are joined with `,`; every value of a binary header is
    /// decoded and sent as its own binary entry. Keys or values that cannot be expressed as
    /// metadata are skipped with a warning.
    pub fn to_metadata(&self) -> MetadataMap {
        let mut metadata = MetadataMap::new();

        for (key, values) in self.iter() {
            if is_binary_key(key) {
                let Ok(metadata_key) = BinaryMetadataKey::from_bytes(key.as_bytes()) else {
                    warn!(key, "Skipping invalid binary metadata key");
                    continue;
                };

                for value in values {
                    match decode_binary(value) {
                        Ok(bytes) => {
                            metadata.append_bin(
                                metadata_key.clone(),
                                BinaryMetadataValue::from_bytes(&bytes),
                            );
                        }
                        Err(_) => warn!(key, "Skipping binary header that is not base64"),
                    }
                }
            } else {
                let Ok(metadata_key) = AsciiMetadataKey::from_str(key) else {
                    warn!(key, "Skipping invalid metadata key");
                    continue;
                };

                match AsciiMetadataValue::from_str(&values.join(",")) {
                    Ok(value) => {
                        metadata.insert(metadata_key, value);
                    }
                    Err(_) => warn!(key, "Skipping metadata value that is not ASCII"),
                }
            }
        }

        metadata
    }
}

impl<K, V> FromIterator<(K, V)> for HttpHeaders
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive_and_keep_order() {
        let headers = HttpHeaders::new()
            .with("X-My-Header", "first")
            .with("x-other", "1")
            .with("x-my-header", "second");

        assert_eq!(headers.get_all("x-MY-header"), ["first", "second"]);
        assert_eq!(headers.first("X-Other"), Some("1"));
        assert_eq!(
            headers.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            ["x-my-header", "x-other"]
        );
    }

    #[test]
    fn insert_replaces_previous_values() {
        let mut headers = HttpHeaders::new().with("a", "1").with("a", "2");
        headers.insert("A", "3");
        assert_eq!(headers.get_all("a"), ["3"]);
    }

    #[test]
    fn binary_suffix_detection() {
        assert!(is_binary_key("trace-bin"));
        assert!(is_binary_key("Trace-BIN"));
        assert!(!is_binary_key("-bin"));
        assert!(!is_binary_key("binary"));
    }

    #[test]
    fn metadata_round_trip_keeps_text_and_bytes() {
        let mut metadata = MetadataMap::new();
        metadata.insert("x-user", "tom".parse().unwrap());
        metadata.insert_bin("x-token-bin", BinaryMetadataValue::from_bytes(&[0, 1, 2, 255]));

        let headers = HttpHeaders::from_metadata(&metadata);
        assert_eq!(headers.first("x-user"), Some("tom"));
        assert_eq!(headers.first("x-token-bin"), Some(encode_binary(&[0, 1, 2, 255]).as_str()));

        let back = headers.to_metadata();
        assert_eq!(back.get("x-user").unwrap().to_str().unwrap(), "tom");
        assert_eq!(
            back.get_bin("x-token-bin").unwrap().to_bytes().unwrap().as_ref(),
            &[0, 1, 2, 255]
        );
    }

    #[test]
    fn multi_valued_text_headers_are_joined() {
        let headers = HttpHeaders::new()
            .with("x-my-header", "first")
            .with("x-my-header", "second")
            .with("x-my-header", "third");

        let metadata = headers.to_metadata();
        assert_eq!(
            metadata.get("x-my-header").unwrap().to_str().unwrap(),
            "first,second,third"
        );
    }

    #[test]
    fn unpadded_binary_values_are_accepted() {
        assert_eq!(decode_binary("AAEC").unwrap(), vec![0, 1, 2]);
        assert_eq!(decode_binary("AAECAw").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(decode_binary("AAECAw==").unwrap(), vec![0, 1, 2, 3]);
    }
}
