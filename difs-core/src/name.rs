//! Hierarchical request names.
//!
//! A name is an ordered list of opaque byte components. The URI form joins
//! components with `/` and percent-escapes every byte outside the unreserved
//! set, so a component may itself carry `/`, spaces or a JSON document.

use crate::{DifsError, Result};
use bytes::Bytes;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Component(Bytes);

impl Component {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self(value.into())
    }

    pub fn from_segment(segment: u64) -> Self {
        Self(Bytes::from(segment.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decode a decimal segment number. Leading zeros and signs are rejected
    /// so that every segment has exactly one encoding.
    pub fn to_segment(&self) -> Result<u64> {
        let text = std::str::from_utf8(&self.0)
            .map_err(|_| DifsError::ProtocolViolation("segment component is not UTF-8".to_string()))?;

        let canonical = !text.is_empty()
            && text.bytes().all(|b| b.is_ascii_digit())
            && (text == "0" || !text.starts_with('0'));
        if !canonical {
            return Err(DifsError::ProtocolViolation(format!(
                "invalid segment component: {}",
                text
            )));
        }

        text.parse::<u64>().map_err(|error| {
            DifsError::ProtocolViolation(format!("invalid segment component {}: {}", text, error))
        })
    }

    fn write_escaped(&self, out: &mut String) {
        for &byte in self.0.iter() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
                out.push(byte as char);
            } else {
                out.push_str(&format!("%{:02X}", byte));
            }
        }
    }

    fn parse_escaped(text: &str) -> Result<Self> {
        let raw = text.as_bytes();
        let mut decoded = Vec::with_capacity(raw.len());
        let mut index = 0;
        while index < raw.len() {
            if raw[index] == b'%' {
                let digits = raw.get(index + 1..index + 3).ok_or_else(|| {
                    DifsError::ProtocolViolation(format!("truncated escape in name component: {}", text))
                })?;
                let digits = std::str::from_utf8(digits)
                    .map_err(|_| DifsError::ProtocolViolation(format!("invalid escape in: {}", text)))?;
                let byte = u8::from_str_radix(digits, 16)
                    .map_err(|_| DifsError::ProtocolViolation(format!("invalid escape in: {}", text)))?;
                decoded.push(byte);
                index += 3;
            } else {
                decoded.push(raw[index]);
                index += 1;
            }
        }
        Ok(Self(Bytes::from(decoded)))
    }
}

impl From<&str> for Component {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Component {
    fn from(value: String) -> Self {
        Self(Bytes::from(value))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    components: Vec<Component>,
}

impl Name {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_uri(uri: &str) -> Result<Self> {
        let trimmed = uri.trim();
        let path = trimmed.strip_prefix("ndn:").unwrap_or(trimmed);

        let mut name = Name::new();
        for part in path.split('/').filter(|part| !part.is_empty()) {
            name.components.push(Component::parse_escaped(part)?);
        }
        Ok(name)
    }

    pub fn to_uri(&self) -> String {
        if self.components.is_empty() {
            return "/".to_string();
        }

        let mut uri = String::new();
        for component in &self.components {
            uri.push('/');
            component.write_escaped(&mut uri);
        }
        uri
    }

    pub fn append(mut self, component: impl Into<Component>) -> Self {
        self.components.push(component.into());
        self
    }

    pub fn append_segment(mut self, segment: u64) -> Self {
        self.components.push(Component::from_segment(segment));
        self
    }

    pub fn concat(mut self, other: &Name) -> Self {
        self.components.extend(other.components.iter().cloned());
        self
    }

    pub fn get(&self, index: usize) -> Option<&Component> {
        self.components.get(index)
    }

    pub fn last(&self) -> Option<&Component> {
        self.components.last()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Name made of the first `count` components.
    pub fn prefix(&self, count: usize) -> Name {
        Name {
            components: self.components[..count.min(self.components.len())].to_vec(),
        }
    }

    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.components.len() <= other.components.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(left, right)| left == right)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl std::str::FromStr for Name {
    type Err = DifsError;

    fn from_str(s: &str) -> Result<Self> {
        Name::from_uri(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_round_trip_with_awkward_components() {
        let name = Name::from_uri("/repo")
            .unwrap()
            .append("insert check")
            .append(r#"{"name":"/a/b.txt","process_id":7}"#)
            .append_segment(12);

        let uri = name.to_uri();
        assert!(!uri.contains(' '));
        assert_eq!(uri.matches('/').count(), 4);

        let parsed = Name::from_uri(&uri).unwrap();
        assert_eq!(parsed, name);
        assert_eq!(parsed.get(3).unwrap().to_segment().unwrap(), 12);
    }

    #[test]
    fn test_prefix_matching() {
        let prefix = Name::from_uri("/repo/data").unwrap();
        let full = Name::from_uri("/repo/data/file.bin/3").unwrap();

        assert!(prefix.is_prefix_of(&full));
        assert!(!full.is_prefix_of(&prefix));
        assert!(Name::new().is_prefix_of(&full));
        assert_eq!(full.prefix(2), prefix);
    }

    #[test]
    fn test_segment_decoding_rejects_non_canonical() {
        assert_eq!(Component::from("0").to_segment().unwrap(), 0);
        assert_eq!(Component::from_segment(24).to_segment().unwrap(), 24);
        assert!(Component::from("007").to_segment().is_err());
        assert!(Component::from("-1").to_segment().is_err());
        assert!(Component::from("seg").to_segment().is_err());
        assert!(Component::from("").to_segment().is_err());
    }

    #[test]
    fn test_root_and_scheme() {
        assert_eq!(Name::new().to_uri(), "/");
        assert_eq!(Name::from_uri("ndn:/a/b").unwrap(), Name::from_uri("/a//b/").unwrap());
    }
}
