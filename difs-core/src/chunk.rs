use crate::{DifsError, Name, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureType {
    DigestSha256,
    Ed25519,
}

impl SignatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureType::DigestSha256 => "digest_sha256",
            SignatureType::Ed25519 => "ed25519",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "digest_sha256" => Ok(SignatureType::DigestSha256),
            "ed25519" => Ok(SignatureType::Ed25519),
            other => Err(DifsError::Signing(format!("unknown signature type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    pub signature_type: SignatureType,
    /// Identity name for Ed25519 signatures, absent for digests.
    pub key_locator: Option<String>,
    pub value: Bytes,
}

/// One named, signed unit of content: a file segment, a manifest or a
/// command response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub name: Name,
    pub content: Bytes,
    pub freshness_period: Duration,
    pub final_block_id: Option<u64>,
    pub signature: Option<SignatureInfo>,
}

impl Data {
    pub fn new(name: Name, content: impl Into<Bytes>) -> Self {
        Self {
            name,
            content: content.into(),
            freshness_period: Duration::ZERO,
            final_block_id: None,
            signature: None,
        }
    }

    pub fn with_freshness_period(mut self, freshness_period: Duration) -> Self {
        self.freshness_period = freshness_period;
        self
    }

    pub fn with_final_block_id(mut self, final_block_id: u64) -> Self {
        self.final_block_id = Some(final_block_id);
        self
    }

    /// Segment number carried by the last name component.
    pub fn segment(&self) -> Result<u64> {
        self.name
            .last()
            .ok_or_else(|| DifsError::ProtocolViolation("data name is empty".to_string()))?
            .to_segment()
    }

    pub fn is_final(&self) -> bool {
        match (self.final_block_id, self.segment()) {
            (Some(final_block_id), Ok(segment)) => final_block_id == segment,
            _ => false,
        }
    }

    /// Deterministic encoding of everything the signature covers.
    ///
    /// Layout: name URI, content, freshness in ms, then the final block id
    /// behind a presence byte. Variable-length fields are length-prefixed.
    pub fn signed_portion(&self) -> Bytes {
        let uri = self.name.to_uri();
        let mut buf = BytesMut::with_capacity(uri.len() + self.content.len() + 32);

        buf.put_u32(uri.len() as u32);
        buf.put_slice(uri.as_bytes());
        buf.put_u64(self.content.len() as u64);
        buf.put_slice(&self.content);
        buf.put_u64(self.freshness_period.as_millis() as u64);
        match self.final_block_id {
            Some(final_block_id) => {
                buf.put_u8(1);
                buf.put_u64(final_block_id);
            }
            None => buf.put_u8(0),
        }

        buf.freeze()
    }
}
