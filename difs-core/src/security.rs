//! Signing for data packets and command names.
//!
//! Data can carry either a bare SHA-256 digest of its signed portion or an
//! Ed25519 signature from a named identity held in a [`KeyChain`]. Command
//! names are signed by appending four components: timestamp, nonce,
//! signature info and signature value.

use crate::{Data, DifsError, Name, Result, SignatureInfo, SignatureType};
use bytes::Bytes;
use chrono::Utc;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Number of components a signed command appends to the unsigned name.
pub const COMMAND_SIGNATURE_COMPONENTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SigningMode {
    DigestSha256,
    #[default]
    DefaultIdentity,
    Identity(String),
}

impl SigningMode {
    /// Mode implied by an optional identity name.
    pub fn from_identity(identity: Option<&str>) -> Self {
        match identity {
            Some(identity) if !identity.is_empty() => SigningMode::Identity(identity.to_string()),
            _ => SigningMode::DefaultIdentity,
        }
    }
}

pub trait Signer: Send + Sync {
    fn sign_data(&self, data: &mut Data, mode: &SigningMode) -> Result<()>;

    fn sign_command(&self, name: Name, mode: &SigningMode) -> Result<Name>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CommandSignatureInfo {
    #[serde(rename = "type")]
    signature_type: SignatureType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_locator: Option<String>,
}

pub fn sha256_digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256_digest(bytes))
}

/// Named Ed25519 identities, one of them the default.
pub struct KeyChain {
    identities: HashMap<String, SigningKey>,
    default_identity: String,
}

impl std::fmt::Debug for KeyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.identities.keys().collect();
        names.sort();
        f.debug_struct("KeyChain")
            .field("identities", &names)
            .field("default_identity", &self.default_identity)
            .finish()
    }
}

impl KeyChain {
    /// Key chain with a freshly generated default identity.
    pub fn generate(default_identity: impl Into<String>) -> Self {
        let default_identity = default_identity.into();
        let mut identities = HashMap::new();
        identities.insert(
            default_identity.clone(),
            SigningKey::generate(&mut rand::rngs::OsRng),
        );
        Self {
            identities,
            default_identity,
        }
    }

    pub fn from_seed(default_identity: impl Into<String>, seed: &[u8; 32]) -> Self {
        let default_identity = default_identity.into();
        let mut identities = HashMap::new();
        identities.insert(default_identity.clone(), SigningKey::from_bytes(seed));
        Self {
            identities,
            default_identity,
        }
    }

    pub fn add_identity(&mut self, identity: impl Into<String>, seed: &[u8; 32]) {
        self.identities
            .insert(identity.into(), SigningKey::from_bytes(seed));
    }

    /// Add an identity from a 64-character hex seed.
    pub fn add_identity_hex(&mut self, identity: impl Into<String>, seed_hex: &str) -> Result<()> {
        let identity = identity.into();
        let bytes = hex::decode(seed_hex.trim())
            .map_err(|error| DifsError::Signing(format!("invalid seed for {}: {}", identity, error)))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            DifsError::Signing(format!(
                "seed for {} must be 32 bytes, got {}",
                identity,
                bytes.len()
            ))
        })?;
        self.add_identity(identity, &seed);
        Ok(())
    }

    pub fn generate_identity(&mut self, identity: impl Into<String>) {
        self.identities.insert(
            identity.into(),
            SigningKey::generate(&mut rand::rngs::OsRng),
        );
    }

    pub fn set_default_identity(&mut self, identity: &str) -> Result<()> {
        if !self.identities.contains_key(identity) {
            return Err(DifsError::Signing(format!("unknown identity: {}", identity)));
        }
        self.default_identity = identity.to_string();
        Ok(())
    }

    pub fn default_identity(&self) -> &str {
        &self.default_identity
    }

    pub fn public_key(&self, identity: &str) -> Option<VerifyingKey> {
        self.identities.get(identity).map(SigningKey::verifying_key)
    }

    fn resolve<'a>(&'a self, mode: &'a SigningMode) -> Result<Option<(&'a str, &'a SigningKey)>> {
        let identity = match mode {
            SigningMode::DigestSha256 => return Ok(None),
            SigningMode::DefaultIdentity => self.default_identity.as_str(),
            SigningMode::Identity(identity) => identity.as_str(),
        };
        let key = self
            .identities
            .get(identity)
            .ok_or_else(|| DifsError::Signing(format!("unknown identity: {}", identity)))?;
        Ok(Some((identity, key)))
    }

    fn verify_bytes(&self, signed: &[u8], signature_type: SignatureType, key_locator: Option<&str>, value: &[u8]) -> Result<()> {
        match signature_type {
            SignatureType::DigestSha256 => {
                if sha256_digest(signed).as_slice() != value {
                    return Err(DifsError::Signing("digest mismatch".to_string()));
                }
                Ok(())
            }
            SignatureType::Ed25519 => {
                let identity = key_locator
                    .ok_or_else(|| DifsError::Signing("signature has no key locator".to_string()))?;
                let key = self
                    .public_key(identity)
                    .ok_or_else(|| DifsError::Signing(format!("unknown identity: {}", identity)))?;
                let signature = ed25519_dalek::Signature::from_slice(value)
                    .map_err(|error| DifsError::Signing(format!("malformed signature: {}", error)))?;
                key.verify(signed, &signature).map_err(|error| {
                    DifsError::Signing(format!("bad signature from {}: {}", identity, error))
                })
            }
        }
    }

    pub fn verify_data(&self, data: &Data) -> Result<()> {
        let signature = data
            .signature
            .as_ref()
            .ok_or_else(|| DifsError::Signing(format!("{} is unsigned", data.name)))?;
        self.verify_bytes(
            &data.signed_portion(),
            signature.signature_type,
            signature.key_locator.as_deref(),
            &signature.value,
        )
    }

    /// Check a signed command name and return the unsigned name.
    pub fn verify_command(&self, name: &Name) -> Result<Name> {
        if name.len() < COMMAND_SIGNATURE_COMPONENTS {
            return Err(DifsError::Signing(format!("{} is not a signed command", name)));
        }
        let signed = name.prefix(name.len() - 1);
        let info_component = name
            .get(name.len() - 2)
            .ok_or_else(|| DifsError::Signing("missing signature info".to_string()))?;
        let value_component = name
            .last()
            .ok_or_else(|| DifsError::Signing("missing signature value".to_string()))?;

        let info: CommandSignatureInfo = serde_json::from_slice(info_component.as_bytes())
            .map_err(|error| DifsError::Signing(format!("malformed signature info: {}", error)))?;
        let value = hex::decode(value_component.as_bytes())
            .map_err(|error| DifsError::Signing(format!("malformed signature value: {}", error)))?;

        self.verify_bytes(
            signed.to_uri().as_bytes(),
            info.signature_type,
            info.key_locator.as_deref(),
            &value,
        )?;
        Ok(name.prefix(name.len() - COMMAND_SIGNATURE_COMPONENTS))
    }
}

impl Signer for KeyChain {
    fn sign_data(&self, data: &mut Data, mode: &SigningMode) -> Result<()> {
        let signed = data.signed_portion();
        let signature = match self.resolve(mode)? {
            None => SignatureInfo {
                signature_type: SignatureType::DigestSha256,
                key_locator: None,
                value: Bytes::copy_from_slice(&sha256_digest(&signed)),
            },
            Some((identity, key)) => SignatureInfo {
                signature_type: SignatureType::Ed25519,
                key_locator: Some(identity.to_string()),
                value: Bytes::copy_from_slice(&key.sign(&signed).to_bytes()),
            },
        };
        data.signature = Some(signature);
        Ok(())
    }

    fn sign_command(&self, name: Name, mode: &SigningMode) -> Result<Name> {
        let resolved = self.resolve(mode)?;
        let info = CommandSignatureInfo {
            signature_type: match resolved {
                None => SignatureType::DigestSha256,
                Some(_) => SignatureType::Ed25519,
            },
            key_locator: resolved.map(|(identity, _)| identity.to_string()),
        };

        let name = name
            .append(Utc::now().timestamp_millis().to_string())
            .append(rand::random::<u64>().to_string())
            .append(serde_json::to_string(&info)?);

        let signed = name.to_uri();
        let value = match resolved {
            None => sha256_digest(signed.as_bytes()).to_vec(),
            Some((_, key)) => key.sign(signed.as_bytes()).to_bytes().to_vec(),
        };
        Ok(name.append(hex::encode(value)))
    }
}
