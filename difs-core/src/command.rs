//! Repo command encoding.
//!
//! A command name is `<repo-prefix>/<verb>/<json parameter>` followed by the
//! signature components the signer appends. Responses are JSON documents
//! carried as data content.

use crate::security::{Signer, SigningMode};
use crate::transport::Interest;
use crate::{Data, DifsError, Name, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandVerb {
    Insert,
    InsertCheck,
    Get,
    Delete,
}

impl CommandVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandVerb::Insert => "insert",
            CommandVerb::InsertCheck => "insert check",
            CommandVerb::Get => "get",
            CommandVerb::Delete => "delete",
        }
    }

    pub fn parse(value: &[u8]) -> Result<Self> {
        match value {
            b"insert" => Ok(CommandVerb::Insert),
            b"insert check" => Ok(CommandVerb::InsertCheck),
            b"get" => Ok(CommandVerb::Get),
            b"delete" => Ok(CommandVerb::Delete),
            other => Err(DifsError::ProtocolViolation(format!(
                "unknown command verb: {}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

impl fmt::Display for CommandVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCommandParameter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_block_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_block_id: Option<u64>,
}

impl RepoCommandParameter {
    pub fn for_name(name: &Name) -> Self {
        Self {
            name: Some(name.to_uri()),
            ..Self::default()
        }
    }

    pub fn with_process_id(mut self, process_id: u64) -> Self {
        self.process_id = Some(process_id);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCommandResponse {
    pub status_code: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u64>,
    /// Segments the repo has durably stored so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_num: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_block_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_block_id: Option<u64>,
}

impl RepoCommandResponse {
    pub fn with_status(status_code: u32) -> Self {
        Self {
            status_code,
            ..Self::default()
        }
    }

    /// Status codes from 400 up signal a rejected command.
    pub fn is_rejected(&self) -> bool {
        self.status_code >= 400
    }

    pub fn from_data(data: &Data) -> Result<Self> {
        serde_json::from_slice(&data.content).map_err(|error| {
            DifsError::ProtocolViolation(format!(
                "malformed command response for {}: {}",
                data.name, error
            ))
        })
    }

    pub fn to_data(&self, name: Name) -> Result<Data> {
        Ok(Data::new(name, serde_json::to_vec(self)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCommand {
    pub verb: CommandVerb,
    pub parameter: RepoCommandParameter,
}

impl RepoCommand {
    pub fn new(verb: CommandVerb, parameter: RepoCommandParameter) -> Self {
        Self { verb, parameter }
    }

    pub fn unsigned_name(&self, repo_prefix: &Name) -> Result<Name> {
        Ok(repo_prefix
            .clone()
            .append(self.verb.as_str())
            .append(serde_json::to_string(&self.parameter)?))
    }

    /// Signed interest ready to express.
    pub fn interest(
        &self,
        repo_prefix: &Name,
        signer: &dyn Signer,
        mode: &SigningMode,
        lifetime: Duration,
    ) -> Result<Interest> {
        let name = signer.sign_command(self.unsigned_name(repo_prefix)?, mode)?;
        Ok(Interest::new(name).with_lifetime(lifetime))
    }

    /// Decode an unsigned command name registered under `repo_prefix`.
    pub fn parse(name: &Name, repo_prefix: &Name) -> Result<Self> {
        let base = repo_prefix.len();
        if !repo_prefix.is_prefix_of(name) || name.len() != base + 2 {
            return Err(DifsError::ProtocolViolation(format!(
                "{} is not a command under {}",
                name, repo_prefix
            )));
        }
        let verb = name
            .get(base)
            .ok_or_else(|| DifsError::ProtocolViolation(format!("{} has no verb", name)))?;
        let parameter = name
            .get(base + 1)
            .ok_or_else(|| DifsError::ProtocolViolation(format!("{} has no parameter", name)))?;

        Ok(Self {
            verb: CommandVerb::parse(verb.as_bytes())?,
            parameter: serde_json::from_slice(parameter.as_bytes()).map_err(|error| {
                DifsError::ProtocolViolation(format!("malformed parameter in {}: {}", name, error))
            })?,
        })
    }
}
