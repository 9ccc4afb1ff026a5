use crate::retry::{AttemptResult, RetryPolicy};
use crate::security::{Signer, SigningMode};
use crate::transport::Transport;
use crate::{
    CommandVerb, DifsError, Manifest, Name, RepoCommand, RepoCommandParameter, Result,
    DEFAULT_INTEREST_LIFETIME,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct ResolveManifestOperation {
    transport: Arc<dyn Transport>,
    signer: Arc<dyn Signer>,
}

#[derive(Debug, Clone)]
pub struct ResolveManifestOperationRequest {
    pub name: Name,
    pub repo_prefix: Name,
    pub interest_lifetime: Duration,
    pub signing_mode: SigningMode,
}

impl ResolveManifestOperationRequest {
    pub fn new(name: Name, repo_prefix: Name) -> Self {
        Self {
            name,
            repo_prefix,
            interest_lifetime: DEFAULT_INTEREST_LIFETIME,
            signing_mode: SigningMode::DefaultIdentity,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResolveManifestOperationOutcome {
    Found(Manifest),
    NotFound,
}

impl ResolveManifestOperation {
    pub fn new(transport: Arc<dyn Transport>, signer: Arc<dyn Signer>) -> Self {
        Self { transport, signer }
    }

    pub async fn run(
        &self,
        request: ResolveManifestOperationRequest,
    ) -> Result<ResolveManifestOperationOutcome> {
        let mut retry = RetryPolicy::default();
        self.run_with_retry(request, &mut retry).await
    }

    /// Resolve against a retry budget owned by an enclosing operation.
    pub async fn run_with_retry(
        &self,
        request: ResolveManifestOperationRequest,
        retry: &mut RetryPolicy,
    ) -> Result<ResolveManifestOperationOutcome> {
        let ResolveManifestOperationRequest {
            name,
            repo_prefix,
            interest_lifetime,
            signing_mode,
        } = request;

        let command = RepoCommand::new(CommandVerb::Get, RepoCommandParameter::for_name(&name));
        let mut interest = command.interest(
            &repo_prefix,
            self.signer.as_ref(),
            &signing_mode,
            interest_lifetime,
        )?;

        let data = loop {
            let outcome = self.transport.express_interest(interest.clone()).await;
            match retry.handle_outcome(interest, outcome) {
                AttemptResult::Delivered(data) => break data,
                AttemptResult::Reissue(again) => interest = again,
                AttemptResult::Exhausted(error) => return Err(error),
            }
        };

        if data.content.iter().all(|b| b.is_ascii_whitespace()) {
            tracing::info!("Manifest not found. name={} repo={}", name, repo_prefix);
            return Ok(ResolveManifestOperationOutcome::NotFound);
        }

        let value: serde_json::Value = serde_json::from_slice(&data.content).map_err(|error| {
            DifsError::InvalidManifest(format!("malformed get response for {}: {}", name, error))
        })?;
        if let Some(status_code) = value.get("status_code").and_then(|code| code.as_u64()) {
            if status_code >= 400 {
                return Err(DifsError::CommandRejected {
                    command: CommandVerb::Get.to_string(),
                    name: name.to_uri(),
                    status_code: status_code as u32,
                });
            }
        }

        let manifest = Manifest::from_json(&data.content)?;
        tracing::debug!(
            "Resolved manifest. name={} end_block_id={} shards={}",
            manifest.name,
            manifest.end_block_id,
            manifest.repos.len()
        );
        Ok(ResolveManifestOperationOutcome::Found(manifest))
    }
}
