use super::fetch_file::{FetchFileOperation, FetchFileOperationRequest, FetchSummary};
use super::resolve_manifest::{
    ResolveManifestOperation, ResolveManifestOperationOutcome, ResolveManifestOperationRequest,
};
use crate::retry::RetryPolicy;
use crate::security::{Signer, SigningMode};
use crate::transport::Transport;
use crate::{Name, Result, DEFAULT_INTEREST_LIFETIME};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;

#[derive(Clone)]
pub struct GetFileOperation {
    resolve: ResolveManifestOperation,
    fetch: FetchFileOperation,
}

#[derive(Debug, Clone)]
pub struct GetFileOperationRequest {
    pub name: Name,
    pub repo_prefix: Name,
    pub interest_lifetime: Duration,
    pub signing_mode: SigningMode,
}

impl GetFileOperationRequest {
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
pub enum GetFileOperationOutcome {
    Fetched(FetchSummary),
    NotFound,
}

impl GetFileOperation {
    pub fn new(transport: Arc<dyn Transport>, signer: Arc<dyn Signer>) -> Self {
        Self {
            resolve: ResolveManifestOperation::new(transport.clone(), signer),
            fetch: FetchFileOperation::new(transport),
        }
    }

    /// Resolve the manifest and pull the file into `sink`. Resolution and
    /// fetch are one logical operation and share a retry budget.
    pub async fn run<W>(&self, request: GetFileOperationRequest, sink: &mut W) -> Result<GetFileOperationOutcome>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let GetFileOperationRequest {
            name,
            repo_prefix,
            interest_lifetime,
            signing_mode,
        } = request;

        let mut retry = RetryPolicy::default();
        let outcome = self
            .resolve
            .run_with_retry(
                ResolveManifestOperationRequest {
                    name,
                    repo_prefix,
                    interest_lifetime,
                    signing_mode,
                },
                &mut retry,
            )
            .await?;

        let manifest = match outcome {
            ResolveManifestOperationOutcome::Found(manifest) => manifest,
            ResolveManifestOperationOutcome::NotFound => return Ok(GetFileOperationOutcome::NotFound),
        };

        let summary = self
            .fetch
            .run_with_retry(
                FetchFileOperationRequest {
                    manifest,
                    interest_lifetime,
                },
                sink,
                &mut retry,
            )
            .await?;
        Ok(GetFileOperationOutcome::Fetched(summary))
    }
}
