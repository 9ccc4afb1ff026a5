use crate::retry::{AttemptResult, RetryPolicy};
use crate::security::{Signer, SigningMode};
use crate::transport::Transport;
use crate::{
    CommandVerb, DifsError, Name, RepoCommand, RepoCommandParameter, RepoCommandResponse, Result,
    DEFAULT_INTEREST_LIFETIME,
};
use std::sync::Arc;
use std::time::Duration;

const STATUS_NOT_FOUND: u32 = 404;

#[derive(Clone)]
pub struct DeleteFileOperation {
    transport: Arc<dyn Transport>,
    signer: Arc<dyn Signer>,
}

#[derive(Debug, Clone)]
pub struct DeleteFileOperationRequest {
    pub name: Name,
    pub repo_prefix: Name,
    pub interest_lifetime: Duration,
    pub signing_mode: SigningMode,
}

impl DeleteFileOperationRequest {
    pub fn new(name: Name, repo_prefix: Name) -> Self {
        Self {
            name,
            repo_prefix,
            interest_lifetime: DEFAULT_INTEREST_LIFETIME,
            signing_mode: SigningMode::DefaultIdentity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteFileOperationOutcome {
    Deleted,
    NotFound,
}

impl DeleteFileOperation {
    pub fn new(transport: Arc<dyn Transport>, signer: Arc<dyn Signer>) -> Self {
        Self { transport, signer }
    }

    pub async fn run(&self, request: DeleteFileOperationRequest) -> Result<DeleteFileOperationOutcome> {
        let DeleteFileOperationRequest {
            name,
            repo_prefix,
            interest_lifetime,
            signing_mode,
        } = request;

        let command = RepoCommand::new(CommandVerb::Delete, RepoCommandParameter::for_name(&name));
        let mut interest = command.interest(
            &repo_prefix,
            self.signer.as_ref(),
            &signing_mode,
            interest_lifetime,
        )?;

        let mut retry = RetryPolicy::default();
        let data = loop {
            let outcome = self.transport.express_interest(interest.clone()).await;
            match retry.handle_outcome(interest, outcome) {
                AttemptResult::Delivered(data) => break data,
                AttemptResult::Reissue(again) => interest = again,
                AttemptResult::Exhausted(error) => return Err(error),
            }
        };

        let response = RepoCommandResponse::from_data(&data)?;
        if response.status_code == STATUS_NOT_FOUND {
            tracing::info!("Manifest not found. name={} repo={}", name, repo_prefix);
            return Ok(DeleteFileOperationOutcome::NotFound);
        }
        if response.is_rejected() {
            return Err(DifsError::CommandRejected {
                command: CommandVerb::Delete.to_string(),
                name: name.to_uri(),
                status_code: response.status_code,
            });
        }

        tracing::info!("Deleted file. name={} repo={}", name, repo_prefix);
        Ok(DeleteFileOperationOutcome::Deleted)
    }
}
