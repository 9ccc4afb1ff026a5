//! Write path.
//!
//! The writer registers the file name, asks the repo to `insert` it and then
//! serves the manifest and segments as the repo pulls them. Once the insert
//! is accepted it polls `insert check` every check period until the repo
//! reports all produced segments stored. Insert and check losses are fatal;
//! a slow repo is only bounded by the optional deadline.

use crate::retry::{AttemptResult, RetryPolicy};
use crate::security::{Signer, SigningMode};
use crate::transport::{Interest, RequestOutcome, Transport};
use crate::window::PresignWindow;
use crate::{
    CommandVerb, Data, DifsError, Manifest, Name, RepoCommand, RepoCommandParameter,
    RepoCommandResponse, Result, DEFAULT_BLOCK_SIZE, DEFAULT_CHECK_PERIOD,
    DEFAULT_FRESHNESS_PERIOD, DEFAULT_INTEREST_LIFETIME,
};
use futures_util::future::BoxFuture;
use std::io::SeekFrom;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt};
use tokio::time::Sleep;

#[derive(Debug, Clone)]
pub struct PutOptions {
    pub block_size: usize,
    pub freshness_period: Duration,
    pub interest_lifetime: Duration,
    pub check_period: Duration,
    /// Mode for segments and the manifest.
    pub signing_mode: SigningMode,
    /// Identity for insert and check commands; the default identity if unset.
    pub identity_for_command: Option<String>,
    /// Hard deadline for the whole put.
    pub timeout: Option<Duration>,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            freshness_period: DEFAULT_FRESHNESS_PERIOD,
            interest_lifetime: DEFAULT_INTEREST_LIFETIME,
            check_period: DEFAULT_CHECK_PERIOD,
            signing_mode: SigningMode::DefaultIdentity,
            identity_for_command: None,
            timeout: None,
        }
    }
}

#[derive(Clone)]
pub struct PutFileOperation {
    transport: Arc<dyn Transport>,
    signer: Arc<dyn Signer>,
}

pub struct PutFileOperationRequest<R> {
    pub name: Name,
    pub repo_prefix: Name,
    pub input: R,
    pub options: PutOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutFileOperationResult {
    pub segments: u64,
    pub bytes: u64,
    pub process_id: u64,
    /// Check commands answered before the repo confirmed the write.
    pub checks: u32,
}

/// Commit handshake state. Each variant owns the single future the phase is
/// waiting on.
enum CommitPhase {
    Inserting(BoxFuture<'static, (Interest, RequestOutcome)>),
    Waiting { process_id: u64, timer: Pin<Box<Sleep>> },
    Checking {
        process_id: u64,
        request: BoxFuture<'static, (Interest, RequestOutcome)>,
    },
}

enum CommitEvent {
    InsertAnswered(Interest, RequestOutcome),
    CheckDue(u64),
    CheckAnswered(u64, RequestOutcome),
}

impl CommitPhase {
    async fn next_event(&mut self) -> CommitEvent {
        match self {
            CommitPhase::Inserting(request) => {
                let (interest, outcome) = request.await;
                CommitEvent::InsertAnswered(interest, outcome)
            }
            CommitPhase::Waiting { process_id, timer } => {
                timer.await;
                CommitEvent::CheckDue(*process_id)
            }
            CommitPhase::Checking {
                process_id,
                request,
            } => {
                let (_, outcome) = request.await;
                CommitEvent::CheckAnswered(*process_id, outcome)
            }
        }
    }
}

async fn deadline_elapsed(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(timer) => timer.await,
        None => std::future::pending().await,
    }
}

fn describe_failure(outcome: &RequestOutcome) -> String {
    match outcome {
        RequestOutcome::Nack(reason) => format!("nack ({})", reason),
        RequestOutcome::Timeout => "timeout".to_string(),
        RequestOutcome::Data(_) => "data".to_string(),
    }
}

async fn measure_input<R>(input: &mut R) -> Result<u64>
where
    R: AsyncSeek + Unpin,
{
    let start = input.seek(SeekFrom::Start(0)).await?;
    let end = input.seek(SeekFrom::End(0)).await?;
    input.seek(SeekFrom::Start(0)).await?;
    Ok(end - start)
}

impl PutFileOperation {
    pub fn new(transport: Arc<dyn Transport>, signer: Arc<dyn Signer>) -> Self {
        Self { transport, signer }
    }

    pub async fn run<R>(&self, request: PutFileOperationRequest<R>) -> Result<PutFileOperationResult>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let PutFileOperationRequest {
            name,
            repo_prefix,
            mut input,
            options,
        } = request;
        let mut deadline = options.timeout.map(|timeout| Box::pin(tokio::time::sleep(timeout)));

        let total_bytes = measure_input(&mut input).await.map_err(|error| {
            DifsError::ProtocolViolation(format!("cannot measure input for {}: {}", name, error))
        })?;
        if total_bytes == 0 {
            return Err(DifsError::ProtocolViolation(format!("input for {} is empty", name)));
        }
        if options.block_size == 0 {
            return Err(DifsError::ProtocolViolation("block size must be positive".to_string()));
        }

        let manifest_data = self.manifest_data(&name, total_bytes, &options)?;
        let command_mode = SigningMode::from_identity(options.identity_for_command.as_deref());

        let mut window = PresignWindow::new(
            input,
            name.clone(),
            options.block_size,
            options.freshness_period,
            self.signer.clone(),
            options.signing_mode.clone(),
        );

        let mut interests = self.transport.register_prefix(name.clone()).await?;
        tracing::info!(
            "Serving file. name={} bytes={} block_size={} repo={}",
            name,
            total_bytes,
            options.block_size,
            repo_prefix
        );

        let insert = RepoCommand::new(CommandVerb::Insert, RepoCommandParameter::for_name(&name))
            .interest(&repo_prefix, self.signer.as_ref(), &command_mode, options.interest_lifetime)?;
        let mut insert_retry = RetryPolicy::no_retry();
        let mut phase = CommitPhase::Inserting(self.express(insert));
        let mut checks = 0u32;

        loop {
            tokio::select! {
                Some(interest) = interests.recv() => {
                    self.serve_interest(&name, &mut window, &manifest_data, interest).await?;
                }
                event = phase.next_event() => match event {
                    CommitEvent::InsertAnswered(interest, outcome) => {
                        let reason = describe_failure(&outcome);
                        let data = match insert_retry.handle_outcome(interest, outcome) {
                            AttemptResult::Delivered(data) => data,
                            AttemptResult::Reissue(interest) => {
                                phase = CommitPhase::Inserting(self.express(interest));
                                continue;
                            }
                            AttemptResult::Exhausted(_) => {
                                return Err(DifsError::CommandLost {
                                    command: CommandVerb::Insert.to_string(),
                                    name: name.to_uri(),
                                    reason,
                                });
                            }
                        };

                        let response = RepoCommandResponse::from_data(&data)?;
                        if response.is_rejected() {
                            return Err(DifsError::CommandRejected {
                                command: CommandVerb::Insert.to_string(),
                                name: name.to_uri(),
                                status_code: response.status_code,
                            });
                        }
                        let process_id = response.process_id.unwrap_or_else(|| {
                            tracing::debug!("Insert response without process id. name={}", name);
                            0
                        });
                        tracing::info!(
                            "Insert accepted. name={} process_id={} status={}",
                            name,
                            process_id,
                            response.status_code
                        );
                        phase = CommitPhase::Waiting {
                            process_id,
                            timer: Box::pin(tokio::time::sleep(options.check_period)),
                        };
                    }
                    CommitEvent::CheckDue(process_id) => {
                        let check = RepoCommand::new(
                            CommandVerb::InsertCheck,
                            RepoCommandParameter::for_name(&name).with_process_id(process_id),
                        )
                        .interest(&repo_prefix, self.signer.as_ref(), &command_mode, options.interest_lifetime)?;
                        phase = CommitPhase::Checking {
                            process_id,
                            request: self.express(check),
                        };
                    }
                    CommitEvent::CheckAnswered(process_id, outcome) => {
                        let data = match outcome {
                            RequestOutcome::Data(data) => data,
                            failed => {
                                return Err(DifsError::CommandLost {
                                    command: CommandVerb::InsertCheck.to_string(),
                                    name: name.to_uri(),
                                    reason: describe_failure(&failed),
                                });
                            }
                        };

                        let response = RepoCommandResponse::from_data(&data)?;
                        if response.is_rejected() {
                            return Err(DifsError::CommandRejected {
                                command: CommandVerb::InsertCheck.to_string(),
                                name: name.to_uri(),
                                status_code: response.status_code,
                            });
                        }
                        checks += 1;

                        let stored = response.insert_num.unwrap_or(0);
                        tracing::debug!(
                            "Insert check. name={} process_id={} stored={} produced={} finished={}",
                            name,
                            process_id,
                            stored,
                            window.produced(),
                            window.is_finished()
                        );
                        if window.is_finished() && stored == window.produced() {
                            tracing::info!(
                                "Insert confirmed. name={} segments={} bytes={} checks={}",
                                name,
                                stored,
                                window.bytes_read(),
                                checks
                            );
                            return Ok(PutFileOperationResult {
                                segments: window.produced(),
                                bytes: window.bytes_read(),
                                process_id,
                                checks,
                            });
                        }

                        phase = CommitPhase::Waiting {
                            process_id,
                            timer: Box::pin(tokio::time::sleep(options.check_period)),
                        };
                    }
                },
                _ = deadline_elapsed(&mut deadline) => {
                    let deadline_ms = options.timeout.map(|t| t.as_millis() as u64).unwrap_or_default();
                    tracing::warn!("Put deadline reached. name={} deadline_ms={}", name, deadline_ms);
                    return Err(DifsError::DeadlineExceeded {
                        operation: format!("put {}", name),
                        deadline_ms,
                    });
                }
            }
        }
    }

    fn express(&self, interest: Interest) -> BoxFuture<'static, (Interest, RequestOutcome)> {
        let transport = self.transport.clone();
        Box::pin(async move {
            let outcome = transport.express_interest(interest.clone()).await;
            (interest, outcome)
        })
    }

    /// Built once so every manifest request gets an identical answer.
    fn manifest_data(&self, name: &Name, total_bytes: u64, options: &PutOptions) -> Result<Data> {
        let manifest = Manifest::for_content(name.to_uri(), total_bytes, options.block_size)?;
        let mut data = Data::new(name.clone(), manifest.to_json()?)
            .with_freshness_period(options.freshness_period);
        self.signer.sign_data(&mut data, &options.signing_mode)?;
        Ok(data)
    }

    async fn serve_interest<R>(
        &self,
        name: &Name,
        window: &mut PresignWindow<R>,
        manifest_data: &Data,
        interest: Interest,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        if interest.name == *name {
            tracing::debug!("Serving manifest. name={}", name);
            return self.transport.put_data(manifest_data.clone()).await;
        }

        let segment = match interest.name.get(name.len()).map(|component| component.to_segment()) {
            Some(Ok(segment)) => segment,
            _ => {
                tracing::debug!("Ignoring interest without a segment. name={}", interest.name);
                return Ok(());
            }
        };

        match window.serve(segment).await? {
            Some(data) => self.transport.put_data(data).await,
            None => {
                tracing::debug!(
                    "Requested segment does not exist. name={} segment={}",
                    name,
                    segment
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::COMMAND_SIGNATURE_COMPONENTS;
    use crate::transport::MemoryNetwork;
    use crate::KeyChain;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    fn name(uri: &str) -> Name {
        Name::from_uri(uri).unwrap()
    }

    #[derive(Clone, Copy)]
    enum InsertReply {
        Accept,
        Reject(u32),
        Silent,
    }

    /// Repo stand-in that pulls every segment after the insert and answers
    /// checks with `counts[i]` (the last entry repeats).
    struct Scenario {
        insert: InsertReply,
        counts: Vec<u64>,
        check_status: u32,
        manifest_requests: u32,
        process_id: Option<u64>,
    }

    impl Scenario {
        fn accept(counts: Vec<u64>) -> Self {
            Self {
                insert: InsertReply::Accept,
                counts,
                check_status: 200,
                manifest_requests: 0,
                process_id: Some(17),
            }
        }
    }

    struct RepoHandle {
        inserts: Arc<AtomicU32>,
        manifests: mpsc::UnboundedReceiver<Data>,
    }

    async fn spawn_repo(network: &MemoryNetwork, scenario: Scenario) -> RepoHandle {
        let face = network.face();
        let mut commands = face.register_prefix(name("/repo")).await.unwrap();
        let inserts = Arc::new(AtomicU32::new(0));
        let (manifest_tx, manifests) = mpsc::unbounded_channel();
        let insert_counter = inserts.clone();

        tokio::spawn(async move {
            let mut checks = 0usize;
            while let Some(interest) = commands.recv().await {
                let unsigned = interest.name.prefix(interest.name.len() - COMMAND_SIGNATURE_COMPONENTS);
                let command = RepoCommand::parse(&unsigned, &name("/repo")).unwrap();
                let file = name(command.parameter.name.as_deref().unwrap());

                let response = match command.verb {
                    CommandVerb::Insert => {
                        insert_counter.fetch_add(1, Ordering::SeqCst);
                        match scenario.insert {
                            InsertReply::Silent => continue,
                            InsertReply::Reject(status) => RepoCommandResponse::with_status(status),
                            InsertReply::Accept => {
                                let fetcher = face.clone();
                                let manifest_tx = manifest_tx.clone();
                                let requests = scenario.manifest_requests;
                                tokio::spawn(async move {
                                    for _ in 0..requests.max(1) {
                                        if let RequestOutcome::Data(data) =
                                            fetcher.express_interest(Interest::new(file.clone())).await
                                        {
                                            let _ = manifest_tx.send(data);
                                        }
                                    }
                                    let mut segment = 0;
                                    loop {
                                        let outcome = fetcher
                                            .express_interest(Interest::new(file.clone().append_segment(segment)))
                                            .await;
                                        let RequestOutcome::Data(data) = outcome else { break };
                                        if data.is_final() {
                                            break;
                                        }
                                        segment += 1;
                                    }
                                });
                                let mut response = RepoCommandResponse::with_status(100);
                                response.process_id = scenario.process_id;
                                response
                            }
                        }
                    }
                    CommandVerb::InsertCheck => {
                        let count = scenario.counts[checks.min(scenario.counts.len() - 1)];
                        checks += 1;
                        let mut response = RepoCommandResponse::with_status(scenario.check_status);
                        response.insert_num = Some(count);
                        response
                    }
                    _ => RepoCommandResponse::with_status(405),
                };
                face.put_data(response.to_data(interest.name).unwrap()).await.unwrap();
            }
        });

        RepoHandle { inserts, manifests }
    }

    fn request(len: usize, options: PutOptions) -> PutFileOperationRequest<Cursor<Vec<u8>>> {
        PutFileOperationRequest {
            name: name("/files/blob"),
            repo_prefix: name("/repo"),
            input: Cursor::new((0..len).map(|i| (i % 251) as u8).collect()),
            options,
        }
    }

    fn small_blocks() -> PutOptions {
        PutOptions {
            block_size: 100,
            ..PutOptions::default()
        }
    }

    fn operation(network: &MemoryNetwork) -> PutFileOperation {
        PutFileOperation::new(Arc::new(network.face()), Arc::new(KeyChain::generate("/writer")))
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_completes_when_count_first_matches() {
        let network = MemoryNetwork::new();
        spawn_repo(&network, Scenario::accept(vec![0, 3, 9, 10, 10])).await;

        let result = operation(&network).run(request(1000, small_blocks())).await.unwrap();
        assert_eq!(result.segments, 10);
        assert_eq!(result.bytes, 1000);
        assert_eq!(result.process_id, 17);
        assert_eq!(result.checks, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_without_process_id_checks_process_zero() {
        let network = MemoryNetwork::new();
        let scenario = Scenario {
            process_id: None,
            ..Scenario::accept(vec![10])
        };
        spawn_repo(&network, scenario).await;

        let result = operation(&network).run(request(1000, small_blocks())).await.unwrap();
        assert_eq!(result.process_id, 0);
        assert_eq!(result.segments, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_count_polls_until_deadline() {
        let network = MemoryNetwork::new();
        spawn_repo(&network, Scenario::accept(vec![9])).await;

        let options = PutOptions {
            timeout: Some(Duration::from_millis(10_500)),
            ..small_blocks()
        };
        let err = operation(&network).run(request(1000, options)).await.unwrap_err();
        assert!(matches!(
            err,
            DifsError::DeadlineExceeded { deadline_ms: 10_500, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manifest_is_served_identically() {
        let network = MemoryNetwork::new();
        let mut scenario = Scenario::accept(vec![3]);
        scenario.manifest_requests = 3;
        let mut repo = spawn_repo(&network, scenario).await;

        let result = operation(&network).run(request(250, small_blocks())).await.unwrap();
        assert_eq!(result.segments, 3);

        let first = repo.manifests.recv().await.unwrap();
        let manifest: Manifest = serde_json::from_slice(&first.content).unwrap();
        assert_eq!(manifest.end_block_id, 2);
        assert!(manifest.repos.is_empty());
        for _ in 1..3 {
            assert_eq!(repo.manifests.recv().await.unwrap(), first);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_timeout_is_fatal_after_one_attempt() {
        let network = MemoryNetwork::new();
        let repo = spawn_repo(
            &network,
            Scenario {
                insert: InsertReply::Silent,
                ..Scenario::accept(vec![0])
            },
        )
        .await;

        let err = operation(&network).run(request(1000, small_blocks())).await.unwrap_err();
        assert!(matches!(err, DifsError::CommandLost { ref command, .. } if command == "insert"));
        assert_eq!(repo.inserts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_and_check_rejections() {
        let network = MemoryNetwork::new();
        spawn_repo(
            &network,
            Scenario {
                insert: InsertReply::Reject(403),
                ..Scenario::accept(vec![0])
            },
        )
        .await;
        let err = operation(&network).run(request(1000, small_blocks())).await.unwrap_err();
        assert!(matches!(
            err,
            DifsError::CommandRejected { ref command, status_code: 403, .. } if command == "insert"
        ));

        let network = MemoryNetwork::new();
        spawn_repo(
            &network,
            Scenario {
                check_status: 500,
                ..Scenario::accept(vec![0])
            },
        )
        .await;
        let err = operation(&network).run(request(1000, small_blocks())).await.unwrap_err();
        assert!(matches!(
            err,
            DifsError::CommandRejected { ref command, status_code: 500, .. } if command == "insert check"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unroutable_repo_loses_insert() {
        let network = MemoryNetwork::new();
        let err = operation(&network).run(request(10, small_blocks())).await.unwrap_err();
        assert!(matches!(err, DifsError::CommandLost { ref reason, .. } if reason.contains("no route")));
    }

    #[tokio::test]
    async fn test_empty_input_rejected_before_registration() {
        let network = MemoryNetwork::new();
        let err = operation(&network).run(request(0, small_blocks())).await.unwrap_err();
        assert!(err.is_protocol_violation());
        assert_eq!(network.expressed_count(), 0);
    }
}
