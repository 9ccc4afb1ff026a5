use crate::retry::{AttemptResult, RetryPolicy};
use crate::transport::{Interest, RequestOutcome, Transport};
use crate::{Data, DifsError, Manifest, ReassemblyBuffer, Result, DEFAULT_INTEREST_LIFETIME};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;

#[derive(Clone)]
pub struct FetchFileOperation {
    transport: Arc<dyn Transport>,
}

#[derive(Debug, Clone)]
pub struct FetchFileOperationRequest {
    pub manifest: Manifest,
    pub interest_lifetime: Duration,
}

impl FetchFileOperationRequest {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            interest_lifetime: DEFAULT_INTEREST_LIFETIME,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSummary {
    pub segments: u64,
    pub bytes: u64,
}

/// Progress of one fetch: which segments are in and whether the last one
/// carried the final marker.
struct FetchState {
    buffer: ReassemblyBuffer,
    final_segment: u64,
    final_marked: bool,
}

impl FetchState {
    fn accept(&mut self, segment: u64, data: Data) -> Result<()> {
        let carried = data.segment()?;
        if carried != segment {
            return Err(DifsError::ProtocolViolation(format!(
                "requested segment {} but received {}",
                segment, data.name
            )));
        }
        if segment > self.final_segment {
            return Err(DifsError::ProtocolViolation(format!(
                "segment {} lies beyond final segment {}",
                segment, self.final_segment
            )));
        }
        if let Some(final_block_id) = data.final_block_id {
            if final_block_id < self.final_segment {
                return Err(DifsError::ProtocolViolation(format!(
                    "{} announces final block {} but the manifest ends at {}",
                    data.name, final_block_id, self.final_segment
                )));
            }
        }

        if segment == self.final_segment {
            self.final_marked = data.is_final();
        }
        if !self.buffer.insert(segment, data.content) {
            tracing::debug!("Ignoring duplicate segment. segment={}", segment);
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.buffer.is_complete(self.final_segment)
    }
}

async fn request_segment(
    transport: Arc<dyn Transport>,
    segment: u64,
    interest: Interest,
) -> (u64, Interest, RequestOutcome) {
    let outcome = transport.express_interest(interest.clone()).await;
    (segment, interest, outcome)
}

impl FetchFileOperation {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn run<W>(&self, request: FetchFileOperationRequest, sink: &mut W) -> Result<FetchSummary>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut retry = RetryPolicy::default();
        self.run_with_retry(request, sink, &mut retry).await
    }

    /// Every segment of every shard is requested at once; failures from
    /// all of them draw on the single `retry` budget.
    pub async fn run_with_retry<W>(
        &self,
        request: FetchFileOperationRequest,
        sink: &mut W,
        retry: &mut RetryPolicy,
    ) -> Result<FetchSummary>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let FetchFileOperationRequest {
            manifest,
            interest_lifetime,
        } = request;
        manifest.validate()?;
        let file_name = manifest.file_name()?;

        let mut in_flight = FuturesUnordered::new();
        for range in &manifest.repos {
            let repo = range.repo_name()?;
            for segment in range.segments() {
                let name = repo
                    .clone()
                    .append("data")
                    .concat(&file_name)
                    .append_segment(segment);
                let interest = Interest::new(name).with_lifetime(interest_lifetime);
                in_flight.push(request_segment(self.transport.clone(), segment, interest));
            }
        }
        tracing::debug!(
            "Fetching file. name={} segments={} shards={}",
            file_name,
            in_flight.len(),
            manifest.repos.len()
        );

        let mut state = FetchState {
            buffer: ReassemblyBuffer::new(),
            final_segment: manifest.end_block_id,
            final_marked: false,
        };

        while let Some((segment, interest, outcome)) = in_flight.next().await {
            match retry.handle_outcome(interest, outcome) {
                AttemptResult::Delivered(data) => {
                    tracing::debug!("Received segment. name={} bytes={}", data.name, data.content.len());
                    state.accept(segment, data)?;
                }
                AttemptResult::Reissue(interest) => {
                    in_flight.push(request_segment(self.transport.clone(), segment, interest));
                }
                AttemptResult::Exhausted(error) => return Err(error),
            }

            if state.is_complete() {
                break;
            }
        }

        if !state.is_complete() {
            return Err(DifsError::ProtocolViolation(format!(
                "fetch of {} ended with {} of {} segments",
                file_name,
                state.buffer.len(),
                manifest.segment_count()
            )));
        }
        if !state.final_marked {
            return Err(DifsError::ProtocolViolation(format!(
                "segment {} of {} is not marked final; the manifest understates the file",
                state.final_segment, file_name
            )));
        }

        let segments = state.buffer.len() as u64;
        let bytes = state.buffer.drain_into(sink).await?;
        tracing::info!(
            "Fetched file. name={} segments={} bytes={}",
            file_name,
            segments,
            bytes
        );
        Ok(FetchSummary { segments, bytes })
    }
}
