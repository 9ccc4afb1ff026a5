//! Look-ahead window of pre-signed segments for one file being written.

use crate::security::{Signer, SigningMode};
use crate::{Data, DifsError, Name, Result, PRE_SIGN_DATA_COUNT};
use bytes::BytesMut;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Segments are cut from the input lazily. A request for segment `k`
/// tops the window up to `[k, k + capacity)`; anything below `k` leaves the
/// window. Served and evicted segments stay answerable from a small
/// retransmission cache so a repeated request is not left hanging.
pub struct PresignWindow<R> {
    reader: BufReader<R>,
    file_name: Name,
    block_size: usize,
    freshness_period: Duration,
    signer: Arc<dyn Signer>,
    signing_mode: SigningMode,
    capacity: usize,
    pending: BTreeMap<u64, Data>,
    sent: BTreeMap<u64, Data>,
    next_segment: u64,
    final_segment: Option<u64>,
    bytes_read: u64,
}

impl<R: AsyncRead + Unpin> PresignWindow<R> {
    pub fn new(
        reader: R,
        file_name: Name,
        block_size: usize,
        freshness_period: Duration,
        signer: Arc<dyn Signer>,
        signing_mode: SigningMode,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            file_name,
            block_size,
            freshness_period,
            signer,
            signing_mode,
            capacity: PRE_SIGN_DATA_COUNT,
            pending: BTreeMap::new(),
            sent: BTreeMap::new(),
            next_segment: 0,
            final_segment: None,
            bytes_read: 0,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Segments cut from the input so far.
    pub fn produced(&self) -> u64 {
        self.next_segment
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Set once the input is exhausted.
    pub fn final_segment(&self) -> Option<u64> {
        self.final_segment
    }

    pub fn is_finished(&self) -> bool {
        self.final_segment.is_some()
    }

    /// Pre-signed segments not yet served.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn lowest(&self) -> Option<u64> {
        self.pending.keys().next().copied()
    }

    /// Top the window up for a request of `segment`, then hand out that
    /// segment if it exists. Past end-of-file this yields `None`.
    pub async fn serve(&mut self, segment: u64) -> Result<Option<Data>> {
        self.fill(segment).await?;

        let data = match self.pending.remove(&segment) {
            Some(data) => data,
            None => match self.sent.remove(&segment) {
                Some(data) => data,
                None => return Ok(None),
            },
        };

        let data = self.stamp_final_block(data)?;
        self.remember(segment, data.clone());
        Ok(Some(data))
    }

    async fn fill(&mut self, reference: u64) -> Result<()> {
        let stale: Vec<u64> = self.pending.range(..reference).map(|(segment, _)| *segment).collect();
        for segment in stale {
            if let Some(data) = self.pending.remove(&segment) {
                self.remember(segment, data);
            }
        }

        let horizon = reference.saturating_add(self.capacity as u64);
        while !self.is_finished() && self.next_segment < horizon {
            let data = self.cut_next_segment().await?;
            let segment = self.next_segment;
            self.next_segment += 1;
            if segment >= reference {
                self.pending.insert(segment, data);
            } else {
                self.remember(segment, data);
            }
        }
        Ok(())
    }

    async fn cut_next_segment(&mut self) -> Result<Data> {
        let segment = self.next_segment;
        let mut buffer = BytesMut::zeroed(self.block_size);
        let mut filled = 0;
        while filled < self.block_size {
            let read = self.reader.read(&mut buffer[filled..]).await.map_err(|error| {
                DifsError::ProtocolViolation(format!(
                    "error reading segment {} of {}: {}",
                    segment, self.file_name, error
                ))
            })?;
            if read == 0 {
                break;
            }
            filled += read;
        }

        if filled == 0 {
            return Err(DifsError::ProtocolViolation(format!(
                "input for {} ended before segment {}",
                self.file_name, segment
            )));
        }
        buffer.truncate(filled);
        self.bytes_read += filled as u64;

        let at_eof = self
            .reader
            .fill_buf()
            .await
            .map_err(|error| {
                DifsError::ProtocolViolation(format!("error reading {}: {}", self.file_name, error))
            })?
            .is_empty();

        let mut data = Data::new(self.file_name.clone().append_segment(segment), buffer.freeze())
            .with_freshness_period(self.freshness_period);
        if at_eof {
            data.final_block_id = Some(segment);
            self.final_segment = Some(segment);
            tracing::debug!(
                "Reached end of input. name={} final_segment={} bytes={}",
                self.file_name,
                segment,
                self.bytes_read
            );
        }

        self.signer.sign_data(&mut data, &self.signing_mode)?;
        Ok(data)
    }

    /// Once the end is known every served segment announces it.
    fn stamp_final_block(&self, mut data: Data) -> Result<Data> {
        let Some(final_segment) = self.final_segment else {
            return Ok(data);
        };
        if data.final_block_id != Some(final_segment) {
            data.final_block_id = Some(final_segment);
            self.signer.sign_data(&mut data, &self.signing_mode)?;
        }
        Ok(data)
    }

    fn remember(&mut self, segment: u64, data: Data) {
        self.sent.insert(segment, data);
        while self.sent.len() > self.capacity * 2 {
            self.sent.pop_first();
        }
    }
}
