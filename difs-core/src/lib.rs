//! DIFS Core - segmented, signed file transfer over a named request/response network
//!
//! A file is cut into fixed-size signed segments named `<file>/<segment>`.
//! Readers resolve a manifest from a repo and pull every segment back,
//! possibly from several repo shards. Writers serve segments on demand and
//! confirm durability with an insert / insert-check handshake.

pub mod chunk;
pub mod command;
pub mod error;
pub mod manifest;
pub mod name;
pub mod operations;
pub mod reassembly;
pub mod retry;
pub mod security;
pub mod transport;
pub mod window;

use std::time::Duration;

pub use chunk::{Data, SignatureInfo, SignatureType};
pub use command::{CommandVerb, RepoCommand, RepoCommandParameter, RepoCommandResponse};
pub use error::{DifsError, Result};
pub use manifest::{Manifest, ShardRange};
pub use name::{Component, Name};
pub use operations::{
    DeleteFileOperation, DeleteFileOperationOutcome, DeleteFileOperationRequest, FetchFileOperation,
    FetchFileOperationRequest, FetchSummary, GetFileOperation, GetFileOperationOutcome,
    GetFileOperationRequest, PutFileOperation, PutFileOperationRequest, PutFileOperationResult,
    PutOptions, ResolveManifestOperation, ResolveManifestOperationOutcome,
    ResolveManifestOperationRequest,
};
pub use reassembly::ReassemblyBuffer;
pub use retry::{AttemptResult, RetryPolicy, RetryState};
pub use security::{KeyChain, Signer, SigningMode};
pub use transport::{Interest, MemoryFace, MemoryNetwork, NackReason, RequestOutcome, Transport};
pub use window::PresignWindow;

pub const DEFAULT_BLOCK_SIZE: usize = 1000;
pub const DEFAULT_INTEREST_LIFETIME: Duration = Duration::from_millis(4000);
pub const DEFAULT_FRESHNESS_PERIOD: Duration = Duration::from_millis(10000);
pub const DEFAULT_CHECK_PERIOD: Duration = Duration::from_millis(1000);
pub const PRE_SIGN_DATA_COUNT: usize = 11;
pub const MAX_RETRY: u32 = 3;
