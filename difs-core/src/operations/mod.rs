pub mod delete_file;
pub mod fetch_file;
pub mod get_file;
pub mod put_file;
pub mod resolve_manifest;

pub use delete_file::{DeleteFileOperation, DeleteFileOperationOutcome, DeleteFileOperationRequest};
pub use fetch_file::{FetchFileOperation, FetchFileOperationRequest, FetchSummary};
pub use get_file::{GetFileOperation, GetFileOperationOutcome, GetFileOperationRequest};
pub use put_file::{PutFileOperation, PutFileOperationRequest, PutFileOperationResult, PutOptions};
pub use resolve_manifest::{
    ResolveManifestOperation, ResolveManifestOperationOutcome, ResolveManifestOperationRequest,
};
