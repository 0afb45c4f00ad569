//! Upstream content contract
//!
//! The HTTP front-end consumes content through this trait; the filesystem
//! backend serves single-machine deployments and the network backend
//! shards across a storage fleet.

pub mod fs;
pub mod network;

use async_trait::async_trait;
use thiserror::Error;

pub use fs::FsContentService;
pub use network::NetworkContentService;

/// Errors surfaced by content backends.
#[derive(Debug, Error)]
pub enum ContentError {
    /// No nodes in the ring; nothing can be routed.
    #[error("no storage nodes available")]
    EmptyRing,
    /// The ring resolved to an address with no pooled client.
    #[error("no client for node {0}")]
    UnknownNode(String),
    #[error(transparent)]
    Ring(#[from] crate::ring::RingError),
    /// RPC dial failure.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    /// RPC call or stream failure.
    #[error("rpc error: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The node completed the stream but did not acknowledge the upload.
    #[error("upload not acknowledged for {key}")]
    UploadRejected { key: String },
    /// The migration pipe task died before producing an ack.
    #[error("migration pipe failed: {0}")]
    Pipe(String),
}

impl ContentError {
    /// Whether the error denotes a missing object rather than a fault.
    pub fn is_not_found(&self) -> bool {
        match self {
            ContentError::Rpc(status) => status.code() == tonic::Code::NotFound,
            ContentError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Read/Write access to stored video files, keyed by (video_id, filename).
#[async_trait]
pub trait ContentService: Send + Sync {
    /// Store a file. Writes of raw `.mp4` sources may be discarded by
    /// policy; callers treat a clean return as success either way.
    async fn write(&self, video_id: &str, filename: &str, data: &[u8]) -> Result<(), ContentError>;

    /// Fetch a whole file.
    async fn read(&self, video_id: &str, filename: &str) -> Result<Vec<u8>, ContentError>;
}
