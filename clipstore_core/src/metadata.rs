//! Video metadata contract
//!
//! The catalog itself is an external collaborator; this module carries the
//! contract the HTTP front-end consumes plus an in-memory backend for
//! tests and embedding. Backends over a network should use short
//! request deadlines (2s for create/read, 3s for list).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

/// A catalog record: a video identifier and its upload timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub id: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    /// A record with this id already exists.
    #[error("video {0} already exists")]
    AlreadyExists(String),
    /// Backend-specific failure (connection, query, decode).
    #[error("metadata backend error: {0}")]
    Backend(String),
}

/// Key→timestamp store for the video catalog.
#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn create(&self, id: &str, uploaded_at: DateTime<Utc>) -> Result<(), MetadataError>;

    /// Returns `None` for an unknown id.
    async fn read(&self, id: &str) -> Result<Option<VideoMetadata>, MetadataError>;

    async fn list(&self) -> Result<Vec<VideoMetadata>, MetadataError>;
}

/// In-memory metadata backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadataService {
    records: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl MemoryMetadataService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataService for MemoryMetadataService {
    async fn create(&self, id: &str, uploaded_at: DateTime<Utc>) -> Result<(), MetadataError> {
        let mut records = self.records.write().await;
        if records.contains_key(id) {
            return Err(MetadataError::AlreadyExists(id.to_string()));
        }
        records.insert(id.to_string(), uploaded_at);
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<Option<VideoMetadata>, MetadataError> {
        let records = self.records.read().await;
        Ok(records.get(id).map(|ts| VideoMetadata {
            id: id.to_string(),
            uploaded_at: *ts,
        }))
    }

    async fn list(&self) -> Result<Vec<VideoMetadata>, MetadataError> {
        let records = self.records.read().await;
        let mut videos: Vec<VideoMetadata> = records
            .iter()
            .map(|(id, ts)| VideoMetadata {
                id: id.clone(),
                uploaded_at: *ts,
            })
            .collect();
        videos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(videos)
    }
}
