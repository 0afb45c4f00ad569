//! Local filesystem content backend

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use super::{ContentError, ContentService};

/// Stores files under `<base_dir>/<video_id>/<filename>` on the local
/// machine. Suitable for single-node deployments and tests.
#[derive(Debug, Clone)]
pub struct FsContentService {
    base_dir: PathBuf,
}

impl FsContentService {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl ContentService for FsContentService {
    async fn write(&self, video_id: &str, filename: &str, data: &[u8]) -> Result<(), ContentError> {
        let dir = self.base_dir.join(video_id);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(filename), data).await?;
        Ok(())
    }

    async fn read(&self, video_id: &str, filename: &str) -> Result<Vec<u8>, ContentError> {
        let data = fs::read(self.base_dir.join(video_id).join(filename)).await?;
        Ok(data)
    }
}
