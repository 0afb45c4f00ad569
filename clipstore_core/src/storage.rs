//! Per-node storage RPC service
//!
//! Persists files under `<base_dir>/<video_id>/<filename>` and maintains an
//! in-memory index of the (video_id, filename) pairs accepted via upload.
//! The index is not rebuilt from disk at startup; it reflects observed
//! uploads only.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

use crate::rpc::proto::storage_server::{Storage, StorageServer};
use crate::rpc::proto::{
    BatchDeleteRequest, DeleteFileResponse, FileChunk, FileRequest, ListVideoFilesRequest,
    ListVideoFilesResponse, ListVideosRequest, ListVideosResponse, UploadAck,
};
use crate::rpc::{CHUNK_SIZE, MAX_MESSAGE_SIZE};

type VideoIndex = HashMap<String, Vec<String>>;

/// Storage node service. Exclusively owns its base directory and index.
#[derive(Debug, Clone)]
pub struct StorageNode {
    base_dir: PathBuf,
    index: Arc<RwLock<VideoIndex>>,
}

impl StorageNode {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            index: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Serve the storage RPC on an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), tonic::transport::Error> {
        Server::builder()
            .add_service(
                StorageServer::new(self)
                    .max_decoding_message_size(MAX_MESSAGE_SIZE)
                    .max_encoding_message_size(MAX_MESSAGE_SIZE),
            )
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
    }

    fn file_path(&self, video_id: &str, filename: &str) -> PathBuf {
        self.base_dir.join(video_id).join(filename)
    }

    /// Open the destination file for an upload, creating parent directories.
    async fn create_file(&self, path: &PathBuf) -> Result<fs::File, Status> {
        if let Some(parent) = path.parent() {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            builder.mode(0o755);
            builder
                .create(parent)
                .await
                .map_err(|e| Status::internal(format!("mkdir failed: {}", e)))?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o644);
        options
            .open(path)
            .await
            .map_err(|e| Status::internal(format!("file create failed: {}", e)))
    }
}

#[tonic::async_trait]
impl Storage for StorageNode {
    /// Client-streaming upload. The first chunk establishes the
    /// (video_id, filename) identifiers; the index is updated only once the
    /// whole stream has been written, so a disconnect mid-stream leaves a
    /// partial file on disk and no index entry.
    async fn upload(
        &self,
        request: Request<Streaming<FileChunk>>,
    ) -> Result<Response<UploadAck>, Status> {
        let mut stream = request.into_inner();

        let mut file: Option<fs::File> = None;
        let mut video_id = String::new();
        let mut filename = String::new();

        while let Some(chunk) = stream.message().await? {
            if file.is_none() {
                video_id = chunk.video_id.clone();
                filename = chunk.filename.clone();
                let path = self.file_path(&video_id, &filename);
                let created = self.create_file(&path).await?;
                tracing::info!("upload started: {}", path.display());
                file = Some(created);
            }
            if let Some(dst) = file.as_mut() {
                dst.write_all(&chunk.data)
                    .await
                    .map_err(|e| Status::internal(format!("write failed: {}", e)))?;
            }
        }

        let mut dst =
            file.ok_or_else(|| Status::invalid_argument("upload stream carried no chunks"))?;
        dst.flush()
            .await
            .map_err(|e| Status::internal(format!("flush failed: {}", e)))?;
        drop(dst);

        {
            let mut index = self.index.write().await;
            let files = index.entry(video_id.clone()).or_default();
            if !files.iter().any(|f| f == &filename) {
                files.push(filename.clone());
            }
        }

        tracing::info!("upload completed: {}/{}", video_id, filename);
        Ok(Response::new(UploadAck { success: true }))
    }

    type DownloadStream = ReceiverStream<Result<FileChunk, Status>>;

    /// Server-streaming download in chunks of up to 1 MiB, FIFO with the
    /// file's byte order.
    async fn download(
        &self,
        request: Request<FileRequest>,
    ) -> Result<Response<Self::DownloadStream>, Status> {
        let req = request.into_inner();
        let path = self.file_path(&req.video_id, &req.filename);

        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| Status::not_found(format!("open error: {}", e)))?;

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                match file.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = FileChunk {
                            video_id: req.video_id.clone(),
                            filename: req.filename.clone(),
                            data: buf[..n].to_vec(),
                        };
                        if tx.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(Status::internal(format!("read error: {}", e))))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn list_videos(
        &self,
        _request: Request<ListVideosRequest>,
    ) -> Result<Response<ListVideosResponse>, Status> {
        let index = self.index.read().await;
        Ok(Response::new(ListVideosResponse {
            video_ids: index.keys().cloned().collect(),
        }))
    }

    async fn list_video_files(
        &self,
        request: Request<ListVideoFilesRequest>,
    ) -> Result<Response<ListVideoFilesResponse>, Status> {
        let req = request.into_inner();
        let index = self.index.read().await;
        Ok(Response::new(ListVideoFilesResponse {
            filenames: index.get(&req.video_id).cloned().unwrap_or_default(),
        }))
    }

    /// Batch delete. Atomic with respect to the index lock, not with
    /// respect to disk: filenames whose removal succeeds are dropped from
    /// the index, the rest stay. Success only when every requested
    /// filename came off disk.
    async fn delete_files(
        &self,
        request: Request<BatchDeleteRequest>,
    ) -> Result<Response<DeleteFileResponse>, Status> {
        let req = request.into_inner();
        let dir = self.base_dir.join(&req.video_id);

        let mut index = self.index.write().await;
        let current = match index.get(&req.video_id) {
            Some(files) => files.clone(),
            None => {
                tracing::warn!("delete: video {} not found in index", req.video_id);
                return Ok(Response::new(DeleteFileResponse { success: false }));
            }
        };

        let mut removed = HashSet::new();
        for fname in &req.filenames {
            let path = dir.join(fname);
            match fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::info!("deleted {}", path.display());
                    removed.insert(fname.clone());
                }
                Err(e) => {
                    tracing::warn!("failed to remove {}: {}", path.display(), e);
                }
            }
        }

        let remaining: Vec<String> = current
            .into_iter()
            .filter(|f| !removed.contains(f))
            .collect();
        if remaining.is_empty() {
            index.remove(&req.video_id);
        } else {
            index.insert(req.video_id.clone(), remaining);
        }

        let all_deleted = removed.len() == req.filenames.len();
        Ok(Response::new(DeleteFileResponse {
            success: all_deleted,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn seed_file(node: &StorageNode, video_id: &str, filename: &str, data: &[u8]) {
        let path = node.file_path(video_id, filename);
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(&path, data).await.unwrap();
        let mut index = node.index.write().await;
        index
            .entry(video_id.to_string())
            .or_default()
            .push(filename.to_string());
    }

    fn node() -> (StorageNode, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (StorageNode::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn test_download_streams_file_in_order() {
        let (node, _dir) = node();
        // Three full chunks plus a short tail.
        let payload: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        seed_file(&node, "alpha", "seg-0.m4s", &payload).await;

        let resp = node
            .download(Request::new(FileRequest {
                video_id: "alpha".to_string(),
                filename: "seg-0.m4s".to_string(),
            }))
            .await
            .unwrap();

        let mut stream = resp.into_inner().into_inner();
        let mut data = Vec::new();
        let mut chunks = 0;
        while let Some(chunk) = stream.recv().await {
            let chunk = chunk.unwrap();
            assert!(chunk.data.len() <= CHUNK_SIZE);
            data.extend_from_slice(&chunk.data);
            chunks += 1;
        }
        assert_eq!(chunks, 4);
        assert_eq!(data, payload);
    }

    #[tokio::test]
    async fn test_download_missing_file_fails() {
        let (node, _dir) = node();
        let result = node
            .download(Request::new(FileRequest {
                video_id: "alpha".to_string(),
                filename: "missing.m4s".to_string(),
            }))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_videos_and_files() {
        let (node, _dir) = node();
        seed_file(&node, "alpha", "manifest.mpd", b"a").await;
        seed_file(&node, "alpha", "seg-1.m4s", b"b").await;
        seed_file(&node, "beta", "seg-1.m4s", b"c").await;

        let videos = node
            .list_videos(Request::new(ListVideosRequest {}))
            .await
            .unwrap()
            .into_inner();
        let mut ids = videos.video_ids;
        ids.sort();
        assert_eq!(ids, vec!["alpha", "beta"]);

        let files = node
            .list_video_files(Request::new(ListVideoFilesRequest {
                video_id: "alpha".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(files.filenames, vec!["manifest.mpd", "seg-1.m4s"]);

        let unknown = node
            .list_video_files(Request::new(ListVideoFilesRequest {
                video_id: "nope".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(unknown.filenames.is_empty());
    }

    #[tokio::test]
    async fn test_delete_files_removes_disk_and_index() {
        let (node, _dir) = node();
        seed_file(&node, "alpha", "seg-0.m4s", b"x").await;
        seed_file(&node, "alpha", "seg-1.m4s", b"y").await;

        let resp = node
            .delete_files(Request::new(BatchDeleteRequest {
                video_id: "alpha".to_string(),
                filenames: vec!["seg-0.m4s".to_string()],
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.success);
        assert!(!node.file_path("alpha", "seg-0.m4s").exists());
        assert!(node.file_path("alpha", "seg-1.m4s").exists());

        let files = node
            .list_video_files(Request::new(ListVideoFilesRequest {
                video_id: "alpha".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(files.filenames, vec!["seg-1.m4s"]);
    }

    #[tokio::test]
    async fn test_delete_last_file_drops_video_entry() {
        let (node, _dir) = node();
        seed_file(&node, "alpha", "seg-0.m4s", b"x").await;

        let resp = node
            .delete_files(Request::new(BatchDeleteRequest {
                video_id: "alpha".to_string(),
                filenames: vec!["seg-0.m4s".to_string()],
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.success);

        let videos = node
            .list_videos(Request::new(ListVideosRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert!(videos.video_ids.is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_video_is_not_an_error() {
        let (node, dir) = node();
        // A file on disk that the index never saw must not be touched.
        let stray = dir.path().join("ghost").join("seg-0.m4s");
        fs::create_dir_all(stray.parent().unwrap()).await.unwrap();
        fs::write(&stray, b"z").await.unwrap();

        let resp = node
            .delete_files(Request::new(BatchDeleteRequest {
                video_id: "ghost".to_string(),
                filenames: vec!["seg-0.m4s".to_string()],
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!resp.success);
        assert!(stray.exists());
    }

    #[tokio::test]
    async fn test_delete_partial_failure_keeps_missing_filenames() {
        let (node, _dir) = node();
        seed_file(&node, "alpha", "seg-0.m4s", b"x").await;
        // Indexed but already gone from disk.
        {
            let mut index = node.index.write().await;
            index
                .get_mut("alpha")
                .unwrap()
                .push("vanished.m4s".to_string());
        }

        let resp = node
            .delete_files(Request::new(BatchDeleteRequest {
                video_id: "alpha".to_string(),
                filenames: vec!["seg-0.m4s".to_string(), "vanished.m4s".to_string()],
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!resp.success);

        let files = node
            .list_video_files(Request::new(ListVideoFilesRequest {
                video_id: "alpha".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(files.filenames, vec!["vanished.m4s"]);
    }
}
