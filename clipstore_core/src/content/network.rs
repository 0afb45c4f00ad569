//! Sharded network content backend and admin controller
//!
//! Routes each (video_id, filename) key to the storage node owning it on
//! the consistent-hash ring and streams content to and from that node.
//! The same service implements the admin RPC: AddNode and RemoveNode
//! mutate the ring under its exclusive lock and migrate the affected keys
//! before returning, so no client read or write ever observes a partially
//! moved key set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::{Channel, Endpoint, Server};
use tonic::{Request, Response, Status};

use super::{ContentError, ContentService};
use crate::ring::{in_range_exclusive, token_of, Ring};
use crate::rpc::proto::content_admin_server::{ContentAdmin, ContentAdminServer};
use crate::rpc::proto::storage_client::StorageClient;
use crate::rpc::proto::{
    AddNodeRequest, AddNodeResponse, BatchDeleteRequest, FileChunk, FileRequest,
    ListNodesRequest, ListNodesResponse, ListVideoFilesRequest, ListVideosRequest,
    RemoveNodeRequest, RemoveNodeResponse,
};
use crate::rpc::{CHUNK_SIZE, MAX_MESSAGE_SIZE};

/// Ring plus the pooled, long-lived client per member address. Guarded by
/// a single reader-writer lock: Read/Write take it shared while resolving
/// an owner, admin operations take it exclusive for their full duration.
struct ShardState {
    ring: Ring,
    clients: HashMap<String, StorageClient<Channel>>,
}

/// Content router over a fleet of storage nodes.
#[derive(Clone)]
pub struct NetworkContentService {
    shard: Arc<RwLock<ShardState>>,
}

async fn connect_node(addr: &str) -> Result<StorageClient<Channel>, ContentError> {
    let endpoint = Endpoint::from_shared(format!("http://{}", addr))?;
    let channel = endpoint.connect().await?;
    Ok(StorageClient::new(channel)
        .max_decoding_message_size(MAX_MESSAGE_SIZE)
        .max_encoding_message_size(MAX_MESSAGE_SIZE))
}

impl NetworkContentService {
    /// Dial the initial fleet and build the ring.
    pub async fn new(addresses: &[String]) -> Result<Self, ContentError> {
        let mut ring = Ring::new();
        let mut clients = HashMap::new();

        for addr in addresses {
            let client = connect_node(addr).await.map_err(|e| {
                tracing::error!("failed to connect to {}: {}", addr, e);
                e
            })?;
            ring.insert(addr)?;
            clients.insert(addr.clone(), client);
        }

        tracing::info!("content router initialized with {} nodes", ring.len());
        Ok(Self {
            shard: Arc::new(RwLock::new(ShardState { ring, clients })),
        })
    }

    /// Serve the admin RPC on an already-bound listener.
    pub async fn serve_admin(self, listener: TcpListener) -> Result<(), tonic::transport::Error> {
        tracing::info!(
            "admin service listening at {:?}",
            listener.local_addr().ok()
        );
        Server::builder()
            .add_service(ContentAdminServer::new(self))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
    }

    /// Resolve the owner of `key` and hand back its pooled client. Only the
    /// ring's read lock is held; the outbound RPC runs without it.
    async fn client_for_key(
        &self,
        key: &str,
    ) -> Result<(StorageClient<Channel>, String), ContentError> {
        let shard = self.shard.read().await;
        let addr = shard
            .ring
            .owner(key)
            .ok_or(ContentError::EmptyRing)?
            .to_string();
        let client = shard
            .clients
            .get(&addr)
            .cloned()
            .ok_or_else(|| ContentError::UnknownNode(addr.clone()))?;
        Ok((client, addr))
    }
}

#[async_trait]
impl ContentService for NetworkContentService {
    async fn write(&self, video_id: &str, filename: &str, data: &[u8]) -> Result<(), ContentError> {
        // Raw source files are discarded by design; only transcoded
        // artifacts are stored.
        if filename.ends_with(".mp4") {
            tracing::info!("skipping storage of raw source file: {}", filename);
            return Ok(());
        }

        let key = format!("{}/{}", video_id, filename);
        let (mut client, addr) = self.client_for_key(&key).await?;
        tracing::debug!("write {} to node {}", key, addr);

        let mut chunks: Vec<FileChunk> = data
            .chunks(CHUNK_SIZE)
            .map(|part| FileChunk {
                video_id: video_id.to_string(),
                filename: filename.to_string(),
                data: part.to_vec(),
            })
            .collect();
        // A zero-length file still needs one chunk to carry the identifiers.
        if chunks.is_empty() {
            chunks.push(FileChunk {
                video_id: video_id.to_string(),
                filename: filename.to_string(),
                data: Vec::new(),
            });
        }

        let ack = client
            .upload(tokio_stream::iter(chunks))
            .await?
            .into_inner();
        if !ack.success {
            return Err(ContentError::UploadRejected { key });
        }
        Ok(())
    }

    async fn read(&self, video_id: &str, filename: &str) -> Result<Vec<u8>, ContentError> {
        let key = format!("{}/{}", video_id, filename);
        let (mut client, addr) = self.client_for_key(&key).await?;
        tracing::debug!("read {} from node {}", key, addr);

        let mut stream = client
            .download(FileRequest {
                video_id: video_id.to_string(),
                filename: filename.to_string(),
            })
            .await?
            .into_inner();

        let mut data = Vec::new();
        while let Some(chunk) = stream.message().await? {
            data.extend_from_slice(&chunk.data);
        }
        Ok(data)
    }
}

#[tonic::async_trait]
impl ContentAdmin for NetworkContentService {
    /// Insert a node into the ring, then pull the keys it now owns from
    /// its successor. The exclusive lock is held for the whole operation;
    /// per-file migration failures are logged and skipped so the file
    /// stays available on the successor.
    async fn add_node(
        &self,
        request: Request<AddNodeRequest>,
    ) -> Result<Response<AddNodeResponse>, Status> {
        let new_addr = request.into_inner().node_address;
        let mut shard = self.shard.write().await;

        if shard.ring.contains(&new_addr) {
            tracing::warn!("add_node: node {} already exists", new_addr);
            return Err(Status::already_exists("node already exists"));
        }

        let new_client = connect_node(&new_addr)
            .await
            .map_err(|e| Status::unavailable(format!("failed to connect to new node: {}", e)))?;
        let new_token = shard
            .ring
            .insert(&new_addr)
            .map_err(|e| Status::internal(e.to_string()))?;
        shard.clients.insert(new_addr.clone(), new_client.clone());

        let (pred_token, succ_token) = shard
            .ring
            .neighbors(new_token)
            .ok_or_else(|| Status::internal("inserted token missing from ring"))?;
        let succ_addr = shard
            .ring
            .addr_of(succ_token)
            .ok_or_else(|| Status::internal("successor token has no address"))?
            .to_string();

        tracing::info!(
            "add_node: {} (token {}), predecessor token {}, successor {} (token {})",
            new_addr,
            new_token,
            pred_token,
            succ_addr,
            succ_token
        );

        if shard.ring.len() == 1 || succ_addr == new_addr {
            tracing::info!("add_node: single node configuration, skipping migration");
            return Ok(Response::new(AddNodeResponse {
                migrated_file_count: 0,
            }));
        }

        let mut succ_client = shard
            .clients
            .get(&succ_addr)
            .cloned()
            .ok_or_else(|| Status::internal(format!("no client for node {}", succ_addr)))?;

        let mut migrated = 0i32;
        let videos = succ_client
            .list_videos(ListVideosRequest {})
            .await
            .map_err(|e| Status::internal(format!("list videos failed: {}", e)))?
            .into_inner();

        for vid in videos.video_ids {
            let files = match succ_client
                .list_video_files(ListVideoFilesRequest {
                    video_id: vid.clone(),
                })
                .await
            {
                Ok(resp) => resp.into_inner().filenames,
                Err(e) => {
                    tracing::warn!("add_node: listing files for {} failed: {}", vid, e);
                    continue;
                }
            };

            let mut migrated_filenames = Vec::new();
            for fname in files {
                let key_hash = token_of(&format!("{}/{}", vid, fname));
                if !in_range_exclusive(pred_token, new_token, key_hash) {
                    continue;
                }
                match migrate_file(&vid, &fname, succ_client.clone(), new_client.clone()).await {
                    Ok(()) => {
                        migrated_filenames.push(fname);
                        migrated += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "add_node: failed to migrate {}/{}, leaving it on {}: {}",
                            vid,
                            fname,
                            succ_addr,
                            e
                        );
                    }
                }
            }

            if !migrated_filenames.is_empty() {
                if let Err(e) = succ_client
                    .delete_files(BatchDeleteRequest {
                        video_id: vid.clone(),
                        filenames: migrated_filenames,
                    })
                    .await
                {
                    tracing::warn!("add_node: delete on {} for video {} failed: {}", succ_addr, vid, e);
                }
            }
        }

        tracing::info!(
            "add_node: finished adding {}, migrated {} files from {}",
            new_addr,
            migrated,
            succ_addr
        );
        Ok(Response::new(AddNodeResponse {
            migrated_file_count: migrated,
        }))
    }

    /// Move everything off the departing node to its successor, then drop
    /// it from the ring.
    async fn remove_node(
        &self,
        request: Request<RemoveNodeRequest>,
    ) -> Result<Response<RemoveNodeResponse>, Status> {
        let remove_addr = request.into_inner().node_address;
        let mut shard = self.shard.write().await;

        if shard.ring.len() <= 1 {
            return Err(Status::failed_precondition(
                "cannot remove the last storage node",
            ));
        }
        let remove_token = shard
            .ring
            .token(&remove_addr)
            .ok_or_else(|| Status::not_found("node does not exist"))?;

        let (_, succ_token) = shard
            .ring
            .neighbors(remove_token)
            .ok_or_else(|| Status::internal("member token missing from ring"))?;
        let succ_addr = shard
            .ring
            .addr_of(succ_token)
            .ok_or_else(|| Status::internal("successor token has no address"))?
            .to_string();

        let mut src_client = shard
            .clients
            .get(&remove_addr)
            .cloned()
            .ok_or_else(|| Status::internal(format!("no client for node {}", remove_addr)))?;
        let succ_client = shard
            .clients
            .get(&succ_addr)
            .cloned()
            .ok_or_else(|| Status::internal(format!("no client for node {}", succ_addr)))?;

        let mut migrated = 0i32;
        let videos = src_client
            .list_videos(ListVideosRequest {})
            .await
            .map_err(|e| Status::internal(format!("list videos failed: {}", e)))?
            .into_inner();

        for vid in videos.video_ids {
            let files = match src_client
                .list_video_files(ListVideoFilesRequest {
                    video_id: vid.clone(),
                })
                .await
            {
                Ok(resp) => resp.into_inner().filenames,
                Err(e) => {
                    tracing::warn!("remove_node: listing files for {} failed: {}", vid, e);
                    continue;
                }
            };

            for fname in files {
                match migrate_file(&vid, &fname, src_client.clone(), succ_client.clone()).await {
                    Ok(()) => migrated += 1,
                    Err(e) => {
                        tracing::warn!(
                            "remove_node: failed to migrate {}/{}: {}",
                            vid,
                            fname,
                            e
                        );
                    }
                }
            }
        }

        shard
            .ring
            .remove(&remove_addr)
            .map_err(|e| Status::internal(e.to_string()))?;
        shard.clients.remove(&remove_addr);

        tracing::info!(
            "remove_node: removed {} (token {}), migrated {} files to {}",
            remove_addr,
            remove_token,
            migrated,
            succ_addr
        );
        Ok(Response::new(RemoveNodeResponse {
            migrated_file_count: migrated,
        }))
    }

    async fn list_nodes(
        &self,
        _request: Request<ListNodesRequest>,
    ) -> Result<Response<ListNodesResponse>, Status> {
        let shard = self.shard.read().await;
        Ok(Response::new(ListNodesResponse {
            nodes: shard.ring.addresses(),
        }))
    }
}

/// Synchronously copy one file between nodes: pipe the download stream
/// into an upload stream and wait for the destination's ack. The caller
/// deletes the source copy afterwards.
async fn migrate_file(
    video_id: &str,
    filename: &str,
    mut from: StorageClient<Channel>,
    mut to: StorageClient<Channel>,
) -> Result<(), ContentError> {
    tracing::debug!("migrating {}/{}", video_id, filename);

    let mut download = from
        .download(FileRequest {
            video_id: video_id.to_string(),
            filename: filename.to_string(),
        })
        .await?
        .into_inner();

    let (tx, rx) = mpsc::channel::<FileChunk>(4);
    let upload = tokio::spawn(async move { to.upload(ReceiverStream::new(rx)).await });

    let mut sent_any = false;
    loop {
        match download.message().await {
            Ok(Some(chunk)) => {
                sent_any = true;
                if tx.send(chunk).await.is_err() {
                    // Upload side hung up; surface its error below.
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                // Abort rather than close the channel: a clean end-of-stream
                // here would make the destination index a truncated file.
                upload.abort();
                return Err(e.into());
            }
        }
    }
    // A zero-byte file downloads as zero chunks; the upload still needs one
    // chunk to carry the identifiers.
    if !sent_any {
        let _ = tx
            .send(FileChunk {
                video_id: video_id.to_string(),
                filename: filename.to_string(),
                data: Vec::new(),
            })
            .await;
    }
    drop(tx);

    let ack = match upload.await {
        Ok(result) => result?.into_inner(),
        Err(e) => return Err(ContentError::Pipe(e.to_string())),
    };
    if !ack.success {
        return Err(ContentError::UploadRejected {
            key: format!("{}/{}", video_id, filename),
        });
    }
    Ok(())
}
