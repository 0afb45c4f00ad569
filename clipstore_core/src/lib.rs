//! clipstore: distributed content layer for a video-on-demand service
//!
//! Transcoded segment files are sharded across a fleet of storage nodes by
//! a consistent-hash ring. The router streams content to and from the
//! owning node; the admin service adds and removes nodes online, migrating
//! the affected keys before a topology change becomes visible.

pub mod config;
pub mod content;
pub mod log;
pub mod metadata;
pub mod ring;
pub mod rpc;
pub mod storage;

pub use config::{ConfigError, RouterConfig, StorageNodeConfig};
pub use content::{ContentError, ContentService, FsContentService, NetworkContentService};
pub use metadata::{MemoryMetadataService, MetadataError, MetadataService, VideoMetadata};
pub use ring::{Ring, RingError};
pub use storage::StorageNode;
