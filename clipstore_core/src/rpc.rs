//! Wire protocol for inter-node and admin communication
//!
//! This module exposes the tonic-generated types for the `Storage` and
//! `ContentAdmin` services, plus the framing constants shared by every
//! sender and receiver.

// Include the generated protobuf code
pub mod proto {
    tonic::include_proto!("clipstore");
}

/// Canonical payload size per `FileChunk`. The last chunk of a transfer
/// may be short.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Upper bound a receiver must tolerate for a single message.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;
