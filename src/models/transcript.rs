// src/models/transcript.rs
//! Transcript data model.
//!
//! A transcript is a credential record pointing to off-chain content through
//! two IPFS URIs. Only the URIs are tracked here; the content itself is never
//! fetched or stored by this service.

use serde::{Deserialize, Serialize};

/// A student's transcript registered with the service.
///
/// `transcript_id`, `ipfs_uri_metadata` and `ipfs_uri_media_hash` are each
/// unique across all transcripts. Records are immutable once created.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// Unique identifier for the transcript
    pub transcript_id: String,

    /// IPFS URI of the transcript metadata document
    /// Example: "ipfs://bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi"
    pub ipfs_uri_metadata: String,

    /// IPFS URI of the media itself (PDF, image, ...)
    pub ipfs_uri_media_hash: String,

    /// Wallet address of the student who owns the transcript
    pub owner_wallet: String,
}

impl Transcript {
    /// True when `uri` is exactly one of this transcript's URIs.
    pub fn has_uri(&self, uri: &str) -> bool {
        self.ipfs_uri_metadata == uri || self.ipfs_uri_media_hash == uri
    }

    /// True when the two records would violate a uniqueness constraint.
    pub fn collides_with(&self, other: &Transcript) -> bool {
        self.transcript_id == other.transcript_id
            || other.has_uri(&self.ipfs_uri_metadata)
            || other.has_uri(&self.ipfs_uri_media_hash)
    }
}
