//! Binary artifact resolution and verification
//!
//! The engine is distributed as a prebuilt archive pinned by release tag and
//! SHA-256 digest. This module owns the pinned manifest, the digest helpers,
//! and the fetch-and-verify pipeline used by the build script.

pub mod digest;
pub mod fetch;
pub mod layout;
pub mod manifest;

pub use fetch::{fetch_verified, ArtifactFetcher, HttpFetcher};
pub use layout::{find_library_dir, LinkKind};
pub use manifest::{
    asset_for, release_url, ReleaseAsset, ENGINE_RELEASE_TAG, RELEASE_ASSETS, UPSTREAM_REPO_URL,
};

/// Errors from artifact resolution and verification.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// No prebuilt archive is published for the requested target triple.
    #[error("no prebuilt engine asset for target {target}")]
    UnsupportedTarget { target: String },

    /// The artifact could not be downloaded.
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The release asset does not exist (HTTP 404).
    #[error("artifact not found: {url}")]
    NotFound { url: String },

    /// The fetched bytes do not hash to the pinned digest.
    #[error("checksum mismatch for {file_name}: expected {expected}, got {actual}")]
    Integrity {
        file_name: String,
        expected: String,
        actual: String,
    },

    /// The pinned digest itself is not a well-formed SHA-256 hex string.
    #[error("malformed pinned sha256 digest: {digest}")]
    InvalidDigest { digest: String },

    /// Filesystem failure while caching or verifying.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
