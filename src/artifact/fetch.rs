//! Artifact fetching with fail-closed integrity verification.
//!
//! A trait-based fetcher keeps HTTP behind an injection seam; the pipeline
//! itself (cache check, download, digest verify, atomic rename) is pure
//! filesystem logic and fully testable without network access.

use crate::artifact::digest::{is_valid_sha256_hex, sha256_hex_file};
use crate::artifact::manifest::{release_url, ReleaseAsset};
use crate::artifact::ArtifactError;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Network timeout for a single artifact download.
const FETCH_TIMEOUT: Duration = Duration::from_secs(600);

/// Downloads a URL into a destination file.
///
/// Abstracted so tests can exercise [`fetch_verified`] without network
/// access.
pub trait ArtifactFetcher {
    /// Download `url` into `dest`, replacing any existing file.
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), ArtifactError>;
}

/// HTTP-based fetcher using `ureq`.
pub struct HttpFetcher;

impl ArtifactFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), ArtifactError> {
        let response = http_agent()
            .get(url)
            .call()
            .map_err(|e| map_ureq_error(url, &e))?;
        let mut file = std::fs::File::create(dest)?;
        std::io::copy(&mut response.into_body().as_reader(), &mut file)
            .map_err(ArtifactError::Io)?;
        Ok(())
    }
}

/// Shared `ureq` agent with request timeout configuration.
fn http_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(FETCH_TIMEOUT))
            .build();
        ureq::Agent::new_with_config(config)
    })
}

/// Map a ureq error to an [`ArtifactError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> ArtifactError {
    match err {
        ureq::Error::StatusCode(404) => ArtifactError::NotFound {
            url: url.to_owned(),
        },
        other => ArtifactError::Fetch {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}

/// Fetch `asset` into `cache_dir` and verify its digest, reusing a cached
/// copy whose bytes already verify.
///
/// Fails closed: a downloaded archive whose digest does not match the pinned
/// entry is deleted and reported as an integrity error; nothing corrupt is
/// ever left at the destination path. Repeated calls for the same asset are
/// idempotent.
pub fn fetch_verified(
    fetcher: &dyn ArtifactFetcher,
    asset: &ReleaseAsset,
    cache_dir: &Path,
) -> Result<PathBuf, ArtifactError> {
    if !is_valid_sha256_hex(asset.sha256) {
        return Err(ArtifactError::InvalidDigest {
            digest: asset.sha256.to_owned(),
        });
    }
    std::fs::create_dir_all(cache_dir)?;
    let dest = cache_dir.join(asset.file_name);

    if dest.exists() {
        let actual = sha256_hex_file(&dest)?;
        if actual == asset.sha256 {
            tracing::debug!(file = asset.file_name, "verified artifact already cached");
            return Ok(dest);
        }
        tracing::warn!(
            file = asset.file_name,
            "cached artifact failed verification, refetching"
        );
        std::fs::remove_file(&dest)?;
    }

    let url = release_url(asset.file_name);
    tracing::info!(%url, "downloading engine artifact");
    let partial = cache_dir.join(format!("{}.partial", asset.file_name));
    if let Err(e) = fetcher.fetch(&url, &partial) {
        // A failed download must not leave a stale temp file behind.
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }

    let actual = sha256_hex_file(&partial)?;
    if actual != asset.sha256 {
        let _ = std::fs::remove_file(&partial);
        return Err(ArtifactError::Integrity {
            file_name: asset.file_name.to_owned(),
            expected: asset.sha256.to_owned(),
            actual,
        });
    }

    std::fs::rename(&partial, &dest)?;
    tracing::info!(file = asset.file_name, "artifact verified");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::digest::sha256_hex_bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubFetcher {
        payload: Vec<u8>,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn new(payload: &[u8]) -> Self {
            Self {
                payload: payload.to_vec(),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ArtifactFetcher for StubFetcher {
        fn fetch(&self, _url: &str, dest: &Path) -> Result<(), ArtifactError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::write(dest, &self.payload)?;
            Ok(())
        }
    }

    fn asset_with_digest(digest: &str) -> ReleaseAsset {
        ReleaseAsset {
            target: "x86_64-unknown-linux-gnu",
            file_name: "engine-test.zip",
            sha256: Box::leak(digest.to_owned().into_boxed_str()),
        }
    }

    fn flip_hex_digit(digest: &str) -> String {
        let mut flipped = digest.to_owned();
        let first = flipped.remove(0);
        let replacement = if first == '0' { '1' } else { '0' };
        flipped.insert(0, replacement);
        flipped
    }

    #[test]
    fn test_fetch_and_verify_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let payload = b"engine bytes";
        let fetcher = StubFetcher::new(payload);
        let asset = asset_with_digest(&sha256_hex_bytes(payload));

        let path = fetch_verified(&fetcher, &asset, dir.path()).expect("verified fetch");
        assert_eq!(std::fs::read(&path).expect("read"), payload);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[test]
    fn test_corrupted_checksum_fails_closed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let payload = b"engine bytes";
        let fetcher = StubFetcher::new(payload);
        let good = sha256_hex_bytes(payload);
        let asset = asset_with_digest(&flip_hex_digit(&good));

        let err = fetch_verified(&fetcher, &asset, dir.path()).expect_err("must fail");
        assert!(matches!(err, ArtifactError::Integrity { .. }));
        // Neither the final file nor the partial download survives.
        assert!(!dir.path().join(asset.file_name).exists());
        assert!(!dir
            .path()
            .join(format!("{}.partial", asset.file_name))
            .exists());
    }

    #[test]
    fn test_repeated_fetch_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let payload = b"engine bytes";
        let fetcher = StubFetcher::new(payload);
        let asset = asset_with_digest(&sha256_hex_bytes(payload));

        let first = fetch_verified(&fetcher, &asset, dir.path()).expect("first fetch");
        let second = fetch_verified(&fetcher, &asset, dir.path()).expect("second fetch");
        assert_eq!(first, second);
        assert_eq!(fetcher.call_count(), 1, "cached verified bytes are reused");
        assert_eq!(std::fs::read(&second).expect("read"), payload);
    }

    #[test]
    fn test_failed_download_leaves_no_partial_file() {
        struct TruncatingFetcher;

        impl ArtifactFetcher for TruncatingFetcher {
            fn fetch(&self, url: &str, dest: &Path) -> Result<(), ArtifactError> {
                // Write part of the payload, then fail as a dropped connection would.
                std::fs::write(dest, b"half an arch")?;
                Err(ArtifactError::Fetch {
                    url: url.to_owned(),
                    reason: "connection reset".to_string(),
                })
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let asset = asset_with_digest(&sha256_hex_bytes(b"engine bytes"));

        let err = fetch_verified(&TruncatingFetcher, &asset, dir.path()).expect_err("must fail");
        assert!(matches!(err, ArtifactError::Fetch { .. }));
        assert!(!dir
            .path()
            .join(format!("{}.partial", asset.file_name))
            .exists());
        assert!(!dir.path().join(asset.file_name).exists());
    }

    #[test]
    fn test_corrupt_cache_entry_is_refetched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let payload = b"engine bytes";
        let fetcher = StubFetcher::new(payload);
        let asset = asset_with_digest(&sha256_hex_bytes(payload));

        std::fs::write(dir.path().join(asset.file_name), b"tampered").expect("seed cache");
        let path = fetch_verified(&fetcher, &asset, dir.path()).expect("refetch");
        assert_eq!(std::fs::read(&path).expect("read"), payload);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[test]
    fn test_malformed_pinned_digest_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = StubFetcher::new(b"payload");
        let asset = asset_with_digest("not-a-digest");

        let err = fetch_verified(&fetcher, &asset, dir.path()).expect_err("must fail");
        assert!(matches!(err, ArtifactError::InvalidDigest { .. }));
        assert_eq!(fetcher.call_count(), 0);
    }

    #[test]
    fn test_map_ureq_error_distinguishes_not_found() {
        let err = map_ureq_error("https://example.test/a.zip", &ureq::Error::StatusCode(404));
        assert!(matches!(err, ArtifactError::NotFound { .. }));
        let err = map_ureq_error("https://example.test/a.zip", &ureq::Error::StatusCode(500));
        assert!(matches!(err, ArtifactError::Fetch { .. }));
    }
}
