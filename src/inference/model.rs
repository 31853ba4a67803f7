//! GGUF model validation
//!
//! Validates the GGUF container header before the native loader touches the
//! file, so a junk or truncated model fails with a typed error instead of an
//! opaque engine crash.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Magic bytes "GGUF" at the start of every model file (little-endian u32).
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// Container versions the pinned engine release understands.
pub const GGUF_SUPPORTED_VERSIONS: &[u32] = &[2, 3];

/// Header size: magic + version + tensor count + kv count.
const GGUF_HEADER_LEN: usize = 24;

/// Errors from GGUF validation.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a GGUF file: bad magic {found:#010x}")]
    BadMagic { found: u32 },

    #[error("unsupported GGUF version {0}")]
    UnsupportedVersion(u32),

    #[error("truncated GGUF header")]
    Truncated,
}

/// Parsed GGUF header fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GgufMetadata {
    pub version: u32,
    pub tensor_count: u64,
    pub kv_count: u64,
}

/// Validate the GGUF header of the file at `path`.
pub fn validate_gguf(path: &Path) -> Result<GgufMetadata, ModelError> {
    let mut file = File::open(path)?;
    let mut header = [0u8; GGUF_HEADER_LEN];
    if let Err(e) = file.read_exact(&mut header) {
        return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ModelError::Truncated
        } else {
            ModelError::Io(e)
        });
    }

    let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if magic != GGUF_MAGIC {
        return Err(ModelError::BadMagic { found: magic });
    }

    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if !GGUF_SUPPORTED_VERSIONS.contains(&version) {
        return Err(ModelError::UnsupportedVersion(version));
    }

    let mut tensor_bytes = [0u8; 8];
    tensor_bytes.copy_from_slice(&header[8..16]);
    let mut kv_bytes = [0u8; 8];
    kv_bytes.copy_from_slice(&header[16..24]);

    Ok(GgufMetadata {
        version,
        tensor_count: u64::from_le_bytes(tensor_bytes),
        kv_count: u64::from_le_bytes(kv_bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    pub(crate) fn write_gguf_header(
        dir: &Path,
        name: &str,
        magic: u32,
        version: u32,
        tensor_count: u64,
        kv_count: u64,
    ) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).expect("create model file");
        file.write_all(&magic.to_le_bytes()).expect("magic");
        file.write_all(&version.to_le_bytes()).expect("version");
        file.write_all(&tensor_count.to_le_bytes()).expect("tensors");
        file.write_all(&kv_count.to_le_bytes()).expect("kv");
        path
    }

    #[test]
    fn test_valid_header_parses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_gguf_header(dir.path(), "model.gguf", GGUF_MAGIC, 3, 291, 24);
        let meta = validate_gguf(&path).expect("valid header");
        assert_eq!(meta.version, 3);
        assert_eq!(meta.tensor_count, 291);
        assert_eq!(meta.kv_count, 24);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_gguf_header(dir.path(), "model.gguf", 0xdead_beef, 3, 0, 0);
        let err = validate_gguf(&path).expect_err("bad magic");
        assert!(matches!(err, ModelError::BadMagic { found: 0xdead_beef }));
    }

    #[test]
    fn test_legacy_version_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_gguf_header(dir.path(), "model.gguf", GGUF_MAGIC, 1, 0, 0);
        let err = validate_gguf(&path).expect_err("legacy version");
        assert!(matches!(err, ModelError::UnsupportedVersion(1)));
    }

    #[test]
    fn test_truncated_header_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stub.gguf");
        std::fs::write(&path, GGUF_MAGIC.to_le_bytes()).expect("write");
        let err = validate_gguf(&path).expect_err("truncated");
        assert!(matches!(err, ModelError::Truncated));
    }

    #[test]
    fn test_empty_file_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.gguf");
        std::fs::write(&path, b"").expect("write");
        let err = validate_gguf(&path).expect_err("empty");
        assert!(matches!(err, ModelError::Truncated));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = validate_gguf(Path::new("/nonexistent/model.gguf")).expect_err("missing");
        assert!(matches!(err, ModelError::Io(_)));
    }
}
