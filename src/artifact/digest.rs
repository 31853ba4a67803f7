// SHA-256 helpers for artifact integrity verification.
//
// Shared with build.rs via include!, so no crate-internal imports here.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Length of a hex-encoded SHA-256 digest.
pub const SHA256_HEX_LEN: usize = 64;

/// Hex-encoded SHA-256 of everything `reader` yields.
pub fn sha256_hex_reader(reader: &mut dyn Read) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(to_hex(&hasher.finalize()))
}

/// Hex-encoded SHA-256 of the file at `path`.
pub fn sha256_hex_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    sha256_hex_reader(&mut file)
}

/// Hex-encoded SHA-256 of a byte slice.
pub fn sha256_hex_bytes(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

/// Whether `value` is a well-formed lowercase hex SHA-256 digest.
pub fn is_valid_sha256_hex(value: &str) -> bool {
    value.len() == SHA256_HEX_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

fn to_hex(digest: &[u8]) -> String {
    digest.iter().fold(
        String::with_capacity(SHA256_HEX_LEN),
        |mut out, byte| {
            out.push_str(&format!("{byte:02x}"));
            out
        },
    )
}

#[cfg(test)]
mod digest_tests {
    use super::*;
    use std::io::Write;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn test_sha256_of_known_bytes() {
        assert_eq!(sha256_hex_bytes(b"abc"), ABC_SHA256);
    }

    #[test]
    fn test_sha256_of_file_matches_bytes() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"abc").expect("write");
        file.flush().expect("flush");
        let hex = sha256_hex_file(file.path()).expect("digest");
        assert_eq!(hex, ABC_SHA256);
    }

    #[test]
    fn test_sha256_of_empty_input() {
        assert_eq!(
            sha256_hex_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_digest_well_formedness() {
        assert!(is_valid_sha256_hex(ABC_SHA256));
        assert!(!is_valid_sha256_hex(&ABC_SHA256[..63]));
        assert!(!is_valid_sha256_hex(&ABC_SHA256.to_uppercase()));
        let mut bad = ABC_SHA256.to_string();
        bad.replace_range(0..1, "g");
        assert!(!is_valid_sha256_hex(&bad));
    }
}
