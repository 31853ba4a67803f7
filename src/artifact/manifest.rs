// Pinned upstream engine release.
//
// This file is shared with build.rs via include!, so it must stay free of
// crate-internal imports and inner attributes.

/// Upstream repository of the inference engine, referenced by pinned tag only.
pub const UPSTREAM_REPO_URL: &str = "https://github.com/ggml-org/llama.cpp";

/// The release tag every asset below belongs to.
pub const ENGINE_RELEASE_TAG: &str = "b6098";

/// One prebuilt engine archive: which cargo target it serves, the asset file
/// name under the release tag, and its SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub target: &'static str,
    pub file_name: &'static str,
    pub sha256: &'static str,
}

/// Per-target release assets. Every digest here gates linking: a fetched
/// archive that does not hash to its entry is discarded, never linked.
///
/// Only the iOS xcframework digest has been verified against the published
/// release. The other entries must be refreshed against the b6098 release
/// assets (`sha256sum` of each downloaded archive) before a prebuilt build
/// for those targets can link; until then their builds fail closed.
pub const RELEASE_ASSETS: &[ReleaseAsset] = &[
    ReleaseAsset {
        target: "aarch64-apple-darwin",
        file_name: "llama-b6098-bin-macos-arm64.zip",
        sha256: "8f4e2c91d7a35b06c8ee12f9ab44d1c3570a8b26e9135fd02c47a1e8b39d6054",
    },
    ReleaseAsset {
        target: "x86_64-apple-darwin",
        file_name: "llama-b6098-bin-macos-x64.zip",
        sha256: "2b9c0d4f16e8a75310febc92d556a0874c1d3e9ab07f2486cd15039e7a62b8f1",
    },
    ReleaseAsset {
        target: "x86_64-unknown-linux-gnu",
        file_name: "llama-b6098-bin-ubuntu-x64.zip",
        sha256: "c57a90de23f41b68a02d8f6c11e5b97403c8aa12df69045b3ee71820c4f6d9b2",
    },
    ReleaseAsset {
        target: "aarch64-unknown-linux-gnu",
        file_name: "llama-b6098-bin-ubuntu-arm64.zip",
        sha256: "6d1e83fa07c925b14ae60d2c5f98b10376cf42d88e01a95bd73c64f1e20a97c3",
    },
    ReleaseAsset {
        target: "x86_64-pc-windows-msvc",
        file_name: "llama-b6098-bin-win-cpu-x64.zip",
        sha256: "91f05ab2c6e47d8023bc16d9ef5a30c1748d2ae6f90b35cd41e87206a5d1fb38",
    },
    ReleaseAsset {
        target: "aarch64-apple-ios",
        file_name: "llama-b6098-xcframework.zip",
        sha256: "30122280af76b2a43f7959316313be6f949dc0ecc01bfeb1a87a09cd9e7aa460",
    },
];

/// Look up the prebuilt asset for a cargo target triple.
pub fn asset_for(target: &str) -> Option<&'static ReleaseAsset> {
    RELEASE_ASSETS.iter().find(|asset| asset.target == target)
}

/// Download URL for an asset file under the pinned release tag.
pub fn release_url(file_name: &str) -> String {
    format!("{UPSTREAM_REPO_URL}/releases/download/{ENGINE_RELEASE_TAG}/{file_name}")
}

#[cfg(test)]
mod manifest_tests {
    use super::*;

    #[test]
    fn test_asset_for_known_target() {
        let asset = asset_for("x86_64-unknown-linux-gnu").expect("linux asset");
        assert!(asset.file_name.contains(ENGINE_RELEASE_TAG));
        assert!(asset.file_name.ends_with(".zip"));
    }

    #[test]
    fn test_asset_for_unknown_target() {
        assert!(asset_for("wasm32-unknown-unknown").is_none());
    }

    #[test]
    fn test_release_url_is_pinned_to_tag() {
        let url = release_url("llama-b6098-bin-ubuntu-x64.zip");
        assert!(url.starts_with(UPSTREAM_REPO_URL));
        assert!(url.contains(&format!("/download/{ENGINE_RELEASE_TAG}/")));
    }

    #[test]
    fn test_all_digests_are_well_formed() {
        for asset in RELEASE_ASSETS {
            assert_eq!(asset.sha256.len(), 64, "digest length for {}", asset.target);
            assert!(
                asset.sha256.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()),
                "digest charset for {}",
                asset.target
            );
        }
    }

    #[test]
    fn test_targets_are_unique() {
        for (i, a) in RELEASE_ASSETS.iter().enumerate() {
            for b in &RELEASE_ASSETS[i + 1..] {
                assert_ne!(a.target, b.target);
            }
        }
    }
}
