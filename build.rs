//! Build-time resolution of the prebuilt inference engine.
//!
//! With the `prebuilt` feature enabled this script gates the target against
//! the supported platform matrix, downloads the pinned release archive for
//! the target, verifies its SHA-256 digest (failing the build before any
//! link directive is emitted on mismatch), extracts it, and links the engine
//! libraries. `LLAMA_LINK_LIB_DIR` points the build at a local engine build
//! instead of fetching.
//!
//! Without the feature the script is a no-op so the facade compiles and
//! tests offline.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[allow(dead_code)]
mod manifest {
    include!("src/artifact/manifest.rs");
}

#[allow(dead_code)]
mod digest {
    include!("src/artifact/digest.rs");
}

#[allow(dead_code)]
mod layout {
    include!("src/artifact/layout.rs");
}

#[allow(dead_code)]
mod platform {
    include!("src/platform.rs");
}

/// Network timeout for the engine archive download.
const FETCH_TIMEOUT: Duration = Duration::from_secs(600);

/// Library names the engine archive provides.
const ENGINE_LIBS: &[&str] = &["llama", "ggml", "ggml-base", "ggml-cpu"];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/artifact/manifest.rs");
    println!("cargo:rerun-if-changed=src/artifact/layout.rs");
    println!("cargo:rerun-if-changed=src/platform.rs");
    println!("cargo:rerun-if-env-changed=LLAMA_LINK_LIB_DIR");

    if std::env::var_os("CARGO_FEATURE_PREBUILT").is_none() {
        return;
    }

    if let Err(e) = link_prebuilt() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[derive(Debug, thiserror::Error)]
enum BuildError {
    #[error(transparent)]
    Platform(#[from] platform::PlatformError),

    #[error("no prebuilt engine asset for target {target}; set LLAMA_LINK_LIB_DIR to link a local engine build")]
    UnsupportedTarget { target: String },

    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("checksum mismatch for {file_name}: expected {expected}, got {actual}; refusing to link")]
    Integrity {
        file_name: String,
        expected: String,
        actual: String,
    },

    #[error("required build environment variable {0} is missing")]
    MissingEnv(&'static str),

    #[error("archive {0} contained no engine libraries")]
    NoLibraries(String),

    #[error("failed to extract archive: {0}")]
    Extract(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn link_prebuilt() -> Result<(), BuildError> {
    let target = std::env::var("TARGET").map_err(|_| BuildError::MissingEnv("TARGET"))?;
    platform::check_build_target(&target, &|var| std::env::var(var).ok())?;

    if let Some(dir) = std::env::var_os("LLAMA_LINK_LIB_DIR") {
        let dir = PathBuf::from(dir);
        let kind = layout::find_library_dir(&dir)?
            .map(|(_, kind)| kind)
            .unwrap_or(layout::LinkKind::Dynamic);
        emit_link_directives(&dir, kind);
        return Ok(());
    }

    let asset = manifest::asset_for(&target).ok_or_else(|| BuildError::UnsupportedTarget {
        target: target.clone(),
    })?;

    let out_dir =
        PathBuf::from(std::env::var_os("OUT_DIR").ok_or(BuildError::MissingEnv("OUT_DIR"))?);
    let cache_dir = out_dir.join("prebuilt");
    std::fs::create_dir_all(&cache_dir)?;
    let archive = cache_dir.join(asset.file_name);

    if !is_verified(&archive, asset.sha256)? {
        let url = manifest::release_url(asset.file_name);
        download(&url, &archive)?;
        let actual = digest::sha256_hex_file(&archive)?;
        if actual != asset.sha256 {
            std::fs::remove_file(&archive)?;
            return Err(BuildError::Integrity {
                file_name: asset.file_name.to_owned(),
                expected: asset.sha256.to_owned(),
                actual,
            });
        }
    }

    let (lib_dir, kind) = extract_libraries(&archive, &out_dir.join("engine"))?;
    emit_link_directives(&lib_dir, kind);
    Ok(())
}

/// Whether `path` exists and hashes to `expected`.
fn is_verified(path: &Path, expected: &str) -> Result<bool, BuildError> {
    if !path.exists() {
        return Ok(false);
    }
    Ok(digest::sha256_hex_file(path)? == expected)
}

fn download(url: &str, dest: &Path) -> Result<(), BuildError> {
    let result = stream_to_file(url, dest);
    if result.is_err() {
        // A failed download must not leave a stale temp file behind.
        let _ = std::fs::remove_file(dest);
    }
    result
}

fn stream_to_file(url: &str, dest: &Path) -> Result<(), BuildError> {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(FETCH_TIMEOUT))
        .build();
    let agent = ureq::Agent::new_with_config(config);
    let response = agent.get(url).call().map_err(|e| BuildError::Fetch {
        url: url.to_owned(),
        reason: e.to_string(),
    })?;
    let mut file = std::fs::File::create(dest)?;
    io::copy(&mut response.into_body().as_reader(), &mut file)?;
    Ok(())
}

/// Extract the archive and locate the directory holding the engine
/// libraries, along with how they link.
fn extract_libraries(
    archive: &Path,
    dest: &Path,
) -> Result<(PathBuf, layout::LinkKind), BuildError> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;
    zip.extract(dest)?;
    layout::find_library_dir(dest)?.ok_or_else(|| {
        BuildError::NoLibraries(archive.file_name().map_or_else(
            || archive.display().to_string(),
            |n| n.to_string_lossy().into_owned(),
        ))
    })
}

fn emit_link_directives(dir: &Path, kind: layout::LinkKind) {
    println!("cargo:rustc-link-search=native={}", dir.display());
    for lib in ENGINE_LIBS {
        println!("cargo:rustc-link-lib={}={lib}", kind.as_directive());
    }
}
