// Layout of an extracted engine archive.
//
// This file is shared with build.rs via include!, so it must stay free of
// crate-internal imports and inner attributes.

use std::io;
use std::path::{Path, PathBuf};

/// How a located engine library should be linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Shared library (`.so`, `.dylib`, `.dll`).
    Dynamic,
    /// Static archive (`.a`, `.lib`).
    Static,
}

impl LinkKind {
    /// The kind prefix for a `cargo:rustc-link-lib` directive.
    pub fn as_directive(self) -> &'static str {
        match self {
            LinkKind::Dynamic => "dylib",
            LinkKind::Static => "static",
        }
    }
}

/// Classify a file as an engine library, by name and extension.
pub fn library_kind(path: &Path) -> Option<LinkKind> {
    let name = path.file_name()?.to_str()?;
    if !name.contains("llama") {
        return None;
    }
    if [".so", ".dylib", ".dll"].iter().any(|ext| name.ends_with(ext)) {
        Some(LinkKind::Dynamic)
    } else if [".a", ".lib"].iter().any(|ext| name.ends_with(ext)) {
        Some(LinkKind::Static)
    } else {
        None
    }
}

/// Depth-first search for the directory holding the engine libraries.
///
/// Release archives nest their libraries differently per platform; the first
/// directory containing an engine library wins, together with how that
/// library links.
pub fn find_library_dir(root: &Path) -> io::Result<Option<(PathBuf, LinkKind)>> {
    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if let Some(kind) = library_kind(&path) {
            return Ok(Some((root.to_path_buf(), kind)));
        }
    }
    for dir in subdirs {
        if let Some(found) = find_library_dir(&dir)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod layout_tests {
    use super::*;

    #[test]
    fn test_library_kind_by_extension() {
        assert_eq!(
            library_kind(Path::new("libllama.so")),
            Some(LinkKind::Dynamic)
        );
        assert_eq!(
            library_kind(Path::new("libllama.dylib")),
            Some(LinkKind::Dynamic)
        );
        assert_eq!(library_kind(Path::new("llama.dll")), Some(LinkKind::Dynamic));
        assert_eq!(library_kind(Path::new("libllama.a")), Some(LinkKind::Static));
        assert_eq!(library_kind(Path::new("llama.lib")), Some(LinkKind::Static));
        assert_eq!(library_kind(Path::new("libggml.so")), None);
        assert_eq!(library_kind(Path::new("llama.h")), None);
    }

    #[test]
    fn test_find_library_dir_descends_into_nested_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("build").join("bin");
        std::fs::create_dir_all(&nested).expect("mkdirs");
        std::fs::write(nested.join("libllama.so"), b"elf").expect("write");

        let (found, kind) = find_library_dir(dir.path())
            .expect("scan")
            .expect("library dir");
        assert_eq!(found, nested);
        assert_eq!(kind, LinkKind::Dynamic);
    }

    #[test]
    fn test_find_library_dir_reports_static_archives() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("llama.lib"), b"coff").expect("write");

        let (_, kind) = find_library_dir(dir.path())
            .expect("scan")
            .expect("library dir");
        assert_eq!(kind, LinkKind::Static);
        assert_eq!(kind.as_directive(), "static");
    }

    #[test]
    fn test_find_library_dir_empty_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("docs")).expect("mkdirs");
        assert!(find_library_dir(dir.path()).expect("scan").is_none());
    }
}
