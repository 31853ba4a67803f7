// Supported platform matrix.
//
// Five platform families, one declared minimum version each. The matrix gates
// build eligibility at build-configuration time, never runtime behavior.
// Shared with build.rs via include!, so no crate-internal imports here.

use std::fmt;

/// The platform families the engine publishes prebuilt binaries for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformFamily {
    Linux,
    MacOs,
    Windows,
    Ios,
    Android,
}

impl PlatformFamily {
    /// Human-readable family name.
    pub fn name(self) -> &'static str {
        match self {
            PlatformFamily::Linux => "Linux",
            PlatformFamily::MacOs => "macOS",
            PlatformFamily::Windows => "Windows",
            PlatformFamily::Ios => "iOS",
            PlatformFamily::Android => "Android",
        }
    }
}

impl fmt::Display for PlatformFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A major.minor platform version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse "12", "12.4", or "12.4.1" (extra components ignored).
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split('.');
        let major = parts.next()?.trim().parse().ok()?;
        let minor = match parts.next() {
            Some(part) => part.trim().parse().ok()?,
            None => 0,
        };
        Some(Self { major, minor })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Minimum supported version per family.
///
/// Linux is a glibc floor, Android an API level; the Apple entries are OS
/// deployment targets.
pub const MIN_PLATFORM_VERSIONS: &[(PlatformFamily, Version)] = &[
    (PlatformFamily::Linux, Version::new(2, 31)),
    (PlatformFamily::MacOs, Version::new(12, 0)),
    (PlatformFamily::Windows, Version::new(10, 0)),
    (PlatformFamily::Ios, Version::new(16, 4)),
    (PlatformFamily::Android, Version::new(28, 0)),
];

/// Declared minimum version for a family.
pub fn minimum_version(family: PlatformFamily) -> Version {
    MIN_PLATFORM_VERSIONS
        .iter()
        .find(|(f, _)| *f == family)
        .map(|(_, v)| *v)
        .unwrap_or(Version::new(0, 0))
}

/// Classify a cargo target triple into a platform family.
///
/// Android triples also contain "linux", so they are matched first.
pub fn family_for_target(target: &str) -> Option<PlatformFamily> {
    if target.contains("-android") {
        Some(PlatformFamily::Android)
    } else if target.contains("-ios") {
        Some(PlatformFamily::Ios)
    } else if target.contains("-darwin") {
        Some(PlatformFamily::MacOs)
    } else if target.contains("-windows") {
        Some(PlatformFamily::Windows)
    } else if target.contains("-linux") {
        Some(PlatformFamily::Linux)
    } else {
        None
    }
}

/// Errors from platform eligibility checks.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("target {target} is not in the supported platform matrix")]
    UnsupportedTarget { target: String },

    #[error("{family} deployment target {requested} is below the supported minimum {minimum}")]
    VersionBelowMinimum {
        family: &'static str,
        requested: String,
        minimum: String,
    },

    #[error("cannot parse {family} deployment target {value:?}")]
    MalformedDeploymentTarget {
        family: &'static str,
        value: String,
    },
}

/// Environment variable carrying the deployment target for a family, where
/// the build environment exposes one.
pub fn deployment_target_var(family: PlatformFamily) -> Option<&'static str> {
    match family {
        PlatformFamily::MacOs => Some("MACOSX_DEPLOYMENT_TARGET"),
        PlatformFamily::Ios => Some("IPHONEOS_DEPLOYMENT_TARGET"),
        PlatformFamily::Android => Some("ANDROID_API_LEVEL"),
        PlatformFamily::Linux | PlatformFamily::Windows => None,
    }
}

/// Check build eligibility for a target triple.
///
/// The env lookup is injected so the build script and tests share the exact
/// same check. An absent deployment-target variable means the toolchain
/// default applies, which is at or above every declared minimum.
pub fn check_build_target(
    target: &str,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<PlatformFamily, PlatformError> {
    let family = family_for_target(target).ok_or_else(|| PlatformError::UnsupportedTarget {
        target: target.to_owned(),
    })?;

    if let Some(var) = deployment_target_var(family) {
        if let Some(raw) = env(var) {
            let requested = Version::parse(raw.trim()).ok_or_else(|| {
                PlatformError::MalformedDeploymentTarget {
                    family: family.name(),
                    value: raw.clone(),
                }
            })?;
            let minimum = minimum_version(family);
            if requested < minimum {
                return Err(PlatformError::VersionBelowMinimum {
                    family: family.name(),
                    requested: requested.to_string(),
                    minimum: minimum.to_string(),
                });
            }
        }
    }

    Ok(family)
}

#[cfg(test)]
mod platform_tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_family_classification() {
        assert_eq!(
            family_for_target("x86_64-unknown-linux-gnu"),
            Some(PlatformFamily::Linux)
        );
        assert_eq!(
            family_for_target("aarch64-apple-darwin"),
            Some(PlatformFamily::MacOs)
        );
        assert_eq!(
            family_for_target("x86_64-pc-windows-msvc"),
            Some(PlatformFamily::Windows)
        );
        assert_eq!(
            family_for_target("aarch64-apple-ios"),
            Some(PlatformFamily::Ios)
        );
        assert_eq!(family_for_target("wasm32-unknown-unknown"), None);
    }

    #[test]
    fn test_android_takes_precedence_over_linux() {
        assert_eq!(
            family_for_target("aarch64-linux-android"),
            Some(PlatformFamily::Android)
        );
    }

    #[test]
    fn test_matrix_declares_five_families() {
        assert_eq!(MIN_PLATFORM_VERSIONS.len(), 5);
        for (i, (a, _)) in MIN_PLATFORM_VERSIONS.iter().enumerate() {
            for (b, _) in &MIN_PLATFORM_VERSIONS[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(Version::parse("12"), Some(Version::new(12, 0)));
        assert_eq!(Version::parse("12.4"), Some(Version::new(12, 4)));
        assert_eq!(Version::parse("12.4.1"), Some(Version::new(12, 4)));
        assert_eq!(Version::parse("banana"), None);
        assert_eq!(Version::parse(""), None);
    }

    #[test]
    fn test_version_ordering() {
        assert!(Version::new(11, 7) < Version::new(12, 0));
        assert!(Version::new(12, 1) > Version::new(12, 0));
    }

    #[test]
    fn test_check_passes_without_deployment_target() {
        let family = check_build_target("aarch64-apple-darwin", &no_env).expect("eligible");
        assert_eq!(family, PlatformFamily::MacOs);
    }

    #[test]
    fn test_check_rejects_below_minimum() {
        let env = |var: &str| {
            (var == "MACOSX_DEPLOYMENT_TARGET").then(|| "11.0".to_string())
        };
        let err = check_build_target("aarch64-apple-darwin", &env).expect_err("below minimum");
        assert!(matches!(err, PlatformError::VersionBelowMinimum { .. }));
    }

    #[test]
    fn test_check_accepts_at_minimum() {
        let env = |var: &str| {
            (var == "MACOSX_DEPLOYMENT_TARGET").then(|| "12.0".to_string())
        };
        assert!(check_build_target("aarch64-apple-darwin", &env).is_ok());
    }

    #[test]
    fn test_check_rejects_malformed_deployment_target() {
        let env = |var: &str| {
            (var == "IPHONEOS_DEPLOYMENT_TARGET").then(|| "latest".to_string())
        };
        let err = check_build_target("aarch64-apple-ios", &env).expect_err("malformed");
        assert!(matches!(err, PlatformError::MalformedDeploymentTarget { .. }));
    }

    #[test]
    fn test_check_rejects_unknown_target() {
        let err = check_build_target("wasm32-unknown-unknown", &no_env).expect_err("unsupported");
        assert!(matches!(err, PlatformError::UnsupportedTarget { .. }));
    }
}
