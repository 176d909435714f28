//! ---
//! cl_section: "01-shared-runtime"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Version metadata for the bridge and its update checks."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use serde::Serialize;

/// Build metadata for the running bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    /// Workspace semantic version.
    pub semver: String,
    /// Git commit hash, when provided at build time via `CORELINK_GIT_SHA`.
    pub git_sha: String,
    /// Operating system the binary was built for.
    pub os: String,
    /// CPU architecture the binary was built for.
    pub arch: String,
}

impl VersionInfo {
    #[must_use]
    pub fn current() -> Self {
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            git_sha: option_env!("CORELINK_GIT_SHA")
                .unwrap_or("UNKNOWN")
                .to_owned(),
            os: std::env::consts::OS.to_owned(),
            arch: std::env::consts::ARCH.to_owned(),
        }
    }

    /// Construct metadata for an arbitrary version string. Used by tests and
    /// embedders that report the host application's version instead.
    #[must_use]
    pub fn with_semver(semver: impl Into<String>) -> Self {
        Self {
            semver: semver.into(),
            ..Self::current()
        }
    }

    /// Whether `candidate` is a strictly newer semantic version than this build.
    ///
    /// Unparseable versions on either side never count as newer.
    #[must_use]
    pub fn is_superseded_by(&self, candidate: &str) -> bool {
        let Ok(current) = semver::Version::parse(self.semver.trim_start_matches('v')) else {
            return false;
        };
        match semver::Version::parse(candidate.trim_start_matches('v')) {
            Ok(candidate) => candidate > current,
            Err(_) => false,
        }
    }

    #[must_use]
    pub fn cli_string(&self) -> String {
        format!("{} ({})", self.semver, self.git_sha)
    }

    /// Extended string suitable for `--version` flags.
    #[must_use]
    pub fn extended(&self) -> String {
        format!(
            "corelink v{}\nGit: {}\nTarget: {}-{}",
            self.semver, self.git_sha, self.arch, self.os
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_contains_semver() {
        let info = VersionInfo::current();
        assert!(info.extended().contains(&info.semver));
    }

    #[test]
    fn newer_versions_supersede() {
        let info = VersionInfo::with_semver("1.4.2");
        assert!(info.is_superseded_by("1.5.0"));
        assert!(info.is_superseded_by("v2.0.0"));
        assert!(!info.is_superseded_by("1.4.2"));
        assert!(!info.is_superseded_by("1.4.0"));
        assert!(!info.is_superseded_by("latest"));
    }
}
