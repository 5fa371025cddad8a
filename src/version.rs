//! Version strings for the warmpool binary.
//!
//! Release builds may set `WARMPOOL_GIT_REV` at compile time to embed the
//! git revision in `--version` output.

use std::sync::LazyLock;

/// The package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git revision baked in at build time (empty string if not set).
pub const GIT_REV: &str = match option_env!("WARMPOOL_GIT_REV") {
    Some(rev) => rev,
    None => "",
};

static FULL_VERSION: LazyLock<String> = LazyLock::new(|| {
    if GIT_REV.is_empty() {
        PKG_VERSION.to_string()
    } else {
        format!("{} ({})", PKG_VERSION, GIT_REV)
    }
});

/// Returns `"X.Y.Z (abcdef0)"` when built with a revision, otherwise `"X.Y.Z"`.
///
/// # Examples
///
/// ```
/// use warmpool::version::full_version;
///
/// assert!(full_version().starts_with(env!("CARGO_PKG_VERSION")));
/// ```
pub fn full_version() -> &'static str {
    FULL_VERSION.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_version_format() {
        let version = full_version();
        if GIT_REV.is_empty() {
            assert_eq!(version, PKG_VERSION);
        } else {
            assert!(version.contains(GIT_REV));
            assert!(version.starts_with(PKG_VERSION));
        }
    }
}
