//! Schema version comparison
//!
//! Schema versions on the log are loose semver strings ("1.0.0", sometimes
//! "1.0" or "v2"). They are padded to three components before parsing.

use semver::Version;
use std::cmp::Ordering;

/// Parse a schema version string, padding missing minor/patch components
pub fn parse_version(version_str: &str) -> Option<Version> {
    let trimmed = version_str.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }

    let core_len = trimmed
        .find(|c: char| c == '-' || c == '+')
        .unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(core_len);
    let mut parts: Vec<&str> = core.split('.').collect();
    while parts.len() < 3 {
        parts.push("0");
    }

    Version::parse(&format!("{}{}", parts.join("."), suffix)).ok()
}

/// Compare two schema versions.
///
/// Returns `None` when either side does not parse.
pub fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    Some(parse_version(a)?.cmp(&parse_version(b)?))
}

/// Whether `candidate` is strictly newer than `current`
pub fn is_newer(candidate: &str, current: &str) -> bool {
    compare_versions(candidate, current) == Some(Ordering::Greater)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        assert_eq!(parse_version("1.2.3").unwrap().to_string(), "1.2.3");
        assert_eq!(parse_version("v1.2").unwrap().to_string(), "1.2.0");
        assert_eq!(parse_version("2").unwrap().to_string(), "2.0.0");
        assert!(parse_version("").is_none());
        assert!(parse_version("abc").is_none());
    }

    #[test]
    fn test_prerelease_suffix() {
        let v = parse_version("1.0-rc.1").unwrap();
        assert_eq!(v.to_string(), "1.0.0-rc.1");
    }

    #[test]
    fn test_newer() {
        assert!(is_newer("1.10.0", "1.9.0"));
        assert!(!is_newer("1.0.0", "1.0.0"));
        assert!(!is_newer("1.0.0", "2.0"));
        assert!(!is_newer("junk", "1.0.0"));
        assert_eq!(compare_versions("1.0", "1.0.0"), Some(Ordering::Equal));
    }
}
