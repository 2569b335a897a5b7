//! Semantic version parsing and range matching.
//!
//! Manifests declare a host requirement and per-dependency ranges as
//! whitespace-separated constraint tokens, ANDed together:
//! `">=1.0.0 <2.0.0"`, `"~1.2.0"`, `"^0.2.0"`, `"1.4.2"`.

use std::fmt;

use crate::error::PluginError;

/// A three-component semantic version. Pre-release and build suffixes are
/// stripped at parse time, so `1.0.0-beta` compares equal to `1.0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `x.y.z`, ignoring any `-` or `+` suffix.
    pub fn parse(input: &str) -> Result<Self, PluginError> {
        let s = input.trim();
        let s = match s.find(['-', '+']) {
            Some(idx) => &s[..idx],
            None => s,
        };

        let mut parts = s.split('.');
        let (a, b, c) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), Some(c), None) => (a, b, c),
            _ => return Err(PluginError::InvalidVersion(input.to_string())),
        };

        let field = |p: &str| {
            p.parse::<u64>()
                .map_err(|_| PluginError::InvalidVersion(input.to_string()))
        };

        Ok(Self {
            major: field(a)?,
            minor: field(b)?,
            patch: field(c)?,
        })
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Comparison operator of a single range token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Exact,
    GreaterEq,
    Greater,
    LessEq,
    Less,
    /// `~1.2.0`: same major.minor, patch >=.
    Tilde,
    /// `^1.2.0`: same major (same major.minor when major is 0), version >=.
    Caret,
}

/// One parsed range token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionConstraint {
    pub op: ConstraintOp,
    pub version: SemVer,
}

impl VersionConstraint {
    fn parse(token: &str) -> Result<Self, PluginError> {
        let (op, rest) = if let Some(r) = token.strip_prefix(">=") {
            (ConstraintOp::GreaterEq, r)
        } else if let Some(r) = token.strip_prefix("<=") {
            (ConstraintOp::LessEq, r)
        } else if let Some(r) = token.strip_prefix('>') {
            (ConstraintOp::Greater, r)
        } else if let Some(r) = token.strip_prefix('<') {
            (ConstraintOp::Less, r)
        } else if let Some(r) = token.strip_prefix('~') {
            (ConstraintOp::Tilde, r)
        } else if let Some(r) = token.strip_prefix('^') {
            (ConstraintOp::Caret, r)
        } else {
            (ConstraintOp::Exact, token)
        };

        let version =
            SemVer::parse(rest).map_err(|_| PluginError::InvalidRange(token.to_string()))?;
        Ok(Self { op, version })
    }

    fn matches(&self, v: SemVer) -> bool {
        let pin = self.version;
        match self.op {
            ConstraintOp::Exact => v == pin,
            ConstraintOp::GreaterEq => v >= pin,
            ConstraintOp::Greater => v > pin,
            ConstraintOp::LessEq => v <= pin,
            ConstraintOp::Less => v < pin,
            ConstraintOp::Tilde => v >= pin && v.major == pin.major && v.minor == pin.minor,
            ConstraintOp::Caret => {
                if v < pin {
                    return false;
                }
                if pin.major == 0 {
                    v.major == 0 && v.minor == pin.minor
                } else {
                    v.major == pin.major
                }
            }
        }
    }
}

/// Parse a whitespace-separated range expression into its constraint tokens.
pub fn parse_range(input: &str) -> Result<Vec<VersionConstraint>, PluginError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(PluginError::InvalidRange(input.to_string()));
    }

    s.split_whitespace().map(VersionConstraint::parse).collect()
}

/// True when `version` matches every constraint (AND semantics).
pub fn satisfies(version: SemVer, constraints: &[VersionConstraint]) -> bool {
    constraints.iter().all(|c| c.matches(version))
}

/// Parse both sides and verify the version satisfies the range.
pub fn check_range(version: &str, range: &str) -> Result<(), PluginError> {
    let v = SemVer::parse(version)?;
    let constraints = parse_range(range)?;

    if satisfies(v, &constraints) {
        Ok(())
    } else {
        Err(PluginError::VersionMismatch {
            version: version.to_string(),
            range: range.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_version() {
        let v = SemVer::parse("1.2.3").unwrap();
        assert_eq!(v, SemVer::new(1, 2, 3));
    }

    #[test]
    fn prerelease_suffix_is_ignored() {
        assert_eq!(
            SemVer::parse("1.0.0-beta").unwrap(),
            SemVer::parse("1.0.0").unwrap()
        );
        assert_eq!(
            SemVer::parse("2.1.0+build.5").unwrap(),
            SemVer::new(2, 1, 0)
        );
    }

    #[test]
    fn two_component_version_is_rejected() {
        assert!(matches!(
            SemVer::parse("1.0"),
            Err(PluginError::InvalidVersion(_))
        ));
        assert!(SemVer::parse("1.0.0.0").is_err());
        assert!(SemVer::parse("a.b.c").is_err());
    }

    #[test]
    fn compare_is_field_wise_lexicographic() {
        let versions = [
            SemVer::new(0, 9, 9),
            SemVer::new(1, 0, 0),
            SemVer::new(1, 0, 1),
            SemVer::new(1, 2, 0),
            SemVer::new(2, 0, 0),
        ];
        for pair in versions.windows(2) {
            assert!(pair[0] < pair[1], "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn bounded_range() {
        let range = parse_range(">=1.0.0 <2.0.0").unwrap();
        assert!(satisfies(SemVer::parse("1.5.0").unwrap(), &range));
        assert!(!satisfies(SemVer::parse("2.0.0").unwrap(), &range));
        assert!(!satisfies(SemVer::parse("0.9.0").unwrap(), &range));
    }

    #[test]
    fn tilde_allows_patch_only() {
        let range = parse_range("~1.2.0").unwrap();
        assert!(satisfies(SemVer::parse("1.2.5").unwrap(), &range));
        assert!(!satisfies(SemVer::parse("1.3.0").unwrap(), &range));
        assert!(!satisfies(SemVer::parse("1.1.9").unwrap(), &range));
    }

    #[test]
    fn caret_allows_minor_and_patch() {
        let range = parse_range("^1.2.0").unwrap();
        assert!(satisfies(SemVer::parse("1.9.9").unwrap(), &range));
        assert!(!satisfies(SemVer::parse("2.0.0").unwrap(), &range));
        assert!(!satisfies(SemVer::parse("1.1.0").unwrap(), &range));
    }

    #[test]
    fn caret_with_zero_major_pins_minor() {
        let range = parse_range("^0.2.0").unwrap();
        assert!(satisfies(SemVer::parse("0.2.5").unwrap(), &range));
        assert!(!satisfies(SemVer::parse("0.3.0").unwrap(), &range));
    }

    #[test]
    fn exact_token_has_no_operator() {
        let range = parse_range("1.4.2").unwrap();
        assert!(satisfies(SemVer::parse("1.4.2").unwrap(), &range));
        assert!(!satisfies(SemVer::parse("1.4.3").unwrap(), &range));
    }

    #[test]
    fn empty_or_garbage_range_is_rejected() {
        assert!(matches!(
            parse_range(""),
            Err(PluginError::InvalidRange(_))
        ));
        assert!(parse_range("   ").is_err());
        assert!(parse_range(">=x.y.z").is_err());
    }

    #[test]
    fn check_range_reports_both_strings() {
        let err = check_range("2.0.0", ">=1.0.0 <2.0.0").unwrap_err();
        match err {
            PluginError::VersionMismatch { version, range } => {
                assert_eq!(version, "2.0.0");
                assert_eq!(range, ">=1.0.0 <2.0.0");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn check_range_accepts_satisfying_version() {
        assert!(check_range("1.5.0", ">=1.0.0 <2.0.0").is_ok());
    }
}
