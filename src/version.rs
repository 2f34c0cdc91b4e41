//! Version and constraint algebra.
//!
//! Versions are a tagged union rather than a trait-object hierarchy, matching
//! the fixed, closed set of shapes a dependency can take. Matching and
//! ordering dispatch on the variant pair rather than through polymorphism.

use std::cmp::Ordering;
use std::fmt;

use semver::{Version as SemverVersion, VersionReq};
use serde::{Deserialize, Serialize};

/// An opaque, source-defined immutable identifier (a VCS revision, a commit
/// hash, ...). Two revisions are comparable only by equality, never by order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision(pub String);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A concrete version of a project, per the data model's `Version` sum type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Version {
    Semver(SemverVersion),
    PlainTag(String),
    Branch { name: String, is_default: bool },
    Revision(Revision),
}

impl Version {
    pub fn is_semver(&self) -> bool {
        matches!(self, Version::Semver(_))
    }

    /// The revision this version resolves to, if it has already been paired.
    /// `Version` alone never carries pairing; only `PairedVersion` does.
    pub fn as_revision(&self) -> Option<&Revision> {
        match self {
            Version::Revision(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Semver(v) => write!(f, "{v}"),
            Version::PlainTag(t) => write!(f, "{t}"),
            Version::Branch { name, .. } => write!(f, "{name}"),
            Version::Revision(r) => write!(f, "{r}"),
        }
    }
}

/// A non-`Revision` version bound to the specific `Revision` it was resolved
/// from (e.g. tag `v1.0.0` -> some commit sha). Pairing is discovered from
/// the source, never guessed by the constraint algebra.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedVersion {
    pub unpaired: Version,
    pub revision: Revision,
}

impl PairedVersion {
    pub fn new(unpaired: Version, revision: Revision) -> Self {
        debug_assert!(
            !matches!(unpaired, Version::Revision(_)),
            "a Revision variant cannot itself be paired"
        );
        Self { unpaired, revision }
    }

    fn sort_stratum(&self) -> u8 {
        match &self.unpaired {
            Version::Semver(_) => 0,
            Version::Branch { is_default: true, .. } => 1,
            Version::Branch { is_default: false, .. } => 2,
            Version::PlainTag(_) => 3,
            Version::Revision(_) => unreachable!("paired version cannot wrap a Revision"),
        }
    }
}

impl fmt::Display for PairedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.unpaired, self.revision)
    }
}

/// Sort order requested for candidate enumeration. Never affects matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortMode {
    Upgrade,
    Downgrade,
}

/// Orders candidate `PairedVersion`s by stratum: paired semver first
/// (highest/lowest first per mode), then branches (default branch sorts
/// above non-default branches within the branch stratum), then plain tags,
/// then revisions last, comparable only by equality so they retain
/// encounter order among themselves.
pub fn compare_candidates(a: &PairedVersion, b: &PairedVersion, mode: SortMode) -> Ordering {
    let (sa, sb) = (a.sort_stratum(), b.sort_stratum());
    if sa != sb {
        return sa.cmp(&sb);
    }
    match (&a.unpaired, &b.unpaired) {
        (Version::Semver(va), Version::Semver(vb)) => match mode {
            SortMode::Upgrade => vb.cmp(va),
            SortMode::Downgrade => va.cmp(vb),
        },
        _ => Ordering::Equal,
    }
}

/// A predicate over `Version`s, `Constraint`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constraint {
    Any,
    None,
    SemverRange(#[serde(with = "semver_req_serde")] VersionReq),
    SingleVersion(Version),
    Revision(Revision),
}

mod semver_req_serde {
    use semver::VersionReq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(req: &VersionReq, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&req.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<VersionReq, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl Constraint {
    pub fn matches(&self, v: &Version) -> bool {
        match self {
            Constraint::Any => true,
            Constraint::None => false,
            Constraint::SemverRange(req) => match v {
                Version::Semver(sv) => req.matches(sv),
                _ => false,
            },
            Constraint::SingleVersion(target) => target == v,
            Constraint::Revision(rev) => v.as_revision() == Some(rev),
        }
    }

    /// Whether a paired version satisfies this constraint, checking the
    /// paired revision when the constraint is itself revision-shaped.
    pub fn matches_paired(&self, v: &PairedVersion) -> bool {
        match self {
            Constraint::Revision(rev) => &v.revision == rev,
            other => other.matches(&v.unpaired),
        }
    }

    /// Whether `self` and `other` can ever both be satisfied by some version
    /// (non-empty intersection would exist), without computing that
    /// intersection's exact shape.
    pub fn matches_any(&self, other: &Constraint) -> bool {
        !matches!(self.intersect(other), Constraint::None)
    }

    pub fn identical(&self, other: &Constraint) -> bool {
        self == other
    }

    /// `a ∩ b`. Commutative and associative by construction: every arm below
    /// is symmetric in its treatment of the two operands except where one
    /// side is the identity (`Any`) or the absorbing element (`None`).
    pub fn intersect(&self, other: &Constraint) -> Constraint {
        use Constraint::*;
        match (self, other) {
            (None, _) | (_, None) => Constraint::None,
            (Any, c) | (c, Any) => c.clone(),
            (SingleVersion(v), c) | (c, SingleVersion(v)) => {
                if c.matches(v) {
                    SingleVersion(v.clone())
                } else {
                    Constraint::None
                }
            }
            (Revision(a), Revision(b)) => {
                if a == b {
                    Revision(a.clone())
                } else {
                    Constraint::None
                }
            }
            (Revision(_), SemverRange(_)) | (SemverRange(_), Revision(_)) => Constraint::None,
            (SemverRange(a), SemverRange(b)) => {
                // VersionReq has no general intersection; represent the
                // intersection as the conjunction of both comparator sets by
                // re-parsing a combined comparator string. Both sides remain
                // individually enforced since `matches` ANDs them via the
                // combined requirement string.
                let combined = format!("{a}, {b}");
                match combined.parse::<VersionReq>() {
                    Ok(req) => SemverRange(req),
                    Err(_) => SemverRange(a.clone()),
                }
            }
        }
    }

    /// Canonical textual form for the input digest.
    pub fn canonical_form(&self) -> String {
        match self {
            Constraint::Any => String::new(),
            Constraint::None => "none".to_string(),
            Constraint::SemverRange(req) => req.to_string(),
            Constraint::SingleVersion(v) => v.to_string(),
            Constraint::Revision(r) => format!("rev:{r}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn semver(s: &str) -> Version {
        Version::Semver(SemverVersion::parse(s).unwrap())
    }

    fn range(s: &str) -> Constraint {
        Constraint::SemverRange(VersionReq::parse(s).unwrap())
    }

    #[test]
    fn any_is_identity_for_intersect() {
        let c = range(">=1.0.0, <2.0.0");
        assert_eq!(c.intersect(&Constraint::Any), c);
        assert_eq!(Constraint::Any.intersect(&c), c);
    }

    #[test]
    fn none_is_absorbing() {
        let c = range(">=1.0.0");
        assert_eq!(c.intersect(&Constraint::None), Constraint::None);
    }

    #[test]
    fn disjoint_ranges_intersect_to_none_on_matching() {
        let a = range(">=2.0.0, <4.0.0");
        let b = range(">=4.0.0, <5.0.0");
        let inter = a.intersect(&b);
        assert!(!inter.matches(&semver("3.0.0")));
        assert!(!inter.matches(&semver("4.5.0")));
    }

    #[test]
    fn overlapping_ranges_match_their_overlap() {
        let a = range(">=2.0.0, <4.0.0");
        let b = range(">=3.0.0, <5.0.0");
        let inter = a.intersect(&b);
        assert!(inter.matches(&semver("3.6.9")));
        assert!(!inter.matches(&semver("2.5.0")));
        assert!(!inter.matches(&semver("4.5.0")));
    }

    #[test]
    fn intersect_is_commutative_on_matching_behavior() {
        let probes = ["1.0.0", "2.0.0", "3.6.9", "4.0.0", "5.0.0"];
        let a = range(">=2.0.0, <4.0.0");
        let b = range(">=3.0.0, <5.0.0");
        let ab = a.intersect(&b);
        let ba = b.intersect(&a);
        for p in probes {
            let v = semver(p);
            assert_eq!(ab.matches(&v), ba.matches(&v), "mismatch at {p}");
        }
    }

    #[test]
    fn intersect_is_associative_on_matching_behavior() {
        let probes = ["1.0.0", "2.0.0", "3.0.0", "3.6.9", "4.0.0", "5.0.0", "6.0.0"];
        let a = range(">=2.0.0, <5.0.0");
        let b = range(">=3.0.0, <6.0.0");
        let c = range(">=1.0.0, <4.5.0");
        let left = a.intersect(&b).intersect(&c);
        let right = a.intersect(&b.intersect(&c));
        for p in probes {
            let v = semver(p);
            assert_eq!(left.matches(&v), right.matches(&v), "mismatch at {p}");
        }
    }

    #[test]
    fn revision_constraint_matches_only_paired_same_revision() {
        let rev = Revision("deadbeef".into());
        let c = Constraint::Revision(rev.clone());
        let paired_same = PairedVersion::new(Version::PlainTag("v1".into()), rev.clone());
        let paired_other =
            PairedVersion::new(Version::PlainTag("v1".into()), Revision("cafef00d".into()));
        assert!(c.matches_paired(&paired_same));
        assert!(!c.matches_paired(&paired_other));
    }

    #[test]
    fn semver_range_never_matches_branch_or_tag() {
        let c = range(">=1.0.0");
        assert!(!c.matches(&Version::PlainTag("v1.0.0".into())));
        assert!(!c.matches(&Version::Branch { name: "main".into(), is_default: true }));
    }
}
