// Version normalization, stable filtering and semantic ordering
//
// Upstream catalogs hand back tags and version fields in many shapes
// (`v1.2.3`, `release-1.2.3`, `6.0.0RC1`). Everything is reduced to one
// grammar here before selection or persistence sees it.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

lazy_static! {
    /// `^\d+(\.\d+)*([.-]?(alpha|beta|rc|dev)\d*)?$`, marker case-insensitive
    static ref VERSION_SHAPE: Regex =
        Regex::new(r"(?i)^(\d+(?:\.\d+)*)(?:[.-]?(alpha|beta|rc|dev)(\d*))?$").unwrap();
    static ref PRERELEASE_MARKER: Regex = Regex::new(r"(?i)alpha|beta|rc|dev").unwrap();
}

/// Prefixes stripped before validation, matched case-insensitively
const KNOWN_PREFIXES: &[&str] = &["release-", "v"];

/// Pre-release marker, ordered from least to most mature
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreRelease {
    Dev,
    Alpha,
    Beta,
    Rc,
}

impl PreRelease {
    fn parse(marker: &str) -> Option<Self> {
        match marker.to_ascii_lowercase().as_str() {
            "dev" => Some(PreRelease::Dev),
            "alpha" => Some(PreRelease::Alpha),
            "beta" => Some(PreRelease::Beta),
            "rc" => Some(PreRelease::Rc),
            _ => None,
        }
    }
}

/// A normalized release identifier such as `8.3.1` or `6.0.0RC1`
#[derive(Debug, Clone)]
pub struct Version {
    text: String,
    segments: Vec<u64>,
    pre: Option<(PreRelease, u64)>,
}

impl Version {
    /// Parse a string that is already in normalized form
    pub fn parse(text: &str) -> Option<Self> {
        let caps = VERSION_SHAPE.captures(text)?;

        let segments = caps
            .get(1)?
            .as_str()
            .split('.')
            .map(|s| s.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;

        let pre = match caps.get(2) {
            Some(marker) => {
                let kind = PreRelease::parse(marker.as_str())?;
                let number = match caps.get(3).map(|m| m.as_str()).unwrap_or("") {
                    "" => 0,
                    n => n.parse::<u64>().ok()?,
                };
                Some((kind, number))
            }
            None => None,
        };

        Some(Self {
            text: text.to_string(),
            segments,
            pre,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// First numeric segment, used to group versions by release line
    pub fn major(&self) -> u64 {
        self.segments.first().copied().unwrap_or(0)
    }

    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    /// Same numbers and pre-release marker, spelling aside (`1.0` and `1.0.0`)
    pub fn same_release(&self, other: &Self) -> bool {
        self.cmp_segments(other) == Ordering::Equal && self.cmp_pre(other) == Ordering::Equal
    }

    fn cmp_segments(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            let a = self.segments.get(i).copied().unwrap_or(0);
            let b = other.segments.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }

    fn cmp_pre(&self, other: &Self) -> Ordering {
        // A final release sorts after any pre-release of the same numbers
        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_segments(other)
            .then_with(|| self.cmp_pre(other))
            .then_with(|| self.text.cmp(&other.text))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Version::parse(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid version '{}'", text)))
    }
}

/// Strip known prefixes (`v`, `release-`) from a raw tag or version field
pub fn strip_prefixes(raw: &str) -> &str {
    let mut current = raw.trim();
    loop {
        let before = current;
        for prefix in KNOWN_PREFIXES {
            if current.len() > prefix.len()
                && current.is_char_boundary(prefix.len())
                && current[..prefix.len()].eq_ignore_ascii_case(prefix)
            {
                current = &current[prefix.len()..];
            }
        }
        if current == before {
            return current;
        }
    }
}

/// True when the string carries no alpha/beta/rc/dev marker
pub fn is_stable(version: &str) -> bool {
    !PRERELEASE_MARKER.is_match(version)
}

/// Normalize one raw version string
///
/// Returns `None` when the string does not match the version grammar after
/// prefix stripping, or when `stable_only` is set and it carries a
/// pre-release marker.
pub fn normalize(raw: &str, stable_only: bool) -> Option<Version> {
    let stripped = strip_prefixes(raw);
    if stable_only && !is_stable(stripped) {
        return None;
    }
    Version::parse(stripped)
}

/// Normalize, filter, deduplicate and sort a batch of raw versions (ascending)
pub fn normalize_all<I, S>(raw: I, stable_only: bool) -> Vec<Version>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut versions: Vec<Version> = raw
        .into_iter()
        .filter_map(|r| normalize(r.as_ref(), stable_only))
        .collect();
    versions.sort();
    // Equal releases sort next to each other; the first spelling wins
    versions.dedup_by(|later, kept| later.same_release(kept));
    versions
}
