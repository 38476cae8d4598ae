//! Semantic version handling and constraint resolution
//!
//! Registry clients never see a leading `v`: [`sanitize_version`] strips
//! exactly one if present and is used for object names and protocol output.
//! Constraint expressions are a comma-separated list of primitives using the
//! operators `=`, `!=`, `>`, `>=`, `<`, `<=`, and the pessimistic `~>`.

use semver::Version as SemverVersion;

use crate::crd::ModuleVersion;
use crate::{Error, Result};

/// Removes a single leading `v` from a version string, if present.
pub fn sanitize_version(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// Parses a version string leniently: an optional leading `v` is tolerated
/// and missing minor/patch components default to zero, so `v1.2` parses as
/// `1.2.0`.
pub fn parse_version(version: &str) -> Result<SemverVersion> {
    let core = sanitize_version(version.trim());
    if core.is_empty() {
        return Err(Error::version("empty version string"));
    }

    // Pad the numeric core up to major.minor.patch, leaving any
    // pre-release/build suffix attached to the last component.
    let dots = core
        .split(['-', '+'])
        .next()
        .unwrap_or(core)
        .matches('.')
        .count();
    let padded = match dots {
        0 => {
            let (head, tail) = split_suffix(core);
            format!("{head}.0.0{tail}")
        }
        1 => {
            let (head, tail) = split_suffix(core);
            format!("{head}.0{tail}")
        }
        _ => core.to_string(),
    };

    SemverVersion::parse(&padded)
        .map_err(|e| Error::version(format!("unable to parse '{version}' as semver: {e}")))
}

fn split_suffix(version: &str) -> (&str, &str) {
    match version.find(['-', '+']) {
        Some(idx) => version.split_at(idx),
        None => (version, ""),
    }
}

/// A single constraint primitive applied to candidate versions.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    op: ConstraintOp,
    version: SemverVersion,
    /// Number of numeric components the user wrote, which scopes the
    /// pessimistic operator: `~> 1.2.3` allows `< 1.3.0` while `~> 1.2`
    /// allows `< 2.0.0`.
    segments: usize,
}

/// The comparison operator of a [`Constraint`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintOp {
    /// `=` (also the default when no operator is written)
    Equal,
    /// `!=`
    NotEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `~>` pessimistic: at least the given version, below the next
    /// significant release
    Pessimistic,
}

impl Constraint {
    /// Parses one primitive like `>= 1.0.0` or `~> 1.2`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let (op, rest) = if let Some(rest) = trimmed.strip_prefix("~>") {
            (ConstraintOp::Pessimistic, rest)
        } else if let Some(rest) = trimmed.strip_prefix(">=") {
            (ConstraintOp::GreaterEqual, rest)
        } else if let Some(rest) = trimmed.strip_prefix("<=") {
            (ConstraintOp::LessEqual, rest)
        } else if let Some(rest) = trimmed.strip_prefix("!=") {
            (ConstraintOp::NotEqual, rest)
        } else if let Some(rest) = trimmed.strip_prefix('>') {
            (ConstraintOp::Greater, rest)
        } else if let Some(rest) = trimmed.strip_prefix('<') {
            (ConstraintOp::Less, rest)
        } else if let Some(rest) = trimmed.strip_prefix('=') {
            (ConstraintOp::Equal, rest)
        } else {
            (ConstraintOp::Equal, trimmed)
        };

        let literal = rest.trim();
        if literal.is_empty() {
            return Err(Error::version(format!(
                "constraint '{input}' is missing a version"
            )));
        }

        let segments = sanitize_version(literal)
            .split(['-', '+'])
            .next()
            .unwrap_or(literal)
            .split('.')
            .count();

        Ok(Self {
            op,
            version: parse_version(literal)?,
            segments,
        })
    }

    /// Returns the operator of this constraint.
    pub fn op(&self) -> ConstraintOp {
        self.op
    }

    /// Whether the candidate satisfies this constraint.
    pub fn matches(&self, candidate: &SemverVersion) -> bool {
        match self.op {
            ConstraintOp::Equal => candidate == &self.version,
            ConstraintOp::NotEqual => candidate != &self.version,
            ConstraintOp::Greater => candidate > &self.version,
            ConstraintOp::GreaterEqual => candidate >= &self.version,
            ConstraintOp::Less => candidate < &self.version,
            ConstraintOp::LessEqual => candidate <= &self.version,
            ConstraintOp::Pessimistic => {
                candidate >= &self.version && candidate < &self.pessimistic_upper_bound()
            }
        }
    }

    fn pessimistic_upper_bound(&self) -> SemverVersion {
        if self.segments >= 3 {
            SemverVersion::new(self.version.major, self.version.minor + 1, 0)
        } else {
            SemverVersion::new(self.version.major + 1, 0, 0)
        }
    }
}

/// Parses a comma-separated constraint expression such as
/// `>= 1.0.0, < 2.0.0, != 1.0.2`.
pub fn parse_constraints(expression: &str) -> Result<Vec<Constraint>> {
    expression
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(Constraint::parse)
        .collect()
}

/// Resolves a constraint expression against a list of upstream tags and
/// returns the matched versions, sanitised, in tag order.
///
/// All positive constraints are evaluated first (union over the tags), then
/// every `!=` constraint subtracts from the matched set, so the result does
/// not depend on the order the constraints were written in. Tags that do not
/// parse as semantic versions are skipped.
pub fn resolve_constraints(constraints: &[Constraint], tags: &[String]) -> Vec<String> {
    let mut matched: Vec<(SemverVersion, String)> = Vec::new();

    for tag in tags {
        let Ok(candidate) = parse_version(tag) else {
            tracing::debug!(tag = %tag, "skipping tag that is not a semantic version");
            continue;
        };

        let positive = constraints
            .iter()
            .filter(|c| c.op() != ConstraintOp::NotEqual)
            .any(|c| c.matches(&candidate));
        if positive && !matched.iter().any(|(v, _)| v == &candidate) {
            matched.push((candidate, sanitize_version(tag).to_string()));
        }
    }

    for exclusion in constraints
        .iter()
        .filter(|c| c.op() == ConstraintOp::NotEqual)
    {
        matched.retain(|(v, _)| exclusion.matches(v));
    }

    matched.into_iter().map(|(_, tag)| tag).collect()
}

/// Returns the sanitised latest semantic version among the module's spec
/// entries, or None when no entry parses.
pub fn latest_version(entries: &[ModuleVersion]) -> Option<String> {
    entries
        .iter()
        .filter_map(|entry| {
            parse_version(&entry.version)
                .ok()
                .map(|parsed| (parsed, sanitize_version(&entry.version).to_string()))
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, sanitized)| sanitized)
}

/// Returns the `limit` highest entries in ascending semver order, preserving
/// the version strings as the user wrote them. Entries that do not parse are
/// dropped. A limit of zero or less returns the input unchanged.
pub fn versions_to_keep(entries: &[ModuleVersion], limit: i64) -> Vec<ModuleVersion> {
    if limit <= 0 {
        return entries.to_vec();
    }

    let mut parsed: Vec<(SemverVersion, ModuleVersion)> = entries
        .iter()
        .filter_map(|entry| {
            parse_version(&entry.version)
                .ok()
                .map(|v| (v, entry.clone()))
        })
        .collect();
    parsed.sort_by(|(a, _), (b, _)| a.cmp(b));

    let skip = parsed.len().saturating_sub(limit as usize);
    parsed.into_iter().skip(skip).map(|(_, e)| e).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sanitize_strips_exactly_one_leading_v() {
        assert_eq!(sanitize_version("v1.0.0"), "1.0.0");
        assert_eq!(sanitize_version("1.0.0"), "1.0.0");
        assert_eq!(sanitize_version("vv1.0.0"), "v1.0.0");
        assert_eq!(sanitize_version(""), "");
    }

    #[test]
    fn lenient_parse_pads_missing_components() {
        assert_eq!(parse_version("v1.2").unwrap(), SemverVersion::new(1, 2, 0));
        assert_eq!(parse_version("2").unwrap(), SemverVersion::new(2, 0, 0));
        assert_eq!(
            parse_version("1.2.3").unwrap(),
            SemverVersion::new(1, 2, 3)
        );
        assert!(parse_version("not-a-version").is_err());
        assert!(parse_version("").is_err());
    }

    #[test]
    fn constraint_operators_compare_as_expected() {
        let v = |s: &str| parse_version(s).unwrap();

        assert!(Constraint::parse("= 1.0.0").unwrap().matches(&v("1.0.0")));
        assert!(Constraint::parse("1.0.0").unwrap().matches(&v("1.0.0")));
        assert!(Constraint::parse("> 1.0.0").unwrap().matches(&v("1.0.1")));
        assert!(!Constraint::parse("> 1.0.0").unwrap().matches(&v("1.0.0")));
        assert!(Constraint::parse(">= 1.0.0").unwrap().matches(&v("1.0.0")));
        assert!(Constraint::parse("< 2.0.0").unwrap().matches(&v("1.9.9")));
        assert!(Constraint::parse("<= 2.0.0").unwrap().matches(&v("2.0.0")));
        assert!(Constraint::parse("!= 1.0.1").unwrap().matches(&v("1.0.0")));
        assert!(!Constraint::parse("!= 1.0.1").unwrap().matches(&v("1.0.1")));
    }

    #[test]
    fn pessimistic_constraint_scopes_to_written_precision() {
        let patch = Constraint::parse("~> 1.2.3").unwrap();
        assert!(patch.matches(&parse_version("1.2.3").unwrap()));
        assert!(patch.matches(&parse_version("1.2.9").unwrap()));
        assert!(!patch.matches(&parse_version("1.3.0").unwrap()));

        let minor = Constraint::parse("~> 1.2").unwrap();
        assert!(minor.matches(&parse_version("1.9.0").unwrap()));
        assert!(!minor.matches(&parse_version("2.0.0").unwrap()));
    }

    #[test]
    fn resolver_unions_positives_then_subtracts_exclusions() {
        // Scenario from the constraint resolver contract: upstream tags
        // v1.0.0..v2.0.1, constraint ">= 1.0.0, < 2.0.0, != 1.0.1".
        let upstream = tags(&["v1.0.0", "v1.0.1", "v1.1.0", "v2.0.0", "v2.0.1"]);
        let constraints = parse_constraints(">= 1.0.0, < 2.0.0, != 1.0.1").unwrap();

        let matched = resolve_constraints(&constraints, &upstream);
        assert_eq!(matched, vec!["1.0.0".to_string(), "1.1.0".to_string()]);
    }

    #[test]
    fn resolver_result_is_order_insensitive() {
        let upstream = tags(&["v1.0.0", "v1.0.1", "v1.1.0"]);
        let forward = parse_constraints(">= 1.0.0, != 1.0.1").unwrap();
        let backward = parse_constraints("!= 1.0.1, >= 1.0.0").unwrap();

        assert_eq!(
            resolve_constraints(&forward, &upstream),
            resolve_constraints(&backward, &upstream)
        );
    }

    #[test]
    fn resolver_skips_unparseable_tags_and_dedupes() {
        let upstream = tags(&["v1.0.0", "nightly", "1.0.0"]);
        let constraints = parse_constraints(">= 1.0.0").unwrap();

        let matched = resolve_constraints(&constraints, &upstream);
        assert_eq!(matched, vec!["1.0.0".to_string()]);
    }

    #[test]
    fn latest_version_handles_mixed_prefixes() {
        let entries = vec![
            ModuleVersion::entry("v1.0.0"),
            ModuleVersion::entry("v1.1.0"),
            ModuleVersion::entry("1.2.0"),
        ];
        assert_eq!(latest_version(&entries).as_deref(), Some("1.2.0"));
        assert_eq!(latest_version(&[]), None);
    }

    #[test]
    fn history_limit_keeps_highest_entries_verbatim() {
        let entries = vec![
            ModuleVersion::entry("v1.0.0"),
            ModuleVersion::entry("2.0.0"),
            ModuleVersion::entry("v1.5.0"),
        ];

        let kept = versions_to_keep(&entries, 2);
        let versions: Vec<&str> = kept.iter().map(|e| e.version.as_str()).collect();
        assert_eq!(versions, vec!["v1.5.0", "2.0.0"]);

        assert_eq!(versions_to_keep(&entries, 0).len(), 3);
        assert_eq!(versions_to_keep(&entries, 10).len(), 3);
    }
}
