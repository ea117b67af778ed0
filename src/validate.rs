//! Input normalization for command-line and config values.
//!
//! Resolver names and field policies accept a few natural synonyms
//! (`theirs`, `ours`, `latest`). Resolution is three-tier:
//! exact match → synonym lookup → error with suggestion.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

// ── Valid value sets ─────────────────────────────────────────

pub static VALID_RESOLVERS: LazyLock<HashSet<&str>> = LazyLock::new(|| {
    ["source-wins", "target-wins", "newest-wins", "field-merge", "manual"]
        .into_iter()
        .collect()
});

pub static VALID_POLICIES: LazyLock<HashSet<&str>> =
    LazyLock::new(|| ["source", "target", "newest"].into_iter().collect());

// ── Synonym maps ─────────────────────────────────────────────

pub static RESOLVER_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("source", "source-wins"),
        ("theirs", "source-wins"),
        ("remote", "source-wins"),
        ("target", "target-wins"),
        ("ours", "target-wins"),
        ("local", "target-wins"),
        ("newest", "newest-wins"),
        ("newer", "newest-wins"),
        ("latest", "newest-wins"),
        ("merge", "field-merge"),
        ("per-field", "field-merge"),
        ("review", "manual"),
        ("ask", "manual"),
    ]
    .into_iter()
    .collect()
});

pub static POLICY_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("theirs", "source"),
        ("remote", "source"),
        ("ours", "target"),
        ("local", "target"),
        ("keep", "target"),
        ("latest", "newest"),
        ("newer", "newest"),
    ]
    .into_iter()
    .collect()
});

fn canonical(input: &str) -> String {
    input.trim().to_lowercase().replace('_', "-")
}

/// Normalize a conflict resolver name via exact match or synonym lookup.
///
/// Returns the canonical name, or an error with the original input
/// and an optional suggestion.
pub fn normalize_resolver(input: &str) -> Result<String, (String, Option<String>)> {
    let lower = canonical(input);

    if VALID_RESOLVERS.contains(lower.as_str()) {
        return Ok(lower);
    }

    if let Some(&canonical) = RESOLVER_SYNONYMS.get(lower.as_str()) {
        return Ok(canonical.to_string());
    }

    let suggestion = find_closest_match(&lower, &VALID_RESOLVERS, &RESOLVER_SYNONYMS);
    Err((input.to_string(), suggestion))
}

/// Normalize a per-field merge policy.
pub fn normalize_policy(input: &str) -> Result<String, (String, Option<String>)> {
    let lower = canonical(input);

    if VALID_POLICIES.contains(lower.as_str()) {
        return Ok(lower);
    }

    if let Some(&canonical) = POLICY_SYNONYMS.get(lower.as_str()) {
        return Ok(canonical.to_string());
    }

    let suggestion = find_closest_match(&lower, &VALID_POLICIES, &POLICY_SYNONYMS);
    Err((input.to_string(), suggestion))
}

/// Closest of `names` to `input` within edit distance 3.
#[must_use]
pub fn suggest(input: &str, names: &[&str]) -> Option<String> {
    names
        .iter()
        .map(|n| (levenshtein_distance(input, n), *n))
        .filter(|(dist, _)| *dist <= 3)
        .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
        .map(|(_, n)| n.to_string())
}

/// Find the closest matching value across valid set and synonyms.
///
/// Ties go to the alphabetically first canonical name.
fn find_closest_match(
    input: &str,
    valid: &HashSet<&str>,
    synonyms: &HashMap<&str, &str>,
) -> Option<String> {
    valid
        .iter()
        .chain(synonyms.keys())
        .map(|&v| {
            // For synonyms, show what it maps to
            let shown = synonyms.get(v).copied().unwrap_or(v);
            (levenshtein_distance(input, v), shown)
        })
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, shown)| shown.to_string())
}

// ── Levenshtein distance ─────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let a_len = a.len();
    let b_len = b.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for i in 1..=a_len {
        curr[0] = i;
        for j in 1..=b_len {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1) // deletion
                .min(curr[j - 1] + 1) // insertion
                .min(prev[j - 1] + cost); // substitution
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Find existing record ids similar to a mistyped one.
///
/// Returns up to `max` suggestions with edit distance ≤ 3,
/// sorted by distance then alphabetically.
#[must_use]
pub fn find_similar_ids(searched: &str, existing: &[String], max: usize) -> Vec<String> {
    let mut candidates: Vec<(usize, &str)> = existing
        .iter()
        .map(|id| (levenshtein_distance(searched, id), id.as_str()))
        .filter(|(dist, _)| *dist <= 3)
        .collect();

    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

    candidates
        .into_iter()
        .take(max)
        .map(|(_, id)| id.to_string())
        .collect()
}
