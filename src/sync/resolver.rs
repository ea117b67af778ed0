//! Conflict resolvers: decide which values a MODIFIED or CONFLICT change writes.
//!
//! NEW changes always resolve to the full source properties; UNCHANGED and
//! DELETED always keep the target (deletion is a merge-time policy, not a
//! resolver decision). Resolvers only differ on divergent pairs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::model::PropertyMap;
use crate::sync::types::{Change, ChangeType};

/// The decision for one change.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Write these values. For divergent changes, only delta fields appear.
    Apply(PropertyMap),
    /// Leave the target as it is.
    KeepTarget,
    /// Needs a human; the record is skipped.
    Manual { reason: String },
}

/// Decides how a divergent pair is merged.
pub trait ConflictResolver {
    fn name(&self) -> String;

    /// Resolution for a MODIFIED or CONFLICT change.
    fn resolve_divergence(&self, change: &Change) -> Resolution;

    fn resolve(&self, change: &Change) -> Resolution {
        match change.change_type {
            ChangeType::New => Resolution::Apply(change.source_properties.clone()),
            ChangeType::Unchanged | ChangeType::Deleted => Resolution::KeepTarget,
            ChangeType::Modified | ChangeType::Conflict => self.resolve_divergence(change),
        }
    }
}

fn source_values<'a>(change: &Change, fields: impl IntoIterator<Item = &'a String>) -> PropertyMap {
    fields
        .into_iter()
        .filter_map(|name| change.delta.get(name).map(|d| (name.clone(), d.source.clone())))
        .collect()
}

fn apply_or_keep(values: PropertyMap) -> Resolution {
    if values.is_empty() {
        Resolution::KeepTarget
    } else {
        Resolution::Apply(values)
    }
}

/// Source modified later than target. A missing target timestamp counts as older.
fn source_is_newer(change: &Change) -> bool {
    match (change.source_modified, change.target_modified) {
        (Some(s), Some(t)) => s > t,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Every differing field takes the source value.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceWins;

impl ConflictResolver for SourceWins {
    fn name(&self) -> String {
        "source-wins".to_string()
    }

    fn resolve_divergence(&self, change: &Change) -> Resolution {
        apply_or_keep(source_values(change, change.delta.keys()))
    }
}

/// Every differing field keeps the target value.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetWins;

impl ConflictResolver for TargetWins {
    fn name(&self) -> String {
        "target-wins".to_string()
    }

    fn resolve_divergence(&self, _change: &Change) -> Resolution {
        Resolution::KeepTarget
    }
}

/// The side with the later modification timestamp wins the whole record.
/// Ties keep the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewestWins;

impl ConflictResolver for NewestWins {
    fn name(&self) -> String {
        "newest-wins".to_string()
    }

    fn resolve_divergence(&self, change: &Change) -> Resolution {
        if source_is_newer(change) {
            SourceWins.resolve_divergence(change)
        } else {
            Resolution::KeepTarget
        }
    }
}

/// Per-field merge policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldPolicy {
    Source,
    #[default]
    Target,
    Newest,
}

impl FieldPolicy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Target => "target",
            Self::Newest => "newest",
        }
    }
}

impl fmt::Display for FieldPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match crate::validate::normalize_policy(s) {
            Ok(p) if p == "source" => Ok(Self::Source),
            Ok(p) if p == "newest" => Ok(Self::Newest),
            Ok(_) => Ok(Self::Target),
            Err((input, suggestion)) => Err(Error::InvalidArgument(match suggestion {
                Some(s) => format!("unknown field policy '{input}' (did you mean '{s}'?)"),
                None => format!("unknown field policy '{input}', expected source, target or newest"),
            })),
        }
    }
}

/// Per-field policies; unlisted fields keep the target value.
#[derive(Debug, Clone, Default)]
pub struct FieldMerge {
    policies: BTreeMap<String, FieldPolicy>,
}

impl FieldMerge {
    #[must_use]
    pub fn new(policies: BTreeMap<String, FieldPolicy>) -> Self {
        Self { policies }
    }

    #[must_use]
    pub fn with_policy(mut self, field: &str, policy: FieldPolicy) -> Self {
        self.policies.insert(field.to_string(), policy);
        self
    }

    #[must_use]
    pub fn policy(&self, field: &str) -> FieldPolicy {
        self.policies.get(field).copied().unwrap_or_default()
    }
}

impl ConflictResolver for FieldMerge {
    fn name(&self) -> String {
        "field-merge".to_string()
    }

    fn resolve_divergence(&self, change: &Change) -> Resolution {
        let newer = source_is_newer(change);
        let fields = change.delta.keys().filter(|name| match self.policy(name) {
            FieldPolicy::Source => true,
            FieldPolicy::Target => false,
            FieldPolicy::Newest => newer,
        });
        apply_or_keep(source_values(change, fields))
    }
}

/// Marks every divergent record for human review.
#[derive(Debug, Clone, Copy, Default)]
pub struct Manual;

impl ConflictResolver for Manual {
    fn name(&self) -> String {
        "manual".to_string()
    }

    fn resolve_divergence(&self, change: &Change) -> Resolution {
        let fields: Vec<&str> = change.delta.keys().map(String::as_str).collect();
        Resolution::Manual {
            reason: format!("{} on {}", change.change_type, fields.join(", ")),
        }
    }
}

/// Parse one `field=policy` pair.
///
/// # Errors
///
/// Returns `InvalidArgument` for a missing `=` or an unknown policy.
pub fn parse_field_policy(spec: &str) -> Result<(String, FieldPolicy)> {
    let (field, policy) = spec
        .split_once('=')
        .ok_or_else(|| Error::InvalidArgument(format!("field policy '{spec}' must look like field=policy")))?;
    Ok((field.trim().to_string(), policy.parse()?))
}

/// Build a resolver by name. `policies` only applies to `field-merge`.
///
/// # Errors
///
/// Returns `UnknownResolver` with a suggestion when the name is not known.
pub fn parse_resolver(
    name: &str,
    policies: BTreeMap<String, FieldPolicy>,
) -> Result<Box<dyn ConflictResolver>> {
    let canonical = crate::validate::normalize_resolver(name).map_err(|(input, suggestion)| {
        Error::UnknownResolver(match suggestion {
            Some(s) => format!("{input} (did you mean '{s}'?)"),
            None => input,
        })
    })?;
    match canonical.as_str() {
        "source-wins" => Ok(Box::new(SourceWins)),
        "target-wins" => Ok(Box::new(TargetWins)),
        "newest-wins" => Ok(Box::new(NewestWins)),
        "field-merge" => Ok(Box::new(FieldMerge::new(policies))),
        "manual" => Ok(Box::new(Manual)),
        other => Err(Error::UnknownResolver(other.to_string())),
    }
}
