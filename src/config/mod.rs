//! Configuration management.
//!
//! gsync reads an optional JSON file with defaults for matching, conflict
//! resolution and dependency traversal. Command-line flags always win over
//! configured values.
//!
//! Resolution order for the file:
//! 1. `--config <file>`
//! 2. `GSYNC_CONFIG` environment variable
//! 3. `~/.gsync/config.json`
//!
//! A missing file means defaults; a malformed one is a configuration error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::RecordType;
use crate::sync::{
    parse_field_policy, parse_resolver, parse_strategy, ConflictResolver, FieldPolicy, MatchStrategy,
};

/// Default strategy when neither flags nor config name one.
pub const DEFAULT_STRATEGY: &str = "identity";
/// Default resolver when neither flags nor config name one.
pub const DEFAULT_RESOLVER: &str = "source-wins";

/// Contents of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Record type → match strategy spec (`identity`, `field:a,b`, `hybrid`, ...).
    pub strategies: BTreeMap<String, String>,
    /// Record type → key fields used by `field`/`hybrid` specs without a list.
    pub match_fields: BTreeMap<String, Vec<String>>,
    pub case_insensitive: bool,
    pub resolver: Option<String>,
    /// Field → policy (`source`, `target`, `newest`) for `field-merge`.
    pub field_policies: BTreeMap<String, String>,
    pub max_depth: Option<usize>,
    pub fail_fast: bool,
    /// Name recorded in audit events.
    pub actor: Option<String>,
}

/// The global gsync directory, `~/.gsync`.
#[must_use]
pub fn global_gsync_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".gsync"))
}

/// Resolve the config file location.
///
/// Returns `None` only when no explicit path or env var is given and no
/// home directory can be found.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var("GSYNC_CONFIG") {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    global_gsync_dir().map(|dir| dir.join("config.json"))
}

impl SyncConfig {
    /// Load from the resolved location; missing files yield defaults.
    ///
    /// An explicit `--config` that does not exist is an error.
    ///
    /// # Errors
    ///
    /// Returns `Config` for unreadable or malformed files.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let Some(path) = resolve_config_path(explicit) else {
            return Ok(Self::default());
        };
        if !path.exists() {
            if explicit.is_some() {
                return Err(Error::Config(format!("config file not found: {}", path.display())));
            }
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_file(&path)
    }

    /// Load and check one file.
    ///
    /// # Errors
    ///
    /// Returns `Config` when the file cannot be read or parsed, and
    /// `UnknownRecordType` for an unknown type key.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.check()?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        for key in self.strategies.keys().chain(self.match_fields.keys()) {
            key.parse::<RecordType>()?;
        }
        Ok(())
    }

    fn lookup<'a, V>(map: &'a BTreeMap<String, V>, record_type: RecordType) -> Option<&'a V> {
        map.iter()
            .find(|(k, _)| k.parse::<RecordType>().is_ok_and(|rt| rt == record_type))
            .map(|(_, v)| v)
    }

    /// Strategy spec for `record_type`: flag, then config, then identity.
    ///
    /// A bare `field`/`hybrid` spec picks up configured key fields.
    #[must_use]
    pub fn strategy_spec(&self, record_type: RecordType, flag: Option<&str>) -> String {
        let spec = flag
            .map(str::to_string)
            .or_else(|| Self::lookup(&self.strategies, record_type).cloned())
            .unwrap_or_else(|| DEFAULT_STRATEGY.to_string());
        match Self::lookup(&self.match_fields, record_type) {
            Some(fields)
                if !fields.is_empty()
                    && matches!(spec.trim().to_lowercase().as_str(), "field" | "field-ci" | "hybrid" | "hybrid-ci") =>
            {
                format!("{}:{}", spec.trim(), fields.join(","))
            }
            _ => spec,
        }
    }

    /// Build the match strategy for `record_type`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMatchStrategy` for a bad spec.
    pub fn strategy(
        &self,
        record_type: RecordType,
        flag: Option<&str>,
        case_insensitive: bool,
    ) -> Result<Box<dyn MatchStrategy>> {
        parse_strategy(
            &self.strategy_spec(record_type, flag),
            record_type,
            case_insensitive || self.case_insensitive,
        )
    }

    /// Build the resolver: flag, then config, then source-wins. Field
    /// policies from flags override configured ones.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResolver` or `InvalidArgument` for bad policies.
    pub fn resolver(&self, flag: Option<&str>, policies: &[String]) -> Result<Box<dyn ConflictResolver>> {
        let mut merged = BTreeMap::new();
        for (field, policy) in &self.field_policies {
            merged.insert(field.clone(), policy.parse::<FieldPolicy>()?);
        }
        for spec in policies {
            let (field, policy) = parse_field_policy(spec)?;
            merged.insert(field, policy);
        }
        let name = flag
            .or(self.resolver.as_deref())
            .unwrap_or(DEFAULT_RESOLVER);
        parse_resolver(name, merged)
    }

    /// Audit actor: config, then `GSYNC_ACTOR`, then git user name, then
    /// `USER`.
    #[must_use]
    pub fn actor(&self) -> String {
        self.actor.clone().unwrap_or_else(default_actor)
    }
}

/// Get the default actor name.
#[must_use]
pub fn default_actor() -> String {
    if let Ok(actor) = std::env::var("GSYNC_ACTOR") {
        if !actor.is_empty() {
            return actor;
        }
    }

    if let Ok(output) = std::process::Command::new("git")
        .args(["config", "user.name"])
        .output()
    {
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_explicit_path_wins() {
        let explicit = PathBuf::from("/custom/gsync.json");
        assert_eq!(resolve_config_path(Some(&explicit)), Some(explicit));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SyncConfig::load(Some(&dir.path().join("nope.json"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_and_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{
                "strategies": {"entry": "hybrid", "tags": "field"},
                "match_fields": {"entry": ["lexeme_form"]},
                "resolver": "field-merge",
                "field_policies": {"gloss": "theirs"},
                "max_depth": 3
            }"#,
        );
        let config = SyncConfig::load(Some(&path)).unwrap();
        assert_eq!(config.max_depth, Some(3));
        assert_eq!(config.strategy_spec(RecordType::Entry, None), "hybrid:lexeme_form");
        assert_eq!(config.strategy_spec(RecordType::Tag, None), "field");
        assert_eq!(config.strategy_spec(RecordType::Sense, None), "identity");
        assert_eq!(config.strategy_spec(RecordType::Entry, Some("identity")), "identity");
        assert_eq!(config.strategy(RecordType::Entry, None, false).unwrap().name(), "hybrid:lexeme_form");

        assert_eq!(config.resolver(None, &[]).unwrap().name(), "field-merge");
        assert_eq!(config.resolver(Some("ours"), &[]).unwrap().name(), "target-wins");
        assert!(config.resolver(None, &["gloss=sometimes".to_string()]).is_err());
    }

    #[test]
    fn test_malformed_config_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"{"resolvr": "manual"}"#);
        assert!(matches!(SyncConfig::load_file(&path), Err(Error::Config(_))));

        let path = write(&dir, r#"{"strategies": {"widget": "identity"}}"#);
        assert!(matches!(SyncConfig::load_file(&path), Err(Error::UnknownRecordType(_))));
    }

    #[test]
    fn test_default_actor() {
        assert!(!default_actor().is_empty());
        let config = SyncConfig {
            actor: Some("importer".to_string()),
            ..SyncConfig::default()
        };
        assert_eq!(config.actor(), "importer");
    }
}
