//! Match strategies: pairing a source record with its target counterpart.
//!
//! Strategies are selected per record type by name:
//!
//! | spec                    | strategy                                  |
//! |-------------------------|-------------------------------------------|
//! | `identity`              | same record id                            |
//! | `field`                 | type's default key fields, exact          |
//! | `field:a,b`             | composite key over `a` and `b`, exact     |
//! | `field-ci:a,b`          | composite key, case-insensitive           |
//! | `hybrid` / `hybrid:a,b` | identity first, then the field key        |
//! | `hybrid-ci:a,b`         | identity first, then case-insensitive key |

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::model::{Extractable, PropertyValue, Record, RecordId, RecordKind, RecordType};

/// Result of looking up one source record.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome<'a> {
    Matched(&'a Record),
    Unmatched,
    /// More than one candidate shares the key. The caller treats the
    /// source record as unmatched and reports these ids.
    Ambiguous(Vec<RecordId>),
}

/// Target records of one type, indexed for identity lookup.
#[derive(Debug)]
pub struct CandidateSet<'a> {
    records: &'a [Record],
    by_id: HashMap<RecordId, usize>,
}

impl<'a> CandidateSet<'a> {
    #[must_use]
    pub fn new(records: &'a [Record]) -> Self {
        let by_id = records.iter().enumerate().map(|(i, r)| (r.id, i)).collect();
        Self { records, by_id }
    }

    #[must_use]
    pub fn by_id(&self, id: &RecordId) -> Option<&'a Record> {
        self.by_id.get(id).map(|&i| &self.records[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Record> {
        self.records.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A rule for finding a source record's counterpart among target candidates.
pub trait MatchStrategy {
    /// Canonical strategy spec, e.g. `field-ci:gloss`.
    fn name(&self) -> String;

    fn find_match<'a>(&self, source: &Record, candidates: &CandidateSet<'a>) -> MatchOutcome<'a>;

    /// Same-id targets are paired for the whole batch before any other
    /// lookup runs.
    fn prefers_identity(&self) -> bool {
        false
    }
}

/// Match by record identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMatch;

impl MatchStrategy for IdentityMatch {
    fn name(&self) -> String {
        "identity".to_string()
    }

    fn find_match<'a>(&self, source: &Record, candidates: &CandidateSet<'a>) -> MatchOutcome<'a> {
        candidates
            .by_id(&source.id)
            .filter(|t| t.record_type() == source.record_type())
            .map_or(MatchOutcome::Unmatched, MatchOutcome::Matched)
    }

    fn prefers_identity(&self) -> bool {
        true
    }
}

/// Match by a composite key over named properties.
#[derive(Debug, Clone)]
pub struct FieldMatch {
    fields: Vec<String>,
    case_insensitive: bool,
}

impl FieldMatch {
    #[must_use]
    pub fn new(fields: Vec<String>, case_insensitive: bool) -> Self {
        Self {
            fields,
            case_insensitive,
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Composite key, or `None` when every key field is empty.
    #[must_use]
    pub fn key(&self, record: &Record) -> Option<String> {
        let props = record.properties();
        let parts: Vec<Option<String>> = self
            .fields
            .iter()
            .map(|f| props.get(f).and_then(|v| v.match_key(self.case_insensitive)))
            .collect();
        if parts.iter().all(Option::is_none) {
            return None;
        }
        Some(
            parts
                .into_iter()
                .map(Option::unwrap_or_default)
                .collect::<Vec<_>>()
                .join("\u{1e}"),
        )
    }

    fn spec_fields(&self) -> String {
        self.fields.join(",")
    }
}

impl MatchStrategy for FieldMatch {
    fn name(&self) -> String {
        let prefix = if self.case_insensitive { "field-ci" } else { "field" };
        format!("{prefix}:{}", self.spec_fields())
    }

    fn find_match<'a>(&self, source: &Record, candidates: &CandidateSet<'a>) -> MatchOutcome<'a> {
        let Some(key) = self.key(source) else {
            return MatchOutcome::Unmatched;
        };
        let hits: Vec<&'a Record> = candidates
            .iter()
            .filter(|t| t.record_type() == source.record_type())
            .filter(|t| self.key(t).as_deref() == Some(key.as_str()))
            .collect();
        match hits.as_slice() {
            [] => MatchOutcome::Unmatched,
            [one] => MatchOutcome::Matched(one),
            many => MatchOutcome::Ambiguous(many.iter().map(|r| r.id).collect()),
        }
    }
}

/// Identity first, falling back to a field key.
#[derive(Debug, Clone)]
pub struct HybridMatch {
    field: FieldMatch,
}

impl HybridMatch {
    #[must_use]
    pub fn new(field: FieldMatch) -> Self {
        Self { field }
    }
}

impl MatchStrategy for HybridMatch {
    fn name(&self) -> String {
        let prefix = if self.field.case_insensitive { "hybrid-ci" } else { "hybrid" };
        format!("{prefix}:{}", self.field.spec_fields())
    }

    fn find_match<'a>(&self, source: &Record, candidates: &CandidateSet<'a>) -> MatchOutcome<'a> {
        match IdentityMatch.find_match(source, candidates) {
            MatchOutcome::Matched(t) => MatchOutcome::Matched(t),
            _ => self.field.find_match(source, candidates),
        }
    }

    fn prefers_identity(&self) -> bool {
        true
    }
}

/// Enforces one-to-one matching across a run.
///
/// A target claimed by an earlier source record cannot be matched again;
/// the later source record is treated as unmatched with a diagnostic.
#[derive(Debug, Default)]
pub struct ClaimTracker {
    /// target id → source id
    claimed: HashMap<RecordId, RecordId>,
    /// source id → target id, only where they differ
    id_map: HashMap<RecordId, RecordId>,
    /// source id → record type of every matched source record
    matched: HashMap<RecordId, RecordType>,
}

impl ClaimTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an outcome into the target to pair with, plus diagnostics.
    pub fn claim<'a>(&mut self, source: &Record, outcome: MatchOutcome<'a>) -> (Option<&'a Record>, Vec<String>) {
        match outcome {
            MatchOutcome::Matched(target) => {
                if let Some(previous) = self.claimed.get(&target.id) {
                    let note = format!(
                        "target {} is already matched by {}; treated as new",
                        target.id.short(),
                        previous.short()
                    );
                    return (None, vec![note]);
                }
                self.claimed.insert(target.id, source.id);
                self.matched.insert(source.id, source.record_type());
                if target.id != source.id {
                    self.id_map.insert(source.id, target.id);
                }
                (Some(target), Vec::new())
            }
            MatchOutcome::Unmatched => (None, Vec::new()),
            MatchOutcome::Ambiguous(ids) => {
                let shorts: Vec<String> = ids.iter().map(RecordId::short).collect();
                let note = format!(
                    "ambiguous match: {} target candidates ({}); treated as new",
                    ids.len(),
                    shorts.join(", ")
                );
                (None, vec![note])
            }
        }
    }

    /// Claim the target sharing `source`'s identity, if there is one and it
    /// is still free.
    pub fn claim_identity(&mut self, source: &Record, candidates: &CandidateSet<'_>) -> bool {
        match IdentityMatch.find_match(source, candidates) {
            MatchOutcome::Matched(target) if !self.claimed.contains_key(&target.id) => {
                self.claimed.insert(target.id, source.id);
                self.matched.insert(source.id, source.record_type());
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn is_claimed(&self, target_id: &RecordId) -> bool {
        self.claimed.contains_key(target_id)
    }

    #[must_use]
    pub fn id_map(&self) -> &HashMap<RecordId, RecordId> {
        &self.id_map
    }

    /// Matched source records whose target counterpart has another identity.
    #[must_use]
    pub fn remapped(&self) -> HashMap<RecordId, RecordType> {
        self.id_map
            .keys()
            .filter_map(|id| self.matched.get(id).map(|rt| (*id, *rt)))
            .collect()
    }

    /// Map a source identity to its target identity.
    #[must_use]
    pub fn map_id(&self, id: RecordId) -> RecordId {
        self.id_map.get(&id).copied().unwrap_or(id)
    }

    /// Translate the references inside `value` to target identities.
    #[must_use]
    pub fn map_value(&self, value: &PropertyValue) -> PropertyValue {
        match value {
            PropertyValue::Reference(Some(id)) => PropertyValue::Reference(Some(self.map_id(*id))),
            PropertyValue::ReferenceList { ids, ordered } => PropertyValue::ReferenceList {
                ids: ids.iter().map(|id| self.map_id(*id)).collect(),
                ordered: *ordered,
            },
            other => other.clone(),
        }
    }

    /// Copy of `record` whose references point at target identities.
    ///
    /// The record keeps its own identity and owner link.
    ///
    /// # Errors
    ///
    /// Returns the property write error, which only happens when a
    /// record's own extracted properties do not fit it.
    pub fn map_references(&self, record: &Record) -> Result<Record> {
        let mut mapped = record.clone();
        if self.id_map.is_empty() {
            return Ok(mapped);
        }
        for (name, value) in record.properties() {
            if value.is_reference() {
                mapped.kind.apply(&name, self.map_value(&value))?;
            }
        }
        Ok(mapped)
    }
}

/// Pair every source record with at most one target.
///
/// `select` gives the strategy and candidates for each record. Records
/// whose strategy prefers identity claim their same-id target in a first
/// pass, so a field fallback for one record cannot take the target another
/// record matches by identity.
pub fn match_all<'s, 'a: 's>(
    sources: &[&Record],
    claims: &mut ClaimTracker,
    select: impl Fn(&Record) -> (&'s dyn MatchStrategy, &'s CandidateSet<'a>),
) -> Vec<(Option<&'a Record>, Vec<String>)> {
    let mut by_identity: HashSet<RecordId> = HashSet::new();
    for source in sources {
        let (strategy, candidates) = select(source);
        if strategy.prefers_identity() && claims.claim_identity(source, candidates) {
            by_identity.insert(source.id);
        }
    }
    sources
        .iter()
        .map(|source| {
            let (strategy, candidates) = select(source);
            if by_identity.contains(&source.id) {
                (candidates.by_id(&source.id), Vec::new())
            } else {
                claims.claim(source, strategy.find_match(source, candidates))
            }
        })
        .collect()
}

fn parse_fields(spec: &str, list: Option<&str>, record_type: RecordType) -> Result<Vec<String>> {
    let known = RecordKind::empty(record_type).extract();
    let fields: Vec<String> = match list {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect(),
        None => record_type
            .default_match_fields()
            .iter()
            .map(|f| (*f).to_string())
            .collect(),
    };
    if fields.is_empty() {
        return Err(Error::UnknownMatchStrategy(format!("{spec}: no key fields given")));
    }
    for field in &fields {
        if !known.contains_key(field) {
            let names: Vec<&str> = known.keys().map(String::as_str).collect();
            let hint = crate::validate::suggest(field, &names)
                .map(|s| format!(" (did you mean '{s}'?)"))
                .unwrap_or_default();
            return Err(Error::UnknownMatchStrategy(format!(
                "{spec}: {record_type} has no property '{field}'{hint}"
            )));
        }
    }
    Ok(fields)
}

/// Build a strategy from its spec string.
///
/// `case_insensitive` upgrades plain `field`/`hybrid` specs to their `-ci`
/// form; explicit `-ci` specs are always case-insensitive.
///
/// # Errors
///
/// Returns `UnknownMatchStrategy` for unknown kinds or key fields the record
/// type does not declare.
pub fn parse_strategy(
    spec: &str,
    record_type: RecordType,
    case_insensitive: bool,
) -> Result<Box<dyn MatchStrategy>> {
    let spec = spec.trim();
    let (kind, list) = match spec.split_once(':') {
        Some((kind, list)) => (kind.trim().to_lowercase(), Some(list)),
        None => (spec.to_lowercase(), None),
    };
    match kind.as_str() {
        "identity" | "id" if list.is_none() => Ok(Box::new(IdentityMatch)),
        "field" | "field-ci" => {
            let fields = parse_fields(spec, list, record_type)?;
            Ok(Box::new(FieldMatch::new(fields, case_insensitive || kind == "field-ci")))
        }
        "hybrid" | "hybrid-ci" => {
            let fields = parse_fields(spec, list, record_type)?;
            Ok(Box::new(HybridMatch::new(FieldMatch::new(
                fields,
                case_insensitive || kind == "hybrid-ci",
            ))))
        }
        _ => Err(Error::UnknownMatchStrategy(spec.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entry, LocalizedText, Sense};

    fn entry(form: &str, homograph: i64) -> Record {
        Record::new(RecordKind::Entry(Entry {
            lexeme_form: LocalizedText::new().with("en", form),
            homograph_number: homograph,
            ..Entry::default()
        }))
    }

    fn sense(gloss: &str) -> Record {
        Record::new(RecordKind::Sense(Sense {
            gloss: LocalizedText::new().with("en", gloss),
            ..Sense::default()
        }))
    }

    #[test]
    fn test_identity_match() {
        let source = entry("run", 0);
        let targets = vec![entry("walk", 0), source.clone()];
        let candidates = CandidateSet::new(&targets);

        assert_eq!(
            IdentityMatch.find_match(&source, &candidates),
            MatchOutcome::Matched(&targets[1])
        );
        assert_eq!(
            IdentityMatch.find_match(&entry("run", 0), &candidates),
            MatchOutcome::Unmatched
        );
    }

    #[test]
    fn test_field_match_composite_key() {
        let targets = vec![entry("bank", 1), entry("bank", 2)];
        let candidates = CandidateSet::new(&targets);
        let strategy = FieldMatch::new(vec!["lexeme_form".into(), "homograph_number".into()], false);

        assert_eq!(
            strategy.find_match(&entry("bank", 2), &candidates),
            MatchOutcome::Matched(&targets[1])
        );
        assert_eq!(strategy.find_match(&entry("bank", 3), &candidates), MatchOutcome::Unmatched);
    }

    #[test]
    fn test_field_match_ambiguous() {
        let targets = vec![sense("to run"), sense("to run")];
        let candidates = CandidateSet::new(&targets);
        let strategy = FieldMatch::new(vec!["gloss".into()], false);

        match strategy.find_match(&sense("to run"), &candidates) {
            MatchOutcome::Ambiguous(ids) => assert_eq!(ids, vec![targets[0].id, targets[1].id]),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn test_field_match_case_insensitive() {
        let targets = vec![sense("To Run")];
        let candidates = CandidateSet::new(&targets);

        let exact = FieldMatch::new(vec!["gloss".into()], false);
        assert_eq!(exact.find_match(&sense("to run"), &candidates), MatchOutcome::Unmatched);

        let folded = FieldMatch::new(vec!["gloss".into()], true);
        assert!(matches!(
            folded.find_match(&sense("to run"), &candidates),
            MatchOutcome::Matched(_)
        ));
    }

    #[test]
    fn test_empty_key_never_matches() {
        let targets = vec![sense("")];
        let candidates = CandidateSet::new(&targets);
        let strategy = FieldMatch::new(vec!["gloss".into()], false);
        assert_eq!(strategy.find_match(&sense(""), &candidates), MatchOutcome::Unmatched);
    }

    #[test]
    fn test_hybrid_prefers_identity() {
        let source = sense("to run");
        let mut renamed = source.clone();
        renamed.kind = RecordKind::Sense(Sense {
            gloss: LocalizedText::new().with("en", "to sprint"),
            ..Sense::default()
        });
        let targets = vec![sense("to run"), renamed];
        let candidates = CandidateSet::new(&targets);
        let strategy = HybridMatch::new(FieldMatch::new(vec!["gloss".into()], false));

        assert_eq!(
            strategy.find_match(&source, &candidates),
            MatchOutcome::Matched(&targets[1])
        );
        assert_eq!(
            strategy.find_match(&sense("to run"), &candidates),
            MatchOutcome::Matched(&targets[0])
        );
    }

    #[test]
    fn test_claims_are_one_to_one() {
        let targets = vec![sense("to run")];
        let candidates = CandidateSet::new(&targets);
        let strategy = FieldMatch::new(vec!["gloss".into()], false);
        let first = sense("to run");
        let second = sense("to run");
        let mut tracker = ClaimTracker::new();

        let (matched, notes) = tracker.claim(&first, strategy.find_match(&first, &candidates));
        assert_eq!(matched.map(|t| t.id), Some(targets[0].id));
        assert!(notes.is_empty());
        assert_eq!(tracker.map_id(first.id), targets[0].id);

        let (matched, notes) = tracker.claim(&second, strategy.find_match(&second, &candidates));
        assert!(matched.is_none());
        assert!(notes[0].contains("already matched"));
        assert_eq!(tracker.remapped().len(), 1);
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!(parse_strategy("identity", RecordType::Entry, false).unwrap().name(), "identity");
        assert_eq!(
            parse_strategy("field", RecordType::Entry, false).unwrap().name(),
            "field:lexeme_form,homograph_number"
        );
        assert_eq!(
            parse_strategy("field:gloss", RecordType::Sense, true).unwrap().name(),
            "field-ci:gloss"
        );
        assert_eq!(
            parse_strategy("hybrid-ci:name", RecordType::Tag, false).unwrap().name(),
            "hybrid-ci:name"
        );
    }

    #[test]
    fn test_parse_strategy_rejects_unknown() {
        assert!(matches!(
            parse_strategy("fuzzy", RecordType::Entry, false),
            Err(Error::UnknownMatchStrategy(_))
        ));
        let err = parse_strategy("field:glos", RecordType::Sense, false).err().unwrap();
        assert!(err.to_string().contains("did you mean 'gloss'"));
    }

    #[test]
    fn test_match_all_claims_identity_before_field() {
        let noun = sense("noun");
        let substantive = sense("substantive");
        let mut in_target = substantive.clone();
        in_target.kind = RecordKind::Sense(Sense {
            gloss: LocalizedText::new().with("en", "noun"),
            ..Sense::default()
        });
        let targets = vec![in_target];
        let candidates = CandidateSet::new(&targets);
        let strategy = HybridMatch::new(FieldMatch::new(vec!["gloss".into()], false));
        let mut tracker = ClaimTracker::new();

        let results = match_all(&[&noun, &substantive], &mut tracker, |_| {
            (&strategy as &dyn MatchStrategy, &candidates)
        });

        assert!(results[0].0.is_none());
        assert!(results[0].1[0].contains("already matched"));
        assert_eq!(results[1].0.map(|t| t.id), Some(substantive.id));
        assert!(tracker.id_map().is_empty());
    }

    #[test]
    fn test_map_references_uses_target_ids() {
        let base = entry("run", 0);
        let target_base = entry("run", 0);
        let other = entry("walk", 0);
        let mut variant = entry("ran", 0);
        variant.kind = RecordKind::Entry(Entry {
            lexeme_form: LocalizedText::new().with("en", "ran"),
            variant_of: Some(base.id),
            components: vec![base.id, other.id],
            ..Entry::default()
        });
        let targets = vec![target_base.clone()];
        let candidates = CandidateSet::new(&targets);
        let strategy = FieldMatch::new(vec!["lexeme_form".into()], false);
        let mut tracker = ClaimTracker::new();
        tracker.claim(&base, strategy.find_match(&base, &candidates));

        let mapped = tracker.map_references(&variant).unwrap();
        assert_eq!(mapped.id, variant.id);
        let refs = mapped.references();
        assert_eq!(refs.len(), 3);
        assert!(refs.contains(&("variant_of".to_string(), target_base.id)));
        assert!(refs.contains(&("components".to_string(), target_base.id)));
        assert!(refs.contains(&("components".to_string(), other.id)));
        assert!(!refs.iter().any(|(_, id)| *id == base.id));
    }
}
