//! Diff engine: classify a source/target pair and list differing properties.
//!
//! Property comparison is normalized (see [`PropertyValue::equivalent`]).
//! Owned children are compared by identity per owning collection.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::model::{Extractable, PropertyMap, PropertyValue, Record, RecordKind};
use crate::sync::snapshot::Snapshot;
use crate::sync::types::{Change, ChangeType, ChangedSide, ChildDelta, PropertyDelta};

/// Extract both sides, refusing pairs of different subtypes.
fn extract_pair(source: &Record, target: &Record) -> Result<(PropertyMap, PropertyMap)> {
    match (&source.kind, &target.kind) {
        (RecordKind::Entry(a), RecordKind::Entry(b)) => Ok((a.extract(), b.extract())),
        (RecordKind::Sense(a), RecordKind::Sense(b)) => Ok((a.extract(), b.extract())),
        (RecordKind::Example(a), RecordKind::Example(b)) => Ok((a.extract(), b.extract())),
        (RecordKind::Tag(a), RecordKind::Tag(b)) => Ok((a.extract(), b.extract())),
        (a, b) => Err(Error::TypeMismatch {
            source_type: a.record_type().to_string(),
            target_type: b.record_type().to_string(),
        }),
    }
}

fn side_changed(value: &PropertyValue, base: &PropertyMap, name: &str) -> bool {
    let base_value = base.get(name).unwrap_or(&PropertyValue::Empty);
    !value.equivalent(base_value)
}

/// Differing properties between two maps.
///
/// With a baseline, each delta records which side moved away from it.
#[must_use]
pub fn diff_properties(
    source: &PropertyMap,
    target: &PropertyMap,
    baseline: Option<&PropertyMap>,
) -> BTreeMap<String, PropertyDelta> {
    let names: BTreeSet<&String> = source.keys().chain(target.keys()).collect();
    let mut delta = BTreeMap::new();
    for name in names {
        let s = source.get(name).unwrap_or(&PropertyValue::Empty);
        let t = target.get(name).unwrap_or(&PropertyValue::Empty);
        if s.equivalent(t) {
            continue;
        }
        let side = match baseline {
            None => ChangedSide::Unknown,
            Some(base) => match (side_changed(s, base, name), side_changed(t, base, name)) {
                (true, true) => ChangedSide::Both,
                (true, false) => ChangedSide::Source,
                (false, true) => ChangedSide::Target,
                (false, false) => ChangedSide::Unknown,
            },
        };
        delta.insert(
            name.clone(),
            PropertyDelta {
                source: s.normalized(),
                target: t.normalized(),
                side,
            },
        );
    }
    delta
}

/// Every non-empty property of a record that only exists in the source.
fn new_record_delta(source: &PropertyMap) -> BTreeMap<String, PropertyDelta> {
    source
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(name, v)| {
            (
                name.clone(),
                PropertyDelta {
                    source: v.normalized(),
                    target: PropertyValue::Empty,
                    side: ChangedSide::Source,
                },
            )
        })
        .collect()
}

/// Compares record pairs, optionally against a baseline snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine<'b> {
    baseline: Option<&'b Snapshot>,
}

impl<'b> DiffEngine<'b> {
    #[must_use]
    pub const fn new() -> Self {
        Self { baseline: None }
    }

    #[must_use]
    pub const fn with_baseline(baseline: Option<&'b Snapshot>) -> Self {
        Self { baseline }
    }

    fn base_for(&self, source: &Record, target: &Record) -> Option<&'b PropertyMap> {
        let baseline = self.baseline?;
        baseline.get(&target.id).or_else(|| baseline.get(&source.id))
    }

    /// Classify one pair. At least one side must be present.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` when both sides are present with different
    /// record types, and `InvalidArgument` when both are absent.
    pub fn diff(&self, source: Option<&Record>, target: Option<&Record>) -> Result<Change> {
        match (source, target) {
            (Some(s), None) => {
                let source_properties = s.properties();
                Ok(Change {
                    change_type: ChangeType::New,
                    record_type: s.record_type(),
                    source_id: Some(s.id),
                    target_id: None,
                    label: s.label(),
                    delta: new_record_delta(&source_properties),
                    source_properties,
                    children: BTreeMap::new(),
                    diagnostics: Vec::new(),
                    source_modified: Some(s.modified_at),
                    target_modified: None,
                })
            }
            (None, Some(t)) => Ok(Change {
                change_type: ChangeType::Deleted,
                record_type: t.record_type(),
                source_id: None,
                target_id: Some(t.id),
                label: t.label(),
                delta: BTreeMap::new(),
                source_properties: PropertyMap::new(),
                children: BTreeMap::new(),
                diagnostics: Vec::new(),
                source_modified: None,
                target_modified: Some(t.modified_at),
            }),
            (Some(s), Some(t)) => {
                let (source_props, target_props) = extract_pair(s, t)?;
                let delta = diff_properties(&source_props, &target_props, self.base_for(s, t));
                let change_type = if delta.is_empty() {
                    ChangeType::Unchanged
                } else if delta.values().any(|d| d.side == ChangedSide::Both) {
                    ChangeType::Conflict
                } else {
                    ChangeType::Modified
                };
                Ok(Change {
                    change_type,
                    record_type: s.record_type(),
                    source_id: Some(s.id),
                    target_id: Some(t.id),
                    label: s.label(),
                    delta,
                    source_properties: source_props,
                    children: BTreeMap::new(),
                    diagnostics: Vec::new(),
                    source_modified: Some(s.modified_at),
                    target_modified: Some(t.modified_at),
                })
            }
            (None, None) => Err(Error::InvalidArgument(
                "diff needs at least one side".to_string(),
            )),
        }
    }
}

/// Per-collection child differences, matched by identity.
///
/// Collections with no difference are omitted.
#[must_use]
pub fn child_delta(source_children: &[Record], target_children: &[Record]) -> BTreeMap<String, ChildDelta> {
    let field_of = |r: &Record| r.owner.as_ref().map(|o| o.field.clone()).unwrap_or_default();
    let target_by_id: HashMap<_, _> = target_children.iter().map(|r| (r.id, r)).collect();
    let source_ids: BTreeSet<_> = source_children.iter().map(|r| r.id).collect();

    let mut deltas: BTreeMap<String, ChildDelta> = BTreeMap::new();
    for child in source_children {
        let entry = deltas.entry(field_of(child)).or_default();
        match target_by_id.get(&child.id) {
            None => entry.added.push(child.id),
            Some(t) => {
                if !diff_properties(&child.properties(), &t.properties(), None).is_empty() {
                    entry.modified.push(child.id);
                }
            }
        }
    }
    for child in target_children {
        if !source_ids.contains(&child.id) {
            deltas.entry(field_of(child)).or_default().removed.push(child.id);
        }
    }
    deltas.retain(|_, d| !d.is_empty());
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entry, LocalizedText, Sense, Tag};

    fn sense(gloss: &str, definition: &str) -> Record {
        Record::new(RecordKind::Sense(Sense {
            gloss: LocalizedText::new().with("en", gloss),
            definition: LocalizedText::new().with("en", definition),
            ..Sense::default()
        }))
    }

    fn with_gloss(record: &Record, gloss: &str, definition: &str) -> Record {
        let mut copy = record.clone();
        copy.kind = sense(gloss, definition).kind;
        copy
    }

    #[test]
    fn test_identical_pair_is_unchanged() {
        let s = sense("to run", "move fast");
        let change = DiffEngine::new().diff(Some(&s), Some(&s.clone())).unwrap();
        assert_eq!(change.change_type, ChangeType::Unchanged);
        assert!(change.delta.is_empty());
    }

    #[test]
    fn test_empty_forms_do_not_differ() {
        let s = Record::new(RecordKind::Entry(Entry {
            morph_type: Some(String::new()),
            ..Entry::default()
        }));
        let mut t = s.clone();
        t.kind = RecordKind::Entry(Entry::default());
        let change = DiffEngine::new().diff(Some(&s), Some(&t)).unwrap();
        assert_eq!(change.change_type, ChangeType::Unchanged);
    }

    #[test]
    fn test_modified_lists_only_differing_fields() {
        let s = sense("to run", "move fast");
        let t = with_gloss(&s, "to sprint", "move fast");
        let change = DiffEngine::new().diff(Some(&s), Some(&t)).unwrap();

        assert_eq!(change.change_type, ChangeType::Modified);
        assert_eq!(change.delta.keys().collect::<Vec<_>>(), vec!["gloss"]);
        assert_eq!(change.delta["gloss"].side, ChangedSide::Unknown);
    }

    #[test]
    fn test_new_and_deleted() {
        let s = sense("to run", "");
        let engine = DiffEngine::new();
        assert_eq!(engine.diff(Some(&s), None).unwrap().change_type, ChangeType::New);
        let deleted = engine.diff(None, Some(&s)).unwrap();
        assert_eq!(deleted.change_type, ChangeType::Deleted);
        assert!(deleted.delta.is_empty());
        assert!(engine.diff(None, None).is_err());
    }

    #[test]
    fn test_new_lists_every_filled_source_property() {
        let s = sense("to run", "");
        let change = DiffEngine::new().diff(Some(&s), None).unwrap();

        assert_eq!(change.delta.keys().collect::<Vec<_>>(), vec!["gloss"]);
        let gloss = &change.delta["gloss"];
        assert_eq!(gloss.source, PropertyValue::Localized(LocalizedText::new().with("en", "to run")));
        assert_eq!(gloss.target, PropertyValue::Empty);
        assert_eq!(gloss.side, ChangedSide::Source);
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let s = sense("to run", "");
        let t = Record::new(RecordKind::Tag(Tag::default())).with_id(s.id);
        let err = DiffEngine::new().diff(Some(&s), Some(&t)).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_conflict_needs_both_sides_changed_since_baseline() {
        let base = sense("to run", "move fast");
        let snapshot = Snapshot::from_records([&base]);
        let engine = DiffEngine::with_baseline(Some(&snapshot));

        let source = with_gloss(&base, "to sprint", "move fast");
        let target = with_gloss(&base, "to dash", "move fast");
        let change = engine.diff(Some(&source), Some(&target)).unwrap();
        assert_eq!(change.change_type, ChangeType::Conflict);
        assert_eq!(change.conflicting_fields(), vec!["gloss"]);

        let target = with_gloss(&base, "to run", "go quickly");
        let change = engine.diff(Some(&source), Some(&target)).unwrap();
        assert_eq!(change.change_type, ChangeType::Modified);
        assert_eq!(change.delta["gloss"].side, ChangedSide::Source);
        assert_eq!(change.delta["definition"].side, ChangedSide::Target);
    }

    #[test]
    fn test_no_baseline_never_conflicts() {
        let base = sense("to run", "move fast");
        let source = with_gloss(&base, "to sprint", "move fast");
        let target = with_gloss(&base, "to dash", "move fast");
        let change = DiffEngine::new().diff(Some(&source), Some(&target)).unwrap();
        assert_eq!(change.change_type, ChangeType::Modified);
    }

    #[test]
    fn test_child_delta() {
        let owner = Record::new(RecordKind::Entry(Entry::default()));
        let kept = sense("a", "").owned_by(owner.id, "senses");
        let edited = sense("b", "").owned_by(owner.id, "senses");
        let added = sense("c", "").owned_by(owner.id, "senses");
        let removed = sense("d", "").owned_by(owner.id, "senses");

        let edited_target = with_gloss(&edited, "b2", "");
        let deltas = child_delta(
            &[kept.clone(), edited.clone(), added.clone()],
            &[kept, edited_target, removed.clone()],
        );

        let senses = &deltas["senses"];
        assert_eq!(senses.added, vec![added.id]);
        assert_eq!(senses.removed, vec![removed.id]);
        assert_eq!(senses.modified, vec![edited.id]);
    }
}
