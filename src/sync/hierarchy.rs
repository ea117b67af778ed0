//! Hierarchical import: copy seed records with their owned subtrees and the
//! records they reference.
//!
//! 1. Build the [`DependencyGraph`] and order it.
//! 2. Match every ordered record against the target and diff it.
//! 3. Validate the whole batch. CRITICAL issues block every write unless
//!    explicitly overridden.
//! 4. Write in dependency order; references to batch records not yet
//!    written are patched in a second pass.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::{OwnerLink, Record, RecordId, RecordType};
use crate::storage::{RecordSource, RecordStore};
use crate::sync::diff::{child_delta, DiffEngine};
use crate::sync::graph::{DependencyGraph, GraphOptions};
use crate::sync::matching::{match_all, CandidateSet, ClaimTracker, IdentityMatch, MatchStrategy};
use crate::sync::merge::{MergeOperations, MergeOptions, PlannedWrite};
use crate::sync::resolver::{ConflictResolver, Resolution, SourceWins};
use crate::sync::types::{Change, Disposition, RecordOutcome, SyncReport};
use crate::sync::validator::{ReferenceValidator, ValidationSummary};

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub graph: GraphOptions,
    pub dry_run: bool,
    /// Write even when validation found CRITICAL issues.
    pub allow_critical: bool,
    pub fail_fast: bool,
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Mark every change as skipped for `reason`.
pub(crate) fn skip_all(changes: &[Change], reason: &str) -> Vec<RecordOutcome> {
    changes
        .iter()
        .map(|c| {
            RecordOutcome::new(c.record_id(), c.record_type, &c.label, Disposition::Skipped).with_detail(reason)
        })
        .collect()
}

/// Owner link translated to target identities.
pub(crate) fn mapped_owner(record: &Record, claims: &ClaimTracker) -> Option<OwnerLink> {
    record.owner.as_ref().map(|link| OwnerLink {
        owner: claims.map_id(link.owner),
        field: link.field.clone(),
    })
}

/// Resolve, validate and write a planned batch into `report`.
///
/// Shared by sync and import: the batch is validated as a whole and nothing
/// is written when validation blocks.
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_batch<S, T>(
    source: &S,
    target: &mut T,
    resolver: &dyn ConflictResolver,
    changes: Vec<(Change, Option<&Record>)>,
    claims: &ClaimTracker,
    merge: MergeOptions,
    allow_critical: bool,
    cancel: Option<&AtomicBool>,
    report: &mut SyncReport,
) -> Result<()>
where
    S: RecordSource + ?Sized,
    T: RecordStore + ?Sized,
{
    let mut plan = Vec::with_capacity(changes.len());
    let mut batch: Vec<&Record> = Vec::new();
    for (change, record) in changes {
        let resolution = resolver.resolve(&change);
        if let (Resolution::Apply(_), Some(record)) = (&resolution, record) {
            batch.push(record);
        }
        let owner = record.and_then(|r| mapped_owner(r, claims));
        plan.push(PlannedWrite {
            change,
            resolution,
            owner,
        });
    }

    report.issues = ReferenceValidator::new(source, &*target)
        .with_known(claims.remapped())
        .validate(&batch)?;
    let summary = ValidationSummary::from_issues(&report.issues);
    report.changes = plan.iter().map(|p| p.change.clone()).collect();

    if summary.blocks_writes() {
        if allow_critical {
            warn!(critical = summary.critical, "Writing despite critical validation issues");
        } else {
            warn!(critical = summary.critical, "Validation blocked the batch, nothing written");
            report.blocked = true;
            report
                .outcomes
                .extend(skip_all(&report.changes, "blocked by critical validation issues"));
            return Ok(());
        }
    }

    let result = MergeOperations::new(target, merge).run_batch(&plan, cancel);
    report.outcomes.extend(result.outcomes);
    report.errors.extend(result.errors);
    report.patches = result.patches;
    report.cancelled = result.cancelled;
    report.aborted = result.aborted;
    Ok(())
}

/// Imports seed records with everything they depend on.
pub struct HierarchicalImporter<'a, S: RecordSource + ?Sized, T: RecordStore + ?Sized> {
    source: &'a S,
    target: &'a mut T,
    strategies: HashMap<RecordType, Box<dyn MatchStrategy>>,
    resolver: Box<dyn ConflictResolver>,
    options: ImportOptions,
}

impl<'a, S: RecordSource + ?Sized, T: RecordStore + ?Sized> HierarchicalImporter<'a, S, T> {
    /// Identity matching and source-wins resolution by default.
    pub fn new(source: &'a S, target: &'a mut T) -> Self {
        Self {
            source,
            target,
            strategies: HashMap::new(),
            resolver: Box::new(SourceWins),
            options: ImportOptions::default(),
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, record_type: RecordType, strategy: Box<dyn MatchStrategy>) -> Self {
        self.strategies.insert(record_type, strategy);
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Box<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }

    /// Import `seeds` (all of `record_type`) into the target.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` for a seed missing from the source,
    /// `InvalidArgument` for a seed of another type, or a store read error.
    /// Per-record write failures are reported, not returned.
    pub fn import(&mut self, record_type: RecordType, seeds: &[RecordId]) -> Result<SyncReport> {
        for seed in seeds {
            let record = self
                .source
                .get(seed)?
                .ok_or_else(|| Error::RecordNotFound { id: seed.to_string() })?;
            if record.record_type() != record_type {
                return Err(Error::InvalidArgument(format!(
                    "{seed} is a {}, not a {record_type}",
                    record.record_type()
                )));
            }
        }

        let mut report = SyncReport::new("import", record_type, self.options.dry_run);
        let graph = DependencyGraph::build(self.source, &*self.target, seeds, self.options.graph)?;
        let ordering = graph.order();
        report.dependency_errors = ordering.errors.iter().map(ToString::to_string).collect();
        for id in &ordering.skipped {
            if let Some(record) = graph.get(id) {
                report.outcomes.push(
                    RecordOutcome::new(record.id, record.record_type(), &record.label(), Disposition::Skipped)
                        .with_detail("dependency error"),
                );
            }
        }
        info!(
            seeds = seeds.len(),
            records = ordering.order.len(),
            relaxed = ordering.relaxed.len(),
            "Planned hierarchical import"
        );

        let records: Vec<&Record> = ordering.order.iter().filter_map(|id| graph.get(id)).collect();
        let types: BTreeSet<RecordType> = records.iter().map(|r| r.record_type()).collect();
        let mut targets: HashMap<RecordType, Vec<Record>> = HashMap::new();
        for rt in types {
            targets.insert(rt, self.target.all(rt)?);
        }

        let candidates: HashMap<RecordType, CandidateSet<'_>> =
            targets.iter().map(|(rt, list)| (*rt, CandidateSet::new(list))).collect();
        let no_candidates = CandidateSet::new(&[]);
        let mut claims = ClaimTracker::new();
        let matches = match_all(&records, &mut claims, |record| {
            let rt = record.record_type();
            let strategy: &dyn MatchStrategy = self
                .strategies
                .get(&rt)
                .map_or(&IdentityMatch as &dyn MatchStrategy, |s| s.as_ref());
            (strategy, candidates.get(&rt).unwrap_or(&no_candidates))
        });

        let engine = DiffEngine::new();
        let mut changes = Vec::with_capacity(records.len());
        for (record, (matched, diagnostics)) in records.into_iter().zip(matches) {
            for note in &diagnostics {
                warn!(id = %record.id, "{note}");
            }
            let mapped = claims.map_references(record)?;
            let mut change = engine.diff(Some(&mapped), matched)?;
            if let Some(t) = matched {
                change.children = child_delta(&self.source.children(&record.id)?, &self.target.children(&t.id)?);
            }
            change.diagnostics = diagnostics;
            changes.push((change, Some(record)));
        }

        let merge = MergeOptions {
            dry_run: self.options.dry_run,
            fail_fast: self.options.fail_fast,
            ..MergeOptions::default()
        };
        write_batch(
            self.source,
            self.target,
            self.resolver.as_ref(),
            changes,
            &claims,
            merge,
            self.options.allow_critical,
            self.options.cancel.as_deref(),
            &mut report,
        )?;

        let stats = report.stats();
        info!(
            created = stats.created,
            updated = stats.updated,
            skipped = stats.skipped,
            errored = stats.errored,
            "Hierarchical import finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entry, Example, LocalizedText, RecordKind, Sense, Tag};
    use crate::storage::SqliteStorage;
    use crate::sync::testing::{Call, RecordingStore};
    use crate::sync::types::{ReportStatus, Severity};

    fn tag(name: &str) -> Record {
        Record::new(RecordKind::Tag(Tag {
            name: LocalizedText::new().with("en", name),
            ..Tag::default()
        }))
    }

    fn entry(form: &str) -> Record {
        Record::new(RecordKind::Entry(Entry {
            lexeme_form: LocalizedText::new().with("en", form),
            ..Entry::default()
        }))
    }

    fn sense(gloss: &str, owner: &Record, pos: Option<RecordId>) -> Record {
        Record::new(RecordKind::Sense(Sense {
            gloss: LocalizedText::new().with("en", gloss),
            part_of_speech: pos,
            ..Sense::default()
        }))
        .owned_by(owner.id, "senses")
    }

    /// run → sense(to run, pos=verb) → example; verb tag only in the source.
    fn seeded_source() -> (SqliteStorage, Record, Record, Record, Record) {
        let mut source = SqliteStorage::open_memory().unwrap();
        let verb = tag("verb");
        let run = entry("run");
        let to_run = sense("to run", &run, Some(verb.id));
        let example = Record::new(RecordKind::Example(Example {
            text: LocalizedText::new().with("en", "I run every day"),
            ..Example::default()
        }))
        .owned_by(to_run.id, "examples");
        for r in [&verb, &run, &to_run, &example] {
            source.insert_record(r).unwrap();
        }
        (source, verb, run, to_run, example)
    }

    #[test]
    fn test_import_carries_subtree_and_references() {
        let (source, verb, run, to_run, example) = seeded_source();
        let mut target = SqliteStorage::open_memory().unwrap();

        let report = HierarchicalImporter::new(&source, &mut target)
            .import(RecordType::Entry, &[run.id])
            .unwrap();

        assert_eq!(report.status(), ReportStatus::Success, "{:?}", report.issues);
        assert_eq!(report.stats().created, 4);
        for r in [&verb, &run, &to_run, &example] {
            assert_eq!(target.get(&r.id).unwrap().unwrap().properties(), r.properties());
        }
        assert_eq!(target.children(&run.id).unwrap()[0].id, to_run.id);
    }

    #[test]
    fn test_owner_created_before_children() {
        let (source, _, run, to_run, example) = seeded_source();
        let mut target = RecordingStore::new(SqliteStorage::open_memory().unwrap());

        HierarchicalImporter::new(&source, &mut target)
            .import(RecordType::Entry, &[run.id])
            .unwrap();

        let creates: Vec<RecordId> = target
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Create(id) => Some(*id),
                _ => None,
            })
            .collect();
        let pos = |id: &RecordId| creates.iter().position(|c| c == id).unwrap();
        assert!(pos(&run.id) < pos(&to_run.id));
        assert!(pos(&to_run.id) < pos(&example.id));
        assert!(target.calls.iter().all(|c| !matches!(c, Call::Update(_, _, false))));
    }

    #[test]
    fn test_existing_reference_is_not_copied() {
        let (source, verb, run, _, _) = seeded_source();
        let mut target = SqliteStorage::open_memory().unwrap();
        target.insert_record(&verb).unwrap();

        let report = HierarchicalImporter::new(&source, &mut target)
            .import(RecordType::Entry, &[run.id])
            .unwrap();
        assert_eq!(report.stats().created, 3);
        assert!(report.outcome_for(&verb.id).is_none());
    }

    #[test]
    fn test_critical_issue_blocks_every_write() {
        let mut source = SqliteStorage::open_memory().unwrap();
        let run = entry("run");
        let dangling = sense("to run", &run, Some(RecordId::generate()));
        source.insert_record(&run).unwrap();
        source.insert_record(&dangling).unwrap();
        let mut target = RecordingStore::new(SqliteStorage::open_memory().unwrap());

        let report = HierarchicalImporter::new(&source, &mut target)
            .import(RecordType::Entry, &[run.id])
            .unwrap();

        assert!(report.blocked);
        assert_eq!(report.status(), ReportStatus::ValidationBlocked);
        assert_eq!(report.issue_count(Severity::Critical), 1);
        assert_eq!(target.write_count(), 0);
        assert!(report.outcomes.iter().all(|o| o.disposition == Disposition::Skipped));
    }

    #[test]
    fn test_blocked_batch_keeps_dependency_skips() {
        let (mut source, verb, run, to_run, example) = seeded_source();
        let mut broken = entry("walk");
        broken.kind = RecordKind::Entry(Entry {
            lexeme_form: LocalizedText::new().with("en", "walk"),
            variant_of: Some(RecordId::generate()),
            ..Entry::default()
        });
        source.insert_record(&broken).unwrap();
        let mut target = RecordingStore::new(SqliteStorage::open_memory().unwrap());

        let report = HierarchicalImporter::new(&source, &mut target)
            .with_options(ImportOptions {
                graph: GraphOptions {
                    max_depth: 1,
                    strict_depth: true,
                    ..GraphOptions::default()
                },
                ..ImportOptions::default()
            })
            .import(RecordType::Entry, &[run.id, broken.id])
            .unwrap();

        assert!(report.blocked);
        assert_eq!(report.dependency_errors.len(), 1);
        for id in [run.id, to_run.id, verb.id, broken.id] {
            assert_eq!(report.outcomes.iter().filter(|o| o.record_id == id).count(), 1, "{id}");
        }
        assert!(report.outcome_for(&example.id).is_none());
        assert_eq!(target.write_count(), 0);
    }

    #[test]
    fn test_allow_critical_overrides_block() {
        let mut source = SqliteStorage::open_memory().unwrap();
        let run = entry("run");
        let dangling = sense("to run", &run, Some(RecordId::generate()));
        source.insert_record(&run).unwrap();
        source.insert_record(&dangling).unwrap();
        let mut target = SqliteStorage::open_memory().unwrap();

        let report = HierarchicalImporter::new(&source, &mut target)
            .with_options(ImportOptions {
                allow_critical: true,
                ..ImportOptions::default()
            })
            .import(RecordType::Entry, &[run.id])
            .unwrap();
        assert!(!report.blocked);
        assert_eq!(report.stats().created, 2);
    }

    #[test]
    fn test_forward_references_between_entries() {
        let mut source = SqliteStorage::open_memory().unwrap();
        let mut a = entry("a");
        let mut b = entry("b");
        let a_kind = Entry {
            lexeme_form: LocalizedText::new().with("en", "a"),
            components: vec![b.id],
            ..Entry::default()
        };
        let b_kind = Entry {
            lexeme_form: LocalizedText::new().with("en", "b"),
            variant_of: Some(a.id),
            ..Entry::default()
        };
        a.kind = RecordKind::Entry(a_kind);
        b.kind = RecordKind::Entry(b_kind);
        source.insert_record(&a).unwrap();
        source.insert_record(&b).unwrap();
        let mut target = SqliteStorage::open_memory().unwrap();

        let report = HierarchicalImporter::new(&source, &mut target)
            .import(RecordType::Entry, &[a.id])
            .unwrap();

        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.patches.len(), 1);
        assert!(report.patches[0].applied);
        assert_eq!(target.get(&a.id).unwrap().unwrap().properties(), a.properties());
        assert_eq!(target.get(&b.id).unwrap().unwrap().properties(), b.properties());
    }

    #[test]
    fn test_dry_run_reports_without_writing() {
        let (source, _, run, _, _) = seeded_source();
        let mut target = RecordingStore::new(SqliteStorage::open_memory().unwrap());

        let report = HierarchicalImporter::new(&source, &mut target)
            .with_options(ImportOptions {
                dry_run: true,
                ..ImportOptions::default()
            })
            .import(RecordType::Entry, &[run.id])
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.stats().created, 4);
        assert_eq!(target.write_count(), 0);
    }

    #[test]
    fn test_seed_of_wrong_type_is_rejected() {
        let (source, verb, _, _, _) = seeded_source();
        let mut target = SqliteStorage::open_memory().unwrap();
        let err = HierarchicalImporter::new(&source, &mut target)
            .import(RecordType::Entry, &[verb.id])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_depth_limit_warns_about_missing_children() {
        let (source, _, run, _, example) = seeded_source();
        let mut target = SqliteStorage::open_memory().unwrap();

        let report = HierarchicalImporter::new(&source, &mut target)
            .with_options(ImportOptions {
                graph: GraphOptions {
                    max_depth: 1,
                    ..GraphOptions::default()
                },
                ..ImportOptions::default()
            })
            .import(RecordType::Entry, &[run.id])
            .unwrap();

        assert_eq!(report.status(), ReportStatus::CompletedWithWarnings);
        assert_eq!(report.issue_count(Severity::Warning), 1);
        assert!(target.get(&example.id).unwrap().is_none());
    }
}
