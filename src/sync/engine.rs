//! Sync engine: compare and synchronize one record type between two stores.
//!
//! `compare` never writes. `sync` runs the same comparison, resolves every
//! change, validates the records it would create or update, and hands the
//! batch to [`MergeOperations`](crate::sync::merge::MergeOperations).

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{Record, RecordType};
use crate::storage::{RecordSource, RecordStore};
use crate::sync::diff::{child_delta, DiffEngine};
use crate::sync::hierarchy::write_batch;
use crate::sync::matching::{match_all, CandidateSet, ClaimTracker, MatchStrategy};
use crate::sync::merge::{DeletionPolicy, MergeOptions};
use crate::sync::resolver::ConflictResolver;
use crate::sync::selective::RecordFilter;
use crate::sync::snapshot::Snapshot;
use crate::sync::types::{Change, DiffResult, SyncReport};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub deletion_policy: DeletionPolicy,
    pub fail_fast: bool,
    /// Write even when validation found CRITICAL issues.
    pub allow_critical: bool,
    /// Last-synced state; enables CONFLICT detection.
    pub baseline: Option<Snapshot>,
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Changes for one type, with the source records they came from.
struct Comparison {
    /// Matched or unmatched source records, in source order.
    sources: Vec<Record>,
    /// One change per source record (same order), then one per unclaimed
    /// target record when deletions are detected.
    changes: Vec<Change>,
    claims: ClaimTracker,
}

pub struct SyncEngine<'a, S: RecordSource + ?Sized, T: RecordStore + ?Sized> {
    source: &'a S,
    target: &'a mut T,
    strategy: Box<dyn MatchStrategy>,
}

impl<'a, S: RecordSource + ?Sized, T: RecordStore + ?Sized> SyncEngine<'a, S, T> {
    pub fn new(source: &'a S, target: &'a mut T, strategy: Box<dyn MatchStrategy>) -> Self {
        Self {
            source,
            target,
            strategy,
        }
    }

    fn compare_records(
        &self,
        record_type: RecordType,
        filter: Option<&RecordFilter>,
        baseline: Option<&Snapshot>,
    ) -> Result<Comparison> {
        let sources: Vec<Record> = self
            .source
            .all(record_type)?
            .into_iter()
            .filter(|r| filter.is_none_or(|f| f.matches(r)))
            .collect();
        let targets = self.target.all(record_type)?;
        let candidates = CandidateSet::new(&targets);
        let engine = DiffEngine::with_baseline(baseline);
        let mut claims = ClaimTracker::new();
        let mut changes = Vec::with_capacity(sources.len());

        let order: Vec<&Record> = sources.iter().collect();
        let matches = match_all(&order, &mut claims, |_| (self.strategy.as_ref(), &candidates));

        // References are compared in target identities, so a remapped
        // reference that already points at the right target is unchanged.
        for (record, (matched, diagnostics)) in sources.iter().zip(matches) {
            for note in &diagnostics {
                warn!(id = %record.id, "{note}");
            }
            let mapped = claims.map_references(record)?;
            let mut change = engine.diff(Some(&mapped), matched)?;
            if let Some(t) = matched {
                change.children = child_delta(&self.source.children(&record.id)?, &self.target.children(&t.id)?);
            }
            change.diagnostics = diagnostics;
            debug!(id = %record.id, change = %change.change_type, "Compared");
            changes.push(change);
        }

        // A filtered comparison cannot tell deletions from records the filter left out.
        if filter.is_none_or(RecordFilter::is_empty) {
            for t in targets.iter().filter(|t| !claims.is_claimed(&t.id)) {
                changes.push(engine.diff(None, Some(t))?);
            }
        }

        Ok(Comparison {
            sources,
            changes,
            claims,
        })
    }

    /// Classify every record of `record_type` without writing anything.
    ///
    /// # Errors
    ///
    /// Returns a store read error or a type mismatch from the diff engine.
    pub fn compare(
        &self,
        record_type: RecordType,
        filter: Option<&RecordFilter>,
        baseline: Option<&Snapshot>,
    ) -> Result<DiffResult> {
        let comparison = self.compare_records(record_type, filter, baseline)?;
        let result = DiffResult {
            record_type,
            strategy: self.strategy.name(),
            changes: comparison.changes,
        };
        info!(
            record_type = %record_type,
            strategy = %result.strategy,
            changes = result.changes.len(),
            "Compared stores"
        );
        Ok(result)
    }

    /// Compare, resolve, validate and write every record of `record_type`.
    ///
    /// # Errors
    ///
    /// Returns a store read error. Write failures are reported per record.
    pub fn sync(
        &mut self,
        record_type: RecordType,
        resolver: &dyn ConflictResolver,
        options: &SyncOptions,
    ) -> Result<SyncReport> {
        let comparison = self.compare_records(record_type, None, options.baseline.as_ref())?;
        let mut report = SyncReport::new("sync", record_type, options.dry_run);
        let sources = &comparison.sources;
        let changes: Vec<(Change, Option<&Record>)> = comparison
            .changes
            .into_iter()
            .enumerate()
            .map(|(i, change)| (change, sources.get(i)))
            .collect();

        let merge = MergeOptions {
            dry_run: options.dry_run,
            deletion_policy: options.deletion_policy,
            fail_fast: options.fail_fast,
        };
        write_batch(
            self.source,
            self.target,
            resolver,
            changes,
            &comparison.claims,
            merge,
            options.allow_critical,
            options.cancel.as_deref(),
            &mut report,
        )?;

        let stats = report.stats();
        info!(
            record_type = %record_type,
            resolver = %resolver.name(),
            created = stats.created,
            updated = stats.updated,
            deleted = stats.deleted,
            skipped = stats.skipped,
            errored = stats.errored,
            dry_run = options.dry_run,
            "Sync finished"
        );
        Ok(report)
    }

    /// Current target state of `record_type`, for use as the next baseline.
    ///
    /// # Errors
    ///
    /// Returns the target read error.
    pub fn snapshot(&self, record_type: RecordType) -> Result<Snapshot> {
        Ok(Snapshot::from_records(&self.target.all(record_type)?))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::model::{Entry, LocalizedText, RecordId, RecordKind, Sense, Tag};
    use crate::storage::SqliteStorage;
    use crate::sync::matching::{FieldMatch, HybridMatch, IdentityMatch};
    use crate::sync::resolver::{SourceWins, TargetWins};
    use crate::sync::testing::{Call, RecordingStore};
    use crate::sync::types::{ChangeType, Disposition, ReportStatus};

    fn tag(name: &str) -> Record {
        Record::new(RecordKind::Tag(Tag {
            name: LocalizedText::new().with("en", name),
            ..Tag::default()
        }))
        .with_timestamps(1, 1)
    }

    fn renamed(record: &Record, name: &str, modified: i64) -> Record {
        let mut copy = record.clone().with_timestamps(record.created_at, modified);
        copy.kind = RecordKind::Tag(Tag {
            name: LocalizedText::new().with("en", name),
            ..Tag::default()
        });
        copy
    }

    fn stores(source: &[&Record], target: &[&Record]) -> (SqliteStorage, RecordingStore<SqliteStorage>) {
        let mut s = SqliteStorage::open_memory().unwrap();
        let mut t = SqliteStorage::open_memory().unwrap();
        for r in source {
            s.insert_record(r).unwrap();
        }
        for r in target {
            t.insert_record(r).unwrap();
        }
        (s, RecordingStore::new(t))
    }

    #[test]
    fn test_same_record_is_unchanged_then_modified() {
        let run = tag("run");
        let (source, mut target) = stores(&[&run], &[&run]);
        let engine = SyncEngine::new(&source, &mut target, Box::new(IdentityMatch));
        let diff = engine.compare(RecordType::Tag, None, None).unwrap();
        assert_eq!(diff.changes[0].change_type, ChangeType::Unchanged);
        assert!(diff.changes[0].delta.is_empty());

        let runs = renamed(&run, "runs", 1);
        let (source, mut target) = stores(&[&run], &[&runs]);
        let engine = SyncEngine::new(&source, &mut target, Box::new(IdentityMatch));
        let diff = engine.compare(RecordType::Tag, None, None).unwrap();
        let change = &diff.changes[0];
        assert_eq!(change.change_type, ChangeType::Modified);
        assert_eq!(change.delta.keys().collect::<Vec<_>>(), vec!["name"]);
        assert_eq!(target.write_count(), 0);
    }

    #[test]
    fn test_source_wins_and_target_wins_on_modified() {
        let run = tag("run");
        let runs = renamed(&run, "runs", 1);

        let (source, mut target) = stores(&[&run], &[&runs]);
        let report = SyncEngine::new(&source, &mut target, Box::new(IdentityMatch))
            .sync(RecordType::Tag, &SourceWins, &SyncOptions::default())
            .unwrap();
        assert_eq!(report.stats().updated, 1);
        assert_eq!(target.get(&run.id).unwrap().unwrap().label(), "run");

        let (source, mut target) = stores(&[&run], &[&runs]);
        let report = SyncEngine::new(&source, &mut target, Box::new(IdentityMatch))
            .sync(RecordType::Tag, &TargetWins, &SyncOptions::default())
            .unwrap();
        assert_eq!(report.stats().skipped, 1);
        assert_eq!(target.write_count(), 0);
        assert_eq!(target.get(&run.id).unwrap().unwrap().label(), "runs");
    }

    #[test]
    fn test_second_sync_is_all_unchanged() {
        let a = tag("noun");
        let b = tag("verb");
        let (source, mut target) = stores(&[&a, &b], &[]);

        let first = SyncEngine::new(&source, &mut target, Box::new(IdentityMatch))
            .sync(RecordType::Tag, &SourceWins, &SyncOptions::default())
            .unwrap();
        assert_eq!(first.stats().created, 2);
        let writes = target.write_count();

        let second = SyncEngine::new(&source, &mut target, Box::new(IdentityMatch))
            .sync(RecordType::Tag, &SourceWins, &SyncOptions::default())
            .unwrap();
        assert!(second.changes.iter().all(|c| c.change_type == ChangeType::Unchanged));
        assert_eq!(second.stats().unchanged, 2);
        assert_eq!(target.write_count(), writes);
    }

    #[test]
    fn test_ambiguous_field_match_is_new() {
        let source_run = tag("run");
        let dup_a = tag("run");
        let dup_b = tag("run");
        let (source, mut target) = stores(&[&source_run], &[&dup_a, &dup_b]);

        let strategy = FieldMatch::new(vec!["name".to_string()], false);
        let engine = SyncEngine::new(&source, &mut target, Box::new(strategy));
        let filter = RecordFilter::new().with_property("name", "run");
        let diff = engine.compare(RecordType::Tag, Some(&filter), None).unwrap();

        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].change_type, ChangeType::New);
        assert!(diff.changes[0].diagnostics[0].contains("ambiguous"));
    }

    #[test]
    fn test_field_match_remaps_references() {
        let entry = |form: &str, variant_of: Option<RecordId>| {
            Record::new(RecordKind::Entry(Entry {
                lexeme_form: LocalizedText::new().with("en", form),
                variant_of,
                ..Entry::default()
            }))
        };
        let base_source = entry("run", None);
        let base_target = entry("run", None);
        let variant = entry("ran", Some(base_source.id));
        let (source, mut target) = stores(&[&base_source, &variant], &[&base_target]);

        let strategy = FieldMatch::new(vec!["lexeme_form".to_string()], false);
        let report = SyncEngine::new(&source, &mut target, Box::new(strategy))
            .sync(RecordType::Entry, &SourceWins, &SyncOptions::default())
            .unwrap();

        assert!(!report.blocked, "{:?}", report.issues);
        assert_eq!(report.stats().created, 1);
        let written = target.get(&variant.id).unwrap().unwrap();
        assert_eq!(written.references(), vec![("variant_of".to_string(), base_target.id)]);
    }

    #[test]
    fn test_field_match_with_remapped_reference_is_idempotent() {
        let entry = |form: &str, variant_of: Option<RecordId>| {
            Record::new(RecordKind::Entry(Entry {
                lexeme_form: LocalizedText::new().with("en", form),
                variant_of,
                ..Entry::default()
            }))
        };
        let base_source = entry("run", None);
        let base_target = entry("run", None);
        let variant = entry("ran", Some(base_source.id));
        let (source, mut target) = stores(&[&base_source, &variant], &[&base_target]);
        let field = || Box::new(FieldMatch::new(vec!["lexeme_form".to_string()], false));

        SyncEngine::new(&source, &mut target, field())
            .sync(RecordType::Entry, &SourceWins, &SyncOptions::default())
            .unwrap();
        let writes = target.write_count();

        let second = SyncEngine::new(&source, &mut target, field())
            .sync(RecordType::Entry, &SourceWins, &SyncOptions::default())
            .unwrap();
        assert!(
            second.changes.iter().all(|c| c.change_type == ChangeType::Unchanged),
            "{:?}",
            second.changes
        );
        assert_eq!(target.write_count(), writes);
    }

    #[test]
    fn test_hybrid_identity_wins_over_earlier_field_fallback() {
        let noun = tag("noun");
        let substantive = tag("substantive");
        let in_target = renamed(&substantive, "noun", 1);
        let (source, mut target) = stores(&[&noun, &substantive], &[&in_target]);

        let strategy = HybridMatch::new(FieldMatch::new(vec!["name".to_string()], false));
        let report = SyncEngine::new(&source, &mut target, Box::new(strategy))
            .sync(RecordType::Tag, &SourceWins, &SyncOptions::default())
            .unwrap();

        assert_eq!(report.stats().errored, 0, "{:?}", report.outcomes);
        assert_eq!(report.stats().created, 1);
        assert_eq!(report.stats().updated, 1);
        assert!(target.calls.contains(&Call::Create(noun.id)));
        assert_eq!(target.get(&substantive.id).unwrap().unwrap().label(), "substantive");
        assert_eq!(target.get(&noun.id).unwrap().unwrap().label(), "noun");
    }

    #[test]
    fn test_deleted_only_with_policy() {
        let keep = tag("noun");
        let gone = tag("adverb");
        let (source, mut target) = stores(&[&keep], &[&keep, &gone]);

        let report = SyncEngine::new(&source, &mut target, Box::new(IdentityMatch))
            .sync(RecordType::Tag, &SourceWins, &SyncOptions::default())
            .unwrap();
        assert_eq!(report.outcome_for(&gone.id).unwrap().disposition, Disposition::Skipped);
        assert!(target.get(&gone.id).unwrap().is_some());

        let options = SyncOptions {
            deletion_policy: DeletionPolicy::DeleteInTarget,
            ..SyncOptions::default()
        };
        let report = SyncEngine::new(&source, &mut target, Box::new(IdentityMatch))
            .sync(RecordType::Tag, &SourceWins, &options)
            .unwrap();
        assert_eq!(report.stats().deleted, 1);
        assert!(target.get(&gone.id).unwrap().is_none());
        assert!(target.calls.contains(&Call::Delete(gone.id)));
    }

    #[test]
    fn test_filtered_compare_reports_no_deletions() {
        let a = tag("noun");
        let only_target = tag("verb");
        let (source, mut target) = stores(&[&a], &[&only_target]);
        let engine = SyncEngine::new(&source, &mut target, Box::new(IdentityMatch));

        let all = engine.compare(RecordType::Tag, None, None).unwrap();
        assert_eq!(all.count(ChangeType::Deleted), 1);
        let filter = RecordFilter::new().with_property("name", "noun");
        let some = engine.compare(RecordType::Tag, Some(&filter), None).unwrap();
        assert_eq!(some.count(ChangeType::Deleted), 0);
    }

    #[test]
    fn test_baseline_detects_conflict() {
        let base = tag("run");
        let theirs = renamed(&base, "runs", 5);
        let ours = renamed(&base, "ran", 3);
        let (source, mut target) = stores(&[&theirs], &[&ours]);
        let baseline = Snapshot::from_records([&base]);

        let engine = SyncEngine::new(&source, &mut target, Box::new(IdentityMatch));
        let diff = engine.compare(RecordType::Tag, None, Some(&baseline)).unwrap();
        assert_eq!(diff.changes[0].change_type, ChangeType::Conflict);
        let without = engine.compare(RecordType::Tag, None, None).unwrap();
        assert_eq!(without.changes[0].change_type, ChangeType::Modified);
    }

    #[test]
    fn test_dangling_owner_child_reference_blocks_sync() {
        let parent = Record::new(RecordKind::Entry(Entry {
            lexeme_form: LocalizedText::new().with("en", "run"),
            ..Entry::default()
        }));
        let child = Record::new(RecordKind::Sense(Sense {
            gloss: LocalizedText::new().with("en", "to run"),
            part_of_speech: Some(RecordId::generate()),
            ..Sense::default()
        }))
        .owned_by(parent.id, "senses");
        let (source, mut target) = stores(&[&parent, &child], &[&parent]);

        let report = SyncEngine::new(&source, &mut target, Box::new(IdentityMatch))
            .sync(RecordType::Sense, &SourceWins, &SyncOptions::default())
            .unwrap();
        assert_eq!(report.status(), ReportStatus::ValidationBlocked);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].record_id, child.id);
        assert_eq!(target.write_count(), 0);
    }

    #[test]
    fn test_cancel_flag_skips_remaining() {
        let (source, mut target) = stores(&[&tag("a"), &tag("b")], &[]);
        let cancel = Arc::new(AtomicBool::new(false));
        cancel.store(true, Ordering::Relaxed);
        let options = SyncOptions {
            cancel: Some(Arc::clone(&cancel)),
            ..SyncOptions::default()
        };
        let report = SyncEngine::new(&source, &mut target, Box::new(IdentityMatch))
            .sync(RecordType::Tag, &SourceWins, &options)
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.stats().skipped, 2);
        assert_eq!(report.status(), ReportStatus::CompletedWithWarnings);
    }

    #[test]
    fn test_snapshot_after_sync_is_clean_baseline() {
        let a = tag("noun");
        let (source, mut target) = stores(&[&a], &[]);
        let mut engine = SyncEngine::new(&source, &mut target, Box::new(IdentityMatch));
        engine.sync(RecordType::Tag, &SourceWins, &SyncOptions::default()).unwrap();

        let snapshot = engine.snapshot(RecordType::Tag).unwrap();
        assert_eq!(snapshot.len(), 1);
        let diff = engine.compare(RecordType::Tag, None, Some(&snapshot)).unwrap();
        assert!(diff.is_clean());
    }
}
