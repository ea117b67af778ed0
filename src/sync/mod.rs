//! Cross-store synchronization.
//!
//! This module compares and copies record graphs between two stores:
//!
//! - **Matching**: pair source and target records (identity, key fields, hybrid)
//! - **Diffing**: classify each pair as NEW, MODIFIED, DELETED, CONFLICT or UNCHANGED
//! - **Resolution**: decide which values a divergent pair writes
//! - **Validation**: check references and owners before anything is written
//! - **Merging**: the only place target writes happen, with deferred reference patches
//! - **Import**: hierarchical (seed + dependencies) and selective (filtered) imports
//!
//! # Architecture
//!
//! Every operation follows the same pipeline:
//! 1. Collect candidates (all records of a type, a filter, or a dependency graph)
//! 2. Match against the target and diff each pair
//! 3. Resolve, then validate the whole batch; CRITICAL issues block writes
//! 4. Write through [`MergeOperations`], then apply deferred reference patches
//!
//! # Example
//!
//! ```ignore
//! use gsync::sync::{SyncEngine, SyncOptions, IdentityMatch, SourceWins};
//!
//! let mut engine = SyncEngine::new(&source, &mut target, Box::new(IdentityMatch));
//! let diff = engine.compare(RecordType::Entry, None, None)?;
//! let report = engine.sync(RecordType::Entry, &SourceWins, &SyncOptions::default())?;
//! ```

mod diff;
mod engine;
mod file;
pub mod graph;
mod hash;
mod hierarchy;
mod matching;
mod merge;
mod report;
mod resolver;
mod selective;
mod snapshot;
#[cfg(test)]
mod testing;
mod types;
mod validator;

pub use diff::{child_delta, diff_properties, DiffEngine};
pub use engine::{SyncEngine, SyncOptions};
pub use file::{atomic_write, read_jsonl, write_jsonl};
pub use graph::{DependencyError, DependencyGraph, GraphOptions, DEFAULT_MAX_DEPTH};
pub use hash::{content_hash, has_changed};
pub use hierarchy::{HierarchicalImporter, ImportOptions};
pub use matching::{
    parse_strategy, CandidateSet, ClaimTracker, FieldMatch, HybridMatch, IdentityMatch, MatchOutcome,
    MatchStrategy,
};
pub use merge::{DeletionPolicy, MergeOperations, MergeOptions, PlannedWrite};
pub use report::{export, OutputFormat, Render};
pub use resolver::{
    parse_field_policy, parse_resolver, ConflictResolver, FieldMerge, FieldPolicy, Manual, NewestWins,
    Resolution, SourceWins, TargetWins,
};
pub use selective::{
    parse_property_filter, parse_timestamp, RecordFilter, SelectiveImporter, TimeField, TimeWindow,
};
pub use snapshot::{Snapshot, SnapshotEntry};
pub use types::{
    Change, ChangeType, ChangedSide, ChildDelta, DiffResult, Disposition, PendingPatch, PropertyDelta,
    RecordError, RecordOutcome, ReportStatus, Severity, SyncReport, SyncStats, ValidationIssue,
};
pub use validator::{ReferenceValidator, ValidationSummary};
