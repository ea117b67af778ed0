//! Sync command: compare, resolve, validate and write one record type.
//!
//! With `--snapshot` the synced target state is saved after a real run, so
//! the next run can pass it as `--baseline` and see true conflicts.

use tracing::info;

use crate::cli::commands::{open_stores, parse_record_type, Context};
use crate::cli::SyncArgs;
use crate::error::Result;
use crate::sync::{DeletionPolicy, Snapshot, SyncEngine, SyncOptions};

/// Execute the sync command.
///
/// # Errors
///
/// Returns an error for bad arguments, missing stores or read failures.
/// Record-level failures are part of the report and its exit status.
pub fn execute(args: &SyncArgs, ctx: &Context) -> Result<u8> {
    let record_type = parse_record_type(&args.stores.record_type)?;
    let strategy = ctx.config.strategy(
        record_type,
        args.matching.strategy.as_deref(),
        args.matching.case_insensitive,
    )?;
    let resolver = ctx
        .config
        .resolver(args.resolve.resolver.as_deref(), &args.resolve.policies)?;
    let baseline = args.baseline.as_deref().map(Snapshot::load).transpose()?;

    let options = SyncOptions {
        dry_run: ctx.dry_run,
        deletion_policy: if args.delete {
            DeletionPolicy::DeleteInTarget
        } else {
            DeletionPolicy::Ignore
        },
        fail_fast: args.resolve.fail_fast || ctx.config.fail_fast,
        allow_critical: args.resolve.allow_critical,
        baseline,
        cancel: None,
    };

    let (source, mut target) = open_stores(&args.stores, &ctx.actor)?;
    let mut engine = SyncEngine::new(&source, &mut target, strategy);
    let report = engine.sync(record_type, resolver.as_ref(), &options)?;

    if let Some(path) = &args.snapshot {
        if ctx.dry_run || report.blocked {
            info!(path = %path.display(), "Nothing written, snapshot not saved");
        } else {
            let mut snapshot = options.baseline.clone().unwrap_or_default();
            snapshot.merge(engine.snapshot(record_type)?);
            snapshot.save(path)?;
            info!(path = %path.display(), records = snapshot.len(), "Saved snapshot");
        }
    }

    ctx.emit(&report)?;
    Ok(report.status().exit_code())
}
