//! Compare command: classify every record of a type without writing.

use tracing::debug;

use crate::cli::commands::{build_filter, open_stores, parse_record_type, Context};
use crate::cli::CompareArgs;
use crate::error::Result;
use crate::sync::{Snapshot, SyncEngine};

/// Execute the compare command.
///
/// # Errors
///
/// Returns an error for bad arguments, missing stores or read failures.
pub fn execute(args: &CompareArgs, ctx: &Context) -> Result<u8> {
    let record_type = parse_record_type(&args.stores.record_type)?;
    let strategy = ctx.config.strategy(
        record_type,
        args.matching.strategy.as_deref(),
        args.matching.case_insensitive,
    )?;
    let filter = build_filter(&args.filter)?;
    let baseline = args.baseline.as_deref().map(Snapshot::load).transpose()?;

    let (source, mut target) = open_stores(&args.stores, &ctx.actor)?;
    debug!(filter = %filter.describe(), "Comparing");
    let engine = SyncEngine::new(&source, &mut target, strategy);
    let filter = (!filter.is_empty()).then_some(&filter);
    let diff = engine.compare(record_type, filter, baseline.as_ref())?;

    ctx.emit(&diff)?;
    Ok(0)
}
