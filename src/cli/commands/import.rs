//! Import and select commands: carry records with their dependencies.

use tracing::debug;

use crate::cli::commands::{build_filter, graph_options, open_stores, parse_record_type, Context};
use crate::cli::{ImportArgs, MatchArgs, ResolveArgs, SelectArgs};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::model::{RecordId, RecordType};
use crate::storage::{RecordSource, SqliteStorage};
use crate::sync::{GraphOptions, HierarchicalImporter, ImportOptions, MatchStrategy, SelectiveImporter};
use crate::validate::find_similar_ids;

/// Match strategies for every type an import can touch.
///
/// The command-line flag applies to the seed type only; owned children and
/// referenced records use their configured strategy.
fn strategies(
    config: &SyncConfig,
    seed_type: RecordType,
    matching: &MatchArgs,
) -> Result<Vec<(RecordType, Box<dyn MatchStrategy>)>> {
    RecordType::ALL
        .into_iter()
        .map(|rt| {
            let strategy = if rt == seed_type {
                config.strategy(rt, matching.strategy.as_deref(), matching.case_insensitive)?
            } else {
                config.strategy(rt, None, false)?
            };
            Ok((rt, strategy))
        })
        .collect()
}

fn import_options(ctx: &Context, resolve: &ResolveArgs, graph: GraphOptions) -> ImportOptions {
    ImportOptions {
        graph,
        dry_run: ctx.dry_run,
        allow_critical: resolve.allow_critical,
        fail_fast: resolve.fail_fast || ctx.config.fail_fast,
        cancel: None,
    }
}

/// Parse seed ids and check that each exists in the source.
fn resolve_seeds(source: &SqliteStorage, record_type: RecordType, raw: &[String]) -> Result<Vec<RecordId>> {
    let mut seeds = Vec::with_capacity(raw.len());
    for input in raw {
        let id: RecordId = input.trim().parse()?;
        if !source.contains(&id)? {
            let known: Vec<String> = source
                .all(record_type)?
                .iter()
                .map(|r| r.id.to_string())
                .collect();
            let similar = find_similar_ids(input, &known, 3);
            debug!(seed = %input, ?similar, "Seed not in source");
            return Err(if similar.is_empty() {
                Error::RecordNotFound { id: input.clone() }
            } else {
                Error::InvalidArgument(format!(
                    "Seed {input} not found in source. Did you mean: {}?",
                    similar.join(", ")
                ))
            });
        }
        seeds.push(id);
    }
    Ok(seeds)
}

/// Execute the import command.
///
/// # Errors
///
/// Returns an error for bad arguments, unknown seeds, missing stores or
/// read failures.
pub fn execute_import(args: &ImportArgs, ctx: &Context) -> Result<u8> {
    let record_type = parse_record_type(&args.stores.record_type)?;
    let resolver = ctx
        .config
        .resolver(args.resolve.resolver.as_deref(), &args.resolve.policies)?;
    let options = import_options(ctx, &args.resolve, graph_options(&args.graph, &ctx.config));

    let (source, mut target) = open_stores(&args.stores, &ctx.actor)?;
    let seeds = resolve_seeds(&source, record_type, &args.seeds)?;

    let mut importer = HierarchicalImporter::new(&source, &mut target)
        .with_resolver(resolver)
        .with_options(options);
    for (rt, strategy) in strategies(&ctx.config, record_type, &args.matching)? {
        importer = importer.with_strategy(rt, strategy);
    }
    let report = importer.import(record_type, &seeds)?;

    ctx.emit(&report)?;
    Ok(report.status().exit_code())
}

/// Execute the select command.
///
/// # Errors
///
/// Returns an error for bad arguments or filters, missing stores or read
/// failures.
pub fn execute_select(args: &SelectArgs, ctx: &Context) -> Result<u8> {
    let record_type = parse_record_type(&args.stores.record_type)?;
    let filter = build_filter(&args.filter)?;
    let resolver = ctx
        .config
        .resolver(args.resolve.resolver.as_deref(), &args.resolve.policies)?;
    let options = import_options(ctx, &args.resolve, graph_options(&args.graph, &ctx.config));

    let (source, mut target) = open_stores(&args.stores, &ctx.actor)?;
    debug!(filter = %filter.describe(), "Selecting");

    let mut importer = SelectiveImporter::new(&source, &mut target, filter)
        .with_resolver(resolver)
        .with_options(options);
    for (rt, strategy) in strategies(&ctx.config, record_type, &args.matching)? {
        importer = importer.with_strategy(rt, strategy);
    }
    let report = importer.run(record_type)?;

    ctx.emit(&report)?;
    Ok(report.status().exit_code())
}
