//! Command implementations.
//!
//! Data commands return the exit status of their report; errors bubble up to
//! `main` which maps them through [`ErrorCode`](crate::error::ErrorCode).

pub mod compare;
pub mod completions;
pub mod import;
pub mod init;
pub mod sync;
pub mod version;

use std::path::{Path, PathBuf};

use tracing::info;

use crate::cli::{Cli, FilterArgs, GraphArgs, OutputFormat, StoreArgs};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::model::RecordType;
use crate::storage::SqliteStorage;
use crate::sync::{
    export, parse_property_filter, parse_timestamp, GraphOptions, RecordFilter, Render, TimeField,
    TimeWindow, DEFAULT_MAX_DEPTH,
};

/// Settings shared by every data command.
pub struct Context {
    pub config: SyncConfig,
    pub format: OutputFormat,
    pub report: Option<PathBuf>,
    pub dry_run: bool,
    pub quiet: bool,
    pub actor: String,
}

impl Context {
    /// Load config and resolve global flags.
    ///
    /// # Errors
    ///
    /// Returns the config loading error.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let config = SyncConfig::load(cli.config.as_deref())?;
        let actor = cli.actor.clone().unwrap_or_else(|| config.actor());
        Ok(Self {
            config,
            format: cli.output_format(),
            report: cli.report.clone(),
            dry_run: cli.dry_run,
            quiet: cli.quiet,
            actor,
        })
    }

    /// Print `value` in the selected format and write the report file.
    ///
    /// # Errors
    ///
    /// Returns a serialization or file write error.
    pub fn emit<R: Render>(&self, value: &R) -> Result<()> {
        if !self.quiet || self.format == OutputFormat::Json {
            let rendered = value.render(self.format)?;
            print!("{rendered}");
            if !rendered.ends_with('\n') {
                println!();
            }
        }
        if let Some(path) = &self.report {
            let content = value.render(report_format(path))?;
            export(path, &content)?;
            info!(path = %path.display(), "Wrote report");
        }
        Ok(())
    }
}

/// File format implied by a report path's extension.
fn report_format(path: &Path) -> OutputFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => OutputFormat::Json,
        Some("csv") => OutputFormat::Csv,
        _ => OutputFormat::Markdown,
    }
}

/// # Errors
///
/// Returns `UnknownRecordType` for an unknown name.
pub fn parse_record_type(name: &str) -> Result<RecordType> {
    name.parse()
}

/// Open the source read-only and the target for writing.
///
/// # Errors
///
/// Returns `NotInitialized` when either store does not exist, and
/// `InvalidArgument` when both paths name the same file.
pub fn open_stores(stores: &StoreArgs, actor: &str) -> Result<(SqliteStorage, SqliteStorage)> {
    if !stores.target.exists() {
        return Err(Error::NotInitialized {
            path: stores.target.clone(),
        });
    }
    let same = match (stores.source.canonicalize(), stores.target.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if same {
        return Err(Error::InvalidArgument(
            "source and target must be different stores".to_string(),
        ));
    }
    let source = SqliteStorage::open_read_only(&stores.source)?;
    let target = SqliteStorage::open(&stores.target)?.with_actor(actor);
    Ok((source, target))
}

/// Build a record filter from command-line flags.
///
/// # Errors
///
/// Returns `InvalidArgument` for bad timestamps or predicates.
pub fn build_filter(args: &FilterArgs) -> Result<RecordFilter> {
    let mut filter = RecordFilter::new();
    let windows = [
        (TimeField::Created, &args.created_after, &args.created_before),
        (TimeField::Modified, &args.modified_after, &args.modified_before),
    ];
    for (field, after, before) in windows {
        if after.is_none() && before.is_none() {
            continue;
        }
        filter = filter.with_window(TimeWindow {
            field,
            after: after.as_deref().map(parse_timestamp).transpose()?,
            before: before.as_deref().map(parse_timestamp).transpose()?,
        });
    }
    for spec in &args.predicates {
        let (field, value) = parse_property_filter(spec)?;
        filter = filter.with_property(&field, &value);
    }
    Ok(filter)
}

/// Graph options from flags, falling back to config for `max_depth`.
#[must_use]
pub fn graph_options(args: &GraphArgs, config: &SyncConfig) -> GraphOptions {
    GraphOptions {
        include_owned: !args.no_owned,
        resolve_references: !args.no_references,
        max_depth: args.max_depth.or(config.max_depth).unwrap_or(DEFAULT_MAX_DEPTH),
        strict_depth: args.strict_depth,
    }
}
