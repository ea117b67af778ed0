//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub use crate::sync::OutputFormat;

pub mod commands;

/// gsync - synchronize record graphs between two stores
#[derive(Parser, Debug)]
#[command(name = "gsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: $GSYNC_CONFIG or ~/.gsync/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Actor name for the audit trail
    #[arg(long, global = true, env = "GSYNC_ACTOR")]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Output format (table, json, csv, markdown)
    #[arg(long, value_enum, global = true, default_value_t)]
    pub format: OutputFormat,

    /// Also write the report to a file (.md, .json, .csv; anything else gets markdown)
    #[arg(long, global = true)]
    pub report: Option<PathBuf>,

    /// Match, diff and validate without writing to the target
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

impl Cli {
    /// Effective output format: `--json` wins over `--format`.
    #[must_use]
    pub fn output_format(&self) -> OutputFormat {
        if self.json { OutputFormat::Json } else { self.format }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an empty store
    Init {
        /// Path of the new store
        path: PathBuf,

        /// Overwrite an existing store
        #[arg(long)]
        force: bool,
    },

    /// Show what a sync would change, without writing
    Compare(CompareArgs),

    /// Synchronize one record type from source to target
    Sync(SyncArgs),

    /// Import seed records with their owned subtrees and references
    Import(ImportArgs),

    /// Import records selected by time window or property
    Select(SelectArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Print version information
    Version,
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

/// The two stores and the record type every data command works on.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Source store (opened read-only)
    #[arg(long, env = "GSYNC_SOURCE")]
    pub source: PathBuf,

    /// Target store
    #[arg(long, env = "GSYNC_TARGET")]
    pub target: PathBuf,

    /// Record type (entry, sense, example, tag)
    #[arg(long = "type", short = 't')]
    pub record_type: String,
}

/// How records are paired.
#[derive(Args, Debug, Clone, Default)]
pub struct MatchArgs {
    /// Match strategy: identity, field[:f1,f2], field-ci[:..], hybrid[:..]
    #[arg(long = "match", short = 'm')]
    pub strategy: Option<String>,

    /// Compare key fields case-insensitively
    #[arg(long)]
    pub case_insensitive: bool,
}

/// How divergent pairs are resolved.
#[derive(Args, Debug, Clone, Default)]
pub struct ResolveArgs {
    /// Conflict resolver: source-wins, target-wins, newest-wins, field-merge, manual
    #[arg(long, short = 'r')]
    pub resolver: Option<String>,

    /// Per-field policy for field-merge, e.g. gloss=source (repeatable)
    #[arg(long = "policy")]
    pub policies: Vec<String>,

    /// Stop at the first record that fails to write
    #[arg(long)]
    pub fail_fast: bool,

    /// Write even when validation reports CRITICAL issues
    #[arg(long)]
    pub allow_critical: bool,
}

/// Source record filters.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Created at or after (RFC 3339 or YYYY-MM-DD)
    #[arg(long)]
    pub created_after: Option<String>,

    /// Created before
    #[arg(long)]
    pub created_before: Option<String>,

    /// Modified at or after
    #[arg(long)]
    pub modified_after: Option<String>,

    /// Modified before
    #[arg(long)]
    pub modified_before: Option<String>,

    /// Property predicate field=value (repeatable, all must match)
    #[arg(long = "where", short = 'w')]
    pub predicates: Vec<String>,
}

/// Dependency traversal switches.
#[derive(Args, Debug, Clone, Default)]
pub struct GraphArgs {
    /// Do not carry owned children
    #[arg(long)]
    pub no_owned: bool,

    /// Do not carry referenced records missing from the target
    #[arg(long)]
    pub no_references: bool,

    /// Maximum ownership depth below a seed
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Treat reaching the depth limit as an error for that seed
    #[arg(long)]
    pub strict_depth: bool,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    #[command(flatten)]
    pub stores: StoreArgs,

    #[command(flatten)]
    pub matching: MatchArgs,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Baseline snapshot from an earlier sync (enables CONFLICT detection)
    #[arg(long)]
    pub baseline: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub stores: StoreArgs,

    #[command(flatten)]
    pub matching: MatchArgs,

    #[command(flatten)]
    pub resolve: ResolveArgs,

    /// Delete target records that are missing from the source
    #[arg(long)]
    pub delete: bool,

    /// Baseline snapshot from an earlier sync (enables CONFLICT detection)
    #[arg(long)]
    pub baseline: Option<PathBuf>,

    /// Write a snapshot of the synced target records here afterwards
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    #[command(flatten)]
    pub stores: StoreArgs,

    /// Seed record id (repeatable)
    #[arg(long = "seed", short = 's', required = true)]
    pub seeds: Vec<String>,

    #[command(flatten)]
    pub matching: MatchArgs,

    #[command(flatten)]
    pub resolve: ResolveArgs,

    #[command(flatten)]
    pub graph: GraphArgs,
}

#[derive(Args, Debug)]
pub struct SelectArgs {
    #[command(flatten)]
    pub stores: StoreArgs,

    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub matching: MatchArgs,

    #[command(flatten)]
    pub resolve: ResolveArgs,

    #[command(flatten)]
    pub graph: GraphArgs,
}
