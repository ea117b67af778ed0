//! Report rendering: console table, markdown, JSON and CSV.
//!
//! Renderers return strings; the CLI decides whether to print them or write
//! them to a file with [`export`].

use std::fmt::Write as _;
use std::path::Path;

use colored::{ColoredString, Colorize};
use serde::Serialize;

use crate::error::Result;
use crate::model::PropertyValue;
use crate::sync::file::atomic_write;
use crate::sync::types::{
    Change, ChangeType, ChangedSide, DiffResult, Disposition, ReportStatus, Severity, SyncReport,
};

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
    Markdown,
}

/// Something that can be shown in every [`OutputFormat`].
pub trait Render: Serialize {
    fn table(&self) -> String;
    fn markdown(&self) -> String;
    fn csv(&self) -> String;

    /// # Errors
    ///
    /// Returns a serialization error for JSON output.
    fn render(&self, format: OutputFormat) -> Result<String> {
        Ok(match format {
            OutputFormat::Table => self.table(),
            OutputFormat::Json => serde_json::to_string_pretty(self)?,
            OutputFormat::Csv => self.csv(),
            OutputFormat::Markdown => self.markdown(),
        })
    }
}

/// Write rendered output to `path` atomically.
///
/// # Errors
///
/// Returns the I/O error if the file cannot be written.
pub fn export(path: &Path, content: &str) -> Result<()> {
    atomic_write(path, content)
}

fn change_marker(change_type: ChangeType) -> ColoredString {
    match change_type {
        ChangeType::New => "+ NEW".green(),
        ChangeType::Modified => "~ MODIFIED".yellow(),
        ChangeType::Deleted => "- DELETED".red(),
        ChangeType::Conflict => "! CONFLICT".magenta().bold(),
        ChangeType::Unchanged => "  UNCHANGED".dimmed(),
    }
}

fn severity_marker(severity: Severity) -> ColoredString {
    match severity {
        Severity::Critical => severity.as_str().red().bold(),
        Severity::Warning => severity.as_str().yellow(),
        Severity::Info => severity.as_str().cyan(),
    }
}

fn status_marker(status: ReportStatus) -> ColoredString {
    match status {
        ReportStatus::Success => status.as_str().green().bold(),
        ReportStatus::CompletedWithWarnings => status.as_str().yellow().bold(),
        ReportStatus::ValidationBlocked | ReportStatus::RuntimeError => status.as_str().red().bold(),
    }
}

const fn side_str(side: ChangedSide) -> &'static str {
    match side {
        ChangedSide::Source => "source",
        ChangedSide::Target => "target",
        ChangedSide::Both => "both",
        ChangedSide::Unknown => "",
    }
}

fn short_or_dash(id: Option<crate::model::RecordId>) -> String {
    id.map_or_else(|| "-".to_string(), |id| id.short())
}

fn md_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

fn md_value(value: &PropertyValue) -> String {
    md_cell(&value.to_string())
}

fn write_change_lines(out: &mut String, change: &Change) {
    let _ = writeln!(
        out,
        "  {:<12} {} {}",
        change_marker(change.change_type),
        change.label.bold(),
        format!("({})", change.record_id().short()).dimmed()
    );
    for (field, delta) in &change.delta {
        let side = match delta.side {
            ChangedSide::Unknown => String::new(),
            side => format!(" [{}]", side_str(side)),
        };
        let _ = writeln!(out, "      {field}: {} -> {}{side}", delta.target, delta.source);
    }
    for (field, children) in &change.children {
        let _ = writeln!(
            out,
            "      {field}: +{} -{} ~{}",
            children.added.len(),
            children.removed.len(),
            children.modified.len()
        );
    }
    for note in &change.diagnostics {
        let _ = writeln!(out, "      {}", note.dimmed());
    }
}

impl Render for DiffResult {
    fn table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} {} {}",
            "Compare".bold().underline(),
            self.record_type.to_string().bold(),
            format!("(match: {})", self.strategy).dimmed()
        );
        let counts: Vec<String> = self
            .counts()
            .iter()
            .map(|(ct, n)| format!("{ct}: {n}"))
            .collect();
        if counts.is_empty() {
            let _ = writeln!(out, "{}", "No records.".dimmed());
            return out;
        }
        let _ = writeln!(out, "  {}", counts.join("  "));
        let _ = writeln!(out);
        for change in self.changes.iter().filter(|c| c.change_type != ChangeType::Unchanged) {
            write_change_lines(&mut out, change);
        }
        if self.is_clean() {
            let _ = writeln!(out, "{}", "Stores are in sync.".green());
        }
        out
    }

    fn markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Compare: {} (match: {})\n", self.record_type, self.strategy);
        let _ = writeln!(out, "| Change | Count |\n|---|---|");
        for (ct, n) in self.counts() {
            let _ = writeln!(out, "| {ct} | {n} |");
        }
        for change in self.changes.iter().filter(|c| c.change_type != ChangeType::Unchanged) {
            let _ = writeln!(
                out,
                "\n## {} `{}` ({})\n",
                change.change_type,
                md_cell(&change.label),
                change.record_id().short()
            );
            for note in &change.diagnostics {
                let _ = writeln!(out, "> {}\n", md_cell(note));
            }
            if !change.delta.is_empty() {
                let _ = writeln!(out, "| Property | Source | Target | Changed |\n|---|---|---|---|");
                for (field, delta) in &change.delta {
                    let _ = writeln!(
                        out,
                        "| {field} | {} | {} | {} |",
                        md_value(&delta.source),
                        md_value(&delta.target),
                        side_str(delta.side)
                    );
                }
            }
        }
        out
    }

    fn csv(&self) -> String {
        let mut out = String::from("change_type,record_type,source_id,target_id,label,fields\n");
        for change in &self.changes {
            let fields: Vec<&str> = change.delta.keys().map(String::as_str).collect();
            let _ = writeln!(
                out,
                "{},{},{},{},{},{}",
                change.change_type,
                change.record_type,
                change.source_id.map(|id| id.to_string()).unwrap_or_default(),
                change.target_id.map(|id| id.to_string()).unwrap_or_default(),
                crate::csv_escape(&change.label),
                crate::csv_escape(&fields.join(";"))
            );
        }
        out
    }
}

impl Render for SyncReport {
    fn table(&self) -> String {
        let mut out = String::new();
        let title = format!("{} {}", capitalize(&self.operation), self.record_type);
        let _ = write!(out, "{}", title.bold().underline());
        if self.dry_run {
            let _ = write!(out, " {}", "(dry run, nothing written)".yellow());
        }
        let _ = writeln!(out);

        let stats = self.stats();
        let _ = writeln!(
            out,
            "  {} created  {} updated  {} deleted  {} skipped  {} errored  {} unchanged",
            stats.created.to_string().green(),
            stats.updated.to_string().yellow(),
            stats.deleted.to_string().red(),
            stats.skipped,
            stats.errored.to_string().red(),
            stats.unchanged.to_string().dimmed()
        );

        if !self.issues.is_empty() {
            let _ = writeln!(out, "\n{}", "Validation:".blue().bold());
            for issue in &self.issues {
                let _ = writeln!(
                    out,
                    "  {:<8} {} {}: {}",
                    severity_marker(issue.severity),
                    issue.record_type,
                    issue.record_id.short(),
                    issue.message
                );
            }
        }
        if !self.dependency_errors.is_empty() {
            let _ = writeln!(out, "\n{}", "Dependencies:".blue().bold());
            for err in &self.dependency_errors {
                let _ = writeln!(out, "  {}", err.red());
            }
        }

        let shown: Vec<_> = self
            .outcomes
            .iter()
            .filter(|o| o.disposition != Disposition::Unchanged)
            .collect();
        if !shown.is_empty() {
            let _ = writeln!(out, "\n{}", "Records:".blue().bold());
            for o in shown {
                let disposition = match o.disposition {
                    Disposition::Created => o.disposition.as_str().green(),
                    Disposition::Updated => o.disposition.as_str().yellow(),
                    Disposition::Deleted | Disposition::Errored => o.disposition.as_str().red(),
                    Disposition::Skipped | Disposition::Unchanged => o.disposition.as_str().dimmed(),
                };
                let detail = o.detail.as_deref().map(|d| format!(" ({d})")).unwrap_or_default();
                let _ = writeln!(
                    out,
                    "  {:<9} {} {} {}{}",
                    disposition,
                    o.record_type,
                    o.label.bold(),
                    o.record_id.short().dimmed(),
                    detail.dimmed()
                );
            }
        }

        if !self.patches.is_empty() {
            let applied = self.patches.iter().filter(|p| p.applied).count();
            let _ = writeln!(out, "\n  Deferred references: {applied}/{} applied", self.patches.len());
        }
        if self.cancelled {
            let _ = writeln!(out, "  {}", "Cancelled before all records were processed.".yellow());
        }
        if self.aborted {
            let _ = writeln!(out, "  {}", "Stopped at the first error (fail-fast).".red());
        }
        let _ = writeln!(out, "\n  Status: {}", status_marker(self.status()));
        out
    }

    fn markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {} report: {}\n", capitalize(&self.operation), self.record_type);
        let _ = writeln!(out, "- Status: **{}**", self.status().as_str());
        let _ = writeln!(out, "- Dry run: {}", if self.dry_run { "yes" } else { "no" });
        let stats = self.stats();
        let _ = writeln!(out, "\n| Created | Updated | Deleted | Skipped | Errored | Unchanged |");
        let _ = writeln!(out, "|---|---|---|---|---|---|");
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            stats.created, stats.updated, stats.deleted, stats.skipped, stats.errored, stats.unchanged
        );

        if !self.issues.is_empty() {
            let _ = writeln!(out, "\n## Validation\n");
            for issue in &self.issues {
                let _ = writeln!(
                    out,
                    "- **{}** {} `{}`: {}",
                    issue.severity,
                    issue.record_type,
                    issue.record_id,
                    md_cell(&issue.message)
                );
            }
        }
        if !self.dependency_errors.is_empty() {
            let _ = writeln!(out, "\n## Dependency errors\n");
            for err in &self.dependency_errors {
                let _ = writeln!(out, "- {}", md_cell(err));
            }
        }
        if !self.errors.is_empty() {
            let _ = writeln!(out, "\n## Errors\n");
            for err in &self.errors {
                let _ = writeln!(
                    out,
                    "- {} `{}` [{}]: {}",
                    err.record_type,
                    err.record_id,
                    err.code,
                    md_cell(&err.message)
                );
            }
        }

        let _ = writeln!(out, "\n## Records\n");
        let _ = writeln!(out, "| Record | Type | Label | Result | Detail |\n|---|---|---|---|---|");
        for o in &self.outcomes {
            let _ = writeln!(
                out,
                "| `{}` | {} | {} | {} | {} |",
                o.record_id.short(),
                o.record_type,
                md_cell(&o.label),
                o.disposition,
                md_cell(o.detail.as_deref().unwrap_or(""))
            );
        }

        for change in self.changes.iter().filter(|c| c.is_divergence()) {
            let _ = writeln!(out, "\n### {} `{}`\n", change.change_type, md_cell(&change.label));
            let _ = writeln!(out, "| Property | Source | Target |\n|---|---|---|");
            for (field, delta) in &change.delta {
                let _ = writeln!(
                    out,
                    "| {field} | {} | {} |",
                    md_value(&delta.source),
                    md_value(&delta.target)
                );
            }
        }
        out
    }

    fn csv(&self) -> String {
        let mut out = String::from("record_id,record_type,label,disposition,detail\n");
        for o in &self.outcomes {
            let _ = writeln!(
                out,
                "{},{},{},{},{}",
                o.record_id,
                o.record_type,
                crate::csv_escape(&o.label),
                o.disposition,
                crate::csv_escape(o.detail.as_deref().unwrap_or(""))
            );
        }
        out
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars
        .next()
        .map(|c| c.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LocalizedText, Record, RecordId, RecordKind, RecordType, Tag};
    use crate::sync::diff::DiffEngine;
    use crate::sync::types::{RecordOutcome, ValidationIssue};

    fn tag(name: &str) -> Record {
        Record::new(RecordKind::Tag(Tag {
            name: LocalizedText::new().with("en", name),
            ..Tag::default()
        }))
    }

    fn diff() -> DiffResult {
        let source = tag("run");
        let mut target = source.clone();
        target.kind = RecordKind::Tag(Tag {
            name: LocalizedText::new().with("en", "runs"),
            ..Tag::default()
        });
        DiffResult {
            record_type: RecordType::Tag,
            strategy: "identity".to_string(),
            changes: vec![
                DiffEngine::new().diff(Some(&source), Some(&target)).unwrap(),
                DiffEngine::new().diff(Some(&tag("a, b")), None).unwrap(),
            ],
        }
    }

    fn report() -> SyncReport {
        let mut report = SyncReport::new("import", RecordType::Tag, true);
        let id = RecordId::generate();
        report.outcomes = vec![
            RecordOutcome::new(id, RecordType::Tag, "run", Disposition::Created),
            RecordOutcome::new(RecordId::generate(), RecordType::Tag, "walk", Disposition::Skipped)
                .with_detail("kept target values"),
        ];
        report.issues = vec![ValidationIssue {
            severity: Severity::Warning,
            record_id: id,
            record_type: RecordType::Tag,
            message: "name | abbreviation".to_string(),
        }];
        report
    }

    #[test]
    fn test_diff_markdown_lists_delta() {
        let md = diff().markdown();
        assert!(md.starts_with("# Compare: tag (match: identity)"));
        assert!(md.contains("| MODIFIED | 1 |"));
        assert!(md.contains("| name | {en: \"run\"} | {en: \"runs\"} |"));
    }

    #[test]
    fn test_diff_csv_escapes_labels() {
        let csv = diff().csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("MODIFIED,tag,"));
        assert!(lines[1].ends_with(",run,name"));
        assert!(lines[2].contains("\"a, b\""));
    }

    #[test]
    fn test_report_markdown_and_csv() {
        let report = report();
        let md = report.markdown();
        assert!(md.starts_with("# Import report: tag"));
        assert!(md.contains("- Status: **completed with warnings**"));
        assert!(md.contains("name \\| abbreviation"));

        let csv = report.csv();
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.lines().nth(2).unwrap().ends_with(",walk,skipped,kept target values"));
    }

    #[test]
    fn test_table_without_colors() {
        colored::control::set_override(false);
        let table = report().table();
        assert!(table.starts_with("Import tag (dry run, nothing written)"));
        assert!(table.contains("1 created"));
        assert!(table.contains("Status: completed with warnings"));
        let diff_table = diff().table();
        assert!(diff_table.contains("name: {en: \"runs\"} -> {en: \"run\"}"));
    }

    #[test]
    fn test_json_render_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let json = report().render(OutputFormat::Json).unwrap();
        export(&path, &json).unwrap();

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["operation"], "import");
        assert_eq!(value["outcomes"][0]["disposition"], "created");
        assert_eq!(value["issues"][0]["severity"], "WARNING");
    }
}
