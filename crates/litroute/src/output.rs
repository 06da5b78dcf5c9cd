//! Rendering command results as text or JSON on stdout.

use std::fmt::Write as _;

use anyhow::Result;
use chrono::{DateTime, Local, TimeZone, Utc};
use litroute_core::{
    CheckpointSummary, DedupeReport, ItemResult, RunReport, WorkflowCheckpoint, WorkflowId,
};
use serde::Serialize;

/// Output format chosen on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

impl Format {
    pub const fn from_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Text }
    }

    fn emit<T: Serialize>(self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        match self {
            Self::Json => println!("{}", serde_json::to_string_pretty(value)?),
            Self::Text => print!("{}", text()),
        }
        Ok(())
    }
}

pub fn run_report(format: Format, report: &RunReport) -> Result<()> {
    format.emit(report, || render_run_report(report))
}

pub fn batch(format: Format, results: &[(WorkflowId, Result<RunReport, String>)]) -> Result<()> {
    #[derive(Serialize)]
    struct Entry<'a> {
        id: &'a WorkflowId,
        #[serde(skip_serializing_if = "Option::is_none")]
        report: Option<&'a RunReport>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<&'a str>,
    }

    let entries: Vec<Entry<'_>> = results
        .iter()
        .map(|(id, result)| Entry {
            id,
            report: result.as_ref().ok(),
            error: result.as_ref().err().map(String::as_str),
        })
        .collect();

    format.emit(&entries, || {
        let mut out = String::new();
        for (id, result) in results {
            match result {
                Ok(report) => out.push_str(&render_run_report(report)),
                Err(e) => {
                    let _ = writeln!(out, "{id}: failed: {e}");
                }
            }
        }
        out
    })
}

pub fn summaries(format: Format, summaries: &[CheckpointSummary]) -> Result<()> {
    format.emit(&summaries, || render_summaries(summaries, &Local))
}

pub fn checkpoint(format: Format, checkpoint: &WorkflowCheckpoint) -> Result<()> {
    format.emit(checkpoint, || {
        let summary = checkpoint.summary();
        let mut out = String::new();
        let _ = writeln!(out, "Workflow:  {}", checkpoint.id);
        let _ = writeln!(
            out,
            "Status:    {}{}",
            checkpoint.status,
            if checkpoint.params.dry_run { " (dry run)" } else { "" }
        );
        let sources: Vec<String> = checkpoint.params.sources.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "Sources:   {}", sources.join(", "));
        let _ = writeln!(
            out,
            "Progress:  {}/{} processed, {} failed, {} skipped",
            summary.processed,
            checkpoint.params.treated_limit,
            summary.failed,
            summary.skipped
        );
        let _ = writeln!(
            out,
            "Cursor:    source {} offset {}",
            checkpoint.cursor.source, checkpoint.cursor.offset
        );
        let _ = writeln!(out, "Created:   {}", timestamp(&checkpoint.created_at, &Local));
        let _ = writeln!(out, "Updated:   {}", timestamp(&checkpoint.updated_at, &Local));
        if let Some(pending) = &checkpoint.pending {
            let _ = writeln!(
                out,
                "Pending:   {} -> {} (settled on resume)",
                pending.item_key, pending.destination
            );
        }
        if !checkpoint.log.is_empty() {
            out.push('\n');
        }
        for entry in &checkpoint.log {
            let outcome = entry
                .outcome
                .map_or_else(|| "-".to_string(), |o| o.to_string());
            match &entry.result {
                ItemResult::Routed {
                    destination, moved, ..
                } => {
                    let _ = writeln!(
                        out,
                        "  {}  {:<24} -> {}{}",
                        entry.item_key,
                        outcome,
                        destination,
                        if *moved { "" } else { " (in place)" }
                    );
                }
                ItemResult::Failed { error } => {
                    let _ = writeln!(out, "  {}  failed: {error}", entry.item_key);
                }
            }
        }
        out
    })
}

pub fn dedupe(format: Format, report: &DedupeReport) -> Result<()> {
    format.emit(report, || {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Scanned {} items in {}: {} groups, {} duplicates{}",
            report.scanned,
            report.source,
            report.groups.len(),
            report.duplicates(),
            if report.dry_run { " (dry run)" } else { "" }
        );
        for group in &report.groups {
            let _ = writeln!(out, "  {}  keep {}", group.key, group.survivor);
            for key in group.non_survivors() {
                let state = if report.moved.iter().any(|m| m == key) {
                    "moved"
                } else if report.failed.iter().any(|f| f.key == key) {
                    "failed"
                } else {
                    "pending"
                };
                let _ = writeln!(out, "    {key}  {state}");
            }
        }
        for failure in &report.failed {
            let _ = writeln!(out, "Could not move {}: {}", failure.key, failure.error);
        }
        if report.cancelled {
            out.push_str("Interrupted before all groups were handled.\n");
        }
        out
    })
}

/// Stored times are UTC; listings show them in `tz`.
fn timestamp<Tz: TimeZone>(time: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.with_timezone(tz).format("%Y-%m-%d %H:%M").to_string()
}

fn render_summaries<Tz: TimeZone>(summaries: &[CheckpointSummary], tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    if summaries.is_empty() {
        return "No workflows.\n".to_string();
    }
    let mut out = format!(
        "{:<24} {:<10} {:>9} {:>6} {:>7}  {:<16}  {}\n",
        "WORKFLOW", "STATUS", "PROCESSED", "FAILED", "SKIPPED", "CREATED", "UPDATED"
    );
    for s in summaries {
        let id = if s.dry_run {
            format!("{} (dry)", s.id)
        } else {
            s.id.to_string()
        };
        let _ = writeln!(
            out,
            "{:<24} {:<10} {:>9} {:>6} {:>7}  {:<16}  {}",
            id,
            s.status,
            s.processed,
            s.failed,
            s.skipped,
            timestamp(&s.created_at, tz),
            timestamp(&s.updated_at, tz)
        );
    }
    out
}

fn render_run_report(report: &RunReport) -> String {
    format!(
        "{}: {}{} | this run: {} processed, {} moved | total: {} processed, {} failed, {} skipped\n",
        report.id,
        report.status,
        if report.dry_run { " (dry run)" } else { "" },
        report.processed_now,
        report.moved_now,
        report.processed_total,
        report.failed_total,
        report.skipped_total
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use litroute_core::RunStatus;

    fn summary(id: &str, dry_run: bool) -> CheckpointSummary {
        CheckpointSummary {
            id: WorkflowId::new(id).unwrap(),
            status: RunStatus::Suspended,
            processed: 12,
            failed: 1,
            skipped: 3,
            dry_run,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 3, 1, 23, 45, 0).unwrap(),
        }
    }

    #[test]
    fn test_listing_shows_both_timestamps() {
        let text = render_summaries(&[summary("inbox", false), summary("trial", true)], &Utc);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("WORKFLOW"));
        assert!(lines[0].ends_with("CREATED           UPDATED"));
        assert!(lines[1].starts_with("inbox "));
        assert!(lines[1].ends_with("2024-03-01 08:30  2024-03-01 23:45"));
        assert!(lines[2].starts_with("trial (dry) "));
    }

    #[test]
    fn test_timestamps_follow_the_display_zone() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 3, 1, 23, 45, 0).unwrap();
        assert_eq!(timestamp(&late, &tokyo), "2024-03-02 08:45");
        assert_eq!(render_summaries(&[], &tokyo), "No workflows.\n");
    }

    #[test]
    fn test_run_report_line() {
        let report = RunReport {
            id: WorkflowId::new("inbox").unwrap(),
            status: RunStatus::Suspended,
            dry_run: true,
            processed_now: 3,
            moved_now: 2,
            processed_total: 7,
            failed_total: 1,
            skipped_total: 4,
        };
        assert_eq!(
            render_run_report(&report),
            "inbox: suspended (dry run) | this run: 3 processed, 2 moved | total: 7 processed, 1 failed, 4 skipped\n"
        );
    }
}
