//! Terminal rendering for the `validate` and `import` commands.

use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use courtflow_core::model::ImportSummary;
use courtflow_parser::{FileValidationReport, StructuralIssue};

pub fn structural_table(report: &FileValidationReport) -> Table {
    let mut table = new_table(&["Severity", "Kind", "Line", "Message", "Suggestion"]);
    let rows = report
        .errors
        .iter()
        .map(|issue| ("error", issue))
        .chain(report.warnings.iter().map(|issue| ("warning", issue)));
    for (severity, issue) in rows {
        table.add_row(issue_row(severity, issue));
    }
    table
}

fn issue_row(severity: &str, issue: &StructuralIssue) -> Vec<String> {
    vec![
        severity.to_string(),
        serde_json::to_value(issue.kind)
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default(),
        issue.line.map(|line| line.to_string()).unwrap_or_default(),
        issue.message.clone(),
        issue.suggestion.clone(),
    ]
}

pub fn summary_table(summary: &ImportSummary) -> Table {
    let mut table = new_table(&["Metric", "Value"]);
    if let Some(batch_id) = summary.batch_id {
        table.add_row(vec!["Batch".to_string(), batch_id.to_string()]);
    }
    table.add_row(vec!["Status".to_string(), summary.status.to_string()]);
    table.add_row(vec!["Dry run".to_string(), summary.dry_run.to_string()]);
    table.add_row(vec![
        "Total rows".to_string(),
        summary.total_records.to_string(),
    ]);
    table.add_row(vec![
        "Imported".to_string(),
        summary.successful_records.to_string(),
    ]);
    table.add_row(vec![
        "Failed".to_string(),
        summary.failed_records.to_string(),
    ]);
    for (error_type, count) in &summary.errors_by_type {
        table.add_row(vec![format!("  {error_type}"), count.to_string()]);
    }
    if let Some(reason) = &summary.abort_reason {
        table.add_row(vec!["Aborted".to_string(), reason.clone()]);
    }
    table
}

pub fn row_errors_table(summary: &ImportSummary) -> Table {
    let mut table = new_table(&["Row", "Field", "Type", "Severity", "Message", "Suggestion"]);
    for detail in &summary.errors {
        table.add_row(vec![
            detail.row_number.to_string(),
            detail.field.clone().unwrap_or_default(),
            detail.error_type.to_string(),
            detail.severity.to_string(),
            detail.message.clone(),
            detail.suggestion.clone(),
        ]);
    }
    table
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    table
}
