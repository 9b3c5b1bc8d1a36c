//! Terminal rendering for taxonomies, runs, and compliance reports.
//!
//! Tabular output goes through Arrow's pretty printer so it matches what
//! the DuckDB tables hold.

use arrow::util::pretty::pretty_format_batches;
use greenledger_core::{Alert, Obligation, RequirementId, Taxonomy};
use greenledger_engine::{ComplianceReport, RunRecord};
use greenledger_store::gaps_to_batch;

const MAX_LABEL: usize = 60;

// ── Taxonomy ──

/// Print the requirement tree, one node per line, indented by depth.
pub fn print_tree(taxonomy: &Taxonomy) {
    println!(
        "=== {} (version {}) ===",
        taxonomy.name().unwrap_or("taxonomy"),
        taxonomy.version()
    );
    println!("{} requirements", taxonomy.len());
    println!();
    for root in taxonomy.roots() {
        print_node(taxonomy, root, 0);
    }
}

fn print_node(taxonomy: &Taxonomy, id: &RequirementId, depth: usize) {
    let Some(node) = taxonomy.get(id) else {
        return;
    };
    let indent = "  ".repeat(depth);
    let mut line = format!("{indent}{:<12} {}", node.code, truncate(&node.label));
    if taxonomy.is_leaf(id) {
        let types: Vec<&str> = node
            .required_evidence_types
            .iter()
            .map(|t| t.as_str())
            .collect();
        line.push_str(&format!("  [{}] {}d", types.join(", "), node.validity_days));
        if node.obligation == Obligation::Voluntary {
            line.push_str(" (voluntary)");
        }
    }
    println!("{line}");
    for child in taxonomy.children(id) {
        print_node(taxonomy, child, depth + 1);
    }
}

// ── Runs ──

pub fn print_runs(runs: &[RunRecord]) {
    println!(
        "{:<36}  {:<18}  {:>6}  {:>8}  {:>9}  document",
        "run", "state", "points", "unmapped", "committed"
    );
    for run in runs {
        println!(
            "{:<36}  {:<18}  {:>6}  {:>8}  {:>9}  {}",
            run.id.to_string(),
            run.state.as_str(),
            run.data_points.len(),
            run.unmapped.len(),
            run.committed.len(),
            run.source_document_id,
        );
        if let Some(failure) = &run.failure {
            println!("{:<36}  reason: {failure}", "");
        }
    }
    println!();
}

// ── Compliance ──

pub fn print_report(report: &ComplianceReport) -> anyhow::Result<()> {
    println!(
        "=== Compliance {} (taxonomy v{}) ===",
        report.reporting_period, report.taxonomy_version
    );
    println!(
        "score {:.1}%  ({} of {} in-scope disclosures satisfied)",
        report.score() * 100.0,
        report.satisfied_leaves,
        report.in_scope_leaves
    );
    println!("as of {}", report.computed_at.format("%Y-%m-%d %H:%M UTC"));
    println!();

    if report.gaps.is_empty() {
        println!("no gaps");
        println!();
        return Ok(());
    }
    let batch = gaps_to_batch(&report.gaps)?;
    println!("{}", pretty_format_batches(&[batch])?);
    println!();
    Ok(())
}

pub fn print_alerts(alerts: &[Alert]) {
    if alerts.is_empty() {
        println!("no open alerts");
        return;
    }
    println!("Open alerts ({})", alerts.len());
    for alert in alerts {
        let gap = &alert.gap;
        let days = gap
            .days_until_expiry
            .map(|d| format!(" ({d} days)"))
            .unwrap_or_default();
        println!(
            "  {:<8} {:<12} {}{}  since {}",
            alert.severity.as_str(),
            gap.code,
            gap.reason.as_str(),
            days,
            alert.first_seen_at.format("%Y-%m-%d"),
        );
    }
    println!();
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_LABEL {
        return s.to_string();
    }
    let cut: String = s.chars().take(MAX_LABEL - 1).collect();
    format!("{cut}…")
}
