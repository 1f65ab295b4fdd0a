//! `sqlguard assess` - run the injection corpus and report.

use anyhow::{Context, Result};
use sqlguard_core::{AccessMode, Scope};
use sqlguard_harness::{run_assessment, SecurityReport, PASS_THRESHOLD};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use super::{load_config, mask_password};
use crate::ReportFormat;

/// Run the assessment and print the report. Returns whether the overall score passes.
pub async fn run(
    config_path: Option<&Path>,
    database_url: Option<String>,
    quick: bool,
    format: ReportFormat,
    output: Option<&Path>,
) -> Result<bool> {
    let mut config = load_config(config_path, database_url)?;
    if quick {
        config.harness.scope = Scope::Quick;
    }

    tracing::info!(
        database = %mask_password(&config.upstream.connection_string()),
        scope = %config.harness.scope,
        "Starting security assessment"
    );

    let report = run_assessment(&config)
        .await
        .context("Security assessment failed")?;

    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    if let Some(path) = output {
        fs::write(path, &json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Report written");
    }

    match format {
        ReportFormat::Json => println!("{}", json),
        ReportFormat::Text => print!("{}", render_text(&report)),
    }

    let passed = report.passes(PASS_THRESHOLD);
    if !passed {
        tracing::error!(
            score = report.security_score,
            threshold = PASS_THRESHOLD,
            "Security score below threshold"
        );
    }
    Ok(passed)
}

fn rating(score: f64) -> &'static str {
    if score >= 90.0 {
        "EXCELLENT"
    } else if score >= 70.0 {
        "GOOD"
    } else if score >= 50.0 {
        "NEEDS IMPROVEMENT"
    } else {
        "CRITICAL ISSUES FOUND"
    }
}

/// Human-readable summary of a report.
fn render_text(report: &SecurityReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Security assessment {} ({} scope)", report.run_id, report.scope);
    let _ = writeln!(out, "Corpus version: {}", report.corpus_version);
    let _ = writeln!(
        out,
        "\nOverall security score: {:.1}/100 {}",
        report.security_score,
        rating(report.security_score)
    );

    for summary in &report.summary {
        let severity = &summary.vulnerabilities_by_severity;
        let _ = writeln!(out, "\n{} mode", summary.mode.as_str().to_uppercase());
        let _ = writeln!(out, "  Tests run:    {}", summary.total_tests);
        let _ = writeln!(out, "  Vulnerable:   {}", summary.vulnerable);
        let _ = writeln!(out, "  Protected:    {}", summary.protected);
        let _ = writeln!(out, "  Inconclusive: {}", summary.inconclusive);
        let _ = writeln!(out, "  Score:        {:.1}%", summary.security_score);
        if summary.vulnerable > 0 {
            let _ = writeln!(
                out,
                "  By severity:  critical {}, high {}, medium {}, low {}",
                severity.critical, severity.high, severity.medium, severity.low
            );
        }
        for result in report
            .results
            .iter()
            .filter(|r| r.mode == summary.mode && r.vulnerable)
        {
            let _ = writeln!(out, "    - {} ({})", result.case, result.severity);
        }
    }

    if let Some(restricted) = report.mode(AccessMode::Restricted)
        && restricted.vulnerable == 0
    {
        let _ = writeln!(out, "\nRESTRICTED mode blocked every attack.");
    }

    if !report.recommendations.is_empty() {
        let _ = writeln!(out, "\nRecommendations:");
        for (i, rec) in report.recommendations.iter().enumerate() {
            let _ = writeln!(out, "  {}. [{}] {}", i + 1, rec.priority, rec.issue);
            let _ = writeln!(out, "     {}", rec.solution);
        }
    }
    out
}
