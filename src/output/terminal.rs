use colored::Colorize;
use std::path::Path;

use crate::result::{Action, RunReport, RunSummary, Severity, SpResult};
use crate::signature::SignatureOutcome;

pub fn print(report: &RunReport, summary: &RunSummary, verbose: bool, output_dir: &Path) {
    print_signature(&report.signature);

    println!("\n{}", format!("── Service providers ({}) ──", output_dir.display()).bold());
    for result in &report.results {
        if !verbose && result.action == Action::Unchanged {
            continue;
        }
        print_result(result);
    }

    println!();
    print_summary(summary, report.has_errors());
}

fn print_signature(outcome: &SignatureOutcome) {
    println!("{}", "── Metadata signature ──".bold());
    match outcome {
        SignatureOutcome::Verified => println!("  {} signature verified", "PASS".green().bold()),
        SignatureOutcome::Missing => println!("  {} metadata is not signed", "FAIL".red().bold()),
        SignatureOutcome::Invalid(reason) => {
            println!("  {} signature did not verify", "FAIL".red().bold());
            println!("       {} {}", "→".dimmed(), reason.dimmed());
        }
    }
}

fn print_result(result: &SpResult) {
    let label = format!("{:<9}", result.action.to_string());
    let status = match result.action.severity() {
        Severity::Error => label.red().bold(),
        Severity::Warning => label.yellow().bold(),
        Severity::Info if result.action == Action::Unchanged => label.dimmed(),
        Severity::Info => label.green().bold(),
    };

    let fingerprint = result
        .fingerprint
        .as_deref()
        .map(|f| format!("[{}]", &f[..f.len().min(12)]).dimmed().to_string())
        .unwrap_or_default();
    println!("  {} {} {}", status, result.name, fingerprint);

    if let Some(ref entity_id) = result.entity_id {
        if result.action != Action::Pruned {
            println!("       {} {}", "entityID:".dimmed(), entity_id.dimmed());
        }
    }
    for reason in &result.reasons {
        println!("       {} {}", "→".dimmed(), reason);
    }
    for file in &result.files {
        println!("       {} {}", "deleted".dimmed(), file.dimmed());
    }
}

fn print_summary(summary: &RunSummary, has_errors: bool) {
    let line = format!(
        "Summary: {} created | {} updated | {} unchanged | {} repaired | {} skipped | {} not found | {} pruned",
        summary.created,
        summary.updated,
        summary.unchanged,
        summary.repaired,
        summary.skipped,
        summary.not_found,
        summary.pruned,
    );

    if has_errors {
        println!("{}", line.red().bold());
    } else if summary.not_found > 0 {
        println!("{}", line.yellow().bold());
    } else {
        println!("{}", line.green().bold());
    }
}
