use serde::Serialize;
use std::path::Path;

use crate::result::{RunReport, RunSummary, SpResult};
use crate::signature::SignatureOutcome;

#[derive(Serialize)]
struct JsonReport<'a> {
    output_dir: String,
    signature: &'a SignatureOutcome,
    results: &'a [SpResult],
    summary: &'a RunSummary,
}

pub fn print(report: &RunReport, summary: &RunSummary, output_dir: &Path) {
    let json = JsonReport {
        output_dir: output_dir.display().to_string(),
        signature: &report.signature,
        results: &report.results,
        summary,
    };
    match serde_json::to_string_pretty(&json) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize JSON: {}", e),
    }
}
