pub mod json;
pub mod terminal;

use std::path::Path;

use crate::result::RunReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Terminal,
    Json,
}

pub fn print_report(report: &RunReport, verbose: bool, format: OutputFormat, output_dir: &Path) {
    let summary = report.summary();

    match format {
        OutputFormat::Json => json::print(report, &summary, output_dir),
        OutputFormat::Terminal => terminal::print(report, &summary, verbose, output_dir),
    }
}
