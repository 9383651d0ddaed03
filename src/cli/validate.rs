use std::path::PathBuf;

use clap::Parser;
use qbank::{
    FsStorage,
    storage::{Issue, validate},
};
use tracing::instrument;

use super::terminal::Colorize;

#[derive(Debug, Parser)]
#[command(about = "Check the bank for structural problems")]
pub struct Validate {
    /// Output format
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    output: OutputFormat,

    /// Suppress all output except errors
    #[arg(long, short)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Table,
    Json,
    Summary,
}

impl Validate {
    #[instrument(level = "debug", skip(self))]
    pub fn run(self, root: PathBuf) -> anyhow::Result<()> {
        let issues = validate(&FsStorage, &root)?;

        match self.output {
            OutputFormat::Table => self.output_table(&issues),
            OutputFormat::Json => output_json(&issues)?,
            OutputFormat::Summary => self.output_summary(&issues),
        }

        // Exit with appropriate code
        if !issues.is_empty() {
            std::process::exit(2);
        }

        Ok(())
    }

    fn output_table(&self, issues: &[Issue]) {
        if self.quiet {
            return;
        }

        println!("Validating question bank...\n");

        if issues.is_empty() {
            println!("{}", "✓ No issues found".success());
            return;
        }

        for issue in issues {
            println!("{}", format!("✗ {issue}").warning());
        }
        println!();
        self.output_summary(issues);
    }

    fn output_summary(&self, issues: &[Issue]) {
        if self.quiet {
            return;
        }
        if issues.is_empty() {
            println!("{}", "✓ Healthy".success());
        } else {
            println!(
                "{}",
                format!("⚠️  {} issue(s) found", issues.len()).warning()
            );
        }
    }
}

fn output_json(issues: &[Issue]) -> anyhow::Result<()> {
    use serde_json::json;

    let output = json!({
        "status": if issues.is_empty() { "healthy" } else { "issues_found" },
        "issues": issues,
        "summary": {
            "total_issues": issues.len(),
        }
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
