use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use qbank::{FsStorage, Store, Subject};
use serde::Serialize;
use tracing::instrument;

use super::terminal::Colorize;

/// Command arguments for `qbank list`.
#[derive(Debug, Default, Parser)]
#[command(about = "List subjects with their question counts")]
pub struct List {
    /// Subject codes to include (all if omitted).
    subjects: Vec<String>,

    /// Output format (default: table).
    #[arg(long, value_enum, default_value_t)]
    output: OutputFormat,

    /// Suppress headers and format rows for scripting.
    #[arg(long)]
    quiet: bool,
}

/// Supported output formats.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Row<'a> {
    code: &'a str,
    name: &'a str,
    topics: usize,
    questions: usize,
    unprocessed_images: usize,
}

impl<'a> From<&'a Subject> for Row<'a> {
    fn from(subject: &'a Subject) -> Self {
        Self {
            code: &subject.code,
            name: &subject.data.name,
            topics: subject.data.topics.len(),
            questions: subject.questions.len(),
            unprocessed_images: subject.unprocessed_images.len(),
        }
    }
}

impl List {
    #[instrument(level = "debug", skip_all)]
    pub fn run(self, root: PathBuf) -> anyhow::Result<()> {
        let store = Store::open(FsStorage, root);
        let listing = store.list_subjects()?;

        let rows: Vec<Row> = listing
            .items
            .iter()
            .filter(|subject| self.subjects.is_empty() || self.subjects.contains(&subject.code))
            .map(Row::from)
            .collect();

        match self.output {
            OutputFormat::Table => render_table(&rows, self.quiet),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        }

        if !self.quiet {
            for skipped in &listing.skipped {
                eprintln!(
                    "{}",
                    format!("⚠️  Skipped {}: {}", skipped.path.display(), skipped.reason)
                        .warning()
                );
            }
        }
        Ok(())
    }
}

fn render_table(rows: &[Row], quiet: bool) {
    let data: Vec<[String; 5]> = rows
        .iter()
        .map(|row| {
            [
                row.code.to_string(),
                row.name.to_string(),
                row.topics.to_string(),
                row.questions.to_string(),
                row.unprocessed_images.to_string(),
            ]
        })
        .collect();

    if quiet {
        for row in data {
            println!("{}", row.join("\t"));
        }
        return;
    }

    if data.is_empty() {
        println!("{}", "No subjects found".dim());
        return;
    }

    let headers = ["Code", "Name", "Topics", "Questions", "Unprocessed"];

    // Determine column widths for alignment.
    let widths = headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            data.iter()
                .map(|row| row[idx].chars().count())
                .max()
                .unwrap_or(0)
                .max(header.len())
        })
        .collect::<Vec<_>>();

    for (header, width) in headers.iter().zip(&widths) {
        print!("{header:<width$}  ");
    }
    println!();

    for width in &widths {
        print!("{:-<width$}  ", "");
    }
    println!();

    for row in data {
        for (value, width) in row.iter().zip(&widths) {
            print!("{value:<width$}  ");
        }
        println!();
    }
}
