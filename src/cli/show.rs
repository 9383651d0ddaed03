use std::{collections::HashMap, path::PathBuf};

use clap::Parser;
use qbank::{FsStorage, QuestionType, Store, Subject};
use tracing::instrument;

use super::terminal::Colorize;

#[derive(Debug, Parser)]
#[command(about = "Display a subject with its topics and questions")]
pub struct Show {
    /// Code of the subject to display
    subject: String,

    /// Output format
    #[arg(long, value_name = "FORMAT", default_value = "pretty")]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Pretty,
    Json,
}

impl Show {
    #[instrument(level = "debug", skip(self))]
    pub fn run(self, root: PathBuf) -> anyhow::Result<()> {
        let store = Store::open(FsStorage, root);
        let (subject, skipped) = store.load_subject(&self.subject)?;

        match self.output {
            OutputFormat::Pretty => output_pretty(&subject),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&subject)?),
        }

        for skipped in skipped {
            eprintln!(
                "{}",
                format!("⚠️  Skipped {}: {}", skipped.path.display(), skipped.reason).warning()
            );
        }
        Ok(())
    }
}

fn output_pretty(subject: &Subject) {
    println!("{}", format!("# {} ({})", subject.data.name, subject.code).heading());
    if let Some(description) = &subject.data.description {
        println!("{description}");
    }
    println!();

    let mut usage: HashMap<&str, usize> = HashMap::new();
    for question in &subject.questions {
        for topic in &question.data.topics {
            *usage.entry(topic.as_str()).or_default() += 1;
        }
    }

    println!("{}", "Topics".dim());
    if subject.data.topics.is_empty() {
        println!("  (none)");
    }
    for topic in &subject.data.topics {
        let count = usage.get(topic.id.as_str()).copied().unwrap_or_default();
        println!(
            "  • {} {} {}",
            topic.name,
            format!("[{}]", topic.id).dim(),
            format!("{count} question(s)").dim()
        );
    }
    println!();

    println!("{}", format!("Questions ({})", subject.questions.len()).dim());
    for question in &subject.questions {
        let kind = match question.data.question_type {
            QuestionType::Multichoice => "MC",
            QuestionType::Open => "OPEN",
        };
        println!("  {} {kind:<4} {}", question.id, first_line(&question.data.text));

        let topics: Vec<&str> = question
            .data
            .topics
            .iter()
            .map(|id| subject.data.topic(id).map_or(id.as_str(), |t| t.name.as_str()))
            .collect();
        if !topics.is_empty() {
            println!("       {}", topics.join(", ").dim());
        }
        let dangling = question
            .data
            .topics
            .iter()
            .filter(|id| subject.data.topic(id).is_none())
            .count();
        if dangling > 0 {
            println!(
                "       {}",
                format!("{dangling} undefined topic reference(s)").warning()
            );
        }
        if !question.images.is_empty() {
            println!("       {}", question.images.join(", ").dim());
        }
    }

    if !subject.unprocessed_images.is_empty() {
        println!();
        println!(
            "{}",
            format!("Unprocessed images ({})", subject.unprocessed_images.len()).dim()
        );
        for image in &subject.unprocessed_images {
            println!("  {image}");
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
