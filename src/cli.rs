use std::{
    fs,
    io::{self, BufRead},
    path::PathBuf,
};

mod init;
mod list;
mod show;
mod terminal;
mod validate;

use anyhow::Context;
use clap::ArgAction;
use dialoguer::Confirm;
use init::Init;
use list::List;
use qbank::{FsStorage, Store, api};
use show::Show;
use terminal::Colorize;
use tracing::instrument;
use validate::Validate;

#[derive(Debug, clap::Parser)]
#[command(version, about)]
pub struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// The path to the root of the question bank
    #[arg(short, long, default_value = ".", global = true)]
    root: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        Self::setup_logging(self.verbose);

        self.command
            .unwrap_or_else(|| Command::List(List::default()))
            .run(self.root)
    }

    fn setup_logging(verbosity: u8) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let level = match verbosity {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        };

        let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

        // stdout carries command output
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

#[derive(Debug, clap::Parser)]
pub enum Command {
    /// Create the bank configuration file
    Init(Init),

    /// List subjects (default)
    List(List),

    /// Show a subject with its topics and questions
    Show(Show),

    /// Write a self-contained export bundle
    Export(Export),

    /// Delete a question
    Delete(Delete),

    /// Manage the topics of a subject
    #[command(subcommand)]
    Topics(Topics),

    /// Check the bank for structural problems
    Validate(Validate),

    /// Run JSON requests read from stdin, one per line, printing one
    /// response per line
    ///
    /// Each request is an object tagged by `action`, for example
    /// `{"action": "loadSubjects"}`.
    Request,
}

impl Command {
    fn run(self, root: PathBuf) -> anyhow::Result<()> {
        match self {
            Self::Init(command) => command.run(&root)?,
            Self::List(command) => command.run(root)?,
            Self::Show(command) => command.run(root)?,
            Self::Export(command) => command.run(root)?,
            Self::Delete(command) => command.run(root)?,
            Self::Topics(command) => command.run(root)?,
            Self::Validate(command) => command.run(root)?,
            Self::Request => run_request(&root)?,
        }
        Ok(())
    }
}

#[derive(Debug, clap::Parser)]
pub struct Export {
    /// Image quality (0-100); defaults to the configured quality
    #[arg(long, short, value_parser = clap::value_parser!(u8).range(0..=100))]
    quality: Option<u8>,

    /// File to write the bundle to (stdout if omitted)
    #[arg(long, short)]
    output: Option<PathBuf>,
}

impl Export {
    #[instrument(level = "debug", skip(self))]
    fn run(self, root: PathBuf) -> anyhow::Result<()> {
        let store = Store::open(FsStorage, root);
        let bundle = store.export(self.quality)?;
        let json = serde_json::to_string_pretty(&bundle)?;

        match self.output {
            Some(path) => {
                fs::write(&path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                let questions: usize = bundle.subjects.iter().map(|s| s.questions.len()).sum();
                eprintln!(
                    "{}",
                    format!(
                        "✅ Exported {} subject(s) and {questions} question(s) to {}",
                        bundle.subjects.len(),
                        path.display()
                    )
                    .success()
                );
            }
            None => println!("{json}"),
        }
        Ok(())
    }
}

#[derive(Debug, clap::Parser)]
pub struct Delete {
    /// Code of the subject the question belongs to
    subject: String,

    /// Id of the question to delete
    question: String,

    /// Skip confirmation prompts
    #[arg(long, short)]
    yes: bool,
}

impl Delete {
    #[instrument(level = "debug", skip(self))]
    fn run(self, root: PathBuf) -> anyhow::Result<()> {
        let store = Store::open(FsStorage, root);

        let question = match store.load_question(&self.subject, &self.question) {
            Ok(question) => question,
            Err(e) if e.kind() == qbank::ErrorKind::NotFound => {
                println!(
                    "{}",
                    format!("Question {}/{} does not exist", self.subject, self.question).dim()
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if !self.yes {
            println!("Will delete {}/{}:", self.subject, self.question);
            println!("  {}", question.data.text);
            if !question.images.is_empty() {
                println!("  {}", format!("and {}", question.images.join(", ")).dim());
            }

            let proceed = Confirm::new()
                .with_prompt("Proceed?")
                .default(false)
                .interact()?;
            if !proceed {
                println!("Cancelled");
                std::process::exit(130);
            }
        }

        store.delete_question(&self.subject, &self.question)?;

        println!(
            "{}",
            format!("✅ Deleted {}/{}", self.subject, self.question).success()
        );
        Ok(())
    }
}

#[derive(Debug, clap::Subcommand)]
pub enum Topics {
    /// Give a topic a fresh id, rewriting every question that references it
    Regenerate {
        /// Code of the subject the topic belongs to
        subject: String,

        /// Current id of the topic
        topic_id: String,
    },
}

impl Topics {
    #[instrument(level = "debug", skip(self))]
    fn run(self, root: PathBuf) -> anyhow::Result<()> {
        match self {
            Self::Regenerate { subject, topic_id } => {
                let store = Store::open(FsStorage, root);
                let new_id = store.regenerate_topic_id(&subject, &topic_id)?;
                println!("{}", format!("{topic_id} → {new_id}").success());
            }
        }
        Ok(())
    }
}

fn run_request(root: &std::path::Path) -> anyhow::Result<()> {
    let service = api::Service::new(root);
    let mut failed = false;

    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read request from stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = service.handle(line.as_bytes());
        failed |= !response.is_success();
        println!("{}", serde_json::to_string(&response)?);
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
