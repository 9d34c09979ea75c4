//! Emit a task message JSON file for `coding-worker --test-message`.
//!
//! ```text
//! inject-task --repo acme/widgets --issue 42 --title "Add CSV export" --output task.json
//! inject-task --json raw.json            # validate and normalize
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use coordination::TaskMessage;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Repository in owner/name form
    #[arg(long, conflicts_with = "json")]
    repo: Option<String>,

    /// Issue number
    #[arg(long, conflicts_with = "json")]
    issue: Option<u64>,

    /// Issue title
    #[arg(long, conflicts_with = "json")]
    title: Option<String>,

    /// Issue body
    #[arg(long, default_value = "", conflicts_with = "json")]
    body: String,

    /// Read an existing task message instead of building one from flags
    #[arg(long)]
    json: Option<PathBuf>,

    /// Write to this file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

fn build_message(args: &Args) -> Result<TaskMessage> {
    if let Some(path) = &args.json {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return TaskMessage::from_json(&text)
            .with_context(|| format!("Invalid task message in {}", path.display()));
    }

    let (Some(repo), Some(issue), Some(title)) = (&args.repo, args.issue, &args.title) else {
        bail!("--repo, --issue and --title are required unless --json is given");
    };
    if !repo.contains('/') {
        bail!("--repo must be in owner/name form, got `{repo}`");
    }
    Ok(TaskMessage::new(repo.as_str(), issue, title.as_str(), args.body.as_str()))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let message = build_message(&args)?;
    let json = message.to_json_pretty()?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "Wrote task for {}#{} to {}",
                message.repository,
                message.issue_number,
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}
