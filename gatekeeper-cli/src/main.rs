use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

use gatekeeper_server::state_machine::{
    RequestRecord, RequestRepository, RequestState, RequesterId, SqliteRepository,
};

/// Gatekeeper: inspect and export join requests
#[derive(Parser, Debug)]
#[command(name = "gatekeeper")]
#[command(about = "Inspect and export gatekeeper join requests", long_about = None)]
struct Cli {
    /// Path to the state database (defaults to $STATE_DIR/gatekeeper-state.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show request counts per state
    Stats,
    /// List requests, optionally only those in one state
    List(ListArgs),
    /// Show every request of one requester with its transitions
    History(HistoryArgs),
    /// Export all requests as CSV
    Export(ExportArgs),
}

#[derive(Parser, Debug)]
struct ListArgs {
    /// in_survey, pending_review, approved, rejected or closed
    #[arg(long)]
    state: Option<RequestState>,
}

#[derive(Parser, Debug)]
struct HistoryArgs {
    /// Telegram user id of the requester
    requester: i64,
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// Write to this file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Render timestamps in this UTC offset
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    utc_offset_hours: i32,
}

fn default_db_path() -> PathBuf {
    std::env::var("STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("gatekeeper-state.db")
}

fn open_repository(path: Option<PathBuf>) -> Result<SqliteRepository> {
    let path = path.unwrap_or_else(default_db_path);
    // Opening would create an empty database; an operator typo should fail instead.
    if !path.exists() {
        bail!("state database {} does not exist", path.display());
    }
    SqliteRepository::new(&path)
        .with_context(|| format!("Failed to open state database {}", path.display()))
}

fn utc_offset(hours: i32) -> Result<FixedOffset> {
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| anyhow!("UTC offset {} is out of range", hours))
}

fn format_time(at: DateTime<Utc>, offset: &FixedOffset) -> String {
    at.with_timezone(offset).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn print_record_line(record: &RequestRecord) {
    println!(
        "{}  {:<14}  {:<24}  answers {}/{}  created {}",
        record.id,
        record.state,
        record.label(),
        record.answers.len(),
        record.questions.len(),
        record.created_at.format("%Y-%m-%d %H:%M UTC")
    );
}

/// Render `records` as CSV with one column per distinct question.
///
/// Records keep their own question snapshot, so question columns are the
/// union across records in first-seen order.
fn render_csv(records: &[RequestRecord], offset: &FixedOffset) -> Result<String> {
    let mut questions: Vec<&str> = Vec::new();
    for record in records {
        for question in &record.questions {
            if !questions.contains(&question.as_str()) {
                questions.push(question);
            }
        }
    }

    let mut header: Vec<String> = [
        "request_id",
        "requester",
        "username",
        "state",
        "created_at",
        "decision",
        "decided_by",
    ]
    .iter()
    .map(|h| h.to_string())
    .collect();
    header.extend(questions.iter().map(|q| q.to_string()));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&header)?;

    for record in records {
        let mut row = vec![
            record.id.to_string(),
            record.requester.to_string(),
            record.profile.username.clone().unwrap_or_default(),
            record.state.to_string(),
            format_time(record.created_at, offset),
            record
                .decision
                .as_ref()
                .map(|d| d.outcome.to_string())
                .unwrap_or_default(),
            record
                .decision
                .as_ref()
                .map(|d| d.decided_by.label())
                .unwrap_or_default(),
        ];
        for question in &questions {
            let answer = record
                .answered()
                .find(|(q, _)| q == question)
                .map(|(_, a)| a.to_string())
                .unwrap_or_default();
            row.push(answer);
        }
        writer.write_record(&row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush CSV: {}", e.error()))?;
    Ok(String::from_utf8(bytes)?)
}

async fn run(cli: Cli) -> Result<()> {
    let repo = open_repository(cli.db)?;

    match cli.command {
        Commands::Stats => {
            let counts = repo.state_counts().await?;
            let total: u64 = counts.values().sum();
            for (state, count) in &counts {
                println!("{:<14} {}", state, count);
            }
            println!("{:<14} {}", "total", total);
        }

        Commands::List(args) => {
            let records = match args.state {
                Some(state) => repo.list_by_state(state).await?,
                None => repo.list_all().await?,
            };
            if records.is_empty() {
                println!("No requests.");
            }
            for record in &records {
                print_record_line(record);
            }
        }

        Commands::History(args) => {
            let records = repo.history(RequesterId(args.requester)).await?;
            if records.is_empty() {
                println!("No requests from {}.", args.requester);
            }
            for record in &records {
                print_record_line(record);
                for (question, answer) in record.answered() {
                    println!("    {}\n      {}", question, answer);
                }
                if let Some(decision) = &record.decision {
                    println!(
                        "    decision: {} by {} at {}{}",
                        decision.outcome,
                        decision.decided_by.label(),
                        decision.decided_at.format("%Y-%m-%d %H:%M UTC"),
                        decision
                            .reason
                            .as_ref()
                            .map(|r| format!(" ({})", r))
                            .unwrap_or_default()
                    );
                }
                for entry in repo.transitions(record.id).await? {
                    println!(
                        "    {} -> {} at {}",
                        entry
                            .from_state
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "(new)".to_string()),
                        entry.to_state,
                        entry.recorded_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
            }
        }

        Commands::Export(args) => {
            let offset = utc_offset(args.utc_offset_hours)?;
            let records = repo.list_all().await?;
            let csv = render_csv(&records, &offset)?;
            match args.output {
                Some(path) => {
                    fs::write(&path, csv)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    eprintln!("Exported {} requests to {}", records.len(), path.display());
                }
                None => print!("{}", csv),
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    run(Cli::parse()).await
}
