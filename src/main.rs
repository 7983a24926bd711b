mod batch;
mod cgpa;
mod config;
mod context;
mod db;
mod error;
mod file_store;
mod linker;
mod pages;
mod parser;
mod result_file;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::error;

use config::Config;
use context::Context;
use parser::{ParseOptions, ParseSummary};

#[derive(Parser)]
#[command(name = "uni_result", about = "University result tabulation parser")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Parse one result document (page dump path or URL)
    Parse {
        input: String,
        /// 1-based page to start from
        #[arg(long, default_value = "1")]
        start_page: usize,
        /// Oldest admission year to accept (default: SESSION_START)
        #[arg(long)]
        session_start: Option<u32>,
    },
    /// Parse every document of a JSON list of {title, link}
    Batch {
        list: PathBuf,
        /// Index of the first document to parse
        #[arg(long, default_value = "0")]
        from_index: usize,
        /// Continue after a failing document instead of halting
        #[arg(long)]
        keep_going: bool,
        #[arg(long)]
        session_start: Option<u32>,
    },
    /// Show entity counts
    Stats,
    /// Students with the top grade in every subject
    HallOfFame {
        #[arg(short, long)]
        semester: Option<u32>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let result = match cli.command {
        Commands::Init => {
            let ctx = Context::open(config)?;
            println!("Schema ready at {}", ctx.config.db_path.display());
            Ok(())
        }
        Commands::Parse {
            input,
            start_page,
            session_start,
        } => {
            let ctx = Context::open(config)?;
            let options = ParseOptions {
                start_page,
                session_start: session_start.unwrap_or(ctx.config.session_start),
            };
            // A failed document is reported, not propagated.
            let outcome = match pages::load(&input).await {
                Ok(pages) => parser::parse_document(&ctx, pages, options).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(summary) => print_summary(&summary),
                Err(e) => {
                    error!(input = %input, "Failed to parse document: {}", e);
                    println!("Failed: {}", e);
                }
            }
            Ok(())
        }
        Commands::Batch {
            list,
            from_index,
            keep_going,
            session_start,
        } => {
            let ctx = Context::open(config)?;
            let docs = batch::read_list(&list)?;
            if from_index >= docs.len() {
                println!("Nothing to do: list has {} documents, starting at {}.", docs.len(), from_index);
                return Ok(());
            }
            println!("Parsing {} documents from index {}...", docs.len() - from_index, from_index);
            let options = ParseOptions {
                start_page: 1,
                session_start: session_start.unwrap_or(ctx.config.session_start),
            };
            let outcome = batch::run(&ctx, &docs, from_index, keep_going, options).await?;
            println!("Done: {} parsed, {} failed.", outcome.processed, outcome.failed);
            print_summary(&outcome.totals);
            if let Some(index) = outcome.halted_at {
                println!(
                    "Halted at index {} ({}). Fix it and rerun with --from-index {}.",
                    index,
                    truncate(&docs[index].title, 60),
                    index
                );
            }
            Ok(())
        }
        Commands::Stats => {
            let ctx = Context::open(config)?;
            let s = db::get_stats(&ctx.conn)?;
            println!("Universities: {}", s.universities);
            println!("Batches:      {}", s.batches);
            println!("Degrees:      {}", s.degrees);
            println!("Colleges:     {}", s.colleges);
            println!("Subjects:     {}", s.subjects);
            println!("Result files: {}", s.result_files);
            println!("Hall of fame: {}", s.hall_of_fame);
            Ok(())
        }
        Commands::HallOfFame { semester, limit } => {
            let ctx = Context::open(config)?;
            let rows = db::fetch_hall_of_fame(&ctx.conn, semester, limit)?;
            if rows.is_empty() {
                println!("No hall of fame entries.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<12} | {:<24} | {:>5} | {:>3} | {:<32} | {:<6}",
                "#", "Roll No", "Name", "Batch", "Sem", "College", "Code"
            );
            println!("{}", "-".repeat(101));
            for (i, r) in rows.iter().enumerate() {
                println!(
                    "{:>3} | {:<12} | {:<24} | {:>5} | {:>3} | {:<32} | {:<6}",
                    i + 1,
                    r.roll_num,
                    truncate(&r.name, 24),
                    r.batch,
                    r.semester,
                    truncate(&r.college_name, 32),
                    r.college_id
                );
            }
            println!("\n{} entries", rows.len());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_summary(s: &ParseSummary) {
    println!(
        "Visited {} pages: {} subject lists linked ({} skipped), {} students, {} files written, {} hall of fame.",
        s.pages, s.linkages, s.skipped_subject_lists, s.students, s.files_written, s.hall_of_fame,
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
