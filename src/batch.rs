use std::path::{Path, PathBuf};

use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::context::Context;
use crate::error::Result;
use crate::pages;
use crate::parser::{parse_document, ParseOptions, ParseSummary};

const JOURNAL_FILE: &str = "error_parsing.json";

/// One document of a batch list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub title: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub title: String,
    pub link: String,
    pub error: String,
    pub timestamp: String,
}

/// JSON array of failed documents, enough to rerun from the failing index.
pub struct ErrorJournal {
    path: PathBuf,
}

impl ErrorJournal {
    pub fn new(log_dir: &Path) -> Self {
        Self {
            path: log_dir.join(JOURNAL_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, doc: &DocumentEntry, error: &str) -> Result<()> {
        let mut entries = self.read()?;
        entries.push(JournalEntry {
            title: doc.title.clone(),
            link: doc.link.clone(),
            error: error.to_string(),
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        });
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&entries)?)?;
        Ok(())
    }

    pub fn read(&self) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(&self.path)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

pub fn read_list(path: &Path) -> Result<Vec<DocumentEntry>> {
    Ok(serde_json::from_slice(&std::fs::read(path)?)?)
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub processed: usize,
    pub failed: usize,
    /// Index of the document that stopped the batch.
    pub halted_at: Option<usize>,
    pub totals: ParseSummary,
}

/// Parse `docs[from_index..]` one after another. A failing document is
/// journaled; the batch stops there unless `keep_going` is set.
pub async fn run(
    ctx: &Context,
    docs: &[DocumentEntry],
    from_index: usize,
    keep_going: bool,
    options: ParseOptions,
) -> Result<BatchOutcome> {
    let journal = ErrorJournal::new(&ctx.config.log_dir);
    let todo = docs.get(from_index..).unwrap_or_default();

    let pb = ProgressBar::new(todo.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut outcome = BatchOutcome::default();
    for (offset, doc) in todo.iter().enumerate() {
        let index = from_index + offset;
        pb.set_message(doc.title.clone());

        let result = match pages::load(&doc.link).await {
            Ok(pages) => parse_document(ctx, pages, options).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(summary) => {
                outcome.processed += 1;
                add(&mut outcome.totals, &summary);
            }
            Err(e) => {
                outcome.failed += 1;
                error!(index, title = %doc.title, "Failed to parse document: {}", e);
                journal.append(doc, &e.to_string())?;
                if !keep_going {
                    pb.abandon();
                    outcome.halted_at = Some(index);
                    info!(index, journal = %journal.path().display(), "Batch halted, resume with --from-index {}", index);
                    return Ok(outcome);
                }
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(outcome)
}

fn add(totals: &mut ParseSummary, s: &ParseSummary) {
    totals.pages += s.pages;
    totals.linkages += s.linkages;
    totals.students += s.students;
    totals.files_written += s.files_written;
    totals.hall_of_fame += s.hall_of_fame;
    totals.skipped_subject_lists += s.skipped_subject_lists;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db;
    use crate::file_store::{FileStore, LocalFileStore};
    use tempfile::TempDir;

    const FIXTURE: &str = include_str!("../tests/fixtures/two_page_scheme.json");

    fn context(dir: &TempDir) -> Context {
        let config = Config {
            results_dir: dir.path().join("results"),
            log_dir: dir.path().join("logs"),
            ..Config::default()
        };
        let conn = db::connect_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let store: Box<dyn FileStore> = Box::new(LocalFileStore::new(dir.path().join("remote")));
        Context::with_parts(config, conn, store)
    }

    fn options() -> ParseOptions {
        ParseOptions {
            start_page: 1,
            session_start: 2020,
        }
    }

    fn docs(dir: &TempDir) -> Vec<DocumentEntry> {
        let good = dir.path().join("good.json");
        std::fs::write(&good, FIXTURE).unwrap();
        vec![
            DocumentEntry {
                title: "broken".to_string(),
                link: dir.path().join("missing.json").display().to_string(),
            },
            DocumentEntry {
                title: "good".to_string(),
                link: good.display().to_string(),
            },
        ]
    }

    #[test]
    fn journal_appends_entries() {
        let dir = TempDir::new().unwrap();
        let journal = ErrorJournal::new(&dir.path().join("logs"));
        let doc = DocumentEntry {
            title: "B.Tech Dec 2022".to_string(),
            link: "https://example.org/result.json".to_string(),
        };
        journal.append(&doc, "first").unwrap();
        journal.append(&doc, "second").unwrap();

        let entries = journal.read().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].error, "second");
        assert_eq!(entries[0].link, doc.link);
        assert_eq!(entries[0].timestamp.len(), "2024-01-01 00:00:00".len());
    }

    #[tokio::test]
    async fn halts_on_first_failure() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let outcome = run(&ctx, &docs(&dir), 0, false, options()).await.unwrap();
        assert_eq!(outcome.halted_at, Some(0));
        assert_eq!(outcome.processed, 0);

        let journal = ErrorJournal::new(&ctx.config.log_dir).read().unwrap();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].title, "broken");
    }

    #[tokio::test]
    async fn keep_going_and_resume_index() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let outcome = run(&ctx, &docs(&dir), 0, true, options()).await.unwrap();
        assert_eq!((outcome.processed, outcome.failed, outcome.halted_at), (1, 1, None));
        assert_eq!(outcome.totals.students, 3);

        let resumed = run(&ctx, &docs(&dir), 1, false, options()).await.unwrap();
        assert_eq!((resumed.processed, resumed.failed), (1, 0));
    }
}
