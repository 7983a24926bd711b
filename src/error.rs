//! Error types shared by the parser, the entity linker and the result store.
//!
//! Parsing steps distinguish three outcomes. [`Step::Continue`] carries the
//! parsed value, [`Step::SkipAndResync`] tells the driver to drop whatever it
//! was accumulating and jump to the next subject-list page, and `Err(Error)`
//! aborts the current document.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    // ── Document errors ──────────────────────────────────────────────────
    #[error("document '{input}' has not enough pages to contain results ({pages} found)")]
    NotEnoughPages { input: String, pages: usize },

    #[error("invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    #[error("document does not contain any subject list page")]
    NoSubjectList,

    // ── Parse errors (fatal for the current document) ────────────────────
    #[error("page {page}: exam metadata line not found, raw text: {raw:?}")]
    Metadata { page: usize, raw: String },

    #[error("page {page}: unrecognized semester token '{token}'")]
    UnknownSemester { page: usize, token: String },

    #[error("page {page}: lookahead page carries no 'Batch:' marker")]
    MissingBatch { page: usize },

    #[error("page {page}: subject row has an empty id, code or name: {row:?}")]
    SubjectRow { page: usize, row: Vec<String> },

    #[error("page {page}: subject '{token}' is not part of the active subject list")]
    UnresolvedSubject { page: usize, token: String },

    #[error("page {page}: cannot read student detail from {raw:?}")]
    StudentDetail { page: usize, raw: String },

    #[error("page {page}: student record starting at row {row} is missing its mark rows")]
    TruncatedRecord { page: usize, row: usize },

    #[error("page {page}: result rows found but no subject list is linked")]
    NoActiveLinkage { page: usize },

    // ── Store errors ─────────────────────────────────────────────────────
    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("file store: {0}")]
    FileStore(String),

    #[error("malformed result file: {0}")]
    ResultFile(String),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Outcome of a parsing step that did not fail outright.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<T> {
    Continue(T),
    SkipAndResync(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Batch year is older than the configured session floor.
    StaleSession { batch: u32, floor: u32 },
    /// A subject row without trailing credit digits; the table is not a
    /// complete subject list.
    IncompleteSubjectTable { page: usize },
    /// The page was classified as a subject list but carries no table.
    EmptySubjectTable { page: usize },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::StaleSession { batch, floor } => {
                write!(f, "batch year {} is older than session start {}", batch, floor)
            }
            SkipReason::IncompleteSubjectTable { page } => {
                write!(f, "page {}: subject row without credit, table incomplete", page)
            }
            SkipReason::EmptySubjectTable { page } => {
                write!(f, "page {}: subject list page has no table", page)
            }
        }
    }
}
