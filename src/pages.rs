use serde::{Deserialize, Deserializer};
use tracing::info;

use crate::error::{Error, Result};

/// Marker printed at the top of every scheme-of-examination page.
const SUBJECT_LIST_MARKER: &str = "SCHEME OF EXAMINATIONS";

/// One page of an extracted document: plain text plus its row/column table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Page {
    pub text: String,
    #[serde(default, deserialize_with = "nullable_table")]
    pub table: Vec<Vec<String>>,
}

impl Page {
    pub fn is_subject_list(&self) -> bool {
        is_subject_list(&self.text)
    }
}

pub fn is_subject_list(text: &str) -> bool {
    text.contains(SUBJECT_LIST_MARKER)
}

// Extraction dumps use null for blank cells and for pages without a table.
fn nullable_table<'de, D>(de: D) -> std::result::Result<Vec<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Vec<Option<String>>>> = Option::deserialize(de)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|row| row.into_iter().map(Option::unwrap_or_default).collect())
        .collect())
}

/// Sequential reader over a document's pages with one page of lookahead.
pub struct PageCursor {
    pages: Vec<Page>,
    next: usize,
}

impl PageCursor {
    /// `start_page` is 1-based; pages before it are never returned.
    pub fn new(pages: Vec<Page>, start_page: usize) -> Self {
        let next = start_page.saturating_sub(1).min(pages.len());
        Self { pages, next }
    }

    /// The page `advance` would return next, without consuming it.
    pub fn peek(&self) -> Option<&Page> {
        self.pages.get(self.next)
    }

    pub fn advance(&mut self) -> Option<Page> {
        let page = self.pages.get(self.next).cloned()?;
        self.next += 1;
        Some(page)
    }

    /// 1-based number of the page most recently returned by `advance`.
    pub fn page_number(&self) -> usize {
        self.next
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Skip forward until the next unread page is a subject list. Returns
    /// false when the document runs out first.
    pub fn skip_to_subject_list(&mut self) -> bool {
        while let Some(page) = self.peek() {
            if page.is_subject_list() {
                return true;
            }
            self.next += 1;
        }
        false
    }
}

/// Load a page dump from a local path or an http(s) URL.
pub async fn load(input: &str) -> Result<Vec<Page>> {
    let bytes = if input.starts_with("http://") || input.starts_with("https://") {
        let url = reqwest::Url::parse(input).map_err(|_| Error::InvalidInput {
            input: input.to_string(),
        })?;
        info!("Downloading page dump: {}", url);
        reqwest::get(url).await?.error_for_status()?.bytes().await?.to_vec()
    } else {
        if !std::path::Path::new(input).is_file() {
            return Err(Error::InvalidInput {
                input: input.to_string(),
            });
        }
        tokio::fs::read(input).await?
    };

    let pages: Vec<Page> = serde_json::from_slice(&bytes)?;
    if pages.len() <= 1 {
        return Err(Error::NotEnoughPages {
            input: input.to_string(),
            pages: pages.len(),
        });
    }
    Ok(pages)
}
