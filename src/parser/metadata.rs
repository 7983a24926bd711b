use std::sync::LazyLock;

use regex::Regex;
use tracing::{error, warn};

use crate::error::{Error, Result, SkipReason, Step};
use crate::pages::Page;

static PROGRAMME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:Prg\.|Programme) Code:\s*(\d{3})\s+Programme(?: Name)?\s*:\s*(.+?)\s+SchemeID:")
        .unwrap()
});
static SEMESTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Sem\./(?:Year|Annual):\s*(.+?)\s+(?:SEMESTER|ANNUAL)").unwrap()
});
static INSTITUTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Institution Code:\s*'?(\d{3})'?\s+Institution:\s+(.+)").unwrap()
});
static BATCH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Batch:\s(\d{4})").unwrap());
static OPEN_PAREN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const SEMESTER_WORDS: &[(&str, u32)] = &[
    ("first", 1),
    ("second", 2),
    ("third", 3),
    ("fourth", 4),
    ("fifth", 5),
    ("sixth", 6),
    ("seventh", 7),
    ("eighth", 8),
    ("ninth", 9),
    ("tenth", 10),
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Shift {
    Morning,
    Evening,
}

impl Shift {
    pub fn code(self) -> &'static str {
        match self {
            Shift::Morning => "M",
            Shift::Evening => "E",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "M" => Some(Shift::Morning),
            "E" => Some(Shift::Evening),
            _ => None,
        }
    }
}

impl std::fmt::Display for Shift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shift::Morning => f.write_str("morning"),
            Shift::Evening => f.write_str("evening"),
        }
    }
}

/// Header block of a scheme-of-examination page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamMetadata {
    pub degree_code: String,
    pub degree_name: String,
    pub semester: u32,
    /// `None` while the next page is still part of the subject list.
    pub batch: Option<u32>,
    pub college_code: String,
    pub college_name: String,
    pub shift: Shift,
}

impl ExamMetadata {
    /// Pages belonging to the same subject list agree on these fields.
    pub fn same_listing(&self, other: &ExamMetadata) -> bool {
        self.degree_code == other.degree_code
            && self.college_code == other.college_code
            && self.semester == other.semester
            && self.shift == other.shift
    }
}

/// Parse the metadata of a subject-list page. `lookahead` is the following
/// page (unconsumed) and supplies the admission batch year.
pub fn extract(
    text: &str,
    lookahead: Option<&Page>,
    page: usize,
    session_start: u32,
) -> Result<Step<ExamMetadata>> {
    let batch = lookahead_batch(lookahead, page)?;
    if let Some(year) = batch {
        if year < session_start {
            warn!(page, batch = year, session_start, "Stale session, skipping subject list");
            return Ok(Step::SkipAndResync(SkipReason::StaleSession {
                batch: year,
                floor: session_start,
            }));
        }
    }

    let missing = || {
        error!(page, "Failed to parse exam metadata");
        Error::Metadata {
            page,
            raw: text.to_string(),
        }
    };
    let (degree_code, degree_name) = programme(text).ok_or_else(missing)?;
    let semester_token = semester_token(text).ok_or_else(missing)?;
    let (college_code, raw_college_name) = institution(text).ok_or_else(missing)?;

    let semester = semester_number(&semester_token).ok_or_else(|| {
        error!(page, token = %semester_token, "Invalid semester");
        Error::UnknownSemester {
            page,
            token: semester_token.clone(),
        }
    })?;

    let (college_name, shift) = detect_shift(&raw_college_name);

    Ok(Step::Continue(ExamMetadata {
        degree_code,
        degree_name,
        semester,
        batch,
        college_code,
        college_name,
        shift,
    }))
}

pub fn programme(text: &str) -> Option<(String, String)> {
    let caps = PROGRAMME_RE.captures(text)?;
    Some((caps[1].trim().to_string(), caps[2].trim().to_string()))
}

pub fn semester_token(text: &str) -> Option<String> {
    SEMESTER_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
}

pub fn institution(text: &str) -> Option<(String, String)> {
    let caps = INSTITUTION_RE.captures(text)?;
    Some((caps[1].trim().to_string(), caps[2].trim().to_string()))
}

pub fn batch_year(text: &str) -> Option<u32> {
    BATCH_RE.captures(text).and_then(|caps| caps[1].parse().ok())
}

/// Numeric or spelled-out ordinal ("Third", "three") semester token.
pub fn semester_number(token: &str) -> Option<u32> {
    let token = token.trim();
    if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
        return token.parse().ok();
    }
    let lower = token.to_lowercase();
    SEMESTER_WORDS
        .iter()
        .find(|(word, _)| *word == lower)
        .map(|(_, n)| *n)
}

fn lookahead_batch(lookahead: Option<&Page>, page: usize) -> Result<Option<u32>> {
    match lookahead {
        None => Ok(None),
        Some(next) if next.is_subject_list() => Ok(None),
        Some(next) => batch_year(&next.text)
            .map(Some)
            .ok_or(Error::MissingBatch { page: page + 1 }),
    }
}

/// Space before every '(' and collapse whitespace runs.
pub fn normalize_spacing(text: &str) -> String {
    let spaced = OPEN_PAREN_RE.replace_all(text, " (");
    SPACES_RE.replace_all(&spaced, " ").into_owned()
}

/// Evening-shift reports print the institution name with stray internal
/// spacing; the canonical name is the normalized one. This is a heuristic
/// on the report layout, not an explicit field.
pub fn detect_shift(raw_name: &str) -> (String, Shift) {
    let normalized = normalize_spacing(raw_name);
    let shift = if normalized != raw_name {
        Shift::Evening
    } else {
        Shift::Morning
    };
    (normalized, shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "GURU GOBIND SINGH INDRAPRASTHA UNIVERSITY\n\
        SCHEME OF EXAMINATIONS\n\
        Programme Code: 027 Programme Name: BACHELOR OF TECHNOLOGY (COMPUTER SCIENCE AND ENGINEERING) SchemeID: 200270152001 Sem./Year: THIRD SEMESTER\n\
        Institution Code: 148 Institution: BHARATI VIDYAPEETH'S COLLEGE OF ENGINEERING\n";

    fn result_page(batch: &str) -> Page {
        Page {
            text: format!("RESULT TABULATION SHEET\nBatch: {}\n", batch),
            table: Vec::new(),
        }
    }

    fn subject_page() -> Page {
        Page {
            text: HEADER.to_string(),
            table: Vec::new(),
        }
    }

    #[test]
    fn field_patterns() {
        assert_eq!(
            programme(HEADER),
            Some((
                "027".to_string(),
                "BACHELOR OF TECHNOLOGY (COMPUTER SCIENCE AND ENGINEERING)".to_string()
            ))
        );
        assert_eq!(semester_token(HEADER).as_deref(), Some("THIRD"));
        assert_eq!(
            institution(HEADER),
            Some((
                "148".to_string(),
                "BHARATI VIDYAPEETH'S COLLEGE OF ENGINEERING".to_string()
            ))
        );
        assert_eq!(batch_year("Exam: DEC 2022 Batch: 2021 Examination"), Some(2021));
    }

    #[test]
    fn semester_tokens() {
        assert_eq!(semester_number("03"), Some(3));
        assert_eq!(semester_number("Fifth"), Some(5));
        assert_eq!(semester_number("eight"), Some(8));
        assert_eq!(semester_number("twelfth"), None);
    }

    #[test]
    fn extracts_metadata_with_batch_from_lookahead() {
        let next = result_page("2021");
        let Step::Continue(meta) = extract(HEADER, Some(&next), 1, 2020).unwrap() else {
            panic!("expected metadata");
        };
        assert_eq!(meta.degree_code, "027");
        assert_eq!(meta.semester, 3);
        assert_eq!(meta.batch, Some(2021));
        assert_eq!(meta.college_code, "148");
        assert_eq!(meta.shift, Shift::Morning);
    }

    #[test]
    fn subject_list_lookahead_defers_batch() {
        let next = subject_page();
        let Step::Continue(meta) = extract(HEADER, Some(&next), 1, 2020).unwrap() else {
            panic!("expected metadata");
        };
        assert_eq!(meta.batch, None);
    }

    #[test]
    fn stale_batch_requests_resync() {
        let next = result_page("2018");
        let step = extract(HEADER, Some(&next), 4, 2020).unwrap();
        assert_eq!(
            step,
            Step::SkipAndResync(SkipReason::StaleSession {
                batch: 2018,
                floor: 2020
            })
        );
    }

    #[test]
    fn missing_metadata_line_is_fatal() {
        let next = result_page("2021");
        let err = extract("SCHEME OF EXAMINATIONS\nnothing here", Some(&next), 2, 2020);
        assert!(matches!(err, Err(Error::Metadata { page: 2, .. })));
    }

    #[test]
    fn unknown_semester_is_fatal() {
        let text = HEADER.replace("THIRD", "UMPTEENTH");
        let next = result_page("2021");
        assert!(matches!(
            extract(&text, Some(&next), 1, 2020),
            Err(Error::UnknownSemester { .. })
        ));
    }

    #[test]
    fn lookahead_without_batch_is_fatal() {
        let next = Page {
            text: "RESULT TABULATION SHEET".to_string(),
            table: Vec::new(),
        };
        assert!(matches!(
            extract(HEADER, Some(&next), 1, 2020),
            Err(Error::MissingBatch { page: 2 })
        ));
    }

    #[test]
    fn extra_spacing_marks_evening_shift() {
        let (name, shift) = detect_shift("BHARATI VIDYAPEETH'S  COLLEGE OF ENGINEERING");
        assert_eq!(name, "BHARATI VIDYAPEETH'S COLLEGE OF ENGINEERING");
        assert_eq!(shift, Shift::Evening);

        let (name, shift) = detect_shift("MAHARAJA AGRASEN INSTITUTE OF TECHNOLOGY (MAIT)");
        assert_eq!(name, "MAHARAJA AGRASEN INSTITUTE OF TECHNOLOGY (MAIT)");
        assert_eq!(shift, Shift::Morning);
    }
}
