use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Error, Result, SkipReason, Step};

static PAPER_ID_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^paper\s*id").unwrap());
static SUBJECT_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[A-Z][A-Z.\-/()&]+\s*\d+").unwrap());
static CREDIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{1,2})$").unwrap());
static CODE_SEPARATORS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\-]+").unwrap());
static PREFIX_DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]+)(\d+)$").unwrap());

/// One row of a scheme-of-examination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectDef {
    pub id: String,
    pub code: String,
    pub name: String,
    pub credit: u32,
    pub internal_marks: u32,
    pub external_marks: u32,
    pub max_marks: u32,
    pub passing_marks: u32,
}

/// Parse every data row of a subject-list table. A row without credit
/// digits means the table is not a complete subject list; the caller
/// resynchronizes on the next subject-list page.
pub fn parse_table(table: &[Vec<String>], page: usize) -> Result<Step<Vec<SubjectDef>>> {
    let Some(header) = table.first() else {
        return Ok(Step::SkipAndResync(SkipReason::EmptySubjectTable { page }));
    };

    // Some layouts carry an extra blank leading column.
    let offset = match header.first() {
        Some(cell) if PAPER_ID_HEADER_RE.is_match(&cell.trim().to_lowercase()) => 0,
        _ => 1,
    };

    let mut subjects = Vec::with_capacity(table.len().saturating_sub(1));
    for row in &table[1..] {
        match parse_row(row, offset, page)? {
            Some(subject) => subjects.push(subject),
            None => {
                warn!(page, ?row, "Subject credit is empty, skipping this subject list");
                return Ok(Step::SkipAndResync(SkipReason::IncompleteSubjectTable { page }));
            }
        }
    }
    debug!(page, count = subjects.len(), "Parsed subject table");
    Ok(Step::Continue(subjects))
}

fn parse_row(row: &[String], offset: usize, page: usize) -> Result<Option<SubjectDef>> {
    if row.len() < offset + 4 {
        return Ok(None);
    }
    let Some(credit) = CREDIT_RE
        .captures(row[offset + 3].trim_end())
        .and_then(|caps| caps[1].parse().ok())
    else {
        return Ok(None);
    };

    let id = row[offset].trim().to_string();
    let name = row[offset + 2].trim().to_string();
    let code = clean_subject_code(row[offset + 1].trim()).unwrap_or_default();
    if id.is_empty() || code.is_empty() || name.is_empty() {
        return Err(Error::SubjectRow {
            page,
            row: row.to_vec(),
        });
    }

    let n = row.len();
    Ok(Some(SubjectDef {
        id,
        code,
        name,
        credit,
        internal_marks: parse_marks(&row[n - 4]),
        external_marks: parse_marks(&row[n - 3]),
        max_marks: parse_marks(&row[n - 2]),
        passing_marks: parse_marks(&row[n - 1]),
    }))
}

/// Non-numeric cells count as zero.
pub fn parse_marks(cell: &str) -> u32 {
    let cell = cell.trim();
    if !cell.is_empty() && cell.chars().all(|c| c.is_ascii_digit()) {
        cell.parse().unwrap_or(0)
    } else {
        0
    }
}

/// Recover a subject code such as `ES-201` or `BS.(MA)101` from a cell that
/// may have line breaks inside words.
pub fn clean_subject_code(raw: &str) -> Option<String> {
    let joined = join_broken_words(raw);
    SUBJECT_CODE_RE
        .find(&joined)
        .map(|m| m.as_str().chars().filter(|c| !c.is_whitespace()).collect())
}

/// Canonical lookup key for a subject code: separators dropped, and a pure
/// letters+digits code rendered as `PREFIX-digits`.
pub fn standardize_subject_code(code: &str) -> String {
    let cleaned = CODE_SEPARATORS_RE.replace_all(code.trim(), "");
    match PREFIX_DIGITS_RE.captures(&cleaned) {
        Some(caps) => format!("{}-{}", caps[1].to_uppercase(), &caps[2]),
        None => code.to_string(),
    }
}

// Drop whitespace runs that sit between two word characters.
fn join_broken_words(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            let start = i;
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            let before = start > 0 && is_word(chars[start - 1]);
            let after = i < chars.len() && is_word(chars[i]);
            if !(before && after) {
                out.extend(&chars[start..i]);
            }
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn header() -> Vec<String> {
        row(&["Paper ID", "Paper Code", "Subject Name", "Credits", "Type", "Int", "Ext", "Max", "Pass"])
    }

    #[test]
    fn parses_rows_with_header_at_column_zero() {
        let table = vec![
            header(),
            row(&["99201", "ES-201", "Computational Methods", "4", "T", "25", "75", "100", "40"]),
            row(&["99203", "BS-\n203", "Probability", "3", "T", "25", "75", "100", "40"]),
        ];
        let Step::Continue(subjects) = parse_table(&table, 1).unwrap() else {
            panic!("expected subjects");
        };
        assert_eq!(subjects.len(), 2);
        assert_eq!(subjects[0].id, "99201");
        assert_eq!(subjects[0].code, "ES-201");
        assert_eq!(subjects[0].credit, 4);
        assert_eq!(subjects[0].internal_marks, 25);
        assert_eq!(subjects[0].external_marks, 75);
        assert_eq!(subjects[0].max_marks, 100);
        assert_eq!(subjects[0].passing_marks, 40);
        assert_eq!(subjects[1].code, "BS-203");
    }

    #[test]
    fn tolerates_leading_blank_column() {
        let table = vec![
            row(&["", "Paper ID", "Paper Code", "Subject Name", "Credits", "Int", "Ext", "Max", "Pass"]),
            row(&["", "99201", "ES 201", "Computational Methods", "Credit\n4", "25", "75", "100", "40"]),
        ];
        let Step::Continue(subjects) = parse_table(&table, 1).unwrap() else {
            panic!("expected subjects");
        };
        assert_eq!(subjects[0].id, "99201");
        assert_eq!(subjects[0].code, "ES201");
        assert_eq!(subjects[0].credit, 4);
    }

    #[test]
    fn missing_credit_skips_the_list() {
        let table = vec![
            header(),
            row(&["99201", "ES-201", "Computational Methods", "", "T", "25", "75", "100", "40"]),
        ];
        assert_eq!(
            parse_table(&table, 7).unwrap(),
            Step::SkipAndResync(SkipReason::IncompleteSubjectTable { page: 7 })
        );
    }

    #[test]
    fn blank_name_is_fatal() {
        let table = vec![
            header(),
            row(&["99201", "ES-201", "  ", "4", "T", "25", "75", "100", "40"]),
        ];
        assert!(matches!(parse_table(&table, 2), Err(Error::SubjectRow { page: 2, .. })));
    }

    #[test]
    fn empty_table_skips() {
        assert_eq!(
            parse_table(&[], 3).unwrap(),
            Step::SkipAndResync(SkipReason::EmptySubjectTable { page: 3 })
        );
    }

    #[test]
    fn code_cleaning() {
        assert_eq!(clean_subject_code("AV\nV-201").as_deref(), Some("AVV-201"));
        assert_eq!(clean_subject_code("HS-20\n1").as_deref(), Some("HS-201"));
        assert_eq!(clean_subject_code("BS.(MA) 101").as_deref(), Some("BS.(MA)101"));
        assert_eq!(clean_subject_code("12345"), None);
    }

    #[test]
    fn standardized_codes() {
        assert_eq!(standardize_subject_code("es201"), "ES-201");
        assert_eq!(standardize_subject_code("ES - 201"), "ES-201");
        assert_eq!(standardize_subject_code("BS.(MA)101"), "BS.(MA)101");
    }

    #[test]
    fn marks_default_to_zero() {
        assert_eq!(parse_marks(" 25 "), 25);
        assert_eq!(parse_marks("A"), 0);
        assert_eq!(parse_marks(""), 0);
    }
}
