use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, error};

use super::subjects::{clean_subject_code, parse_marks, standardize_subject_code};
use crate::error::{Error, Result};

static STUDENT_DETAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^(\d+)\s+(.+?)\s+SID:").unwrap());
static GRADE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\s*\(([ABCFPO]\+?)\)").unwrap());
static CREDIT_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((\d+)\)").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

pub const TOP_GRADE: &str = "O";
const FAIL_GRADE: &str = "F";

/// Column of the roll-number cell in the first row of a student triplet.
const DETAIL_COLUMN: usize = 1;
/// First subject column; each subject spans two columns.
const FIRST_SUBJECT_COLUMN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectScore {
    pub subject_id: String,
    pub internal: u32,
    pub external: u32,
    pub grade: String,
}

impl SubjectScore {
    pub fn marks(&self) -> u32 {
        self.internal.saturating_add(self.external)
    }
}

/// One student's marks for the active subject list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentResultRow {
    pub roll_num: String,
    pub name: String,
    pub college_id: String,
    /// In table order.
    pub scores: Vec<SubjectScore>,
}

impl StudentResultRow {
    /// Every grade is the top grade (and there is at least one).
    pub fn is_top_scorer(&self) -> bool {
        !self.scores.is_empty() && self.scores.iter().all(|s| s.grade == TOP_GRADE)
    }
}

/// Walk a result table three rows per student until the roll-number cell
/// runs empty. `code_map` resolves non-numeric subject tokens
/// (standardized code → subject id).
pub fn parse_page(
    table: &[Vec<String>],
    code_map: &HashMap<String, String>,
    college_id: &str,
    page: usize,
) -> Result<Vec<StudentResultRow>> {
    let mut students = Vec::new();
    let mut idx = 1;
    while idx < table.len() && !cell(&table[idx], DETAIL_COLUMN).trim().is_empty() {
        let (Some(marks_row), Some(grade_row)) = (table.get(idx + 1), table.get(idx + 2)) else {
            return Err(Error::TruncatedRecord { page, row: idx });
        };
        let student = parse_student(&table[idx], marks_row, grade_row, code_map, college_id, page)?;
        students.push(student);
        idx += 3;
    }
    debug!(page, count = students.len(), "Parsed result page");
    Ok(students)
}

fn parse_student(
    detail_row: &[String],
    marks_row: &[String],
    grade_row: &[String],
    code_map: &HashMap<String, String>,
    college_id: &str,
    page: usize,
) -> Result<StudentResultRow> {
    let (roll_num, name) = student_detail(cell(detail_row, DETAIL_COLUMN)).ok_or_else(|| {
        error!(page, raw = cell(detail_row, DETAIL_COLUMN), "Cannot parse student detail");
        Error::StudentDetail {
            page,
            raw: cell(detail_row, DETAIL_COLUMN).to_string(),
        }
    })?;

    let mut scores = Vec::new();
    let mut col = FIRST_SUBJECT_COLUMN;
    while col < detail_row.len() {
        // The result maker sometimes leaves an optional slot blank.
        if cell(detail_row, col).trim().is_empty() {
            col += 2;
            continue;
        }

        let subject_id = resolve_subject(cell(detail_row, col), code_map, page)?;
        let grade = grade(cell(grade_row, col)).unwrap_or_else(|| FAIL_GRADE.to_string());
        scores.push(SubjectScore {
            subject_id,
            internal: parse_marks(cell(marks_row, col)),
            external: parse_marks(cell(marks_row, col + 1)),
            grade,
        });
        col += 2;
    }

    Ok(StudentResultRow {
        roll_num,
        name,
        college_id: college_id.to_string(),
        scores,
    })
}

/// Roll number and name from a `"<roll> <name> SID: ..."` cell.
pub fn student_detail(raw: &str) -> Option<(String, String)> {
    let caps = STUDENT_DETAIL_RE.captures(raw)?;
    let roll = caps[1].trim().to_string();
    let name = caps[2].replace('\n', " ").trim().to_string();
    Some((roll, name))
}

/// Grade letter in parentheses after the total marks, e.g. `87 (A+)`.
pub fn grade(raw: &str) -> Option<String> {
    GRADE_RE
        .captures(raw.trim())
        .map(|caps| caps[1].trim().to_string())
}

/// Subject token of a result cell: whitespace collapsed, the trailing
/// `(credit)` dropped, remaining spaces removed.
pub fn subject_token(raw: &str) -> String {
    let collapsed = SPACES_RE.replace_all(raw, " ");
    let collapsed = collapsed.trim();
    let head = match CREDIT_SUFFIX_RE.find(collapsed) {
        Some(m) => &collapsed[..m.start()],
        None => collapsed,
    };
    head.replace(' ', "")
}

fn resolve_subject(raw: &str, code_map: &HashMap<String, String>, page: usize) -> Result<String> {
    let token = subject_token(raw);
    if token.is_empty() {
        return Err(Error::UnresolvedSubject {
            page,
            token: raw.to_string(),
        });
    }
    if token.chars().all(|c| c.is_ascii_digit()) {
        return Ok(token);
    }

    let key = clean_subject_code(&token)
        .map(|code| standardize_subject_code(&code))
        .unwrap_or_else(|| token.clone());
    code_map.get(&key).cloned().ok_or_else(|| {
        error!(page, code = %key, known = code_map.len(), "Subject code not in active subject list");
        Error::UnresolvedSubject { page, token: key }
    })
}

fn cell(row: &[String], col: usize) -> &str {
    row.get(col).map(String::as_str).unwrap_or("")
}
