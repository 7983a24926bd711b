//! The per-(degree, semester) result CSV.
//!
//! First commit uploads a fresh file into the degree's folder and records
//! its id; later commits download the stored file, append the new rows
//! (outer join on columns), rerank the whole file and overwrite it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::cgpa::{aggregate, dense_rank};
use crate::db::{self, Batch, Degree, University};
use crate::error::{Error, Result};
use crate::file_store::FileStore;
use crate::parser::students::StudentResultRow;

static MARK_CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\[\s*(\d+)\s*,\s*(\d+)\s*,\s*['"]?([A-Z]\+?)['"]?\s*\]$"#).unwrap());

pub const SUBJECT_PREFIX: &str = "sub_";
const LEADING_COLUMNS: [&str; 3] = ["roll_num", "name", "college_id"];
const TRAILING_COLUMNS: [&str; 4] = ["total_marks_scored", "max_marks_possible", "cgpa", "rank"];
const CGPA_COLUMN: &str = "cgpa";
const RANK_COLUMN: &str = "rank";

/// `[internal, external, grade]` cell of a subject column.
pub fn mark_cell(internal: u32, external: u32, grade: &str) -> String {
    format!("[{}, {}, '{}']", internal, external, grade)
}

/// Accepts the grade quoted or bare.
pub fn parse_mark_cell(cell: &str) -> Option<(u32, u32, String)> {
    let caps = MARK_CELL_RE.captures(cell.trim())?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].to_string()))
}

pub fn file_name(semester: u32) -> String {
    format!("{:02}.csv", semester)
}

/// Local mirror of a degree folder: `<results>/<university>/<year>/<degree>`.
pub fn staging_dir(results_dir: &Path, university: &University, batch: &Batch, degree: &Degree) -> PathBuf {
    results_dir
        .join(university.name.replace('/', "-"))
        .join(batch.year.to_string())
        .join(degree.folder_name().replace('/', "-"))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSheet {
    pub headers: Vec<String>,
    /// Each row has exactly one cell per header.
    pub rows: Vec<Vec<String>>,
}

impl ResultSheet {
    /// Sheet for freshly parsed rows; CGPA is computed against `credits`
    /// (the active subject list), rank over these rows only.
    pub fn from_students(students: &[StudentResultRow], credits: &HashMap<String, u32>) -> Self {
        let mut subject_columns: Vec<String> = Vec::new();
        for student in students {
            for score in &student.scores {
                let column = format!("{}{}", SUBJECT_PREFIX, score.subject_id);
                if !subject_columns.contains(&column) {
                    subject_columns.push(column);
                }
            }
        }

        let headers: Vec<String> = LEADING_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(subject_columns.iter().cloned())
            .chain(TRAILING_COLUMNS.iter().map(|c| c.to_string()))
            .collect();

        let rows = students
            .iter()
            .map(|student| {
                let agg = aggregate(student, credits);
                let mut row = vec![
                    student.roll_num.clone(),
                    student.name.clone(),
                    student.college_id.clone(),
                ];
                for column in &subject_columns {
                    let cell = student
                        .scores
                        .iter()
                        .find(|s| format!("{}{}", SUBJECT_PREFIX, s.subject_id) == *column)
                        .map(|s| mark_cell(s.internal, s.external, &s.grade))
                        .unwrap_or_default();
                    row.push(cell);
                }
                row.push(agg.total_marks_scored.to_string());
                row.push(agg.max_marks_possible.to_string());
                row.push(agg.cgpa.map(|c| format!("{:.2}", c)).unwrap_or_default());
                row.push(String::new());
                row
            })
            .collect();

        let mut sheet = Self { headers, rows };
        sheet.rerank();
        sheet
    }

    pub fn read(bytes: &[u8]) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(bytes);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row: Vec<String> = record.iter().map(str::to_string).collect();
            if row.len() != headers.len() {
                return Err(Error::ResultFile(format!(
                    "row {} has {} cells, header has {}",
                    rows.len() + 1,
                    row.len(),
                    headers.len()
                )));
            }
            for (header, cell) in headers.iter().zip(&row) {
                if header.starts_with(SUBJECT_PREFIX) && !cell.is_empty() && parse_mark_cell(cell).is_none() {
                    return Err(Error::ResultFile(format!("bad mark cell {:?} in {}", cell, header)));
                }
            }
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| Error::ResultFile(format!("flush failed: {}", e)))
    }

    /// Append `other`'s rows after ours. Columns missing on either side are
    /// filled blank; columns new in `other` go after the existing ones.
    pub fn merge(mut self, other: ResultSheet) -> Self {
        for header in &other.headers {
            if !self.headers.contains(header) {
                self.headers.push(header.clone());
                for row in &mut self.rows {
                    row.push(String::new());
                }
            }
        }
        for row in other.rows {
            let mut aligned = vec![String::new(); self.headers.len()];
            for (header, cell) in other.headers.iter().zip(row) {
                if let Some(idx) = self.headers.iter().position(|h| h == header) {
                    aligned[idx] = cell;
                }
            }
            self.rows.push(aligned);
        }
        self
    }

    /// Dense rank by CGPA over every row; adds the rank column if missing.
    pub fn rerank(&mut self) {
        let Some(cgpa_idx) = self.column(CGPA_COLUMN) else {
            return;
        };
        let rank_idx = match self.column(RANK_COLUMN) {
            Some(idx) => idx,
            None => {
                self.headers.push(RANK_COLUMN.to_string());
                for row in &mut self.rows {
                    row.push(String::new());
                }
                self.headers.len() - 1
            }
        };
        let cgpas: Vec<Option<f64>> = self
            .rows
            .iter()
            .map(|row| row[cgpa_idx].trim().parse().ok())
            .collect();
        for (row, rank) in self.rows.iter_mut().zip(dense_rank(&cgpas)) {
            row[rank_idx] = rank.map(|r| r.to_string()).unwrap_or_default();
        }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Write `sheet` to the degree's result file for `semester`. Runs inside
/// the caller's transaction: an error here must abort it.
pub async fn commit(
    conn: &Connection,
    store: &dyn FileStore,
    staging_dir: &Path,
    degree: &Degree,
    semester: u32,
    sheet: ResultSheet,
) -> Result<String> {
    tokio::fs::create_dir_all(staging_dir).await?;
    let path = staging_dir.join(file_name(semester));

    match db::sem_result_file(conn, degree.id, semester)? {
        None => {
            let rows = sheet.len();
            tokio::fs::write(&path, sheet.to_csv()?).await?;
            let file_id = store.upload_file(&path, &degree.folder_id).await?;
            db::set_sem_result_file(conn, degree.id, semester, &file_id)?;
            info!(degree = %degree.code, semester, rows, file = %file_id, "Uploaded result file");
            Ok(file_id)
        }
        Some(file_id) => {
            let existing = ResultSheet::read(&store.read_file(&file_id).await?)?;
            debug!(file = %file_id, existing = existing.len(), new = sheet.len(), "Merging result file");
            let mut merged = existing.merge(sheet);
            merged.rerank();
            tokio::fs::write(&path, merged.to_csv()?).await?;
            store.update_file(&file_id, &path).await?;
            info!(degree = %degree.code, semester, rows = merged.len(), file = %file_id, "Updated result file");
            Ok(file_id)
        }
    }
}
