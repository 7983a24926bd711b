use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::parser::metadata::Shift;
use crate::parser::subjects::SubjectDef;

/// Upper bound on how long a commit waits for the database lock.
const BUSY_TIMEOUT_MS: u32 = 120_000;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn connect_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout={};",
        BUSY_TIMEOUT_MS
    ))?;
    Ok(())
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS universities (
            id          INTEGER PRIMARY KEY,
            name        TEXT UNIQUE NOT NULL,
            short_name  TEXT NOT NULL,
            folder_id   TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS batches (
            id            INTEGER PRIMARY KEY,
            university_id INTEGER NOT NULL REFERENCES universities(id),
            year          INTEGER NOT NULL,
            folder_id     TEXT NOT NULL,
            UNIQUE(university_id, year)
        );

        CREATE TABLE IF NOT EXISTS degrees (
            id          INTEGER PRIMARY KEY,
            batch_id    INTEGER NOT NULL REFERENCES batches(id),
            code        TEXT NOT NULL,
            name        TEXT NOT NULL,
            branch      TEXT NOT NULL DEFAULT '',
            batch_year  INTEGER NOT NULL,
            folder_id   TEXT NOT NULL,
            UNIQUE(batch_id, code)
        );

        CREATE TABLE IF NOT EXISTS colleges (
            id          INTEGER PRIMARY KEY,
            degree_id   INTEGER NOT NULL REFERENCES degrees(id),
            name        TEXT NOT NULL,
            UNIQUE(degree_id, name)
        );

        CREATE TABLE IF NOT EXISTS college_shifts (
            college_id    INTEGER NOT NULL REFERENCES colleges(id),
            shift         TEXT NOT NULL CHECK(shift IN ('M','E')),
            college_code  TEXT NOT NULL,
            UNIQUE(college_id, shift)
        );

        CREATE TABLE IF NOT EXISTS college_semesters (
            college_id  INTEGER NOT NULL REFERENCES colleges(id),
            semester    INTEGER NOT NULL,
            UNIQUE(college_id, semester)
        );

        CREATE TABLE IF NOT EXISTS subjects (
            id              INTEGER PRIMARY KEY,
            university_id   INTEGER NOT NULL REFERENCES universities(id),
            subject_id      TEXT NOT NULL,
            code            TEXT NOT NULL,
            name            TEXT NOT NULL,
            credit          INTEGER NOT NULL,
            internal_marks  INTEGER NOT NULL,
            external_marks  INTEGER NOT NULL,
            passing_marks   INTEGER NOT NULL,
            max_marks       INTEGER NOT NULL,
            UNIQUE(university_id, subject_id)
        );

        CREATE TABLE IF NOT EXISTS degree_subjects (
            degree_id   INTEGER NOT NULL REFERENCES degrees(id),
            subject_id  TEXT NOT NULL,
            subject_ref INTEGER NOT NULL REFERENCES subjects(id),
            UNIQUE(degree_id, subject_id)
        );

        CREATE TABLE IF NOT EXISTS sem_results (
            degree_id   INTEGER NOT NULL REFERENCES degrees(id),
            semester    INTEGER NOT NULL,
            file_id     TEXT NOT NULL,
            UNIQUE(degree_id, semester)
        );

        CREATE TABLE IF NOT EXISTS hall_of_fame (
            id              INTEGER PRIMARY KEY,
            roll_num        TEXT NOT NULL,
            name            TEXT NOT NULL,
            university_name TEXT NOT NULL,
            batch           INTEGER NOT NULL,
            college_name    TEXT NOT NULL,
            college_id      TEXT NOT NULL,
            semester        INTEGER NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_hof_semester ON hall_of_fame(semester);
        ",
    )?;
    Ok(())
}

// ── Typed references ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniversityId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DegreeId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollegeRef(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubjectRef(pub i64);

// ── Records ──

#[derive(Debug, Clone, PartialEq)]
pub struct University {
    pub id: UniversityId,
    pub name: String,
    pub short_name: String,
    pub folder_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: BatchId,
    pub university_id: UniversityId,
    pub year: u32,
    pub folder_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Degree {
    pub id: DegreeId,
    pub batch_id: BatchId,
    pub code: String,
    pub name: String,
    pub branch: String,
    pub batch_year: u32,
    pub folder_id: String,
}

impl Degree {
    pub fn folder_name(&self) -> String {
        degree_folder_name(&self.code, &self.name, &self.branch)
    }
}

pub fn degree_folder_name(code: &str, name: &str, branch: &str) -> String {
    if branch.is_empty() {
        format!("{} - {}", code, name)
    } else {
        format!("{} - {} ({})", code, name, branch)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct College {
    pub id: CollegeRef,
    pub degree_id: DegreeId,
    pub name: String,
    /// Shift → college code printed on that shift's reports.
    pub shifts: BTreeMap<Shift, String>,
    pub semesters: BTreeSet<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HallOfFameEntry {
    pub roll_num: String,
    pub name: String,
    pub university_name: String,
    pub batch: u32,
    pub college_name: String,
    pub college_id: String,
    pub semester: u32,
}

// ── Universities ──

pub fn find_university(conn: &Connection, name: &str) -> Result<Option<University>> {
    let row = conn
        .query_row(
            "SELECT id, name, short_name, folder_id FROM universities WHERE name = ?1",
            params![name],
            |row| {
                Ok(University {
                    id: UniversityId(row.get(0)?),
                    name: row.get(1)?,
                    short_name: row.get(2)?,
                    folder_id: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn insert_university(conn: &Connection, name: &str, short_name: &str, folder_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO universities (name, short_name, folder_id) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO NOTHING",
        params![name, short_name, folder_id],
    )?;
    Ok(())
}

// ── Batches ──

pub fn find_batch(conn: &Connection, university: UniversityId, year: u32) -> Result<Option<Batch>> {
    let row = conn
        .query_row(
            "SELECT id, university_id, year, folder_id FROM batches
             WHERE university_id = ?1 AND year = ?2",
            params![university.0, year],
            |row| {
                Ok(Batch {
                    id: BatchId(row.get(0)?),
                    university_id: UniversityId(row.get(1)?),
                    year: row.get(2)?,
                    folder_id: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn insert_batch(conn: &Connection, university: UniversityId, year: u32, folder_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO batches (university_id, year, folder_id) VALUES (?1, ?2, ?3)
         ON CONFLICT(university_id, year) DO NOTHING",
        params![university.0, year, folder_id],
    )?;
    Ok(())
}

// ── Degrees ──

const DEGREE_COLUMNS: &str = "id, batch_id, code, name, branch, batch_year, folder_id";

fn degree_from_row(row: &rusqlite::Row) -> rusqlite::Result<Degree> {
    Ok(Degree {
        id: DegreeId(row.get(0)?),
        batch_id: BatchId(row.get(1)?),
        code: row.get(2)?,
        name: row.get(3)?,
        branch: row.get(4)?,
        batch_year: row.get(5)?,
        folder_id: row.get(6)?,
    })
}

pub fn find_degree(conn: &Connection, batch: BatchId, code: &str) -> Result<Option<Degree>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM degrees WHERE batch_id = ?1 AND code = ?2", DEGREE_COLUMNS),
            params![batch.0, code],
            degree_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Follow a degree reference; a dangling one is a consistency error.
pub fn load_degree(conn: &Connection, id: DegreeId) -> Result<Degree> {
    conn.query_row(
        &format!("SELECT {} FROM degrees WHERE id = ?1", DEGREE_COLUMNS),
        params![id.0],
        degree_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::Consistency(format!("degree {} does not resolve", id.0)))
}

pub struct NewDegree<'a> {
    pub batch: &'a Batch,
    pub code: &'a str,
    pub name: &'a str,
    pub branch: &'a str,
    pub folder_id: &'a str,
}

pub fn insert_degree(conn: &Connection, degree: &NewDegree) -> Result<()> {
    conn.execute(
        "INSERT INTO degrees (batch_id, code, name, branch, batch_year, folder_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(batch_id, code) DO NOTHING",
        params![
            degree.batch.id.0,
            degree.code,
            degree.name,
            degree.branch,
            degree.batch.year,
            degree.folder_id,
        ],
    )?;
    Ok(())
}

// ── Colleges ──

pub fn find_college(conn: &Connection, degree: DegreeId, name: &str) -> Result<Option<CollegeRef>> {
    let id = conn
        .query_row(
            "SELECT id FROM colleges WHERE degree_id = ?1 AND name = ?2",
            params![degree.0, name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.map(CollegeRef))
}

pub fn insert_college(conn: &Connection, degree: DegreeId, name: &str) -> Result<CollegeRef> {
    conn.execute(
        "INSERT INTO colleges (degree_id, name) VALUES (?1, ?2)",
        params![degree.0, name],
    )?;
    Ok(CollegeRef(conn.last_insert_rowid()))
}

/// Returns true when the shift was not recorded before.
pub fn add_college_shift(conn: &Connection, college: CollegeRef, shift: Shift, code: &str) -> Result<bool> {
    let n = conn.execute(
        "INSERT INTO college_shifts (college_id, shift, college_code) VALUES (?1, ?2, ?3)
         ON CONFLICT(college_id, shift) DO NOTHING",
        params![college.0, shift.code(), code],
    )?;
    Ok(n > 0)
}

pub fn add_college_semester(conn: &Connection, college: CollegeRef, semester: u32) -> Result<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO college_semesters (college_id, semester) VALUES (?1, ?2)",
        params![college.0, semester],
    )?;
    Ok(n > 0)
}

pub fn load_college(conn: &Connection, id: CollegeRef) -> Result<College> {
    let (degree_id, name): (i64, String) = conn
        .query_row(
            "SELECT degree_id, name FROM colleges WHERE id = ?1",
            params![id.0],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| Error::Consistency(format!("college {} does not resolve", id.0)))?;

    let mut stmt = conn.prepare("SELECT shift, college_code FROM college_shifts WHERE college_id = ?1")?;
    let mut shifts = BTreeMap::new();
    for row in stmt.query_map(params![id.0], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))? {
        let (shift, code) = row?;
        let shift = Shift::from_code(&shift)
            .ok_or_else(|| Error::Consistency(format!("college {} has unknown shift '{}'", id.0, shift)))?;
        shifts.insert(shift, code);
    }

    let mut stmt = conn.prepare("SELECT semester FROM college_semesters WHERE college_id = ?1")?;
    let semesters = stmt
        .query_map(params![id.0], |row| row.get(0))?
        .collect::<Result<BTreeSet<u32>, _>>()?;

    Ok(College {
        id,
        degree_id: DegreeId(degree_id),
        name,
        shifts,
        semesters,
    })
}

// ── Subjects ──

/// Insert-only upsert keyed on (university, subject id).
pub fn upsert_subject(conn: &Connection, university: UniversityId, subject: &SubjectDef) -> Result<(SubjectRef, bool)> {
    let inserted = conn.execute(
        "INSERT INTO subjects
         (university_id, subject_id, code, name, credit, internal_marks, external_marks, passing_marks, max_marks)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(university_id, subject_id) DO NOTHING",
        params![
            university.0,
            subject.id,
            subject.code,
            subject.name,
            subject.credit,
            subject.internal_marks,
            subject.external_marks,
            subject.passing_marks,
            subject.max_marks,
        ],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM subjects WHERE university_id = ?1 AND subject_id = ?2",
        params![university.0, subject.id],
        |row| row.get(0),
    )?;
    Ok((SubjectRef(id), inserted > 0))
}

pub fn degree_subject_ids(conn: &Connection, degree: DegreeId) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT subject_id FROM degree_subjects WHERE degree_id = ?1")?;
    let ids = stmt
        .query_map(params![degree.0], |row| row.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(ids)
}

pub fn insert_degree_subjects(conn: &Connection, degree: DegreeId, subjects: &[(String, SubjectRef)]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO degree_subjects (degree_id, subject_id, subject_ref) VALUES (?1, ?2, ?3)",
    )?;
    let mut count = 0;
    for (subject_id, subject_ref) in subjects {
        count += stmt.execute(params![degree.0, subject_id, subject_ref.0])?;
    }
    Ok(count)
}

// ── Result files ──

pub fn sem_result_file(conn: &Connection, degree: DegreeId, semester: u32) -> Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT file_id FROM sem_results WHERE degree_id = ?1 AND semester = ?2",
            params![degree.0, semester],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn set_sem_result_file(conn: &Connection, degree: DegreeId, semester: u32, file_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO sem_results (degree_id, semester, file_id) VALUES (?1, ?2, ?3)
         ON CONFLICT(degree_id, semester) DO UPDATE SET file_id = excluded.file_id",
        params![degree.0, semester, file_id],
    )?;
    Ok(())
}

// ── Hall of fame ──

pub fn insert_hall_of_fame(conn: &Connection, entry: &HallOfFameEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO hall_of_fame
         (roll_num, name, university_name, batch, college_name, college_id, semester)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.roll_num,
            entry.name,
            entry.university_name,
            entry.batch,
            entry.college_name,
            entry.college_id,
            entry.semester,
        ],
    )?;
    Ok(())
}

fn hall_of_fame_from_row(row: &rusqlite::Row) -> rusqlite::Result<HallOfFameEntry> {
    Ok(HallOfFameEntry {
        roll_num: row.get(0)?,
        name: row.get(1)?,
        university_name: row.get(2)?,
        batch: row.get(3)?,
        college_name: row.get(4)?,
        college_id: row.get(5)?,
        semester: row.get(6)?,
    })
}

pub fn fetch_hall_of_fame(conn: &Connection, semester: Option<u32>, limit: usize) -> Result<Vec<HallOfFameEntry>> {
    let sql = format!(
        "SELECT roll_num, name, university_name, batch, college_name, college_id, semester
         FROM hall_of_fame{}
         ORDER BY batch DESC, semester, roll_num
         LIMIT {}",
        if semester.is_some() { " WHERE semester = ?1" } else { "" },
        limit
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = match semester {
        Some(s) => stmt.query_map(params![s], hall_of_fame_from_row)?.collect::<Result<Vec<_>, _>>()?,
        None => stmt.query_map([], hall_of_fame_from_row)?.collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub universities: usize,
    pub batches: usize,
    pub degrees: usize,
    pub colleges: usize,
    pub subjects: usize,
    pub result_files: usize,
    pub hall_of_fame: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |table: &str| -> Result<usize> {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?)
    };
    Ok(Stats {
        universities: count("universities")?,
        batches: count("batches")?,
        degrees: count("degrees")?,
        colleges: count("colleges")?,
        subjects: count("subjects")?,
        result_files: count("sem_results")?,
        hall_of_fame: count("hall_of_fame")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = connect_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn subject(id: &str, credit: u32) -> SubjectDef {
        SubjectDef {
            id: id.to_string(),
            code: format!("ES-{}", id),
            name: "Applied Physics".to_string(),
            credit,
            internal_marks: 25,
            external_marks: 75,
            max_marks: 100,
            passing_marks: 40,
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = setup();
        init_schema(&conn).unwrap();
        assert_eq!(get_stats(&conn).unwrap().universities, 0);
    }

    #[test]
    fn subject_upsert_keeps_first_definition() {
        let conn = setup();
        insert_university(&conn, "Uni", "U", "f").unwrap();
        let uni = find_university(&conn, "Uni").unwrap().unwrap();

        let (first, created) = upsert_subject(&conn, uni.id, &subject("101", 4)).unwrap();
        assert!(created);
        let (second, created) = upsert_subject(&conn, uni.id, &subject("101", 3)).unwrap();
        assert!(!created);
        assert_eq!(first, second);
        let credit: u32 = conn
            .query_row("SELECT credit FROM subjects WHERE id = ?1", params![first.0], |r| r.get(0))
            .unwrap();
        assert_eq!(credit, 4);
        assert_eq!(get_stats(&conn).unwrap().subjects, 1);
    }

    #[test]
    fn dangling_degree_is_a_consistency_error() {
        let conn = setup();
        assert!(matches!(load_degree(&conn, DegreeId(42)), Err(Error::Consistency(_))));
    }

    #[test]
    fn hall_of_fame_filters_by_semester() {
        let conn = setup();
        for semester in [1, 2, 2] {
            insert_hall_of_fame(
                &conn,
                &HallOfFameEntry {
                    roll_num: format!("00{}", semester),
                    name: "A".to_string(),
                    university_name: "Uni".to_string(),
                    batch: 2021,
                    college_name: "College".to_string(),
                    college_id: "148".to_string(),
                    semester,
                },
            )
            .unwrap();
        }
        assert_eq!(fetch_hall_of_fame(&conn, Some(2), 10).unwrap().len(), 2);
        assert_eq!(fetch_hall_of_fame(&conn, None, 10).unwrap().len(), 3);
        assert_eq!(fetch_hall_of_fame(&conn, None, 1).unwrap().len(), 1);
    }
}
