//! Find-or-create for the academic entity graph.
//!
//! University, batch and degree are created as soon as a subject list is
//! linked, each with its own folder in the file store. The college shift
//! and the degree's subject set are only touched from inside the flush
//! transaction, next to the result-file commit.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::db::{self, Batch, CollegeRef, Degree, DegreeId, NewDegree, SubjectRef, University, UniversityId};
use crate::error::{Error, Result};
use crate::file_store::{find_or_create_folder, FileStore};
use crate::parser::metadata::Shift;
use crate::parser::subjects::{standardize_subject_code, SubjectDef};

static DEGREE_BRANCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*\((.+)\)\s*$").unwrap());

/// Credits and code lookup for the subjects seen since the last `take`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubjectRegistry {
    /// Subject id → credit.
    pub credits: HashMap<String, u32>,
    /// Standardized subject code → subject id.
    pub codes: HashMap<String, String>,
}

pub struct EntityLinker<'a> {
    conn: &'a Connection,
    store: &'a dyn FileStore,
    registry: SubjectRegistry,
}

impl<'a> EntityLinker<'a> {
    pub fn new(conn: &'a Connection, store: &'a dyn FileStore) -> Self {
        Self {
            conn,
            store,
            registry: SubjectRegistry::default(),
        }
    }

    pub async fn ensure_university(&self, name: &str) -> Result<University> {
        if let Some(uni) = db::find_university(self.conn, name)? {
            return Ok(uni);
        }
        let folder = find_or_create_folder(self.store, name, self.store.root_folder()).await?;
        let short = short_name(name);
        db::insert_university(self.conn, name, &short, &folder)?;
        info!(name, short_name = %short, "Created university");
        db::find_university(self.conn, name)?
            .ok_or_else(|| Error::Consistency(format!("university '{}' missing after insert", name)))
    }

    pub async fn ensure_batch(&self, university: &University, year: u32) -> Result<Batch> {
        if let Some(batch) = db::find_batch(self.conn, university.id, year)? {
            return Ok(batch);
        }
        let folder = find_or_create_folder(self.store, &year.to_string(), &university.folder_id).await?;
        db::insert_batch(self.conn, university.id, year, &folder)?;
        info!(university = %university.short_name, year, "Created batch");
        db::find_batch(self.conn, university.id, year)?
            .ok_or_else(|| Error::Consistency(format!("batch {} missing after insert", year)))
    }

    pub async fn ensure_degree(&self, batch: &Batch, code: &str, raw_name: &str) -> Result<Degree> {
        if let Some(degree) = db::find_degree(self.conn, batch.id, code)? {
            return Ok(degree);
        }
        let (name, branch) = split_degree_name(raw_name);
        let folder_name = db::degree_folder_name(code, &name, &branch);
        let folder = find_or_create_folder(self.store, &folder_name, &batch.folder_id).await?;
        db::insert_degree(
            self.conn,
            &NewDegree {
                batch,
                code,
                name: &name,
                branch: &branch,
                folder_id: &folder,
            },
        )?;
        info!(code, name = %name, branch = %branch, batch = batch.year, "Created degree");
        db::find_degree(self.conn, batch.id, code)?
            .ok_or_else(|| Error::Consistency(format!("degree {} missing after insert", code)))
    }

    /// Find-or-create a university subject. The credit and code lookup are
    /// recorded either way, since the CGPA of the current list needs them.
    pub fn ensure_subject(&mut self, university: UniversityId, subject: &SubjectDef) -> Result<SubjectRef> {
        let (subject_ref, created) = db::upsert_subject(self.conn, university, subject)?;
        if created {
            debug!(id = %subject.id, code = %subject.code, "Created subject");
        }
        self.registry.credits.insert(subject.id.clone(), subject.credit);
        self.registry
            .codes
            .insert(standardize_subject_code(&subject.code), subject.id.clone());
        Ok(subject_ref)
    }

    pub fn take_registry(&mut self) -> SubjectRegistry {
        std::mem::take(&mut self.registry)
    }
}

/// Add the shift (if absent) and the semester to the named college of a
/// degree, creating the college on first sight. Call inside the flush
/// transaction.
pub fn ensure_college_shift(
    conn: &Connection,
    degree: DegreeId,
    college_name: &str,
    college_code: &str,
    shift: Shift,
    semester: u32,
) -> Result<CollegeRef> {
    // The degree must still resolve before anything hangs off it.
    db::load_degree(conn, degree)?;

    let college = match db::find_college(conn, degree, college_name)? {
        Some(college) => college,
        None => {
            let college = db::insert_college(conn, degree, college_name)?;
            info!(college = college_name, "Created college");
            college
        }
    };
    if db::add_college_shift(conn, college, shift, college_code)? {
        info!(college = college_name, %shift, code = college_code, "Linked college shift");
    }
    db::add_college_semester(conn, college, semester)?;
    Ok(college)
}

/// Link only the subjects the degree does not have yet. Returns how many
/// were added.
pub fn add_subjects_to_degree(conn: &Connection, degree: DegreeId, subjects: &[(String, SubjectRef)]) -> Result<usize> {
    let existing = db::degree_subject_ids(conn, degree)?;
    let missing: Vec<(String, SubjectRef)> = subjects
        .iter()
        .filter(|(id, _)| !existing.contains(id))
        .cloned()
        .collect();
    if missing.is_empty() {
        info!(degree = degree.0, "All subjects already linked to degree");
        return Ok(0);
    }
    let added = db::insert_degree_subjects(conn, degree, &missing)?;
    info!(degree = degree.0, added, "Linked subjects to degree");
    Ok(added)
}

/// Initials of the words of a name: "Guru Gobind Singh" → "GGS".
pub fn short_name(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|w| w.chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}

/// "BACHELOR OF TECHNOLOGY (CSE)" → ("BACHELOR OF TECHNOLOGY", "CSE").
pub fn split_degree_name(raw: &str) -> (String, String) {
    match DEGREE_BRANCH_RE.captures(raw.trim()) {
        Some(caps) => (caps[1].trim().to_string(), caps[2].trim().to_string()),
        None => (raw.trim().to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_store::LocalFileStore;
    use tempfile::TempDir;

    fn setup() -> (Connection, TempDir, LocalFileStore) {
        let conn = db::connect_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path().to_path_buf());
        (conn, dir, store)
    }

    fn subject(id: &str, code: &str, credit: u32) -> SubjectDef {
        SubjectDef {
            id: id.to_string(),
            code: code.to_string(),
            name: "Data Structures".to_string(),
            credit,
            internal_marks: 25,
            external_marks: 75,
            max_marks: 100,
            passing_marks: 40,
        }
    }

    #[test]
    fn names() {
        assert_eq!(short_name("Guru Gobind Singh Indraprastha University"), "GGSIU");
        assert_eq!(
            split_degree_name("BACHELOR OF TECHNOLOGY (COMPUTER SCIENCE AND ENGINEERING)"),
            (
                "BACHELOR OF TECHNOLOGY".to_string(),
                "COMPUTER SCIENCE AND ENGINEERING".to_string()
            )
        );
        assert_eq!(split_degree_name("BACHELOR OF ARTS"), ("BACHELOR OF ARTS".to_string(), String::new()));
    }

    #[tokio::test]
    async fn hierarchy_is_found_on_second_call() {
        let (conn, dir, store) = setup();
        let linker = EntityLinker::new(&conn, &store);

        let uni = linker.ensure_university("Guru Gobind Singh Indraprastha University").await.unwrap();
        let batch = linker.ensure_batch(&uni, 2021).await.unwrap();
        let degree = linker
            .ensure_degree(&batch, "027", "BACHELOR OF TECHNOLOGY (CSE)")
            .await
            .unwrap();

        assert_eq!(linker.ensure_university(&uni.name).await.unwrap(), uni);
        assert_eq!(linker.ensure_batch(&uni, 2021).await.unwrap(), batch);
        assert_eq!(linker.ensure_degree(&batch, "027", "ignored").await.unwrap(), degree);

        assert_eq!(degree.batch_year, 2021);
        assert_eq!(degree.branch, "CSE");
        assert!(dir
            .path()
            .join("Guru Gobind Singh Indraprastha University/2021/027 - BACHELOR OF TECHNOLOGY (CSE)")
            .is_dir());
        let stats = db::get_stats(&conn).unwrap();
        assert_eq!((stats.universities, stats.batches, stats.degrees), (1, 1, 1));
    }

    #[tokio::test]
    async fn ensure_subject_twice_returns_same_ref() {
        let (conn, _dir, store) = setup();
        let mut linker = EntityLinker::new(&conn, &store);
        let uni = linker.ensure_university("Uni").await.unwrap();

        let first = linker.ensure_subject(uni.id, &subject("99201", "ES-201", 4)).unwrap();
        let second = linker.ensure_subject(uni.id, &subject("99201", "ES-201", 4)).unwrap();
        assert_eq!(first, second);
        assert_eq!(db::get_stats(&conn).unwrap().subjects, 1);

        let registry = linker.take_registry();
        assert_eq!(registry.credits.get("99201"), Some(&4));
        assert_eq!(registry.codes.get("ES-201").map(String::as_str), Some("99201"));
        assert!(linker.take_registry().credits.is_empty());
    }

    #[tokio::test]
    async fn college_shift_is_idempotent() {
        let (conn, _dir, store) = setup();
        let linker = EntityLinker::new(&conn, &store);
        let uni = linker.ensure_university("Uni").await.unwrap();
        let batch = linker.ensure_batch(&uni, 2021).await.unwrap();
        let degree = linker.ensure_degree(&batch, "027", "B.TECH (IT)").await.unwrap();

        let a = ensure_college_shift(&conn, degree.id, "BVCOE", "148", Shift::Morning, 3).unwrap();
        let b = ensure_college_shift(&conn, degree.id, "BVCOE", "148", Shift::Morning, 3).unwrap();
        assert_eq!(a, b);

        let college = db::load_college(&conn, a).unwrap();
        assert_eq!(college.shifts.len(), 1);
        assert_eq!(college.semesters.len(), 1);

        ensure_college_shift(&conn, degree.id, "BVCOE", "248", Shift::Evening, 4).unwrap();
        let college = db::load_college(&conn, a).unwrap();
        assert_eq!(college.shifts.get(&Shift::Evening).map(String::as_str), Some("248"));
        assert_eq!(college.semesters.into_iter().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(db::get_stats(&conn).unwrap().colleges, 1);
    }

    #[test]
    fn college_on_missing_degree_is_consistency_error() {
        let (conn, _dir, _store) = setup();
        let err = ensure_college_shift(&conn, DegreeId(7), "X", "001", Shift::Morning, 1).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
    }

    #[tokio::test]
    async fn subjects_link_only_once() {
        let (conn, _dir, store) = setup();
        let mut linker = EntityLinker::new(&conn, &store);
        let uni = linker.ensure_university("Uni").await.unwrap();
        let batch = linker.ensure_batch(&uni, 2021).await.unwrap();
        let degree = linker.ensure_degree(&batch, "027", "B.TECH").await.unwrap();

        let a = linker.ensure_subject(uni.id, &subject("1", "ES-1", 4)).unwrap();
        let b = linker.ensure_subject(uni.id, &subject("2", "ES-2", 3)).unwrap();
        let subjects = vec![("1".to_string(), a), ("2".to_string(), b)];

        assert_eq!(add_subjects_to_degree(&conn, degree.id, &subjects[..1]).unwrap(), 1);
        assert_eq!(add_subjects_to_degree(&conn, degree.id, &subjects).unwrap(), 1);
        assert_eq!(add_subjects_to_degree(&conn, degree.id, &subjects).unwrap(), 0);
        assert_eq!(db::degree_subject_ids(&conn, degree.id).unwrap().len(), 2);
    }
}
