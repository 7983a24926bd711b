pub mod metadata;
pub mod students;
pub mod subjects;

use tracing::{debug, info, warn};

use crate::context::Context;
use crate::db::{self, Batch, Degree, HallOfFameEntry, SubjectRef, University};
use crate::error::{Error, Result, Step};
use crate::linker::{self, EntityLinker, SubjectRegistry};
use crate::pages::{Page, PageCursor};
use crate::result_file::{self, ResultSheet};
use metadata::ExamMetadata;
use students::StudentResultRow;
use subjects::SubjectDef;

#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// 1-based page to start from.
    pub start_page: usize,
    pub session_start: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParseSummary {
    pub pages: usize,
    pub linkages: usize,
    pub students: usize,
    pub files_written: usize,
    pub hall_of_fame: usize,
    pub skipped_subject_lists: usize,
}

/// Subject pages seen since the last link, waiting for a batch year.
#[derive(Debug, Clone)]
pub struct PendingLinkage {
    pub meta: ExamMetadata,
    pub subjects: Vec<SubjectDef>,
}

impl PendingLinkage {
    /// Fold another subject page into the pending list. A page for a
    /// different degree/college/semester/shift starts a new list.
    fn absorb(pending: Option<PendingLinkage>, meta: ExamMetadata, subjects: Vec<SubjectDef>) -> PendingLinkage {
        match pending {
            Some(mut p) if p.meta.same_listing(&meta) => {
                for subject in subjects {
                    if !p.subjects.iter().any(|s| s.id == subject.id) {
                        p.subjects.push(subject);
                    }
                }
                p.meta = meta;
                p
            }
            Some(p) => {
                warn!(
                    dropped = %p.meta.degree_code,
                    degree = %meta.degree_code,
                    "Subject list changed before its batch was known, restarting"
                );
                PendingLinkage { meta, subjects }
            }
            None => PendingLinkage { meta, subjects },
        }
    }
}

/// A subject list bound to its university, batch and degree.
#[derive(Debug, Clone)]
pub struct ActiveLinkage {
    pub university: University,
    pub batch: Batch,
    pub degree: Degree,
    pub meta: ExamMetadata,
    pub subjects: Vec<(String, SubjectRef)>,
    pub registry: SubjectRegistry,
}

#[derive(Debug)]
pub enum ParserState {
    AwaitingSubjectList,
    AccumulatingSubjects(PendingLinkage),
    Linked(ActiveLinkage),
    AccumulatingResults {
        linkage: ActiveLinkage,
        rows: Vec<StudentResultRow>,
    },
}

pub struct ResultParser<'a> {
    ctx: &'a Context,
    linker: EntityLinker<'a>,
    options: ParseOptions,
    summary: ParseSummary,
}

/// Parse one document end to end. Any error aborts the document; links
/// and files committed by earlier flushes stay.
pub async fn parse_document(ctx: &Context, pages: Vec<Page>, options: ParseOptions) -> Result<ParseSummary> {
    if !pages.iter().any(Page::is_subject_list) {
        return Err(Error::NoSubjectList);
    }
    let mut parser = ResultParser::new(ctx, options);
    let mut cursor = PageCursor::new(pages, options.start_page);
    info!(pages = cursor.len(), start = options.start_page, "Parsing document");

    let mut state = ParserState::AwaitingSubjectList;
    while let Some(page) = cursor.advance() {
        parser.summary.pages += 1;
        let number = cursor.page_number();

        let step = if page.is_subject_list() {
            parser.on_subject_page(state, &page, number, cursor.peek()).await?
        } else {
            Step::Continue(parser.on_result_page(state, &page, number)?)
        };

        state = match step {
            Step::Continue(next) => next,
            Step::SkipAndResync(reason) => {
                warn!(page = number, %reason, "Skipping to next subject list");
                parser.summary.skipped_subject_lists += 1;
                cursor.skip_to_subject_list();
                ParserState::AwaitingSubjectList
            }
        };
    }

    parser.finish(state).await
}

impl<'a> ResultParser<'a> {
    pub fn new(ctx: &'a Context, options: ParseOptions) -> Self {
        Self {
            ctx,
            linker: EntityLinker::new(&ctx.conn, ctx.store.as_ref()),
            options,
            summary: ParseSummary::default(),
        }
    }

    async fn on_subject_page(
        &mut self,
        state: ParserState,
        page: &Page,
        number: usize,
        lookahead: Option<&Page>,
    ) -> Result<Step<ParserState>> {
        let pending = match state {
            ParserState::AwaitingSubjectList => None,
            ParserState::AccumulatingSubjects(pending) => Some(pending),
            ParserState::Linked(linkage) => {
                self.flush(linkage, Vec::new()).await?;
                None
            }
            ParserState::AccumulatingResults { linkage, rows } => {
                self.flush(linkage, rows).await?;
                None
            }
        };

        let meta = match metadata::extract(&page.text, lookahead, number, self.options.session_start)? {
            Step::Continue(meta) => meta,
            Step::SkipAndResync(reason) => return Ok(Step::SkipAndResync(reason)),
        };
        let subjects = match subjects::parse_table(&page.table, number)? {
            Step::Continue(subjects) => subjects,
            Step::SkipAndResync(reason) => return Ok(Step::SkipAndResync(reason)),
        };

        let pending = PendingLinkage::absorb(pending, meta, subjects);
        match (pending.meta.batch, lookahead) {
            (Some(year), _) => {
                let linkage = self.link(pending, year).await?;
                Ok(Step::Continue(ParserState::Linked(linkage)))
            }
            (None, Some(_)) => Ok(Step::Continue(ParserState::AccumulatingSubjects(pending))),
            (None, None) => {
                warn!(page = number, degree = %pending.meta.degree_code, "Subject list at end of document, nothing to link");
                Ok(Step::Continue(ParserState::AwaitingSubjectList))
            }
        }
    }

    fn on_result_page(&mut self, state: ParserState, page: &Page, number: usize) -> Result<ParserState> {
        let (linkage, mut rows) = match state {
            ParserState::AwaitingSubjectList => {
                warn!(page = number, "Result page before any subject list, skipping");
                return Ok(ParserState::AwaitingSubjectList);
            }
            ParserState::AccumulatingSubjects(_) => return Err(Error::NoActiveLinkage { page: number }),
            ParserState::Linked(linkage) => (linkage, Vec::new()),
            ParserState::AccumulatingResults { linkage, rows } => (linkage, rows),
        };

        let parsed = students::parse_page(
            &page.table,
            &linkage.registry.codes,
            &linkage.meta.college_code,
            number,
        )?;
        rows.extend(parsed);
        Ok(ParserState::AccumulatingResults { linkage, rows })
    }

    /// Create or find the entity chain for a resolved subject list.
    async fn link(&mut self, pending: PendingLinkage, year: u32) -> Result<ActiveLinkage> {
        let PendingLinkage { meta, subjects } = pending;
        let university = self
            .linker
            .ensure_university(&self.ctx.config.university_name)
            .await?;
        let batch = self.linker.ensure_batch(&university, year).await?;
        let degree = self
            .linker
            .ensure_degree(&batch, &meta.degree_code, &meta.degree_name)
            .await?;

        self.linker.take_registry();
        let mut refs = Vec::with_capacity(subjects.len());
        for subject in &subjects {
            let subject_ref = self.linker.ensure_subject(university.id, subject)?;
            refs.push((subject.id.clone(), subject_ref));
        }

        self.summary.linkages += 1;
        info!(
            degree = %degree.code,
            college = %meta.college_name,
            semester = meta.semester,
            shift = %meta.shift,
            batch = year,
            subjects = refs.len(),
            "Linked subject list"
        );
        Ok(ActiveLinkage {
            university,
            batch,
            degree,
            meta,
            subjects: refs,
            registry: self.linker.take_registry(),
        })
    }

    /// Commit the college link, the degree's subjects and the result file
    /// together. Nothing is kept if any of them fails.
    async fn flush(&mut self, linkage: ActiveLinkage, rows: Vec<StudentResultRow>) -> Result<()> {
        let ActiveLinkage {
            university,
            batch,
            degree,
            meta,
            subjects,
            registry,
        } = &linkage;

        let tx = self.ctx.conn.unchecked_transaction()?;
        let college_ref =
            linker::ensure_college_shift(&tx, degree.id, &meta.college_name, &meta.college_code, meta.shift, meta.semester)?;
        let college = db::load_college(&tx, college_ref)?;
        debug!(
            college = %college.name,
            shifts = college.shifts.len(),
            semesters = ?college.semesters,
            "College linked"
        );
        linker::add_subjects_to_degree(&tx, degree.id, subjects)?;
        if !rows.is_empty() {
            let staging = result_file::staging_dir(&self.ctx.config.results_dir, university, batch, degree);
            let sheet = ResultSheet::from_students(&rows, &registry.credits);
            result_file::commit(&tx, self.ctx.store.as_ref(), &staging, degree, meta.semester, sheet).await?;
            self.summary.files_written += 1;
        }
        tx.commit()?;

        self.summary.students += rows.len();
        self.record_hall_of_fame(&linkage, &rows);
        Ok(())
    }

    fn record_hall_of_fame(&mut self, linkage: &ActiveLinkage, rows: &[StudentResultRow]) {
        for row in rows.iter().filter(|r| r.is_top_scorer()) {
            let entry = HallOfFameEntry {
                roll_num: row.roll_num.clone(),
                name: row.name.clone(),
                university_name: linkage.university.name.clone(),
                batch: linkage.batch.year,
                college_name: linkage.meta.college_name.clone(),
                college_id: row.college_id.clone(),
                semester: linkage.meta.semester,
            };
            match db::insert_hall_of_fame(&self.ctx.conn, &entry) {
                Ok(()) => {
                    self.summary.hall_of_fame += 1;
                    info!(roll_num = %row.roll_num, name = %row.name, "Hall of fame");
                }
                Err(e) => warn!(roll_num = %row.roll_num, "Failed to record hall of fame entry: {}", e),
            }
        }
    }

    async fn finish(mut self, state: ParserState) -> Result<ParseSummary> {
        match state {
            ParserState::AwaitingSubjectList => {}
            ParserState::AccumulatingSubjects(pending) => {
                warn!(degree = %pending.meta.degree_code, "Document ended before the batch was known");
            }
            ParserState::Linked(linkage) => self.flush(linkage, Vec::new()).await?,
            ParserState::AccumulatingResults { linkage, rows } => self.flush(linkage, rows).await?,
        }
        info!(
            pages = self.summary.pages,
            linkages = self.summary.linkages,
            students = self.summary.students,
            files = self.summary.files_written,
            "Finished document"
        );
        Ok(self.summary)
    }
}
