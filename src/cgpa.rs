use std::collections::HashMap;

use crate::parser::students::StudentResultRow;

/// Marks per subject used for `max_marks_possible`.
const MARKS_PER_SUBJECT: u32 = 100;

const GRADE_POINTS: &[(&str, u32)] = &[
    ("O", 10),
    ("A+", 9),
    ("A", 8),
    ("B+", 7),
    ("B", 6),
    ("C", 5),
    ("P", 4),
    ("F", 0),
];

pub fn grade_point(grade: &str) -> Option<u32> {
    let grade = grade.trim();
    GRADE_POINTS
        .iter()
        .find(|(g, _)| *g == grade)
        .map(|(_, p)| *p)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub total_marks_scored: u32,
    pub max_marks_possible: u32,
    /// `None` when no subject carried a recognized grade.
    pub cgpa: Option<f64>,
}

/// Aggregate one student over the subjects of the active list. Subjects
/// missing from `credits` are ignored; an unrecognized grade counts toward
/// marks but neither toward grade points nor credits.
pub fn aggregate(row: &StudentResultRow, credits: &HashMap<String, u32>) -> Aggregate {
    let mut total_marks: u32 = 0;
    let mut counted = 0;
    let mut weighted = 0u32;
    let mut considered = 0;

    for score in &row.scores {
        let Some(&credit) = credits.get(&score.subject_id) else {
            continue;
        };
        total_marks = total_marks.saturating_add(score.marks());
        counted += 1;
        if let Some(point) = grade_point(&score.grade) {
            weighted += point * credit;
            considered += credit;
        }
    }

    Aggregate {
        total_marks_scored: total_marks,
        max_marks_possible: counted * MARKS_PER_SUBJECT,
        cgpa: cgpa(weighted, considered),
    }
}

/// Two decimals, half away from zero, on the exact ratio.
pub fn cgpa(weighted_points: u32, credits: u32) -> Option<f64> {
    if credits == 0 {
        return None;
    }
    let (weighted, credits) = (u64::from(weighted_points), u64::from(credits));
    let hundredths = (200 * weighted + credits) / (2 * credits);
    Some(hundredths as f64 / 100.0)
}

/// Dense rank, highest CGPA first. Students without a CGPA are unranked.
pub fn dense_rank(cgpas: &[Option<f64>]) -> Vec<Option<u32>> {
    let mut distinct: Vec<f64> = cgpas.iter().flatten().copied().collect();
    distinct.sort_by(|a, b| b.total_cmp(a));
    distinct.dedup();

    cgpas
        .iter()
        .map(|c| {
            c.and_then(|v| {
                distinct
                    .iter()
                    .position(|d| *d == v)
                    .map(|pos| pos as u32 + 1)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::students::SubjectScore;

    fn score(id: &str, internal: u32, external: u32, grade: &str) -> SubjectScore {
        SubjectScore {
            subject_id: id.to_string(),
            internal,
            external,
            grade: grade.to_string(),
        }
    }

    fn student(scores: Vec<SubjectScore>) -> StudentResultRow {
        StudentResultRow {
            roll_num: "001".to_string(),
            name: "A".to_string(),
            college_id: "148".to_string(),
            scores,
        }
    }

    fn credits(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn dense_ranking_does_not_skip() {
        let ranks = dense_rank(&[Some(9.0), Some(9.0), Some(8.5), Some(8.0)]);
        assert_eq!(ranks, vec![Some(1), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn unranked_without_cgpa() {
        let ranks = dense_rank(&[Some(7.0), None, Some(8.0)]);
        assert_eq!(ranks, vec![Some(2), None, Some(1)]);
    }

    #[test]
    fn rounds_to_two_decimals() {
        // 147 / 16 = 9.1875
        assert_eq!(cgpa(147, 16), Some(9.19));
        assert_eq!(cgpa(0, 0), None);
    }

    #[test]
    fn exact_ties_round_up() {
        // 0.575 and 8.125 are not exact in binary
        assert_eq!(cgpa(23, 40), Some(0.58));
        assert_eq!(cgpa(325, 40), Some(8.13));
        assert_eq!(cgpa(20, 2), Some(10.0));
    }

    #[test]
    fn aggregates_weighted_by_credit() {
        let row = student(vec![score("1", 20, 70, "O"), score("2", 15, 50, "B")]);
        let agg = aggregate(&row, &credits(&[("1", 4), ("2", 2)]));
        assert_eq!(agg.total_marks_scored, 155);
        assert_eq!(agg.max_marks_possible, 200);
        // (10*4 + 6*2) / 6
        assert_eq!(agg.cgpa, Some(8.67));
    }

    #[test]
    fn unrecognized_grade_is_excluded_not_zero() {
        let row = student(vec![score("1", 20, 70, "O"), score("2", 10, 10, "ABS")]);
        let agg = aggregate(&row, &credits(&[("1", 4), ("2", 4)]));
        assert_eq!(agg.cgpa, Some(10.0));
        assert_eq!(agg.total_marks_scored, 110);
        assert_eq!(agg.max_marks_possible, 200);
    }

    #[test]
    fn subjects_outside_active_list_are_ignored() {
        let row = student(vec![score("1", 20, 70, "A"), score("9", 20, 70, "O")]);
        let agg = aggregate(&row, &credits(&[("1", 3)]));
        assert_eq!(agg.total_marks_scored, 90);
        assert_eq!(agg.max_marks_possible, 100);
        assert_eq!(agg.cgpa, Some(8.0));
    }

    #[test]
    fn all_unrecognized_grades_leave_cgpa_blank() {
        let row = student(vec![score("1", 0, 0, "ABS")]);
        assert_eq!(aggregate(&row, &credits(&[("1", 4)])).cgpa, None);
    }
}
