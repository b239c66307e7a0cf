use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, thiserror::Error)]
pub enum AttainmentError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("database query failed: {0}")]
    Db(#[from] rusqlite::Error),
}

impl AttainmentError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Db(_) => "db_query_failed",
        }
    }
}

/// One stored mark joined with the component it was entered against.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkRow {
    pub student_id: String,
    pub clo_id: String,
    pub mark: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutcomeTotals {
    pub sum_mark: f64,
    pub sum_weight: f64,
}

impl OutcomeTotals {
    /// `None` when there is no positive weight to divide by.
    pub fn percent(&self) -> Option<f64> {
        if self.sum_weight > 0.0 {
            Some(self.sum_mark / self.sum_weight * 100.0)
        } else {
            None
        }
    }
}

pub type StudentOutcomes = BTreeMap<String, BTreeMap<String, f64>>;

/// Sum marks and weights per (student, CLO) and turn each pair into a
/// percentage. Pairs with a non-positive weight sum are left out.
pub fn clo_attainment<I>(rows: I) -> StudentOutcomes
where
    I: IntoIterator<Item = MarkRow>,
{
    let mut totals: HashMap<(String, String), OutcomeTotals> = HashMap::new();
    for row in rows {
        let t = totals.entry((row.student_id, row.clo_id)).or_default();
        t.sum_mark += row.mark;
        t.sum_weight += row.weight;
    }

    let mut out: StudentOutcomes = BTreeMap::new();
    for ((student_id, clo_id), t) in totals {
        let Some(pct) = t.percent() else {
            continue;
        };
        out.entry(student_id).or_default().insert(clo_id, pct);
    }
    out
}

/// Roll CLO percentages up to PLOs with a plain mean over every CLO mapped to
/// the PLO. A mapped CLO the student has no value for counts as 0. Only
/// students present in `clo_by_student` get PLO values.
pub fn plo_attainment(
    clo_by_student: &StudentOutcomes,
    plo_clos: &BTreeMap<String, Vec<String>>,
) -> StudentOutcomes {
    let mut out: StudentOutcomes = BTreeMap::new();
    for (student_id, clos) in clo_by_student {
        let mut per_plo = BTreeMap::new();
        for (plo_id, mapped) in plo_clos {
            if mapped.is_empty() {
                continue;
            }
            let sum: f64 = mapped
                .iter()
                .map(|clo_id| clos.get(clo_id).copied().unwrap_or(0.0))
                .sum();
            per_plo.insert(plo_id.clone(), sum / mapped.len() as f64);
        }
        out.insert(student_id.clone(), per_plo);
    }
    out
}

/// Mean per outcome over the students that have a value for it.
pub fn outcome_averages(by_student: &StudentOutcomes) -> BTreeMap<String, f64> {
    let mut acc: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for outcomes in by_student.values() {
        for (k, v) in outcomes {
            let e = acc.entry(k.clone()).or_insert((0.0, 0));
            e.0 += v;
            e.1 += 1;
        }
    }
    acc.into_iter()
        .map(|(k, (sum, n))| (k, sum / n as f64))
        .collect()
}

pub fn round_to(x: f64, decimals: u32) -> f64 {
    let f = 10f64.powi(decimals as i32);
    (x * f).round() / f
}

pub fn clo_code(course_code: &str, sl: i64) -> String {
    format!("{}-CLO{}", course_code, sl)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionSummary {
    pub id: String,
    pub course_id: String,
    pub course_code: String,
    pub name: String,
    pub semester: String,
    pub year: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloSummary {
    pub id: String,
    pub code: String,
    pub sl: i64,
    pub plo_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PloSummary {
    pub id: String,
    pub code: String,
    pub clo_codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttainment {
    pub id: String,
    pub student_no: String,
    pub name: String,
    pub clo: BTreeMap<String, f64>,
    pub plo: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionAttainment {
    pub section: SectionSummary,
    pub clos: Vec<CloSummary>,
    pub plos: Vec<PloSummary>,
    pub students: Vec<StudentAttainment>,
    pub clo_averages: BTreeMap<String, f64>,
    pub plo_averages: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub term: String,
    pub section_id: String,
    pub course_code: String,
    pub section_name: String,
    pub clo: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentHistory {
    pub id: String,
    pub student_no: String,
    pub name: String,
    pub history: Vec<HistoryEntry>,
}

pub fn load_section_summary(
    conn: &Connection,
    section_id: &str,
) -> Result<SectionSummary, AttainmentError> {
    conn.query_row(
        "SELECT s.id, c.id, c.code, s.name, s.semester, s.year
         FROM sections s JOIN courses c ON c.id = s.course_id
         WHERE s.id = ?",
        [section_id],
        |r| {
            Ok(SectionSummary {
                id: r.get(0)?,
                course_id: r.get(1)?,
                course_code: r.get(2)?,
                name: r.get(3)?,
                semester: r.get(4)?,
                year: r.get(5)?,
            })
        },
    )
    .optional()?
    .ok_or(AttainmentError::NotFound("section"))
}

#[derive(Debug, Clone)]
struct CloRow {
    id: String,
    sl: i64,
    plo_id: Option<String>,
    plo_code: Option<String>,
}

fn load_course_clos(conn: &Connection, course_id: &str) -> Result<Vec<CloRow>, AttainmentError> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.sl, c.plo_id, p.code
         FROM clos c LEFT JOIN plos p ON p.id = c.plo_id
         WHERE c.course_id = ?
         ORDER BY c.sl",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            Ok(CloRow {
                id: r.get(0)?,
                sl: r.get(1)?,
                plo_id: r.get(2)?,
                plo_code: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_section_marks(conn: &Connection, section_id: &str) -> Result<Vec<MarkRow>, AttainmentError> {
    let mut stmt = conn.prepare(
        "SELECT m.student_id, ac.clo_id, m.mark, ac.weight
         FROM assessment_marks m
         JOIN assessment_components ac ON ac.id = m.component_id
         JOIN assessment_templates t ON t.id = ac.template_id
         JOIN enrollments e ON e.student_id = m.student_id AND e.section_id = t.section_id
         WHERE t.section_id = ?",
    )?;
    let rows = stmt
        .query_map([section_id], |r| {
            Ok(MarkRow {
                student_id: r.get(0)?,
                clo_id: r.get(1)?,
                mark: r.get(2)?,
                weight: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn rekey(
    values: &BTreeMap<String, f64>,
    codes: &HashMap<String, String>,
    decimals: u32,
) -> BTreeMap<String, f64> {
    values
        .iter()
        .filter_map(|(id, v)| codes.get(id).map(|code| (code.clone(), round_to(*v, decimals))))
        .collect()
}

/// CLO and PLO attainment for every student enrolled in a section.
/// Recomputed from the stored marks on each call.
pub fn section_attainment(
    conn: &Connection,
    section_id: &str,
    decimals: u32,
) -> Result<SectionAttainment, AttainmentError> {
    let section = load_section_summary(conn, section_id)?;
    let clo_rows = load_course_clos(conn, &section.course_id)?;

    let mut clo_codes: HashMap<String, String> = HashMap::new();
    let mut plo_clos: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut plo_codes: HashMap<String, String> = HashMap::new();
    let mut clos = Vec::with_capacity(clo_rows.len());
    for c in &clo_rows {
        let code = clo_code(&section.course_code, c.sl);
        clo_codes.insert(c.id.clone(), code.clone());
        if let (Some(pid), Some(pcode)) = (&c.plo_id, &c.plo_code) {
            plo_clos.entry(pid.clone()).or_default().push(c.id.clone());
            plo_codes.insert(pid.clone(), pcode.clone());
        }
        clos.push(CloSummary {
            id: c.id.clone(),
            code,
            sl: c.sl,
            plo_code: c.plo_code.clone(),
        });
    }

    let mut plos: Vec<PloSummary> = plo_clos
        .iter()
        .filter_map(|(pid, mapped)| {
            plo_codes.get(pid).map(|code| PloSummary {
                id: pid.clone(),
                code: code.clone(),
                clo_codes: mapped.iter().filter_map(|c| clo_codes.get(c).cloned()).collect(),
            })
        })
        .collect();
    plos.sort_by(|a, b| a.code.cmp(&b.code));

    let clo_by_student = clo_attainment(load_section_marks(conn, section_id)?);
    let plo_by_student = plo_attainment(&clo_by_student, &plo_clos);

    let mut stmt = conn.prepare(
        "SELECT st.id, st.student_id, st.name
         FROM enrollments e JOIN students st ON st.id = e.student_id
         WHERE e.section_id = ?
         ORDER BY st.student_id",
    )?;
    let enrolled = stmt
        .query_map([section_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let empty = BTreeMap::new();
    let students = enrolled
        .into_iter()
        .map(|(id, student_no, name)| StudentAttainment {
            clo: rekey(clo_by_student.get(&id).unwrap_or(&empty), &clo_codes, decimals),
            plo: rekey(plo_by_student.get(&id).unwrap_or(&empty), &plo_codes, decimals),
            id,
            student_no,
            name,
        })
        .collect();

    let clo_averages = rekey(&outcome_averages(&clo_by_student), &clo_codes, decimals);
    let plo_averages = rekey(&outcome_averages(&plo_by_student), &plo_codes, decimals);

    Ok(SectionAttainment {
        section,
        clos,
        plos,
        students,
        clo_averages,
        plo_averages,
    })
}

fn semester_rank(semester: &str) -> i64 {
    match semester {
        "Spring" => 0,
        "Summer" => 1,
        "Fall" => 2,
        _ => 3,
    }
}

/// CLO attainment of one student across every section they were enrolled in,
/// oldest term first.
pub fn student_history(
    conn: &Connection,
    student_id: &str,
    decimals: u32,
) -> Result<StudentHistory, AttainmentError> {
    let (student_no, name): (String, String) = conn
        .query_row(
            "SELECT student_id, name FROM students WHERE id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?
        .ok_or(AttainmentError::NotFound("student"))?;

    let mut stmt = conn.prepare(
        "SELECT s.id FROM enrollments e JOIN sections s ON s.id = e.section_id
         WHERE e.student_id = ?",
    )?;
    let section_ids = stmt
        .query_map([student_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut mark_stmt = conn.prepare(
        "SELECT m.student_id, ac.clo_id, m.mark, ac.weight
         FROM assessment_marks m
         JOIN assessment_components ac ON ac.id = m.component_id
         JOIN assessment_templates t ON t.id = ac.template_id
         WHERE t.section_id = ? AND m.student_id = ?",
    )?;

    let mut entries: Vec<(i64, i64, HistoryEntry)> = Vec::new();
    for sid in section_ids {
        let section = load_section_summary(conn, &sid)?;
        let codes: HashMap<String, String> = load_course_clos(conn, &section.course_id)?
            .into_iter()
            .map(|c| (c.id, clo_code(&section.course_code, c.sl)))
            .collect();
        let rows = mark_stmt
            .query_map((&sid, student_id), |r| {
                Ok(MarkRow {
                    student_id: r.get(0)?,
                    clo_id: r.get(1)?,
                    mark: r.get(2)?,
                    weight: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let by_student = clo_attainment(rows);
        let Some(clo) = by_student.get(student_id) else {
            continue;
        };
        entries.push((
            section.year,
            semester_rank(&section.semester),
            HistoryEntry {
                term: format!("{} {}", section.semester, section.year),
                section_id: section.id,
                course_code: section.course_code,
                section_name: section.name,
                clo: rekey(clo, &codes, decimals),
            },
        ));
    }
    entries.sort_by(|a, b| {
        (a.0, a.1, &a.2.course_code).cmp(&(b.0, b.1, &b.2.course_code))
    });

    Ok(StudentHistory {
        id: student_id.to_string(),
        student_no,
        name,
        history: entries.into_iter().map(|(_, _, e)| e).collect(),
    })
}
