use chrono::{Duration, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::calendar::{self, classify, CalendarError, DayKind, Holiday};

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("second seed date must fall 1 to 6 days after the first (got {0} days)")]
    BadSeedGap(i64),
    #[error("session count must be positive")]
    EmptyCount,
    #[error("placed only {placed} of {wanted} sessions within {max_weeks} weeks")]
    WeeksExhausted {
        wanted: u32,
        placed: u32,
        max_weeks: u32,
    },
    #[error("session dates run past the supported calendar range")]
    DateOutOfRange,
    #[error("section not found")]
    SectionNotFound,
    #[error("section already has {0} sessions")]
    SessionsExist(i64),
    #[error(transparent)]
    Calendar(#[from] CalendarError),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl ScheduleError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadSeedGap(_) | Self::EmptyCount | Self::DateOutOfRange => "bad_params",
            Self::WeeksExhausted { .. } => "schedule_exhausted",
            Self::SectionNotFound => "not_found",
            Self::SessionsExist(_) => "sessions_exist",
            Self::Calendar(e) => e.code(),
            Self::Db(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub theory_sessions: u32,
    pub lab_sessions: u32,
    pub max_weeks: u32,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            theory_sessions: 28,
            lab_sessions: 14,
            max_weeks: 52,
        }
    }
}

impl ScheduleSettings {
    pub fn session_count(&self, is_lab: bool) -> u32 {
        if is_lab {
            self.lab_sessions
        } else {
            self.theory_sessions
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedSession {
    pub number: u32,
    pub date: NaiveDate,
    pub is_holiday: bool,
}

/// Project `count` weekly sessions from two seed dates.
///
/// Odd sessions land on `first + week_index` weeks and even sessions
/// `gap` days later in the same week. A single-day holiday on a slot date
/// marks that session but still uses the slot. A ranged holiday touching
/// either slot of a week skips the whole week without using a slot.
pub fn plan_sessions(
    first: NaiveDate,
    second: NaiveDate,
    count: u32,
    max_weeks: u32,
    holidays: &[Holiday],
) -> Result<Vec<PlannedSession>, ScheduleError> {
    let gap = (second - first).num_days();
    if !(1..=6).contains(&gap) {
        return Err(ScheduleError::BadSeedGap(gap));
    }
    if count == 0 {
        return Err(ScheduleError::EmptyCount);
    }

    let mut out: Vec<PlannedSession> = Vec::with_capacity(count as usize);
    let mut number: u32 = 1;
    let mut week_index: u32 = 0;

    while number <= count {
        if week_index >= max_weeks {
            return Err(ScheduleError::WeeksExhausted {
                wanted: count,
                placed: number - 1,
                max_weeks,
            });
        }

        let odd_date = first
            .checked_add_signed(Duration::weeks(i64::from(week_index)))
            .ok_or(ScheduleError::DateOutOfRange)?;
        let even_date = first
            .checked_add_signed(Duration::days(gap + 7 * i64::from(week_index)))
            .ok_or(ScheduleError::DateOutOfRange)?;
        let week = [odd_date, even_date];
        let slots = if number < count { &week[..] } else { &week[..1] };

        if slots
            .iter()
            .any(|d| classify(*d, holidays) == DayKind::RangeHoliday)
        {
            week_index += 1;
            continue;
        }

        for date in slots {
            out.push(PlannedSession {
                number,
                date: *date,
                is_holiday: classify(*date, holidays) == DayKind::SingleHoliday,
            });
            number += 1;
        }
        week_index += 1;
    }

    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub id: String,
    pub number: u32,
    pub date: NaiveDate,
    pub is_holiday: bool,
}

pub fn count_sessions(conn: &Connection, section_id: &str) -> Result<i64, ScheduleError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM sessions WHERE section_id = ?",
        [section_id],
        |r| r.get(0),
    )?)
}

pub fn list_sessions(conn: &Connection, section_id: &str) -> Result<Vec<StoredSession>, ScheduleError> {
    let mut stmt = conn.prepare(
        "SELECT id, number, date, is_holiday FROM sessions WHERE section_id = ? ORDER BY number",
    )?;
    let rows = stmt
        .query_map([section_id], |r| {
            Ok(StoredSession {
                id: r.get(0)?,
                number: r.get(1)?,
                date: calendar::date_column(r, 2)?,
                is_holiday: r.get::<_, i64>(3)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Generate and store the session calendar of a section. Refuses to touch a
/// section that already has sessions.
pub fn generate_for_section(
    conn: &Connection,
    section_id: &str,
    first: NaiveDate,
    second: NaiveDate,
    settings: &ScheduleSettings,
) -> Result<Vec<StoredSession>, ScheduleError> {
    let is_lab: bool = conn
        .query_row(
            "SELECT c.is_lab FROM sections s JOIN courses c ON c.id = s.course_id WHERE s.id = ?",
            [section_id],
            |r| Ok(r.get::<_, i64>(0)? != 0),
        )
        .optional()?
        .ok_or(ScheduleError::SectionNotFound)?;

    let existing = count_sessions(conn, section_id)?;
    if existing > 0 {
        return Err(ScheduleError::SessionsExist(existing));
    }

    let holidays = calendar::list_holidays(conn)?;
    let count = settings.session_count(is_lab);
    let planned = plan_sessions(first, second, count, settings.max_weeks, &holidays)?;

    let tx = conn.unchecked_transaction()?;
    let mut stored = Vec::with_capacity(planned.len());
    for p in planned {
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO sessions(id, section_id, number, date, is_holiday) VALUES(?, ?, ?, ?, ?)",
            (
                &id,
                section_id,
                p.number,
                calendar::format_date(p.date),
                i64::from(p.is_holiday),
            ),
        )?;
        stored.push(StoredSession {
            id,
            number: p.number,
            date: p.date,
            is_holiday: p.is_holiday,
        });
    }
    tx.commit()?;

    tracing::info!(
        section_id,
        is_lab,
        sessions = stored.len(),
        holidays = stored.iter().filter(|s| s.is_holiday).count(),
        "sessions generated"
    );
    Ok(stored)
}

/// Drop every session of a section along with its attendance.
pub fn clear_sessions(conn: &Connection, section_id: &str) -> Result<usize, ScheduleError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM attendance WHERE session_id IN (SELECT id FROM sessions WHERE section_id = ?)",
        [section_id],
    )?;
    let removed = tx.execute("DELETE FROM sessions WHERE section_id = ?", [section_id])?;
    tx.commit()?;
    tracing::info!(section_id, removed, "sessions cleared");
    Ok(removed)
}
