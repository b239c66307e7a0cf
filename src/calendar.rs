use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    BadDate(String),
    #[error("unknown semester {0:?}")]
    BadSemester(String),
    #[error("holiday end date is before its start date")]
    EndBeforeStart,
    #[error("holiday not found")]
    NotFound,
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl CalendarError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadDate(_) | Self::BadSemester(_) | Self::EndBeforeStart => "bad_params",
            Self::NotFound => "not_found",
            Self::Db(_) => "db_query_failed",
        }
    }
}

pub fn parse_date(s: &str) -> Result<NaiveDate, CalendarError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).map_err(|_| CalendarError::BadDate(s.to_string()))
}

pub fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

/// Read a `YYYY-MM-DD` text column.
pub fn date_column(r: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = r.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semester {
    Spring,
    Summer,
    Fall,
}

impl Semester {
    pub fn parse(s: &str) -> Result<Self, CalendarError> {
        match s.trim() {
            "Spring" => Ok(Self::Spring),
            "Summer" => Ok(Self::Summer),
            "Fall" => Ok(Self::Fall),
            other => Err(CalendarError::BadSemester(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spring => "Spring",
            Self::Summer => "Summer",
            Self::Fall => "Fall",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Holiday {
    pub id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl Holiday {
    pub fn last_day(&self) -> NaiveDate {
        self.end_date.unwrap_or(self.start_date)
    }

    pub fn is_single_day(&self) -> bool {
        self.last_day() <= self.start_date
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.last_day()
    }
}

/// How a calendar date relates to the recorded holidays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayKind {
    Regular,
    SingleHoliday,
    RangeHoliday,
}

/// A ranged holiday wins over a single-day one covering the same date.
pub fn classify(date: NaiveDate, holidays: &[Holiday]) -> DayKind {
    let mut kind = DayKind::Regular;
    for h in holidays.iter().filter(|h| h.contains(date)) {
        if h.is_single_day() {
            kind = DayKind::SingleHoliday;
        } else {
            return DayKind::RangeHoliday;
        }
    }
    kind
}

type MonthDay = (u32, u32);

const SPRING_PRESET: &[(&str, MonthDay, Option<MonthDay>)] = &[
    ("Shab-e-Meraj", (1, 28), None),
    ("Saraswati Puja", (2, 3), None),
    ("Shab-e-Barat", (2, 15), None),
    ("International Mother Language Day", (2, 21), None),
    ("National Independence Day", (3, 26), None),
    ("Laylat al-Qadr", (3, 28), None),
    ("Mid-term Break", (3, 16), Some((3, 22))),
    ("Eid-ul-Fitr", (3, 26), Some((4, 2))),
    ("Bengali New Year", (4, 14), None),
    ("International Workers' Day", (5, 1), None),
    ("Buddha Purnima", (5, 11), None),
    ("Eid-ul-Adha", (6, 4), Some((6, 10))),
    ("Ashura", (7, 6), None),
];

const FALL_PRESET: &[(&str, MonthDay, Option<MonthDay>)] = &[
    ("Eid-ul-Adha", (6, 4), Some((6, 10))),
    ("Ashura", (7, 6), None),
    ("Durga Puja", (10, 15), Some((10, 19))),
    ("Eid-e-Miladunnabi", (9, 28), None),
    ("Victory Day", (12, 16), None),
    ("Christmas Day", (12, 25), None),
    ("Mid-term Break", (11, 15), Some((11, 21))),
];

const SUMMER_PRESET: &[(&str, MonthDay, Option<MonthDay>)] = &[
    ("Eid-ul-Fitr", (3, 26), Some((4, 2))),
    ("Bengali New Year", (4, 14), None),
    ("International Workers' Day", (5, 1), None),
    ("Buddha Purnima", (5, 11), None),
];

fn ymd(year: i32, (m, d): MonthDay) -> Result<NaiveDate, CalendarError> {
    NaiveDate::from_ymd_opt(year, m, d)
        .ok_or_else(|| CalendarError::BadDate(format!("{:04}-{:02}-{:02}", year, m, d)))
}

/// Built-in holiday list of a semester, dated in `year`.
pub fn semester_preset(
    semester: Semester,
    year: i32,
) -> Result<Vec<(String, NaiveDate, Option<NaiveDate>)>, CalendarError> {
    let table = match semester {
        Semester::Spring => SPRING_PRESET,
        Semester::Summer => SUMMER_PRESET,
        Semester::Fall => FALL_PRESET,
    };
    table
        .iter()
        .map(|(name, start, end)| {
            let end = match end {
                Some(md) => Some(ymd(year, *md)?),
                None => None,
            };
            Ok((name.to_string(), ymd(year, *start)?, end))
        })
        .collect()
}

fn holiday_from_row(r: &Row<'_>) -> rusqlite::Result<Holiday> {
    let end_raw: Option<String> = r.get(3)?;
    let end_date = match end_raw {
        Some(_) => Some(date_column(r, 3)?),
        None => None,
    };
    Ok(Holiday {
        id: r.get(0)?,
        name: r.get(1)?,
        start_date: date_column(r, 2)?,
        end_date,
    })
}

pub fn list_holidays(conn: &Connection) -> Result<Vec<Holiday>, CalendarError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, start_date, end_date FROM holidays ORDER BY start_date, name",
    )?;
    let rows = stmt
        .query_map([], holiday_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn add_holiday(
    conn: &Connection,
    name: &str,
    start: NaiveDate,
    end: Option<NaiveDate>,
) -> Result<Holiday, CalendarError> {
    if let Some(e) = end {
        if e < start {
            return Err(CalendarError::EndBeforeStart);
        }
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO holidays(id, name, start_date, end_date) VALUES(?, ?, ?, ?)",
        (&id, name, format_date(start), end.map(format_date)),
    )?;
    Ok(Holiday {
        id,
        name: name.to_string(),
        start_date: start,
        end_date: end,
    })
}

pub fn delete_holiday(conn: &Connection, holiday_id: &str) -> Result<(), CalendarError> {
    let n = conn.execute("DELETE FROM holidays WHERE id = ?", [holiday_id])?;
    if n == 0 {
        return Err(CalendarError::NotFound);
    }
    Ok(())
}

/// First holiday covering `date`, if any.
pub fn holiday_on(conn: &Connection, date: NaiveDate) -> Result<Option<Holiday>, CalendarError> {
    let d = format_date(date);
    let found = conn
        .query_row(
            "SELECT id, name, start_date, end_date FROM holidays
             WHERE start_date <= ?1 AND COALESCE(end_date, start_date) >= ?1
             ORDER BY start_date, name
             LIMIT 1",
            [&d],
            holiday_from_row,
        )
        .optional()?;
    Ok(found)
}

/// Replace every holiday lying fully inside `year` with the semester preset.
/// Returns the number of holidays inserted.
pub fn load_semester_holidays(
    conn: &Connection,
    semester: Semester,
    year: i32,
) -> Result<usize, CalendarError> {
    let preset = semester_preset(semester, year)?;
    let year_start = format!("{:04}-01-01", year);
    let year_end = format!("{:04}-12-31", year);

    let tx = conn.unchecked_transaction()?;
    let removed = tx.execute(
        "DELETE FROM holidays WHERE start_date >= ? AND COALESCE(end_date, start_date) <= ?",
        (&year_start, &year_end),
    )?;
    for (name, start, end) in &preset {
        tx.execute(
            "INSERT INTO holidays(id, name, start_date, end_date) VALUES(?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                name,
                format_date(*start),
                end.map(format_date),
            ),
        )?;
    }
    tx.commit()?;
    tracing::info!(
        semester = semester.as_str(),
        year,
        removed,
        inserted = preset.len(),
        "semester holidays loaded"
    );
    Ok(preset.len())
}
