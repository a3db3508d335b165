//! # Availability Queries
//!
//! The canonical weekday convention and the template that turns "when is
//! <provider> free" into SQL over the employee and availability-window
//! tables.
//!
//! Weekdays are encoded as ISO-8601 integers everywhere: Monday=1 through
//! Sunday=7. Generation and formatting both go through the helpers here, so
//! no other numbering can leak into queries or messages.

use crate::intent::ExtractedEntities;
use crate::schema::{ColumnDescriptor, ColumnType, TableDescriptor};
use crate::sqlgen::GenerationError;
use crate::types::{GeneratedQuery, GenerationMethod, SqlParam};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::BTreeSet;
use tracing::debug;

/// The canonical integer code for a weekday: Monday=1 … Sunday=7.
pub fn weekday_code(day: Weekday) -> u32 {
    day.number_from_monday()
}

/// The weekday for a canonical code, if the code is in `1..=7`.
pub fn weekday_from_code(code: i64) -> Option<Weekday> {
    match code {
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        7 => Some(Weekday::Sun),
        _ => None,
    }
}

/// The full English name for a weekday.
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Parses a weekday from user text ("wednesday", "wed").
pub fn parse_weekday(word: &str) -> Option<Weekday> {
    match word.to_lowercase().as_str() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thur" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

/// The next date falling on `day`, counting `today` itself as a candidate.
pub fn next_occurrence(today: NaiveDate, day: Weekday) -> NaiveDate {
    let ahead = (i64::from(weekday_code(day)) - i64::from(weekday_code(today.weekday()))).rem_euclid(7);
    today + Duration::days(ahead)
}

/// Builds the provider-availability query from the retrieved schema subset.
///
/// Joins the employee table to its availability-window table, filters by the
/// requested weekday and provider name (both as bound parameters), and, when
/// an appointment table was retrieved, counts conflicting appointments on the
/// target date so the formatter can derive a real status.
pub fn build_availability_query(
    tables: &[TableDescriptor],
    entities: &ExtractedEntities,
    today: NaiveDate,
) -> Result<GeneratedQuery, GenerationError> {
    let employee = tables
        .iter()
        .find(|t| t.name.contains("Employee") && !t.name.contains("Availability"))
        .ok_or_else(|| {
            GenerationError::MissingAvailabilityTables("no employee table retrieved".to_string())
        })?;
    let windows = tables
        .iter()
        .find(|t| t.name.contains("Availability"))
        .ok_or_else(|| {
            GenerationError::MissingAvailabilityTables(
                "no availability-window table retrieved".to_string(),
            )
        })?;

    let weekday_column = ["WeekDay", "DayOfWeekId", "DayOfWeek", "WeekDayId"]
        .into_iter()
        .find(|c| windows.has_column(c))
        .ok_or_else(|| {
            GenerationError::MissingAvailabilityTables(format!(
                "table `{}` has no weekday column",
                windows.name
            ))
        })?;

    // Join along the declared foreign key, or a shared EmployeeId column.
    let (join_left, join_right) = windows
        .foreign_keys
        .iter()
        .find(|fk| fk.referenced_table == employee.name)
        .map(|fk| (fk.column.clone(), fk.referenced_column.clone()))
        .or_else(|| {
            (windows.has_column("EmployeeId") && employee.has_column("EmployeeId"))
                .then(|| ("EmployeeId".to_string(), "EmployeeId".to_string()))
        })
        .ok_or_else(|| {
            GenerationError::MissingAvailabilityTables(format!(
                "no foreign key joins `{}` to `{}`",
                windows.name, employee.name
            ))
        })?;

    let mut params: Vec<SqlParam> = Vec::new();
    let mut tables_referenced: BTreeSet<String> =
        [employee.name.clone(), windows.name.clone()].into();

    // Projection: provider identity, the window, and optionally the conflict
    // count for the target date.
    let mut projection: Vec<String> = Vec::new();
    for pk in &employee.primary_keys {
        projection.push(format!("e.{pk}"));
    }
    for name_col in employee.name_like_columns().into_iter().take(2) {
        projection.push(format!("e.{name_col}"));
    }
    projection.push(format!("a.{weekday_column}"));

    let time_like = |c: &ColumnDescriptor| {
        matches!(c.data_type, ColumnType::Time | ColumnType::DateTime)
            || c.name.to_lowercase().contains("time")
    };
    let from_column = windows.columns.iter().find(|c| {
        let lower = c.name.to_lowercase();
        time_like(c) && (lower.contains("from") || lower.contains("start"))
    });
    let to_column = windows.columns.iter().find(|c| {
        let lower = c.name.to_lowercase();
        time_like(c) && (lower.contains("to") || lower.contains("end") || lower.contains("until"))
    });
    if let Some(col) = from_column {
        projection.push(format!("a.{}", col.name));
    }
    if let Some(col) = to_column {
        projection.push(format!("a.{}", col.name));
    }

    let weekday = entities
        .weekday
        .or_else(|| entities.date.map(|d| d.weekday()));
    let target_date = entities
        .date
        .or_else(|| weekday.map(|day| next_occurrence(today, day)));

    // Conflicting appointments on the target date, when the appointment
    // table was retrieved and a concrete date is known.
    if let (Some(date), Some(appointments)) = (
        target_date,
        tables
            .iter()
            .find(|t| t.name.contains("Appointment") && !t.name.contains("Status")),
    ) {
        let fk_column = appointments
            .foreign_keys
            .iter()
            .find(|fk| fk.referenced_table == employee.name)
            .map(|fk| fk.column.as_str())
            .or_else(|| appointments.has_column("EmployeeId").then_some("EmployeeId"));
        if let (Some(fk_column), Some(date_column)) = (fk_column, appointments.date_like_column()) {
            projection.push(format!(
                "(SELECT COUNT(*) FROM {appt} ap WHERE ap.{fk_column} = e.{join_right} AND DATE(ap.{date_column}) = ?) AS ConflictCount",
                appt = appointments.name
            ));
            params.push(SqlParam::from(date.to_string()));
            tables_referenced.insert(appointments.name.clone());
        }
    }

    let mut conditions: Vec<String> = Vec::new();
    if let Some(active) = employee.active_column() {
        conditions.push(format!("e.{active} = 1"));
    }
    if let Some(day) = weekday {
        conditions.push(format!("a.{weekday_column} = ?"));
        params.push(SqlParam::from(weekday_code(day)));
    }
    if let Some(name) = &entities.person_name {
        let name_columns = employee.name_like_columns();
        if !name_columns.is_empty() {
            let expr = name_columns
                .iter()
                .take(2)
                .map(|c| format!("e.{c}"))
                .collect::<Vec<_>>()
                .join(" || ' ' || ");
            for word in name.split_whitespace() {
                conditions.push(format!("LOWER({expr}) LIKE ?"));
                params.push(SqlParam::from(format!("%{}%", word.to_lowercase())));
            }
        }
    }

    let mut sql = format!(
        "SELECT {projection}\nFROM {employee} e\nINNER JOIN {windows} a ON a.{join_left} = e.{join_right}",
        projection = projection.join(", "),
        employee = employee.name,
        windows = windows.name,
    );
    if !conditions.is_empty() {
        sql.push_str(&format!("\nWHERE {}", conditions.join(" AND ")));
    }
    let order_key = employee
        .primary_keys
        .iter()
        .next()
        .map(|pk| format!("e.{pk}"))
        .unwrap_or_else(|| format!("a.{weekday_column}"));
    sql.push_str(&format!("\nORDER BY {order_key}, a.{weekday_column}"));

    debug!(
        "Availability template produced SQL over {:?} with {} parameter(s).",
        tables_referenced,
        params.len()
    );

    Ok(GeneratedQuery {
        sql,
        params,
        tables_referenced,
        method: GenerationMethod::RuleBased,
    })
}
