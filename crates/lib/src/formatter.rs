//! # Result Formatting
//!
//! Renders query rows into chat messages. The category detector decides the
//! message template and the follow-up suggestions; availability rows get the
//! dedicated slot rendering with a status derived from the conflict count.
//! Empty result sets always produce a real sentence, never a blank message.

use crate::availability::{weekday_from_code, weekday_name};
use crate::config::FormatterConfig;
use crate::types::{ResponseStatus, Row};
use serde_json::Value;
use tracing::debug;

/// What kind of question the rows answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCategory {
    Availability,
    Appointment,
    Provider,
    Generic,
}

impl QueryCategory {
    /// Detects the category from the user's question and the row shape. A
    /// `ConflictCount` column can only come from the availability template,
    /// so it wins over the text heuristics.
    pub fn detect(query_text: &str, rows: &[Row]) -> Self {
        if rows.iter().any(|r| r.contains_key("ConflictCount")) {
            return QueryCategory::Availability;
        }
        let lowered = query_text.to_lowercase();
        if lowered.contains("availab") || lowered.contains("free") || lowered.contains("working hours")
        {
            QueryCategory::Availability
        } else if lowered.contains("appointment")
            || lowered.contains("booking")
            || lowered.contains("visit")
        {
            QueryCategory::Appointment
        } else if lowered.contains("doctor")
            || lowered.contains("provider")
            || lowered.contains("employee")
            || lowered.contains("practitioner")
            || lowered.contains("staff")
        {
            QueryCategory::Provider
        } else {
            QueryCategory::Generic
        }
    }
}

/// A rendered reply ready to hand back to the user.
#[derive(Debug, Clone)]
pub struct FormattedReply {
    pub message: String,
    pub suggestions: Vec<String>,
    pub status: ResponseStatus,
}

/// Renders query results into chat messages.
#[derive(Debug, Clone)]
pub struct ResultFormatter {
    config: FormatterConfig,
}

impl ResultFormatter {
    pub fn new(config: FormatterConfig) -> Self {
        Self { config }
    }

    pub fn format(&self, query_text: &str, rows: &[Row]) -> FormattedReply {
        let category = QueryCategory::detect(query_text, rows);
        if rows.is_empty() {
            return FormattedReply {
                message: empty_message(category).to_string(),
                suggestions: suggestions(category, None),
                status: ResponseStatus::NoResults,
            };
        }

        let shown = rows.len().min(self.config.max_rows.max(1));
        let mut lines: Vec<String> = Vec::with_capacity(shown + 2);
        lines.push(headline(category, rows.len()));
        for row in &rows[..shown] {
            let line = match category {
                QueryCategory::Availability => self.availability_line(row),
                _ => generic_line(row),
            };
            lines.push(line);
        }
        if rows.len() > shown {
            lines.push(format!("... and {} more", rows.len() - shown));
        }
        debug!(
            "Formatted {} row(s) as {:?} ({} shown).",
            rows.len(),
            category,
            shown
        );

        let first_person = rows.first().and_then(person_name);
        FormattedReply {
            message: lines.join("\n"),
            suggestions: suggestions(category, first_person.as_deref()),
            status: ResponseStatus::Success,
        }
    }

    /// "• Jon Snow: Wednesday 08:00-16:00 (Fully Available)"
    fn availability_line(&self, row: &Row) -> String {
        let name = person_name(row).unwrap_or_else(|| "Unknown provider".to_string());
        let mut line = format!("• {name}");
        match (weekday_field(row), time_window(row)) {
            (Some(day), Some((from, to))) => line.push_str(&format!(": {day} {from}-{to}")),
            (Some(day), None) => line.push_str(&format!(": {day}")),
            (None, Some((from, to))) => line.push_str(&format!(": {from}-{to}")),
            (None, None) => {}
        }
        if let Some(status) = self.conflict_status(row) {
            line.push_str(&format!(" ({status})"));
        }
        line
    }

    fn conflict_status(&self, row: &Row) -> Option<&'static str> {
        let count = row.get("ConflictCount")?.as_i64()?;
        Some(if count == 0 {
            "Fully Available"
        } else if count <= self.config.partially_available_max {
            "Partially Available"
        } else {
            "Busy"
        })
    }
}

fn headline(category: QueryCategory, total: usize) -> String {
    match category {
        QueryCategory::Availability => {
            format!("Here is the availability I found ({total} slot(s)):")
        }
        QueryCategory::Appointment => format!("I found {total} appointment(s):"),
        QueryCategory::Provider => format!("I found {total} provider(s):"),
        QueryCategory::Generic => format!("Here is what I found ({total} result(s)):"),
    }
}

fn empty_message(category: QueryCategory) -> &'static str {
    match category {
        QueryCategory::Availability => {
            "I could not find any availability matching your request. The provider may not have open hours on that day."
        }
        QueryCategory::Appointment => "I could not find any appointments matching your request.",
        QueryCategory::Provider => {
            "I could not find a provider matching your request. Try a different name or specialty."
        }
        QueryCategory::Generic => "Your query ran successfully but returned no results.",
    }
}

fn suggestions(category: QueryCategory, person: Option<&str>) -> Vec<String> {
    match category {
        QueryCategory::Availability => vec![
            person.map_or_else(
                || "Book an appointment".to_string(),
                |p| format!("Book an appointment with {p}"),
            ),
            "Check availability on a different day".to_string(),
            "Find another provider".to_string(),
        ],
        QueryCategory::Appointment => vec![
            "Book a new appointment".to_string(),
            "Cancel an appointment".to_string(),
            "Check a provider's availability".to_string(),
        ],
        QueryCategory::Provider => vec![
            person.map_or_else(
                || "Check a provider's availability".to_string(),
                |p| format!("Check {p}'s availability"),
            ),
            person.map_or_else(
                || "Book an appointment".to_string(),
                |p| format!("Book an appointment with {p}"),
            ),
            "List all available services".to_string(),
        ],
        QueryCategory::Generic => vec![
            "Check a provider's availability".to_string(),
            "Book an appointment".to_string(),
            "Show my upcoming appointments".to_string(),
        ],
    }
}

/// "FirstName LastName" when both are present, any single part otherwise.
fn person_name(row: &Row) -> Option<String> {
    let first = string_field(row, &["FirstName", "First_Name", "GivenName"]);
    let last = string_field(row, &["LastName", "Last_Name", "Surname", "FamilyName"]);
    match (first, last) {
        (Some(f), Some(l)) => Some(format!("{f} {l}")),
        (Some(f), None) => Some(f),
        (None, Some(l)) => Some(l),
        (None, None) => string_field_like(row, "name"),
    }
}

fn string_field(row: &Row, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| row.get(*k).and_then(Value::as_str).map(str::to_string))
}

fn string_field_like(row: &Row, fragment: &str) -> Option<String> {
    row.iter().find_map(|(k, v)| {
        if k.to_lowercase().contains(fragment) {
            v.as_str().map(str::to_string)
        } else {
            None
        }
    })
}

fn weekday_field(row: &Row) -> Option<String> {
    for key in ["WeekDay", "DayOfWeekId", "DayOfWeek", "WeekDayId"] {
        let Some(value) = row.get(key) else {
            continue;
        };
        if let Some(code) = value.as_i64() {
            return weekday_from_code(code).map(|d| weekday_name(d).to_string());
        }
        if let Some(text) = value.as_str() {
            return Some(text.to_string());
        }
    }
    None
}

fn time_window(row: &Row) -> Option<(String, String)> {
    let from = row.iter().find_map(|(k, v)| {
        let lower = k.to_lowercase();
        if lower.contains("from") || lower.contains("start") {
            render_time(v)
        } else {
            None
        }
    });
    let to = row.iter().find_map(|(k, v)| {
        let lower = k.to_lowercase();
        if lower.ends_with("to") || lower.contains("end") || lower.contains("until") {
            render_time(v)
        } else {
            None
        }
    });
    from.zip(to)
}

/// "08:00:00" renders as "08:00"; anything else passes through.
fn render_time(value: &Value) -> Option<String> {
    let trimmed = value.as_str()?.trim();
    let bytes = trimmed.as_bytes();
    if trimmed.len() == 8 && bytes.get(2) == Some(&b':') && bytes.get(5) == Some(&b':') {
        return Some(trimmed[..5].to_string());
    }
    Some(trimmed.to_string())
}

fn generic_line(row: &Row) -> String {
    let mut parts: Vec<String> = Vec::new();
    for (key, value) in row {
        if parts.len() >= 4 {
            break;
        }
        if value.is_null() {
            continue;
        }
        parts.push(format!("{key}: {}", render_value(value)));
    }
    if parts.is_empty() {
        "• (empty row)".to_string()
    } else {
        format!("• {}", parts.join(", "))
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
