//! # Tool Dispatch
//!
//! The closed set of tools the pipeline can route a message to. Routing is a
//! total function of the classified intent, so every intent always lands on
//! exactly one tool and unknown tool names cannot exist.

use crate::intent::Intent;
use serde::Serialize;
use std::fmt;

/// What the pipeline will do with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Schema-grounded SQL over the clinical database.
    DatabaseQuery,
    /// Booking and cancellation flows; both need details the pipeline
    /// currently asks the user for.
    Booking,
    /// Provider-availability lookup with the dedicated query template.
    Availability,
    /// Provider search, answered as a database query with provider tables.
    Search,
    /// Input validation without touching the database.
    Validation,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::DatabaseQuery => "database_query",
            ToolKind::Booking => "booking",
            ToolKind::Availability => "availability",
            ToolKind::Search => "search",
            ToolKind::Validation => "validation",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Intent> for ToolKind {
    fn from(intent: Intent) -> Self {
        match intent {
            Intent::CheckAvailability => ToolKind::Availability,
            Intent::BookAppointment | Intent::CancelAppointment => ToolKind::Booking,
            Intent::FindProvider => ToolKind::Search,
            Intent::GetAppointments | Intent::DataRetrieval | Intent::General => {
                ToolKind::DatabaseQuery
            }
        }
    }
}
