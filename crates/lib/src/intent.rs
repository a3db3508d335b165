//! # Intent Classification & Entity Extraction
//!
//! Maps a free-text message onto the closed set of intents the pipeline
//! understands, and pulls out the entities (provider names, weekdays, dates,
//! times) the generators need. Classification is rule-based first; when an AI
//! provider is configured its JSON verdict refines the rule-based result, and
//! any provider or parse failure falls back to the rules.

use crate::availability::{next_occurrence, parse_weekday, weekday_name};
use crate::errors::PipelineError;
use crate::prompts::core::{INTENT_SYSTEM_PROMPT, INTENT_USER_PROMPT};
use crate::providers::ai::AiProvider;
use chrono::{Duration, NaiveDate, NaiveTime, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// The closed set of user intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    CheckAvailability,
    BookAppointment,
    CancelAppointment,
    GetAppointments,
    FindProvider,
    DataRetrieval,
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::CheckAvailability => "check_availability",
            Intent::BookAppointment => "book_appointment",
            Intent::CancelAppointment => "cancel_appointment",
            Intent::GetAppointments => "get_appointments",
            Intent::FindProvider => "find_provider",
            Intent::DataRetrieval => "data_retrieval",
            Intent::General => "general",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An intent together with the classifier's confidence in it.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f32,
}

/// The JSON contract the AI classifier answers with.
#[derive(Debug, Deserialize)]
struct LlmIntentResponse {
    intent: Intent,
    confidence: f32,
    #[serde(default)]
    reasoning: String,
}

/// Entities pulled out of the user's message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedEntities {
    pub person_name: Option<String>,
    pub weekday: Option<Weekday>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

impl ExtractedEntities {
    pub fn is_empty(&self) -> bool {
        self.person_name.is_none()
            && self.weekday.is_none()
            && self.date.is_none()
            && self.time.is_none()
    }

    /// A compact human-readable form for trace events.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(name) = &self.person_name {
            parts.push(format!("name={name}"));
        }
        if let Some(day) = self.weekday {
            parts.push(format!("weekday={}", weekday_name(day)));
        }
        if let Some(date) = self.date {
            parts.push(format!("date={date}"));
        }
        if let Some(time) = self.time {
            parts.push(format!("time={}", time.format("%H:%M")));
        }
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Words that look like names to the capitalization patterns but never are.
const NAME_STOPWORDS: &[&str] = &[
    "about", "all", "appointment", "appointments", "are", "available", "availability", "book",
    "booking", "cancel", "check", "clinic", "could", "doctor", "does", "employee", "find", "free",
    "friday", "get", "give", "have", "hello", "how", "list", "location", "monday", "next", "nurse",
    "open", "patient", "patients", "please", "provider", "saturday", "schedule", "service", "show",
    "slot", "slots", "staff", "sunday", "the", "this", "thursday", "time", "today", "tomorrow",
    "tuesday", "wednesday", "week", "what", "when", "where", "which", "who", "will", "with",
    "would", "you",
];

/// Rule-based intent classification with optional AI refinement.
pub struct IntentClassifier {
    ai: Option<Box<dyn AiProvider>>,
    title_name: Regex,
    preposition_name: Regex,
    capitalized_run: Regex,
    date_pattern: Regex,
    time_pattern: Regex,
}

impl fmt::Debug for IntentClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntentClassifier")
            .field("ai", &self.ai)
            .finish_non_exhaustive()
    }
}

impl IntentClassifier {
    pub fn new(ai: Option<Box<dyn AiProvider>>) -> Result<Self, PipelineError> {
        Ok(Self {
            ai,
            title_name: Regex::new(r"\b(?:Dr\.?|Doctor|dr\.?|doctor)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)")?,
            preposition_name: Regex::new(
                r"\b(?:of|for|with|about)\s+(?:[Dd]r\.?\s+|[Dd]octor\s+)?([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)",
            )?,
            capitalized_run: Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)\b")?,
            date_pattern: Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b")?,
            time_pattern: Regex::new(r"\b(\d{1,2})(?::(\d{2}))?\s*(am|pm)\b")?,
        })
    }

    /// Classifies `text`, letting the AI provider refine the rule-based
    /// verdict when one is configured. Never fails: provider errors and
    /// unparseable responses keep the rule-based result.
    pub async fn classify(&self, text: &str) -> Classification {
        let rule_based = self.classify_rules(text);
        let Some(ai) = &self.ai else {
            return rule_based;
        };
        let user_prompt = INTENT_USER_PROMPT.replace("{prompt}", text);
        match ai.generate(INTENT_SYSTEM_PROMPT, &user_prompt).await {
            Ok(raw) => match parse_llm_intent(&raw) {
                Some(refined) => {
                    debug!(
                        "AI refined intent from {} to {} ({:.2}).",
                        rule_based.intent, refined.intent, refined.confidence
                    );
                    refined
                }
                None => {
                    warn!("Could not parse AI intent response; keeping the rule-based intent.");
                    rule_based
                }
            },
            Err(e) => {
                warn!("AI intent classification failed: {e}; keeping the rule-based intent.");
                rule_based
            }
        }
    }

    /// Keyword classification over the closed intent set. Cancellation is
    /// checked before booking and listing because every cancellation message
    /// also mentions an appointment.
    pub fn classify_rules(&self, text: &str) -> Classification {
        let lowered = text.to_lowercase();
        if contains_any(&lowered, &["cancel", "reschedule", "call off"]) {
            return Classification {
                intent: Intent::CancelAppointment,
                confidence: 0.7,
            };
        }
        if contains_any(
            &lowered,
            &["book", "schedule an", "make an appointment", "set up an appointment", "new appointment"],
        ) {
            return Classification {
                intent: Intent::BookAppointment,
                confidence: 0.7,
            };
        }
        if contains_any(
            &lowered,
            &["available", "availability", "free", "open slot", "working hours", "schedule", "when is", "when does"],
        ) {
            return Classification {
                intent: Intent::CheckAvailability,
                confidence: 0.7,
            };
        }
        if contains_any(&lowered, &["my appointment", "appointments", "upcoming visit"]) {
            return Classification {
                intent: Intent::GetAppointments,
                confidence: 0.6,
            };
        }
        if contains_any(
            &lowered,
            &["find", "doctor", "provider", "practitioner", "specialist", "who is"],
        ) {
            return Classification {
                intent: Intent::FindProvider,
                confidence: 0.6,
            };
        }
        if contains_any(
            &lowered,
            &["show", "list", "how many", "count", "get", "what", "which"],
        ) {
            return Classification {
                intent: Intent::DataRetrieval,
                confidence: 0.6,
            };
        }
        Classification {
            intent: Intent::General,
            confidence: 0.5,
        }
    }

    /// Pulls person names, weekdays, dates, and times out of `text`.
    /// `today` anchors the relative date words.
    pub fn extract_entities(&self, text: &str, today: NaiveDate) -> ExtractedEntities {
        let lowered = text.to_lowercase();
        ExtractedEntities {
            person_name: self.extract_person_name(text),
            weekday: extract_weekday(&lowered),
            date: self.extract_date(&lowered, today),
            time: self.extract_time(&lowered),
        }
    }

    fn extract_person_name(&self, text: &str) -> Option<String> {
        // Most precise patterns first; the capitalized-run scan is the
        // fallback and leans on the stopword filter.
        for pattern in [&self.title_name, &self.preposition_name, &self.capitalized_run] {
            for caps in pattern.captures_iter(text) {
                if let Some(name) = caps.get(1).and_then(|m| sanitize_name(m.as_str())) {
                    return Some(name);
                }
            }
        }
        None
    }

    fn extract_date(&self, lowered: &str, today: NaiveDate) -> Option<NaiveDate> {
        if lowered.contains("today") {
            return Some(today);
        }
        if lowered.contains("tomorrow") {
            return Some(today + Duration::days(1));
        }
        if let Some(caps) = self.date_pattern.captures(lowered) {
            let parsed = (
                caps[1].parse::<u32>().ok(),
                caps[2].parse::<u32>().ok(),
                caps[3].parse::<i32>().ok(),
            );
            if let (Some(month), Some(day), Some(year)) = parsed {
                if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                    return Some(date);
                }
            }
        }
        if let Some(day) = extract_weekday(lowered) {
            // "next monday" skips today's week even when today is Monday.
            if lowered.contains("next ") {
                return Some(next_occurrence(today + Duration::days(1), day));
            }
            if lowered.contains("this ") {
                return Some(next_occurrence(today, day));
            }
        }
        None
    }

    fn extract_time(&self, lowered: &str) -> Option<NaiveTime> {
        let caps = self.time_pattern.captures(lowered)?;
        let hour: u32 = caps[1].parse().ok()?;
        if !(1..=12).contains(&hour) {
            return None;
        }
        let minute = caps
            .get(2)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0);
        let hour24 = match (&caps[3], hour) {
            ("am", 12) => 0,
            ("pm", h) if h < 12 => h + 12,
            (_, h) => h,
        };
        NaiveTime::from_hms_opt(hour24, minute, 0)
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Drops stopwords from a name candidate; `None` when nothing plausible is
/// left.
fn sanitize_name(candidate: &str) -> Option<String> {
    let kept: Vec<&str> = candidate
        .split_whitespace()
        .filter(|w| !NAME_STOPWORDS.contains(&w.to_lowercase().as_str()))
        .collect();
    if kept.is_empty() || kept.len() > 3 {
        return None;
    }
    Some(kept.join(" "))
}

fn extract_weekday(lowered: &str) -> Option<Weekday> {
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .find_map(parse_weekday)
}

fn parse_llm_intent(raw: &str) -> Option<Classification> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    let parsed: LlmIntentResponse = serde_json::from_str(&raw[start..=end]).ok()?;
    if !parsed.reasoning.is_empty() {
        debug!("AI intent reasoning: {}", parsed.reasoning);
    }
    Some(Classification {
        intent: parsed.intent,
        confidence: parsed.confidence.clamp(0.0, 1.0),
    })
}
