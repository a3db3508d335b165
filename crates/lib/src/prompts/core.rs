//! # Default Prompt Templates
//!
//! This module contains the default prompt templates used by the SQL
//! generator and the intent classifier. Placeholders in `{braces}` are
//! substituted before the prompt is sent.

// --- SQL Generation Prompts ---

/// The system prompt for the SQL generation stage.
///
/// Sets the core persona and rules for the AI when it is generating a query.
///
/// Placeholders: `{language}`, `{db_name}`
pub const SQL_GENERATION_SYSTEM_PROMPT: &str = "You are a {language} expert for {db_name}. Write a readonly {language} query that answers the user's question. Expected output is a single {language} query only. Do not add any explanations, introductory text, or markdown formatting.";

/// A shared set of rules for query construction.
pub const SQL_CONSTRUCTION_RULES: &str = r#"# Query Construction Rules
1.  **Schema Grounding**: You MUST use only the tables and columns listed in # SCHEMA. Never invent, guess, or pluralize an identifier that is not listed.
2.  **Readonly**: The query MUST be a single SELECT (or WITH) statement. Never write INSERT, UPDATE, DELETE, DROP, or ALTER.
3.  For searches involving a person's name, use a case-insensitive `LIKE` clause for partial matching (e.g., `LOWER(FirstName) LIKE '%john%'`).
4.  Weekdays are stored as integers using ISO-8601 numbering: Monday=1, Tuesday=2, Wednesday=3, Thursday=4, Friday=5, Saturday=6, Sunday=7.
5.  When a table has an `Active` or `IsActive` column, filter on it (`= 1`) unless the user asks for inactive records.
6.  Join tables only along the foreign keys listed in # SCHEMA.
7.  For questions about "who", "what", or "list", use DISTINCT to avoid duplicate results.
8.  **Crucially, do not format data in the query** (e.g., `strftime` for display). Return raw values. Formatting is handled separately.
9.  For list queries, add a `LIMIT` clause (default 10) unless the user asks for everything."#;

/// The user prompt template for the SQL generation stage.
///
/// Placeholders: `{language}`, `{rules}`, `{context}`, `{today}`, `{prompt}`
pub const SQL_GENERATION_USER_PROMPT: &str = r#"Follow these rules to create a production-grade {language} query:

{rules}

# SCHEMA
{context}

# TODAY
{today}

# USER QUESTION
{prompt}"#;

/// The user prompt template for regenerating a query after an execution
/// failure. The failed SQL and the database error are included so the model
/// can correct the exact mistake.
///
/// Placeholders: `{language}`, `{rules}`, `{context}`, `{failed_sql}`,
/// `{error}`, `{prompt}`
pub const SQL_REPAIR_USER_PROMPT: &str = r#"The previous {language} query failed to execute. Write a corrected query that answers the user's question.

{rules}

# SCHEMA
{context}

# FAILED QUERY
{failed_sql}

# DATABASE ERROR
{error}

# USER QUESTION
{prompt}"#;

// --- Intent Classification Prompts ---

/// The system prompt for LLM intent refinement.
pub const INTENT_SYSTEM_PROMPT: &str = "You are an intent classifier for a healthcare appointment assistant. Respond with a single JSON object and nothing else.";

/// The user prompt template for LLM intent refinement.
///
/// The response contract is `{"intent": "...", "confidence": 0.0-1.0,
/// "reasoning": "..."}` with `intent` drawn from the closed set below.
///
/// Placeholders: `{prompt}`
pub const INTENT_USER_PROMPT: &str = r#"Classify the user's message into exactly one of these intents:
- check_availability: asking when a provider is free or available
- book_appointment: asking to create a new appointment
- cancel_appointment: asking to cancel or reschedule an appointment
- get_appointments: asking to see existing appointments
- find_provider: searching for a doctor or staff member
- data_retrieval: any other question answerable from the database
- general: greetings and anything else

Respond with JSON only: {"intent": "<one of the above>", "confidence": <0.0-1.0>, "reasoning": "<one short sentence>"}

User message: {prompt}"#;
