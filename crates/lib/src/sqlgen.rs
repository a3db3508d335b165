//! # SQL Generation
//!
//! Turns a user question plus a retrieved schema subset into a readonly
//! query. The AI path renders the schema into the prompt context, calls the
//! configured provider, and validates whatever comes back; the rule-based
//! path builds a deterministic SELECT with bound parameters and is both the
//! fallback when no provider is configured and the last resort after repair
//! attempts are exhausted.

use crate::config::GeneratorConfig;
use crate::errors::PipelineError;
use crate::intent::ExtractedEntities;
use crate::prompts::core::{
    SQL_CONSTRUCTION_RULES, SQL_GENERATION_SYSTEM_PROMPT, SQL_GENERATION_USER_PROMPT,
    SQL_REPAIR_USER_PROMPT,
};
use crate::providers::ai::AiProvider;
use crate::schema::{join_suggestions, TableDescriptor};
use crate::types::{GeneratedQuery, GenerationMethod, SqlParam};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, warn};

/// Row cap appended to every rule-based query and demanded of the AI by the
/// construction rules.
const DEFAULT_ROW_LIMIT: u32 = 10;

/// Tables the rule-based generator anchors on, most specific first.
const MAIN_TABLE_PRIORITY: &[&str] = &["Appointment", "Patient", "Employee", "Auth", "Location"];

/// Aliases that collide with SQL keywords and must be suffixed.
const RESERVED_ALIASES: &[&str] = &["as", "by", "in", "is", "no", "of", "on", "or", "to"];

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("AI provider failed during SQL generation: {0}")]
    Provider(Box<PipelineError>),
    #[error("AI provider returned no SQL")]
    EmptySql,
    #[error("Generated query is not readonly: {0}")]
    NotReadOnly(String),
    #[error("No tables available to build a query against")]
    NoTables,
    #[error("Availability template is not applicable: {0}")]
    MissingAvailabilityTables(String),
}

/// Schema-grounded SQL generator.
#[derive(Debug)]
pub struct SqlGenerator {
    ai: Option<Box<dyn AiProvider>>,
    fence: Regex,
    language: String,
    db_name: String,
    config: GeneratorConfig,
}

impl SqlGenerator {
    pub fn new(
        ai: Option<Box<dyn AiProvider>>,
        language: String,
        db_name: String,
        config: GeneratorConfig,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            ai,
            fence: Regex::new(r"```(?:sql|query)?\n?([\s\S]*?)```")?,
            language,
            db_name,
            config,
        })
    }

    pub fn llm_available(&self) -> bool {
        self.ai.is_some()
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_generation_attempts.max(1)
    }

    /// Generates a query for `query` over the retrieved `tables`.
    ///
    /// Uses the AI provider when one is configured; any provider failure or
    /// invalid response degrades to the rule-based builder, so this only
    /// fails when there are no tables at all.
    pub async fn generate(
        &self,
        query: &str,
        tables: &[TableDescriptor],
        entities: &ExtractedEntities,
        today: NaiveDate,
    ) -> Result<GeneratedQuery, GenerationError> {
        if tables.is_empty() {
            return Err(GenerationError::NoTables);
        }
        if let Some(ai) = &self.ai {
            match self.generate_llm(ai.as_ref(), query, tables, today).await {
                Ok(generated) => return Ok(generated),
                Err(e) => {
                    warn!("AI SQL generation failed: {e}; degrading to the rule-based builder.");
                }
            }
        }
        self.rule_based(tables, entities)
    }

    /// Asks the AI provider to repair `failed_sql` given the database error
    /// it caused. Unlike [`generate`](Self::generate) this does not degrade
    /// internally; the caller owns the retry budget.
    pub async fn regenerate(
        &self,
        query: &str,
        tables: &[TableDescriptor],
        failed_sql: &str,
        error_text: &str,
    ) -> Result<GeneratedQuery, GenerationError> {
        let Some(ai) = &self.ai else {
            return Err(GenerationError::Provider(Box::new(
                PipelineError::MissingAiProvider(
                    "query repair requires an AI provider".to_string(),
                ),
            )));
        };
        let user_prompt = SQL_REPAIR_USER_PROMPT
            .replace("{language}", &self.language)
            .replace("{rules}", SQL_CONSTRUCTION_RULES)
            .replace("{context}", &render_prompt_context(tables))
            .replace("{failed_sql}", failed_sql)
            .replace("{error}", error_text)
            .replace("{prompt}", query);
        let raw = ai
            .generate(&self.system_prompt(), &user_prompt)
            .await
            .map_err(|e| GenerationError::Provider(Box::new(e)))?;
        self.finalize_llm_sql(&raw, tables)
    }

    async fn generate_llm(
        &self,
        ai: &dyn AiProvider,
        query: &str,
        tables: &[TableDescriptor],
        today: NaiveDate,
    ) -> Result<GeneratedQuery, GenerationError> {
        let user_prompt = SQL_GENERATION_USER_PROMPT
            .replace("{language}", &self.language)
            .replace("{rules}", SQL_CONSTRUCTION_RULES)
            .replace("{context}", &render_prompt_context(tables))
            .replace("{today}", &today.to_string())
            .replace("{prompt}", query);
        let raw = ai
            .generate(&self.system_prompt(), &user_prompt)
            .await
            .map_err(|e| GenerationError::Provider(Box::new(e)))?;
        self.finalize_llm_sql(&raw, tables)
    }

    fn system_prompt(&self) -> String {
        SQL_GENERATION_SYSTEM_PROMPT
            .replace("{language}", &self.language)
            .replace("{db_name}", &self.db_name)
    }

    /// Strips markdown fences and validates that the response is a single
    /// readonly statement.
    fn finalize_llm_sql(
        &self,
        raw: &str,
        tables: &[TableDescriptor],
    ) -> Result<GeneratedQuery, GenerationError> {
        let cleaned = self
            .fence
            .captures(raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .unwrap_or(raw);
        let sql = cleaned.trim().trim_end_matches(';').trim().to_string();
        if sql.is_empty() {
            return Err(GenerationError::EmptySql);
        }
        let upper = sql.to_uppercase();
        if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
            return Err(GenerationError::NotReadOnly(truncated(&sql)));
        }
        // A second statement smuggled in behind the SELECT is still a write.
        if sql.contains(';') {
            return Err(GenerationError::NotReadOnly(truncated(&sql)));
        }
        debug!(sql = %sql, "AI produced a readonly query.");
        Ok(GeneratedQuery {
            sql,
            params: Vec::new(),
            tables_referenced: referenced_tables(&upper, tables),
            method: GenerationMethod::Llm,
        })
    }

    /// Deterministic SELECT over the retrieved subset: anchor table, LEFT
    /// JOINs along declared foreign keys, identifier and name projections,
    /// and bound parameters for every user-derived filter value.
    pub fn rule_based(
        &self,
        tables: &[TableDescriptor],
        entities: &ExtractedEntities,
    ) -> Result<GeneratedQuery, GenerationError> {
        let main = MAIN_TABLE_PRIORITY
            .iter()
            .find_map(|name| tables.iter().find(|t| &t.name == name))
            .or_else(|| tables.first())
            .ok_or(GenerationError::NoTables)?;

        let aliases = alias_map(tables);
        let main_alias = aliases[&main.name].clone();

        // Joinable tables: a declared foreign key in either direction.
        let mut joins: Vec<(&TableDescriptor, String)> = Vec::new();
        for other in tables.iter().filter(|t| t.name != main.name) {
            let alias = &aliases[&other.name];
            if let Some(fk) = other
                .foreign_keys
                .iter()
                .find(|fk| fk.referenced_table == main.name)
            {
                joins.push((
                    other,
                    format!(
                        "LEFT JOIN {table} {alias} ON {alias}.{col} = {main_alias}.{refcol}",
                        table = other.name,
                        col = fk.column,
                        refcol = fk.referenced_column,
                    ),
                ));
            } else if let Some(fk) = main
                .foreign_keys
                .iter()
                .find(|fk| fk.referenced_table == other.name)
            {
                joins.push((
                    other,
                    format!(
                        "LEFT JOIN {table} {alias} ON {main_alias}.{col} = {alias}.{refcol}",
                        table = other.name,
                        col = fk.column,
                        refcol = fk.referenced_column,
                    ),
                ));
            }
        }

        let mut projection: Vec<String> = main
            .primary_keys
            .iter()
            .map(|pk| format!("{main_alias}.{pk}"))
            .collect();
        for name_col in main.name_like_columns() {
            if projection.len() >= 5 {
                break;
            }
            projection.push(format!("{main_alias}.{name_col}"));
        }
        for (table, _) in &joins {
            for name_col in table.name_like_columns() {
                if projection.len() >= 5 {
                    break;
                }
                projection.push(format!("{}.{}", aliases[&table.name], name_col));
            }
        }
        if projection.is_empty() {
            projection.push(format!("{main_alias}.*"));
        }

        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<SqlParam> = Vec::new();
        if let Some(active) = main.active_column() {
            conditions.push(format!("{main_alias}.{active} = 1"));
        }
        if let Some(name) = &entities.person_name {
            // Filter on the first table in scope that carries name columns.
            let scoped = std::iter::once((main, &main_alias))
                .chain(joins.iter().map(|(t, _)| (*t, &aliases[&t.name])));
            for (table, alias) in scoped {
                let name_columns = table.name_like_columns();
                if name_columns.is_empty() {
                    continue;
                }
                let expr = name_columns
                    .iter()
                    .take(2)
                    .map(|c| format!("{alias}.{c}"))
                    .collect::<Vec<_>>()
                    .join(" || ' ' || ");
                for word in name.split_whitespace() {
                    conditions.push(format!("LOWER({expr}) LIKE ?"));
                    params.push(SqlParam::from(format!("%{}%", word.to_lowercase())));
                }
                break;
            }
        }
        if let (Some(date), Some(date_column)) = (entities.date, main.date_like_column()) {
            conditions.push(format!("DATE({main_alias}.{date_column}) = ?"));
            params.push(SqlParam::from(date.to_string()));
        }

        let mut sql = format!(
            "SELECT {projection}\nFROM {main} {main_alias}",
            projection = projection.join(", "),
            main = main.name,
        );
        for (_, join_clause) in &joins {
            sql.push_str(&format!("\n{join_clause}"));
        }
        if !conditions.is_empty() {
            sql.push_str(&format!("\nWHERE {}", conditions.join(" AND ")));
        }
        if let Some(pk) = main.primary_keys.iter().next() {
            sql.push_str(&format!("\nORDER BY {main_alias}.{pk}"));
        }
        sql.push_str(&format!("\nLIMIT {DEFAULT_ROW_LIMIT}"));

        let mut tables_referenced: BTreeSet<String> = [main.name.clone()].into();
        tables_referenced.extend(joins.iter().map(|(t, _)| t.name.clone()));

        debug!(
            "Rule-based builder anchored on `{}` with {} join(s) and {} parameter(s).",
            main.name,
            joins.len(),
            params.len()
        );
        Ok(GeneratedQuery {
            sql,
            params,
            tables_referenced,
            method: GenerationMethod::RuleBased,
        })
    }
}

/// Renders the retrieved tables into the prompt context: one block per table
/// with typed columns, key markers, and join hints between the tables in
/// scope.
pub fn render_prompt_context(tables: &[TableDescriptor]) -> String {
    let mut out = String::new();
    for table in tables {
        if table.description.is_empty() {
            out.push_str(&format!("## {}\n", table.name));
        } else {
            out.push_str(&format!("## {}: {}\n", table.name, table.description));
        }
        for column in table.columns.iter().take(10) {
            out.push_str(&format!("- {} {}", column.name, column.data_type));
            if !column.nullable {
                out.push_str(" NOT NULL");
            }
            if column.is_primary_key {
                out.push_str(" [PK]");
            }
            if let Some(fk) = table.foreign_keys.iter().find(|fk| fk.column == column.name) {
                out.push_str(&format!(
                    " [FK -> {}.{}]",
                    fk.referenced_table, fk.referenced_column
                ));
            }
            out.push('\n');
        }
        if table.columns.len() > 10 {
            out.push_str(&format!("- ({} more columns)\n", table.columns.len() - 10));
        }
        out.push('\n');
    }
    let hints = join_suggestions(tables);
    if !hints.is_empty() {
        out.push_str("## Join hints\n");
        for hint in hints.iter().take(5) {
            out.push_str(&format!("- {hint}\n"));
        }
    }
    out.trim_end().to_string()
}

/// Deterministic table aliases: lowercase CamelCase initials, suffixed on
/// collision with another alias or a SQL keyword.
fn alias_map(tables: &[TableDescriptor]) -> BTreeMap<String, String> {
    let mut used: BTreeSet<String> = BTreeSet::new();
    let mut map = BTreeMap::new();
    for table in tables {
        let base = alias_initials(&table.name);
        let mut alias = base.clone();
        let mut suffix = 2;
        while used.contains(&alias) || RESERVED_ALIASES.contains(&alias.as_str()) {
            alias = format!("{base}{suffix}");
            suffix += 1;
        }
        used.insert(alias.clone());
        map.insert(table.name.clone(), alias);
    }
    map
}

fn alias_initials(name: &str) -> String {
    let initials: String = name
        .chars()
        .filter(|c| c.is_ascii_uppercase())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if initials.is_empty() {
        name.chars().take(1).map(|c| c.to_ascii_lowercase()).collect()
    } else {
        initials
    }
}

/// Which of the tables in scope the (uppercased) SQL text mentions.
fn referenced_tables(upper_sql: &str, tables: &[TableDescriptor]) -> BTreeSet<String> {
    tables
        .iter()
        .filter(|t| upper_sql.contains(&t.name.to_uppercase()))
        .map(|t| t.name.clone())
        .collect()
}

fn truncated(sql: &str) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    let cut: String = flat
        .char_indices()
        .take_while(|(i, _)| *i <= 80)
        .map(|(_, c)| c)
        .collect();
    if cut.len() < flat.len() {
        format!("{cut}...")
    } else {
        cut
    }
}
