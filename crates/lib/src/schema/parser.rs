//! # DDL Parser
//!
//! Parses an annotated T-SQL-style schema script into [`TableDescriptor`]s.
//! The expected shape is a `-- Table: Name` / `-- description` comment pair
//! followed by a `CREATE TABLE … ;` block; bare `CREATE TABLE` statements
//! without the annotation are accepted with an empty description.

use crate::schema::{
    ColumnDescriptor, ColumnType, ForeignKeyRef, SchemaError, TableDescriptor,
};
use regex::Regex;

/// Parses a DDL script into table descriptors, in document order.
pub fn parse_ddl(ddl: &str) -> Result<Vec<TableDescriptor>, SchemaError> {
    if ddl.trim().is_empty() {
        return Err(SchemaError::Parse("schema definition is empty".to_string()));
    }

    let annotated =
        Regex::new(r"(?s)--\s*Table:\s*([A-Za-z_]\w*)\s*\r?\n--\s*([^\r\n]*)\r?\n\s*(CREATE\s+TABLE[^;]+;)")
            .map_err(|e| SchemaError::Parse(e.to_string()))?;
    let bare = Regex::new(r"(?s)CREATE\s+TABLE[^;]+;")
        .map_err(|e| SchemaError::Parse(e.to_string()))?;

    // (position, name hint, description, statement)
    let mut blocks: Vec<(usize, Option<String>, String, &str)> = Vec::new();
    let mut consumed: Vec<(usize, usize)> = Vec::new();

    for caps in annotated.captures_iter(ddl) {
        let stmt = caps.get(3).ok_or_else(|| {
            SchemaError::Parse("annotated table block without CREATE TABLE".to_string())
        })?;
        consumed.push((stmt.start(), stmt.end()));
        blocks.push((
            stmt.start(),
            Some(caps[1].to_string()),
            caps[2].trim().to_string(),
            stmt.as_str(),
        ));
    }

    for m in bare.find_iter(ddl) {
        let inside_annotated = consumed
            .iter()
            .any(|(start, end)| m.start() >= *start && m.end() <= *end);
        if !inside_annotated {
            blocks.push((m.start(), None, String::new(), m.as_str()));
        }
    }

    if blocks.is_empty() {
        return Err(SchemaError::Parse(
            "no CREATE TABLE statements found".to_string(),
        ));
    }
    blocks.sort_by_key(|(pos, ..)| *pos);

    let mut tables = Vec::with_capacity(blocks.len());
    for (_, name_hint, description, stmt) in blocks {
        let table = parse_create_table(stmt, name_hint.as_deref(), &description)?;
        table.validate()?;
        tables.push(table);
    }
    Ok(tables)
}

/// Parses one `CREATE TABLE … ;` statement.
fn parse_create_table(
    stmt: &str,
    name_hint: Option<&str>,
    description: &str,
) -> Result<TableDescriptor, SchemaError> {
    let name_re = Regex::new(r"(?i)CREATE\s+TABLE\s+((?:\[?\w+\]?\.)*\[?(\w+)\]?)\s*\(")
        .map_err(|e| SchemaError::Parse(e.to_string()))?;
    let stmt_name = name_re
        .captures(stmt)
        .map(|caps| caps[2].to_string())
        .ok_or_else(|| SchemaError::Parse(format!("unparseable CREATE TABLE: {}", preview(stmt))))?;

    // The annotation's name wins when both are present; the statement name is
    // the fallback for bare blocks.
    let name = name_hint.map(str::to_string).unwrap_or(stmt_name);

    let open = stmt.find('(').ok_or_else(|| {
        SchemaError::Parse(format!("CREATE TABLE `{name}` has no column list"))
    })?;
    let close = stmt.rfind(')').ok_or_else(|| {
        SchemaError::Parse(format!("CREATE TABLE `{name}` has an unterminated column list"))
    })?;
    if close <= open {
        return Err(SchemaError::Parse(format!(
            "CREATE TABLE `{name}` has a malformed column list"
        )));
    }
    let body = &stmt[open + 1..close];

    let pk_re = Regex::new(r"(?i)PRIMARY\s+KEY\s*(?:CLUSTERED|NONCLUSTERED)?\s*\(([^)]+)\)")
        .map_err(|e| SchemaError::Parse(e.to_string()))?;
    let fk_re = Regex::new(
        r"(?i)FOREIGN\s+KEY\s*\(\s*\[?(\w+)\]?\s*\)\s*REFERENCES\s+(?:\[?\w+\]?\.)*\[?(\w+)\]?\s*\(\s*\[?(\w+)\]?\s*\)",
    )
    .map_err(|e| SchemaError::Parse(e.to_string()))?;
    let column_re = Regex::new(r"^\[?([A-Za-z_]\w*)\]?\s+([A-Za-z]+(?:\s*\([^)]*\))?)\s*(.*)$")
        .map_err(|e| SchemaError::Parse(e.to_string()))?;
    // T-SQL exports wrap defaults in doubled parens: DEFAULT ((1)).
    let default_re = Regex::new(r"(?i)DEFAULT\s+\(*\s*('[^']*'|[\w.]+)\s*\)*")
        .map_err(|e| SchemaError::Parse(e.to_string()))?;

    let mut table = TableDescriptor::new(name.clone(), description);

    for raw_line in body.lines() {
        let line = raw_line.trim().trim_end_matches(',').trim();
        if line.is_empty() || line.starts_with("--") {
            continue;
        }
        let upper = line.to_uppercase();

        if upper.starts_with("CONSTRAINT") || upper.starts_with("PRIMARY KEY") || upper.starts_with("FOREIGN KEY") {
            if let Some(caps) = pk_re.captures(line) {
                for part in caps[1].split(',') {
                    let col = clean_identifier(part);
                    if !col.is_empty() {
                        table.primary_keys.insert(col.to_string());
                    }
                }
            }
            if let Some(caps) = fk_re.captures(line) {
                table.foreign_keys.push(ForeignKeyRef {
                    column: caps[1].to_string(),
                    referenced_table: caps[2].to_string(),
                    referenced_column: caps[3].to_string(),
                });
            }
            continue;
        }

        let Some(caps) = column_re.captures(line) else {
            continue;
        };
        let col_name = caps[1].to_string();
        let mut column = ColumnDescriptor::new(col_name, parse_column_type(&caps[2]));
        let flags = caps[3].to_uppercase();

        column.nullable = !flags.contains("NOT NULL");
        if flags.contains("PRIMARY KEY") {
            table.primary_keys.insert(column.name.clone());
        }
        if let Some(dcaps) = default_re.captures(&caps[3]) {
            column.default_value = Some(dcaps[1].trim_matches('\'').to_string());
        }
        table.columns.push(column);
    }

    if table.columns.is_empty() {
        return Err(SchemaError::Parse(format!(
            "table `{name}` defines no columns"
        )));
    }

    let pk_names = table.primary_keys.clone();
    let fk_columns: Vec<String> = table.foreign_keys.iter().map(|fk| fk.column.clone()).collect();
    for column in &mut table.columns {
        if pk_names.contains(&column.name) {
            column.is_primary_key = true;
            column.nullable = false;
        }
        if fk_columns.contains(&column.name) {
            column.is_foreign_key = true;
        }
    }

    Ok(table)
}

/// Normalizes a raw vendor type into a [`ColumnType`].
///
/// Shared with live introspection, where declared types arrive in the same
/// textual form.
pub fn parse_column_type(raw: &str) -> ColumnType {
    let raw = raw.trim();
    let (base, args) = match raw.find('(') {
        Some(open) => {
            let close = raw.rfind(')').unwrap_or(raw.len());
            (raw[..open].trim(), Some(raw[open + 1..close].trim()))
        }
        None => (raw, None),
    };

    match base.to_uppercase().as_str() {
        "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" => ColumnType::Integer,
        "NVARCHAR" | "VARCHAR" | "CHAR" | "NCHAR" | "TEXT" | "NTEXT" => {
            let length = args.and_then(|a| {
                if a.eq_ignore_ascii_case("MAX") {
                    None
                } else {
                    a.parse::<u32>().ok()
                }
            });
            ColumnType::Text { length }
        }
        "DATE" => ColumnType::Date,
        "TIME" => ColumnType::Time,
        "DATETIME" | "DATETIME2" | "SMALLDATETIME" | "TIMESTAMP" => ColumnType::DateTime,
        "BIT" | "BOOLEAN" | "BOOL" => ColumnType::Boolean,
        "DECIMAL" | "NUMERIC" => {
            let (precision, scale) = args
                .map(|a| {
                    let mut parts = a.split(',').map(str::trim);
                    let p = parts.next().and_then(|p| p.parse().ok()).unwrap_or(18);
                    let s = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                    (p, s)
                })
                .unwrap_or((18, 0));
            ColumnType::Decimal { precision, scale }
        }
        "MONEY" => ColumnType::Decimal {
            precision: 19,
            scale: 4,
        },
        "FLOAT" | "REAL" | "DOUBLE" => ColumnType::Float,
        _ => ColumnType::Other(raw.to_string()),
    }
}

fn clean_identifier(raw: &str) -> &str {
    // Drops an ASC/DESC ordering suffix by keeping only the first token.
    let token = raw.trim().split_whitespace().next().unwrap_or("");
    token.trim_matches(|c| c == '[' || c == ']' || c == '"')
}

fn preview(stmt: &str) -> String {
    let trimmed = stmt.trim();
    let cut: String = trimmed.chars().take(60).collect();
    if cut.len() < trimmed.len() {
        format!("{cut}…")
    } else {
        trimmed.to_string()
    }
}
