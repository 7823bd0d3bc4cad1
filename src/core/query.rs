//! SQL text construction for the ClickHouse side.
//!
//! Identifiers (database, table and column names) cannot be bound as parameters, so every
//! identifier is validated and wrapped in backticks with embedded backticks doubled before it
//! is interpolated. Row values never appear in the SQL text: inserts are sent as a
//! `FORMAT JSONEachRow` body after the statement built here. Nothing in this module executes
//! a query.

use crate::core::typemap::map_to_store_type;
use crate::domain::model::{selected_names, ColumnMetadata};
use crate::utils::error::{EtlError, Result};

/// Conservative identifier length limit.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Output format used for every row-returning query: a names line, a types line, then one
/// JSON array per row.
pub const READ_FORMAT: &str = "JSONCompactEachRowWithNamesAndTypes";

pub fn validate_identifier(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(EtlError::invalid_input("Identifier cannot be empty"));
    }

    if name.contains('\0') {
        return Err(EtlError::invalid_input(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(EtlError::invalid_input(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a single identifier with backticks.
pub fn quote_identifier(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name.replace('`', "``")))
}

/// Quote a table reference, `table` or `database.table`.
pub fn quote_table(reference: &str) -> Result<String> {
    match reference.split_once('.') {
        Some((db, table)) if !db.is_empty() && !table.is_empty() => {
            Ok(format!("{}.{}", quote_identifier(db)?, quote_identifier(table)?))
        }
        _ => quote_identifier(reference),
    }
}

/// Quote a column. `t.col` is treated as qualified only when `t` is one of the tables in
/// the query; otherwise the dot is part of the column name. Qualified columns are aliased
/// back to their full name so result rows are keyed exactly as selected.
fn quote_column(name: &str, tables: &[&str]) -> Result<String> {
    if let Some((table, column)) = name.split_once('.') {
        if !column.is_empty() && tables.contains(&table) {
            return Ok(format!(
                "{}.{} AS {}",
                quote_identifier(table)?,
                quote_identifier(column)?,
                quote_identifier(name)?
            ));
        }
    }
    quote_identifier(name)
}

/// Comma-joined projection of the selected columns in list order.
///
/// `None` means nothing is selected; callers treat it as a zero-row read, not an error.
pub fn projection(columns: &[ColumnMetadata], tables: &[&str]) -> Result<Option<String>> {
    let quoted = columns
        .iter()
        .filter(|c| c.selected)
        .map(|c| quote_column(&c.name, tables))
        .collect::<Result<Vec<_>>>()?;

    if quoted.is_empty() {
        Ok(None)
    } else {
        Ok(Some(quoted.join(", ")))
    }
}

pub fn show_tables(database: &str) -> Result<String> {
    Ok(format!("SHOW TABLES FROM {}", quote_identifier(database)?))
}

pub fn describe_table(table: &str) -> Result<String> {
    Ok(format!("DESCRIBE TABLE {}", quote_table(table)?))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    pub table: String,
    pub condition: String,
}

/// Reject comment markers in a caller-supplied join condition. Statement separators are
/// consumed by [`join_clauses`] before this runs.
fn validate_join_condition(condition: &str) -> Result<()> {
    if condition.trim().is_empty() {
        return Err(EtlError::invalid_input("Join condition cannot be empty"));
    }
    if condition.contains("--") || condition.contains("/*") || condition.contains("*/") {
        return Err(EtlError::invalid_input(format!(
            "Join condition contains SQL comment markers: {:?}",
            condition
        )));
    }
    Ok(())
}

/// Pair each additional table with its join condition.
///
/// Returns no clauses when either input is empty, in which case the query is a plain
/// SELECT over the main table. Conditions for successive tables are separated by `;`.
/// A single condition with several tables joins only the first table.
pub fn join_clauses(additional_tables: &[String], join_condition: &str) -> Result<Vec<JoinClause>> {
    let mut tables: Vec<&str> = additional_tables
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();

    if tables.is_empty() || join_condition.trim().is_empty() {
        return Ok(Vec::new());
    }

    let conditions: Vec<&str> = join_condition.split(';').map(str::trim).collect();
    if conditions.len() == 1 && tables.len() > 1 {
        tracing::warn!(
            "One join condition for {} tables; joining {} only and ignoring {:?}",
            tables.len(),
            tables[0],
            &tables[1..]
        );
        tables.truncate(1);
    }
    if conditions.len() != tables.len() {
        return Err(EtlError::invalid_input(format!(
            "Expected {} join condition(s) separated by ';' for tables {:?}, got {}",
            tables.len(),
            tables,
            conditions.len()
        )));
    }

    tables
        .into_iter()
        .zip(conditions)
        .map(|(table, condition)| {
            validate_join_condition(condition)?;
            Ok(JoinClause {
                table: table.to_string(),
                condition: condition.to_string(),
            })
        })
        .collect()
}

/// Build `SELECT <projection> FROM <main> [INNER JOIN <t> ON <c>]... [LIMIT n]`.
///
/// `limit` is only set for previews. Returns `None` for an empty projection.
pub fn select(
    main_table: &str,
    columns: &[ColumnMetadata],
    joins: &[JoinClause],
    limit: Option<usize>,
) -> Result<Option<String>> {
    let mut tables = vec![main_table];
    tables.extend(joins.iter().map(|j| j.table.as_str()));

    let Some(columns) = projection(columns, &tables)? else {
        return Ok(None);
    };

    let mut query = format!("SELECT {} FROM {}", columns, quote_table(main_table)?);
    for join in joins {
        query.push_str(" INNER JOIN ");
        query.push_str(&quote_table(&join.table)?);
        query.push_str(" ON ");
        query.push_str(&join.condition);
    }

    if let Some(limit) = limit {
        query.push_str(&format!(" LIMIT {}", limit));
    }

    Ok(Some(query))
}

/// Idempotent CREATE TABLE for the selected columns; MergeTree with no primary key and
/// no particular ordering.
pub fn create_table(table: &str, columns: &[ColumnMetadata]) -> Result<String> {
    let definitions = columns
        .iter()
        .filter(|c| c.selected)
        .map(|c| {
            Ok(format!(
                "{} {}",
                quote_identifier(&c.name)?,
                map_to_store_type(&c.data_type)
            ))
        })
        .collect::<Result<Vec<String>>>()?;

    if definitions.is_empty() {
        return Err(EtlError::invalid_input(format!(
            "Cannot create table {} without selected columns",
            table
        )));
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({}) ENGINE = MergeTree() ORDER BY tuple()",
        quote_table(table)?,
        definitions.join(", ")
    ))
}

/// INSERT statement built once per transfer; values follow as JSONEachRow lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertTemplate {
    pub statement: String,
    pub columns: Vec<String>,
}

pub fn insert_template(table: &str, columns: &[ColumnMetadata]) -> Result<InsertTemplate> {
    let names = selected_names(columns);

    if names.is_empty() {
        return Err(EtlError::invalid_input(format!(
            "Cannot insert into {} without selected columns",
            table
        )));
    }

    let quoted = names
        .iter()
        .map(|n| quote_identifier(n))
        .collect::<Result<Vec<_>>>()?;

    Ok(InsertTemplate {
        statement: format!(
            "INSERT INTO {} ({}) FORMAT JSONEachRow",
            quote_table(table)?,
            quoted.join(", ")
        ),
        columns: names,
    })
}
