// ABOUTME: Oracle catalog queries for schema discovery and row counts
// ABOUTME: Builds the row-fetch statements used by transfer tasks

use super::{SourceRow, SourceSession, SourceValue};
use crate::utils::{quote_ident, quote_literal};
use anyhow::{Context, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Catalog queries fetch small result sets; a modest prefetch is plenty.
const CATALOG_FETCH_SIZE: usize = 100;

/// One source sequence as read from `ALL_SEQUENCES`.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDescriptor {
    pub name: String,
    pub increment_by: i64,
    pub last_number: Decimal,
}

/// Everything discovered for one schema during a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaObjectSet {
    pub tables: Vec<String>,
    pub views: Vec<String>,
    pub sequences: Vec<SequenceDescriptor>,
}

impl SchemaObjectSet {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.views.is_empty() && self.sequences.is_empty()
    }

    pub fn sequence_names(&self) -> Vec<String> {
        self.sequences.iter().map(|s| s.name.clone()).collect()
    }
}

pub fn tables_sql(owner: &str) -> String {
    format!(
        "SELECT TABLE_NAME FROM ALL_TABLES WHERE OWNER = {} ORDER BY TABLE_NAME",
        quote_literal(owner)
    )
}

pub fn views_sql(owner: &str) -> String {
    format!(
        "SELECT VIEW_NAME FROM ALL_VIEWS WHERE OWNER = {} ORDER BY VIEW_NAME",
        quote_literal(owner)
    )
}

pub fn sequences_sql(owner: &str) -> String {
    format!(
        "SELECT SEQUENCE_NAME, INCREMENT_BY, LAST_NUMBER FROM ALL_SEQUENCES \
         WHERE SEQUENCE_OWNER = {} ORDER BY SEQUENCE_NAME",
        quote_literal(owner)
    )
}

pub fn view_text_sql(owner: &str, view: &str) -> String {
    format!(
        "SELECT TEXT FROM ALL_VIEWS WHERE OWNER = {} AND VIEW_NAME = {}",
        quote_literal(owner),
        quote_literal(view)
    )
}

/// `"OWNER"."TABLE"`
pub fn qualified_name(owner: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(owner), quote_ident(table))
}

/// Row-fetch statement for one table, optionally capped at `row_limit` rows.
pub fn select_sql(owner: &str, table: &str, row_limit: Option<usize>) -> String {
    let base = format!("SELECT * FROM {}", qualified_name(owner, table));
    match row_limit {
        Some(limit) => format!("{} FETCH FIRST {} ROWS ONLY", base, limit),
        None => base,
    }
}

pub fn count_sql(owner: &str, table: &str) -> String {
    format!("SELECT COUNT(1) FROM {}", qualified_name(owner, table))
}

/// Discover tables, views and sequences owned by `owner`
///
/// # Errors
///
/// Any failing catalog query fails the whole discovery; there is nothing
/// meaningful to load from a partial inventory.
pub fn discover(session: &mut dyn SourceSession, owner: &str) -> Result<SchemaObjectSet> {
    let tables = query_names(session, &tables_sql(owner)).context("Failed to list tables")?;
    let views = query_names(session, &views_sql(owner)).context("Failed to list views")?;

    let mut sequences = Vec::new();
    session
        .query(&sequences_sql(owner), CATALOG_FETCH_SIZE, &mut |row: &dyn SourceRow| {
            let name = row
                .get_string(1)?
                .ok_or_else(|| anyhow::anyhow!("ALL_SEQUENCES returned a NULL name"))?;
            let increment_by = row
                .get_value(2)?
                .as_decimal()
                .and_then(|d| d.to_i64())
                .unwrap_or(1);
            let last_number = row.get_value(3)?.as_decimal().unwrap_or(Decimal::ZERO);
            sequences.push(SequenceDescriptor {
                name,
                increment_by,
                last_number,
            });
            Ok(())
        })
        .context("Failed to list sequences")?;

    tracing::info!(
        "Discovered {} tables, {} views and {} sequences in schema {}",
        tables.len(),
        views.len(),
        sequences.len(),
        owner
    );

    Ok(SchemaObjectSet {
        tables,
        views,
        sequences,
    })
}

/// Source definition text of one view, `None` when the view has no text.
pub fn fetch_view_text(
    session: &mut dyn SourceSession,
    owner: &str,
    view: &str,
) -> Result<Option<String>> {
    let mut text = None;
    session.query(&view_text_sql(owner, view), 1, &mut |row: &dyn SourceRow| {
        if text.is_none() {
            text = row.get_string(1)?;
        }
        Ok(())
    })?;
    Ok(text)
}

/// Exact row count of one source table.
pub fn count_rows(session: &mut dyn SourceSession, owner: &str, table: &str) -> Result<Decimal> {
    let mut count = None;
    session.query(&count_sql(owner, table), 1, &mut |row: &dyn SourceRow| {
        count = match row.get_value(1)? {
            SourceValue::Null => Some(Decimal::ZERO),
            value => value.as_decimal(),
        };
        Ok(())
    })?;
    count.ok_or_else(|| anyhow::anyhow!("COUNT query for {} returned no value", table))
}

fn query_names(session: &mut dyn SourceSession, sql: &str) -> Result<Vec<String>> {
    tracing::debug!("Catalog query: {}", sql);
    let mut names = Vec::new();
    session.query(sql, CATALOG_FETCH_SIZE, &mut |row: &dyn SourceRow| {
        if let Some(name) = row.get_string(1)? {
            names.push(name);
        }
        Ok(())
    })?;
    Ok(names)
}
