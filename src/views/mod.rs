// ABOUTME: View recreation - fetch Oracle view text, translate, create in DuckDB
// ABOUTME: Target views carry a fixed prefix so they never collide with tables

pub mod translator;

use crate::source::catalog;
use crate::source::SourceSession;
use crate::target;
use anyhow::{Context, Result};
use duckdb::Connection;

pub use translator::ViewSqlTranslator;

/// Prefix of every recreated view in the target.
pub const VIEW_PREFIX: &str = "VW_";

/// `EMP_VIEW` becomes `VW_EMP_VIEW`.
pub fn target_view_name(view: &str) -> String {
    format!("{}{}", VIEW_PREFIX, view)
}

/// Fetch, translate and recreate one view
///
/// Returns the translated SQL. Missing or empty view text is a translation
/// error for this view only. The previous target view is dropped first, so a
/// failure never leaves a stale definition behind.
pub fn recreate_view(
    session: &mut dyn SourceSession,
    conn: &Connection,
    translator: &ViewSqlTranslator,
    view: &str,
) -> Result<String> {
    let target_name = target_view_name(view);
    target::drop_view(conn, &target_name)?;

    let text = catalog::fetch_view_text(session, translator.schema(), view)
        .with_context(|| format!("Failed to read definition of view {}", view))?
        .unwrap_or_default();

    let sql = translator
        .translate(&text)
        .with_context(|| format!("Cannot translate view {}", view))?;

    target::recreate_view(conn, &target_name, &sql)?;
    tracing::info!("Recreated view {} as {}", view, target_name);
    Ok(sql)
}
