// ABOUTME: Post-run reconciliation of source and target object state
// ABOUTME: Renders a fixed-width text report; per-entity failures become cells, never errors

use crate::filters::NameFilter;
use crate::source::{catalog, SchemaObjectSet, SequenceDescriptor, SourceConnector, SourceSession};
use crate::target::{self, TargetDatabase};
use crate::utils::{condense_error, normalize_message, truncate_chars, REPORT_MESSAGE_LIMIT};
use crate::views::target_view_name;
use duckdb::Connection;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;

const REPORT_HEADER: &str = "==================== MIGRATION REPORT ====================";
const REPORT_FOOTER: &str = "==========================================================";

/// Catalog columns that may carry a sequence's current value, most specific first.
pub const SEQUENCE_VALUE_COLUMNS: &[&str] = &[
    "CURRENT_VALUE",
    "VALUE",
    "LAST_VALUE",
    "BASE_VALUE",
    "START_VALUE",
    "START_WITH",
];

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metric {
    Value(Decimal),
    /// Object was excluded by the blacklist
    Skipped,
    /// Lookup failed; holds a condensed reason
    Error(String),
}

impl Metric {
    fn value(&self) -> Option<Decimal> {
        match self {
            Metric::Value(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Value(v) => f.write_str(&format_number(*v)),
            Metric::Skipped => f.write_str("-"),
            Metric::Error(reason) => write!(f, "ERR: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityStatus {
    Match,
    /// Target minus source, never zero
    Delta(Decimal),
    Skipped,
    /// `ERROR`, or `ERROR: <reason>` when a reason is shown inline
    Error(Option<String>),
    Migrated,
    Missing,
}

impl EntityStatus {
    /// Status of a numeric comparison between both sides.
    pub fn compare(source: &Metric, target: &Metric) -> Self {
        match (source.value(), target.value()) {
            (Some(s), Some(t)) => {
                let diff = t - s;
                if diff.is_zero() {
                    EntityStatus::Match
                } else {
                    EntityStatus::Delta(diff)
                }
            }
            _ => EntityStatus::Error(None),
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityStatus::Match => f.write_str("MATCH"),
            EntityStatus::Delta(d) if d.is_sign_positive() => write!(f, "+{}", format_number(*d)),
            EntityStatus::Delta(d) => f.write_str(&format_number(*d)),
            EntityStatus::Skipped => f.write_str("SKIPPED"),
            EntityStatus::Error(None) => f.write_str("ERROR"),
            EntityStatus::Error(Some(reason)) => write!(f, "ERROR: {}", reason),
            EntityStatus::Migrated => f.write_str("MIGRATED"),
            EntityStatus::Missing => f.write_str("MISSING"),
        }
    }
}

/// One line of the report. Views carry no metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationRow {
    pub entity: String,
    pub source: Option<Metric>,
    pub target: Option<Metric>,
    pub status: EntityStatus,
}

impl ReconciliationRow {
    fn skipped(entity: &str, with_metrics: bool) -> Self {
        Self {
            entity: entity.to_string(),
            source: with_metrics.then_some(Metric::Skipped),
            target: with_metrics.then_some(Metric::Skipped),
            status: EntityStatus::Skipped,
        }
    }

    fn compared(entity: &str, source: Metric, target: Metric) -> Self {
        let status = EntityStatus::compare(&source, &target);
        Self {
            entity: entity.to_string(),
            source: Some(source),
            target: Some(target),
            status,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub tables: Vec<ReconciliationRow>,
    pub views: Vec<ReconciliationRow>,
    pub sequences: Vec<ReconciliationRow>,
}

impl ReconciliationReport {
    pub fn table(&self, name: &str) -> Option<&ReconciliationRow> {
        find_row(&self.tables, name)
    }

    pub fn view(&self, name: &str) -> Option<&ReconciliationRow> {
        find_row(&self.views, name)
    }

    pub fn sequence(&self, name: &str) -> Option<&ReconciliationRow> {
        find_row(&self.sequences, name)
    }

    /// Render the fixed-width text form.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(REPORT_HEADER);
        out.push_str("\n\n");
        out.push_str(&render_section(
            "Tables",
            &["Table", "Source Rows", "Target Rows", "Status"],
            &self.tables,
        ));
        out.push('\n');
        out.push_str(&render_section("Views", &["View", "Status"], &self.views));
        out.push('\n');
        out.push_str(&render_section(
            "Sequences",
            &["Sequence", "Source Max", "Target Max", "Status"],
            &self.sequences,
        ));
        out.push_str(REPORT_FOOTER);
        out
    }
}

impl fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn find_row<'a>(rows: &'a [ReconciliationRow], name: &str) -> Option<&'a ReconciliationRow> {
    rows.iter().find(|r| r.entity.eq_ignore_ascii_case(name))
}

/// Strip trailing zeros; zero renders as `0`.
pub fn format_number(value: Decimal) -> String {
    if value.is_zero() {
        return "0".to_string();
    }
    value.normalize().to_string()
}

fn render_section(title: &str, headers: &[&str], rows: &[ReconciliationRow]) -> String {
    let columns = headers.len();
    let mut cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            let mut line = vec![row.entity.clone()];
            if columns == 4 {
                line.push(row.source.as_ref().map(Metric::to_string).unwrap_or_default());
                line.push(row.target.as_ref().map(Metric::to_string).unwrap_or_default());
            }
            line.push(row.status.to_string());
            line
        })
        .collect();
    if cells.is_empty() {
        let mut placeholder = vec!["(none)".to_string()];
        placeholder.extend(std::iter::repeat("-".to_string()).take(columns - 1));
        cells.push(placeholder);
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for line in &cells {
        for (width, cell) in widths.iter_mut().zip(line) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let rule = format!(
        "+{}+",
        widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+")
    );
    let format_line = |line: &[String]| -> String {
        let mut text = String::from("|");
        for (cell, width) in line.iter().zip(&widths) {
            text.push_str(&format!(" {:<width$} |", cell, width = *width));
        }
        text
    };
    let header: Vec<String> = headers.iter().map(|h| h.to_string()).collect();

    let mut out = format!("{}\n{}\n{}\n{}\n", title, rule, format_line(&header), rule);
    for line in &cells {
        out.push_str(&format_line(line));
        out.push('\n');
    }
    out.push_str(&rule);
    out.push('\n');
    out
}

/// Compares source and target after a run.
pub struct ReconciliationReporter<'a> {
    connector: &'a dyn SourceConnector,
    target: &'a TargetDatabase,
    schema: &'a str,
    blacklist: &'a NameFilter,
    failed_tables: HashMap<String, String>,
    failed_views: HashMap<String, String>,
}

impl<'a> ReconciliationReporter<'a> {
    pub fn new(
        connector: &'a dyn SourceConnector,
        target: &'a TargetDatabase,
        schema: &'a str,
        blacklist: &'a NameFilter,
    ) -> Self {
        Self {
            connector,
            target,
            schema,
            blacklist,
            failed_tables: HashMap::new(),
            failed_views: HashMap::new(),
        }
    }

    /// Tables whose copy failed this run, as `(table, error)` pairs.
    pub fn with_failed_tables<I>(mut self, failures: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.failed_tables.extend(
            failures
                .into_iter()
                .map(|(name, error)| (name.to_uppercase(), error)),
        );
        self
    }

    /// Views that could not be recreated this run, as `(view, error)` pairs.
    pub fn with_failed_views<I>(mut self, failures: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.failed_views.extend(
            failures
                .into_iter()
                .map(|(name, error)| (name.to_uppercase(), error)),
        );
        self
    }

    /// Build the report for every discovered object
    ///
    /// Blacklisted objects appear as `SKIPPED`. Objects that failed during
    /// the run appear as `ERROR` whatever the counts say. Failing lookups only
    /// affect their own row, so building a report never fails.
    pub fn build_report(&self, objects: &SchemaObjectSet) -> ReconciliationReport {
        let mut session: Option<Box<dyn SourceSession>> = None;
        let conn = self.target.connect().map_err(|e| condense(&e));

        let mut tables = objects.tables.clone();
        sort_names(&mut tables);
        let tables = tables
            .iter()
            .map(|table| {
                if self.blacklist.is_excluded(table) {
                    return ReconciliationRow::skipped(table, true);
                }
                let source = self.source_count(&mut session, table);
                let target = match conn.as_ref() {
                    Ok(conn) => metric(target::count_rows(conn, table)),
                    Err(reason) => Metric::Error(reason.clone()),
                };
                let mut row = ReconciliationRow::compared(table, source, target);
                if let Some(error) = self.failed_tables.get(&table.to_uppercase()) {
                    row.status = EntityStatus::Error(Some(report_reason(error)));
                }
                row
            })
            .collect();

        let mut views = objects.views.clone();
        sort_names(&mut views);
        let views = views
            .iter()
            .map(|view| {
                if self.blacklist.is_excluded(view) {
                    return ReconciliationRow::skipped(view, false);
                }
                let status = match (self.failed_views.get(&view.to_uppercase()), conn.as_ref()) {
                    (Some(error), _) => EntityStatus::Error(Some(report_reason(error))),
                    (None, Ok(conn)) => match target::view_exists(conn, &target_view_name(view)) {
                        Ok(true) => EntityStatus::Migrated,
                        Ok(false) => EntityStatus::Missing,
                        Err(e) => EntityStatus::Error(Some(condense(&e))),
                    },
                    (None, Err(reason)) => EntityStatus::Error(Some(reason.clone())),
                };
                ReconciliationRow {
                    entity: view.clone(),
                    source: None,
                    target: None,
                    status,
                }
            })
            .collect();

        let mut sequences: Vec<&SequenceDescriptor> = objects.sequences.iter().collect();
        sequences.sort_by_key(|s| s.name.to_uppercase());
        let value_columns = conn
            .as_ref()
            .ok()
            .map(|c| sequence_value_columns(c).map_err(|e| condense(&e)));
        let sequences = sequences
            .into_iter()
            .map(|sequence| {
                if self.blacklist.is_excluded(&sequence.name) {
                    return ReconciliationRow::skipped(&sequence.name, true);
                }
                let source = Metric::Value(sequence.last_number);
                let target = match (conn.as_ref(), value_columns.as_ref()) {
                    (Ok(conn), Some(Ok(columns))) => target_sequence_value(conn, &sequence.name, columns),
                    (_, Some(Err(reason))) => Metric::Error(reason.clone()),
                    (Err(reason), _) => Metric::Error(reason.clone()),
                    (Ok(_), None) => Metric::Error("VALUE NOT AVAILABLE".to_string()),
                };
                ReconciliationRow::compared(&sequence.name, source, target)
            })
            .collect();

        ReconciliationReport {
            tables,
            views,
            sequences,
        }
    }

    /// Count source rows, opening a session when none is held.
    ///
    /// A failed count discards the session so the next table starts on a
    /// fresh one.
    fn source_count(&self, session: &mut Option<Box<dyn SourceSession>>, table: &str) -> Metric {
        let active = match session {
            Some(active) => active,
            None => match self.connector.connect() {
                Ok(fresh) => session.insert(fresh),
                Err(e) => return Metric::Error(condense(&e)),
            },
        };
        match catalog::count_rows(active.as_mut(), self.schema, table) {
            Ok(count) => Metric::Value(count),
            Err(e) => {
                tracing::debug!("Dropping source session after failed count of {}", table);
                *session = None;
                Metric::Error(condense(&e))
            }
        }
    }
}

/// Catalog columns present in this DuckDB build, in priority order.
fn sequence_value_columns(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let available = target::sequence_catalog_columns(conn)?;
    Ok(SEQUENCE_VALUE_COLUMNS
        .iter()
        .filter_map(|wanted| {
            available
                .iter()
                .find(|column| column.eq_ignore_ascii_case(wanted))
                .cloned()
        })
        .collect())
}

fn target_sequence_value(conn: &Connection, name: &str, columns: &[String]) -> Metric {
    match target::sequence_catalog_values(conn, name, columns) {
        Ok(None) => Metric::Error("NOT FOUND".to_string()),
        Ok(Some(values)) => match values.into_iter().flatten().next() {
            Some(value) => Metric::Value(value),
            None => Metric::Error("VALUE NOT AVAILABLE".to_string()),
        },
        Err(e) => Metric::Error(condense(&e)),
    }
}

fn metric(result: anyhow::Result<Decimal>) -> Metric {
    match result {
        Ok(value) => Metric::Value(value),
        Err(e) => Metric::Error(condense(&e)),
    }
}

fn condense(err: &anyhow::Error) -> String {
    condense_error(err, REPORT_MESSAGE_LIMIT)
}

fn report_reason(message: &str) -> String {
    truncate_chars(&normalize_message(message), REPORT_MESSAGE_LIMIT).to_string()
}

fn sort_names(names: &mut [String]) {
    names.sort_by_key(|n| n.to_uppercase());
}
