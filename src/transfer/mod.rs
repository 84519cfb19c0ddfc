// ABOUTME: Table copy unit - task definition, outcome and the copy routine
// ABOUTME: One attempt owns its source session and target connection end to end

pub mod converter;

use crate::source::{catalog, ColumnDescriptor, SourceConnector, SourceRow};
use crate::target::{self, TargetDatabase};
use crate::typemap::map_type;
use crate::utils::quote_ident;
use anyhow::{bail, Context, Result};
use converter::{read_value, ColumnValue};

/// Everything needed to copy one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    /// Schema-qualified, quoted source name (`"TEST"."EMP"`)
    pub source_table: String,
    /// Unqualified table name, used for the target and in reports
    pub table: String,
    /// Quoted target name (`"EMP"`)
    pub target_table: String,
    pub select_sql: String,
}

impl TransferTask {
    pub fn new(owner: &str, table: &str, row_limit: Option<usize>) -> Self {
        Self {
            source_table: catalog::qualified_name(owner, table),
            table: table.to_string(),
            target_table: quote_ident(table),
            select_sql: catalog::select_sql(owner, table, row_limit),
        }
    }

    /// CREATE TABLE statement for the described source columns.
    pub fn target_ddl(&self, columns: &[ColumnDescriptor]) -> String {
        let definitions = columns
            .iter()
            .map(|c| {
                format!(
                    "{} {}",
                    quote_ident(&c.name),
                    map_type(c.type_code, c.scale, c.precision)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {} ({})", self.target_table, definitions)
    }
}

/// Final result of one table's copy, after all attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Copied {
        table: String,
        rows: u64,
        attempts: u32,
    },
    Failed {
        table: String,
        /// Condensed message of the last attempt's error
        error: String,
        attempts: u32,
    },
}

impl TransferOutcome {
    pub fn table(&self) -> &str {
        match self {
            TransferOutcome::Copied { table, .. } | TransferOutcome::Failed { table, .. } => table,
        }
    }

    pub fn is_copied(&self) -> bool {
        matches!(self, TransferOutcome::Copied { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            TransferOutcome::Copied { attempts, .. } | TransferOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Run one copy attempt for `task`
///
/// Opens a fresh source session and target connection, recreates the target
/// table from the described columns and streams rows into it in batches of
/// `batch_size`, each batch committed in its own transaction. Both connections
/// are dropped on every exit path.
///
/// # Returns
///
/// Number of rows copied.
pub fn copy_table(
    task: &TransferTask,
    connector: &dyn SourceConnector,
    target_db: &TargetDatabase,
    batch_size: usize,
) -> Result<u64> {
    let batch_size = batch_size.max(1);
    let mut session = connector
        .connect()
        .with_context(|| format!("Failed to connect to source for {}", task.source_table))?;

    let columns = session
        .describe(&task.select_sql)
        .with_context(|| format!("Failed to describe {}", task.source_table))?;
    if columns.is_empty() {
        bail!("{} has no columns", task.source_table);
    }

    let conn = target_db.connect()?;
    target::recreate_table(&conn, &task.table, &task.target_ddl(&columns))?;

    let mut batch: Vec<Vec<ColumnValue>> = Vec::with_capacity(batch_size);
    let mut copied: u64 = 0;

    session
        .query(&task.select_sql, batch_size, &mut |row: &dyn SourceRow| {
            let values = columns
                .iter()
                .map(|column| read_value(column, row))
                .collect::<Result<Vec<_>>>()?;
            batch.push(values);
            if batch.len() >= batch_size {
                target::insert_batch(&conn, &task.table, &batch)?;
                copied += batch.len() as u64;
                tracing::debug!("{}: {} rows copied so far", task.table, copied);
                batch.clear();
            }
            Ok(())
        })
        .with_context(|| format!("Failed to copy rows from {}", task.source_table))?;

    if !batch.is_empty() {
        target::insert_batch(&conn, &task.table, &batch)?;
        copied += batch.len() as u64;
    }

    Ok(copied)
}
