//! Exclusion-aware database dumps.
//!
//! `pg_dump` can only leave out whole tables. To drop individual columns,
//! every table named in an exclusion rule gets a `<table>_temp` copy holding
//! only the retained columns; the dump then excludes the original table and
//! picks up the copy. The copies are dropped again whatever the dump's
//! outcome.

pub mod catalog;
pub mod plan;
pub mod tool;

use crate::config::DatabaseTarget;
use crate::utils::errors::DumpError;
use catalog::{drop_temp_table_statement, temp_table_statements, PgCatalog, SchemaCatalog};
use plan::{retain_columns, ExclusionPlan};
use std::future::Future;
use std::path::{Path, PathBuf};
use tool::{DumpTool, PgDumpTool};
use tracing::{info, warn};

/// Writes a dump of one database target to a file.
pub trait DatabaseDumper: Send + Sync {
    fn dump(
        &self,
        target: &DatabaseTarget,
        output: &Path,
    ) -> impl Future<Output = Result<(), DumpError>> + Send;
}

/// PostgreSQL dumper backed by a catalog connection and `pg_dump`.
#[derive(Debug, Clone)]
pub struct PgDumper {
    tool: PgDumpTool,
}

impl PgDumper {
    pub fn new(pg_dump_path: impl Into<PathBuf>) -> Self {
        Self {
            tool: PgDumpTool::new(pg_dump_path),
        }
    }
}

impl DatabaseDumper for PgDumper {
    async fn dump(&self, target: &DatabaseTarget, output: &Path) -> Result<(), DumpError> {
        let plan = ExclusionPlan::from_rules(&target.exclude);
        if plan.is_empty() {
            return self.tool.dump(target, &[], output).await;
        }

        let mut catalog = PgCatalog::connect(target).await.map_err(DumpError::Connect)?;
        let result = dump_with_exclusions(&mut catalog, &self.tool, target, &plan, output).await;

        if let Err(e) = catalog.close().await {
            warn!(database = %target.label(), error = %e, "Failed to close catalog connection");
        }
        result
    }
}

/// Run the exclusion algorithm against an open catalog.
pub async fn dump_with_exclusions<C, T>(
    catalog: &mut C,
    tool: &T,
    target: &DatabaseTarget,
    plan: &ExclusionPlan,
    output: &Path,
) -> Result<(), DumpError>
where
    C: SchemaCatalog,
    T: DumpTool,
{
    let mut projections = Vec::with_capacity(plan.len());
    for exclusion in plan.tables() {
        let columns = catalog
            .table_columns(&target.schema, &exclusion.table)
            .await
            .map_err(|source| DumpError::SchemaIntrospection {
                table: exclusion.table.clone(),
                source,
            })?;

        if columns.is_empty() {
            return Err(DumpError::SchemaIntrospection {
                table: exclusion.table.clone(),
                source: sqlx::Error::RowNotFound,
            });
        }

        let retained = retain_columns(columns, &exclusion.columns);
        projections.push((exclusion.table.as_str(), retained));
    }

    let mut created = Vec::with_capacity(projections.len());
    let mut result = Ok(());
    for (table, columns) in &projections {
        if let Err(source) = prepare_temp_table(catalog, &target.schema, table, columns).await {
            result = Err(DumpError::TempTablePreparation {
                table: table.to_string(),
                source,
            });
            break;
        }
        info!(
            database = %target.label(),
            table,
            retained_columns = columns.len(),
            "Prepared filtered table copy"
        );
        created.push(*table);
    }

    if result.is_ok() {
        result = tool.dump(target, &plan.table_names(), output).await;
    }

    for table in created {
        let statement = drop_temp_table_statement(&target.schema, table);
        if let Err(e) = catalog.execute(&statement).await {
            warn!(
                database = %target.label(),
                table,
                error = %e,
                "Failed to drop temporary table"
            );
        }
    }

    result
}

async fn prepare_temp_table<C: SchemaCatalog>(
    catalog: &mut C,
    schema: &str,
    table: &str,
    columns: &[String],
) -> Result<(), sqlx::Error> {
    for statement in temp_table_statements(schema, table, columns) {
        catalog.execute(&statement).await?;
    }
    Ok(())
}
