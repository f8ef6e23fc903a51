//! Schema catalog access used to build the filtered table copies.

use crate::config::DatabaseTarget;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::future::Future;

const COLUMNS_QUERY: &str = "SELECT column_name::text \
     FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 \
     ORDER BY ordinal_position";

/// The database operations the dumper needs besides `pg_dump` itself.
pub trait SchemaCatalog: Send {
    /// Column names of `schema.table` in ordinal order. Empty if the table
    /// does not exist.
    fn table_columns(
        &mut self,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = Result<Vec<String>, sqlx::Error>> + Send;

    /// Run a single statement that returns no rows.
    fn execute(&mut self, statement: &str) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

/// A single PostgreSQL connection to the target database.
pub struct PgCatalog {
    conn: PgConnection,
}

impl PgCatalog {
    pub async fn connect(target: &DatabaseTarget) -> Result<Self, sqlx::Error> {
        let options = PgConnectOptions::new()
            .host(&target.host)
            .port(target.port)
            .username(&target.user)
            .password(target.password.expose())
            .database(&target.name)
            .application_name("tg-backup");

        let conn = PgConnection::connect_with(&options).await?;
        Ok(Self { conn })
    }

    pub async fn close(self) -> Result<(), sqlx::Error> {
        self.conn.close().await
    }
}

impl SchemaCatalog for PgCatalog {
    async fn table_columns(&mut self, schema: &str, table: &str) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(COLUMNS_QUERY)
            .bind(schema)
            .bind(table)
            .fetch_all(&mut self.conn)
            .await
    }

    async fn execute(&mut self, statement: &str) -> Result<(), sqlx::Error> {
        sqlx::query(statement).execute(&mut self.conn).await?;
        Ok(())
    }
}

/// Quote an identifier for PostgreSQL, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Name of the filtered copy of `table`.
pub fn temp_table_name(table: &str) -> String {
    format!("{table}_temp")
}

/// Statements that (re)create the filtered copy of `schema.table`.
pub fn temp_table_statements(schema: &str, table: &str, columns: &[String]) -> [String; 2] {
    let temp = format!("{}.{}", quote_ident(schema), quote_ident(&temp_table_name(table)));
    let source = format!("{}.{}", quote_ident(schema), quote_ident(table));
    let projection = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    [
        format!("DROP TABLE IF EXISTS {temp}"),
        format!("CREATE TABLE {temp} AS SELECT {projection} FROM {source}"),
    ]
}

/// Statement that removes the filtered copy of `schema.table`.
pub fn drop_temp_table_statement(schema: &str, table: &str) -> String {
    format!(
        "DROP TABLE IF EXISTS {}.{}",
        quote_ident(schema),
        quote_ident(&temp_table_name(table))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_temp_table_statements() {
        let columns = vec!["id".to_string(), "total".to_string()];
        let [drop, create] = temp_table_statements("public", "orders", &columns);
        assert_eq!(drop, "DROP TABLE IF EXISTS \"public\".\"orders_temp\"");
        assert_eq!(
            create,
            "CREATE TABLE \"public\".\"orders_temp\" AS SELECT \"id\", \"total\" FROM \"public\".\"orders\""
        );
    }

    #[test]
    fn test_drop_statement_matches_created_table() {
        assert_eq!(
            drop_temp_table_statement("sales", "orders"),
            "DROP TABLE IF EXISTS \"sales\".\"orders_temp\""
        );
    }
}
