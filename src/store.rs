use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

use crate::connector_proto::{
    data_type_params::Params, Column, DataType, DataTypeParams, DecimalParams, Table,
};

/// Errors from the embedded demonstration store. Handlers map these to
/// `{success:false}` responses; they are never allowed to take down the
/// serving process.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("table {schema}.{table} does not exist")]
    MissingTable { schema: String, table: String },
    #[error("column {column} not found in {schema}.{table}")]
    MissingColumn {
        schema: String,
        table: String,
        column: String,
    },
    #[error("invalid timestamp {value:?}")]
    InvalidTimestamp { value: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl StorageError {
    pub fn missing_table(schema: &str, table: &str) -> Self {
        Self::MissingTable {
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }

    pub fn missing_column(schema: &str, table: &str, column: &str) -> Self {
        Self::MissingColumn {
            schema: schema.to_string(),
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}

/// Embedded analytical store used as the demonstration backend. SQLite has
/// no schema namespaces, so tables live under the quoted qualified
/// identifier `"schema.table"`.
pub struct Store {
    path: Option<PathBuf>,
    conn: Connection,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", &"wal")?;
        conn.pragma_update(None, "synchronous", &"normal").ok();
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn,
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            path: None,
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a multi-step alteration atomically: any error rolls the whole
    /// sequence back, leaving the physical table in its pre-call shape.
    pub fn with_transaction<T>(
        &mut self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let tx = self.conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{schema}.{table}")
}

fn quote_ident(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

fn quoted_table(schema: &str, table: &str) -> String {
    quote_ident(&qualified(schema, table))
}

pub fn table_exists(conn: &Connection, schema: &str, table: &str) -> Result<bool, StorageError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [qualified(schema, table)],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn create_table(conn: &Connection, schema: &str, table: &Table) -> Result<(), StorageError> {
    create_table_named(conn, schema, &table.name, &table.columns)
}

pub fn create_table_named(
    conn: &Connection,
    schema: &str,
    name: &str,
    columns: &[Column],
) -> Result<(), StorageError> {
    let mut defs: Vec<String> = columns
        .iter()
        .map(|col| format!("{} {}", quote_ident(&col.name), sql_type(col)))
        .collect();
    let pk: Vec<String> = columns
        .iter()
        .filter(|col| col.primary_key)
        .map(|col| quote_ident(&col.name))
        .collect();
    if !pk.is_empty() {
        defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));
    }
    let sql = format!(
        "CREATE TABLE {} ({})",
        quoted_table(schema, name),
        defs.join(", ")
    );
    conn.execute(&sql, [])?;
    tracing::info!(schema, table = name, "table created");
    Ok(())
}

/// Idempotent: dropping an absent table succeeds, matching at-least-once
/// redelivery expectations.
pub fn drop_table(conn: &Connection, schema: &str, table: &str) -> Result<(), StorageError> {
    let sql = format!("DROP TABLE IF EXISTS {}", quoted_table(schema, table));
    conn.execute(&sql, [])?;
    Ok(())
}

pub fn add_column(
    conn: &Connection,
    schema: &str,
    table: &str,
    column: &Column,
) -> Result<(), StorageError> {
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quoted_table(schema, table),
        quote_ident(&column.name),
        sql_type(column)
    );
    conn.execute(&sql, [])?;
    Ok(())
}

pub fn drop_column(
    conn: &Connection,
    schema: &str,
    table: &str,
    column: &str,
) -> Result<(), StorageError> {
    let sql = format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quoted_table(schema, table),
        quote_ident(column)
    );
    conn.execute(&sql, [])?;
    Ok(())
}

pub fn rename_column(
    conn: &Connection,
    schema: &str,
    table: &str,
    from: &str,
    to: &str,
) -> Result<(), StorageError> {
    let sql = format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quoted_table(schema, table),
        quote_ident(from),
        quote_ident(to)
    );
    conn.execute(&sql, [])?;
    Ok(())
}

pub fn rename_table(
    conn: &Connection,
    schema: &str,
    from: &str,
    to: &str,
) -> Result<(), StorageError> {
    let sql = format!(
        "ALTER TABLE {} RENAME TO {}",
        quoted_table(schema, from),
        quoted_table(schema, to)
    );
    conn.execute(&sql, [])?;
    Ok(())
}

/// Copy rows between structurally compatible tables, restricted to the named
/// columns.
pub fn copy_table_rows(
    conn: &Connection,
    schema: &str,
    from: &str,
    to: &str,
    columns: &[String],
) -> Result<(), StorageError> {
    if columns.is_empty() {
        return Ok(());
    }
    let cols = columns
        .iter()
        .map(|name| quote_ident(name))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({cols}) SELECT {cols} FROM {}",
        quoted_table(schema, to),
        quoted_table(schema, from)
    );
    conn.execute(&sql, [])?;
    Ok(())
}

/// `new_col := old_col` for every row.
pub fn copy_column_values(
    conn: &Connection,
    schema: &str,
    table: &str,
    from: &str,
    to: &str,
) -> Result<(), StorageError> {
    let sql = format!(
        "UPDATE {} SET {} = {}",
        quoted_table(schema, table),
        quote_ident(to),
        quote_ident(from)
    );
    conn.execute(&sql, [])?;
    Ok(())
}

/// Mass update: set every row's value for one column, no predicate.
pub fn update_column_value(
    conn: &Connection,
    schema: &str,
    table: &str,
    column: &str,
    value: &str,
) -> Result<(), StorageError> {
    let sql = format!(
        "UPDATE {} SET {} = ?1",
        quoted_table(schema, table),
        quote_ident(column)
    );
    conn.execute(&sql, [value])?;
    Ok(())
}

pub fn truncate_table(conn: &Connection, schema: &str, table: &str) -> Result<(), StorageError> {
    let sql = format!("DELETE FROM {}", quoted_table(schema, table));
    conn.execute(&sql, [])?;
    Ok(())
}

/// Soft truncate: flag rows deleted instead of removing them. With a synced
/// column and cutoff, only rows synced strictly before the cutoff are
/// flagged.
pub fn soft_truncate(
    conn: &Connection,
    schema: &str,
    table: &str,
    deleted_column: &str,
    cutoff: Option<(&str, DateTime<Utc>)>,
) -> Result<(), StorageError> {
    match cutoff {
        Some((synced_column, before)) => {
            let sql = format!(
                "UPDATE {} SET {} = 1 WHERE {} < ?1",
                quoted_table(schema, table),
                quote_ident(deleted_column),
                quote_ident(synced_column)
            );
            conn.execute(&sql, [before])?;
        }
        None => {
            let sql = format!(
                "UPDATE {} SET {} = 1",
                quoted_table(schema, table),
                quote_ident(deleted_column)
            );
            conn.execute(&sql, [])?;
        }
    }
    Ok(())
}

pub fn delete_flagged_rows(
    conn: &Connection,
    schema: &str,
    table: &str,
    flag_column: &str,
) -> Result<usize, StorageError> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = 1",
        quoted_table(schema, table),
        quote_ident(flag_column)
    );
    Ok(conn.execute(&sql, [])?)
}

/// Rebuild a table to a target definition, copying the named columns across.
/// SQLite cannot change a column's declared type or primary key in place, so
/// type and key changes go through create-copy-swap; callers wrap this in a
/// transaction.
pub fn rebuild_table(
    conn: &Connection,
    schema: &str,
    target: &Table,
    copy_columns: &[String],
) -> Result<(), StorageError> {
    let staging = format!("{}__rebuild", target.name);
    create_table_named(conn, schema, &staging, &target.columns)?;
    copy_table_rows(conn, schema, &target.name, &staging, copy_columns)?;
    drop_table(conn, schema, &target.name)?;
    rename_table(conn, schema, &staging, &target.name)?;
    Ok(())
}

/// Read a table definition back from the store's catalog. Declared types are
/// parsed back into the protocol type model; this is intentionally lossy for
/// types the store folds together (XML, UNSPECIFIED), the registry remains
/// the authoritative metadata.
pub fn describe_table(
    conn: &Connection,
    schema: &str,
    table: &str,
) -> Result<Option<Table>, StorageError> {
    if !table_exists(conn, schema, table)? {
        return Ok(None);
    }
    let mut stmt =
        conn.prepare("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")?;
    let mut rows = stmt.query([qualified(schema, table)])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        let declared: String = row.get(1)?;
        let pk: i64 = row.get(2)?;
        let (data_type, params) = parse_declared_type(&declared);
        columns.push(Column {
            name,
            r#type: data_type as i32,
            primary_key: pk > 0,
            params,
        });
    }
    Ok(Some(Table {
        name: table.to_string(),
        columns,
    }))
}

/// Declared SQL type for a protocol column.
pub fn sql_type(column: &Column) -> String {
    match column.r#type() {
        DataType::Boolean => "BOOLEAN".to_string(),
        DataType::Short => "SMALLINT".to_string(),
        DataType::Int => "INTEGER".to_string(),
        DataType::Long => "BIGINT".to_string(),
        DataType::Decimal => match crate::metadata::decimal_params(column) {
            Some((precision, scale)) => format!("DECIMAL({precision}, {scale})"),
            None => "DECIMAL(38, 10)".to_string(),
        },
        DataType::Float => "REAL".to_string(),
        DataType::Double => "DOUBLE".to_string(),
        DataType::NaiveDate => "DATE".to_string(),
        DataType::NaiveDatetime => "TIMESTAMP".to_string(),
        DataType::UtcDatetime => "TIMESTAMPTZ".to_string(),
        DataType::NaiveTime => "TIME".to_string(),
        DataType::Binary => "BLOB".to_string(),
        DataType::String => match crate::metadata::string_byte_length(column) {
            Some(len) if len > 0 => format!("VARCHAR({len})"),
            _ => "TEXT".to_string(),
        },
        DataType::Json => "JSON".to_string(),
        DataType::Xml | DataType::Unspecified => "TEXT".to_string(),
    }
}

fn parse_declared_type(declared: &str) -> (DataType, Option<DataTypeParams>) {
    let upper = declared.trim().to_uppercase();
    if let Some(rest) = upper.strip_prefix("DECIMAL(") {
        let params = parse_two_args(rest).map(|(precision, scale)| DataTypeParams {
            params: Some(Params::Decimal(DecimalParams { precision, scale })),
        });
        return (DataType::Decimal, params);
    }
    if let Some(rest) = upper.strip_prefix("VARCHAR(") {
        let params = rest
            .trim_end_matches(')')
            .trim()
            .parse::<u32>()
            .ok()
            .map(|len| DataTypeParams {
                params: Some(Params::StringByteLength(len)),
            });
        return (DataType::String, params);
    }
    let data_type = match upper.as_str() {
        "BOOLEAN" => DataType::Boolean,
        "SMALLINT" => DataType::Short,
        "INTEGER" => DataType::Int,
        "BIGINT" => DataType::Long,
        "REAL" => DataType::Float,
        "DOUBLE" => DataType::Double,
        "DATE" => DataType::NaiveDate,
        "TIMESTAMPTZ" => DataType::UtcDatetime,
        "TIMESTAMP" => DataType::NaiveDatetime,
        "TIME" => DataType::NaiveTime,
        "BLOB" => DataType::Binary,
        "JSON" => DataType::Json,
        "TEXT" | "VARCHAR" => DataType::String,
        other => {
            tracing::warn!(declared = other, "unknown declared type, treating as STRING");
            DataType::String
        }
    };
    (data_type, None)
}

fn parse_two_args(rest: &str) -> Option<(u32, u32)> {
    let inner = rest.trim_end_matches(')');
    let mut parts = inner.split(',');
    let first = parts.next()?.trim().parse().ok()?;
    let second = parts.next()?.trim().parse().ok()?;
    Some((first, second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::plain_column;

    fn orders_table() -> Table {
        let mut id = plain_column("id", DataType::Long);
        id.primary_key = true;
        let mut price = plain_column("price", DataType::Decimal);
        price.params = Some(DataTypeParams {
            params: Some(Params::Decimal(DecimalParams {
                precision: 10,
                scale: 2,
            })),
        });
        let mut code = plain_column("code", DataType::String);
        code.params = Some(DataTypeParams {
            params: Some(Params::StringByteLength(16)),
        });
        Table {
            name: "orders".to_string(),
            columns: vec![id, price, code],
        }
    }

    #[test]
    fn create_and_describe_round_trips_types_and_params() {
        let store = Store::open_in_memory().unwrap();
        create_table(store.conn(), "shop", &orders_table()).unwrap();

        let described = describe_table(store.conn(), "shop", "orders")
            .unwrap()
            .unwrap();
        assert_eq!(described.columns.len(), 3);
        assert!(described.columns[0].primary_key);
        assert_eq!(described.columns[0].r#type, DataType::Long as i32);
        assert_eq!(
            crate::metadata::decimal_params(&described.columns[1]),
            Some((10, 2))
        );
        assert_eq!(
            crate::metadata::string_byte_length(&described.columns[2]),
            Some(16)
        );
    }

    #[test]
    fn describe_missing_table_is_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(describe_table(store.conn(), "shop", "nope").unwrap().is_none());
    }

    #[test]
    fn drop_table_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        drop_table(store.conn(), "shop", "ghost").unwrap();
        create_table(store.conn(), "shop", &orders_table()).unwrap();
        drop_table(store.conn(), "shop", "orders").unwrap();
        drop_table(store.conn(), "shop", "orders").unwrap();
        assert!(!table_exists(store.conn(), "shop", "orders").unwrap());
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let mut store = Store::open_in_memory().unwrap();
        create_table(store.conn(), "shop", &orders_table()).unwrap();

        let result = store.with_transaction(|conn| {
            add_column(conn, "shop", "orders", &plain_column("note", DataType::String))?;
            // Second add of the same column fails and must undo the first.
            add_column(conn, "shop", "orders", &plain_column("note", DataType::String))?;
            Ok(())
        });
        assert!(result.is_err());

        let described = describe_table(store.conn(), "shop", "orders")
            .unwrap()
            .unwrap();
        assert_eq!(described.columns.len(), 3);
    }

    #[test]
    fn rebuild_preserves_rows_for_copied_columns() {
        let mut store = Store::open_in_memory().unwrap();
        create_table(store.conn(), "shop", &orders_table()).unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO \"shop.orders\" (id, price, code) VALUES (1, 9.99, 'a'), (2, 1.25, 'b')",
                [],
            )
            .unwrap();

        let mut target = orders_table();
        target.columns[0].r#type = DataType::Int as i32;
        let copy: Vec<String> = target.columns.iter().map(|c| c.name.clone()).collect();
        store
            .with_transaction(|conn| rebuild_table(conn, "shop", &target, &copy))
            .unwrap();

        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM \"shop.orders\"", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
        let described = describe_table(store.conn(), "shop", "orders")
            .unwrap()
            .unwrap();
        assert_eq!(described.columns[0].r#type, DataType::Int as i32);
    }

    #[test]
    fn soft_truncate_respects_cutoff() {
        let store = Store::open_in_memory().unwrap();
        store
            .conn()
            .execute_batch(
                "CREATE TABLE \"shop.events\" (id INTEGER, ts TIMESTAMPTZ, \"_del\" BOOLEAN DEFAULT 0)",
            )
            .unwrap();
        let early = Utc::now() - chrono::Duration::days(2);
        let late = Utc::now();
        store
            .conn()
            .execute(
                "INSERT INTO \"shop.events\" (id, ts, \"_del\") VALUES (1, ?1, 0), (2, ?2, 0)",
                rusqlite::params![early, late],
            )
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(1);
        soft_truncate(store.conn(), "shop", "events", "_del", Some(("ts", cutoff))).unwrap();
        let flagged: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM \"shop.events\" WHERE \"_del\" = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(flagged, 1);

        soft_truncate(store.conn(), "shop", "events", "_del", None).unwrap();
        let flagged: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM \"shop.events\" WHERE \"_del\" = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(flagged, 2);
    }
}
