use std::collections::HashMap;

use crate::connector_proto::{data_type_params::Params, Column, DataType, Table};

/// History-mode system columns. A history table always carries exactly this
/// triple; live and soft-delete tables never carry it as a group.
pub const HISTORY_START: &str = "_fivetran_start";
pub const HISTORY_END: &str = "_fivetran_end";
pub const HISTORY_ACTIVE: &str = "_fivetran_active";

/// Derived table layout: live rows only, flagged deletes, or full row history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMode {
    Live,
    SoftDelete,
    History,
}

/// In-memory table metadata, keyed schema -> table name. The registry is the
/// sole writer of `Table` values; handlers share it behind one mutex so DDL
/// and migration operations serialize per process.
#[derive(Debug, Default)]
pub struct TableRegistry {
    schemas: HashMap<String, HashMap<String, Table>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, schema: &str, table: &str) -> Option<&Table> {
        self.schemas.get(schema)?.get(table)
    }

    pub fn insert(&mut self, schema: &str, table: Table) {
        self.schemas
            .entry(schema.to_string())
            .or_default()
            .insert(table.name.clone(), table);
    }

    pub fn remove(&mut self, schema: &str, table: &str) -> Option<Table> {
        self.schemas.get_mut(schema)?.remove(table)
    }

    pub fn rename(&mut self, schema: &str, from: &str, to: &str) {
        if let Some(mut table) = self.remove(schema, from) {
            table.name = to.to_string();
            self.insert(schema, table);
        }
    }

    pub fn contains(&self, schema: &str, table: &str) -> bool {
        self.get(schema, table).is_some()
    }
}

/// Structural clone of a table definition under a new name. This is a plain
/// deep copy of the in-memory value; wire serialization plays no part in it.
pub fn table_copy(table: &Table, new_name: &str) -> Table {
    let mut copy = table.clone();
    copy.name = new_name.to_string();
    copy
}

pub fn find_column<'a>(table: &'a Table, name: &str) -> Option<&'a Column> {
    table.columns.iter().find(|col| col.name == name)
}

pub fn remove_column(table: &mut Table, name: &str) {
    if name.is_empty() {
        return;
    }
    table.columns.retain(|col| col.name != name);
}

pub fn history_columns() -> Vec<Column> {
    vec![
        plain_column(HISTORY_START, DataType::UtcDatetime),
        plain_column(HISTORY_END, DataType::UtcDatetime),
        plain_column(HISTORY_ACTIVE, DataType::Boolean),
    ]
}

pub fn add_history_columns(table: &mut Table) {
    for col in history_columns() {
        if find_column(table, &col.name).is_none() {
            table.columns.push(col);
        }
    }
}

pub fn remove_history_columns(table: &mut Table) {
    table
        .columns
        .retain(|col| ![HISTORY_START, HISTORY_END, HISTORY_ACTIVE].contains(&col.name.as_str()));
}

pub fn add_soft_delete_column(table: &mut Table, name: &str) {
    if name.is_empty() || find_column(table, name).is_some() {
        return;
    }
    table.columns.push(plain_column(name, DataType::Boolean));
}

pub fn has_history_columns(table: &Table) -> bool {
    [HISTORY_START, HISTORY_END, HISTORY_ACTIVE]
        .iter()
        .all(|name| find_column(table, name).is_some())
}

/// Derive the table mode. Soft-delete layout is only recognizable when the
/// designated flag column is known, so callers pass it as a hint.
pub fn table_mode(table: &Table, soft_deleted_column: Option<&str>) -> TableMode {
    if has_history_columns(table) {
        return TableMode::History;
    }
    match soft_deleted_column {
        Some(name) if !name.is_empty() && find_column(table, name).is_some() => {
            TableMode::SoftDelete
        }
        _ => TableMode::Live,
    }
}

/// Type equality as the protocol defines it: base type, plus DECIMAL
/// precision/scale, plus STRING byte length.
pub fn types_equal(a: &Column, b: &Column) -> bool {
    if a.r#type != b.r#type {
        return false;
    }
    match a.r#type() {
        DataType::Decimal => decimal_params(a) == decimal_params(b),
        DataType::String => string_byte_length(a) == string_byte_length(b),
        _ => true,
    }
}

pub fn decimal_params(col: &Column) -> Option<(u32, u32)> {
    match col.params.as_ref()?.params.as_ref()? {
        Params::Decimal(params) => Some((params.precision, params.scale)),
        _ => None,
    }
}

pub fn string_byte_length(col: &Column) -> Option<u32> {
    match col.params.as_ref()?.params.as_ref()? {
        Params::StringByteLength(len) => Some(*len),
        _ => None,
    }
}

pub fn plain_column(name: &str, data_type: DataType) -> Column {
    Column {
        name: name.to_string(),
        r#type: data_type as i32,
        primary_key: false,
        params: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector_proto::{DataTypeParams, DecimalParams};

    fn demo_table() -> Table {
        Table {
            name: "orders".to_string(),
            columns: vec![
                Column {
                    primary_key: true,
                    ..plain_column("id", DataType::Long)
                },
                plain_column("amount", DataType::Double),
            ],
        }
    }

    #[test]
    fn registry_insert_get_remove() {
        let mut registry = TableRegistry::new();
        registry.insert("shop", demo_table());
        assert!(registry.contains("shop", "orders"));
        assert!(!registry.contains("other", "orders"));

        registry.rename("shop", "orders", "orders_v2");
        assert!(!registry.contains("shop", "orders"));
        assert_eq!(registry.get("shop", "orders_v2").unwrap().name, "orders_v2");

        assert!(registry.remove("shop", "orders_v2").is_some());
        assert!(registry.remove("shop", "orders_v2").is_none());
    }

    #[test]
    fn table_copy_is_structural_and_independent() {
        let original = demo_table();
        let mut copy = table_copy(&original, "orders_copy");
        copy.columns.push(plain_column("extra", DataType::Int));
        assert_eq!(copy.name, "orders_copy");
        assert_eq!(original.columns.len(), 2);
        assert_eq!(copy.columns.len(), 3);
    }

    #[test]
    fn history_transition_adds_exactly_the_triple() {
        let mut table = demo_table();
        add_history_columns(&mut table);
        assert_eq!(table.columns.len(), 5);
        assert_eq!(table_mode(&table, None), TableMode::History);
        // Reapplying is a no-op.
        add_history_columns(&mut table);
        assert_eq!(table.columns.len(), 5);

        remove_history_columns(&mut table);
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table_mode(&table, None), TableMode::Live);
    }

    #[test]
    fn soft_delete_mode_requires_the_flag_column() {
        let mut table = demo_table();
        assert_eq!(table_mode(&table, Some("_deleted")), TableMode::Live);
        add_soft_delete_column(&mut table, "_deleted");
        assert_eq!(table_mode(&table, Some("_deleted")), TableMode::SoftDelete);
    }

    #[test]
    fn decimal_equality_compares_precision_and_scale() {
        let mut a = plain_column("price", DataType::Decimal);
        a.params = Some(DataTypeParams {
            params: Some(Params::Decimal(DecimalParams {
                precision: 10,
                scale: 2,
            })),
        });
        let mut b = a.clone();
        assert!(types_equal(&a, &b));
        b.params = Some(DataTypeParams {
            params: Some(Params::Decimal(DecimalParams {
                precision: 12,
                scale: 2,
            })),
        });
        assert!(!types_equal(&a, &b));
    }

    #[test]
    fn string_equality_compares_byte_length() {
        let a = plain_column("code", DataType::String);
        let mut b = a.clone();
        b.params = Some(DataTypeParams {
            params: Some(Params::StringByteLength(32)),
        });
        assert!(!types_equal(&a, &b));
    }
}
