use std::collections::HashMap;

use crate::connector_proto::{value_type::Inner, Record, RecordType, ValueType};

pub fn null_value() -> ValueType {
    ValueType {
        inner: Some(Inner::Null(true)),
    }
}

pub fn long_value(value: i64) -> ValueType {
    ValueType {
        inner: Some(Inner::Long(value)),
    }
}

pub fn double_value(value: f64) -> ValueType {
    ValueType {
        inner: Some(Inner::Double(value)),
    }
}

pub fn string_value(value: impl Into<String>) -> ValueType {
    ValueType {
        inner: Some(Inner::String(value.into())),
    }
}

/// Build a change record for `table` with the given operation and column data.
pub fn record(
    table: &str,
    record_type: RecordType,
    data: impl IntoIterator<Item = (&'static str, ValueType)>,
) -> Record {
    let data: HashMap<String, ValueType> = data
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();
    Record {
        table_name: table.to_string(),
        r#type: record_type as i32,
        data,
    }
}
