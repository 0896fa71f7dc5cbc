//! Decode boundary between loosely-typed backend rows and the entities in
//! [`crate::models`]. A drifted row shape fails fast with [`Error::Decode`]
//! naming the relation, instead of letting a partial row travel further.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

/// Decode one row from `table`.
pub fn row<T: DeserializeOwned>(table: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|source| Error::Decode {
        table: table.to_string(),
        source,
    })
}

/// Decode a result set from `table`. Fails on the first bad row.
pub fn rows<T: DeserializeOwned>(table: &str, values: Vec<Value>) -> Result<Vec<T>> {
    values.into_iter().map(|value| row(table, value)).collect()
}
