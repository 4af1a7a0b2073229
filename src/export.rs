//! JSON export of a loaded store.
//!
//! Writes every stored value, in insertion order, as one JSON document that
//! a plotting or reporting layer can read without this crate.
//!
//! ```text
//! DataManager → export_json() → { "entries": [ {directory, field, units, values}, ... ] }
//! ```

use std::io::Write;

use serde_json::{Value, json};

use crate::model::{DataValue, StoreKey};
use crate::store::DataManager;
use crate::Result;

/// Export the store as a JSON document.
///
/// With `masked`, values are read through [`DataManager::get_masked`];
/// otherwise the raw stored arrays are written. Reduction masks are
/// included like any other entry.
pub fn export_json(manager: &DataManager, writer: &mut dyn Write, masked: bool) -> Result<()> {
    let mut entries = Vec::with_capacity(manager.len());
    for key in manager.keys() {
        let entry = if masked {
            let value = manager.get_masked(&key.directory, &key.field)?;
            format_entry(key, &value)
        } else {
            format_entry(key, manager.get_key(key)?)
        };
        entries.push(entry);
    }

    let document = json!({
        "directories": manager.directory_keys().len(),
        "masked": masked,
        "entries": entries,
    });
    serde_json::to_writer_pretty(&mut *writer, &document)?;
    writeln!(writer)?;
    tracing::debug!(entries = manager.len(), masked, "exported store");
    Ok(())
}

fn format_entry(key: &StoreKey, value: &DataValue) -> Value {
    let field = match key.field.parts() {
        [single] => Value::String(single.clone()),
        parts => Value::Array(parts.iter().cloned().map(Value::String).collect()),
    };
    let mut entry = value.to_json(false);
    if let Value::Object(map) = &mut entry {
        map.insert("directory".into(), Value::String(key.directory.to_string()));
        map.insert("field".into(), field);
        map.insert("label".into(), Value::String(value.data_label().to_owned()));
        map.insert("kind".into(), json!(value.kind()));
    }
    entry
}
