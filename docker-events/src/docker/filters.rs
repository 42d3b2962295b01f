//! Translation of configured filters into docker event filter arguments.

use std::collections::HashMap;

use crate::{Error, Result};

/// Build the docker `filters` argument from `key=value` strings and event types.
///
/// Event types become `type` filters (lowercased). Blank entries are skipped.
pub fn build_filters(
    raw_filters: &[String],
    event_types: &[String],
) -> Result<HashMap<String, Vec<String>>> {
    let mut filters: HashMap<String, Vec<String>> = HashMap::new();

    for event_type in event_types {
        let event_type = event_type.trim();
        if event_type.is_empty() {
            continue;
        }
        filters
            .entry("type".to_string())
            .or_default()
            .push(event_type.to_lowercase());
    }

    for raw in raw_filters {
        let filter = raw.trim();
        if filter.is_empty() {
            continue;
        }

        let Some((key, value)) = filter.split_once('=') else {
            return Err(invalid_filter(raw));
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(invalid_filter(raw));
        }

        filters
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }

    Ok(filters)
}

fn invalid_filter(raw: &str) -> Error {
    Error::validation(format!(
        "invalid docker filter {:?}, expected key=value",
        raw
    ))
}
