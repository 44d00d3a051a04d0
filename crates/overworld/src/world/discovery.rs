use std::fs;
use std::io;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

/// True for an object with a non-empty string `id` and a non-empty `layers`
/// list whose entries all carry a `tiles` list. The layout file and other
/// metadata JSON living beside the maps fail this check.
pub fn is_map_definition(value: &Value) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    let has_id = object
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.trim().is_empty());
    let layers_ok = object
        .get("layers")
        .and_then(Value::as_array)
        .is_some_and(|layers| {
            !layers.is_empty()
                && layers
                    .iter()
                    .all(|layer| layer.get("tiles").is_some_and(Value::is_array))
        });
    has_id && layers_ok
}

/// Sorted file stems of every map definition in `maps_dir`. A missing
/// directory lists nothing.
pub fn list_map_ids(maps_dir: &Path) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(maps_dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error),
    };

    let mut ids = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let parsed = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok());
        match parsed {
            Some(value) if is_map_definition(&value) => ids.push(stem.to_string()),
            _ => debug!(path = %path.display(), "map_discovery_skipped"),
        }
    }
    ids.sort();
    Ok(ids)
}
