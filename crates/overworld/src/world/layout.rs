//! The world layout file: where each map sits in world space, in tiles.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::atomic_io::write_document;
use crate::config::LAYOUT_SNAP_STEP;
use crate::ErrorClass;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutPos {
    pub x: i32,
    pub y: i32,
}

impl LayoutPos {
    /// Rounds a dragged position to the layout grid.
    pub fn snapped(x: f64, y: f64) -> Self {
        let step = f64::from(LAYOUT_SNAP_STEP.max(1));
        Self {
            x: ((x / step).round() * step) as i32,
            y: ((y / step).round() * step) as i32,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldLayout {
    pub maps: BTreeMap<String, LayoutPos>,
}

impl WorldLayout {
    pub fn position(&self, map_id: &str) -> Option<LayoutPos> {
        self.maps.get(map_id).copied()
    }
}

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("{path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}: {}", .problems.join("; "))]
    Validation { path: PathBuf, problems: Vec<String> },
}

impl LayoutError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Parse { .. } => ErrorClass::Parse,
            Self::Io { .. } => ErrorClass::Io,
            Self::Validation { .. } => ErrorClass::Validation,
        }
    }
}

/// A missing file is an empty layout; anything else must be well formed.
pub fn load_layout(path: &Path) -> Result<WorldLayout, LayoutError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "layout_missing");
            return Ok(WorldLayout::default());
        }
        Err(source) => {
            return Err(LayoutError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let value: Value = serde_json::from_str(&raw).map_err(|source| LayoutError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let layout = parse_layout(&value).map_err(|problems| LayoutError::Validation {
        path: path.to_path_buf(),
        problems,
    })?;
    debug!(path = %path.display(), maps = layout.maps.len(), "layout_loaded");
    Ok(layout)
}

pub fn save_layout(path: &Path, layout: &WorldLayout) -> Result<(), LayoutError> {
    let problems: Vec<String> = layout
        .maps
        .keys()
        .filter(|id| id.trim().is_empty())
        .map(|_| "map ids must be non-empty strings".to_string())
        .collect();
    if !problems.is_empty() {
        return Err(LayoutError::Validation {
            path: path.to_path_buf(),
            problems,
        });
    }

    let text = serde_json::to_string_pretty(layout).map_err(|source| LayoutError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    write_document(path, &text).map_err(|source| LayoutError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), maps = layout.maps.len(), "layout_saved");
    Ok(())
}

/// Collects every shape problem rather than stopping at the first.
fn parse_layout(value: &Value) -> Result<WorldLayout, Vec<String>> {
    let Some(root) = value.as_object() else {
        return Err(vec!["layout must be a JSON object".to_string()]);
    };
    let entries = match root.get("maps") {
        None => return Ok(WorldLayout::default()),
        Some(Value::Object(entries)) => entries,
        Some(_) => return Err(vec!["\"maps\" must be an object".to_string()]),
    };

    let mut problems = Vec::new();
    let mut layout = WorldLayout::default();
    for (map_id, entry) in entries {
        if map_id.trim().is_empty() {
            problems.push("map ids must be non-empty strings".to_string());
            continue;
        }
        let Some(fields) = entry.as_object() else {
            problems.push(format!("entry for '{map_id}' must be an object"));
            continue;
        };
        let x = coordinate(map_id, "x", fields.get("x"), &mut problems);
        let y = coordinate(map_id, "y", fields.get("y"), &mut problems);
        if let (Some(x), Some(y)) = (x, y) {
            layout.maps.insert(map_id.clone(), LayoutPos { x, y });
        }
    }

    if problems.is_empty() {
        Ok(layout)
    } else {
        Err(problems)
    }
}

/// Integers, whole floats and numeric strings are accepted.
fn coordinate(map_id: &str, axis: &str, raw: Option<&Value>, problems: &mut Vec<String>) -> Option<i32> {
    let Some(raw) = raw else {
        problems.push(format!("'{map_id}' is missing {axis}"));
        return None;
    };
    let whole = match raw {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|v| v.fract() == 0.0).map(|v| v as i64)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && v.fract() == 0.0)
                    .map(|v| v as i64)
            })
        }
        _ => None,
    };
    match whole.and_then(|v| i32::try_from(v).ok()) {
        Some(v) => Some(v),
        None => {
            problems.push(format!("'{map_id}' {axis} must be an integer, got {raw}"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn write(temp: &TempDir, value: &str) -> PathBuf {
        let path = temp.path().join("world_layout.json");
        fs::write(&path, value).expect("seed layout");
        path
    }

    #[test]
    fn missing_file_is_empty_layout() {
        let temp = TempDir::new().expect("tempdir");
        let layout = load_layout(&temp.path().join("absent.json")).expect("load");
        assert!(layout.maps.is_empty());
    }

    #[test]
    fn coercible_coordinates_are_accepted() {
        let temp = TempDir::new().expect("tempdir");
        let path = write(
            &temp,
            &json!({"maps": {"a": {"x": 3, "y": -2}, "b": {"x": 4.0, "y": "7"}}}).to_string(),
        );
        let layout = load_layout(&path).expect("load");
        assert_eq!(layout.position("a"), Some(LayoutPos { x: 3, y: -2 }));
        assert_eq!(layout.position("b"), Some(LayoutPos { x: 4, y: 7 }));
    }

    #[test]
    fn bad_coordinates_are_validation_errors() {
        let temp = TempDir::new().expect("tempdir");
        let path = write(
            &temp,
            &json!({"maps": {"a": {"x": 1.5, "y": 0}, "b": {"x": 1}, "": {"x": 0, "y": 0}}})
                .to_string(),
        );
        let error = load_layout(&path).expect_err("invalid");
        assert_eq!(error.class(), ErrorClass::Validation);
        let LayoutError::Validation { problems, .. } = error else {
            panic!("expected validation error");
        };
        assert_eq!(problems.len(), 3, "{problems:?}");
    }

    #[test]
    fn non_object_root_is_validation_error() {
        let temp = TempDir::new().expect("tempdir");
        let path = write(&temp, "[1, 2, 3]");
        assert_eq!(load_layout(&path).expect_err("invalid").class(), ErrorClass::Validation);
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let temp = TempDir::new().expect("tempdir");
        let path = write(&temp, "{\"maps\": ");
        assert_eq!(load_layout(&path).expect_err("invalid").class(), ErrorClass::Parse);
    }

    #[test]
    fn save_then_load_preserves_positions() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("maps").join("world_layout.json");
        let mut layout = WorldLayout::default();
        layout.maps.insert("a".to_string(), LayoutPos { x: 0, y: 0 });
        layout.maps.insert("b".to_string(), LayoutPos { x: 12, y: -4 });
        save_layout(&path, &layout).expect("save");
        assert_eq!(load_layout(&path).expect("load"), layout);
    }

    #[test]
    fn save_rejects_blank_ids() {
        let temp = TempDir::new().expect("tempdir");
        let mut layout = WorldLayout::default();
        layout.maps.insert(" ".to_string(), LayoutPos::default());
        let error = save_layout(&temp.path().join("layout.json"), &layout).expect_err("blank id");
        assert_eq!(error.class(), ErrorClass::Validation);
    }

    #[test]
    fn snapping_rounds_to_grid() {
        assert_eq!(LayoutPos::snapped(3.4, -1.6), LayoutPos { x: 3, y: -2 });
    }
}
