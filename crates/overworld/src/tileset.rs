//! Read-only tileset metadata: per-tile behavior and NPC sprite frames.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::DEFAULT_TILE_SIZE;
use crate::map::TileBehavior;

const DEFAULT_FRAME_DURATION_MS: u32 = 200;

#[derive(Debug, Error)]
pub enum TileSetError {
    #[error("failed to read tileset file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse tileset file {path} at {field_path}: {source}")]
    Parse {
        path: PathBuf,
        field_path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileDefinition {
    pub id: String,
    pub name: String,
    pub filename: String,
    pub frames: Vec<String>,
    pub frame_duration_ms: u32,
    pub properties: serde_json::Map<String, Value>,
}

impl TileDefinition {
    /// Tiles are walkable unless `properties.walkable` says otherwise.
    pub fn behavior(&self) -> TileBehavior {
        TileBehavior {
            walkable: self
                .properties
                .get("walkable")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            interaction: self
                .properties
                .get("interaction")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NpcSprite {
    pub id: String,
    pub name: String,
    pub frame_duration_ms: u32,
    /// `states[state][angle]` is the ordered frame list.
    pub states: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl NpcSprite {
    pub fn frames(&self, state: &str, angle: &str) -> &[String] {
        self.states
            .get(state)
            .and_then(|angles| angles.get(canonical_angle(angle)))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Older files used screen directions for sprite angles.
fn canonical_angle(angle: &str) -> &str {
    match angle {
        "down" => "south",
        "up" => "north",
        "left" => "west",
        "right" => "east",
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileSet {
    pub id: String,
    pub name: String,
    pub version: String,
    pub tile_size: u32,
    pub tiles: Vec<TileDefinition>,
    pub npcs: Vec<NpcSprite>,
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TileSetFile {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    tile_size: Option<u32>,
    #[serde(default)]
    tiles: Vec<TileFile>,
    #[serde(default)]
    npcs: Vec<NpcFile>,
    #[serde(flatten)]
    extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TileFile {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    frames: Vec<String>,
    #[serde(default)]
    frame_duration_ms: Option<u32>,
    #[serde(default)]
    properties: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NpcFile {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    frame_duration_ms: Option<u32>,
    #[serde(default)]
    states: BTreeMap<String, Option<BTreeMap<String, Option<Vec<String>>>>>,
}

impl TileSet {
    pub fn load(path: &Path) -> Result<Self, TileSetError> {
        let raw = fs::read_to_string(path).map_err(|source| TileSetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let tileset = Self::from_json_str(&raw, path)?;
        debug!(
            tileset_id = %tileset.id,
            tiles = tileset.tiles.len(),
            npcs = tileset.npcs.len(),
            "tileset_loaded"
        );
        Ok(tileset)
    }

    pub fn from_json_str(raw: &str, origin: &Path) -> Result<Self, TileSetError> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        let file: TileSetFile =
            serde_path_to_error::deserialize(&mut deserializer).map_err(|error| {
                let field_path = error.path().to_string();
                TileSetError::Parse {
                    path: origin.to_path_buf(),
                    field_path,
                    source: error.into_inner(),
                }
            })?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: TileSetFile) -> Self {
        let tiles = file
            .tiles
            .into_iter()
            .map(|tile| {
                let filename = tile.filename.unwrap_or_else(|| {
                    let stem = if tile.id.is_empty() { "tile" } else { tile.id.as_str() };
                    format!("{stem}.png")
                });
                let frames = if tile.frames.is_empty() {
                    vec![filename.clone()]
                } else {
                    tile.frames
                };
                TileDefinition {
                    name: if tile.name.is_empty() { tile.id.clone() } else { tile.name },
                    id: tile.id,
                    filename,
                    frames,
                    frame_duration_ms: tile.frame_duration_ms.unwrap_or(DEFAULT_FRAME_DURATION_MS),
                    properties: tile.properties.unwrap_or_default(),
                }
            })
            .collect();

        let npcs = file
            .npcs
            .into_iter()
            .map(|npc| {
                let mut states: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
                for (state, angles) in npc.states {
                    let normalized = states.entry(state).or_default();
                    for (angle, frames) in angles.unwrap_or_default() {
                        normalized
                            .entry(canonical_angle(&angle).to_string())
                            .or_default()
                            .extend(frames.unwrap_or_default());
                    }
                }
                NpcSprite {
                    name: if npc.name.is_empty() { npc.id.clone() } else { npc.name },
                    id: npc.id,
                    frame_duration_ms: npc.frame_duration_ms.unwrap_or(DEFAULT_FRAME_DURATION_MS),
                    states,
                }
            })
            .collect();

        Self {
            id: file.id.unwrap_or_else(|| "tileset".to_string()),
            name: file.name.unwrap_or_else(|| "Tileset".to_string()),
            version: file.version.unwrap_or_else(|| "1.0.0".to_string()),
            tile_size: file.tile_size.filter(|size| *size > 0).unwrap_or(DEFAULT_TILE_SIZE),
            tiles,
            npcs,
            extra: file.extra,
        }
    }

    pub fn get_tile(&self, tile_id: &str) -> Option<&TileDefinition> {
        self.tiles.iter().find(|tile| tile.id == tile_id)
    }

    pub fn contains_tile(&self, tile_id: &str) -> bool {
        self.get_tile(tile_id).is_some()
    }

    pub fn behavior(&self, tile_id: &str) -> Option<TileBehavior> {
        self.get_tile(tile_id).map(TileDefinition::behavior)
    }

    pub fn npc(&self, npc_id: &str) -> Option<&NpcSprite> {
        self.npcs.iter().find(|npc| npc.id == npc_id)
    }
}
