use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::atomic_io::write_document;
use crate::config::{DEFAULT_TILESET_ID, DEFAULT_TILE_SIZE};
use crate::ErrorClass;

use super::records::{
    CellOverride, Connection, Direction, EntityDef, ExplicitKeys, ExtraFields, GridPos, TriggerDef,
    TriggerKind, GROUND_LAYER, OVERLAY_LAYER, SPAWN_FLAG,
};

pub const DEFAULT_MAP_VERSION: &str = "1.0.0";

#[derive(Debug, Error)]
pub enum MapError {
    #[error("failed to read map file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse map file {path} at {field_path}: {source}")]
    Parse {
        path: PathBuf,
        field_path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode map '{map_id}': {source}")]
    Encode {
        map_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write map file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("override key '{key}' is not of the form \"x,y\"")]
    InvalidOverrideKey { key: String },
    #[error("map '{map_id}' not found at {path}")]
    NotFound { map_id: String, path: PathBuf },
}

impl MapError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Read { .. } | Self::Write { .. } | Self::NotFound { .. } => ErrorClass::Io,
            Self::Parse { .. } | Self::Encode { .. } => ErrorClass::Parse,
            Self::InvalidOverrideKey { .. } => ErrorClass::Validation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapLayer {
    pub name: String,
    #[serde(default)]
    pub tiles: Vec<Vec<Option<String>>>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl MapLayer {
    pub fn empty(name: &str, width: i32, height: i32) -> Self {
        let mut layer = Self {
            name: name.to_string(),
            tiles: Vec::new(),
            extra: ExtraFields::new(),
        };
        layer.normalize(width, height);
        layer
    }

    /// Pads or truncates to exactly `height` rows of `width` cells.
    fn normalize(&mut self, width: i32, height: i32) {
        let width = width.max(0) as usize;
        let height = height.max(0) as usize;
        self.tiles.resize_with(height, Vec::new);
        for row in &mut self.tiles {
            row.resize(width, None);
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Dimensions {
    width: i32,
    height: i32,
}

fn default_version() -> String {
    DEFAULT_MAP_VERSION.to_string()
}

fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

fn default_tileset_id() -> String {
    DEFAULT_TILESET_ID.to_string()
}

/// On-disk shape of a map file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapFile {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tile_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dimensions: Option<Dimensions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tileset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    layers: Option<Vec<MapLayer>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connections: Option<Vec<Connection>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entities: Option<Vec<EntityDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    triggers: Option<Vec<TriggerDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    overrides: Option<BTreeMap<String, CellOverride>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    music_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    spawn: Option<GridPos>,
    #[serde(flatten)]
    extra: ExtraFields,
}

/// Keys every map built in code writes out.
const MAP_KEYS: &[&str] = &[
    "name",
    "version",
    "tileSize",
    "dimensions",
    "tilesetId",
    "layers",
    "connections",
    "entities",
    "triggers",
    "overrides",
];

#[derive(Debug, Clone, PartialEq)]
pub struct MapData {
    pub id: String,
    pub name: String,
    pub version: String,
    pub tile_size: u32,
    pub width: i32,
    pub height: i32,
    pub tileset_id: String,
    pub layers: Vec<MapLayer>,
    pub connections: Vec<Connection>,
    pub entities: Vec<EntityDef>,
    pub triggers: Vec<TriggerDef>,
    pub overrides: BTreeMap<GridPos, CellOverride>,
    pub music_id: Option<String>,
    pub spawn: Option<GridPos>,
    pub extra: ExtraFields,
    pub explicit: ExplicitKeys,
}

impl MapData {
    /// A map with empty ground and overlay layers.
    pub fn blank(id: &str, width: i32, height: i32, tile_size: u32, tileset_id: &str) -> Self {
        let mut map = Self {
            id: id.to_string(),
            name: id.to_string(),
            version: default_version(),
            tile_size,
            width,
            height,
            tileset_id: tileset_id.to_string(),
            layers: vec![
                MapLayer::empty(GROUND_LAYER, width, height),
                MapLayer::empty(OVERLAY_LAYER, width, height),
            ],
            connections: Vec::new(),
            entities: Vec::new(),
            triggers: Vec::new(),
            overrides: BTreeMap::new(),
            music_id: None,
            spawn: None,
            extra: ExtraFields::new(),
            explicit: ExplicitKeys::of(MAP_KEYS),
        };
        map.normalize_layers();
        map
    }

    pub fn load(path: &Path) -> Result<Self, MapError> {
        let raw = fs::read_to_string(path).map_err(|source| MapError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let map = Self::from_json_str(&raw, path)?;
        debug!(
            map_id = %map.id,
            path = %path.display(),
            width = map.width,
            height = map.height,
            layers = map.layers.len(),
            "map_loaded"
        );
        Ok(map)
    }

    /// `origin` is only used to label parse errors.
    pub fn from_json_str(raw: &str, origin: &Path) -> Result<Self, MapError> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        let file = serde_path_to_error::deserialize::<_, MapFile>(&mut deserializer).map_err(
            |error| {
                let field_path = error.path().to_string();
                MapError::Parse {
                    path: origin.to_path_buf(),
                    field_path,
                    source: error.into_inner(),
                }
            },
        )?;
        Self::from_file(file)
    }

    fn from_file(file: MapFile) -> Result<Self, MapError> {
        let mut explicit = ExplicitKeys::default();
        let layers = explicit.read("layers", file.layers, Vec::new);
        let (width, height) = match file.dimensions {
            Some(dimensions) => {
                explicit.mark("dimensions");
                (dimensions.width, dimensions.height)
            }
            None => infer_dimensions(&layers),
        };

        let mut overrides = BTreeMap::new();
        for (key, cell) in explicit.read("overrides", file.overrides, BTreeMap::new) {
            let pos = parse_override_key(&key).ok_or(MapError::InvalidOverrideKey { key })?;
            overrides.insert(pos, cell);
        }

        let mut map = Self {
            id: file.id,
            name: explicit.read("name", file.name, String::new),
            version: explicit.read("version", file.version, default_version),
            tile_size: explicit.read("tileSize", file.tile_size, default_tile_size),
            width,
            height,
            tileset_id: explicit.read("tilesetId", file.tileset_id, default_tileset_id),
            layers,
            connections: explicit.read("connections", file.connections, Vec::new),
            entities: explicit.read("entities", file.entities, Vec::new),
            triggers: explicit.read("triggers", file.triggers, Vec::new),
            overrides,
            music_id: file.music_id,
            spawn: file.spawn,
            extra: file.extra,
            explicit,
        };
        map.normalize_layers();
        Ok(map)
    }

    fn to_file(&self) -> MapFile {
        let explicit = &self.explicit;
        let inferred = infer_dimensions(&self.layers) == (self.width, self.height);
        let dimensions = Dimensions {
            width: self.width,
            height: self.height,
        };
        let overrides: BTreeMap<String, CellOverride> = self
            .overrides
            .iter()
            .map(|(pos, cell)| (format!("{},{}", pos.x, pos.y), cell.clone()))
            .collect();
        MapFile {
            id: self.id.clone(),
            name: explicit.write("name", self.name.clone(), String::is_empty),
            version: explicit.write("version", self.version.clone(), |version| *version == default_version()),
            tile_size: explicit.write("tileSize", self.tile_size, |size| *size == default_tile_size()),
            dimensions: explicit.write("dimensions", dimensions, |_| inferred),
            tileset_id: explicit.write("tilesetId", self.tileset_id.clone(), |id| *id == default_tileset_id()),
            layers: explicit.write("layers", self.layers.clone(), Vec::is_empty),
            connections: explicit.write("connections", self.connections.clone(), Vec::is_empty),
            entities: explicit.write("entities", self.entities.clone(), Vec::is_empty),
            triggers: explicit.write("triggers", self.triggers.clone(), Vec::is_empty),
            overrides: explicit.write("overrides", overrides, BTreeMap::is_empty),
            music_id: self.music_id.clone(),
            spawn: self.spawn,
            extra: self.extra.clone(),
        }
    }

    pub fn to_json_string(&self) -> Result<String, MapError> {
        serde_json::to_string_pretty(&self.to_file()).map_err(|source| MapError::Encode {
            map_id: self.id.clone(),
            source,
        })
    }

    pub fn save_to_path(&self, path: &Path) -> Result<PathBuf, MapError> {
        let text = self.to_json_string()?;
        write_document(path, &text).map_err(|source| MapError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(map_id = %self.id, path = %path.display(), "map_saved");
        Ok(path.to_path_buf())
    }

    /// Every layer ends up `height` rows by `width` cells and an overlay layer exists.
    pub fn normalize_layers(&mut self) {
        for layer in &mut self.layers {
            layer.normalize(self.width, self.height);
        }
        if self.layer(OVERLAY_LAYER).is_none() {
            self.layers
                .push(MapLayer::empty(OVERLAY_LAYER, self.width, self.height));
        }
    }

    /// Changes dimensions, re-normalizes layers and drops overrides that fell outside.
    pub fn resize(&mut self, width: i32, height: i32) {
        self.width = width;
        self.height = height;
        self.overrides.retain(|pos, _| {
            pos.x >= 0 && pos.y >= 0 && pos.x < width && pos.y < height
        });
        self.normalize_layers();
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    pub fn layer(&self, name: &str) -> Option<&MapLayer> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    pub fn layer_mut(&mut self, name: &str) -> Option<&mut MapLayer> {
        self.layers.iter_mut().find(|layer| layer.name == name)
    }

    pub fn get_tile(&self, layer: &str, x: i32, y: i32) -> Option<&str> {
        if !self.in_bounds(x, y) {
            return None;
        }
        self.layer(layer)?
            .tiles
            .get(y as usize)?
            .get(x as usize)?
            .as_deref()
    }

    /// Returns false when the layer is unknown or the cell is out of bounds.
    pub fn set_tile(&mut self, layer: &str, x: i32, y: i32, tile: Option<String>) -> bool {
        if !self.in_bounds(x, y) {
            return false;
        }
        let Some(cell) = self
            .layer_mut(layer)
            .and_then(|layer| layer.tiles.get_mut(y as usize))
            .and_then(|row| row.get_mut(x as usize))
        else {
            return false;
        };
        *cell = tile;
        true
    }

    /// Non-empty tile ids at a cell, bottom layer first.
    pub fn tiles_at(&self, x: i32, y: i32) -> Vec<&str> {
        if !self.in_bounds(x, y) {
            return Vec::new();
        }
        self.layers
            .iter()
            .filter_map(|layer| {
                layer
                    .tiles
                    .get(y as usize)
                    .and_then(|row| row.get(x as usize))
                    .and_then(|cell| cell.as_deref())
            })
            .collect()
    }

    /// Replaces every 4-connected cell matching the start cell's tile.
    /// Cells missing from a ragged layer are left alone.
    pub fn flood_fill(&mut self, layer: &str, x: i32, y: i32, tile: Option<String>) -> usize {
        if !self.in_bounds(x, y) {
            return 0;
        }
        let (width, height) = (self.width, self.height);
        let Some(layer) = self.layer_mut(layer) else {
            return 0;
        };
        let Some(target) = cell_mut(&mut layer.tiles, x, y).cloned() else {
            return 0;
        };
        if target == tile {
            return 0;
        }
        let mut filled = 0;
        let mut stack = vec![(x, y)];
        while let Some((cx, cy)) = stack.pop() {
            if cx < 0 || cy < 0 || cx >= width || cy >= height {
                continue;
            }
            let Some(cell) = cell_mut(&mut layer.tiles, cx, cy) else {
                continue;
            };
            if *cell != target {
                continue;
            }
            *cell = tile.clone();
            filled += 1;
            stack.extend([(cx + 1, cy), (cx - 1, cy), (cx, cy + 1), (cx, cy - 1)]);
        }
        filled
    }

    pub fn get_override(&self, x: i32, y: i32) -> Option<&CellOverride> {
        if !self.in_bounds(x, y) {
            return None;
        }
        self.overrides.get(&GridPos { x, y })
    }

    pub fn set_override(&mut self, x: i32, y: i32, cell: CellOverride) -> bool {
        if !self.in_bounds(x, y) {
            return false;
        }
        self.overrides.insert(GridPos { x, y }, cell);
        true
    }

    pub fn remove_override(&mut self, x: i32, y: i32) -> Option<CellOverride> {
        self.overrides.remove(&GridPos { x, y })
    }

    /// Cycles the walkable override: none, blocked, walkable, none.
    pub fn cycle_override_walkable(&mut self, x: i32, y: i32) -> Option<bool> {
        if !self.in_bounds(x, y) {
            return None;
        }
        let mut cell = self.remove_override(x, y).unwrap_or_default();
        cell.walkable = match cell.walkable {
            None => Some(false),
            Some(false) => Some(true),
            Some(true) => None,
        };
        let walkable = cell.walkable;
        if !cell.is_empty() {
            self.overrides.insert(GridPos { x, y }, cell);
        }
        walkable
    }

    pub fn toggle_override_flag(&mut self, x: i32, y: i32, flag: &str) -> bool {
        if !self.in_bounds(x, y) {
            return false;
        }
        let mut cell = self.remove_override(x, y).unwrap_or_default();
        let enabled = !cell.has_flag(flag);
        if enabled {
            cell.add_flag(flag);
        } else {
            cell.remove_flag(flag);
        }
        if !cell.is_empty() {
            self.overrides.insert(GridPos { x, y }, cell);
        }
        enabled
    }

    pub fn find_entities_at(&self, x: i32, y: i32) -> Vec<&EntityDef> {
        if !self.in_bounds(x, y) {
            return Vec::new();
        }
        self.entities
            .iter()
            .filter(|entity| entity.position.x == x && entity.position.y == y)
            .collect()
    }

    pub fn entity(&self, id: &str) -> Option<&EntityDef> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    pub fn entity_mut(&mut self, id: &str) -> Option<&mut EntityDef> {
        self.entities.iter_mut().find(|entity| entity.id == id)
    }

    pub fn unique_entity_id(&self, base: &str) -> String {
        if self.entity(base).is_none() {
            return base.to_string();
        }
        (2..)
            .map(|counter| format!("{base}_{counter}"))
            .find(|candidate| self.entity(candidate).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    pub fn find_triggers_at(&self, x: i32, y: i32, kind: Option<TriggerKind>) -> Vec<&TriggerDef> {
        if !self.in_bounds(x, y) {
            return Vec::new();
        }
        self.triggers
            .iter()
            .filter(|trigger| kind.map_or(true, |kind| trigger.kind == kind))
            .filter(|trigger| trigger.position.contains(x, y))
            .collect()
    }

    pub fn connection(&self, id: &str) -> Option<&Connection> {
        self.connections.iter().find(|connection| connection.id == id)
    }

    /// Edge connection leaving through `direction`.
    ///
    /// `along` is the player's row for left/right exits and column for up/down
    /// exits. A connection tagged with a boundary coordinate only matches that
    /// coordinate; untagged connections cover the whole edge.
    pub fn connection_for_edge(&self, direction: Direction, along: Option<i32>) -> Option<&Connection> {
        let mut candidates = self
            .connections
            .iter()
            .filter(|connection| connection.edge_direction() == Some(direction));
        match along {
            Some(coord) => {
                let mut untagged = None;
                for connection in candidates {
                    match connection.source_edge_coord() {
                        Some(tag) if tag == i64::from(coord) => return Some(connection),
                        Some(_) => {}
                        None => {
                            untagged.get_or_insert(connection);
                        }
                    }
                }
                untagged
            }
            None => candidates.next(),
        }
    }

    pub fn portal_at(&self, x: i32, y: i32) -> Option<&Connection> {
        if !self.in_bounds(x, y) {
            return None;
        }
        self.connections
            .iter()
            .find(|connection| connection.portal_cell() == Some(GridPos { x, y }))
    }

    /// Explicit spawn, else the first override flagged `spawn`, else the origin.
    pub fn spawn_point(&self) -> GridPos {
        if let Some(spawn) = self.spawn {
            return spawn;
        }
        self.overrides
            .iter()
            .find(|(_, cell)| cell.has_flag(SPAWN_FLAG))
            .map(|(pos, _)| *pos)
            .unwrap_or_default()
    }
}

fn cell_mut(tiles: &mut [Vec<Option<String>>], x: i32, y: i32) -> Option<&mut Option<String>> {
    let row = tiles.get_mut(usize::try_from(y).ok()?)?;
    row.get_mut(usize::try_from(x).ok()?)
}

fn infer_dimensions(layers: &[MapLayer]) -> (i32, i32) {
    let height = layers.iter().map(|layer| layer.tiles.len()).max().unwrap_or(0);
    let width = layers
        .iter()
        .flat_map(|layer| layer.tiles.iter().map(Vec::len))
        .max()
        .unwrap_or(0);
    (width as i32, height as i32)
}

fn parse_override_key(key: &str) -> Option<GridPos> {
    let (x, y) = key.split_once(',')?;
    Some(GridPos {
        x: x.trim().parse().ok()?,
        y: y.trim().parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tempfile::TempDir;

    use super::*;
    use crate::map::records::{ConnectionTarget, TriggerArea};

    fn sample_map_json() -> Value {
        json!({
            "id": "meadow",
            "name": "Meadow",
            "version": "1.2.0",
            "tileSize": 16,
            "dimensions": {"width": 3, "height": 2},
            "tilesetId": "basic_overworld",
            "layers": [
                {"name": "ground", "tiles": [["grass", "grass", "grass"], ["grass", "rock", "grass"]]},
                {"name": "overlay", "tiles": [[null, null, null], [null, null, "sign"]], "opacity": 0.5}
            ],
            "connections": [
                {"id": "east", "type": "edge", "from": "right", "to": {"mapId": "town", "spawn": {"x": 0, "y": 1}}, "auto": "world", "sourceEdgeCoord": 1}
            ],
            "entities": [
                {"id": "sage", "type": "npc", "name": "Sage", "position": {"x": 1, "y": 0}, "facing": "down", "collision": true, "dialog": "Hi"}
            ],
            "triggers": [
                {"id": "intro", "type": "onEnter", "position": {"x": 0, "y": 0}, "actions": [{"kind": "showText", "text": "Welcome"}, {"kind": "confetti"}], "repeatable": false}
            ],
            "overrides": {"2,0": {"walkable": false, "flags": ["ledge"], "note": "cliff"}},
            "musicId": "meadow_theme",
            "spawn": {"x": 0, "y": 1},
            "weather": {"kind": "rain"}
        })
    }

    fn parse(value: &Value) -> MapData {
        MapData::from_json_str(&value.to_string(), Path::new("inline.json")).expect("parse map")
    }

    #[test]
    fn save_reproduces_every_field() {
        let original = sample_map_json();
        let map = parse(&original);
        let encoded: Value =
            serde_json::from_str(&map.to_json_string().expect("encode")).expect("reparse");
        assert_eq!(encoded, original);
    }

    #[test]
    fn sparse_map_keeps_explicit_defaults_and_gains_no_keys() {
        let original = json!({
            "id": "sparse",
            "layers": [
                {"name": "ground", "tiles": [["grass", "grass"]]},
                {"name": "overlay", "tiles": [[null, null]]}
            ],
            "entities": [
                {"id": "e", "position": {"x": 0, "y": 0}, "actions": [], "hidden": false, "properties": {}},
                {"id": "f", "position": {"x": 1, "y": 0}}
            ],
            "triggers": [
                {"id": "t", "type": "onInteract", "position": {"x": 1, "y": 0}, "repeatable": false}
            ],
            "overrides": {"0,0": {"flags": [], "walkable": true}},
            "connections": [
                {"id": "gate", "type": "portal", "from": {"x": 1, "y": 0}, "to": {"mapId": "town"}, "condition": {"flagsAll": []}}
            ]
        });
        let map = parse(&original);
        assert_eq!((map.width, map.height), (2, 1));
        assert_eq!(map.entities[0].facing, "down");

        let encoded: Value =
            serde_json::from_str(&map.to_json_string().expect("encode")).expect("reparse");
        assert_eq!(encoded, original);
    }

    #[test]
    fn edited_defaults_are_written_even_when_absent_on_load() {
        let mut map = parse(&json!({
            "id": "sparse",
            "layers": [{"name": "ground", "tiles": [["grass"]]}],
            "entities": [{"id": "e", "position": {"x": 0, "y": 0}}]
        }));
        map.entities[0].hidden = true;
        map.entities[0].collision = true;

        let encoded: Value =
            serde_json::from_str(&map.to_json_string().expect("encode")).expect("reparse");
        assert_eq!(
            encoded["entities"][0],
            json!({"id": "e", "position": {"x": 0, "y": 0}, "collision": true, "hidden": true})
        );
        assert!(encoded.get("version").is_none());
    }

    #[test]
    fn load_save_load_is_stable_on_disk() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("meadow.json");
        fs::write(&path, sample_map_json().to_string()).expect("seed");

        let first = MapData::load(&path).expect("first load");
        first.save_to_path(&path).expect("save");
        let first_text = fs::read_to_string(&path).expect("read");
        let second = MapData::load(&path).expect("second load");
        second.save_to_path(&path).expect("save again");

        assert_eq!(first, second);
        assert_eq!(first_text, fs::read_to_string(&path).expect("read again"));
    }

    #[test]
    fn layers_are_padded_and_truncated_to_dimensions() {
        let map = parse(&json!({
            "id": "ragged",
            "dimensions": {"width": 3, "height": 3},
            "layers": [
                {"name": "ground", "tiles": [["a"], ["a", "b", "c", "d"], ["a"], ["extra"]]}
            ]
        }));
        assert_eq!(map.layers.len(), 2, "overlay layer is synthesized");
        for layer in &map.layers {
            assert_eq!(layer.tiles.len(), 3);
            assert!(layer.tiles.iter().all(|row| row.len() == 3));
        }
        assert_eq!(map.get_tile("ground", 2, 1), Some("c"));
        assert_eq!(map.get_tile("ground", 1, 0), None);
        assert!(map.layer(OVERLAY_LAYER).is_some());
    }

    #[test]
    fn missing_dimensions_are_inferred_from_layers() {
        let map = parse(&json!({
            "id": "inferred",
            "layers": [{"name": "ground", "tiles": [["a", "b"], ["c"]]}]
        }));
        assert_eq!((map.width, map.height), (2, 2));
    }

    #[test]
    fn parse_error_reports_field_path() {
        let error = MapData::from_json_str(
            r#"{"id": "bad", "dimensions": {"width": "wide", "height": 2}}"#,
            Path::new("bad.json"),
        )
        .expect_err("must fail");
        let MapError::Parse { field_path, .. } = &error else {
            panic!("expected parse error, got {error:?}");
        };
        assert_eq!(field_path, "dimensions.width");
        assert_eq!(error.class(), ErrorClass::Parse);
    }

    #[test]
    fn malformed_override_key_is_rejected() {
        let error = MapData::from_json_str(
            r#"{"id": "bad", "overrides": {"one,two": {"walkable": true}}}"#,
            Path::new("bad.json"),
        )
        .expect_err("must fail");
        assert!(matches!(error, MapError::InvalidOverrideKey { ref key } if key == "one,two"));
    }

    #[test]
    fn lookups_return_absent_out_of_bounds() {
        let map = parse(&sample_map_json());
        assert_eq!(map.get_tile("ground", -1, 0), None);
        assert_eq!(map.get_tile("ground", 3, 0), None);
        assert_eq!(map.get_tile("missing_layer", 0, 0), None);
        assert!(map.get_override(9, 9).is_none());
        assert!(map.find_entities_at(-1, -1).is_empty());
        assert!(map.find_triggers_at(5, 5, None).is_empty());
        assert!(map.portal_at(-3, 0).is_none());
        assert_eq!(map.tiles_at(1, 1), vec!["rock"]);
        assert_eq!(map.tiles_at(2, 1), vec!["grass", "sign"]);
    }

    #[test]
    fn set_tile_refuses_out_of_bounds() {
        let mut map = MapData::blank("m", 2, 2, 16, "basic_overworld");
        assert!(map.set_tile(GROUND_LAYER, 1, 1, Some("grass".to_string())));
        assert!(!map.set_tile(GROUND_LAYER, 2, 1, Some("grass".to_string())));
        assert!(!map.set_tile("nope", 0, 0, None));
        assert_eq!(map.get_tile(GROUND_LAYER, 1, 1), Some("grass"));
    }

    #[test]
    fn edge_lookup_prefers_matching_boundary_coordinate() {
        let mut map = MapData::blank("m", 4, 4, 16, "basic_overworld");
        for row in [1, 2] {
            let mut connection = Connection::edge(
                &format!("auto_right_b_{row}"),
                Direction::Right,
                ConnectionTarget::new("b", GridPos::new(0, row), Some(Direction::Right)),
            );
            connection.mark_auto(row);
            map.connections.push(connection);
        }
        assert_eq!(
            map.connection_for_edge(Direction::Right, Some(2)).map(|c| c.id.as_str()),
            Some("auto_right_b_2")
        );
        assert!(map.connection_for_edge(Direction::Right, Some(3)).is_none());
        assert!(map.connection_for_edge(Direction::Left, Some(1)).is_none());

        map.connections.push(Connection::edge(
            "whole_edge",
            Direction::Right,
            ConnectionTarget::new("c", GridPos::new(0, 0), None),
        ));
        assert_eq!(
            map.connection_for_edge(Direction::Right, Some(3)).map(|c| c.id.as_str()),
            Some("whole_edge")
        );
    }

    #[test]
    fn spawn_point_falls_back_to_spawn_flag_then_origin() {
        let mut map = MapData::blank("m", 4, 4, 16, "basic_overworld");
        assert_eq!(map.spawn_point(), GridPos::new(0, 0));
        map.toggle_override_flag(2, 3, SPAWN_FLAG);
        assert_eq!(map.spawn_point(), GridPos::new(2, 3));
        map.spawn = Some(GridPos::new(1, 1));
        assert_eq!(map.spawn_point(), GridPos::new(1, 1));
    }

    #[test]
    fn override_cycle_removes_empty_override() {
        let mut map = MapData::blank("m", 2, 2, 16, "basic_overworld");
        assert_eq!(map.cycle_override_walkable(0, 0), Some(false));
        assert_eq!(map.cycle_override_walkable(0, 0), Some(true));
        assert_eq!(map.cycle_override_walkable(0, 0), None);
        assert!(map.get_override(0, 0).is_none());
        assert_eq!(map.cycle_override_walkable(5, 5), None);
    }

    #[test]
    fn resize_drops_out_of_bounds_overrides() {
        let mut map = MapData::blank("m", 4, 4, 16, "basic_overworld");
        map.set_override(3, 3, CellOverride { walkable: Some(false), ..CellOverride::default() });
        map.set_override(0, 0, CellOverride { walkable: Some(true), ..CellOverride::default() });
        map.resize(2, 2);
        assert!(map.overrides.contains_key(&GridPos::new(0, 0)));
        assert!(!map.overrides.contains_key(&GridPos::new(3, 3)));
        assert!(map.layers.iter().all(|layer| layer.tiles.len() == 2));
    }

    #[test]
    fn flood_fill_stays_inside_region() {
        let mut map = MapData::blank("m", 3, 3, 16, "basic_overworld");
        map.set_tile(GROUND_LAYER, 1, 0, Some("wall".to_string()));
        map.set_tile(GROUND_LAYER, 1, 1, Some("wall".to_string()));
        map.set_tile(GROUND_LAYER, 1, 2, Some("wall".to_string()));
        let filled = map.flood_fill(GROUND_LAYER, 0, 0, Some("water".to_string()));
        assert_eq!(filled, 3);
        assert_eq!(map.get_tile(GROUND_LAYER, 0, 2), Some("water"));
        assert_eq!(map.get_tile(GROUND_LAYER, 2, 2), None);
    }

    #[test]
    fn unique_entity_id_appends_counter() {
        let mut map = MapData::blank("m", 3, 3, 16, "basic_overworld");
        assert_eq!(map.unique_entity_id("guard"), "guard");
        map.entities.push(EntityDef::npc("guard", GridPos::new(0, 0)));
        map.entities.push(EntityDef::npc("guard_2", GridPos::new(1, 0)));
        assert_eq!(map.unique_entity_id("guard"), "guard_3");
    }

    #[test]
    fn flood_fill_skips_cells_missing_from_a_ragged_layer() {
        let mut map = MapData::blank("m", 3, 3, 16, "basic_overworld");
        map.layers[0].tiles[1].truncate(1);
        map.layers[0].tiles.pop();

        let filled = map.flood_fill(GROUND_LAYER, 0, 0, Some("grass".to_string()));
        assert_eq!(filled, 4);
        assert_eq!(map.get_tile(GROUND_LAYER, 2, 0), Some("grass"));
        assert_eq!(map.get_tile(GROUND_LAYER, 0, 1), Some("grass"));
        assert_eq!(map.get_tile(GROUND_LAYER, 1, 1), None);
        assert_eq!(map.flood_fill(GROUND_LAYER, 0, 2, Some("grass".to_string())), 0);
    }

    #[test]
    fn triggers_filter_by_kind_and_rect() {
        let mut map = MapData::blank("m", 4, 4, 16, "basic_overworld");
        map.triggers.push(TriggerDef {
            id: "zone".to_string(),
            kind: TriggerKind::OnEnter,
            position: TriggerArea::Rect { x: 1, y: 1, width: 2, height: 2 },
            actions: Vec::new(),
            repeatable: true,
            conditions: None,
            extra: ExtraFields::new(),
            explicit: Default::default(),
        });
        assert_eq!(map.find_triggers_at(2, 2, Some(TriggerKind::OnEnter)).len(), 1);
        assert!(map.find_triggers_at(2, 2, Some(TriggerKind::OnInteract)).is_empty());
        assert!(map.find_triggers_at(3, 3, None).is_empty());
    }

    #[test]
    fn clone_is_independent() {
        let original = parse(&sample_map_json());
        let mut copy = original.clone();
        copy.connections.clear();
        copy.set_tile(GROUND_LAYER, 0, 0, None);
        assert_eq!(original.connections.len(), 1);
        assert_eq!(original.get_tile(GROUND_LAYER, 0, 0), Some("grass"));
    }
}
